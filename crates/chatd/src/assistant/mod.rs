//! Assistant provider — the AI_MESSAGE packet's only external dependency.
//! One shared prompt builder, two HTTP backends (a local Ollama-style
//! runner and an OpenAI-compatible chat-completions endpoint) behind a
//! common trait so the handler never branches on which is configured.

mod ollama;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use chat_core::config::{AiMode, AssistantConfig};
use chat_repo::models::MessageView;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// One message in the prompt sent to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

const SYSTEM_PROMPT_TEMPLATE: &str = "You are '{user}' in a group chat. You are knowledgeable, helpful, and engaging. Your responses should: \
- Provide substantive, useful information when asked questions\n\
- Be specific and detailed rather than generic\n\
- Show genuine expertise and willingness to help\n\
- Use examples and practical details when explaining concepts\n\
- Ask follow-up questions that show you're thinking deeper about the topic\n\
- Be conversational but informative, like talking to a knowledgeable friend\n\
- Avoid repetitive phrases or generic responses\n\
- Match the user's level of interest and technical depth\n\
- Be encouraging and supportive while being genuinely helpful\n\
- Don't just acknowledge questions, actually answer them with useful content";

/// Builds the prompt shared by both providers: a system message framing
/// the assistant as `as_user`, one user-role message per prior chat
/// message, and a trailing instruction — either "improve this draft" or
/// "continue the conversation" depending on whether `draft` is given.
pub fn build_chat_prompt(context: &[MessageView], as_user: &str, draft: Option<&str>) -> Vec<ChatMessage> {
    let mut prompt = vec![ChatMessage {
        role: "system",
        content: SYSTEM_PROMPT_TEMPLATE.replace("{user}", as_user),
    }];

    for message in context {
        prompt.push(ChatMessage {
            role: "user",
            content: format!("{}: {}", message.sender_name, message.content),
        });
    }

    let trailing = match draft {
        Some(draft) => format!(
            "As {as_user}, you're planning to send this message: '{draft}'. Improve it to make it \
             sound more natural, accurate, and casual in this group chat context."
        ),
        None => format!(
            "Based on the conversation above, what would {as_user} naturally say next? Be helpful, \
             informative, and engaging. If someone asked a question, provide a detailed, useful \
             answer. Respond as {as_user} would, like a knowledgeable friend who wants to help."
        ),
    };
    prompt.push(ChatMessage { role: "user", content: trailing });

    prompt
}

/// A backend capable of generating the next chat message. Implementations
/// own their own HTTP client and endpoint configuration.
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    async fn complete(
        &self,
        context: &[MessageView],
        as_user: &str,
        draft: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// Picks the provider named by `config.ai_mode`.
pub fn build(config: &AssistantConfig) -> Arc<dyn AssistantProvider> {
    match config.ai_mode {
        AiMode::Ollama => Arc::new(OllamaProvider::new(config.ollama_base_url.clone(), config.model.clone())),
        AiMode::Gpt => Arc::new(OpenAiProvider::new(config.openai_api_key.clone(), config.model.clone())),
    }
}
