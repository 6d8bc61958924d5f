use async_trait::async_trait;
use serde::Deserialize;

use chat_repo::models::MessageView;

use super::{build_chat_prompt, AssistantProvider};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Talks to an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl AssistantProvider for OpenAiProvider {
    async fn complete(
        &self,
        context: &[MessageView],
        as_user: &str,
        draft: Option<&str>,
    ) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not configured"))?;
        let prompt = build_chat_prompt(context, as_user, draft);

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": prompt,
                "temperature": 0.9,
                "max_tokens": 300,
                "top_p": 0.95,
                "frequency_penalty": 0.3,
                "presence_penalty": 0.2,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<ChatCompletionResponse>()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("no completion returned"))?;

        Ok(content.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string())
    }
}
