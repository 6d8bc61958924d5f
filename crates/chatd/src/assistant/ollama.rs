use async_trait::async_trait;
use serde::Deserialize;

use chat_repo::models::MessageView;

use super::{build_chat_prompt, AssistantProvider};

/// Talks to a local Ollama-compatible `/api/chat` endpoint. No API key —
/// the model runner is assumed to be reachable on the local network.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl AssistantProvider for OllamaProvider {
    async fn complete(
        &self,
        context: &[MessageView],
        as_user: &str,
        draft: Option<&str>,
    ) -> anyhow::Result<String> {
        let prompt = build_chat_prompt(context, as_user, draft);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": prompt,
                "stream": false,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        Ok(response
            .message
            .content
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string())
    }
}
