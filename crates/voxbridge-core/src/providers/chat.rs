//! OpenAI-compatible chat completions client used as the stateless secondary provider.

use super::SecondaryProvider;
use crate::config::SecondaryConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::types::{ChatMessage, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    system_prompt: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn from_config(config: &SecondaryConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Self {
            client: builder.build().unwrap_or_else(|_| reqwest::Client::new()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Prepend the configured system prompt. A leading system message from the caller
    /// (the scenario) is folded into it.
    fn with_system_prompt(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let Some(prompt) = &self.system_prompt else {
            return messages.to_vec();
        };
        let mut out = Vec::with_capacity(messages.len() + 1);
        match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => {
                out.push(ChatMessage::system(format!("{}\n\n{}", prompt, first.content)));
                out.extend_from_slice(rest);
            }
            _ => {
                out.push(ChatMessage::system(prompt.clone()));
                out.extend_from_slice(messages);
            }
        }
        out
    }
}

#[async_trait]
impl SecondaryProvider for ChatCompletionsProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("secondary.api_key".into()))?;

        let messages = self.with_system_prompt(messages);
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            temperature: Some(0.7),
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::MalformedMessage(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_prepended_once() {
        let provider = ChatCompletionsProvider::from_config(&SecondaryConfig::default());
        let msgs = provider.with_system_prompt(&[ChatMessage::user("hi")]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);

        let scenario_first = [ChatMessage::system("Scenario: interview"), ChatMessage::user("hi")];
        let msgs = provider.with_system_prompt(&scenario_first);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.ends_with("Scenario: interview"));
        assert!(msgs[0].content.starts_with("You are a friendly voice assistant"));
        assert_eq!(msgs[1], ChatMessage::user("hi"));
    }

    #[test]
    fn request_serializes_lowercase_roles() {
        let messages = [ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let body = ChatRequest { model: "m", messages: &messages, temperature: None };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert!(json.get("temperature").is_none());
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let provider = ChatCompletionsProvider::from_config(&SecondaryConfig::default());
        let err = provider.chat(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
