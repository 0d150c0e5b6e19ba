//! Signed WebSocket URL issuance for the conversational agent.

use crate::config::PrimaryConfig;
use crate::error::{ProviderError, ProviderResult};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// One authenticated GET that returns a short-lived agent socket URL.
#[derive(Clone)]
pub struct SignedUrlClient {
    client: reqwest::Client,
    endpoint: String,
    api_key_header: String,
    api_key: Option<String>,
    agent_id: Option<String>,
}

impl SignedUrlClient {
    pub fn from_config(config: &PrimaryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: format!(
                "{}{}",
                config.api_base.trim_end_matches('/'),
                config.signed_url_path
            ),
            api_key_header: config.api_key_header.clone(),
            api_key: config.api_key.clone(),
            agent_id: config.agent_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.agent_id.is_some()
    }

    pub async fn signed_url(&self) -> ProviderResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("primary.api_key".into()))?;
        let agent_id = self
            .agent_id
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("primary.agent_id".into()))?;

        let res = self
            .client
            .get(&self.endpoint)
            .query(&[("agent_id", agent_id)])
            .header(self.api_key_header.as_str(), api_key)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: SignedUrlResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::MalformedMessage(e.to_string()))?;
        Ok(parsed.signed_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credentials_are_reported_before_any_request() {
        let client = SignedUrlClient::from_config(&PrimaryConfig::default());
        assert!(!client.is_configured());
        let err = client.signed_url().await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let cfg = PrimaryConfig {
            api_base: "http://localhost:9000/".into(),
            ..PrimaryConfig::default()
        };
        let client = SignedUrlClient::from_config(&cfg);
        assert_eq!(
            client.endpoint,
            "http://localhost:9000/v1/convai/conversation/get_signed_url"
        );
    }
}
