use crate::config::Config;
use crate::error::Result;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Azure OpenAI chat-completions client. Model selection and token budget
/// are configuration; this service only knows how to send a system/user
/// message pair and hand back the free-text reply.
#[derive(Clone)]
pub struct AiService {
    client: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

impl AiService {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            endpoint: config.aoai_endpoint.trim_end_matches('/').to_string(),
            api_key: config.aoai_key.clone(),
            deployment: config.aoai_deployment.clone(),
            api_version: config.aoai_api_version.clone(),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }

    /// One chat-completion round trip. No retries: a failed call is a
    /// failed generation slot and the orchestrator moves on.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let res = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Model API error {}: {}", status, text).into());
        }

        let body: JsonValue = res.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid model response format").into())
    }

    /// Minimal round trip used by the test_connections endpoint.
    pub async fn test_connection(&self) -> (bool, String) {
        match self
            .chat("", "Hello, this is a connection test.", 0.0, 10)
            .await
        {
            Ok(_) => (true, "Connection successful".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }
}
