//! HTTP-backed analyzer
//!
//! Speaks the chat-completions wire shape: a system message plus a user
//! message in, `choices[0].message.content` out. The endpoint, credentials,
//! model name and per-call timeout all come from configuration.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Analyzer, AnalyzerRequest, AnalyzerResponse, AnalyzerUsage};

pub struct HttpAnalyzer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            timeout,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<ChatError>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatError {
    message: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze(&self, request: AnalyzerRequest) -> Result<AnalyzerResponse> {
        let api_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.message,
                },
            ],
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&api_request)
            .timeout(self.timeout);

        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("analyzer API error: {} - {}", status, body);
        }

        let api_response: ChatResponse = response.json().await?;

        if let Some(error) = api_response.error {
            anyhow::bail!("analyzer error: {}", error.message);
        }

        let text = api_response
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let usage = api_response.usage.map(|u| AnalyzerUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        debug!(role = %request.role, chars = text.len(), "Analyzer response received");

        Ok(AnalyzerResponse { text, usage })
    }
}
