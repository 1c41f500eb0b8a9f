//! Ollama 客户端
//!
//! POST `{base_url}/api/chat`，`stream: false`；max_tokens / temperature 映射到 Ollama 的
//! `num_predict` / `temperature`，model_id 覆盖默认模型。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::llm::{CompletionRequest, LlmClient, LlmError};

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// 错误信息里保留的响应体长度
const MAX_ERROR_BODY: usize = 300;

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, model: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(OLLAMA_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let model = request.options.model_id.as_deref().unwrap_or(&self.model);
        let mut options = Map::new();
        if let Some(t) = request.options.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.options.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }
        json!({
            "model": model,
            "messages": request.prompt.messages,
            "stream": false,
            "options": options,
        })
    }
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_ERROR_BODY {
        format!("{}...", s.chars().take(MAX_ERROR_BODY).collect::<String>())
    } else {
        s.to_string()
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let timeout = request
            .options
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(url = %url, prompt = %request.prompt, "ollama request");

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend {
                status: Some(status.as_u16()),
                message: truncate(&body),
            });
        }

        let data: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Backend {
                    status: Some(status.as_u16()),
                    message: format!("malformed response body: {e}"),
                }
            }
        })?;

        data.pointer("/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Backend {
                status: Some(status.as_u16()),
                message: "response missing message.content".to_string(),
            })
    }

    fn backend_id(&self) -> String {
        format!("ollama:{}", self.model)
    }
}
