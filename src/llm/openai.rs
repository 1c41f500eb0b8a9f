//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! Client 自带的指数退避被关掉：每次 complete 只发一次 HTTP 请求。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::llm::{CompletionRequest, LlmClient, LlmError, PromptMessage, PromptRole};

/// OpenAI 兼容客户端：持有 Client 与默认 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config).with_backoff(single_attempt()),
            model: model.to_string(),
        }
    }

    fn to_openai_message(m: &PromptMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        Ok(match m.role {
            PromptRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()?
                .into(),
            PromptRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()?
                .into(),
            PromptRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()?
                .into(),
        })
    }
}

/// 首次失败即放弃的退避策略
pub(crate) fn single_attempt() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

/// ApiError 不带 HTTP 状态，按 type / code 还原：限流为 429，服务端错误为 500
fn api_error_status(api: &ApiError) -> Option<u16> {
    let kinds: Vec<&str> = [api.r#type.as_deref(), api.code.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if kinds.is_empty() && api.param.is_none() {
        // 5xx 响应体原样放进 message，其余字段为空
        return Some(500);
    }
    if kinds.contains(&"insufficient_quota") {
        return None;
    }
    if kinds.iter().any(|k| k.contains("rate_limit")) {
        return Some(429);
    }
    if kinds
        .iter()
        .any(|k| matches!(*k, "server_error" | "service_unavailable" | "overloaded_error"))
    {
        return Some(500);
    }
    None
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(err) if err.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(err) => match err.status() {
            Some(status) => LlmError::Backend {
                status: Some(status.as_u16()),
                message: err.to_string(),
            },
            None => LlmError::Transport(err.to_string()),
        },
        OpenAIError::ApiError(api) => LlmError::Backend {
            status: api_error_status(&api),
            message: api.message,
        },
        other => LlmError::Backend {
            status: None,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let messages = request
            .prompt
            .messages
            .iter()
            .map(Self::to_openai_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_openai_error)?;

        let model = request.options.model_id.as_deref().unwrap_or(&self.model);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(messages);
        if let Some(t) = request.options.temperature {
            args.temperature(t);
        }
        if let Some(n) = request.options.max_tokens {
            args.max_completion_tokens(n);
        }
        let chat_request = args.build().map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(map_openai_error)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Backend {
                status: None,
                message: "response has no message content".to_string(),
            })
    }

    fn backend_id(&self) -> String {
        format!("openai:{}", self.model)
    }
}
