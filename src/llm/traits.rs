//! LLM 客户端抽象
//!
//! 所有后端实现 LlmClient::complete；客户端只上报错误（Timeout / Transport / Backend），
//! 是否重试由 Agent 决定。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    /// 连接拒绝、DNS 失败等
    #[error("transport error: {0}")]
    Transport(String),

    /// 非 2xx 或响应体格式错误
    #[error("backend error (status {status:?}): {message}")]
    Backend { status: Option<u16>, message: String },
}

impl LlmError {
    /// 超时、传输错误、429 与 5xx 可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Transport(_) => true,
            LlmError::Backend {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            LlmError::Backend { status: None, .. } => false,
        }
    }
}

/// 调用选项；未设置的项使用后端默认值，未知字段在反序列化时忽略
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
    pub model_id: Option<String>,
}

/// 提示词中的消息角色（与聊天 API 一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: PromptRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PromptRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: PromptRole::Assistant, content: content.into() }
    }
}

/// 组装完成的提示词：有序消息列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self { messages }
    }

    /// 单条 user 消息（一次性补全，如代码分析）
    pub fn single(text: impl Into<String>) -> Self {
        Self::new(vec![PromptMessage::user(text)])
    }

    /// 最后一条 user 消息
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == PromptRole::User)
            .map(|m| m.content.as_str())
    }
}

impl fmt::Display for Prompt {
    /// 纯文本形式（日志与只接受 prompt 字符串的后端使用）
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            let label = match m.role {
                PromptRole::System => "System",
                PromptRole::User => "User",
                PromptRole::Assistant => "Assistant",
            };
            write!(f, "{label}: {}", m.content)?;
        }
        Ok(())
    }
}

/// 一次补全请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub prompt: Prompt,
    pub options: CompletionOptions,
}

impl CompletionRequest {
    pub fn new(prompt: Prompt, options: CompletionOptions) -> Self {
        Self { prompt, options }
    }
}

/// LLM 客户端 trait：异步补全；等待网络时挂起，不阻塞其他并发请求
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// 后端标识，如 `ollama:llama3.2`，写入 SessionRecord
    fn backend_id(&self) -> String;
}
