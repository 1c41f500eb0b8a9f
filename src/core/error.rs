//! Agent 错误类型
//!
//! 调用方只会看到 AgentError；检索失败不在其中（降级为空上下文，只记日志）。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::SessionStoreError;

/// Agent 对外暴露的错误（输入、模型、工具、会话、并发）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 重试预算耗尽；Transcript 只保留未回复的 user Turn
    #[error("Model unavailable after {attempts} attempt(s): {last_error}")]
    ModelUnavailable { attempts: u32, last_error: LlmError },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidToolArgs { tool: String, reason: String },

    /// 工具返回错误、超时或 panic，均不影响 Agent 继续服务
    #[error("Tool '{tool}' failed: {cause}")]
    ToolExecution { tool: String, cause: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session corrupt: {0}")]
    SessionCorrupt(String),

    #[error("Session persist failed: {0}")]
    SessionPersist(String),

    /// 同一 Agent 已有进行中的变更调用（单写者）
    #[error("Agent is busy with another request")]
    AgentBusy,

    /// 调用方已放弃（取消令牌触发），迟到的响应不会落入 Transcript
    #[error("Request cancelled")]
    Cancelled,

    /// 运行期索引写入失败（序列化或落盘）；内存中的索引保持原状
    #[error("Index update failed: {0}")]
    Index(String),

    /// 启动期配置错误（如索引目录无法创建），属于致命错误
    #[error("Config error: {0}")]
    Config(String),
}

impl From<SessionStoreError> for AgentError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound(name) => AgentError::SessionNotFound(name),
            SessionStoreError::Corrupt(msg) => AgentError::SessionCorrupt(msg),
            SessionStoreError::InvalidName(name) => {
                AgentError::InvalidInput(format!("invalid session name: {name}"))
            }
            SessionStoreError::Io(msg) => AgentError::SessionPersist(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_agent_errors() {
        let err: AgentError = SessionStoreError::NotFound("s1".into()).into();
        assert!(matches!(err, AgentError::SessionNotFound(ref n) if n == "s1"));

        let err: AgentError = SessionStoreError::Corrupt("bad json".into()).into();
        assert!(matches!(err, AgentError::SessionCorrupt(_)));

        let err: AgentError = SessionStoreError::Io("disk full".into()).into();
        assert!(matches!(err, AgentError::SessionPersist(_)));

        let err: AgentError = SessionStoreError::InvalidName("../x".into()).into();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[test]
    fn test_model_unavailable_message() {
        let err = AgentError::ModelUnavailable {
            attempts: 3,
            last_error: LlmError::Timeout,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("timed out"));
    }
}
