//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设结果（可带延迟）；脚本用完后回显最后一条 user 消息。
//! 记录每次收到的请求，便于断言提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

#[derive(Debug, Clone)]
struct MockStep {
    delay: Duration,
    outcome: Result<String, LlmError>,
}

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockStep>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Duration::ZERO, Ok(text.into()))
    }

    pub fn with_error(self, err: LlmError) -> Self {
        self.push(Duration::ZERO, Err(err))
    }

    /// 延迟后返回；配合较短的请求超时可模拟挂起的后端
    pub fn with_delayed_reply(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(delay, Ok(text.into()))
    }

    fn push(self, delay: Duration, outcome: Result<String, LlmError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(MockStep { delay, outcome });
        self
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match step {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                step.outcome
            }
            None => Ok(format!(
                "Echo from Mock: {}",
                request.prompt.last_user().unwrap_or("(no input)")
            )),
        }
    }

    fn backend_id(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionOptions, Prompt};

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::new()
            .with_reply("first")
            .with_error(LlmError::Timeout);
        let req = CompletionRequest::new(Prompt::single("ping"), CompletionOptions::default());

        assert_eq!(mock.complete(&req).await.unwrap(), "first");
        assert_eq!(mock.complete(&req).await.unwrap_err(), LlmError::Timeout);
        assert_eq!(mock.complete(&req).await.unwrap(), "Echo from Mock: ping");
        assert_eq!(mock.calls(), 3);
    }
}
