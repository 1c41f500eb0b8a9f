//! 同步调度适配器
//!
//! 包装任意 LlmClient，内部持有单线程 tokio runtime，对同步调用方提供阻塞式 complete。
//! 输入、输出与错误契约与异步 LlmClient 完全一致。不能在 async 上下文中调用。

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

pub struct BlockingLlmClient {
    inner: Arc<dyn LlmClient>,
    runtime: tokio::runtime::Runtime,
    timeout: Duration,
}

impl BlockingLlmClient {
    /// timeout 为请求未指定 timeout_seconds 时的上限
    pub fn new(inner: Arc<dyn LlmClient>, timeout: Duration) -> Result<Self, LlmError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            inner,
            runtime,
            timeout,
        })
    }

    /// 阻塞直到得到响应或超时
    pub fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let timeout = request
            .options
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        self.runtime.block_on(async {
            tokio::time::timeout(timeout, self.inner.complete(request))
                .await
                .map_err(|_| LlmError::Timeout)?
        })
    }

    pub fn backend_id(&self) -> String {
        self.inner.backend_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionOptions, MockLlmClient, Prompt};

    fn request() -> CompletionRequest {
        CompletionRequest::new(Prompt::single("hello"), CompletionOptions::default())
    }

    #[test]
    fn test_blocking_complete_returns_reply() {
        let mock = Arc::new(MockLlmClient::new().with_reply("hi there"));
        let client = BlockingLlmClient::new(mock.clone(), Duration::from_secs(5)).unwrap();
        assert_eq!(client.complete(&request()).unwrap(), "hi there");
        assert_eq!(client.backend_id(), "mock");
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_blocking_complete_propagates_errors() {
        let mock = Arc::new(MockLlmClient::new().with_error(LlmError::Transport("refused".into())));
        let client = BlockingLlmClient::new(mock, Duration::from_secs(5)).unwrap();
        assert!(matches!(client.complete(&request()), Err(LlmError::Transport(_))));
    }

    #[test]
    fn test_blocking_complete_times_out() {
        let mock = Arc::new(
            MockLlmClient::new().with_delayed_reply(Duration::from_secs(30), "too late"),
        );
        let client = BlockingLlmClient::new(mock, Duration::from_millis(50)).unwrap();
        assert_eq!(client.complete(&request()), Err(LlmError::Timeout));
    }
}
