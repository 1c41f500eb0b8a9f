//! 工具执行器
//!
//! 持有只读 ToolRegistry 与统一超时。execute 依次：查找 → schema 校验 → 在独立任务中执行。
//! 工具返回 Err、超时或 panic 都转为 ToolExecution，不会影响调用方；每次执行输出一条 JSON 审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_name.to_string()))?;
        self.registry.validate(tool_name, &args)?;

        let start = Instant::now();
        let preview = args_preview(&args);
        let mut handle = tokio::spawn(async move { tool.execute(args).await });

        let result: Result<String, String> = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(format!("tool panicked: {}", panic_message(join_err.into_panic())))
            }
            Ok(Err(join_err)) => Err(format!("tool task aborted: {join_err}")),
            Err(_) => {
                handle.abort();
                Err(format!("timed out after {}s", self.timeout.as_secs_f64()))
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.starts_with("timed out") => "timeout",
            Err(e) if e.starts_with("tool panicked") => "panic",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        result.map_err(|cause| AgentError::ToolExecution {
            tool: tool_name.to_string(),
            cause,
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::json;

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            panic!("boom");
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "sleeps forever"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("woke".into())
        }
    }

    fn executor() -> ToolExecutor {
        let registry = ToolRegistry::builder()
            .register(Arc::new(EchoTool))
            .register(Arc::new(Panicky))
            .register(Arc::new(Sleepy))
            .build();
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let out = executor().execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_panic_becomes_tool_execution_error() {
        let exec = executor();
        let err = exec.execute("panicky", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { ref cause, .. } if cause.contains("boom")));
        assert!(exec.execute("echo", json!({"text": "still alive"})).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_becomes_tool_execution_error() {
        let err = executor().execute("sleepy", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { ref cause, .. } if cause.starts_with("timed out")));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_args() {
        let exec = executor();
        assert!(matches!(
            exec.execute("nonexistent", json!({})).await,
            Err(AgentError::ToolNotFound(_))
        ));
        assert!(matches!(
            exec.execute("echo", json!({"text": 5})).await,
            Err(AgentError::InvalidToolArgs { .. })
        ));
    }
}
