//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / input_schema / execute）。
//! 启动时由 ToolRegistryBuilder 逐个注册并编译输入 schema，build 之后注册表只读。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;

/// 工具 trait：名称、描述、输入 JSON Schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表内唯一）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 输入 JSON Schema，调用前用于校验 args
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// 执行工具；Err 为失败原因
    async fn execute(&self, args: Value) -> Result<String, String>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// 构建器：名称为空、重名或 schema 无法编译的工具会被跳过并记录日志
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            tracing::warn!("skipping tool with empty name");
            return self;
        }
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "skipping duplicate tool name");
            return self;
        }
        let schema = tool.input_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                tracing::debug!(tool = %name, "tool registered");
                self.tools.insert(name, RegisteredTool { tool, validator });
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "skipping tool with invalid input schema");
            }
        }
        self
    }

    pub fn register_all(self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        tools.into_iter().fold(self, |b, t| b.register(t))
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}

/// 只读注册表：按名称查找，可在多个 Agent 间共享
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    /// 已注册工具名（排序）
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按工具声明的 schema 校验 args
    pub fn validate(&self, name: &str, args: &Value) -> Result<(), AgentError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        let errors: Vec<String> = entry
            .validator
            .iter_errors(args)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::InvalidToolArgs {
                tool: name.to_string(),
                reason: errors.join("; "),
            })
        }
    }

    /// 返回 (name, description) 列表，按名称排序
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .tools
            .iter()
            .map(|(name, r)| (name.clone(), r.tool.description().to_string()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        schema: Value,
    }

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "fixed"
        }

        fn input_schema(&self) -> Value {
            self.schema.clone()
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok("done".into())
        }
    }

    fn tool(name: &'static str, schema: Value) -> Arc<dyn Tool> {
        Arc::new(Fixed { name, schema })
    }

    #[test]
    fn test_invalid_tools_are_skipped() {
        let registry = ToolRegistry::builder()
            .register(tool("a", json!({"type": "object"})))
            .register(tool("", json!({"type": "object"})))
            .register(tool("a", json!({"type": "string"})))
            .register(tool("bad", json!({"type": 42})))
            .register(tool("b", json!({"type": "object"})))
            .build();

        assert_eq!(registry.list(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        });
        let registry = ToolRegistry::builder().register(tool("t", schema)).build();

        assert!(registry.validate("t", &json!({"text": "hi"})).is_ok());
        assert!(matches!(
            registry.validate("t", &json!({"text": 1})),
            Err(AgentError::InvalidToolArgs { ref tool, .. }) if tool == "t"
        ));
        assert!(matches!(
            registry.validate("t", &json!({})),
            Err(AgentError::InvalidToolArgs { .. })
        ));
        assert!(matches!(
            registry.validate("missing", &json!({})),
            Err(AgentError::ToolNotFound(_))
        ));
    }
}
