//! 命令工具：由 config/tools/*.toml 清单声明，运行「程序 + 参数模板」实现扩展
//!
//! 参数模板中的 {{key}} 从调用方传入的 args 取值；执行时无 shell，直接 exec program + 替换后的参数，带超时。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

/// 清单中的 [tool] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 缺省时接受任意 JSON 对象
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// 从清单构建的命令工具
pub struct CommandTool {
    manifest: ToolManifest,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(manifest: ToolManifest, timeout: Duration) -> Self {
        Self { manifest, timeout }
    }

    /// 单遍替换模板中的 {{key}}，替换进来的值不再展开；args 为 JSON 对象。
    /// 值落在参数开头且以 '-' 开头时拒绝，避免被程序当成选项
    fn substitute(&self, args: &Value) -> Result<Vec<String>, String> {
        let empty = serde_json::Map::new();
        let obj = args.as_object().unwrap_or(&empty);
        self.manifest
            .args
            .iter()
            .map(|tpl| expand_template(tpl, obj))
            .collect()
    }
}

fn expand_template(tpl: &str, obj: &serde_json::Map<String, Value>) -> Result<String, String> {
    let mut out = String::with_capacity(tpl.len());
    let mut rest = tpl;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let key = &after[..close];
        match obj.get(key) {
            Some(v) => {
                let val = match v {
                    Value::String(x) => x.clone(),
                    _ => v.to_string(),
                };
                if out.is_empty() && val.starts_with('-') {
                    return Err(format!("argument '{key}' must not start with '-'"));
                }
                out.push_str(&val);
            }
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn input_schema(&self) -> Value {
        self.manifest
            .input_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "type": "object" }))
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args_vec = self.substitute(&args)?;
        tracing::info!(tool = %self.manifest.name, program = %self.manifest.program, "command tool invoke");
        let child = Command::new(&self.manifest.program)
            .args(&args_vec)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn failed: {}", e))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("command timeout after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("command wait failed: {}", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(stdout.trim().to_string())
    }
}
