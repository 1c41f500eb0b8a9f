//! 工具清单加载器
//!
//! 扫描目录下的 *.toml（每个文件一个 [tool] 段），合法清单构建为 CommandTool。
//! 解析失败或缺少 name / program 的清单跳过并记录 warn，不影响启动。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::tools::plugin::{CommandTool, ToolManifest};
use crate::tools::Tool;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    tool: ToolManifest,
}

/// 读取 dir 下的工具清单；目录不存在时返回空
pub fn discover_tools(dir: impl AsRef<Path>, timeout: Duration) -> Vec<Arc<dyn Tool>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "tool manifest dir not found, no command tools");
        return vec![];
    }

    let pattern = dir.join("*.toml");
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<_> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "invalid tool manifest pattern");
            return vec![];
        }
    };
    paths.sort();

    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for path in paths {
        match load_manifest(&path) {
            Ok(manifest) => {
                tracing::info!(tool = %manifest.name, path = %path.display(), "tool manifest loaded");
                tools.push(Arc::new(CommandTool::new(manifest, timeout)));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid tool manifest");
            }
        }
    }
    tools
}

fn load_manifest(path: &Path) -> Result<ToolManifest, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let file: ManifestFile = toml::from_str(&content).map_err(|e| e.to_string())?;
    let manifest = file.tool;
    if manifest.name.trim().is_empty() {
        return Err("tool.name is empty".to_string());
    }
    if manifest.program.trim().is_empty() {
        return Err("tool.program is empty".to_string());
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_skips_invalid_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greet.toml"),
            r#"
[tool]
name = "greet"
description = "Say hello"
program = "echo"
args = ["hello", "{{name}}"]

[tool.input_schema]
type = "object"
required = ["name"]

[tool.input_schema.properties.name]
type = "string"
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "[tool\nname = ").unwrap();
        std::fs::write(dir.path().join("noprog.toml"), "[tool]\nname = \"x\"\nprogram = \"\"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tools = discover_tools(dir.path(), Duration::from_secs(1));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "greet");
        assert_eq!(tools[0].input_schema()["required"][0], "name");
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_tools(dir.path().join("nope"), Duration::from_secs(1)).is_empty());
    }
}
