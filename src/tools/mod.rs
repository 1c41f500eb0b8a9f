//! 工具层：Tool trait、只读注册表、执行器、内置工具与清单发现

pub mod calculator;
pub mod echo;
pub mod executor;
pub mod loader;
pub mod plugin;
pub mod registry;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use loader::discover_tools;
pub use plugin::{CommandTool, ToolManifest};
pub use registry::{Tool, ToolRegistry, ToolRegistryBuilder};

/// 内置工具 + dir 下发现的命令工具；与内置工具重名的清单会被跳过
pub fn default_registry(dir: impl AsRef<Path>, timeout: Duration) -> ToolRegistry {
    let registry = ToolRegistry::builder()
        .register(Arc::new(CalculatorTool))
        .register(Arc::new(EchoTool))
        .register_all(discover_tools(dir, timeout))
        .build();
    tracing::info!(tools = ?registry.list(), "tool registry ready");
    registry
}
