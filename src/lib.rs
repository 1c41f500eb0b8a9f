//! Ragent - 检索增强的对话 Agent 编排核心
//!
//! 模块划分：
//! - **agent**: Agent 编排（handle_message / analyze_code / run_tool / 会话保存与加载）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、重试策略、提示词组装、会话监管
//! - **llm**: LLM 客户端抽象与实现（Ollama / OpenAI 兼容 / Mock）、同步适配器、嵌入
//! - **memory**: Transcript、检索（本地索引）、会话持久化
//! - **tools**: 工具注册表、执行器、内置工具与清单发现
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use agent::{Agent, AgentBuilder, AgentSettings};
pub use core::AgentError;
