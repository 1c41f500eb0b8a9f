//! 核心编排层：错误、重试策略、提示词组装、会话监管

pub mod error;
pub mod prompt;
pub mod retry;
pub mod session_supervisor;

pub use error::AgentError;
pub use prompt::{analysis_prompt, PromptBuilder, DEFAULT_SYSTEM_PREAMBLE};
pub use retry::RetryPolicy;
pub use session_supervisor::{BusyGuard, SessionSupervisor};
