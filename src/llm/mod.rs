//! LLM 层：客户端抽象与实现（Ollama / OpenAI 兼容 / Mock）+ 同步适配器 + 嵌入

pub mod blocking;
pub mod embedding;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use blocking::BlockingLlmClient;
pub use embedding::{create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use ollama::{OllamaClient, OLLAMA_DEFAULT_URL};
pub use openai::OpenAiClient;
pub use traits::{
    CompletionOptions, CompletionRequest, LlmClient, LlmError, Prompt, PromptMessage, PromptRole,
};

use crate::config::AppConfig;
use crate::core::AgentError;

/// 按 [llm].backend 创建客户端；未知后端为启动期配置错误
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let llm = &cfg.llm;
    let base_url = llm.base_url.as_deref().filter(|u| !u.trim().is_empty());
    let client: Arc<dyn LlmClient> = match llm.backend.trim().to_ascii_lowercase().as_str() {
        "ollama" => Arc::new(OllamaClient::new(
            base_url,
            &llm.model,
            Duration::from_secs(llm.timeouts.request),
        )),
        "openai" => {
            if std::env::var("OPENAI_API_KEY").map(|k| k.is_empty()).unwrap_or(true) {
                tracing::warn!("OPENAI_API_KEY not set, requests will likely be rejected");
            }
            Arc::new(OpenAiClient::new(base_url, &llm.model, None))
        }
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            return Err(AgentError::Config(format!(
                "unknown llm backend '{other}' (expected ollama, openai or mock)"
            )))
        }
    };
    tracing::info!(backend = %client.backend_id(), "llm client ready");
    Ok(client)
}
