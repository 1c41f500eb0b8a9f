//! 嵌入 API：供本地检索索引使用，调用 OpenAI 兼容的 /embeddings 端点

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::openai::single_attempt;

/// 嵌入提供方：文本 -> 向量；失败时返回错误字符串，由调用方降级为关键词打分
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config).with_backoff(single_attempt()),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .unwrap_or_default())
    }
}

/// 配置了嵌入模型且有 OPENAI_API_KEY 时创建嵌入提供方，否则返回 None（仅关键词检索）
pub fn create_embedder_from_config(
    base_url: Option<&str>,
    model: Option<&str>,
) -> Option<Arc<dyn EmbeddingProvider>> {
    let model = model.filter(|m| !m.trim().is_empty())?;
    let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
    match key {
        Some(key) => Some(Arc::new(OpenAiEmbedder::new(base_url, model, &key))),
        None => {
            tracing::warn!(model, "embedding model configured but OPENAI_API_KEY unset, keyword retrieval only");
            None
        }
    }
}
