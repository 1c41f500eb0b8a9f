//! 本地 RAG 索引
//!
//! 文档分块后存入 `{persist_dir}/{collection}.json`；配置了嵌入模型时按余弦相似度打分，
//! 否则（或嵌入失败时）按关键词 Jaccard 相似度打分。实现 RetrievalStore。

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::llm::EmbeddingProvider;
use crate::memory::persistence::write_atomic;
use crate::memory::retrieval::{rank_passages, RetrievalStore, RetrievedPassage};
use crate::memory::tokenizer;

/// 同时进行的嵌入请求数
const EMBED_CONCURRENCY: usize = 4;

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 相邻块重叠（字符数）
    pub chunk_overlap: usize,
    /// 断点分隔符，优先级从高到低
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: ["\n\n", "\n", "。", ". ", "！", "？", "! ", "? ", " "]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 分块器（按字符计数，UTF-8 安全）
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 返回去除首尾空白后的非空块
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let target_end = (start + size).min(total);
            let mut end = target_end;

            if target_end < total {
                let window: String = chars[start..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = window.rfind(sep.as_str()) {
                        let cut = window[..pos].chars().count() + sep.chars().count();
                        if cut > 0 {
                            end = start + cut;
                            break;
                        }
                    }
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            if end >= total {
                break;
            }
            let overlap = self.config.chunk_overlap.min(end - start);
            let next = end - overlap;
            start = if next > start { next } else { end };
        }

        chunks
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    id: String,
    source_id: String,
    text: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(skip)]
    tokens: HashSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexFile {
    /// source_id -> 文档内容指纹
    #[serde(default)]
    sources: BTreeMap<String, u64>,
    #[serde(default)]
    chunks: Vec<IndexedChunk>,
}

/// FNV-1a，跨进程稳定的内容指纹
fn fingerprint(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 持久化的本地检索索引
pub struct LocalIndex {
    dir: PathBuf,
    path: PathBuf,
    chunker: Chunker,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: RwLock<IndexFile>,
}

impl LocalIndex {
    /// 打开（必要时创建）索引目录；目录无法创建属于启动期致命错误
    pub fn open(
        dir: impl AsRef<Path>,
        collection: &str,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self, AgentError> {
        let valid_name = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            return Err(AgentError::Config(format!(
                "invalid collection name '{collection}'"
            )));
        }

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AgentError::Config(format!("cannot create index dir {}: {e}", dir.display()))
        })?;
        let path = dir.join(format!("{collection}.json"));

        let mut index = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<IndexFile>(&s).map_err(|e| e.to_string()))
            {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "index unreadable, starting empty");
                    IndexFile::default()
                }
            }
        } else {
            IndexFile::default()
        };
        for chunk in &mut index.chunks {
            chunk.tokens = tokenizer::tokenize_to_set(&chunk.text);
        }
        tracing::info!(collection, chunks = index.chunks.len(), "retrieval index opened");

        Ok(Self {
            dir,
            path,
            chunker: Chunker::default(),
            embedder,
            index: RwLock::new(index),
        })
    }

    pub fn with_chunking_config(mut self, config: ChunkingConfig) -> Self {
        self.chunker = Chunker::new(config);
        self
    }

    /// 索引一篇文档；内容未变时跳过并返回 0，内容变化时替换旧块。返回新增块数
    pub async fn index_document(&self, source_id: &str, text: &str) -> Result<usize, AgentError> {
        let print = fingerprint(text);
        if self.index.read().await.sources.get(source_id) == Some(&print) {
            tracing::info!(source = %source_id, "document already indexed, skipping");
            return Ok(0);
        }

        let pieces = self.chunker.chunk(text);
        let embeddings: Vec<Option<Vec<f32>>> = match &self.embedder {
            Some(embedder) => {
                stream::iter(pieces.iter().cloned())
                    .map(|piece| {
                        let embedder = Arc::clone(embedder);
                        async move {
                            match embedder.embed(&piece).await {
                                Ok(v) if !v.is_empty() => Some(v),
                                Ok(_) => None,
                                Err(e) => {
                                    tracing::warn!(error = %e, "chunk embedding failed, keyword scoring only");
                                    None
                                }
                            }
                        }
                    })
                    .buffered(EMBED_CONCURRENCY)
                    .collect()
                    .await
            }
            None => vec![None; pieces.len()],
        };

        let added = pieces.len();
        // 写锁一直持有到落盘完成，磁盘上的文件与内存顺序一致；落盘失败时内存不变
        let mut index = self.index.write().await;
        let mut next = index.clone();
        next.chunks.retain(|c| c.source_id != source_id);
        for (i, (piece, embedding)) in pieces.into_iter().zip(embeddings).enumerate() {
            next.chunks.push(IndexedChunk {
                id: format!("{source_id}_{i}"),
                source_id: source_id.to_string(),
                tokens: tokenizer::tokenize_to_set(&piece),
                text: piece,
                embedding,
            });
        }
        next.sources.insert(source_id.to_string(), print);
        let bytes = serde_json::to_vec(&next)
            .map_err(|e| AgentError::Index(format!("index serialize failed: {e}")))?;

        let dir = self.dir.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
            .await
            .map_err(|e| AgentError::Index(e.to_string()))?
            .map_err(|e| AgentError::Index(format!("index write failed: {e}")))?;
        *index = next;
        drop(index);

        tracing::info!(source = %source_id, chunks = added, "document indexed");
        Ok(added)
    }

    /// (块数, 文档数)
    pub async fn stats(&self) -> (usize, usize) {
        let index = self.index.read().await;
        (index.chunks.len(), index.sources.len())
    }
}

#[async_trait]
impl RetrievalStore for LocalIndex {
    async fn query(&self, text: &str, k: usize) -> Vec<RetrievedPassage> {
        if k == 0 || text.trim().is_empty() {
            return Vec::new();
        }

        // 先算查询向量，避免持锁等待网络
        let query_vec = match &self.embedder {
            Some(embedder) => match embedder.embed(text).await {
                Ok(v) if !v.is_empty() => Some(v),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, falling back to keywords");
                    None
                }
            },
            None => None,
        };
        let query_tokens = tokenizer::tokenize_to_set(text);

        let index = self.index.read().await;
        let mut passages: Vec<RetrievedPassage> = index
            .chunks
            .iter()
            .map(|chunk| {
                let score = match (&query_vec, &chunk.embedding) {
                    (Some(q), Some(e)) => cosine_similarity(q, e),
                    _ => tokenizer::jaccard_similarity(&query_tokens, &chunk.tokens),
                };
                (score, chunk)
            })
            .filter(|(score, _)| *score > 0.0)
            .map(|(score, chunk)| RetrievedPassage::new(&chunk.text, &chunk.source_id, score))
            .collect();

        rank_passages(&mut passages);
        passages.truncate(k);
        tracing::debug!(query = %text, hits = passages.len(), "local index query");
        passages
    }
}
