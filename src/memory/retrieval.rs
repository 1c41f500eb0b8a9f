//! 检索接口
//!
//! query 永远不报错：索引为空或不可达时返回空列表，对话降级为无上下文补全。

use std::cmp::Ordering;

use async_trait::async_trait;

/// 单次检索命中的片段，只在当轮提示词组装中使用，不持久化
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub source_id: String,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            score,
        }
    }
}

/// 文档 / 向量库适配层：返回至多 k 条，按分数降序
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Vec<RetrievedPassage>;
}

/// 分数降序，同分按 source_id 升序；NaN 视为最低分
pub fn rank_passages(passages: &mut [RetrievedPassage]) {
    passages.sort_by(|a, b| {
        let sa = if a.score.is_nan() { f32::NEG_INFINITY } else { a.score };
        let sb = if b.score.is_nan() { f32::NEG_INFINITY } else { b.score };
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
}

/// 不检索：始终返回空列表
#[derive(Debug, Default, Clone)]
pub struct NoopStore;

#[async_trait]
impl RetrievalStore for NoopStore {
    async fn query(&self, _text: &str, _k: usize) -> Vec<RetrievedPassage> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_by_score_then_source() {
        let mut passages = vec![
            RetrievedPassage::new("b", "doc-b", 0.5),
            RetrievedPassage::new("c", "doc-c", 0.9),
            RetrievedPassage::new("a", "doc-a", 0.5),
            RetrievedPassage::new("n", "doc-n", f32::NAN),
        ];
        rank_passages(&mut passages);
        let order: Vec<&str> = passages.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(order, vec!["doc-c", "doc-a", "doc-b", "doc-n"]);
    }

    #[tokio::test]
    async fn test_noop_store_is_empty() {
        assert!(NoopStore.query("anything", 4).await.is_empty());
    }
}
