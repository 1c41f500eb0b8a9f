//! 记忆层：对话记录（Transcript）、检索（RetrievalStore / 本地索引）、会话持久化

pub mod persistence;
pub mod rag;
pub mod retrieval;
pub mod tokenizer;
pub mod transcript;

pub use persistence::{
    FileSessionStore, InMemorySessionStore, SessionRecord, SessionStore, SessionStoreError,
};
pub use rag::{Chunker, ChunkingConfig, LocalIndex};
pub use retrieval::{NoopStore, RetrievalStore, RetrievedPassage};
pub use transcript::{Role, Transcript, Turn};
