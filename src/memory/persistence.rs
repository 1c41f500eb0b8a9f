//! 会话持久化
//!
//! SessionRecord 以 JSON 写入 `{dir}/{name}.json`。写入走「同目录临时文件 + fsync + rename」，
//! 读者永远看不到写了一半的文件。读取兼容旧版 `conversation_history` 格式，未知字段忽略。

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::memory::{Transcript, Turn};

/// 会话存储错误
#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("{0}")]
    Corrupt(String),
    #[error("invalid session name '{0}'")]
    InvalidName(String),
    #[error("{0}")]
    Io(String),
}

/// 磁盘上的会话记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default = "Uuid::new_v4")]
    pub session_id: Uuid,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub model_backend_id: String,
}

impl SessionRecord {
    pub fn new(transcript: &Transcript, model_backend_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            turns: transcript.turns().to_vec(),
            created_at: Utc::now(),
            updated_at: None,
            model_backend_id: model_backend_id.into(),
        }
    }

    pub fn into_transcript(self) -> Transcript {
        Transcript::from_turns(self.turns)
    }
}

#[derive(Deserialize)]
struct LegacyExchange {
    query: String,
    answer: String,
}

#[derive(Deserialize)]
struct LegacyRecord {
    conversation_history: Vec<LegacyExchange>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Current(SessionRecord),
    Legacy(LegacyRecord),
}

/// 解析并校验记录内容；旧格式的每组问答转换为 user + agent 两条
pub fn parse_record(data: &str) -> Result<SessionRecord, SessionStoreError> {
    let on_disk: OnDisk = serde_json::from_str(data)
        .map_err(|e| SessionStoreError::Corrupt(format!("schema validation failed: {e}")))?;
    Ok(match on_disk {
        OnDisk::Current(record) => record,
        OnDisk::Legacy(legacy) => {
            let now = Utc::now();
            let turns = legacy
                .conversation_history
                .into_iter()
                .flat_map(|ex| {
                    [
                        Turn { role: crate::memory::Role::User, content: ex.query, timestamp: now },
                        Turn { role: crate::memory::Role::Agent, content: ex.answer, timestamp: now },
                    ]
                })
                .collect();
            SessionRecord {
                session_id: Uuid::new_v4(),
                turns,
                created_at: now,
                updated_at: None,
                model_backend_id: "unknown".to_string(),
            }
        }
    })
}

/// 会话名只允许 `[A-Za-z0-9_-]`，避免路径逃逸
pub fn validate_session_name(name: &str) -> Result<(), SessionStoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidName(name.to_string()))
    }
}

/// 会话存储接口：save 原子可见；load(None) 读取最近一次保存的记录
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, name: &str, record: &SessionRecord) -> Result<(), SessionStoreError>;

    async fn load(&self, name: Option<&str>) -> Result<SessionRecord, SessionStoreError>;

    /// 已保存的会话名，最近的在前
    async fn list(&self) -> Result<Vec<String>, SessionStoreError>;
}

/// 目录下每个会话一个 JSON 文件
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// (name, mtime) 列表，按修改时间倒序
    fn entries(dir: &Path) -> Result<Vec<(String, SystemTime)>, SessionStoreError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let read = std::fs::read_dir(dir).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        let mut entries: Vec<(String, SystemTime)> = read
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                let name = path.file_stem()?.to_str()?.to_string();
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((name, modified))
            })
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(entries)
    }
}

/// 同目录临时文件写入 + fsync + rename
pub(crate) fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, name: &str, record: &SessionRecord) -> Result<(), SessionStoreError> {
        validate_session_name(name)?;
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| SessionStoreError::Io(format!("serialize failed: {e}")))?;
        let dir = self.dir.clone();
        let target = self.path_for(name);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))?
            .map_err(|e| SessionStoreError::Io(e.to_string()))?;
        tracing::debug!(session = %name, "session file written");
        Ok(())
    }

    async fn load(&self, name: Option<&str>) -> Result<SessionRecord, SessionStoreError> {
        let name = match name {
            Some(n) => {
                validate_session_name(n)?;
                n.to_string()
            }
            None => {
                let dir = self.dir.clone();
                let entries = tokio::task::spawn_blocking(move || Self::entries(&dir))
                    .await
                    .map_err(|e| SessionStoreError::Io(e.to_string()))??;
                entries
                    .into_iter()
                    .next()
                    .map(|(n, _)| n)
                    .ok_or_else(|| SessionStoreError::NotFound("<latest>".to_string()))?
            }
        };
        let path = self.path_for(&name);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionStoreError::NotFound(name));
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(SessionStoreError::Corrupt(format!("{name}: {e}")));
            }
            Err(e) => return Err(SessionStoreError::Io(e.to_string())),
        };
        let record = parse_record(&data)
            .map_err(|e| SessionStoreError::Corrupt(format!("{name}: {e}")))?;
        tracing::debug!(session = %name, turns = record.turns.len(), "session file read");
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<String>, SessionStoreError> {
        let dir = self.dir.clone();
        let entries = tokio::task::spawn_blocking(move || Self::entries(&dir))
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))??;
        Ok(entries.into_iter().map(|(n, _)| n).collect())
    }
}

/// 内存会话存储（测试与无盘场景）
#[derive(Debug, Default, Clone)]
pub struct InMemorySessionStore {
    /// name -> (保存序号, 序列化后的 JSON)
    records: Arc<RwLock<HashMap<String, (u64, String)>>>,
    seq: Arc<std::sync::atomic::AtomicU64>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入原始内容（用于模拟损坏的记录）
    pub async fn insert_raw(&self, name: &str, data: impl Into<String>) {
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.records
            .write()
            .await
            .insert(name.to_string(), (seq, data.into()));
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, name: &str, record: &SessionRecord) -> Result<(), SessionStoreError> {
        validate_session_name(name)?;
        let data = serde_json::to_string(record)
            .map_err(|e| SessionStoreError::Io(format!("serialize failed: {e}")))?;
        self.insert_raw(name, data).await;
        Ok(())
    }

    async fn load(&self, name: Option<&str>) -> Result<SessionRecord, SessionStoreError> {
        let records = self.records.read().await;
        let (name, data) = match name {
            Some(n) => {
                validate_session_name(n)?;
                let (_, data) = records
                    .get(n)
                    .ok_or_else(|| SessionStoreError::NotFound(n.to_string()))?;
                (n.to_string(), data.clone())
            }
            None => records
                .iter()
                .max_by_key(|(_, (seq, _))| *seq)
                .map(|(n, (_, data))| (n.clone(), data.clone()))
                .ok_or_else(|| SessionStoreError::NotFound("<latest>".to_string()))?,
        };
        parse_record(&data).map_err(|e| SessionStoreError::Corrupt(format!("{name}: {e}")))
    }

    async fn list(&self) -> Result<Vec<String>, SessionStoreError> {
        let records = self.records.read().await;
        let mut names: Vec<(u64, String)> = records
            .iter()
            .map(|(n, (seq, _))| (*seq, n.clone()))
            .collect();
        names.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(names.into_iter().map(|(_, n)| n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use tempfile::TempDir;

    fn sample_transcript(n: usize) -> Transcript {
        let mut t = Transcript::new();
        for i in 0..n {
            if i % 2 == 0 {
                t.push(Turn::user(format!("question {i}")));
            } else {
                t.push(Turn::agent(format!("answer {i}")));
            }
        }
        t
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));
        let transcript = sample_transcript(5);
        let record = SessionRecord::new(&transcript, "ollama:llama3.2");

        store.save("agent_session", &record).await.unwrap();
        let loaded = store.load(Some("agent_session")).await.unwrap();

        assert_eq!(loaded.model_backend_id, "ollama:llama3.2");
        assert_eq!(loaded.session_id, record.session_id);
        assert_eq!(loaded.into_transcript(), transcript);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let record = SessionRecord::new(&sample_transcript(2), "mock");
        store.save("a", &record).await.unwrap();
        store.save("a", &record).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name(), "a.json");
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        assert!(matches!(
            store.load(None).await,
            Err(SessionStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.load(Some("nope")).await,
            Err(SessionStoreError::NotFound(_))
        ));

        std::fs::write(dir.path().join("broken.json"), "{\"turns\": [").unwrap();
        assert!(matches!(
            store.load(Some("broken")).await,
            Err(SessionStoreError::Corrupt(_))
        ));

        std::fs::write(
            dir.path().join("badrole.json"),
            r#"{"turns":[{"role":"wizard","content":"x","timestamp":"2024-01-01T00:00:00Z"}],
               "created_at":"2024-01-01T00:00:00Z","model_backend_id":"m"}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load(Some("badrole")).await,
            Err(SessionStoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_load_latest_picks_most_recent() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        store
            .save("older", &SessionRecord::new(&sample_transcript(1), "m"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        store
            .save("newer", &SessionRecord::new(&sample_transcript(3), "m"))
            .await
            .unwrap();

        let latest = store.load(None).await.unwrap();
        assert_eq!(latest.turns.len(), 3);
        assert_eq!(store.list().await.unwrap(), vec!["newer", "older"]);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let data = r#"{
            "turns": [{"role":"user","content":"hi","timestamp":"2024-01-01T00:00:00Z","mood":"happy"}],
            "created_at": "2024-01-01T00:00:00Z",
            "model_backend_id": "ollama:llama3.2",
            "future_field": {"nested": true}
        }"#;
        let record = parse_record(data).unwrap();
        assert_eq!(record.turns.len(), 1);
        assert_eq!(record.turns[0].role, Role::User);
    }

    #[test]
    fn test_legacy_history_is_converted() {
        let data = r#"{"conversation_history":[{"query":"hello","answer":"hi there"}]}"#;
        let record = parse_record(data).unwrap();
        let roles: Vec<Role> = record.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Agent]);
        assert_eq!(record.turns[1].content, "hi there");
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected() {
        let store = FileSessionStore::new("unused");
        let record = SessionRecord::new(&Transcript::new(), "m");
        for bad in ["", "../etc", "a/b", "a.json"] {
            assert!(matches!(
                store.save(bad, &record).await,
                Err(SessionStoreError::InvalidName(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_latest() {
        let store = InMemorySessionStore::new();
        store
            .save("one", &SessionRecord::new(&sample_transcript(1), "m"))
            .await
            .unwrap();
        store
            .save("two", &SessionRecord::new(&sample_transcript(2), "m"))
            .await
            .unwrap();
        assert_eq!(store.load(None).await.unwrap().turns.len(), 2);
        assert_eq!(store.list().await.unwrap(), vec!["two", "one"]);
    }
}
