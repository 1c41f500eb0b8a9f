//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RAGENT__*` 覆盖（双下划线表示嵌套，如 `RAGENT__LLM__BACKEND=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retrieval: RetrievalSection,
    pub session: SessionSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、历史窗口、系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 组装提示词时带上的最近轮数（不含本轮 user 消息）
    pub history_window: usize,
    /// run_tool 成功后是否记录 tool 轮
    pub record_tool_turns: bool,
    /// 覆盖内置的系统提示词
    pub system_preamble: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            history_window: 10,
            record_tool_turns: true,
            system_preamble: None,
        }
    }
}

/// [llm] 段：后端选择、生成参数、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// ollama / openai / mock
    pub backend: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeouts: LlmTimeoutsSection,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "llama3.2".to_string(),
            base_url: None,
            max_tokens: None,
            temperature: None,
            timeouts: LlmTimeoutsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [llm.retry] 段：max_attempts 为总尝试次数（含首次）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            multiplier: 2.0,
        }
    }
}

/// [retrieval] 段：本地索引位置、top-k、可选嵌入模型与分块参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// 设为 false 时不检索（NoopStore）
    pub enabled: bool,
    pub persist_dir: PathBuf,
    pub collection: String,
    pub top_k: usize,
    pub embedding_model: Option<String>,
    pub embedding_base_url: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// 单次检索的时间上限（毫秒）；超时按空上下文处理
    pub timeout_ms: u64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            persist_dir: PathBuf::from("chroma_db"),
            collection: "my_collection".to_string(),
            top_k: 4,
            embedding_model: None,
            embedding_base_url: None,
            chunk_size: 500,
            chunk_overlap: 50,
            timeout_ms: 10_000,
        }
    }
}

/// [session] 段：会话目录与默认会话名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub dir: PathBuf,
    pub name: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sessions"),
            name: "agent_session".to_string(),
        }
    }
}

/// [tools] 段：工具清单目录与单次调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("config/tools"),
            timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 RAGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RAGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RAGENT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.history_window, 10);
        assert_eq!(cfg.llm.backend, "ollama");
        assert_eq!(cfg.llm.model, "llama3.2");
        assert_eq!(cfg.llm.timeouts.request, 120);
        assert_eq!(cfg.llm.retry.max_attempts, 3);
        assert_eq!(cfg.retrieval.collection, "my_collection");
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.retrieval.timeout_ms, 10_000);
        assert_eq!(cfg.session.name, "agent_session");
    }

    #[test]
    fn test_explicit_file_overrides_and_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nbackend = \"mock\"\n\n[llm.retry]\nmax_attempts = 5\n\n[retrieval]\ntimeout_ms = 250\n\n[session]\nname = \"demo\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.backend, "mock");
        assert_eq!(cfg.llm.retry.max_attempts, 5);
        assert_eq!(cfg.llm.retry.initial_backoff_ms, 500);
        assert_eq!(cfg.retrieval.timeout_ms, 250);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.session.name, "demo");
        assert_eq!(cfg.session.dir, PathBuf::from("sessions"));
    }
}
