//! Agent 编排核心
//!
//! Agent 独占当前 Transcript，串起 检索 → 提示词组装 → 模型调用 → 回复，
//! 并提供工具调用与会话保存/加载两条旁路入口。
//!
//! 并发约定：所有变更 Transcript 的调用（handle_message / run_tool / save / load / clear）同一时刻只允许一个，
//! 其余直接返回 AgentBusy；analyze_code 不读写 Transcript，不占用。Transcript 锁从不跨 await 持有。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::{
    analysis_prompt, AgentError, PromptBuilder, RetryPolicy, SessionSupervisor,
    DEFAULT_SYSTEM_PREAMBLE,
};
use crate::llm::{
    create_embedder_from_config, create_llm_from_config, CompletionOptions, CompletionRequest,
    LlmClient, LlmError,
};
use crate::memory::{
    FileSessionStore, InMemorySessionStore, LocalIndex, NoopStore, RetrievalStore, SessionRecord,
    SessionStore, Transcript, Turn,
};
use crate::memory::rag::ChunkingConfig;
use crate::tools::{default_registry, CalculatorTool, EchoTool, ToolExecutor, ToolRegistry};

/// 运行参数（来自配置的 [app] / [llm] / [retrieval] / [session] / [tools]）
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub system_preamble: String,
    pub history_window: usize,
    pub top_k: usize,
    /// 单次检索超时；超时视为无上下文
    pub retrieval_timeout: Duration,
    pub record_tool_turns: bool,
    /// 单次模型请求超时
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tool_timeout: Duration,
    /// save_session / 启动时加载使用的会话名
    pub session_name: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_preamble: DEFAULT_SYSTEM_PREAMBLE.to_string(),
            history_window: 10,
            top_k: 4,
            retrieval_timeout: Duration::from_secs(10),
            record_tool_turns: true,
            request_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            max_tokens: None,
            temperature: None,
            tool_timeout: Duration::from_secs(30),
            session_name: "agent_session".to_string(),
        }
    }
}

impl AgentSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            system_preamble: cfg
                .app
                .system_preamble
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PREAMBLE.to_string()),
            history_window: cfg.app.history_window,
            top_k: cfg.retrieval.top_k,
            retrieval_timeout: Duration::from_millis(cfg.retrieval.timeout_ms.max(1)),
            record_tool_turns: cfg.app.record_tool_turns,
            request_timeout: Duration::from_secs(cfg.llm.timeouts.request.max(1)),
            retry: RetryPolicy::from_config(&cfg.llm.retry),
            max_tokens: cfg.llm.max_tokens,
            temperature: cfg.llm.temperature,
            tool_timeout: Duration::from_secs(cfg.tools.timeout_secs.max(1)),
            session_name: cfg.session.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct SessionMeta {
    session_id: Uuid,
    created_at: DateTime<Utc>,
}

impl SessionMeta {
    fn fresh() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

/// 一个对话的状态与依赖；多个 Agent 之间只共享只读的工具注册表与检索连接
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    retrieval: Arc<dyn RetrievalStore>,
    tools: ToolExecutor,
    sessions: Arc<dyn SessionStore>,
    prompt: PromptBuilder,
    settings: AgentSettings,
    transcript: Mutex<Transcript>,
    meta: Mutex<SessionMeta>,
    supervisor: SessionSupervisor,
}

/// Agent 构建器：未设置的依赖使用空检索、内置工具与内存会话存储
pub struct AgentBuilder {
    llm: Arc<dyn LlmClient>,
    retrieval: Option<Arc<dyn RetrievalStore>>,
    tools: Option<Arc<ToolRegistry>>,
    sessions: Option<Arc<dyn SessionStore>>,
    settings: AgentSettings,
}

impl AgentBuilder {
    pub fn retrieval(mut self, store: Arc<dyn RetrievalStore>) -> Self {
        self.retrieval = Some(store);
        self
    }

    pub fn tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tools = Some(registry);
        self
    }

    pub fn sessions(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Agent {
        let tools = self.tools.unwrap_or_else(|| {
            Arc::new(
                ToolRegistry::builder()
                    .register(Arc::new(CalculatorTool))
                    .register(Arc::new(EchoTool))
                    .build(),
            )
        });
        Agent {
            llm: self.llm,
            retrieval: self.retrieval.unwrap_or_else(|| Arc::new(NoopStore)),
            tools: ToolExecutor::new(tools, self.settings.tool_timeout),
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
            prompt: PromptBuilder::new(
                self.settings.system_preamble.clone(),
                self.settings.history_window,
            ),
            settings: self.settings,
            transcript: Mutex::new(Transcript::new()),
            meta: Mutex::new(SessionMeta::fresh()),
            supervisor: SessionSupervisor::new(),
        }
    }
}

/// 按 [retrieval] 打开本地索引；enabled = false 时返回 None。目录无法创建为致命错误
pub fn open_local_index(cfg: &AppConfig) -> Result<Option<Arc<LocalIndex>>, AgentError> {
    let r = &cfg.retrieval;
    if !r.enabled {
        tracing::info!("retrieval disabled, contextless completions");
        return Ok(None);
    }
    let embedder = create_embedder_from_config(
        r.embedding_base_url.as_deref(),
        r.embedding_model.as_deref(),
    );
    let chunking = ChunkingConfig {
        chunk_size: r.chunk_size.max(1),
        chunk_overlap: r.chunk_overlap.min(r.chunk_size.saturating_sub(1)),
        ..ChunkingConfig::default()
    };
    let index = LocalIndex::open(&r.persist_dir, &r.collection, embedder)?
        .with_chunking_config(chunking);
    Ok(Some(Arc::new(index)))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Agent {
    pub fn builder(llm: Arc<dyn LlmClient>) -> AgentBuilder {
        AgentBuilder {
            llm,
            retrieval: None,
            tools: None,
            sessions: None,
            settings: AgentSettings::default(),
        }
    }

    /// 按配置装配全部依赖（LLM、本地索引、工具清单、文件会话存储）
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        Self::from_config_with_index(cfg).map(|(agent, _)| agent)
    }

    /// 同 from_config，另外返回本地索引句柄（供调用方写入文档）
    pub fn from_config_with_index(
        cfg: &AppConfig,
    ) -> Result<(Self, Option<Arc<LocalIndex>>), AgentError> {
        let llm = create_llm_from_config(cfg)?;
        let settings = AgentSettings::from_config(cfg);
        let registry = default_registry(&cfg.tools.dir, settings.tool_timeout);
        let index = open_local_index(cfg)?;
        let mut builder = Agent::builder(llm)
            .settings(settings)
            .tools(Arc::new(registry))
            .sessions(Arc::new(FileSessionStore::new(&cfg.session.dir)));
        if let Some(index) = &index {
            builder = builder.retrieval(index.clone());
        }
        Ok((builder.build(), index))
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn backend_id(&self) -> String {
        self.llm.backend_id()
    }

    /// 处理一条用户消息：追加 user Turn → 检索 → 组装提示词 → 调用模型（带重试）→ 追加 agent Turn
    ///
    /// 模型不可用时 user Turn 保留、不追加 agent Turn。
    pub async fn handle_message(&self, user_text: &str) -> Result<String, AgentError> {
        self.handle_message_with_cancel(user_text, self.supervisor.child_token())
            .await
    }

    /// 同 handle_message；cancel 触发后返回 Cancelled，迟到的回复不会写入 Transcript
    pub async fn handle_message_with_cancel(
        &self,
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(AgentError::InvalidInput("message is empty".to_string()));
        }
        let _guard = self.supervisor.acquire()?;

        let history = {
            let mut transcript = lock(&self.transcript);
            let history = transcript.clone();
            transcript.push(Turn::user(text));
            history
        };

        let query = tokio::time::timeout(
            self.settings.retrieval_timeout,
            self.retrieval.query(text, self.settings.top_k),
        );
        let passages = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = query => r.unwrap_or_else(|_| {
                tracing::warn!(
                    timeout_ms = self.settings.retrieval_timeout.as_millis() as u64,
                    "retrieval timed out, contextless prompt"
                );
                Vec::new()
            }),
        };
        if passages.is_empty() {
            tracing::debug!("no passages retrieved, contextless prompt");
        } else {
            tracing::info!(passages = passages.len(), "context retrieved");
        }

        let prompt = self.prompt.build(&history, passages, text);
        let request = CompletionRequest::new(prompt, self.completion_options());
        let reply = self.complete_with_retry(&request, &cancel).await?;

        lock(&self.transcript).push(Turn::agent(reply.clone()));
        Ok(reply)
    }

    /// 一次性代码分析：无检索、不读写 Transcript，重试策略同 handle_message
    pub async fn analyze_code(&self, source_text: &str) -> Result<String, AgentError> {
        if source_text.trim().is_empty() {
            return Err(AgentError::InvalidInput("source text is empty".to_string()));
        }
        let request = CompletionRequest::new(analysis_prompt(source_text), self.completion_options());
        self.complete_with_retry(&request, &self.supervisor.child_token())
            .await
    }

    /// 读取文件后调用 analyze_code；文件不可读为 InvalidInput
    pub async fn analyze_file(&self, path: impl AsRef<Path>) -> Result<String, AgentError> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            AgentError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        self.analyze_code(&source).await
    }

    /// 调用工具；成功且开启 record_tool_turns 时追加一条 tool Turn
    pub async fn run_tool(&self, name: &str, args: Value) -> Result<String, AgentError> {
        let _guard = self.supervisor.acquire()?;
        let summary_args = args.to_string();
        let result = self.tools.execute(name, args).await?;
        if self.settings.record_tool_turns {
            lock(&self.transcript).push(Turn::tool(format!("{name}({summary_args}) -> {result}")));
        }
        Ok(result)
    }

    /// 已注册工具 (name, description)
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools.registry().descriptions()
    }

    /// 以配置的会话名保存
    pub async fn save_session(&self) -> Result<(), AgentError> {
        let name = self.settings.session_name.clone();
        self.save_session_as(&name).await
    }

    /// 原子保存；失败时 Transcript 不受影响
    pub async fn save_session_as(&self, name: &str) -> Result<(), AgentError> {
        let _guard = self.supervisor.acquire()?;
        let record = {
            let transcript = lock(&self.transcript);
            let meta = lock(&self.meta);
            let mut record = SessionRecord::new(&transcript, self.llm.backend_id());
            record.session_id = meta.session_id;
            record.created_at = meta.created_at;
            record.updated_at = Some(Utc::now());
            record
        };
        let turns = record.turns.len();
        self.sessions.save(name, &record).await.map_err(|e| {
            tracing::error!(session = %name, error = %e, "session save failed");
            AgentError::from(e)
        })?;
        tracing::info!(session = %name, turns, "session saved");
        Ok(())
    }

    /// 加载最近保存的会话，整体替换当前 Transcript；失败时当前 Transcript 保持不变
    pub async fn load_session(&self) -> Result<(), AgentError> {
        self.load(None).await
    }

    pub async fn load_named_session(&self, name: &str) -> Result<(), AgentError> {
        self.load(Some(name)).await
    }

    async fn load(&self, name: Option<&str>) -> Result<(), AgentError> {
        let _guard = self.supervisor.acquire()?;
        let record = self.sessions.load(name).await.map_err(|e| {
            tracing::warn!(session = ?name, error = %e, "session load failed");
            AgentError::from(e)
        })?;
        let meta = SessionMeta {
            session_id: record.session_id,
            created_at: record.created_at,
        };
        let transcript = record.into_transcript();
        tracing::info!(session = ?name, turns = transcript.len(), "session loaded");
        *lock(&self.transcript) = transcript;
        *lock(&self.meta) = meta;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.sessions.list().await?)
    }

    /// 当前 Transcript 快照
    pub fn transcript(&self) -> Vec<Turn> {
        lock(&self.transcript).turns().to_vec()
    }

    pub fn transcript_len(&self) -> usize {
        lock(&self.transcript).len()
    }

    /// 清空对话并开始新会话 id
    pub fn clear(&self) -> Result<(), AgentError> {
        let _guard = self.supervisor.acquire()?;
        lock(&self.transcript).clear();
        *lock(&self.meta) = SessionMeta::fresh();
        Ok(())
    }

    /// 取消所有进行中的请求（关闭时调用，之后的默认令牌均已取消）
    pub fn shutdown(&self) {
        self.supervisor.cancel_all();
    }

    fn completion_options(&self) -> CompletionOptions {
        let secs = self.settings.request_timeout.as_secs();
        CompletionOptions {
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            timeout_seconds: (secs > 0).then_some(secs),
            model_id: None,
        }
    }

    /// 每次尝试都受 request_timeout 约束；只有可重试错误且仍有预算时才退避重试
    async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let policy = &self.settings.retry;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(attempt, "completion cancelled by caller");
                    return Err(AgentError::Cancelled);
                }
                r = tokio::time::timeout(self.settings.request_timeout, self.llm.complete(request)) => {
                    r.unwrap_or_else(|_| Err(LlmError::Timeout))
                }
            };

            let err = match outcome {
                Ok(reply) => {
                    tracing::debug!(attempt, chars = reply.len(), "completion ok");
                    return Ok(reply);
                }
                Err(e) => e,
            };

            if !err.is_retryable() || !policy.should_retry(attempt) {
                tracing::error!(attempt, error = %err, "model unavailable");
                return Err(AgentError::ModelUnavailable {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "completion failed, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, PromptRole};
    use crate::memory::{RetrievedPassage, Role};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedStore(Vec<RetrievedPassage>);

    #[async_trait]
    impl RetrievalStore for FixedStore {
        async fn query(&self, _text: &str, k: usize) -> Vec<RetrievedPassage> {
            self.0.iter().take(k).cloned().collect()
        }
    }

    fn fast_settings() -> AgentSettings {
        AgentSettings {
            retry: RetryPolicy::immediate(3),
            request_timeout: Duration::from_millis(100),
            ..AgentSettings::default()
        }
    }

    #[tokio::test]
    async fn test_prompt_contains_context_and_history() {
        let mock = Arc::new(MockLlmClient::new().with_reply("one").with_reply("two"));
        let agent = Agent::builder(mock.clone())
            .retrieval(Arc::new(FixedStore(vec![RetrievedPassage::new("Rust is fast", "doc.txt", 0.9)])))
            .settings(fast_settings())
            .build();

        agent.handle_message("first").await.unwrap();
        agent.handle_message("second").await.unwrap();

        let requests = mock.requests();
        let last = &requests[1].prompt.messages;
        assert_eq!(last[0].role, PromptRole::System);
        assert!(last[0].content.contains("Rust is fast"));
        let tail: Vec<&str> = last[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["first", "one", "second"]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let mock = Arc::new(MockLlmClient::new().with_error(LlmError::Backend {
            status: Some(400),
            message: "bad request".into(),
        }));
        let agent = Agent::builder(mock.clone()).settings(fast_settings()).build();

        let err = agent.handle_message("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable { attempts: 1, .. }));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_error(LlmError::Transport("refused".into()))
                .with_reply("recovered"),
        );
        let agent = Agent::builder(mock.clone()).settings(fast_settings()).build();

        assert_eq!(agent.handle_message("hi").await.unwrap(), "recovered");
        assert_eq!(mock.calls(), 2);
        assert_eq!(agent.transcript_len(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_is_invalid_input() {
        let agent = Agent::builder(Arc::new(MockLlmClient::new())).build();
        assert!(matches!(agent.handle_message("   ").await, Err(AgentError::InvalidInput(_))));
        assert_eq!(agent.transcript_len(), 0);
    }

    #[tokio::test]
    async fn test_analyze_code_leaves_transcript_alone() {
        let mock = Arc::new(MockLlmClient::new().with_reply("looks fine"));
        let agent = Agent::builder(mock.clone()).settings(fast_settings()).build();

        assert_eq!(agent.analyze_code("fn main() {}").await.unwrap(), "looks fine");
        assert_eq!(agent.transcript_len(), 0);
        assert_eq!(mock.requests()[0].prompt.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_missing_file_is_invalid_input() {
        let agent = Agent::builder(Arc::new(MockLlmClient::new())).build();
        let err = agent.analyze_file("/definitely/not/here.rs").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_run_tool_records_tool_turn() {
        let agent = Agent::builder(Arc::new(MockLlmClient::new())).build();
        let out = agent
            .run_tool("calculator", json!({"expression": "2 + 2"}))
            .await
            .unwrap();
        assert_eq!(out, "4");

        let turns = agent.transcript();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::Tool);
        assert!(turns[0].content.ends_with("-> 4"));
    }

    #[tokio::test]
    async fn test_clear_and_new_session() {
        let agent = Agent::builder(Arc::new(MockLlmClient::new())).build();
        agent.handle_message("hello").await.unwrap();
        agent.clear().unwrap();
        assert!(agent.transcript().is_empty());
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = AppConfig::default();
        cfg.app.system_preamble = Some("Be brief.".into());
        cfg.llm.retry.max_attempts = 0;
        let settings = AgentSettings::from_config(&cfg);
        assert_eq!(settings.system_preamble, "Be brief.");
        assert_eq!(settings.retry.max_attempts, 1);
        assert_eq!(settings.request_timeout, Duration::from_secs(120));
        assert_eq!(settings.retrieval_timeout, Duration::from_secs(10));
    }
}
