//! Ragent - 命令行对话入口
//!
//! 初始化日志与配置，装配 Agent，然后逐行读取 stdin：斜杠命令走对应操作，其余作为用户消息。
//! 每次成功回复后自动保存会话；Ctrl+C 取消当前请求，空闲时按 Ctrl+C 退出。

use std::sync::Arc;

use anyhow::Context;
use ragent::config::{load_config, AppConfig};
use ragent::memory::{LocalIndex, Role};
use ragent::{observability, Agent, AgentError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

const HELP: &str = "Commands:
  /save [name]           save the session
  /load [name]           load a session (latest when no name)
  /sessions              list saved sessions
  /tool <name> [json]    run a tool, e.g. /tool calculator {\"expression\": \"2*21\"}
  /tools                 list tools
  /analyze <path>        review a source file
  /index <path>          add a text file to the retrieval index
  /history               show the conversation
  /clear                 start over
  exit | quit | Ctrl+C   leave (Ctrl+C during a reply cancels it)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config load failed, using defaults");
        AppConfig::default()
    });

    let (agent, index) =
        Agent::from_config_with_index(&cfg).context("Failed to create agent")?;

    match agent.load_named_session(&cfg.session.name).await {
        Ok(()) => println!("Resumed session '{}' ({} turns).", cfg.session.name, agent.transcript_len()),
        Err(AgentError::SessionNotFound(_)) => {
            tracing::info!(session = %cfg.session.name, "no saved session, starting new")
        }
        Err(e) => tracing::warn!(error = %e, "could not resume session, starting new"),
    }

    println!("ragent ({}) - type /help for commands", agent.backend_id());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = next_input(&mut lines, interrupted()).await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if let Some(cmd) = line.strip_prefix('/') {
            if let Err(e) = run_command(&agent, index.as_ref(), cmd).await {
                println!("Error: {e}");
            }
            continue;
        }
        chat(&agent, line).await;
    }

    agent.shutdown();
    Ok(())
}

/// 读取下一行；interrupt 先完成时按输入结束处理
async fn next_input<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    interrupt: impl std::future::Future<Output = ()>,
) -> anyhow::Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => line.context("stdin read failed"),
        _ = interrupt => {
            println!();
            Ok(None)
        }
    }
}

/// 收到 Ctrl+C 时完成；无法注册信号时永不完成
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn chat(agent: &Agent, line: &str) {
    let cancel = CancellationToken::new();
    let reply = agent.handle_message_with_cancel(line, cancel.clone());
    tokio::pin!(reply);
    let result = tokio::select! {
        r = &mut reply => r,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            reply.await
        }
    };
    match result {
        Ok(text) => {
            println!("{text}");
            if let Err(e) = agent.save_session().await {
                tracing::warn!(error = %e, "auto-save failed");
            }
        }
        Err(AgentError::Cancelled) => println!("(cancelled)"),
        Err(e) => println!("Error: {e}"),
    }
}

async fn run_command(
    agent: &Agent,
    index: Option<&Arc<LocalIndex>>,
    cmd: &str,
) -> Result<(), AgentError> {
    let (name, rest) = match cmd.split_once(char::is_whitespace) {
        Some((n, r)) => (n, r.trim()),
        None => (cmd, ""),
    };
    match name {
        "help" => println!("{HELP}"),
        "save" if rest.is_empty() => {
            agent.save_session().await?;
            println!("Saved.");
        }
        "save" => {
            agent.save_session_as(rest).await?;
            println!("Saved as '{rest}'.");
        }
        "load" => {
            if rest.is_empty() {
                agent.load_session().await?;
            } else {
                agent.load_named_session(rest).await?;
            }
            println!("Loaded {} turns.", agent.transcript_len());
        }
        "sessions" => {
            let names = agent.list_sessions().await?;
            if names.is_empty() {
                println!("(no saved sessions)");
            }
            for n in names {
                println!("  {n}");
            }
        }
        "tool" => {
            let (tool, json) = match rest.split_once(char::is_whitespace) {
                Some((t, j)) => (t, j.trim()),
                None => (rest, ""),
            };
            if tool.is_empty() {
                return Err(AgentError::InvalidInput("usage: /tool <name> [json]".into()));
            }
            let args = if json.is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(json)
                    .map_err(|e| AgentError::InvalidInput(format!("args are not valid JSON: {e}")))?
            };
            println!("{}", agent.run_tool(tool, args).await?);
        }
        "tools" => {
            for (n, d) in agent.tool_descriptions() {
                println!("  {n}: {d}");
            }
        }
        "analyze" => {
            if rest.is_empty() {
                return Err(AgentError::InvalidInput("usage: /analyze <path>".into()));
            }
            println!("{}", agent.analyze_file(rest).await?);
        }
        "index" => {
            let Some(index) = index else {
                return Err(AgentError::InvalidInput("retrieval is disabled".into()));
            };
            let text = tokio::fs::read_to_string(rest)
                .await
                .map_err(|e| AgentError::InvalidInput(format!("cannot read {rest}: {e}")))?;
            let added = index.index_document(rest, &text).await?;
            println!("Indexed {added} chunk(s).");
        }
        "history" => {
            for turn in agent.transcript() {
                let who = match turn.role {
                    Role::User => "you",
                    Role::Agent => "agent",
                    Role::Tool => "tool",
                };
                println!("[{}] {who}: {}", turn.timestamp.format("%H:%M:%S"), turn.content);
            }
        }
        "clear" => {
            agent.clear()?;
            println!("Cleared.");
        }
        other => println!("Unknown command '/{other}'. Type /help."),
    }
    Ok(())
}
