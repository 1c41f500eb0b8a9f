//! 提示词组装
//!
//! 顺序固定：system（前言 + 检索片段）→ 最近 N 轮历史（最旧的先丢弃）→ 本轮 user 消息。
//! 相同输入总是得到相同的 Prompt。

use crate::llm::{Prompt, PromptMessage};
use crate::memory::retrieval::{rank_passages, RetrievedPassage};
use crate::memory::{Role, Transcript, Turn};

pub const DEFAULT_SYSTEM_PREAMBLE: &str =
    "You are a helpful and informative AI agent. Answer the user's message based primarily on your own knowledge.";

const CONTEXT_HEADER: &str =
    "Here is some additional information. Use it only if relevant. If it is not relevant, ignore it:";

const ANALYSIS_TEMPLATE: &str = "You are a senior software engineer reviewing the following code. \
Identify potential improvements, including but not limited to:\n\
- Code clarity and readability\n\
- Potential bugs or errors\n\
- Efficiency improvements\n\
- Adherence to best practices\n\
- Security vulnerabilities\n\n\
Provide specific suggestions for how to improve the code.\n\n";

/// 持有 system 前言与历史窗口大小
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    preamble: String,
    history_window: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PREAMBLE, 10)
    }
}

impl PromptBuilder {
    pub fn new(preamble: impl Into<String>, history_window: usize) -> Self {
        Self {
            preamble: preamble.into(),
            history_window,
        }
    }

    /// history 为本轮 user Turn 之前的对话记录，只取最近 history_window 条
    pub fn build(
        &self,
        history: &Transcript,
        mut passages: Vec<RetrievedPassage>,
        user_text: &str,
    ) -> Prompt {
        rank_passages(&mut passages);

        let mut system = self.preamble.clone();
        if !passages.is_empty() {
            system.push_str("\n\n");
            system.push_str(CONTEXT_HEADER);
            for (i, p) in passages.iter().enumerate() {
                system.push_str(&format!(
                    "\n\n[{}] (source: {}, score {:.2})\n{}",
                    i + 1,
                    p.source_id,
                    p.score,
                    p.text.trim()
                ));
            }
        }

        let recent = history.recent(self.history_window);
        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(PromptMessage::system(system));
        messages.extend(recent.iter().map(turn_to_message));
        messages.push(PromptMessage::user(user_text));
        Prompt::new(messages)
    }
}

fn turn_to_message(turn: &Turn) -> PromptMessage {
    match turn.role {
        Role::User => PromptMessage::user(turn.content.clone()),
        Role::Agent => PromptMessage::assistant(turn.content.clone()),
        Role::Tool => PromptMessage::system(format!("Tool result: {}", turn.content)),
    }
}

/// 代码分析的一次性提示词（不带检索与历史）
pub fn analysis_prompt(source_text: &str) -> Prompt {
    Prompt::single(format!("{ANALYSIS_TEMPLATE}```\n{source_text}\n```"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptRole;

    #[test]
    fn test_empty_context_prompt() {
        let prompt = PromptBuilder::new("SYS", 10).build(&Transcript::new(), vec![], "hello");
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0], PromptMessage::system("SYS"));
        assert_eq!(prompt.messages[1], PromptMessage::user("hello"));
    }

    #[test]
    fn test_passages_ranked_by_score_then_source() {
        let passages = vec![
            RetrievedPassage::new("low", "z.txt", 0.2),
            RetrievedPassage::new("tie-b", "b.txt", 0.8),
            RetrievedPassage::new("tie-a", "a.txt", 0.8),
        ];
        let prompt = PromptBuilder::new("SYS", 10).build(&Transcript::new(), passages, "q");
        let system = &prompt.messages[0].content;

        let a = system.find("[1] (source: a.txt, score 0.80)").unwrap();
        let b = system.find("[2] (source: b.txt, score 0.80)").unwrap();
        let z = system.find("[3] (source: z.txt, score 0.20)").unwrap();
        assert!(a < b && b < z);
        assert!(system.starts_with("SYS\n\n"));
    }

    #[test]
    fn test_history_window_drops_oldest() {
        let history = Transcript::from_turns(
            (0..6)
                .map(|i| {
                    if i % 2 == 0 {
                        Turn::user(format!("u{i}"))
                    } else {
                        Turn::agent(format!("a{i}"))
                    }
                })
                .collect(),
        );
        let prompt = PromptBuilder::new("SYS", 3).build(&history, vec![], "now");

        let contents: Vec<&str> = prompt.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["SYS", "a3", "u4", "a5", "now"]);
        assert_eq!(prompt.messages[1].role, PromptRole::Assistant);
    }

    #[test]
    fn test_tool_turn_becomes_system_message() {
        let history = Transcript::from_turns(vec![Turn::tool("calculator(1+1) -> 2")]);
        let prompt = PromptBuilder::default().build(&history, vec![], "and?");
        assert_eq!(prompt.messages[1].role, PromptRole::System);
        assert_eq!(prompt.messages[1].content, "Tool result: calculator(1+1) -> 2");
    }

    #[test]
    fn test_analysis_prompt_wraps_source() {
        let prompt = analysis_prompt("fn main() {}");
        assert_eq!(prompt.messages.len(), 1);
        assert!(prompt.messages[0].content.contains("senior software engineer"));
        assert!(prompt.messages[0].content.ends_with("```\nfn main() {}\n```"));
    }
}
