//! System prompt assembly: base instructions, tool catalog, call format and
//! recalled memories.

use cadence_core::tool::ToolDefinition;
use cadence_memory::ScoredMemory;
use std::fmt::Write;

pub const SUB_AGENT_PROMPT: &str = "You are a focused sub-agent working for another agent. \
Complete the task you are given, using tools when they help, and reply with a concise final answer.";

const CALL_FORMAT: &str = r#"## Calling tools

To call a tool, write a block like this anywhere in your reply:

<tool_call>{"name": "<tool name>", "arguments": { ... }}</tool_call>

You may call several tools in one reply; they run in order and you will see
each result in a <tool_result> block. Put private reasoning inside
<thinking>...</thinking>. A reply without any <tool_call> block is your final
answer."#;

pub fn build_system_prompt(base: &str, tools: &[ToolDefinition], memories: &[ScoredMemory]) -> String {
    let mut prompt = base.trim().to_string();

    if !tools.is_empty() {
        prompt.push_str("\n\n## Tools\n");
        for tool in tools {
            let _ = writeln!(prompt, "- {}: {}", tool.name, tool.description);
            if !tool.parameters.is_null() {
                let _ = writeln!(prompt, "  parameters: {}", tool.parameters);
            }
        }
        prompt.push('\n');
        prompt.push_str(CALL_FORMAT);
    }

    if !memories.is_empty() {
        prompt.push_str("\n\n## Recalled Memories\n");
        for (i, hit) in memories.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "{}. [{}, score={:.2}] {}",
                i + 1,
                hit.memory.memory_type,
                hit.score,
                hit.memory.content
            );
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::memory::{Memory, MemoryMetadata, MemoryType};
    use chrono::Utc;

    fn hit(content: &str, score: f64) -> ScoredMemory {
        let now = Utc::now();
        ScoredMemory {
            memory: Memory {
                id: "m".into(),
                memory_type: MemoryType::UserPref,
                content: content.into(),
                workflow_id: None,
                importance: 0.5,
                expires_at: None,
                metadata: MemoryMetadata::default(),
                created_at: now,
                updated_at: now,
                embedding: None,
            },
            similarity: 0.9,
            recency: 1.0,
            score,
        }
    }

    #[test]
    fn base_only() {
        assert_eq!(build_system_prompt("  Be helpful. ", &[], &[]), "Be helpful.");
    }

    #[test]
    fn lists_tools_and_format() {
        let tools = vec![ToolDefinition {
            name: "calculator".into(),
            description: "Do math".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let prompt = build_system_prompt("Base", &tools, &[]);
        assert!(prompt.contains("- calculator: Do math"));
        assert!(prompt.contains("<tool_call>"));
        assert!(!prompt.contains("Recalled Memories"));
    }

    #[test]
    fn renders_memories_in_rank_order() {
        let prompt = build_system_prompt("Base", &[], &[hit("prefers terse answers", 0.91), hit("uses vim", 0.8)]);
        let first = prompt.find("prefers terse answers").unwrap();
        let second = prompt.find("uses vim").unwrap();
        assert!(first < second);
        assert!(prompt.contains("1. [user_pref, score=0.91]"));
    }
}
