//! Parsing model output into tool calls, reasoning and a final answer.
//!
//! Tool calls are embedded in the text as
//!
//! ```text
//! <tool_call>{"name": "calculator", "arguments": {"expression": "2 + 2"}}</tool_call>
//! ```
//!
//! `tool` is accepted for `name`, and `args`/`input` for `arguments`. Missing
//! arguments default to `{}`. `<thinking>…</thinking>` blocks are reasoning
//! and never part of the answer.

use cadence_core::tool::ToolCall;
use serde_json::Value;

const TOOL_OPEN: &str = "<tool_call>";
const TOOL_CLOSE: &str = "</tool_call>";
const THINK_OPEN: &str = "<thinking>";
const THINK_CLOSE: &str = "</thinking>";

/// One tool-call block.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCall {
    Valid(ToolCall),
    /// A block that could not be turned into a call
    Malformed { raw: String, error: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    /// Text outside every block, trimmed
    pub answer: String,
    pub reasoning: Vec<String>,
    pub calls: Vec<ParsedCall>,
}

impl ParsedResponse {
    /// True when the model gave a final answer (no call blocks at all).
    pub fn is_final(&self) -> bool {
        self.calls.is_empty()
    }
}

pub fn parse_response(text: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    let mut answer = String::new();
    let mut rest = text;

    loop {
        let next_tool = rest.find(TOOL_OPEN);
        let next_think = rest.find(THINK_OPEN);
        let (start, is_tool) = match (next_tool, next_think) {
            (None, None) => {
                answer.push_str(rest);
                break;
            }
            (Some(t), Some(k)) if k < t => (k, false),
            (Some(t), _) => (t, true),
            (None, Some(k)) => (k, false),
        };

        answer.push_str(&rest[..start]);
        let (open, close) = if is_tool {
            (TOOL_OPEN, TOOL_CLOSE)
        } else {
            (THINK_OPEN, THINK_CLOSE)
        };
        let body_start = start + open.len();

        match rest[body_start..].find(close) {
            Some(len) => {
                let body = &rest[body_start..body_start + len];
                if is_tool {
                    parsed.calls.push(parse_call(body));
                } else {
                    push_reasoning(&mut parsed.reasoning, body);
                }
                rest = &rest[body_start + len + close.len()..];
            }
            None => {
                let body = &rest[body_start..];
                if is_tool {
                    parsed.calls.push(ParsedCall::Malformed {
                        raw: body.trim().to_string(),
                        error: "unterminated <tool_call> block".into(),
                    });
                } else {
                    push_reasoning(&mut parsed.reasoning, body);
                }
                break;
            }
        }
    }

    parsed.answer = answer.trim().to_string();
    parsed
}

fn push_reasoning(reasoning: &mut Vec<String>, body: &str) {
    let body = body.trim();
    if !body.is_empty() {
        reasoning.push(body.to_string());
    }
}

fn parse_call(body: &str) -> ParsedCall {
    let raw = body.trim();
    let malformed = |error: String| ParsedCall::Malformed {
        raw: raw.to_string(),
        error,
    };

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return malformed(format!("invalid JSON: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return malformed("tool call must be a JSON object".into());
    };

    let name = obj
        .get("name")
        .or_else(|| obj.get("tool"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() {
        return malformed("missing tool name".into());
    }

    let arguments = match obj.get("arguments").or_else(|| obj.get("args")).or_else(|| obj.get("input")) {
        None | Some(Value::Null) => Value::Object(Default::default()),
        // Some models send the arguments as a JSON-encoded string
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => return malformed("arguments must be a JSON object".into()),
        },
        Some(v @ Value::Object(_)) => v.clone(),
        Some(_) => return malformed("arguments must be a JSON object".into()),
    };

    ParsedCall::Valid(ToolCall::new(name, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid(call: &ParsedCall) -> &ToolCall {
        match call {
            ParsedCall::Valid(c) => c,
            other => panic!("expected valid call, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_final_answer() {
        let parsed = parse_response("  The answer is 4.  ");
        assert!(parsed.is_final());
        assert_eq!(parsed.answer, "The answer is 4.");
    }

    #[test]
    fn single_call_with_surrounding_text() {
        let parsed = parse_response(
            "Let me compute.\n<tool_call>{\"name\": \"calculator\", \"arguments\": {\"expression\": \"2+2\"}}</tool_call>\nDone soon.",
        );
        assert_eq!(parsed.calls.len(), 1);
        let call = valid(&parsed.calls[0]);
        assert_eq!(call.name, "calculator");
        assert_eq!(call.arguments, json!({"expression": "2+2"}));
        assert_eq!(parsed.answer, "Let me compute.\n\nDone soon.");
    }

    #[test]
    fn multiple_calls_keep_order() {
        let parsed = parse_response(
            r#"<tool_call>{"name": "todo", "arguments": {"operation": "list"}}</tool_call>
<tool_call>{"tool": "calculator", "args": {"expression": "1"}}</tool_call>
<tool_call>{"name": "fs:read_file", "input": {"path": "a.txt"}}</tool_call>"#,
        );
        let names: Vec<_> = parsed.calls.iter().map(|c| valid(c).name.clone()).collect();
        assert_eq!(names, vec!["todo", "calculator", "fs:read_file"]);
        assert_eq!(valid(&parsed.calls[2]).arguments["path"], "a.txt");
    }

    #[test]
    fn missing_arguments_default_to_empty_object() {
        let parsed = parse_response(r#"<tool_call>{"name": "sub_agent_status"}</tool_call>"#);
        assert_eq!(valid(&parsed.calls[0]).arguments, json!({}));
    }

    #[test]
    fn string_encoded_arguments_are_accepted() {
        let parsed =
            parse_response(r#"<tool_call>{"name": "calculator", "arguments": "{\"expression\": \"3\"}"}</tool_call>"#);
        assert_eq!(valid(&parsed.calls[0]).arguments["expression"], "3");
    }

    #[test]
    fn malformed_blocks_are_reported() {
        let cases = [
            "<tool_call>{not json}</tool_call>",
            r#"<tool_call>{"arguments": {}}</tool_call>"#,
            r#"<tool_call>["calculator"]</tool_call>"#,
            r#"<tool_call>{"name": "calculator", "arguments": [1, 2]}</tool_call>"#,
            r#"<tool_call>{"name": "calculator""#,
        ];
        for text in cases {
            let parsed = parse_response(text);
            assert_eq!(parsed.calls.len(), 1, "{text}");
            assert!(matches!(parsed.calls[0], ParsedCall::Malformed { .. }), "{text}");
            assert!(!parsed.is_final());
        }
    }

    #[test]
    fn unterminated_block_error_names_the_problem() {
        let parsed = parse_response(r#"ok <tool_call>{"name": "calculator"}"#);
        match &parsed.calls[0] {
            ParsedCall::Malformed { error, raw } => {
                assert!(error.contains("unterminated"));
                assert_eq!(raw, r#"{"name": "calculator"}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parsed.answer, "ok");
    }

    #[test]
    fn thinking_is_extracted_and_stripped() {
        let parsed = parse_response(
            "<thinking>User wants brevity.</thinking>Short answer.<thinking> second </thinking>",
        );
        assert!(parsed.is_final());
        assert_eq!(parsed.answer, "Short answer.");
        assert_eq!(parsed.reasoning, vec!["User wants brevity.", "second"]);
    }

    #[test]
    fn tool_tags_inside_thinking_are_not_calls() {
        let parsed = parse_response(
            "<thinking>maybe <tool_call>{\"name\": \"calculator\"}</tool_call>?</thinking>Final.",
        );
        assert!(parsed.is_final());
        assert_eq!(parsed.answer, "Final.");
        assert_eq!(parsed.reasoning.len(), 1);
    }

    #[test]
    fn unterminated_thinking_swallows_the_rest() {
        let parsed = parse_response("Answer first. <thinking>still going");
        assert_eq!(parsed.answer, "Answer first.");
        assert_eq!(parsed.reasoning, vec!["still going"]);
    }
}
