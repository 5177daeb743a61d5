//! Parses the indexed content-block streaming protocol emitted on the
//! external CLI's stdout: `content_block_start` / `content_block_delta` /
//! `content_block_stop`, with a fallback to a non-streaming
//! `assistant.message.content[]` payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Default)]
struct OpenBlock {
    kind: String,
    text: String,
    thinking: String,
    tool_id: Option<String>,
    tool_name: Option<String>,
    tool_input_json: String,
    tool_result_id: Option<String>,
    tool_result_content: String,
}

/// Accumulates stream events into completed content blocks, emitted in the
/// order their `content_block_stop` events arrive (not index order).
#[derive(Default)]
pub struct StreamAssembler {
    open: BTreeMap<u64, OpenBlock>,
    finished: Vec<ContentBlock>,
    session_id: Option<String>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn into_blocks(self) -> Vec<ContentBlock> {
        self.finished
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.finished
    }

    /// Feed one parsed line of CLI stdout. Returns the block that just
    /// completed, if this line was a `content_block_stop`.
    pub fn feed(&mut self, line: &Value) -> Option<ContentBlock> {
        if let Some(sid) = line.get("session_id").and_then(Value::as_str) {
            if self.session_id.is_none() {
                self.session_id = Some(sid.to_string());
            }
        }

        if line.get("type").and_then(Value::as_str) == Some("stream_event") {
            if let Some(event) = line.get("event") {
                return self.feed_event(event);
            }
        }
        None
    }

    fn feed_event(&mut self, event: &Value) -> Option<ContentBlock> {
        match event.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                let index = event.get("index").and_then(Value::as_u64)?;
                let block = event.get("content_block")?;
                let kind = block.get("type").and_then(Value::as_str)?.to_string();
                let mut open = OpenBlock {
                    kind: kind.clone(),
                    ..Default::default()
                };
                if kind == "tool_use" {
                    open.tool_id = block.get("id").and_then(Value::as_str).map(String::from);
                    open.tool_name = block.get("name").and_then(Value::as_str).map(String::from);
                } else if kind == "tool_result" {
                    open.tool_result_id = block
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .map(String::from);
                }
                self.open.insert(index, open);
                None
            }
            Some("content_block_delta") => {
                let index = event.get("index").and_then(Value::as_u64)?;
                let delta = event.get("delta")?;
                let open = self.open.get_mut(&index)?;
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(t) = delta.get("text").and_then(Value::as_str) {
                            open.text.push_str(t);
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(t) = delta.get("thinking").and_then(Value::as_str) {
                            open.thinking.push_str(t);
                        }
                    }
                    Some("summary_delta") => {
                        if let Some(t) = delta.get("summary").and_then(Value::as_str) {
                            open.thinking.push_str(t);
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(t) = delta.get("partial_json").and_then(Value::as_str) {
                            open.tool_input_json.push_str(t);
                        }
                    }
                    _ => {}
                }
                None
            }
            Some("content_block_stop") => {
                let index = event.get("index").and_then(Value::as_u64)?;
                let open = self.open.remove(&index)?;
                let block = finalize(open);
                if let Some(block) = block.clone() {
                    self.finished.push(block);
                }
                block
            }
            _ => None,
        }
    }

    /// Fallback: if no streaming blocks were accumulated, parse a
    /// non-streaming `assistant.message.content[]` payload instead.
    pub fn feed_assistant_fallback(&mut self, line: &Value) {
        if !self.finished.is_empty() {
            return;
        }
        let Some(message) = line.get("message") else {
            return;
        };
        let Some(content) = message.get("content").and_then(Value::as_array) else {
            return;
        };
        for block in content {
            if let Some(parsed) = parse_static_block(block) {
                self.finished.push(parsed);
            }
        }
    }
}

fn finalize(open: OpenBlock) -> Option<ContentBlock> {
    match open.kind.as_str() {
        "text" => Some(ContentBlock::Text { text: open.text }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: open.thinking,
        }),
        "tool_use" => {
            let input = serde_json::from_str(&open.tool_input_json)
                .unwrap_or(Value::Object(Default::default()));
            Some(ContentBlock::ToolUse {
                id: open.tool_id.unwrap_or_default(),
                name: open.tool_name.unwrap_or_default(),
                input,
            })
        }
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: open.tool_result_id.unwrap_or_default(),
            content: open.tool_result_content,
        }),
        _ => None,
    }
}

fn parse_static_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: block.get("text").and_then(Value::as_str)?.to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block.get("id").and_then(Value::as_str)?.to_string(),
            name: block.get("name").and_then(Value::as_str)?.to_string(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: block.get("tool_use_id").and_then(Value::as_str)?.to_string(),
            content: block
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_delta_assembly() {
        let mut a = StreamAssembler::new();
        let lines = [
            json!({"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"text"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hello "}}}),
            json!({"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"world"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_stop","index":0}}),
        ];
        let mut last = None;
        for line in &lines {
            last = a.feed(line);
        }
        assert_eq!(
            last,
            Some(ContentBlock::Text {
                text: "hello world".into()
            })
        );
        assert_eq!(a.blocks().len(), 1);
    }

    #[test]
    fn tool_use_and_result_pairing() {
        let mut a = StreamAssembler::new();
        let lines = [
            json!({"type":"stream_event","event":{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"call-1","name":"bash"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"command\":\"ls\"}"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_stop","index":1}}),
            json!({"type":"stream_event","event":{"type":"content_block_start","index":2,"content_block":{"type":"tool_result","tool_use_id":"call-1"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_stop","index":2}}),
        ];
        for line in &lines {
            a.feed(line);
        }
        assert_eq!(a.blocks().len(), 2);
        match &a.blocks()[0] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call-1");
                assert_eq!(name, "bash");
                assert_eq!(input, &json!({"command":"ls"}));
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn emission_order_is_stop_order_not_index_order() {
        let mut a = StreamAssembler::new();
        let lines = [
            json!({"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"text"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_start","index":1,"content_block":{"type":"text"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"second"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_stop","index":1}}),
            json!({"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"first"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_stop","index":0}}),
        ];
        for line in &lines {
            a.feed(line);
        }
        assert_eq!(
            a.blocks()[0],
            ContentBlock::Text {
                text: "second".into()
            }
        );
        assert_eq!(
            a.blocks()[1],
            ContentBlock::Text {
                text: "first".into()
            }
        );
    }

    #[test]
    fn fallback_used_when_no_streaming_blocks_seen() {
        let mut a = StreamAssembler::new();
        let line = json!({
            "type": "assistant",
            "message": {
                "model": "claude",
                "content": [{"type": "text", "text": "fallback text"}]
            }
        });
        a.feed_assistant_fallback(&line);
        assert_eq!(
            a.blocks()[0],
            ContentBlock::Text {
                text: "fallback text".into()
            }
        );
    }

    #[test]
    fn fallback_ignored_once_streaming_blocks_exist() {
        let mut a = StreamAssembler::new();
        let lines = [
            json!({"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"text"}}}),
            json!({"type":"stream_event","event":{"type":"content_block_stop","index":0}}),
        ];
        for line in &lines {
            a.feed(line);
        }
        let fallback_line = json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": "should not appear"}]}
        });
        a.feed_assistant_fallback(&fallback_line);
        assert_eq!(a.blocks().len(), 1);
        assert_eq!(a.blocks()[0], ContentBlock::Text { text: String::new() });
    }
}
