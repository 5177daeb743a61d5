//! Drives one conversation with the external CLI: per-turn spawn, a single
//! JSON line on stdin, line-by-line stdout parsing, and exit
//! classification.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::cli_adapter::{build_argv, TurnOptions, CLI_BINARY};
use crate::stream::{ContentBlock, StreamAssembler};

const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("turn failed: {0}")]
    TurnFailed(String),
    #[error("no content blocks produced; stderr: {0}")]
    EmptyResult(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub blocks: Vec<ContentBlock>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

type BlockCallback = Arc<dyn Fn(&ContentBlock) + Send + Sync>;

/// One conversation with the external CLI. Turns on the same `Runner` are
/// serialized; separate `Runner`s run independently.
pub struct Runner {
    session_id: Mutex<Option<String>>,
    lock: Mutex<()>,
    on_block: Option<BlockCallback>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            session_id: Mutex::new(None),
            lock: Mutex::new(()),
            on_block: None,
        }
    }

    pub fn with_block_callback(callback: BlockCallback) -> Self {
        Self {
            session_id: Mutex::new(None),
            lock: Mutex::new(()),
            on_block: Some(callback),
        }
    }

    /// Clear the captured session id, starting a fresh conversation on the
    /// next turn.
    pub async fn reset_conversation(&self) {
        *self.session_id.lock().await = None;
    }

    pub async fn run_turn(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        mcp_config_path: Option<&str>,
        model: Option<&str>,
    ) -> Result<TurnOutcome> {
        let _guard = self.lock.lock().await;

        let resume = self.session_id.lock().await.clone();
        let opts = TurnOptions {
            system_prompt: if resume.is_none() { system_prompt } else { None },
            mcp_config_path,
            model,
            resume_session_id: resume.as_deref(),
            streaming_callback_registered: self.on_block.is_some(),
        };
        let argv = build_argv(&opts);

        let mut child = Command::new(CLI_BINARY)
            .args(&argv)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let payload = json!({"type": "user", "message": {"role": "user", "content": message}});
        let mut line = serde_json::to_vec(&payload)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        drop(stdin);

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let mut assembler = StreamAssembler::new();
        let mut is_error = false;
        let mut result_text = String::new();
        let mut model_name = None;
        let mut duration_ms = None;
        let mut cost_usd = None;
        let mut input_tokens = None;
        let mut output_tokens = None;

        let mut stdout_reader = BufReader::with_capacity(10 * 1024 * 1024, stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stderr_buf = String::new();
        let mut stderr_done = false;

        loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    let Some(line) = line? else { break };
                    if line.len() > MAX_LINE_BYTES {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(&line) else {
                        continue;
                    };
                    self.handle_line(&value, &mut assembler);

                    match value.get("type").and_then(Value::as_str) {
                        Some("assistant") => {
                            model_name = value
                                .pointer("/message/model")
                                .and_then(Value::as_str)
                                .map(String::from)
                                .or(model_name);
                            assembler.feed_assistant_fallback(&value);
                        }
                        Some("result") => {
                            is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                            result_text = value
                                .get("result")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            duration_ms = value.get("duration_ms").and_then(Value::as_u64);
                            cost_usd = value.get("total_cost_usd").and_then(Value::as_f64);
                            input_tokens = value.pointer("/usage/input_tokens").and_then(Value::as_u64);
                            output_tokens = value.pointer("/usage/output_tokens").and_then(Value::as_u64);
                        }
                        _ => {}
                    }
                }
                line = stderr_reader.next_line(), if !stderr_done => {
                    match line? {
                        Some(line) => {
                            tracing::debug!(target: "mob_runner::stderr", "{line}");
                            stderr_buf.push_str(&line);
                            stderr_buf.push('\n');
                        }
                        None => stderr_done = true,
                    }
                }
            }
        }

        let _ = child.wait().await?;

        if let Some(sid) = assembler.session_id() {
            let mut guard = self.session_id.lock().await;
            if guard.is_none() {
                *guard = Some(sid.to_string());
            }
        }

        if is_error {
            return Err(RunnerError::TurnFailed(result_text));
        }

        let blocks = assembler.into_blocks();
        if blocks.is_empty() {
            return Err(RunnerError::EmptyResult(stderr_buf));
        }

        Ok(TurnOutcome {
            blocks,
            session_id: self.session_id.lock().await.clone(),
            model: model_name,
            duration_ms,
            cost_usd,
            input_tokens,
            output_tokens,
        })
    }

    fn handle_line(&self, value: &Value, assembler: &mut StreamAssembler) {
        if let Some(block) = assembler.feed(value) {
            if let Some(cb) = &self.on_block {
                cb(&block);
            }
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_conversation_clears_session_id() {
        let runner = Runner::new();
        *runner.session_id.lock().await = Some("sess-1".into());
        runner.reset_conversation().await;
        assert!(runner.session_id.lock().await.is_none());
    }
}
