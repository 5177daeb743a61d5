//! Builds the argument vector for one invocation of the external CLI
//! (§6.2 of the wire contract): skip-permissions, bidirectional
//! streaming-JSON, verbose, an optional first-turn system prompt, an
//! optional tool-RPC config path, an optional model, an optional
//! session-resume id, and partial-message streaming when a callback is
//! registered.

#[derive(Debug, Clone, Default)]
pub struct TurnOptions<'a> {
    pub system_prompt: Option<&'a str>,
    pub mcp_config_path: Option<&'a str>,
    pub model: Option<&'a str>,
    pub resume_session_id: Option<&'a str>,
    pub streaming_callback_registered: bool,
}

/// The binary invoked for every turn.
pub const CLI_BINARY: &str = "mob-agent-cli";

pub fn build_argv(opts: &TurnOptions<'_>) -> Vec<String> {
    let mut args = vec![
        "--dangerously-skip-permissions".to_string(),
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    if let Some(prompt) = opts.system_prompt {
        args.push("--system-prompt".to_string());
        args.push(prompt.to_string());
    }
    if let Some(path) = opts.mcp_config_path {
        args.push("--mcp-config".to_string());
        args.push(path.to_string());
    }
    if let Some(model) = opts.model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    if let Some(session_id) = opts.resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.to_string());
    }
    if opts.streaming_callback_registered {
        args.push("--include-partial-messages".to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_turn_includes_system_prompt_not_resume() {
        let opts = TurnOptions {
            system_prompt: Some("you are a soldati"),
            resume_session_id: None,
            ..Default::default()
        };
        let argv = build_argv(&opts);
        assert!(argv.contains(&"--system-prompt".to_string()));
        assert!(!argv.contains(&"--resume".to_string()));
    }

    #[test]
    fn later_turn_resumes_without_system_prompt() {
        let opts = TurnOptions {
            system_prompt: None,
            resume_session_id: Some("sess-123"),
            ..Default::default()
        };
        let argv = build_argv(&opts);
        assert!(!argv.contains(&"--system-prompt".to_string()));
        let idx = argv.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(argv[idx + 1], "sess-123");
    }

    #[test]
    fn partial_messages_only_when_callback_registered() {
        let without = build_argv(&TurnOptions::default());
        assert!(!without.contains(&"--include-partial-messages".to_string()));

        let with = build_argv(&TurnOptions {
            streaming_callback_registered: true,
            ..Default::default()
        });
        assert!(with.contains(&"--include-partial-messages".to_string()));
    }
}
