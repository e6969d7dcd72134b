//! Integration tests against the real `osascript` interpreter.
//!
//! Gated by `#[cfg(target_os = "macos")]` so they only run on macOS. They
//! target Finder, which is always running in a desktop session.

#[cfg(target_os = "macos")]
mod macos_integration {
    use jxa_core::config::BridgeConfig;
    use jxa_core::{ErrorKind, ExecutionOptions, ScriptBuilder, ScriptExecutor};
    use jxa_tools::{ToolContext, ToolRegistry, register_builtin_tools};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn finder_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.application.name = "Finder".to_string();
        config.execution.retries = 0;
        config
    }

    #[tokio::test]
    async fn test_built_script_round_trips_through_osascript() {
        let config = finder_config();
        let executor = ScriptExecutor::from_config(&config);
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_variable("name", "O'Brien \"the great\"\ttab")
            .unwrap()
            .add_regex_pattern("heading", r"^\d+\.", None)
            .unwrap()
            .add_try_catch(
                &ScriptBuilder::success_block(&[
                    ("name", "name"),
                    ("matches", "heading.test(\"1. intro\")"),
                ]),
                None,
            )
            .unwrap();

        let value = executor
            .run_checked(&builder.build(), &ExecutionOptions::from(&config.execution))
            .await
            .unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["name"], "O'Brien \"the great\"\ttab");
        assert_eq!(value["matches"], true);
    }

    #[tokio::test]
    async fn test_thrown_error_is_reported_in_payload() {
        let config = finder_config();
        let executor = ScriptExecutor::from_config(&config);
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_try_catch("throw new Error(\"boom\");", None)
            .unwrap();

        let value = executor
            .execute_json(&builder.build(), &ExecutionOptions::from(&config.execution))
            .await
            .unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Error: boom");
    }

    #[tokio::test]
    async fn test_syntax_error_is_script_error() {
        let config = finder_config();
        let executor = ScriptExecutor::from_config(&config);
        let err = executor
            .execute_json(
                "(function() { return ; ) })();",
                &ExecutionOptions::from(&config.execution),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScriptError);
    }

    #[tokio::test]
    async fn test_is_running_tool() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(
            &mut registry,
            Arc::new(ToolContext::from_config(&finder_config())),
        );
        let output = registry.execute("is_running", json!({})).await.unwrap();
        assert!(!output.is_error(), "is_running failed: {}", output.content);
        let payload: Value = serde_json::from_str(&output.content).unwrap();
        assert_eq!(payload["running"], true);
    }
}
