//! End-to-end tests for the builder -> validator -> executor pipeline.
//!
//! Interpreter behavior is simulated with in-process runners; the process
//! tests use `sh` as a stand-in interpreter and only run on Unix.

mod common;

use async_trait::async_trait;
use jxa_core::{
    ErrorKind, ExecutionError, ExecutionOptions, RawOutput, ScriptBuilder, ScriptExecutor,
    ScriptRunner, validator,
};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Returns the same output on every call and counts invocations.
struct CountingRunner {
    calls: AtomicUsize,
    output: RawOutput,
}

impl CountingRunner {
    fn new(exit_code: i32, stdout: &str, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            output: RawOutput {
                exit_code: Some(exit_code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptRunner for CountingRunner {
    async fn run(&self, _path: &Path, _timeout: Duration) -> Result<RawOutput, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Returns the script file's content as a JSON string, without executing it.
struct EchoRunner;

#[async_trait]
impl ScriptRunner for EchoRunner {
    async fn run(&self, path: &Path, _timeout: Duration) -> Result<RawOutput, ExecutionError> {
        let program = std::fs::read_to_string(path).expect("script file exists during run");
        Ok(RawOutput {
            exit_code: Some(0),
            stdout: serde_json::to_string(&program).unwrap(),
            stderr: String::new(),
        })
    }
}

/// Records the paths it was given and whether they existed at run time.
struct RecordingRunner {
    paths: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl ScriptRunner for RecordingRunner {
    async fn run(&self, path: &Path, _timeout: Duration) -> Result<RawOutput, ExecutionError> {
        assert!(path.exists());
        self.paths.lock().unwrap().push(path.to_path_buf());
        Ok(RawOutput {
            exit_code: Some(0),
            stdout: r#"{"success":true}"#.into(),
            stderr: String::new(),
        })
    }
}

/// Fails with a transient error until the given attempt, then succeeds.
struct FlakyRunner {
    calls: AtomicUsize,
    succeed_on: usize,
}

#[async_trait]
impl ScriptRunner for FlakyRunner {
    async fn run(&self, _path: &Path, _timeout: Duration) -> Result<RawOutput, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.succeed_on {
            Ok(RawOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "execution error: Error: Application isn't running. (-600)".into(),
            })
        } else {
            Ok(RawOutput {
                exit_code: Some(0),
                stdout: r#"{"success":true,"attempt":3}"#.into(),
                stderr: String::new(),
            })
        }
    }
}

fn fast_options(retries: u32) -> ExecutionOptions {
    ExecutionOptions::default()
        .with_retries(retries)
        .with_retry_delay(Duration::from_millis(1))
}

fn executor_in(runner: Arc<dyn ScriptRunner>, dir: &tempfile::TempDir) -> ScriptExecutor {
    ScriptExecutor::new(runner).with_temp_dir(dir.path())
}

fn dir_is_empty(dir: &tempfile::TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn test_escaped_variable_survives_rendering() {
    let original = "O'Brien \"the great\"";
    let mut builder = ScriptBuilder::new("DEVONthink");
    builder.add_variable("name", original).unwrap();
    builder
        .add_try_catch(&ScriptBuilder::success_block(&[("name", "name")]), None)
        .unwrap();
    let script = builder.build();
    assert!(builder.validate().valid);

    let dir = tempfile::tempdir().unwrap();
    let executor = executor_in(Arc::new(EchoRunner), &dir);
    let echoed = executor
        .execute_json(&script, &fast_options(0))
        .await
        .unwrap();
    let echoed = echoed.as_str().unwrap();

    assert_eq!(echoed, script);
    let line = echoed
        .lines()
        .find(|l| l.trim_start().starts_with("var name = "))
        .unwrap();
    assert_eq!(line.trim(), r#"var name = "O'Brien \"the great\"";"#);
    let literal = line
        .trim()
        .trim_start_matches("var name = ")
        .trim_end_matches(';');
    assert_eq!(common::decode_literal(literal), original);
    assert!(dir_is_empty(&dir));
}

#[test]
fn test_regex_round_trip() {
    let pattern = r"^\d+\.|^\*\*.*\*\*$";
    let mut builder = ScriptBuilder::new("DEVONthink");
    builder.add_regex_pattern("heading", pattern, None).unwrap();
    let script = builder.build();

    let extractor = regex::Regex::new(r#"new RegExp\("((?:[^"\\]|\\.)*)", """#).unwrap();
    let body = extractor
        .captures(&script)
        .and_then(|c| c.get(1))
        .unwrap()
        .as_str();
    let reconstructed = common::decode_js_string(body);
    assert_eq!(reconstructed, pattern);

    let re = regex::Regex::new(&reconstructed).unwrap();
    assert!(re.is_match("1. intro"));
    assert!(re.is_match("**bold heading**"));
    assert!(!re.is_match("plain text"));
    assert!(validator::validate(&script).warnings.is_empty());
}

#[tokio::test]
async fn test_app_not_running_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(
        1,
        "",
        "/tmp/x.js: execution error: Error: DEVONthink is not running (-600)",
    );
    let executor = executor_in(runner.clone(), &dir);

    let err = executor
        .execute_json("(function() {})();", &fast_options(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AppNotRunning);
    assert_eq!(runner.calls(), 3);
    assert!(dir_is_empty(&dir));
}

#[tokio::test]
async fn test_reported_not_running_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(
        0,
        r#"{"success":false,"error":"Error: Application not running"}"#,
        "",
    );
    let executor = executor_in(runner.clone(), &dir);

    let err = executor
        .execute_json("(function() {})();", &fast_options(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AppNotRunning);
    assert_eq!(runner.calls(), 3);
}

#[tokio::test]
async fn test_parse_error_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(0, r#"{"success": false, "error": "#, "");
    let executor = executor_in(runner.clone(), &dir);

    let err = executor
        .execute_json("(function() {})();", &fast_options(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_script_error_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(
        1,
        "",
        "execution error: Error: TypeError: undefined is not an object (-2700)",
    );
    let executor = executor_in(runner.clone(), &dir);

    let err = executor
        .execute_json("(function() {})();", &fast_options(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ScriptError);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FlakyRunner {
        calls: AtomicUsize::new(0),
        succeed_on: 3,
    });
    let executor = executor_in(runner.clone(), &dir);

    let value = executor
        .execute_json("(function() {})();", &fast_options(2))
        .await
        .unwrap();
    assert_eq!(value, json!({"success": true, "attempt": 3}));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_typed_execution() {
    #[derive(Debug, Deserialize)]
    struct Payload {
        success: bool,
        count: u32,
    }

    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(0, r#"{"success":true,"count":7}"#, "");
    let executor = executor_in(runner, &dir);
    let payload: Payload = executor
        .execute("(function() {})();", &fast_options(0))
        .await
        .unwrap();
    assert!(payload.success);
    assert_eq!(payload.count, 7);

    let runner = CountingRunner::new(0, r#"{"success":true}"#, "");
    let executor = executor_in(runner, &dir);
    let err = executor
        .execute::<Payload>("(function() {})();", &fast_options(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[tokio::test]
async fn test_run_checked_blocks_invalid_script() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(0, r#"{"success":true}"#, "");
    let executor = executor_in(runner.clone(), &dir);

    let err = executor
        .run_checked("(function() { return eval(\"1\"); })();", &fast_options(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ScriptError);
    assert!(err.message.contains("Dynamic code evaluation"));
    assert_eq!(runner.calls(), 0);

    let ok = executor
        .run_checked("(function() { return 1; })();", &fast_options(2))
        .await
        .unwrap();
    assert_eq!(ok["success"], true);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_debug_retains_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner {
        paths: Mutex::new(Vec::new()),
    });
    let executor = executor_in(runner.clone(), &dir);

    executor
        .execute_json("(function() {})();", &fast_options(0).with_debug(true))
        .await
        .unwrap();
    executor
        .execute_json("(function() {})();", &fast_options(0))
        .await
        .unwrap();

    let paths = runner.paths.lock().unwrap().clone();
    assert_eq!(paths.len(), 2);
    assert_ne!(paths[0], paths[1]);
    assert!(paths[0].exists(), "debug run should keep its script file");
    assert_eq!(
        std::fs::read_to_string(&paths[0]).unwrap(),
        "(function() {})();"
    );
    assert!(!paths[1].exists(), "normal run should remove its script file");
}

#[tokio::test]
async fn test_unwritable_temp_dir_is_file_system_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CountingRunner::new(0, r#"{"success":true}"#, "");
    let executor = ScriptExecutor::new(runner.clone()).with_temp_dir(dir.path().join("missing"));

    let err = executor
        .execute_json("(function() {})();", &fast_options(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileSystemError);
    assert_eq!(runner.calls(), 0);
    assert!(dir_is_empty(&dir));
}

#[cfg(unix)]
mod process {
    use super::*;
    use jxa_core::ProcessRunner;

    fn sh_executor(dir: &tempfile::TempDir) -> ScriptExecutor {
        ScriptExecutor::new(Arc::new(ProcessRunner::new("sh", Vec::new())))
            .with_temp_dir(dir.path())
    }

    #[tokio::test]
    async fn test_process_success() {
        let dir = tempfile::tempdir().unwrap();
        let value = sh_executor(&dir)
            .execute_json(
                "printf '%s' '{\"success\":true,\"value\":3}'\n",
                &fast_options(0),
            )
            .await
            .unwrap();
        assert_eq!(value, json!({"success": true, "value": 3}));
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_process_script_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh_executor(&dir)
            .execute_json(
                "echo 'execution error: Error: SyntaxError: Unexpected EOF (-2700)' >&2\nexit 1\n",
                &fast_options(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScriptError);
        assert_eq!(
            err.message,
            "The script raised an error: SyntaxError: Unexpected EOF"
        );
        assert!(err.stderr.unwrap().contains("(-2700)"));
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_process_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let options = fast_options(2).with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let err = sh_executor(&dir)
            .execute_json("exec sleep 5\n", &options)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_timeout_covers_background_pipe_holder() {
        let dir = tempfile::tempdir().unwrap();
        let options = fast_options(0).with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = sh_executor(&dir)
            .execute_json("sleep 3 &\nprintf '%s' '{\"success\":true}'\n", &options)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_file_system_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptExecutor::new(Arc::new(ProcessRunner::new(
            "jxa-bridge-no-such-interpreter",
            Vec::new(),
        )))
        .with_temp_dir(dir.path());
        let err = executor
            .execute_json("(function() {})();", &fast_options(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileSystemError);
        assert!(dir_is_empty(&dir));
    }
}
