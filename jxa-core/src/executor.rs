//! Script execution: temp-file persistence, interpreter spawn, timeout,
//! failure classification, and retry.
//!
//! Each attempt writes the program to a uniquely named file and hands only
//! the path to the interpreter, so the script never passes through shell
//! quoting or argument-length limits. The file is removed on every exit path
//! unless debug retention is requested.
//!
//! Retry policy: `AppNotRunning` and `Unknown` are retried up to
//! `retries` times; `ScriptError`, `ParseError` and `FileSystemError` never
//! are; `Timeout` only when `retry_on_timeout` is set.

use crate::config::{BridgeConfig, ExecutionConfig, ValidationConfig, ValidationMode};
use crate::error::{ErrorKind, ExecutionError};
use crate::validator::ScriptValidator;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const APP_NOT_RUNNING_SIGNATURES: &[&str] = &[
    "not running",
    "isn't running",
    "not found",
    "can't be found",
    "connection is invalid",
    "(-600)",
    "(-609)",
];

const FILE_SYSTEM_SIGNATURES: &[&str] = &[
    "enoent",
    "eacces",
    "no such file",
    "permission denied",
    "operation not permitted",
    "read-only file system",
    "(-43)",
    "(-54)",
    "(-5000)",
];

const SCRIPT_ERROR_SIGNATURES: &[&str] = &[
    "syntaxerror",
    "syntax error",
    "referenceerror",
    "typeerror",
    "rangeerror",
    "execution error",
    "uncaught",
    "(-2700)",
    "(-2753)",
];

/// Per-call execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    pub retry_delay: Duration,
    pub retry_on_timeout: bool,
    /// Keep the temp file and log its path.
    pub debug: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ExecutionOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_on_timeout: config.retry_on_timeout,
            debug: config.debug,
        }
    }
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn should_retry(&self, kind: ErrorKind) -> bool {
        kind.is_transient() || (kind == ErrorKind::Timeout && self.retry_on_timeout)
    }
}

/// What the interpreter produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a script file and reports its output.
///
/// Implementations must enforce `timeout` themselves and return a
/// `Timeout`-kind error when it expires.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script_path: &Path, timeout: Duration) -> Result<RawOutput, ExecutionError>;
}

/// Spawns an interpreter process: `<program> <args...> <script path>`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `osascript -l JavaScript <file>`.
    pub fn osascript() -> Self {
        Self::new("osascript", vec!["-l".into(), "JavaScript".into()])
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(
        &self,
        script_path: &Path,
        timeout: Duration,
    ) -> Result<RawOutput, ExecutionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::new(
                    ErrorKind::FileSystemError,
                    format!("Failed to start interpreter '{}': {e}", self.program),
                )
            })?;

        let mut stdout_task = child.stdout.take().map(spawn_reader);
        let mut stderr_task = child.stderr.take().map(spawn_reader);

        // The deadline covers draining the pipes too: a background process
        // started by the script inherits them and can outlive the interpreter.
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await?;
            let stdout = collect(stdout_task.as_mut()).await;
            let stderr = collect(stderr_task.as_mut()).await;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        match finished {
            Ok(Ok((status, stdout, stderr))) => Ok(RawOutput {
                exit_code: status.code(),
                stdout,
                stderr,
            }),
            Ok(Err(e)) => Err(ExecutionError::new(
                ErrorKind::Unknown,
                format!("Failed to wait for interpreter: {e}"),
            )),
            Err(_) => {
                warn!(
                    program = %self.program,
                    timeout_ms = timeout.as_millis() as u64,
                    "Interpreter timed out, killing process"
                );
                // The interpreter may have exited while a background process
                // still held its pipes.
                if !matches!(child.try_wait(), Ok(Some(_))) {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed-out interpreter");
                    }
                }
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                Err(ExecutionError::new(
                    ErrorKind::Timeout,
                    format!("Script did not finish within {}ms", timeout.as_millis()),
                ))
            }
        }
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(task: Option<&mut JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(handle) => handle
            .await
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default(),
        None => String::new(),
    }
}

/// Removes the temporary script when dropped, unless retained for debugging.
struct TempScript {
    path: PathBuf,
    retain: bool,
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if self.retain {
            warn!(path = %self.path.display(), "Retaining script file for debugging");
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove script file");
            }
        }
    }
}

/// Executes scripts through a [`ScriptRunner`] with classification and retry.
pub struct ScriptExecutor {
    runner: Arc<dyn ScriptRunner>,
    temp_dir: PathBuf,
    validation: ValidationConfig,
    validator: ScriptValidator,
}

impl ScriptExecutor {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        let validation = ValidationConfig::default();
        Self {
            runner,
            temp_dir: std::env::temp_dir(),
            validator: ScriptValidator::new(validation.result_channel),
            validation,
        }
    }

    /// Build an executor with the configured interpreter, temp dir, and validation.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let runner = ProcessRunner::new(
            config.application.interpreter.clone(),
            config.application.interpreter_args.clone(),
        );
        let mut executor = Self::new(Arc::new(runner)).with_validation(config.validation.clone());
        if let Some(dir) = &config.execution.temp_dir {
            executor = executor.with_temp_dir(dir.clone());
        }
        executor
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validator = ScriptValidator::new(validation.result_channel);
        self.validation = validation;
        self
    }

    /// Execute and deserialize the result into `T`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        script: &str,
        options: &ExecutionOptions,
    ) -> Result<T, ExecutionError> {
        let value = self.execute_json(script, options).await?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ExecutionError::new(
                ErrorKind::ParseError,
                format!("Script result has an unexpected shape: {e}"),
            )
            .with_stdout(value.to_string())
        })
    }

    /// Validate according to the configured mode, then execute.
    ///
    /// Validation failures surface as `ScriptError` without spawning anything.
    pub async fn run_checked(
        &self,
        script: &str,
        options: &ExecutionOptions,
    ) -> Result<Value, ExecutionError> {
        if self.validation.enabled {
            self.preflight(script)?;
        }
        self.execute_json(script, options).await
    }

    fn preflight(&self, script: &str) -> Result<(), ExecutionError> {
        match self.validation.mode {
            ValidationMode::Quick => {
                let quick = self.validator.quick_validate(script);
                if !quick.valid {
                    return Err(ExecutionError::new(
                        ErrorKind::ScriptError,
                        format!("Script failed validation: {}", quick.issues.join("; ")),
                    ));
                }
            }
            ValidationMode::Full => {
                let result = self.validator.validate(script);
                if !result.valid {
                    return Err(ExecutionError::new(
                        ErrorKind::ScriptError,
                        format!("Script failed validation: {}", result.error_summary()),
                    ));
                }
                if self.validation.fail_on_warnings && !result.warnings.is_empty() {
                    let messages: Vec<&str> =
                        result.warnings.iter().map(|w| w.message.as_str()).collect();
                    return Err(ExecutionError::new(
                        ErrorKind::ScriptError,
                        format!("Script has validation warnings: {}", messages.join("; ")),
                    ));
                }
                for warning in &result.warnings {
                    debug!(message = %warning.message, line = ?warning.line, "Validation warning");
                }
            }
        }
        Ok(())
    }

    /// Execute with retries and return the parsed JSON result.
    pub async fn execute_json(
        &self,
        script: &str,
        options: &ExecutionOptions,
    ) -> Result<Value, ExecutionError> {
        let mut last_err = None;
        for attempt in 0..=options.retries {
            match self.attempt(script, options).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !options.should_retry(e.kind) || attempt == options.retries {
                        return Err(e);
                    }
                    warn!(
                        attempt = attempt + 1,
                        max = options.retries,
                        kind = %e.kind,
                        delay_ms = options.retry_delay.as_millis() as u64,
                        "Retrying after transient script failure"
                    );
                    tokio::time::sleep(options.retry_delay).await;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ExecutionError::new(ErrorKind::Unknown, "All retry attempts exhausted")
        }))
    }

    async fn attempt(
        &self,
        script: &str,
        options: &ExecutionOptions,
    ) -> Result<Value, ExecutionError> {
        let path = self.temp_dir.join(temp_file_name());
        // Armed before the write so a partial file is removed too.
        let _guard = TempScript {
            path: path.clone(),
            retain: options.debug,
        };
        tokio::fs::write(&path, script).await.map_err(|e| {
            ExecutionError::new(
                ErrorKind::FileSystemError,
                format!("Failed to write script file: {e}"),
            )
        })?;

        let started = Instant::now();
        info!(path = %path.display(), bytes = script.len(), "Executing script");
        let output = self.runner.run(&path, options.timeout).await?;
        debug!(
            exit_code = ?output.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Interpreter finished"
        );
        classify(&output)
    }
}

/// `jxa-<unix millis>-<random>.js`.
fn temp_file_name() -> String {
    format!(
        "jxa-{}-{}.js",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Classify a diagnostic message by its signature.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let matches_any = |signatures: &[&str]| signatures.iter().any(|s| lower.contains(s));
    if matches_any(APP_NOT_RUNNING_SIGNATURES) {
        ErrorKind::AppNotRunning
    } else if matches_any(FILE_SYSTEM_SIGNATURES) {
        ErrorKind::FileSystemError
    } else if matches_any(SCRIPT_ERROR_SIGNATURES) {
        ErrorKind::ScriptError
    } else {
        ErrorKind::Unknown
    }
}

/// Turn interpreter output into a parsed value or a classified error.
///
/// A successful run whose payload reports `success: false` is returned as a
/// value, except when its error says the application is not running: that
/// case is raised as `AppNotRunning` so it can be retried.
pub fn classify(output: &RawOutput) -> Result<Value, ExecutionError> {
    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();

    if output.success() && !stdout.is_empty() {
        let value: Value = serde_json::from_str(stdout).map_err(|e| {
            ExecutionError::new(
                ErrorKind::ParseError,
                format!("Script output is not valid JSON: {e}"),
            )
            .with_stdout(stdout)
            .with_stderr(stderr)
        })?;
        if !stderr.is_empty() {
            debug!(stderr = %stderr, "Interpreter wrote diagnostics on success");
        }
        if let Some(reported) = reported_failure(&value) {
            if classify_message(reported) == ErrorKind::AppNotRunning {
                return Err(ExecutionError::new(
                    ErrorKind::AppNotRunning,
                    summarize(ErrorKind::AppNotRunning, reported),
                )
                .with_stdout(stdout));
            }
        }
        return Ok(value);
    }

    if output.success() && stderr.is_empty() {
        return Err(ExecutionError::new(
            ErrorKind::ParseError,
            "Script produced no output",
        ));
    }

    let diagnostic = if stderr.is_empty() { stdout } else { stderr };
    let kind = classify_message(diagnostic);
    Err(ExecutionError::new(kind, summarize(kind, diagnostic))
        .with_stderr(stderr)
        .with_stdout(stdout))
}

fn reported_failure(value: &Value) -> Option<&str> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        value.get("error").and_then(Value::as_str)
    } else {
        None
    }
}

/// Caller-facing message: the kind's description plus the cleaned detail.
fn summarize(kind: ErrorKind, diagnostic: &str) -> String {
    let prefix = match kind {
        ErrorKind::AppNotRunning => "The target application is not running or could not be reached",
        ErrorKind::FileSystemError => "A file system operation failed",
        ErrorKind::ScriptError => "The script raised an error",
        ErrorKind::ParseError => "The script output could not be parsed",
        ErrorKind::Timeout => "The script timed out",
        ErrorKind::Unknown => "The script failed",
    };
    let detail = clean_diagnostic(diagnostic);
    if detail.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}: {detail}")
    }
}

/// Strip the interpreter's framing (`<path>: execution error: Error: ... (-2700)`)
/// down to the message itself.
fn clean_diagnostic(diagnostic: &str) -> String {
    let first_line = diagnostic.lines().next().unwrap_or_default().trim();
    let mut detail = match first_line.find("execution error:") {
        Some(pos) => first_line[pos + "execution error:".len()..].trim(),
        None => first_line,
    };
    while let Some(rest) = detail.strip_prefix("Error:") {
        detail = rest.trim_start();
    }
    let detail = match detail.rfind(" (-") {
        Some(pos) if detail.ends_with(')') => &detail[..pos],
        _ => detail,
    };
    detail.trim().to_string()
}
