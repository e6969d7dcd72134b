//! Error types for jxa-bridge.
//!
//! Uses `thiserror` for public API error types. Builder errors are programmer
//! errors raised at script-construction time; execution errors are runtime
//! conditions classified into a closed taxonomy before they reach callers.

use serde::{Deserialize, Serialize};

/// Errors raised while assembling a script.
///
/// These indicate a defect in the calling code and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid identifier '{name}': must start with a letter, '_' or '$' and contain only alphanumerics, '_' or '$'")]
    InvalidIdentifier { name: String },

    #[error("Identifier '{name}' is reserved or already used by the generated script")]
    ReservedIdentifier { name: String },

    #[error("Unsafe character U+{code_point:04X} at position {position} in {context}")]
    UnsafeCharacter {
        context: String,
        code_point: u32,
        position: usize,
    },

    #[error("Template literal marker found in code block: {excerpt}")]
    TemplateLiteral { excerpt: String },

    #[error("Invalid regular expression flags '{flags}'")]
    InvalidRegexFlags { flags: String },

    #[error("Unsupported value: {reason}")]
    UnsupportedValue { reason: String },
}

/// Closed taxonomy of execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The target application is not running or could not be found.
    AppNotRunning,
    /// The generated program raised an exception or failed to compile.
    ScriptError,
    /// The interpreter succeeded but its output was not valid structured data.
    ParseError,
    /// The interpreter did not finish within the configured timeout.
    Timeout,
    /// A file could not be written, read, or accessed.
    FileSystemError,
    /// Anything that matched no other signature.
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed on an unchanged retry.
    ///
    /// `Timeout` is not transient here; callers opt in through the retry policy.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::AppNotRunning | ErrorKind::Unknown)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::AppNotRunning => write!(f, "app_not_running"),
            ErrorKind::ScriptError => write!(f, "script_error"),
            ErrorKind::ParseError => write!(f, "parse_error"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::FileSystemError => write!(f, "file_system_error"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified execution failure.
///
/// Raw interpreter output is kept for debugging but left out of `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stderr: None,
            stdout: None,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        if !stdout.is_empty() {
            self.stdout = Some(stdout);
        }
        self
    }
}

/// Errors from tool registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Tool already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}
