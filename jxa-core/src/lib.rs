//! # jxa-core
//!
//! Core library for jxa-bridge.
//! Generates JavaScript for Automation programs from typed parts, checks them
//! for constructs that break the interpreter or the result protocol, and runs
//! them out-of-process with timeout, failure classification, and retry.

pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod types;
pub mod validator;

// Re-export commonly used types at the crate root.
pub use builder::ScriptBuilder;
pub use config::{BridgeConfig, config_exists, load_config};
pub use error::{BuildError, ConfigError, ErrorKind, ExecutionError, ToolError};
pub use executor::{ExecutionOptions, ProcessRunner, RawOutput, ScriptExecutor, ScriptRunner};
pub use formatter::ValueKind;
pub use types::{RiskLevel, ToolDefinition, ToolOutput};
pub use validator::{
    QuickValidation, ResultChannel, ScriptValidator, Severity, ValidationIssue, ValidationResult,
};
