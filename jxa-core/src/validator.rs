//! Static validation of generated JXA programs.
//!
//! The validator works on pattern matching, not a grammar. It can miss real
//! problems and it can flag text inside comments or string literals (the
//! word `eval(` in a string trips the dangerous-construct check). Error-level
//! checks lean toward false positives; callers that know a script is safe can
//! skip validation or downgrade the result themselves.
//!
//! Checks, in order:
//! 1. dynamic code evaluation (`eval`, `new Function`) - error
//! 2. writes to stdout when stdout carries the result - error
//! 3. colon-keyed object literals after `return` or in an initializer - error
//! 4. template-literal markers - error
//! 5. called-but-undefined functions - warning
//! 6. under- or double-escaped `RegExp` string arguments - warning
//!
//! [`ScriptValidator::quick_validate`] runs checks 1-4 only.

use crate::builder::excerpt_around;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Names the interpreter or host provides without a definition in the script.
const KNOWN_GLOBALS: &[&str] = &[
    "$",
    "Application",
    "Array",
    "Boolean",
    "Date",
    "Error",
    "JSON",
    "Library",
    "Map",
    "Math",
    "Number",
    "ObjC",
    "Object",
    "Path",
    "Progress",
    "Promise",
    "RangeError",
    "Ref",
    "RegExp",
    "Set",
    "String",
    "Symbol",
    "TypeError",
    "decodeURI",
    "decodeURIComponent",
    "delay",
    "encodeURI",
    "encodeURIComponent",
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
];

/// Words followed by `(` that are not function calls.
const KEYWORDS: &[&str] = &[
    "catch",
    "delete",
    "do",
    "else",
    "for",
    "function",
    "if",
    "in",
    "instanceof",
    "new",
    "return",
    "switch",
    "throw",
    "typeof",
    "void",
    "while",
    "with",
];

/// Characters that only make sense after a backslash in a regex.
const REGEX_ESCAPES: &str = "dDwWsSbB.*+?()[]{}|^$/-123456789";

/// Characters a single backslash legitimately escapes in a string literal.
const STRING_ESCAPES: &str = "\"'\\nrtfv0ux\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Suggestion,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    /// The offending excerpt, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// 1-based line number of the excerpt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// Aggregated findings of a full validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True iff there are no errors.
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub suggestions: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
            Severity::Suggestion => self.suggestions.push(issue),
        }
    }

    /// No errors and no warnings.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Error messages joined into one line.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| match issue.line {
                Some(line) => format!("{} (line {line})", issue.message),
                None => issue.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Result of [`ScriptValidator::quick_validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Which channel carries the script's result back to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultChannel {
    /// The host parses stdout as the sole result channel; incidental writes
    /// to it corrupt the result.
    #[default]
    Stdout,
    /// The result travels elsewhere; console output is harmless.
    Other,
}

struct Patterns {
    eval: Regex,
    new_function: Regex,
    console: Regex,
    stdout_handle: Regex,
    return_literal: Regex,
    initializer_literal: Regex,
    stringify_literal: Regex,
    call: Regex,
    function_def: Regex,
    binding_def: Regex,
    function_params: Regex,
    regexp_ctor: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            eval: Regex::new(r"\beval\s*\(")?,
            new_function: Regex::new(r"\bnew\s+Function\s*\(")?,
            console: Regex::new(r"\bconsole\s*\.\s*(?:log|info|warn|error|debug|trace)\s*\(")?,
            stdout_handle: Regex::new(r"fileHandleWithStandardOutput")?,
            return_literal: Regex::new(r#"\breturn\s*\{\s*["']?[A-Za-z_$][\w$]*["']?\s*:"#)?,
            initializer_literal: Regex::new(
                r#"\b(?:var|let|const)\s+[A-Za-z_$][\w$]*\s*=\s*\{\s*["']?[A-Za-z_$][\w$]*["']?\s*:"#,
            )?,
            stringify_literal: Regex::new(
                r#"JSON\.stringify\(\s*\{\s*["']?[A-Za-z_$][\w$]*["']?\s*:"#,
            )?,
            call: Regex::new(r"([A-Za-z_$][\w$]*)\s*\(")?,
            function_def: Regex::new(r"\bfunction\s+([A-Za-z_$][\w$]*)")?,
            binding_def: Regex::new(r"\b(?:var|let|const)\s+([A-Za-z_$][\w$]*)")?,
            function_params: Regex::new(r"\bfunction\b[^(]*\(([^)]*)\)")?,
            regexp_ctor: Regex::new(
                r#"new\s+RegExp\s*\(\s*(?:"((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)')"#,
            )?,
        })
    }
}

/// Pattern-based pre-flight checker for generated scripts.
pub struct ScriptValidator {
    result_channel: ResultChannel,
    patterns: Result<Patterns, regex::Error>,
}

impl ScriptValidator {
    pub fn new(result_channel: ResultChannel) -> Self {
        Self {
            result_channel,
            patterns: Patterns::compile(),
        }
    }

    /// Run every check. Never panics; internal failures become warnings.
    pub fn validate(&self, script: &str) -> ValidationResult {
        let mut result = ValidationResult::default();
        match &self.patterns {
            Ok(patterns) => {
                for issue in self.cheap_checks(patterns, script) {
                    result.push(issue);
                }
                for issue in check_dependencies(patterns, script) {
                    result.push(issue);
                }
                for issue in check_regex_escaping(patterns, script) {
                    result.push(issue);
                }
                for issue in check_contract(script) {
                    result.push(issue);
                }
            }
            Err(e) => result.push(internal_warning(e)),
        }
        result.valid = result.errors.is_empty();
        debug!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            suggestions = result.suggestions.len(),
            "Validated script"
        );
        result
    }

    /// Run only the cheap, high-confidence checks (1-4).
    pub fn quick_validate(&self, script: &str) -> QuickValidation {
        let issues = match &self.patterns {
            Ok(patterns) => self
                .cheap_checks(patterns, script)
                .into_iter()
                .filter(|issue| issue.severity == Severity::Error)
                .map(|issue| match issue.line {
                    Some(line) => format!("{} (line {line})", issue.message),
                    None => issue.message,
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "Validator patterns unavailable");
                Vec::new()
            }
        };
        QuickValidation {
            valid: issues.is_empty(),
            issues,
        }
    }

    fn cheap_checks(&self, patterns: &Patterns, script: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for re in [&patterns.eval, &patterns.new_function] {
            for m in re.find_iter(script) {
                issues.push(issue_at(
                    Severity::Error,
                    "Dynamic code evaluation is not allowed in generated scripts",
                    script,
                    m.start(),
                ));
            }
        }

        if self.result_channel == ResultChannel::Stdout {
            for re in [&patterns.console, &patterns.stdout_handle] {
                for m in re.find_iter(script) {
                    issues.push(issue_at(
                        Severity::Error,
                        "Script writes to stdout, which carries the result; remove the output call",
                        script,
                        m.start(),
                    ));
                }
            }
        }

        for re in [&patterns.return_literal, &patterns.initializer_literal] {
            for m in re.find_iter(script) {
                issues.push(issue_at(
                    Severity::Error,
                    "Object literal syntax is unreliable in JXA; use bracket notation (obj[\"key\"] = value)",
                    script,
                    m.start(),
                ));
                issues.push(issue_at(
                    Severity::Suggestion,
                    "Declare `var obj = {};` and assign each property with obj[\"key\"] = value",
                    script,
                    m.start(),
                ));
            }
        }
        for m in patterns.stringify_literal.find_iter(script) {
            issues.push(issue_at(
                Severity::Warning,
                "Object literal passed to JSON.stringify; prefer a bracket-notation object",
                script,
                m.start(),
            ));
        }

        for (offset, _) in script.match_indices('`') {
            issues.push(issue_at(
                Severity::Error,
                "Template literal backtick found; pass dynamic values as variables",
                script,
                offset,
            ));
        }
        for (offset, _) in script.match_indices("${") {
            issues.push(issue_at(
                Severity::Error,
                "Template interpolation marker '${' found; pass dynamic values as variables",
                script,
                offset,
            ));
        }

        issues
    }
}

impl Default for ScriptValidator {
    fn default() -> Self {
        Self::new(ResultChannel::default())
    }
}

/// Validate with default settings.
pub fn validate(script: &str) -> ValidationResult {
    ScriptValidator::default().validate(script)
}

/// Quick-validate with default settings.
pub fn quick_validate(script: &str) -> QuickValidation {
    ScriptValidator::default().quick_validate(script)
}

fn check_dependencies(patterns: &Patterns, script: &str) -> Vec<ValidationIssue> {
    let mut defined: BTreeSet<&str> = BTreeSet::new();
    for caps in patterns.function_def.captures_iter(script) {
        if let Some(name) = caps.get(1) {
            defined.insert(name.as_str());
        }
    }
    for caps in patterns.binding_def.captures_iter(script) {
        if let Some(name) = caps.get(1) {
            defined.insert(name.as_str());
        }
    }
    for caps in patterns.function_params.captures_iter(script) {
        if let Some(params) = caps.get(1) {
            defined.extend(
                params
                    .as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty()),
            );
        }
    }

    let mut reported: BTreeSet<&str> = BTreeSet::new();
    let mut issues = Vec::new();
    for caps in patterns.call.captures_iter(script) {
        let Some(name) = caps.get(1) else { continue };
        let preceding = script[..name.start()].trim_end().chars().last();
        if preceding == Some('.') {
            continue;
        }
        let ident = name.as_str();
        if KEYWORDS.contains(&ident)
            || KNOWN_GLOBALS.contains(&ident)
            || defined.contains(ident)
            || !reported.insert(ident)
        {
            continue;
        }
        issues.push(issue_at(
            Severity::Warning,
            &format!("Function '{ident}' is called but not defined in the script"),
            script,
            name.start(),
        ));
    }
    issues
}

fn check_regex_escaping(patterns: &Patterns, script: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for caps in patterns.regexp_ctor.captures_iter(script) {
        let Some(literal) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let text = literal.as_str();
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] != '\\' {
                i += 1;
                continue;
            }
            let run = chars[i..].iter().take_while(|c| **c == '\\').count();
            let Some(&next) = chars.get(i + run) else { break };

            if run % 2 == 1 && !STRING_ESCAPES.contains(next) && REGEX_ESCAPES.contains(next) {
                let fixed = format!("{}\\\\{next}", "\\".repeat(run - 1));
                issues.push(ValidationIssue {
                    severity: Severity::Warning,
                    message: format!(
                        "RegExp string argument contains '\\{next}', which loses its backslash inside a string literal; use '\\\\{next}'"
                    ),
                    code: Some(format!("{}{next} -> {fixed}", "\\".repeat(run))),
                    line: Some(line_of(script, literal.start())),
                });
            } else if run >= 4 && run % 2 == 0 && REGEX_ESCAPES.contains(next) {
                issues.push(ValidationIssue {
                    severity: Severity::Warning,
                    message: format!(
                        "RegExp string argument may be double-escaped before '{next}'; the regex will match a literal backslash"
                    ),
                    code: Some(format!("{}{next} -> \\\\{next}", "\\".repeat(run))),
                    line: Some(line_of(script, literal.start())),
                });
            }
            i += run + 1;
        }
    }
    issues
}

/// Suggestions for the failure-reporting contract every script should honor.
fn check_contract(script: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if !script.contains("try {") && !script.contains("try{") {
        issues.push(ValidationIssue {
            severity: Severity::Suggestion,
            message: "Wrap the script body in try/catch and return a { success: false } payload on error".into(),
            code: None,
            line: None,
        });
    }
    if !script.contains("JSON.stringify") {
        issues.push(ValidationIssue {
            severity: Severity::Suggestion,
            message: "Return the result through JSON.stringify so the host can parse it".into(),
            code: None,
            line: None,
        });
    }
    issues
}

fn issue_at(severity: Severity, message: &str, script: &str, offset: usize) -> ValidationIssue {
    ValidationIssue {
        severity,
        message: message.to_string(),
        code: Some(excerpt_around(script, offset)),
        line: Some(line_of(script, offset)),
    }
}

fn internal_warning(e: &regex::Error) -> ValidationIssue {
    ValidationIssue {
        severity: Severity::Warning,
        message: format!("Validator internal error, checks skipped: {e}"),
        code: None,
        line: None,
    }
}

fn line_of(script: &str, offset: usize) -> usize {
    script[..offset].matches('\n').count() + 1
}
