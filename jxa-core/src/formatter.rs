//! Safe-value formatting: turns JSON values into JavaScript source text.
//!
//! Strings are sanitized before escaping. Control characters are rejected
//! with an error instead of being stripped, since a silent strip would alter
//! user data without anyone noticing.
//!
//! Objects are never emitted as colon-keyed literals. They are built by an
//! immediately-invoked function that assigns every key with bracket notation,
//! because the JXA interpreter mis-parses literal syntax in some positions
//! (notably `return { ... }`).

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a value should be rendered into the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Null,
    /// Inserted verbatim. The caller is responsible for its validity.
    Raw,
}

impl ValueKind {
    /// The kind a JSON value renders as when none is given explicitly.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            // Composite values still go through the structural formatter.
            Value::Array(_) | Value::Object(_) => ValueKind::String,
        }
    }
}

/// Check a name against the JavaScript identifier grammar this crate accepts:
/// a letter, `_` or `$`, followed by alphanumerics, `_` or `$`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Reserved words, plus the globals and handle every generated script uses.
const RESERVED_IDENTIFIERS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "arguments",
    "eval", "undefined", "NaN", "Infinity", "Application", "JSON", "RegExp", "String",
    crate::builder::APP_HANDLE,
];

/// Whether a name would shadow a keyword or a binding the script relies on.
pub fn is_reserved_identifier(name: &str) -> bool {
    RESERVED_IDENTIFIERS.contains(&name)
}

/// Validate an identifier for use as a declared name.
pub fn require_identifier(name: &str) -> Result<(), BuildError> {
    if !is_valid_identifier(name) {
        return Err(BuildError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    if is_reserved_identifier(name) {
        return Err(BuildError::ReservedIdentifier {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Reject strings containing C0 control characters.
///
/// Tab, line feed and carriage return are allowed; they are escaped later.
pub fn sanitize(s: &str, context: &str) -> Result<(), BuildError> {
    for (position, c) in s.chars().enumerate() {
        if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') {
            return Err(BuildError::UnsafeCharacter {
                context: context.to_string(),
                code_point: c as u32,
                position,
            });
        }
    }
    Ok(())
}

/// Escape text for the inside of a double-quoted JavaScript string.
///
/// Total: any control character that got past sanitization becomes a
/// `\uXXXX` escape rather than raw bytes in the script. Template markers
/// (a backtick, or `$` before `{`) are escaped as well, so user data never
/// trips the validator's template check.
pub fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            '`' => out.push_str("\\u0060"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\u0024"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Wrap already-trusted text in double quotes, escaping as needed.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape_str(s))
}

/// Sanitize and quote a user-supplied string.
pub fn format_string(s: &str) -> Result<String, BuildError> {
    sanitize(s, "string value")?;
    Ok(quote(s))
}

/// Render a JSON value as a JavaScript expression.
pub fn format_value(value: &Value) -> Result<String, BuildError> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => format_string(s),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(format_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Object(map) => object_expression(map.iter()),
    }
}

/// Render a value coerced to an explicit kind.
pub fn format_as(value: &Value, kind: ValueKind) -> Result<String, BuildError> {
    match kind {
        ValueKind::Null => Ok("null".to_string()),
        ValueKind::Raw => match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(BuildError::UnsupportedValue {
                reason: format!("raw kind requires a string expression, got {other}"),
            }),
        },
        ValueKind::Boolean => match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(BuildError::UnsupportedValue {
                reason: format!("expected a boolean, got {other}"),
            }),
        },
        ValueKind::Number => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) => {
                let parsed: f64 = s.trim().parse().map_err(|_| BuildError::UnsupportedValue {
                    reason: format!("'{s}' is not a number"),
                })?;
                serde_json::Number::from_f64(parsed)
                    .map(|n| n.to_string())
                    .ok_or_else(|| BuildError::UnsupportedValue {
                        reason: format!("'{s}' is not a finite number"),
                    })
            }
            other => Err(BuildError::UnsupportedValue {
                reason: format!("expected a number, got {other}"),
            }),
        },
        ValueKind::String => match value {
            Value::String(s) => format_string(s),
            Value::Array(_) | Value::Object(_) => format_value(value),
            Value::Null => Ok("null".to_string()),
            other => format_string(&other.to_string()),
        },
    }
}

/// Build an object through bracket-notation assignment inside an IIFE.
///
/// `{"a": 1}` renders as `(function() { var obj = {}; obj["a"] = 1; return obj; })()`.
pub fn object_expression<'a, I>(entries: I) -> Result<String, BuildError>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut out = String::from("(function() { var obj = {};");
    for (key, value) in entries {
        sanitize(key, "object key")?;
        out.push_str(&format!(" obj[{}] = {};", quote(key), format_value(value)?));
    }
    out.push_str(" return obj; })()");
    Ok(out)
}
