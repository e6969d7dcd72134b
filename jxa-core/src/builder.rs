//! Script builder: assembles a single JXA program from typed parts.
//!
//! Render order is fixed: bootstrap preamble, variables, regex declarations,
//! named fragments (registration order), code blocks (append order). The
//! whole program is wrapped in one immediately-invoked function so nothing
//! declared inside leaks into the interpreter's global scope.
//!
//! Dynamic content must enter through [`ScriptBuilder::add_variable`] or
//! [`ScriptBuilder::create_object`]. Code blocks containing template-literal
//! markers are rejected outright.
//!
//! Fragments are inserted verbatim and are not checked for dependencies: a
//! fragment that calls a helper must be registered after the fragment that
//! defines it.

use crate::error::BuildError;
use crate::formatter::{self, ValueKind};
use crate::validator::{ScriptValidator, ValidationResult};
use serde_json::Value;
use tracing::debug;

/// Name of the application handle declared by the preamble.
pub const APP_HANDLE: &str = "theApp";

const INDENT: &str = "  ";
const REGEX_FLAGS: &str = "dgimsuy";

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    value: String,
    kind: ValueKind,
}

#[derive(Debug, Clone)]
struct RegexDeclaration {
    name: String,
    pattern: String,
    flags: String,
}

#[derive(Debug, Clone)]
enum Target {
    Named(String),
    Current,
}

/// Accumulates the parts of a JXA program and renders them with [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    target: Target,
    variables: Vec<Variable>,
    regexes: Vec<RegexDeclaration>,
    fragments: Vec<(String, String)>,
    code_blocks: Vec<String>,
}

impl ScriptBuilder {
    /// Create a builder whose preamble acquires the named application.
    pub fn new(application: impl Into<String>) -> Self {
        Self::with_target(Target::Named(application.into()))
    }

    /// Create a builder that targets the interpreter's own process.
    pub fn current_application() -> Self {
        Self::with_target(Target::Current)
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            variables: Vec::new(),
            regexes: Vec::new(),
            fragments: Vec::new(),
            code_blocks: Vec::new(),
        }
    }

    /// Declare a variable holding a safely formatted value.
    ///
    /// Re-declaring a name replaces its value but keeps its original position.
    pub fn add_variable(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, BuildError> {
        let value = value.into();
        let kind = ValueKind::infer(&value);
        self.add_variable_as(name, value, kind)
    }

    /// Declare a variable, coercing the value to an explicit kind.
    pub fn add_variable_as(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        kind: ValueKind,
    ) -> Result<&mut Self, BuildError> {
        formatter::require_identifier(name)?;
        let rendered = formatter::format_as(&value.into(), kind)?;
        let variable = Variable {
            name: name.to_string(),
            value: rendered,
            kind,
        };
        match self.variables.iter_mut().find(|v| v.name == name) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
        Ok(self)
    }

    /// Declare a variable whose initializer is inserted without escaping.
    pub fn add_raw_variable(
        &mut self,
        name: &str,
        expression: &str,
    ) -> Result<&mut Self, BuildError> {
        self.add_variable_as(name, expression, ValueKind::Raw)
    }

    /// Declare a regular expression built with the `RegExp` constructor.
    ///
    /// The pattern is escaped once for the string literal (backslashes first,
    /// then quotes), so the constructor receives the pattern unchanged.
    pub fn add_regex_pattern(
        &mut self,
        name: &str,
        pattern: &str,
        flags: Option<&str>,
    ) -> Result<&mut Self, BuildError> {
        formatter::require_identifier(name)?;
        formatter::sanitize(pattern, "regex pattern")?;
        let flags = flags.unwrap_or_default();
        validate_flags(flags)?;

        let escaped = pattern
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t")
            .replace('`', "\\u0060")
            .replace("${", "\\u0024{");
        let declaration = RegexDeclaration {
            name: name.to_string(),
            pattern: escaped,
            flags: flags.to_string(),
        };
        match self.regexes.iter_mut().find(|r| r.name == name) {
            Some(existing) => *existing = declaration,
            None => self.regexes.push(declaration),
        }
        Ok(self)
    }

    /// Append code that builds an object through bracket-notation assignment.
    pub fn create_object<'a, I>(
        &mut self,
        name: &str,
        properties: I,
    ) -> Result<&mut Self, BuildError>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        formatter::require_identifier(name)?;
        let mut code = format!("var {name} = {{}};");
        for (key, value) in properties {
            formatter::sanitize(key, "object key")?;
            let rendered = formatter::format_value(&value)?;
            code.push_str(&format!("\n{name}[{}] = {rendered};", formatter::quote(key)));
        }
        self.code_blocks.push(code);
        Ok(self)
    }

    /// Register a reusable fragment. Re-registering a name replaces it in place.
    pub fn add_function(&mut self, name: &str, code: &str) -> &mut Self {
        match self.fragments.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = code.to_string(),
            None => self.fragments.push((name.to_string(), code.to_string())),
        }
        self
    }

    /// Append a block of code.
    pub fn add_code_block(&mut self, code: &str) -> Result<&mut Self, BuildError> {
        check_template_markers(code)?;
        self.code_blocks.push(code.to_string());
        Ok(self)
    }

    /// Append an `if`/`else` statement.
    pub fn add_conditional(
        &mut self,
        condition: &str,
        then_code: &str,
        else_code: Option<&str>,
    ) -> Result<&mut Self, BuildError> {
        check_template_markers(condition)?;
        check_template_markers(then_code)?;
        let mut code = format!("if ({condition}) {{\n{}\n}}", indent(then_code));
        if let Some(else_code) = else_code {
            check_template_markers(else_code)?;
            code.push_str(&format!(" else {{\n{}\n}}", indent(else_code)));
        }
        self.code_blocks.push(code);
        Ok(self)
    }

    /// Append a `try`/`catch` statement.
    ///
    /// Without explicit catch code, the handler returns the serialized
    /// `{ success: false, error: String(e) }` object every script must emit
    /// on failure.
    pub fn add_try_catch(
        &mut self,
        try_code: &str,
        catch_code: Option<&str>,
    ) -> Result<&mut Self, BuildError> {
        check_template_markers(try_code)?;
        let catch_body = match catch_code {
            Some(code) => {
                check_template_markers(code)?;
                code.to_string()
            }
            None => default_catch_body(),
        };
        self.code_blocks.push(format!(
            "try {{\n{}\n}} catch (e) {{\n{}\n}}",
            indent(try_code),
            indent(&catch_body)
        ));
        Ok(self)
    }

    /// Render the complete program.
    pub fn build(&self) -> String {
        let mut sections = vec![self.preamble()];

        sections.extend(
            self.variables
                .iter()
                .map(|v| format!("var {} = {};", v.name, v.value)),
        );
        sections.extend(self.regexes.iter().map(|r| {
            format!(
                "var {} = new RegExp(\"{}\", \"{}\");",
                r.name, r.pattern, r.flags
            )
        }));
        sections.extend(self.fragments.iter().map(|(_, code)| code.clone()));
        sections.extend(self.code_blocks.iter().cloned());

        debug!(
            variables = self.variables.len(),
            raw_variables = self.variables.iter().filter(|v| v.kind == ValueKind::Raw).count(),
            regexes = self.regexes.len(),
            fragments = self.fragments.len(),
            code_blocks = self.code_blocks.len(),
            "Building script"
        );

        let body = sections
            .iter()
            .map(|s| indent(s))
            .collect::<Vec<_>>()
            .join("\n");
        format!("(function() {{\n{body}\n}})();\n")
    }

    /// Build the program and run the full static validator over it.
    pub fn validate(&self) -> ValidationResult {
        ScriptValidator::default().validate(&self.build())
    }

    /// Code that serializes `{ success: true, ...fields }` and returns it.
    ///
    /// Field values are JavaScript expressions, inserted as-is.
    pub fn success_block(fields: &[(&str, &str)]) -> String {
        let mut code = String::from("var result = {};\nresult[\"success\"] = true;");
        for (key, expression) in fields {
            code.push_str(&format!("\nresult[{}] = {expression};", formatter::quote(key)));
        }
        code.push_str("\nreturn JSON.stringify(result);");
        code
    }

    /// Code that serializes `{ success: false, error: <expression> }` and returns it.
    pub fn failure_block(error_expression: &str) -> String {
        format!(
            "var errorResult = {{}};\nerrorResult[\"success\"] = false;\nerrorResult[\"error\"] = {error_expression};\nreturn JSON.stringify(errorResult);"
        )
    }

    fn preamble(&self) -> String {
        let acquire = match &self.target {
            Target::Named(name) => format!("Application({})", formatter::quote(name)),
            Target::Current => "Application.currentApplication()".to_string(),
        };
        format!("var {APP_HANDLE} = {acquire};\n{APP_HANDLE}.includeStandardAdditions = true;")
    }
}

fn default_catch_body() -> String {
    ScriptBuilder::failure_block("String(e)")
}

fn validate_flags(flags: &str) -> Result<(), BuildError> {
    let mut seen = String::new();
    for c in flags.chars() {
        if !REGEX_FLAGS.contains(c) || seen.contains(c) {
            return Err(BuildError::InvalidRegexFlags {
                flags: flags.to_string(),
            });
        }
        seen.push(c);
    }
    Ok(())
}

fn check_template_markers(code: &str) -> Result<(), BuildError> {
    let position = match (code.find('`'), code.find("${")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return Ok(()),
    };
    Err(BuildError::TemplateLiteral {
        excerpt: excerpt_around(code, position),
    })
}

/// Up to 20 characters either side of a byte offset.
pub(crate) fn excerpt_around(text: &str, position: usize) -> String {
    let start = text[..position]
        .char_indices()
        .rev()
        .nth(19)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = text[position..]
        .char_indices()
        .nth(20)
        .map(|(i, _)| position + i)
        .unwrap_or(text.len());
    text[start..end].trim().to_string()
}

fn indent(code: &str) -> String {
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{INDENT}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("'{needle}' not found in:\n{haystack}"))
    }

    #[test]
    fn test_empty_build_has_preamble_and_wrapper() {
        let script = ScriptBuilder::new("DEVONthink").build();
        assert_eq!(
            script,
            "(function() {\n  var theApp = Application(\"DEVONthink\");\n  theApp.includeStandardAdditions = true;\n})();\n"
        );
    }

    #[test]
    fn test_current_application_preamble() {
        let script = ScriptBuilder::current_application().build();
        assert!(script.contains("var theApp = Application.currentApplication();"));
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_variable("a", 1)
            .unwrap()
            .add_regex_pattern("r", "x", None)
            .unwrap()
            .add_code_block("// x")
            .unwrap();
        let script = builder.build();

        let var_pos = position(&script, "var a = 1;");
        let regex_pos = position(&script, "var r = new RegExp(\"x\", \"\");");
        let code_pos = position(&script, "// x");
        assert!(var_pos < regex_pos);
        assert!(regex_pos < code_pos);
    }

    #[test]
    fn test_fragments_render_between_regexes_and_code() {
        let mut builder = ScriptBuilder::new("Finder");
        builder.add_code_block("main();").unwrap();
        builder.add_function("helpers", "function helper() { return 1; }");
        builder.add_function("main", "function main() { return helper(); }");
        builder.add_regex_pattern("re", "a+", Some("g")).unwrap();
        let script = builder.build();

        let regex_pos = position(&script, "new RegExp(\"a+\", \"g\")");
        let helper_pos = position(&script, "function helper()");
        let main_pos = position(&script, "function main()");
        let call_pos = position(&script, "  main();");
        assert!(regex_pos < helper_pos);
        assert!(helper_pos < main_pos);
        assert!(main_pos < call_pos);
    }

    #[test]
    fn test_identifier_validation() {
        let mut builder = ScriptBuilder::new("Finder");
        assert_eq!(
            builder.add_variable("123bad", 1).unwrap_err(),
            BuildError::InvalidIdentifier {
                name: "123bad".into()
            }
        );
        assert!(builder.add_variable("valid_Name$1", 1).is_ok());
        assert!(builder.add_regex_pattern("bad-name", "x", None).is_err());
        assert!(builder.create_object("0obj", Vec::new()).is_err());
    }

    #[test]
    fn test_regex_pattern_with_template_markers() {
        let mut builder = ScriptBuilder::new("Finder");
        builder.add_regex_pattern("price", "cost ${x}|`", None).unwrap();
        let script = builder.build();
        assert!(!script.contains('`'));
        assert!(!script.contains("${"));
        assert!(script.contains(r#"new RegExp("cost \u0024{x}|\u0060", "")"#));
        assert!(builder.validate().valid);
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut builder = ScriptBuilder::new("Finder");
        let before = builder.build();
        assert_eq!(
            builder.add_variable(APP_HANDLE, "Mail").unwrap_err(),
            BuildError::ReservedIdentifier {
                name: APP_HANDLE.into()
            }
        );
        assert!(builder.add_variable("return", 1).is_err());
        assert!(builder.add_regex_pattern("new", "x", None).is_err());
        assert!(builder.create_object("this", Vec::new()).is_err());
        assert_eq!(builder.build(), before);
        assert_eq!(builder.build().matches("var theApp").count(), 1);
    }

    #[test]
    fn test_redeclared_variable_keeps_slot() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_variable("first", "one")
            .unwrap()
            .add_variable("second", 2)
            .unwrap()
            .add_variable("first", "uno")
            .unwrap();
        let script = builder.build();
        assert!(!script.contains("\"one\""));
        assert!(position(&script, "var first = \"uno\";") < position(&script, "var second = 2;"));
    }

    #[test]
    fn test_string_variable_escaped() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_variable("name", "O'Brien \"the great\"")
            .unwrap();
        assert!(builder
            .build()
            .contains(r#"var name = "O'Brien \"the great\"";"#));
    }

    #[test]
    fn test_control_character_rejected() {
        let mut builder = ScriptBuilder::new("Finder");
        assert!(matches!(
            builder.add_variable("x", "nul\u{0}"),
            Err(BuildError::UnsafeCharacter { .. })
        ));
        assert!(builder
            .create_object("obj", vec![("k", json!("bad\u{1}"))])
            .is_err());
    }

    #[test]
    fn test_raw_variable() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_raw_variable("names", r#"["a", "b"]"#)
            .unwrap();
        assert!(builder.build().contains(r#"var names = ["a", "b"];"#));
    }

    #[test]
    fn test_regex_escaping() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_regex_pattern("heading", r#"^\d+\.|"quoted"$"#, Some("gi"))
            .unwrap();
        assert!(builder
            .build()
            .contains(r#"var heading = new RegExp("^\\d+\\.|\"quoted\"$", "gi");"#));
    }

    #[test]
    fn test_regex_flags_validated() {
        let mut builder = ScriptBuilder::new("Finder");
        assert!(builder.add_regex_pattern("r", "x", Some("gx")).is_err());
        assert!(builder.add_regex_pattern("r", "x", Some("gg")).is_err());
        assert!(builder.add_regex_pattern("r", "x", Some("gimsuy")).is_ok());
    }

    #[test]
    fn test_create_object_bracket_notation() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .create_object("props", vec![("name", json!("x")), ("tags", json!(["a"]))])
            .unwrap();
        let script = builder.build();
        assert!(script.contains("var props = {};"));
        assert!(script.contains(r#"props["name"] = "x";"#));
        assert!(script.contains(r#"props["tags"] = ["a"];"#));
    }

    #[test]
    fn test_template_markers_rejected() {
        let mut builder = ScriptBuilder::new("Finder");
        let err = builder.add_code_block("var s = `hello`;").unwrap_err();
        assert!(matches!(err, BuildError::TemplateLiteral { .. }));
        assert!(builder.add_code_block("var s = \"${name}\";").is_err());
        assert!(builder.add_try_catch("x(`y`);", None).is_err());
        assert!(builder.add_conditional("a", "b", Some("`c`")).is_err());
        assert!(builder.add_code_block("var s = \"$name\";").is_ok());
    }

    #[test]
    fn test_conditional_rendering() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_conditional("x > 1", "y = 1;", Some("y = 2;"))
            .unwrap();
        let script = builder.build();
        assert!(script.contains("  if (x > 1) {\n    y = 1;\n  } else {\n    y = 2;\n  }"));
    }

    #[test]
    fn test_default_catch_contract() {
        let mut builder = ScriptBuilder::new("Finder");
        builder.add_try_catch("doWork();", None).unwrap();
        let script = builder.build();
        assert!(script.contains("} catch (e) {"));
        assert!(script.contains("errorResult[\"success\"] = false;"));
        assert!(script.contains("errorResult[\"error\"] = String(e);"));
        assert!(script.contains("return JSON.stringify(errorResult);"));
    }

    #[test]
    fn test_custom_catch() {
        let mut builder = ScriptBuilder::new("Finder");
        builder
            .add_try_catch("doWork();", Some("return \"failed\";"))
            .unwrap();
        let script = builder.build();
        assert!(script.contains("return \"failed\";"));
        assert!(!script.contains("errorResult"));
    }

    #[test]
    fn test_success_block() {
        let code = ScriptBuilder::success_block(&[("uuid", "record.uuid()")]);
        assert_eq!(
            code,
            "var result = {};\nresult[\"success\"] = true;\nresult[\"uuid\"] = record.uuid();\nreturn JSON.stringify(result);"
        );
    }

    #[test]
    fn test_failure_block() {
        let code = ScriptBuilder::failure_block("\"No record: \" + uuid");
        assert_eq!(
            code,
            "var errorResult = {};\nerrorResult[\"success\"] = false;\nerrorResult[\"error\"] = \"No record: \" + uuid;\nreturn JSON.stringify(errorResult);"
        );
        assert_eq!(default_catch_body(), ScriptBuilder::failure_block("String(e)"));
    }

    #[test]
    fn test_excerpt_around_is_char_safe() {
        let text = "ééééééééééééééééééééééééé`ééééé";
        let pos = text.find('`').unwrap();
        let excerpt = excerpt_around(text, pos);
        assert!(excerpt.contains('`'));
    }

    #[test]
    fn test_builder_validate_clean_script() {
        let mut builder = ScriptBuilder::new("DEVONthink");
        builder.add_variable("query", "invoice").unwrap();
        builder
            .add_try_catch(
                &ScriptBuilder::success_block(&[("query", "query")]),
                None,
            )
            .unwrap();
        let result = builder.validate();
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
    }
}
