//! Helpers shared by the integration tests.

/// Decode the body of a double-quoted JavaScript string literal the way the
/// interpreter would.
pub fn decode_js_string(body: &str) -> String {
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).expect("valid \\u escape");
                out.push(char::from_u32(code).expect("valid code point"));
            }
            Some(other) => out.push(other),
            None => panic!("dangling backslash in literal"),
        }
    }
    out
}

/// Strip the surrounding quotes from a rendered literal and decode it.
pub fn decode_literal(literal: &str) -> String {
    let body = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .expect("double-quoted literal");
    decode_js_string(body)
}
