//! Identifier conversion between DSL names (message names, state names,
//! field names — arbitrary source text) and valid Rust identifiers.

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "false", "fn",
    "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe",
    "use", "where", "while", "async", "await", "dyn", "abstract", "become", "box", "do", "final",
    "macro", "override", "priv", "typeof", "unsized", "virtual", "yield", "try",
];

/// `"read_until"` / `"MAIL FROM"` → `"MailFrom"`. Splits on any non-alphanumeric
/// boundary, title-cases each piece, and drops separators entirely.
pub fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut start_of_word = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if start_of_word {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            start_of_word = false;
        } else {
            start_of_word = true;
        }
    }
    out
}

/// `"MAIL FROM"` → `"mail_from"`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower_or_digit = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower_or_digit {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = ch.is_lowercase() || ch.is_numeric();
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
            prev_lower_or_digit = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Guards against a generated identifier colliding with a Rust keyword by
/// prefixing it with `r#`.
pub fn sanitize_ident(ident: String) -> String {
    if RUST_KEYWORDS.contains(&ident.as_str()) {
        format!("r#{ident}")
    } else {
        ident
    }
}

/// Renders raw bytes as a Rust byte-string literal body suitable for
/// `bytes::Bytes::from_static(b"...")`.
pub fn byte_string_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push_str("b\"");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\x{other:02x}")),
        }
    }
    out.push('"');
    out
}
