//! Constants for the protocol DSL's literal-string grammar and the sans-I/O
//! runtime's buffering limits.
//!
//! # Literal escape sequences
//!
//! DSL source literals (`"…"`) accept a fixed escape vocabulary (§6.1):
//!
//! | Escape | Meaning |
//! |--------|---------|
//! | `\r`   | carriage return (0x0D) |
//! | `\n`   | line feed (0x0A) |
//! | `\t`   | horizontal tab (0x09) |
//! | `\\`   | literal backslash |
//! | `\"`   | literal double quote |
//! | `\xHH` | byte given by two hex digits |
//!
//! This crate does not implement the textual lexer (out of scope, §1); these
//! constants exist so that AST constructors and the demo fixtures that build
//! literals directly in Rust share one definition of the escape vocabulary
//! with whatever external front end eventually parses DSL source text.
//!
//! ```
//! use protodsl_core::constants::unescape_literal;
//!
//! assert_eq!(unescape_literal(r"line1\r\nline2").unwrap(), b"line1\r\nline2");
//! assert_eq!(unescape_literal(r"\x41\x42").unwrap(), b"AB");
//! ```

use crate::{Error, Result};

/// Expand the DSL's literal escape vocabulary into raw bytes.
///
/// # Errors
/// Returns [`Error::MalformedAst`] on a trailing unescaped backslash or an
/// unrecognized escape letter.
pub fn unescape_literal(src: &str) -> Result<Vec<u8>> {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&escape) = bytes.get(i) else {
            return Err(Error::MalformedAst(
                "literal ends with a trailing unescaped backslash".to_string(),
            ));
        };
        match escape {
            b'r' => {
                out.push(b'\r');
                i += 1;
            }
            b'n' => {
                out.push(b'\n');
                i += 1;
            }
            b't' => {
                out.push(b'\t');
                i += 1;
            }
            b'\\' => {
                out.push(b'\\');
                i += 1;
            }
            b'"' => {
                out.push(b'"');
                i += 1;
            }
            b'x' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::MalformedAst("truncated \\xHH escape".to_string()))?;
                let hex_str = std::str::from_utf8(hex)
                    .map_err(|_| Error::MalformedAst("\\xHH escape is not ASCII hex".to_string()))?;
                let byte = u8::from_str_radix(hex_str, 16)
                    .map_err(|_| Error::MalformedAst(format!("invalid \\x escape: {hex_str}")))?;
                out.push(byte);
                i += 3;
            }
            other => {
                return Err(Error::MalformedAst(format!(
                    "unrecognized escape '\\{}'",
                    other as char
                )));
            }
        }
    }
    Ok(out)
}

/// Upper bound on bytes a [`crate::ir`]-driven parser will buffer for a single
/// in-progress `ReadOctetsUntilTerminator` field before giving up and reporting
/// a protocol mismatch, guarding against an unterminated field exhausting memory.
///
/// Mirrors the donor runtime's own frame-buffer ceiling; chosen generously
/// relative to typical command/response line lengths (SMTP, HTTP headers).
pub const MAX_FIELD_BUFFER: usize = 64 * 1024;

/// Initial capacity reserved for a message parser's field-accumulation buffer.
pub const INITIAL_FIELD_BUFFER_CAPACITY: usize = 256;

/// Distinguished initial state name every [`crate::ast::Agent`] must declare.
pub const OPEN_STATE: &str = "Open";

/// Distinguished terminal state name; the only state permitted to have no
/// outgoing transitions (invariant 3).
pub const CLOSED_STATE: &str = "Closed";
