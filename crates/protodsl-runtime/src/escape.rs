//! Wire-level escape substitution (§3 `EscapeInfo`): a reserved byte
//! sequence stands in for a literal `character` that would otherwise be
//! indistinguishable from the surrounding framing (most commonly the
//! character that collides with a terminator).

use protodsl_core::ast::EscapeInfo;

/// Un-escapes a just-scanned field: every occurrence of `escape.sequence`
/// is replaced by `escape.character`.
pub fn unescape_field(raw: &[u8], escape: &EscapeInfo) -> Vec<u8> {
    replace_all(raw, &escape.sequence, &escape.character)
}

/// Escapes a field about to be written: every occurrence of
/// `escape.character` is replaced by `escape.sequence`.
pub fn escape_field(raw: &[u8], escape: &EscapeInfo) -> Vec<u8> {
    replace_all(raw, &escape.character, &escape.sequence)
}

fn replace_all(input: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return input.to_vec();
    }
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn info(character: &str, sequence: &str) -> EscapeInfo {
        EscapeInfo {
            character: Bytes::from(character.as_bytes().to_vec()),
            sequence: Bytes::from(sequence.as_bytes().to_vec()),
        }
    }

    #[test]
    fn unescape_replaces_sequence_with_character() {
        let escape = info(".", "..");
        assert_eq!(unescape_field(b"a..b..c", &escape), b"a.b.c");
    }

    #[test]
    fn escape_replaces_character_with_sequence() {
        let escape = info(".", "..");
        assert_eq!(escape_field(b"a.b.c", &escape), b"a..b..c");
    }

    #[test]
    fn round_trips() {
        let escape = info(".", "..");
        let original = b"leading.dot.trailing";
        let escaped = escape_field(original, &escape);
        assert_eq!(unescape_field(&escaped, &escape), original);
    }
}
