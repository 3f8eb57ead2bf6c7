//! One-shot message serialization: walks a transition's lowered [`Step`]
//! list and writes literal/field/loop bytes straight into an output
//! buffer. Unlike [`crate::parser::MessageParser`], serialization never
//! needs to suspend mid-stream — every field it writes is already present
//! in the [`MessageData`] handed in, so there is nothing to wait for.

use bytes::{BufMut, Bytes, BytesMut};

use protodsl_core::ir::Step;
use protodsl_core::message_data::{FieldValue, MessageData};
use protodsl_core::{Error, Result};

use crate::escape::escape_field;

/// Serializes `data` against `steps`, the lowered action list for the
/// write transition being emitted. `message` names the transition's
/// message, used only for error context on missing fields.
pub fn serialize(steps: &[Step], data: &MessageData, message: &str) -> Result<Bytes> {
    let mut out = BytesMut::new();
    write_steps(steps, data, message, &mut out)?;
    Ok(out.freeze())
}

fn write_steps(steps: &[Step], data: &MessageData, message: &str, out: &mut BytesMut) -> Result<()> {
    for step in steps {
        write_step(step, data, message, out)?;
    }
    Ok(())
}

/// Puts one loop element's fields in scope for its body's steps. A
/// `FieldValue::Tuple` element is unpacked so its inner steps can write
/// each sub-field by its own name; any other element is bound under the
/// loop variable's own name, mirroring [`crate::parser`]'s reverse.
fn iteration_data(variable: &str, element: &FieldValue) -> MessageData {
    match element {
        FieldValue::Tuple(fields) => fields.iter().cloned().collect(),
        other => std::iter::once((variable.to_string(), other.clone())).collect(),
    }
}

fn write_step(step: &Step, data: &MessageData, message: &str, out: &mut BytesMut) -> Result<()> {
    match step {
        Step::EmitLiteral(lit) => {
            out.put_slice(lit);
            Ok(())
        }
        Step::WriteFromField { field, escape, .. } => {
            let value = data.require(message, field)?;
            let raw = value.to_wire_bytes();
            match escape {
                Some(e) => out.put_slice(&escape_field(&raw, e)),
                None => out.put_slice(&raw),
            }
            Ok(())
        }
        Step::Loop {
            variable,
            collection,
            terminator,
            inner,
            ..
        } => {
            let value = data.require(message, collection)?;
            let FieldValue::Array(elements) = value else {
                return Err(Error::ProtocolMismatch {
                    state: String::new(),
                    reason: format!("field '{collection}' is not a collection"),
                });
            };
            for element in elements {
                let iteration = iteration_data(variable, element);
                write_steps(inner, &iteration, message, out)?;
            }
            out.put_slice(terminator);
            Ok(())
        }
        Step::MatchLiteral(_) | Step::ReadUntilTerminator { .. } => Err(Error::ProtocolMismatch {
            state: String::new(),
            reason: "read-only step encountered while serializing".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protodsl_core::ast::{EscapeInfo, Type};

    fn lit(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    #[test]
    fn emits_literal_and_field() {
        let steps = vec![
            Step::EmitLiteral(lit("HELO ")),
            Step::WriteFromField {
                field: "domain".to_string(),
                field_type: Type::Str,
                escape: None,
            },
            Step::EmitLiteral(lit("\r\n")),
        ];
        let data: MessageData = std::iter::once((
            "domain".to_string(),
            FieldValue::Str("mail.example.com".to_string()),
        ))
        .collect();
        let out = serialize(&steps, &data, "HELO").unwrap();
        assert_eq!(&out[..], b"HELO mail.example.com\r\n");
    }

    #[test]
    fn escapes_field_before_writing() {
        let steps = vec![Step::WriteFromField {
            field: "name".to_string(),
            field_type: Type::Str,
            escape: Some(EscapeInfo {
                character: lit("."),
                sequence: lit(".."),
            }),
        }];
        let data: MessageData = std::iter::once((
            "name".to_string(),
            FieldValue::Str("a.b".to_string()),
        ))
        .collect();
        let out = serialize(&steps, &data, "M").unwrap();
        assert_eq!(&out[..], b"a..b");
    }

    #[test]
    fn serializes_loop_with_terminator() {
        let steps = vec![Step::Loop {
            variable: "addr".to_string(),
            collection: "recipients".to_string(),
            element_type: Type::Str,
            terminator: lit(".\r\n"),
            inner: vec![
                Step::WriteFromField {
                    field: "addr".to_string(),
                    field_type: Type::Str,
                    escape: None,
                },
                Step::EmitLiteral(lit(",")),
            ],
        }];
        let data: MessageData = std::iter::once((
            "recipients".to_string(),
            FieldValue::Array(vec![
                FieldValue::Str("a@x.com".to_string()),
                FieldValue::Str("b@x.com".to_string()),
            ]),
        ))
        .collect();
        let out = serialize(&steps, &data, "M").unwrap();
        assert_eq!(&out[..], b"a@x.com,b@x.com,.\r\n");
    }

    #[test]
    fn rejects_missing_field() {
        let steps = vec![Step::WriteFromField {
            field: "missing".to_string(),
            field_type: Type::Str,
            escape: None,
        }];
        let data = MessageData::default();
        assert!(serialize(&steps, &data, "M").is_err());
    }

    fn header_tuple_steps() -> Vec<Step> {
        vec![Step::Loop {
            variable: "header".to_string(),
            collection: "headers".to_string(),
            element_type: Type::Tuple(vec![("name".to_string(), Type::Str), ("value".to_string(), Type::Str)]),
            terminator: lit(".\r\n"),
            inner: vec![
                Step::WriteFromField {
                    field: "name".to_string(),
                    field_type: Type::Str,
                    escape: None,
                },
                Step::EmitLiteral(lit(":")),
                Step::WriteFromField {
                    field: "value".to_string(),
                    field_type: Type::Str,
                    escape: None,
                },
                Step::EmitLiteral(lit(";")),
            ],
        }]
    }

    #[test]
    fn serializes_loop_of_tuple_elements() {
        let steps = header_tuple_steps();
        let data: MessageData = std::iter::once((
            "headers".to_string(),
            FieldValue::Array(vec![FieldValue::Tuple(vec![
                ("name".to_string(), FieldValue::Str("X-Mailer".to_string())),
                ("value".to_string(), FieldValue::Str("protodsl".to_string())),
            ])]),
        ))
        .collect();
        let out = serialize(&steps, &data, "M").unwrap();
        assert_eq!(&out[..], b"X-Mailer:protodsl;.\r\n");
    }

    /// §8's round-trip property for nested-tuple fields, exercised directly
    /// against the runtime (not through a handler): serializing an
    /// `array<tuple<...>>` field and feeding the result back through
    /// [`crate::parser::MessageParser`] yields the same `MessageData`.
    #[test]
    fn array_of_tuple_round_trips_through_parser() {
        use crate::parser::{MessageParser, ParseProgress};

        let write_steps = header_tuple_steps();
        let mut original = MessageData::new();
        original.insert(
            "headers",
            FieldValue::Array(vec![
                FieldValue::Tuple(vec![
                    ("name".to_string(), FieldValue::Str("X-Mailer".to_string())),
                    ("value".to_string(), FieldValue::Str("protodsl".to_string())),
                ]),
                FieldValue::Tuple(vec![
                    ("name".to_string(), FieldValue::Str("X-Priority".to_string())),
                    ("value".to_string(), FieldValue::Str("1".to_string())),
                ]),
            ]),
        );
        let wire = serialize(&write_steps, &original, "Headers").unwrap();

        let read_steps = header_tuple_steps();
        let mut parser = MessageParser::new(read_steps);
        match parser.feed(&wire).unwrap() {
            ParseProgress::Complete { data, consumed } => {
                assert_eq!(consumed, wire.len());
                assert_eq!(data.get("headers"), original.get("headers"));
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }
}
