//! Incremental, stage-counter driven message parser: consumes bytes
//! step-by-step against one transition's lowered action list
//! (`protodsl_core::ir`), producing a [`protodsl_core::message_data::MessageData`]
//! once every step has matched, and reporting that it needs more data
//! otherwise. This is the sans-I/O analogue of the donor's `StreamParser`
//! state machine (`stream_parser.rs`'s `WaitingStart`/`ReadingPayload`
//! states), generalized from one fixed STX/ETX frame to an arbitrary
//! lowered action list, including nested loops.

use bytes::{Bytes, BytesMut};

use protodsl_core::ast::{EscapeInfo, Type};
use protodsl_core::constants::MAX_FIELD_BUFFER;
use protodsl_core::ir::Step;
use protodsl_core::message_data::{FieldValue, MessageData};
use protodsl_core::{Error, Result};

use crate::escape::unescape_field;

/// One in-progress loop: the steps its body repeats, how far into the
/// current element's steps we are, and the elements collected so far.
#[derive(Debug)]
struct LoopFrame {
    variable: String,
    collection: String,
    element_type: Type,
    terminator: Bytes,
    inner: Vec<Step>,
    inner_index: usize,
    elements: Vec<FieldValue>,
    iteration_fields: Vec<(String, FieldValue)>,
}

#[derive(Debug)]
enum Frame {
    Top { steps: Vec<Step>, index: usize },
    Loop(LoopFrame),
}

enum TerminatorCheck {
    Matched,
    NotMatched,
    NeedMoreData,
}

/// What a [`MessageParser::feed`] call produced, and how many of the bytes
/// just passed in were actually needed. Pipelined transports can hand a
/// parser more than one message's worth of bytes in a single call; any
/// tail past `consumed` on [`ParseProgress::Complete`] belongs to the
/// *next* message and must be redispatched, not dropped.
#[derive(Debug)]
pub enum ParseProgress {
    NeedMoreData { consumed: usize },
    Complete { data: MessageData, consumed: usize },
}

/// Internal drive result, before `feed` works out how many of its input
/// bytes the completed message actually needed.
enum DriveOutcome {
    NeedMoreData,
    Complete(MessageData),
}

/// Drives one transition's [`Step`] list to completion across any number
/// of [`MessageParser::feed`] calls, resuming exactly where the previous
/// call left off.
#[derive(Debug)]
pub struct MessageParser {
    buffer: BytesMut,
    stack: Vec<Frame>,
    fields: Vec<(String, FieldValue)>,
}

impl MessageParser {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            buffer: BytesMut::new(),
            stack: vec![Frame::Top { steps, index: 0 }],
            fields: Vec::new(),
        }
    }

    /// Feeds more bytes and advances as far as possible. `bytes` may carry
    /// more than this message needs (a second message pipelined right
    /// behind it on the wire); on [`ParseProgress::Complete`], `consumed`
    /// reports how many of `bytes` this message actually used, so the
    /// caller can redispatch the remainder instead of losing it.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<ParseProgress> {
        self.buffer.extend_from_slice(bytes);
        match self.drive()? {
            DriveOutcome::NeedMoreData => Ok(ParseProgress::NeedMoreData { consumed: bytes.len() }),
            DriveOutcome::Complete(data) => {
                // Anything carried over from an earlier feed() was, by
                // construction, already spent — this message wouldn't have
                // completed on *this* call otherwise. So whatever is left
                // in `buffer` now is a suffix of `bytes`, not of the carry-over.
                let leftover = self.buffer.len();
                let consumed = bytes.len().saturating_sub(leftover);
                Ok(ParseProgress::Complete { data, consumed })
            }
        }
    }

    fn drive(&mut self) -> Result<DriveOutcome> {
        loop {
            if self.stack.is_empty() {
                let data: MessageData = self.fields.drain(..).collect();
                return Ok(DriveOutcome::Complete(data));
            }

            if self.at_loop_frame_start() {
                match self.try_consume_loop_terminator()? {
                    TerminatorCheck::Matched => continue,
                    TerminatorCheck::NeedMoreData => return Ok(DriveOutcome::NeedMoreData),
                    TerminatorCheck::NotMatched => {}
                }
            }

            let step = match self.current_step() {
                Some(s) => s,
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            if let Step::Loop {
                variable,
                collection,
                element_type,
                terminator,
                inner,
            } = step
            {
                self.stack.push(Frame::Loop(LoopFrame {
                    variable,
                    collection,
                    element_type,
                    terminator,
                    inner,
                    inner_index: 0,
                    elements: Vec::new(),
                    iteration_fields: Vec::new(),
                }));
                continue;
            }

            if !self.try_execute(&step)? {
                return Ok(DriveOutcome::NeedMoreData);
            }
            self.advance();
        }
    }

    fn at_loop_frame_start(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Loop(lf)) if lf.inner_index == 0)
    }

    fn try_consume_loop_terminator(&mut self) -> Result<TerminatorCheck> {
        let terminator = match self.stack.last() {
            Some(Frame::Loop(lf)) => lf.terminator.clone(),
            _ => unreachable!("only called at a loop frame start"),
        };
        if self.buffer.len() < terminator.len() {
            return Ok(TerminatorCheck::NeedMoreData);
        }
        if self.buffer.starts_with(terminator.as_ref()) {
            let _ = self.buffer.split_to(terminator.len());
            self.finish_loop_frame();
            Ok(TerminatorCheck::Matched)
        } else {
            Ok(TerminatorCheck::NotMatched)
        }
    }

    fn finish_loop_frame(&mut self) {
        let Some(Frame::Loop(lf)) = self.stack.pop() else {
            unreachable!("finish_loop_frame called without a loop frame on top")
        };
        self.bind_field(lf.collection, FieldValue::Array(lf.elements));
        self.advance();
    }

    fn current_step(&self) -> Option<Step> {
        match self.stack.last()? {
            Frame::Top { steps, index } => steps.get(*index).cloned(),
            Frame::Loop(lf) => lf.inner.get(lf.inner_index).cloned(),
        }
    }

    fn advance(&mut self) {
        match self.stack.last_mut().expect("advance called on empty stack") {
            Frame::Top { index, .. } => *index += 1,
            Frame::Loop(lf) => {
                lf.inner_index += 1;
                if lf.inner_index >= lf.inner.len() {
                    let value = element_from_iteration_fields(&lf.element_type, &lf.variable, &lf.iteration_fields);
                    lf.elements.push(value);
                    lf.iteration_fields.clear();
                    lf.inner_index = 0;
                }
            }
        }
    }

    fn bind_field(&mut self, name: String, value: FieldValue) {
        let target = match self.stack.last_mut() {
            Some(Frame::Loop(lf)) => &mut lf.iteration_fields,
            _ => &mut self.fields,
        };
        if let Some(slot) = target.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            target.push((name, value));
        }
    }

    fn try_execute(&mut self, step: &Step) -> Result<bool> {
        match step {
            Step::MatchLiteral(lit) => {
                if self.buffer.len() < lit.len() {
                    return Ok(false);
                }
                if !self.buffer.starts_with(lit.as_ref()) {
                    return Err(Error::ProtocolMismatch {
                        state: String::new(),
                        reason: format!(
                            "expected literal {lit:?}, got {:?}",
                            &self.buffer[..lit.len().min(self.buffer.len())]
                        ),
                    });
                }
                let _ = self.buffer.split_to(lit.len());
                Ok(true)
            }
            Step::ReadUntilTerminator {
                terminator,
                field,
                field_type,
                escape,
            } => match find_terminator(&self.buffer, terminator, escape.as_ref()) {
                Some(pos) => {
                    if pos > MAX_FIELD_BUFFER {
                        return Err(Error::ProtocolMismatch {
                            state: String::new(),
                            reason: format!("field '{field}' exceeded maximum buffer size"),
                        });
                    }
                    let raw = self.buffer.split_to(pos);
                    let _ = self.buffer.split_to(terminator.len());
                    let unescaped = match escape {
                        Some(e) => unescape_field(&raw, e),
                        None => raw.to_vec(),
                    };
                    let value = coerce_field_value(field, field_type, &unescaped)?;
                    self.bind_field(field.clone(), value);
                    Ok(true)
                }
                None => {
                    if self.buffer.len() > MAX_FIELD_BUFFER {
                        return Err(Error::ProtocolMismatch {
                            state: String::new(),
                            reason: format!("field '{field}' exceeded maximum buffer size before its terminator"),
                        });
                    }
                    Ok(false)
                }
            },
            Step::EmitLiteral(_) | Step::WriteFromField { .. } => Err(Error::ProtocolMismatch {
                state: String::new(),
                reason: "write-only step encountered while parsing".to_string(),
            }),
            Step::Loop { .. } => unreachable!("Step::Loop is handled before try_execute"),
        }
    }
}

/// Builds one completed loop element from the fields its body bound during
/// the iteration just finished. A `tuple<...>` element keeps every bound
/// sub-field, in the tuple's declared order, as a `FieldValue::Tuple`; any
/// other element type is the single field bound under the loop variable's
/// own name (scalar elements bind nothing else).
fn element_from_iteration_fields(
    element_type: &Type,
    variable: &str,
    iteration_fields: &[(String, FieldValue)],
) -> FieldValue {
    match element_type {
        Type::Tuple(decl) => FieldValue::Tuple(
            decl.iter()
                .map(|(name, _)| {
                    let value = iteration_fields
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(FieldValue::Octets(Bytes::new()));
                    (name.clone(), value)
                })
                .collect(),
        ),
        _ => iteration_fields
            .iter()
            .find(|(n, _)| n == variable)
            .map(|(_, v)| v.clone())
            .unwrap_or(FieldValue::Octets(Bytes::new())),
    }
}

fn coerce_field_value(field: &str, ty: &Type, bytes: &[u8]) -> Result<FieldValue> {
    match ty {
        Type::Str => {
            let s = String::from_utf8(bytes.to_vec()).map_err(|_| Error::ProtocolMismatch {
                state: String::new(),
                reason: format!("field '{field}' is not valid UTF-8"),
            })?;
            Ok(FieldValue::Str(s))
        }
        Type::Int { bits, unsigned } => {
            let s = std::str::from_utf8(bytes).map_err(|_| Error::ProtocolMismatch {
                state: String::new(),
                reason: format!("field '{field}' is not ASCII decimal"),
            })?;
            let value: i64 = s.parse().map_err(|_| Error::NumericOverflow {
                field: field.to_string(),
                digits: s.to_string(),
            })?;
            let max: i128 = if *unsigned {
                (1i128 << *bits) - 1
            } else {
                (1i128 << (*bits - 1)) - 1
            };
            let min: i128 = if *unsigned { 0 } else { -(1i128 << (*bits - 1)) };
            let value128 = value as i128;
            if value128 > max || value128 < min {
                return Err(Error::NumericOverflow {
                    field: field.to_string(),
                    digits: s.to_string(),
                });
            }
            Ok(FieldValue::Int(value))
        }
        Type::Array(_) | Type::Tuple(_) => Err(Error::ProtocolMismatch {
            state: String::new(),
            reason: format!("field '{field}' has a composite type incompatible with terminator-delimited reading"),
        }),
    }
}

/// Scans for `terminator`, treating any occurrence of `escape.sequence` as
/// opaque: a terminator byte sequence embedded inside an escape sequence
/// (dot-stuffing's `\r\n.\r\n` inside `\n.`, a header continuation's bare
/// `\r\n` inside `\r\n `) must not end the field early.
fn find_terminator(haystack: &[u8], terminator: &[u8], escape: Option<&EscapeInfo>) -> Option<usize> {
    let sequence = escape.map(|e| e.sequence.as_ref()).filter(|s: &&[u8]| !s.is_empty());
    let mut i = 0;
    while i < haystack.len() {
        if let Some(sequence) = sequence {
            if haystack[i..].starts_with(sequence) {
                i += sequence.len();
                continue;
            }
        }
        if haystack[i..].starts_with(terminator) {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn lit(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    #[test]
    fn matches_static_literal_and_reads_field() {
        let steps = vec![
            Step::MatchLiteral(lit("HELO ")),
            Step::ReadUntilTerminator {
                terminator: lit("\r\n"),
                field: "domain".to_string(),
                field_type: Type::Str,
                escape: None,
            },
        ];
        let mut parser = MessageParser::new(steps);
        match parser.feed(b"HELO mail.example.com\r\n").unwrap() {
            ParseProgress::Complete { data, consumed } => {
                assert_eq!(data.get("domain"), Some(&FieldValue::Str("mail.example.com".to_string())));
                assert_eq!(consumed, "HELO mail.example.com\r\n".len());
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn complete_reports_only_what_this_message_consumed() {
        let steps = vec![Step::ReadUntilTerminator {
            terminator: lit("\r\n"),
            field: "line".to_string(),
            field_type: Type::Str,
            escape: None,
        }];
        let mut parser = MessageParser::new(steps);
        // A second, unrelated message is pipelined right behind this one.
        match parser.feed(b"first\r\nsecond\r\n").unwrap() {
            ParseProgress::Complete { data, consumed } => {
                assert_eq!(data.get("line"), Some(&FieldValue::Str("first".to_string())));
                assert_eq!(consumed, "first\r\n".len());
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn resumes_across_partial_feeds() {
        let steps = vec![Step::ReadUntilTerminator {
            terminator: lit("\r\n"),
            field: "line".to_string(),
            field_type: Type::Str,
            escape: None,
        }];
        let mut parser = MessageParser::new(steps);
        assert!(matches!(parser.feed(b"partial").unwrap(), ParseProgress::NeedMoreData { .. }));
        match parser.feed(b" line\r\n").unwrap() {
            ParseProgress::Complete { data, consumed } => {
                assert_eq!(data.get("line"), Some(&FieldValue::Str("partial line".to_string())));
                assert_eq!(consumed, " line\r\n".len());
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn parses_loop_of_elements() {
        let steps = vec![Step::Loop {
            variable: "addr".to_string(),
            collection: "recipients".to_string(),
            element_type: Type::Str,
            terminator: lit(".\r\n"),
            inner: vec![Step::ReadUntilTerminator {
                terminator: lit(","),
                field: "addr".to_string(),
                field_type: Type::Str,
                escape: None,
            }],
        }];
        let mut parser = MessageParser::new(steps);
        match parser.feed(b"a@x.com,b@x.com,.\r\n").unwrap() {
            ParseProgress::Complete { data, .. } => match data.get("recipients") {
                Some(FieldValue::Array(elems)) => {
                    assert_eq!(
                        elems,
                        &vec![
                            FieldValue::Str("a@x.com".to_string()),
                            FieldValue::Str("b@x.com".to_string())
                        ]
                    );
                }
                other => panic!("unexpected {other:?}"),
            },
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn parses_loop_of_tuple_elements() {
        let steps = vec![Step::Loop {
            variable: "header".to_string(),
            collection: "headers".to_string(),
            element_type: Type::Tuple(vec![("name".to_string(), Type::Str), ("value".to_string(), Type::Str)]),
            terminator: lit(".\r\n"),
            inner: vec![
                Step::ReadUntilTerminator {
                    terminator: lit(":"),
                    field: "name".to_string(),
                    field_type: Type::Str,
                    escape: None,
                },
                Step::ReadUntilTerminator {
                    terminator: lit(";"),
                    field: "value".to_string(),
                    field_type: Type::Str,
                    escape: None,
                },
            ],
        }];
        let mut parser = MessageParser::new(steps);
        match parser.feed(b"X-Mailer:protodsl;X-Priority:1;.\r\n").unwrap() {
            ParseProgress::Complete { data, .. } => match data.get("headers") {
                Some(FieldValue::Array(elems)) => {
                    assert_eq!(
                        elems,
                        &vec![
                            FieldValue::Tuple(vec![
                                ("name".to_string(), FieldValue::Str("X-Mailer".to_string())),
                                ("value".to_string(), FieldValue::Str("protodsl".to_string())),
                            ]),
                            FieldValue::Tuple(vec![
                                ("name".to_string(), FieldValue::Str("X-Priority".to_string())),
                                ("value".to_string(), FieldValue::Str("1".to_string())),
                            ]),
                        ]
                    );
                }
                other => panic!("unexpected {other:?}"),
            },
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn rejects_mismatched_literal() {
        let steps = vec![Step::MatchLiteral(lit("HELO"))];
        let mut parser = MessageParser::new(steps);
        assert!(parser.feed(b"QUIT").is_err());
    }

    #[test]
    fn unescapes_field_bytes() {
        use protodsl_core::ast::EscapeInfo;
        let steps = vec![Step::ReadUntilTerminator {
            terminator: lit("."),
            field: "name".to_string(),
            field_type: Type::Str,
            escape: Some(EscapeInfo {
                character: lit("."),
                sequence: lit(".."),
            }),
        }];
        let mut parser = MessageParser::new(steps);
        match parser.feed(b"a..b.").unwrap() {
            ParseProgress::Complete { data, .. } => {
                assert_eq!(data.get("name"), Some(&FieldValue::Str("a.b".to_string())));
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    /// A bare terminator occurrence nested inside the escape sequence must
    /// not end the field early: the field's own terminator is `"\r\n"`, but
    /// the escape sequence that stands in for a folded newline is `"\r\n "`
    /// (one `"\r\n"` followed by a space), so the scan has to look past it.
    #[test]
    fn terminator_occurring_inside_an_escape_sequence_is_not_a_match() {
        use protodsl_core::ast::EscapeInfo;
        let steps = vec![Step::ReadUntilTerminator {
            terminator: lit("\r\n"),
            field: "value".to_string(),
            field_type: Type::Str,
            escape: Some(EscapeInfo {
                character: lit("\n"),
                sequence: lit("\r\n "),
            }),
        }];
        let mut parser = MessageParser::new(steps);
        match parser.feed(b"line1\r\n line2\r\n").unwrap() {
            ParseProgress::Complete { data, consumed } => {
                assert_eq!(data.get("value"), Some(&FieldValue::Str("line1\nline2".to_string())));
                assert_eq!(consumed, "line1\r\n line2\r\n".len());
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }

    /// Dot-stuffing: the field terminator is `"\r\n.\r\n"`, and a line that
    /// legitimately starts with `"."` is escaped on the wire by doubling
    /// the leading dot (`"\n."` -> `"\n.."`), so the bare `"\r\n."` prefix
    /// of the terminator embedded in that escaped line must not match.
    #[test]
    fn dot_stuffed_terminator_inside_data_is_not_a_match() {
        use protodsl_core::ast::EscapeInfo;
        let steps = vec![Step::ReadUntilTerminator {
            terminator: lit("\r\n.\r\n"),
            field: "body".to_string(),
            field_type: Type::Str,
            escape: Some(EscapeInfo {
                character: lit("\n."),
                sequence: lit("\n.."),
            }),
        }];
        let mut parser = MessageParser::new(steps);
        match parser.feed(b"Subject\r\n..Subject too\r\n.\r\n").unwrap() {
            ParseProgress::Complete { data, .. } => {
                assert_eq!(
                    data.get("body"),
                    Some(&FieldValue::Str("Subject\r\n.Subject too".to_string()))
                );
            }
            ParseProgress::NeedMoreData { .. } => panic!("expected completion"),
        }
    }
}
