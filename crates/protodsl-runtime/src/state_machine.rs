//! Drives one [`Agent`] through its declared states, dispatching each
//! incoming byte run to the right transition by a bounded lookahead over
//! the buffered prefix, and feeding it to a [`MessageParser`] until a
//! complete [`MessageData`] falls out. The read/lookahead side is the
//! sans-I/O analogue of the donor's `stream_parser.rs` two-state machine;
//! the write side is a thin wrapper over [`crate::serializer::serialize`].
//!
//! Because [`crate::ast::Protocol::validate`]'s lookahead invariant (§4.3)
//! already rejects any state whose dispatch would be ambiguous, selection
//! here never needs to backtrack: at most one candidate transition can
//! match a given buffered prefix.

use std::sync::Arc;

use bytes::Bytes;

use protodsl_core::ast::{Agent, State, Transition};
use protodsl_core::constants::CLOSED_STATE;
use protodsl_core::ir::{lower_read, lower_write, LoweredTransition};
use protodsl_core::message_data::MessageData;
use protodsl_core::{Error, Result};

use crate::parser::{MessageParser, ParseProgress};
use crate::serializer;

/// One agent's states lowered once up front, so dispatch never re-walks the
/// AST while a connection is live.
#[derive(Debug)]
pub struct CompiledAgent {
    states: Vec<(String, Vec<(String, LoweredTransition, bool)>)>,
}

impl CompiledAgent {
    fn state(&self, name: &str) -> Option<&[(String, LoweredTransition, bool)]> {
        self.states
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ts)| ts.as_slice())
    }
}

/// Lowers every transition of every state in `agent`, tagging each with
/// whether it reads or writes.
pub fn compile(agent: &Agent) -> Result<CompiledAgent> {
    let mut states = Vec::with_capacity(agent.states.len());
    for (name, state) in &agent.states {
        states.push((name.clone(), compile_state(state)?));
    }
    Ok(CompiledAgent { states })
}

fn compile_state(state: &State) -> Result<Vec<(String, LoweredTransition, bool)>> {
    state
        .transitions
        .iter()
        .map(|(message, transition)| match transition {
            Transition::Read(r) => lower_read(r).map(|lt| (message.clone(), lt, true)),
            Transition::Write(w) => lower_write(w).map(|lt| (message.clone(), lt, false)),
        })
        .collect()
}

/// A transition's dispatch signature over the lowered [`protodsl_core::ir::Step`]
/// list: either a bounded static prefix, or an unbounded scan. Mirrors
/// `protodsl_core::ast`'s private AST-level lookahead signature, but
/// computed over [`protodsl_core::ir::Step`] since the runtime only ever
/// holds lowered transitions, never raw [`Action`]s.
enum Signature<'a> {
    Literal(&'a Bytes),
    Scan,
}

fn first_signature(steps: &[protodsl_core::ir::Step]) -> Signature<'_> {
    use protodsl_core::ir::Step;
    match steps.first() {
        Some(Step::MatchLiteral(lit)) => Signature::Literal(lit),
        Some(Step::Loop { terminator, inner, .. }) => {
            if inner.is_empty() {
                Signature::Literal(terminator)
            } else {
                first_signature(inner)
            }
        }
        _ => Signature::Scan,
    }
}

/// Drives a single agent's side of a connection: current state, an
/// in-progress inbound message (if any), and the compiled transition table.
#[derive(Debug)]
pub struct StateMachine {
    compiled: Arc<CompiledAgent>,
    state: String,
    pending: Option<(String, String, MessageParser)>,
}

impl StateMachine {
    pub fn new(compiled: Arc<CompiledAgent>, initial_state: impl Into<String>) -> Self {
        Self {
            compiled,
            state: initial_state.into(),
            pending: None,
        }
    }

    pub fn current_state(&self) -> &str {
        &self.state
    }

    /// Side-effect-free readiness probe, distinct from actually dispatching
    /// a read: true if `buffer` already carries enough bytes for lookahead
    /// to commit to one read transition out of the current state, without
    /// selecting or reserving it. Lets a driver decide whether it is worth
    /// calling `feed` yet rather than doing so speculatively on every
    /// partial read. Because `Protocol::validate`'s invariant 4 already
    /// rejects any two literal-signature transitions sharing a prefix
    /// byte, this resolves to "a decision is possible" as soon as `buffer`
    /// is non-empty; it stays a named, separate probe (rather than being
    /// folded into `select_read`) so it keeps working if that invariant
    /// ever becomes less conservative.
    pub fn ready_to_evaluate(&self, buffer: &[u8]) -> bool {
        !buffer.is_empty() && self.select_read(buffer).is_ok()
    }

    /// Feeds bytes for the agent's current read transitions, returning every
    /// `(message, MessageData)` pair completed by this call. Resumes any
    /// in-progress message across calls.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<(String, MessageData)>> {
        let mut input = bytes;
        let mut completed = Vec::new();
        loop {
            if self.pending.is_none() {
                if input.is_empty() {
                    return Ok(completed);
                }
                let (message, target, steps) = self.select_read(input)?;
                self.pending = Some((message, target, MessageParser::new(steps)));
            }
            let (message, target, parser) = self.pending.as_mut().expect("just populated");
            match parser.feed(input)? {
                ParseProgress::NeedMoreData { .. } => return Ok(completed),
                ParseProgress::Complete { data, consumed } => {
                    let message = message.clone();
                    let target = target.clone();
                    tracing::debug!(from = %self.state, to = %target, %message, "read transition completed");
                    self.pending = None;
                    self.state = target;
                    completed.push((message, data));
                    input = &input[consumed..];
                }
            }
        }
    }

    /// Forwards EOF to the active parser (§4.3). Once bytes have started
    /// landing in a parser (`self.pending` is `Some`), `MessageParser::feed`
    /// has already buffered at least one of them, so a message is always
    /// "mid-read" the moment it exists — EOF here is always an error, the
    /// peer closed before finishing what it started. With nothing pending,
    /// closing is valid exactly when some read transition out of the
    /// current state (or the current state itself) targets `Closed` — the
    /// EOF probe §4.3's lookahead dispatch describes (§4.1, §4.6, §8's
    /// EOF-semantics property).
    pub fn on_eof(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::ProtocolMismatch {
                state: self.state.clone(),
                reason: "peer closed the connection mid-message".to_string(),
            });
        }

        if self.state == CLOSED_STATE {
            return Ok(());
        }

        let transitions = self.compiled.state(&self.state).ok_or_else(|| Error::ProtocolMismatch {
            state: self.state.clone(),
            reason: "current state is not present in the compiled agent".to_string(),
        })?;
        let accepts_eof = transitions
            .iter()
            .any(|(_, lowered, is_read)| *is_read && lowered.target_state == CLOSED_STATE);
        if accepts_eof {
            tracing::debug!(from = %self.state, "EOF accepted, no transition pending");
            self.state = CLOSED_STATE.to_string();
            Ok(())
        } else {
            Err(Error::ProtocolMismatch {
                state: self.state.clone(),
                reason: "peer closed the connection with no transition from this state accepting EOF".to_string(),
            })
        }
    }

    /// `current_state == Closed` (§4.3).
    pub fn is_closed(&self) -> bool {
        self.state == CLOSED_STATE
    }

    fn select_read(&self, buffer: &[u8]) -> Result<(String, String, Vec<protodsl_core::ir::Step>)> {
        let transitions = self.compiled.state(&self.state).ok_or_else(|| Error::ProtocolMismatch {
            state: self.state.clone(),
            reason: "current state is not present in the compiled agent".to_string(),
        })?;
        let mut scan_candidate = None;
        for (message, lowered, is_read) in transitions {
            if !is_read {
                continue;
            }
            match first_signature(&lowered.steps) {
                Signature::Literal(lit) => {
                    let prefix_len = lit.len().min(buffer.len());
                    if buffer[..prefix_len] == lit[..prefix_len] {
                        tracing::trace!(state = %self.state, %message, "lookahead committed to literal transition");
                        return Ok((message.clone(), lowered.target_state.clone(), lowered.steps.clone()));
                    }
                }
                Signature::Scan => {
                    scan_candidate.get_or_insert((message.clone(), lowered.target_state.clone(), lowered.steps.clone()));
                }
            }
        }
        if let Some((message, ..)) = &scan_candidate {
            tracing::trace!(state = %self.state, message = %message, "lookahead fell back to scanning transition");
        }
        scan_candidate.ok_or_else(|| {
            tracing::debug!(state = %self.state, ?buffer, "no read transition matches buffered prefix");
            Error::ProtocolMismatch {
                state: self.state.clone(),
                reason: format!("no read transition matches buffered prefix {buffer:?}"),
            }
        })
    }

    /// Serializes `data` for `message`, advancing to the transition's target
    /// state on success.
    pub fn write(&mut self, message: &str, data: &MessageData) -> Result<Bytes> {
        let transitions = self.compiled.state(&self.state).ok_or_else(|| Error::ProtocolMismatch {
            state: self.state.clone(),
            reason: "current state is not present in the compiled agent".to_string(),
        })?;
        let (_, lowered, _) = transitions
            .iter()
            .find(|(name, _, is_read)| !is_read && name == message)
            .ok_or_else(|| Error::HandlerError {
                state: self.state.clone(),
                returned: message.to_string(),
            })?;
        let bytes = serializer::serialize(&lowered.steps, data, message)?;
        let target_state = lowered.target_state.clone();
        tracing::debug!(from = %self.state, to = %target_state, %message, "write transition completed");
        self.state = target_state;
        Ok(bytes)
    }

    /// Message names writable from the current state, in declaration order.
    pub fn writable_messages(&self) -> Vec<String> {
        self.compiled
            .state(&self.state)
            .into_iter()
            .flatten()
            .filter(|(_, _, is_read)| !is_read)
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    /// Message names readable from the current state, in declaration order.
    pub fn readable_messages(&self) -> Vec<String> {
        self.compiled
            .state(&self.state)
            .into_iter()
            .flatten()
            .filter(|(_, _, is_read)| *is_read)
            .map(|(name, _, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protodsl_core::ast::{Action, Agent, ReadTransition, State, Type, WriteTransition};
    use protodsl_core::constants::{CLOSED_STATE, OPEN_STATE};
    use protodsl_core::message_data::FieldValue;

    fn lit(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    fn server_agent() -> Agent {
        Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Helo",
                    Transition::Read(ReadTransition {
                        target_state: "Greeted".to_string(),
                        fields: vec![("domain".to_string(), Type::Str)],
                        actions: vec![
                            Action::ReadStaticOctets(lit("HELO ")),
                            Action::ReadOctetsUntilTerminator {
                                terminator: lit("\r\n"),
                                field: "domain".to_string(),
                                escape: None,
                            },
                        ],
                    }),
                ),
            )
            .with_state(
                "Greeted",
                State::new().with_transition(
                    "Ack",
                    Transition::Write(WriteTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![],
                        actions: vec![Action::WriteStaticOctets(lit("250 OK\r\n"))],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new())
    }

    #[test]
    fn reads_then_writes_across_states() {
        let compiled = Arc::new(compile(&server_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        let completed = machine.feed(b"HELO mail.example.com\r\n").unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, "Helo");
        assert_eq!(machine.current_state(), "Greeted");

        let out = machine.write("Ack", &MessageData::default()).unwrap();
        assert_eq!(&out[..], b"250 OK\r\n");
        assert_eq!(machine.current_state(), CLOSED_STATE);
    }

    #[test]
    fn resumes_read_across_feed_calls() {
        let compiled = Arc::new(compile(&server_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        assert!(machine.feed(b"HELO mail.ex").unwrap().is_empty());
        let completed = machine.feed(b"ample.com\r\n").unwrap();
        assert_eq!(
            completed[0].1.get("domain"),
            Some(&FieldValue::Str("mail.example.com".to_string()))
        );
    }

    #[test]
    fn ready_to_evaluate_is_false_until_bytes_arrive() {
        let compiled = Arc::new(compile(&server_agent()).unwrap());
        let machine = StateMachine::new(compiled, OPEN_STATE);
        assert!(!machine.ready_to_evaluate(b""));
        assert!(machine.ready_to_evaluate(b"H"));
        assert!(!machine.ready_to_evaluate(b"X"));
    }

    #[test]
    fn write_from_wrong_state_is_rejected() {
        let compiled = Arc::new(compile(&server_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        assert!(machine.write("Ack", &MessageData::default()).is_err());
    }

    fn quit_agent() -> Agent {
        Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Quit",
                    Transition::Read(ReadTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![],
                        actions: vec![Action::ReadStaticOctets(lit("QUIT\r\n"))],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new())
    }

    #[test]
    fn eof_with_nothing_pending_closes_when_a_transition_targets_closed() {
        let compiled = Arc::new(compile(&quit_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        assert!(!machine.is_closed());
        machine.on_eof().unwrap();
        assert!(machine.is_closed());
    }

    #[test]
    fn eof_mid_message_is_an_error() {
        let compiled = Arc::new(compile(&quit_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        assert!(machine.feed(b"QUI").unwrap().is_empty());
        assert!(machine.on_eof().is_err());
        assert!(!machine.is_closed());
    }

    #[test]
    fn eof_with_no_closing_transition_is_an_error() {
        let compiled = Arc::new(compile(&server_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        assert!(machine.on_eof().is_err());
        assert!(!machine.is_closed());
    }

    #[test]
    fn eof_on_an_already_closed_machine_is_a_no_op() {
        let compiled = Arc::new(compile(&quit_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, CLOSED_STATE);
        machine.on_eof().unwrap();
        assert!(machine.is_closed());
    }

    #[test]
    fn pipelined_messages_in_one_feed_call_are_both_completed() {
        let agent = Agent::new()
            .with_state(
                OPEN_STATE,
                State::new().with_transition(
                    "Ping",
                    Transition::Read(ReadTransition {
                        target_state: "Pinged".to_string(),
                        fields: vec![],
                        actions: vec![Action::ReadStaticOctets(lit("PING\r\n"))],
                    }),
                ),
            )
            .with_state(
                "Pinged",
                State::new().with_transition(
                    "Ping",
                    Transition::Read(ReadTransition {
                        target_state: CLOSED_STATE.to_string(),
                        fields: vec![],
                        actions: vec![Action::ReadStaticOctets(lit("PING\r\n"))],
                    }),
                ),
            )
            .with_state(CLOSED_STATE, State::new());
        let compiled = Arc::new(compile(&agent).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        let completed = machine.feed(b"PING\r\nPING\r\n").unwrap();
        assert_eq!(completed.len(), 2);
        assert!(machine.is_closed());
    }
}
