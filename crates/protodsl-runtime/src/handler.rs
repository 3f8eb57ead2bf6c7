//! The seam between a [`crate::state_machine::StateMachine`] and
//! application code: a [`Handler`] is told about each message the state
//! machine finishes parsing, and is asked to supply the next one whenever
//! the machine reaches a state with outgoing writes.

use protodsl_core::message_data::MessageData;
use protodsl_core::Result;

use crate::state_machine::StateMachine;

/// Application-level callbacks driven by [`drive`]. Implementors typically
/// hold whatever session state a real protocol handler needs (a mailbox,
/// a connection's negotiated options, ...); neither method touches bytes.
pub trait Handler {
    /// A message was fully parsed off the wire.
    fn on_message(&mut self, message: &str, data: &MessageData) -> Result<()>;

    /// The state machine can write any of `writable`; return the message
    /// name and data to send next, or `None` to send nothing yet (e.g.
    /// waiting on more input before responding).
    fn provide_message(&mut self, writable: &[String]) -> Result<Option<(String, MessageData)>>;
}

/// Feeds `input` to `machine`, calling `handler.on_message` for every
/// completed read and `handler.provide_message` whenever the machine's new
/// state has outgoing writes, accumulating every byte the handler asked to
/// send in response.
pub fn drive(machine: &mut StateMachine, handler: &mut impl Handler, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let completed = machine.feed(input)?;
    for (message, data) in &completed {
        tracing::debug!(%message, "dispatching parsed message to handler");
        handler.on_message(message, data)?;
        loop {
            let writable = machine.writable_messages();
            if writable.is_empty() {
                break;
            }
            match handler.provide_message(&writable)? {
                Some((reply, data)) => {
                    tracing::debug!(message = %reply, "handler supplied reply");
                    let bytes = machine.write(&reply, &data)?;
                    out.extend_from_slice(&bytes);
                }
                None => break,
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::compile;
    use protodsl_core::ast::{Action, Agent, ReadTransition, State, Transition, Type, WriteTransition};
    use protodsl_core::constants::{CLOSED_STATE, OPEN_STATE};
    use protodsl_core::message_data::FieldValue;
    use std::sync::Arc;

    fn lit(s: &str) -> bytes::Bytes {
        bytes::Bytes::from(s.as_bytes().to_vec())
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

    struct Echo {
        greeted: Vec<String>,
    }

    impl Handler for Echo {
        fn on_message(&mut self, message: &str, data: &MessageData) -> Result<()> {
            if let Some(FieldValue::Str(domain)) = data.get("domain") {
                self.greeted.push(domain.clone());
            }
            let _ = message;
            Ok(())
        }

        fn provide_message(&mut self, writable: &[String]) -> Result<Option<(String, MessageData)>> {
            if writable.iter().any(|m| m == "Ack") {
                Ok(Some(("Ack".to_string(), MessageData::default())))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn drives_read_then_reply() {
        let compiled = Arc::new(compile(&server_agent()).unwrap());
        let mut machine = StateMachine::new(compiled, OPEN_STATE);
        let mut handler = Echo { greeted: Vec::new() };
        let out = drive(&mut machine, &mut handler, b"HELO mail.example.com\r\n").unwrap();
        assert_eq!(&out[..], b"250 OK\r\n");
        assert_eq!(handler.greeted, vec!["mail.example.com".to_string()]);
        assert_eq!(machine.current_state(), CLOSED_STATE);
    }
}
