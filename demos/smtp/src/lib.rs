//! A minimal SMTP-flavored protocol fixture: server greets, negotiates
//! EHLO, then accepts `MAIL FROM`/`RCPT TO`/`QUIT` commands in a loop.
//! Exists to drive `protodsl-core`/`protodsl-runtime`/`protodsl-codegen`
//! through a realistic multi-state, multi-read protocol end to end —
//! the workspace's other crates are tested in isolation against small
//! synthetic fixtures; this one exercises them together.

use bytes::Bytes;

use protodsl_core::ast::{Action, Agent, Protocol, ReadTransition, State, Transition, Type, WriteTransition};
use protodsl_core::constants::{CLOSED_STATE, OPEN_STATE};

pub const AWAIT_EHLO: &str = "AwaitEhlo";
pub const EHLO_ACKED: &str = "EhloAcked";
pub const AWAIT_COMMAND: &str = "AwaitCommand";
pub const MAIL_ACKED: &str = "MailAcked";
pub const RCPT_ACKED: &str = "RcptAcked";
pub const QUIT_ACKED: &str = "QuitAcked";

fn lit(s: &str) -> Bytes {
    Bytes::from(s.as_bytes().to_vec())
}

/// The server's half: greets unconditionally, then drives the EHLO/MAIL
/// FROM/RCPT TO/QUIT exchange.
pub fn server_agent() -> Agent {
    Agent::new()
        .with_state(
            OPEN_STATE,
            State::new().with_transition(
                "Greeting",
                Transition::Write(WriteTransition {
                    target_state: AWAIT_EHLO.to_string(),
                    fields: vec![("code".to_string(), Type::Int { bits: 16, unsigned: true }), ("msg".to_string(), Type::Str)],
                    actions: vec![
                        Action::WriteFromIdentifier { field: "code".to_string(), escape: None },
                        Action::WriteStaticOctets(lit(" ")),
                        Action::WriteFromIdentifier { field: "msg".to_string(), escape: None },
                        Action::WriteStaticOctets(lit("\r\n")),
                    ],
                }),
            ),
        )
        .with_state(
            AWAIT_EHLO,
            State::new().with_transition(
                "Ehlo",
                Transition::Read(ReadTransition {
                    target_state: EHLO_ACKED.to_string(),
                    fields: vec![("domain".to_string(), Type::Str)],
                    actions: vec![
                        Action::ReadStaticOctets(lit("EHLO ")),
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
            EHLO_ACKED,
            State::new().with_transition(
                "EhloAck",
                Transition::Write(WriteTransition {
                    target_state: AWAIT_COMMAND.to_string(),
                    fields: vec![],
                    actions: vec![Action::WriteStaticOctets(lit("250 OK\r\n"))],
                }),
            ),
        )
        .with_state(
            AWAIT_COMMAND,
            State::new()
                .with_transition(
                    "MailFrom",
                    Transition::Read(ReadTransition {
                        target_state: MAIL_ACKED.to_string(),
                        fields: vec![("address".to_string(), Type::Str)],
                        actions: vec![
                            Action::ReadStaticOctets(lit("MAIL FROM:")),
                            Action::ReadOctetsUntilTerminator {
                                terminator: lit("\r\n"),
                                field: "address".to_string(),
                                escape: None,
                            },
                        ],
                    }),
                )
                .with_transition(
                    "RcptTo",
                    Transition::Read(ReadTransition {
                        target_state: RCPT_ACKED.to_string(),
                        fields: vec![("address".to_string(), Type::Str)],
                        actions: vec![
                            Action::ReadStaticOctets(lit("RCPT TO:")),
                            Action::ReadOctetsUntilTerminator {
                                terminator: lit("\r\n"),
                                field: "address".to_string(),
                                escape: None,
                            },
                        ],
                    }),
                )
                .with_transition(
                    "Quit",
                    Transition::Read(ReadTransition {
                        target_state: QUIT_ACKED.to_string(),
                        fields: vec![],
                        actions: vec![Action::ReadStaticOctets(lit("QUIT\r\n"))],
                    }),
                ),
        )
        .with_state(
            MAIL_ACKED,
            State::new().with_transition(
                "MailOk",
                Transition::Write(WriteTransition {
                    target_state: AWAIT_COMMAND.to_string(),
                    fields: vec![],
                    actions: vec![Action::WriteStaticOctets(lit("250 OK\r\n"))],
                }),
            ),
        )
        .with_state(
            RCPT_ACKED,
            State::new().with_transition(
                "RcptOk",
                Transition::Write(WriteTransition {
                    target_state: AWAIT_COMMAND.to_string(),
                    fields: vec![],
                    actions: vec![Action::WriteStaticOctets(lit("250 OK\r\n"))],
                }),
            ),
        )
        .with_state(
            QUIT_ACKED,
            State::new().with_transition(
                "QuitOk",
                Transition::Write(WriteTransition {
                    target_state: CLOSED_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::WriteStaticOctets(lit("221 Bye\r\n"))],
                }),
            ),
        )
        .with_state(CLOSED_STATE, State::new())
}

/// The client's half: every server read becomes a client write and vice
/// versa, with the same state names and target states.
pub fn client_agent() -> Agent {
    Agent::new()
        .with_state(
            OPEN_STATE,
            State::new().with_transition(
                "Greeting",
                Transition::Read(ReadTransition {
                    target_state: AWAIT_EHLO.to_string(),
                    fields: vec![("code".to_string(), Type::Int { bits: 16, unsigned: true }), ("msg".to_string(), Type::Str)],
                    actions: vec![
                        Action::ReadOctetsUntilTerminator {
                            terminator: lit(" "),
                            field: "code".to_string(),
                            escape: None,
                        },
                        Action::ReadOctetsUntilTerminator {
                            terminator: lit("\r\n"),
                            field: "msg".to_string(),
                            escape: None,
                        },
                    ],
                }),
            ),
        )
        .with_state(
            AWAIT_EHLO,
            State::new().with_transition(
                "Ehlo",
                Transition::Write(WriteTransition {
                    target_state: EHLO_ACKED.to_string(),
                    fields: vec![("domain".to_string(), Type::Str)],
                    actions: vec![
                        Action::WriteStaticOctets(lit("EHLO ")),
                        Action::WriteFromIdentifier { field: "domain".to_string(), escape: None },
                        Action::WriteStaticOctets(lit("\r\n")),
                    ],
                }),
            ),
        )
        .with_state(
            EHLO_ACKED,
            State::new().with_transition(
                "EhloAck",
                Transition::Read(ReadTransition {
                    target_state: AWAIT_COMMAND.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("250 OK\r\n"))],
                }),
            ),
        )
        .with_state(
            AWAIT_COMMAND,
            State::new()
                .with_transition(
                    "MailFrom",
                    Transition::Write(WriteTransition {
                        target_state: MAIL_ACKED.to_string(),
                        fields: vec![("address".to_string(), Type::Str)],
                        actions: vec![
                            Action::WriteStaticOctets(lit("MAIL FROM:")),
                            Action::WriteFromIdentifier { field: "address".to_string(), escape: None },
                            Action::WriteStaticOctets(lit("\r\n")),
                        ],
                    }),
                )
                .with_transition(
                    "RcptTo",
                    Transition::Write(WriteTransition {
                        target_state: RCPT_ACKED.to_string(),
                        fields: vec![("address".to_string(), Type::Str)],
                        actions: vec![
                            Action::WriteStaticOctets(lit("RCPT TO:")),
                            Action::WriteFromIdentifier { field: "address".to_string(), escape: None },
                            Action::WriteStaticOctets(lit("\r\n")),
                        ],
                    }),
                )
                .with_transition(
                    "Quit",
                    Transition::Write(WriteTransition {
                        target_state: QUIT_ACKED.to_string(),
                        fields: vec![],
                        actions: vec![Action::WriteStaticOctets(lit("QUIT\r\n"))],
                    }),
                ),
        )
        .with_state(
            MAIL_ACKED,
            State::new().with_transition(
                "MailOk",
                Transition::Read(ReadTransition {
                    target_state: AWAIT_COMMAND.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("250 OK\r\n"))],
                }),
            ),
        )
        .with_state(
            RCPT_ACKED,
            State::new().with_transition(
                "RcptOk",
                Transition::Read(ReadTransition {
                    target_state: AWAIT_COMMAND.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("250 OK\r\n"))],
                }),
            ),
        )
        .with_state(
            QUIT_ACKED,
            State::new().with_transition(
                "QuitOk",
                Transition::Read(ReadTransition {
                    target_state: CLOSED_STATE.to_string(),
                    fields: vec![],
                    actions: vec![Action::ReadStaticOctets(lit("221 Bye\r\n"))],
                }),
            ),
        )
        .with_state(CLOSED_STATE, State::new())
}

pub fn smtp_protocol() -> Protocol {
    Protocol::new(client_agent(), server_agent())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_protocol_validates() {
        smtp_protocol().validate().unwrap();
    }
}
