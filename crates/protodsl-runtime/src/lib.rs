//! Sans-I/O protocol runtime (§5): a resumable [`parser::MessageParser`]
//! and one-shot [`serializer`], composed by [`state_machine::StateMachine`]
//! into per-agent dispatch across states, driven by a [`handler::Handler`]
//! that never sees raw bytes. Every piece here consumes and produces byte
//! slices only — no sockets, no timers, no threads.

pub mod escape;
pub mod handler;
pub mod parser;
pub mod serializer;
pub mod state_machine;

pub use handler::{drive, Handler};
pub use parser::{MessageParser, ParseProgress};
pub use state_machine::{compile, CompiledAgent, StateMachine};
