//! Stack-machine interpreter for action programs (§4.4): the operation
//! tree/opcode encoding, a two-level lexical variable pad, and a
//! suspendable [`continuation::Continuation`] driver that steps a tree to a
//! value, pausing on host callbacks or pending I/O rather than blocking a
//! thread. [`scheduler`] layers the multi-threaded collection-of-connections
//! model (§5, §9) on top: a driver thread sweeps many continuations, a
//! callback thread answers their host-function requests, and transport
//! threads feed/drain their byte buffers, all coordinated through
//! [`scheduler::Notifier`] rather than raw condvars.

pub mod compile;
pub mod context;
pub mod continuation;
pub mod frame;
pub mod message;
pub mod optree;
pub mod pad;
pub mod scheduler;
pub mod value;

pub use compile::{compile_read, compile_transition, compile_write, literal};
pub use continuation::{BlockReason, Continuation, ContinuationState};
pub use frame::ReasonForBlockedOperation;
pub use message::{message_data_to_value, value_to_message_data};
pub use optree::{OpTreeNode, Opcode, OpcodeFamily};
pub use pad::Pad;
pub use scheduler::{
    CallbackRequest, CallbackResponse, ConnectionContext, DriveOutcome,
    InterpreterCollectionManager, Notifier,
};
pub use value::{Callable, ControlFlowInstruction, RuntimeErrorKind, Value};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
