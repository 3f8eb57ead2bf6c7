//! Per-opcode-family execution context an [`crate::frame::ExecutionStackFrame`]
//! carries alongside its accumulator (§4.4), the Rust analogue of the
//! reference interpreter's `CallbackOperationContext`/
//! `InputOutputOperationContext` (`operationconcepts.hpp`).

use crate::value::Value;

#[derive(Debug, Default)]
pub enum OperationContext {
    #[default]
    None,
    /// State for an `InvokeHost` opcode: has the callback been dispatched
    /// yet, and has its return value arrived?
    Callback {
        called: bool,
        value: Option<Value>,
    },
    /// State for `ReadUntilTerminator`/`WriteOctets`: the accumulating
    /// read buffer, or the pending write buffer and how much of it has
    /// been flushed.
    Io { buffer: Vec<u8>, flushed: usize },
}

impl OperationContext {
    pub fn new_callback() -> Self {
        OperationContext::Callback {
            called: false,
            value: None,
        }
    }

    pub fn new_io() -> Self {
        OperationContext::Io {
            buffer: Vec::new(),
            flushed: 0,
        }
    }
}
