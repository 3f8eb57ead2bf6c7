//! [`Continuation`]: the suspendable driver that steps an operation tree to
//! a value, pausing whenever a frame blocks on host I/O or a callback —
//! grounded on `continuation.cpp`'s `step()` loop (push children until the
//! top frame's arguments are ready, execute it, propagate its result to the
//! parent or finish).

use std::sync::Arc;

use crate::frame::{ExecutionStackFrame, ReasonForBlockedOperation, StepOutcome};
use crate::optree::OpTreeNode;
use crate::pad::Pad;
use crate::value::{RuntimeErrorKind, Value};

pub use crate::frame::ReasonForBlockedOperation as BlockReason;

/// Where a [`Continuation`] stands after the most recent `step()`.
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuationState {
    /// More steps can run without external input.
    Ready,
    /// Suspended; the driver must supply a callback return value or more
    /// I/O before `step()` can make progress.
    Blocked(ReasonForBlockedOperation),
    /// Finished; `get_result()` holds the final value.
    Exited,
}

pub struct Continuation {
    stack: Vec<ExecutionStackFrame>,
    #[allow(dead_code)]
    root_pad: Arc<Pad>,
    result: Option<Value>,
}

impl Continuation {
    /// A top-level continuation with its own fresh global pad.
    pub fn new(root: OpTreeNode) -> Self {
        let pad = Pad::root();
        Self::new_with_pad(root, pad)
    }

    /// A continuation whose root frame runs in a caller-supplied pad —
    /// used by `Opcode::LoopOver` (`frame.rs`) to run one loop-body
    /// invocation per element without sharing a stack with the outer
    /// continuation.
    pub fn new_with_pad(root: OpTreeNode, pad: Arc<Pad>) -> Self {
        Self {
            stack: vec![ExecutionStackFrame::new(root, Arc::clone(&pad))],
            root_pad: pad,
            result: None,
        }
    }

    pub fn get_result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Advances until the next blocking point or completion. Idempotent
    /// once `Exited`: calling again just returns `Exited` again.
    pub fn step(&mut self) -> ContinuationState {
        if self.stack.is_empty() {
            return ContinuationState::Exited;
        }
        loop {
            while !self
                .stack
                .last()
                .expect("stack non-empty inside step loop")
                .has_arguments_ready()
            {
                let child = self.stack.last().unwrap().next_child();
                let pad = Arc::clone(self.stack.last().unwrap().pad());
                self.stack.push(ExecutionStackFrame::new(child, pad));
            }

            let outcome = self
                .stack
                .last_mut()
                .expect("stack non-empty inside step loop")
                .execute();

            match outcome {
                StepOutcome::Value(value) => {
                    self.stack.pop();
                    match self.stack.last_mut() {
                        Some(parent) => {
                            parent.push_back(value);
                            // continue the loop: parent may now be ready
                        }
                        None => {
                            self.result = Some(value);
                            return ContinuationState::Exited;
                        }
                    }
                }
                StepOutcome::Blocked(reason) => return ContinuationState::Blocked(reason),
                StepOutcome::TailCall { body, pad } => {
                    self.stack
                        .last_mut()
                        .expect("stack non-empty inside step loop")
                        .replace_for_tail_call(body, pad);
                }
            }
        }
    }

    /// Runs to completion without ever expecting a blocking suspension;
    /// used for `LoopOver` bodies, which may not suspend (see
    /// `Opcode::LoopOver` doc comment).
    pub fn run_to_completion(&mut self) -> Result<Value, ReasonForBlockedOperation> {
        loop {
            match self.step() {
                ContinuationState::Ready => continue,
                ContinuationState::Blocked(reason) => return Err(reason),
                ContinuationState::Exited => {
                    return Ok(self.result.clone().unwrap_or(Value::Bool(false)))
                }
            }
        }
    }

    /// The name of the host function the top frame is waiting to invoke.
    /// Only meaningful right after `step()` returns
    /// `Blocked(WaitingForCallback)`.
    pub fn get_callback_key(&self) -> Option<&str> {
        match self.stack.last()?.opcode() {
            crate::optree::Opcode::InvokeHost { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// The arguments accumulated so far for the blocked `InvokeHost` call.
    pub fn get_callback_arguments(&self) -> Option<&[Value]> {
        self.stack.last().map(ExecutionStackFrame::get_accumulator)
    }

    /// Supplies the host's return value for the blocked `InvokeHost` call;
    /// the next `step()` call resumes with that value.
    pub fn set_callback_return(&mut self, value: Value) {
        if let Some(frame) = self.stack.last_mut() {
            if let Some((_, slot)) = frame.callback_context_mut() {
                *slot = Some(value);
            }
        }
    }

    /// Feeds bytes into the top frame's pending read buffer (for a frame
    /// blocked on `WaitingForRead`); returns the number of bytes accepted.
    pub fn handle_read(&mut self, bytes: &[u8]) -> usize {
        match self.stack.last_mut().and_then(ExecutionStackFrame::io_context_mut) {
            Some((buffer, _)) => {
                buffer.extend_from_slice(bytes);
                bytes.len()
            }
            None => 0,
        }
    }

    /// The bytes a frame blocked on `WaitingForWrite` still needs flushed.
    pub fn get_write_buffer(&self) -> &[u8] {
        match self.stack.last().and_then(ExecutionStackFrame::io_context) {
            Some((buffer, flushed)) => &buffer[flushed.min(buffer.len())..],
            None => &[],
        }
    }

    /// Records that `count` bytes of the pending write have been flushed.
    pub fn handle_write(&mut self, count: usize) {
        if let Some((_, flushed)) = self
            .stack
            .last_mut()
            .and_then(ExecutionStackFrame::io_context_mut)
        {
            *flushed += count;
        }
    }

    /// Forces this continuation to `Exited` with an error result, abandoning
    /// whatever frames are still on the stack. Used for EOF mid-read (§4.6
    /// "Interpreter opcode error ... propagates up the continuation stack as
    /// an error Value; the driver treats it like Exited with an error
    /// result") when the peer closes the transport while a frame is still
    /// `WaitingForRead`.
    pub fn fail(&mut self, reason: RuntimeErrorKind) {
        self.stack.clear();
        self.result = Some(Value::Error(reason));
    }
}
