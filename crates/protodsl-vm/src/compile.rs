//! Compiles a validated transition (`protodsl_core::ir::LoweredTransition`)
//! into an `OpTreeNode` the interpreter can execute directly.
//!
//! A whole transition compiles to a single `Opcode::ParseMessage` or
//! `Opcode::SerializeMessage` leaf/unary node, not one opcode per
//! `protodsl_core::ir::Step`. The obvious alternative — one
//! `Opcode::ReadUntilTerminator`/literal-match opcode per step, wired up as
//! sibling children — cannot represent a multi-step transition correctly:
//! `crate::frame::ExecutionStackFrame`'s IO buffer lives on the frame and is
//! dropped the moment that frame's opcode returns a value, so bytes meant
//! for a transition's second read would already be gone by the time a
//! sibling node for that second read started executing. Embedding
//! `protodsl_runtime`'s own incremental parser/serializer inside one opcode
//! sidesteps that entirely: exactly one IO suspension point per transition,
//! matching how `protodsl_runtime::state_machine::StateMachine` already
//! drives one transition to completion per `MessageParser`.

use std::sync::Arc;

use protodsl_core::ast::Transition;
use protodsl_core::ir::{lower_read, lower_write, LoweredTransition};
use protodsl_core::Result;

use crate::optree::{Opcode, OpTreeNode};
use crate::value::Value;

/// Compiles an already-lowered read transition into a `ParseMessage` leaf.
pub fn compile_read(message: &str, lowered: &LoweredTransition) -> OpTreeNode {
    OpTreeNode::leaf(Opcode::ParseMessage {
        steps: Arc::new(lowered.steps.clone()),
        message: message.to_string(),
    })
}

/// Compiles an already-lowered write transition into a `SerializeMessage`
/// node whose one child, `data`, must evaluate to a `Value::Dict` shaped
/// like `lowered.fields` — typically `literal(value)` for a handler-known
/// constant.
pub fn compile_write(message: &str, lowered: &LoweredTransition, data: OpTreeNode) -> OpTreeNode {
    OpTreeNode::with_children(
        Opcode::SerializeMessage {
            steps: Arc::new(lowered.steps.clone()),
            fields: Arc::new(lowered.fields.clone()),
            message: message.to_string(),
        },
        vec![data],
    )
}

/// Lowers and compiles one AST transition in a single step, mirroring
/// `protodsl_runtime::state_machine::compile_state`'s own read/write
/// branch. `data` is only consulted (and required) for a write transition.
pub fn compile_transition(message: &str, transition: &Transition, data: Option<OpTreeNode>) -> Result<OpTreeNode> {
    match transition {
        Transition::Read(r) => Ok(compile_read(message, &lower_read(r)?)),
        Transition::Write(w) => {
            let lowered = lower_write(w)?;
            let data = data.unwrap_or_else(|| literal(Value::Dict(Arc::new(Vec::new()))));
            Ok(compile_write(message, &lowered, data))
        }
    }
}

/// A leaf producing a constant `Value` — the usual `data` child for
/// `compile_write`.
pub fn literal(value: Value) -> OpTreeNode {
    OpTreeNode::leaf(Opcode::LiteralValue(value))
}
