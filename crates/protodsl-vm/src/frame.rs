//! [`ExecutionStackFrame`]: one entry in a [`crate::continuation::Continuation`]'s
//! stack, holding the node currently executing, its accumulated child
//! results, and its opcode-family context — grounded on
//! `executionstackframe.cpp` in the reference interpreter, re-expressed as
//! enum dispatch instead of concept-constrained templates.

use std::sync::Arc;

use bytes::Bytes;

use protodsl_runtime::parser::{MessageParser, ParseProgress};
use protodsl_runtime::serializer;

use crate::context::OperationContext;
use crate::message::{message_data_to_value, value_to_message_data};
use crate::optree::{Opcode, OpTreeNode};
use crate::pad::Pad;
use crate::value::{Callable, ControlFlowInstruction, RuntimeErrorKind, Value};

/// Why a frame suspended instead of producing a value (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonForBlockedOperation {
    WaitingForCallback,
    WaitingForRead,
    WaitingForWrite,
}

/// What executing one frame produced.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The frame is done; this value is pushed to the parent frame's
    /// accumulator (or becomes the continuation's final result at depth 0).
    Value(Value),
    /// The frame cannot proceed until the driver supplies more input.
    Blocked(ReasonForBlockedOperation),
    /// A control-flow opcode (`If`, `FunctionCall`) is tail-calling into a
    /// callable's body: the current frame is replaced in place rather than
    /// popped, so deep recursion does not grow the Rust call stack.
    TailCall {
        body: Arc<OpTreeNode>,
        pad: Arc<Pad>,
    },
}

pub struct ExecutionStackFrame {
    node: OpTreeNode,
    pad: Arc<Pad>,
    accumulator: Vec<Value>,
    context: OperationContext,
}

impl ExecutionStackFrame {
    pub fn new(node: OpTreeNode, pad: Arc<Pad>) -> Self {
        let context = match node.opcode.family() {
            crate::optree::OpcodeFamily::Callback => OperationContext::new_callback(),
            crate::optree::OpcodeFamily::InputOutput => OperationContext::new_io(),
            _ => OperationContext::None,
        };
        Self {
            node,
            pad,
            accumulator: Vec::new(),
            context,
        }
    }

    pub fn pad(&self) -> &Arc<Pad> {
        &self.pad
    }

    /// Replaces this frame's node/pad/context in place for a tail call,
    /// preserving its identity as a stack slot.
    pub fn replace_for_tail_call(&mut self, body: Arc<OpTreeNode>, pad: Arc<Pad>) {
        self.node = (*body).clone();
        self.pad = pad;
        self.accumulator.clear();
        self.context = match self.node.opcode.family() {
            crate::optree::OpcodeFamily::Callback => OperationContext::new_callback(),
            crate::optree::OpcodeFamily::InputOutput => OperationContext::new_io(),
            _ => OperationContext::None,
        };
    }

    pub fn has_arguments_ready(&self) -> bool {
        match self.node.opcode.family() {
            crate::optree::OpcodeFamily::DynamicInput => {
                self.accumulator.len() >= self.node.children.len()
                    || self.accumulator.last().is_some_and(Value::short_circuits)
            }
            _ => match self.node.opcode.fixed_arity() {
                Some(n) => self.accumulator.len() >= n,
                None => self.accumulator.len() >= self.node.children.len(),
            },
        }
    }

    /// The next child node to push as a new frame, inheriting this frame's
    /// pad (siblings within one call share the same local scope).
    pub fn next_child(&self) -> OpTreeNode {
        assert!(!self.has_arguments_ready());
        self.node.children[self.accumulator.len()].clone()
    }

    pub fn push_back(&mut self, value: Value) {
        self.accumulator.push(value);
    }

    pub fn get_accumulator(&self) -> &[Value] {
        &self.accumulator
    }

    pub fn opcode(&self) -> &Opcode {
        &self.node.opcode
    }

    /// Executes this frame's opcode now that `has_arguments_ready()` is
    /// true. Errors are surfaced as `StepOutcome::Value(Value::Error(..))`,
    /// not a Rust `Result`, matching the reference interpreter's
    /// errors-as-values convention (§4.4, §4.6).
    pub fn execute(&mut self) -> StepOutcome {
        debug_assert!(self.has_arguments_ready());
        match &self.node.opcode {
            Opcode::LiteralInt(n) => StepOutcome::Value(Value::Int(*n)),
            Opcode::LiteralBool(b) => StepOutcome::Value(Value::Bool(*b)),
            Opcode::LiteralOctets(b) => StepOutcome::Value(Value::Octets(b.clone())),
            Opcode::Add => self.binary_int(|a, b| a.wrapping_add(b)),
            Opcode::Subtract => self.binary_int(|a, b| a.wrapping_sub(b)),
            Opcode::Multiply => self.binary_int(|a, b| a.wrapping_mul(b)),
            Opcode::Divide => self.divide(),
            Opcode::Equal => self.compare(|a, b| a == b),
            Opcode::Lesser => self.compare(|a, b| a < b),
            Opcode::Greater => self.compare(|a, b| a > b),
            Opcode::LesserEqual => self.compare(|a, b| a <= b),
            Opcode::GreaterEqual => self.compare(|a, b| a >= b),
            Opcode::Not => match self.accumulator[0].as_bool() {
                Some(b) => StepOutcome::Value(Value::Bool(!b)),
                None => StepOutcome::Value(Value::type_error("bool", &self.accumulator[0])),
            },
            Opcode::StaticCallable { params, body } => StepOutcome::Value(Value::Callable(Arc::new(Callable {
                params: params.clone(),
                body: Arc::clone(body),
            }))),
            Opcode::If => self.if_op(),
            Opcode::Sequence => StepOutcome::Value(
                self.accumulator
                    .last()
                    .cloned()
                    .unwrap_or(Value::Bool(false)),
            ),
            Opcode::FunctionCall => self.function_call(),
            Opcode::LoopOver => self.loop_over(),
            Opcode::InvokeHost { name } => self.invoke_host(name),
            Opcode::ReadUntilTerminator { terminator } => self.read_until_terminator(terminator),
            Opcode::WriteOctets => self.write_octets(),
            Opcode::LiteralValue(v) => StepOutcome::Value(v.clone()),
            Opcode::ParseMessage { steps, message } => self.parse_message(steps, message),
            Opcode::SerializeMessage { steps, fields, message } => self.serialize_message(steps, fields, message),
            Opcode::LexicalPadInitialize { name } => {
                let value = self.accumulator[0].clone();
                self.pad.initialize_local(name.clone(), value.clone());
                StepOutcome::Value(value)
            }
            Opcode::LexicalPadInitializeGlobal { name } => {
                let value = self.accumulator[0].clone();
                self.pad.initialize_global(name.clone(), value.clone());
                StepOutcome::Value(value)
            }
            Opcode::LexicalPadGet { name } => match self.pad.get(name) {
                Some(v) => StepOutcome::Value(v),
                None => StepOutcome::Value(Value::Error(RuntimeErrorKind::NameError(name.clone()))),
            },
            Opcode::LexicalPadSet { name } => {
                let value = self.accumulator[0].clone();
                if self.pad.set(name, value.clone()) {
                    StepOutcome::Value(value)
                } else {
                    StepOutcome::Value(Value::Error(RuntimeErrorKind::NameError(name.clone())))
                }
            }
            Opcode::DynamicList => StepOutcome::Value(Value::List(Arc::new(self.accumulator.clone()))),
        }
    }

    fn binary_int(&self, f: impl Fn(i32, i32) -> i32) -> StepOutcome {
        match (self.accumulator[0].as_int(), self.accumulator[1].as_int()) {
            (Some(a), Some(b)) => StepOutcome::Value(Value::Int(f(a, b))),
            _ => StepOutcome::Value(Value::type_error("int", &self.accumulator[0])),
        }
    }

    fn divide(&self) -> StepOutcome {
        match (self.accumulator[0].as_int(), self.accumulator[1].as_int()) {
            (Some(_), Some(0)) => {
                StepOutcome::Value(Value::Error(RuntimeErrorKind::Overflow("division by zero".to_string())))
            }
            (Some(a), Some(b)) => StepOutcome::Value(Value::Int(a / b)),
            _ => StepOutcome::Value(Value::type_error("int", &self.accumulator[0])),
        }
    }

    fn compare(&self, f: impl Fn(i32, i32) -> bool) -> StepOutcome {
        match (self.accumulator[0].as_int(), self.accumulator[1].as_int()) {
            (Some(a), Some(b)) => StepOutcome::Value(Value::Bool(f(a, b))),
            _ => StepOutcome::Value(Value::type_error("int", &self.accumulator[0])),
        }
    }

    fn if_op(&self) -> StepOutcome {
        let cond = match self.accumulator[0].as_bool() {
            Some(b) => b,
            None => return StepOutcome::Value(Value::type_error("bool", &self.accumulator[0])),
        };
        let branch = if cond { &self.accumulator[1] } else { &self.accumulator[2] };
        match branch.as_callable() {
            Some(callable) => StepOutcome::TailCall {
                body: Arc::clone(&callable.body),
                pad: Arc::clone(&self.pad),
            },
            None => StepOutcome::Value(Value::type_error("callable", branch)),
        }
    }

    fn function_call(&self) -> StepOutcome {
        let callable = match self.accumulator[0].as_callable() {
            Some(c) => c,
            None => return StepOutcome::Value(Value::type_error("callable", &self.accumulator[0])),
        };
        let args = match self.accumulator[1].as_list() {
            Some(l) => l,
            None => return StepOutcome::Value(Value::type_error("list", &self.accumulator[1])),
        };
        if args.len() != callable.params.len() {
            return StepOutcome::Value(Value::Error(RuntimeErrorKind::TypeError(format!(
                "callable expects {} argument(s), got {}",
                callable.params.len(),
                args.len()
            ))));
        }
        let call_pad = Pad::child_of(&self.pad);
        for (param, arg) in callable.params.iter().zip(args.iter()) {
            call_pad.initialize_local(param.clone(), arg.clone());
        }
        StepOutcome::TailCall {
            body: Arc::clone(&callable.body),
            pad: call_pad,
        }
    }

    /// Drives a nested continuation to completion per element rather than
    /// splicing into the outer stack (see `Opcode::LoopOver` doc comment
    /// and `DESIGN.md` for why this is a deliberate simplification).
    fn loop_over(&self) -> StepOutcome {
        let collection = match self.accumulator[0].as_list() {
            Some(l) => l,
            None => return StepOutcome::Value(Value::type_error("list", &self.accumulator[0])),
        };
        let callable = match self.accumulator[1].as_callable() {
            Some(c) => c,
            None => return StepOutcome::Value(Value::type_error("callable", &self.accumulator[1])),
        };
        if callable.params.len() != 1 {
            return StepOutcome::Value(Value::Error(RuntimeErrorKind::TypeError(
                "LoopOver callable must take exactly one parameter".to_string(),
            )));
        }
        let mut results = Vec::with_capacity(collection.len());
        for element in collection.iter() {
            let call_pad = Pad::child_of(&self.pad);
            call_pad.initialize_local(callable.params[0].clone(), element.clone());
            let mut nested = crate::continuation::Continuation::new_with_pad(
                (*callable.body).clone(),
                call_pad,
            );
            let value = match nested.run_to_completion() {
                Ok(v) => v,
                Err(reason) => {
                    return StepOutcome::Value(Value::Error(RuntimeErrorKind::TypeError(format!(
                        "LoopOver body suspended on {reason:?}, which is unsupported"
                    ))))
                }
            };
            if value.short_circuits() {
                return StepOutcome::Value(value);
            }
            results.push(value);
        }
        StepOutcome::Value(Value::List(Arc::new(results)))
    }

    fn invoke_host(&mut self, name: &str) -> StepOutcome {
        let OperationContext::Callback { called, value } = &mut self.context else {
            unreachable!("InvokeHost frame always carries a Callback context")
        };
        if let Some(v) = value.take() {
            return StepOutcome::Value(v);
        }
        if !*called {
            *called = true;
            return StepOutcome::Blocked(ReasonForBlockedOperation::WaitingForCallback);
        }
        // Arrived here with `called == true` and no value yet: still waiting.
        let _ = name;
        StepOutcome::Blocked(ReasonForBlockedOperation::WaitingForCallback)
    }

    pub fn callback_context_mut(&mut self) -> Option<(&mut bool, &mut Option<Value>)> {
        match &mut self.context {
            OperationContext::Callback { called, value } => Some((called, value)),
            _ => None,
        }
    }

    fn read_until_terminator(&mut self, terminator: &Bytes) -> StepOutcome {
        let OperationContext::Io { buffer, .. } = &self.context else {
            unreachable!("ReadUntilTerminator frame always carries an Io context")
        };
        if let Some(pos) = find_subslice(buffer, terminator) {
            let data = Bytes::copy_from_slice(&buffer[..pos]);
            StepOutcome::Value(Value::Octets(data))
        } else {
            StepOutcome::Blocked(ReasonForBlockedOperation::WaitingForRead)
        }
    }

    pub fn io_context_mut(&mut self) -> Option<(&mut Vec<u8>, &mut usize)> {
        match &mut self.context {
            OperationContext::Io { buffer, flushed } => Some((buffer, flushed)),
            _ => None,
        }
    }

    pub fn io_context(&self) -> Option<(&[u8], usize)> {
        match &self.context {
            OperationContext::Io { buffer, flushed } => Some((buffer.as_slice(), *flushed)),
            _ => None,
        }
    }

    fn write_octets(&mut self) -> StepOutcome {
        let value = self.accumulator[0].clone();
        let Value::Octets(bytes) = &value else {
            return StepOutcome::Value(Value::type_error("octets", &value));
        };
        let OperationContext::Io { buffer, flushed } = &mut self.context else {
            unreachable!("WriteOctets frame always carries an Io context")
        };
        if buffer.is_empty() && *flushed == 0 {
            buffer.extend_from_slice(bytes);
        }
        if *flushed >= buffer.len() {
            StepOutcome::Value(value)
        } else {
            StepOutcome::Blocked(ReasonForBlockedOperation::WaitingForWrite)
        }
    }

    /// Replays `protodsl_runtime::parser::MessageParser` over every byte
    /// this frame has received so far. Re-parsing from scratch on each
    /// resume (rather than keeping a `MessageParser` alive across
    /// suspensions) costs nothing a sans-I/O parser doesn't already pay for
    /// elsewhere, and keeps this frame's state to the one `Io` buffer every
    /// other I/O opcode already uses.
    fn parse_message(&mut self, steps: &Arc<Vec<protodsl_core::ir::Step>>, message: &str) -> StepOutcome {
        let OperationContext::Io { buffer, .. } = &self.context else {
            unreachable!("ParseMessage frame always carries an Io context")
        };
        let mut parser = MessageParser::new((**steps).clone());
        match parser.feed(buffer) {
            Ok(ParseProgress::Complete { data, .. }) => StepOutcome::Value(message_data_to_value(&data)),
            Ok(ParseProgress::NeedMoreData { .. }) => StepOutcome::Blocked(ReasonForBlockedOperation::WaitingForRead),
            Err(e) => StepOutcome::Value(Value::Error(RuntimeErrorKind::ProtocolMismatch(format!(
                "{message}: {e}"
            )))),
        }
    }

    fn serialize_message(
        &mut self,
        steps: &Arc<Vec<protodsl_core::ir::Step>>,
        fields: &Arc<Vec<protodsl_core::ast::FieldDecl>>,
        message: &str,
    ) -> StepOutcome {
        let value = self.accumulator[0].clone();
        let OperationContext::Io { buffer, flushed } = &mut self.context else {
            unreachable!("SerializeMessage frame always carries an Io context")
        };
        if buffer.is_empty() && *flushed == 0 {
            let data = match value_to_message_data(&value, fields) {
                Ok(d) => d,
                Err(e) => return StepOutcome::Value(Value::Error(RuntimeErrorKind::TypeError(format!("{message}: {e}")))),
            };
            match serializer::serialize(steps, &data, message) {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(e) => {
                    return StepOutcome::Value(Value::Error(RuntimeErrorKind::ProtocolMismatch(format!(
                        "{message}: {e}"
                    ))))
                }
            }
        }
        if *flushed >= buffer.len() {
            StepOutcome::Value(value)
        } else {
            StepOutcome::Blocked(ReasonForBlockedOperation::WaitingForWrite)
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
