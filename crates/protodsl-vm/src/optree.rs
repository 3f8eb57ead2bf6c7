//! The operation tree: the VM's instruction encoding (§4.4). Every node
//! carries an [`Opcode`] tag and a list of child subtrees whose evaluated
//! values become its arguments — dispatch is by matching on the tag, not
//! by a per-opcode trait object hierarchy, the Rust-idiomatic analogue of
//! the reference interpreter's `OperationConcept` template family
//! (`operationconcepts.hpp`): `Interpreted`, `ControlFlow`, `Callback`,
//! `InputOutput`, `LexicalPad`, `DynamicInput`.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use protodsl_core::ast::FieldDecl;
use protodsl_core::ir::Step;

use crate::value::Value;

/// Which family of [`Opcode`] dispatch applies (§4.4). Determines what
/// [`crate::frame::ExecutionStackFrame`] context the opcode needs and how
/// its arity is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeFamily {
    Interpreted,
    ControlFlow,
    Callback,
    InputOutput,
    LexicalPad,
    DynamicInput,
}

/// One opcode tag. Arity (how many children must evaluate before this
/// node executes) is fixed per-opcode except for the two `DynamicInput`
/// opcodes, whose arity is simply "all declared children" and whose
/// accumulation can still end early on an error/control-flow value
/// (`Value::short_circuits`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    // --- Interpreted: pure computation, cannot block ---
    LiteralInt(i32),
    LiteralBool(bool),
    LiteralOctets(Bytes),
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    Lesser,
    Greater,
    LesserEqual,
    GreaterEqual,
    Not,
    /// A leaf that closes over a body subtree without executing it,
    /// producing a `Value::Callable` — grounded on `operation::StaticCallable`
    /// (`009-recursive-factorial.cpp`).
    StaticCallable { params: Vec<String>, body: Arc<OpTreeNode> },
    /// A leaf producing any constant `Value` verbatim — the `Dict`/`List`
    /// analogue of `LiteralInt`/`LiteralBool`/`LiteralOctets`, used to hand
    /// a compiled write transition (`crate::compile::compile_write`) a
    /// constant `MessageData` to serialize.
    LiteralValue(Value),

    // --- Control flow: may replace the current stack frame's callable ---
    /// `(cond: bool, then: Callable, else: Callable) -> tail-call into the
    /// chosen branch's body`, grounded on `operation::If`
    /// (`006-operator-if.cpp`).
    If,
    /// Evaluate every child for effect, producing the last child's value.
    Sequence,
    /// `(callable: Callable, args: List) -> tail-call into callable.body`
    /// with `callable.params` bound to `args` in a new child pad.
    FunctionCall,
    /// `(collection: List, callable: Callable taking one parameter) ->
    /// List` of per-element results, short-circuiting on the first
    /// error/control-flow element. Unlike `If`/`FunctionCall`, this runs
    /// its element invocations as a nested continuation driven to
    /// completion rather than splicing into the outer stack, so a loop
    /// body must not itself suspend on I/O or a callback (documented
    /// simplification, see `DESIGN.md`).
    LoopOver,

    // --- Callback: invoke a host function by name ---
    /// `(args: List) -> Value`, suspending with `WaitingForCallback` until
    /// the driver supplies the host's return value.
    InvokeHost { name: String },

    // --- I/O: suspend until bytes are available/flushed ---
    /// Reads until `terminator` is seen, producing `Value::Octets` of the
    /// bytes before it (terminator itself is consumed, not included).
    ReadUntilTerminator { terminator: Bytes },
    /// `(value: Octets) -> Value::Octets` (echoes what it wrote), once the
    /// driver has drained the write buffer.
    WriteOctets,
    /// Drives one transition's lowered [`Step`] list to completion with a
    /// single `protodsl_runtime::parser::MessageParser`, suspending on
    /// `WaitingForRead` until it has seen a whole message, and producing the
    /// parsed `MessageData` as a `Value::Dict` (`crate::message`). A whole
    /// transition compiles to one of these rather than one opcode per
    /// `Step`, because the frame's IO buffer does not survive past one
    /// suspending read (see `DESIGN.md`).
    ParseMessage { steps: Arc<Vec<Step>>, message: String },
    /// `(data: Dict) -> Dict` (echoes what it serialized): renders `data`
    /// against one transition's lowered [`Step`] list with
    /// `protodsl_runtime::serializer::serialize`, typed by `fields`, then
    /// suspends on `WaitingForWrite` like `WriteOctets` until the result is
    /// flushed.
    SerializeMessage {
        steps: Arc<Vec<Step>>,
        fields: Arc<Vec<FieldDecl>>,
        message: String,
    },

    // --- Lexical pad: scoped variable environment ---
    LexicalPadInitialize { name: String },
    LexicalPadInitializeGlobal { name: String },
    LexicalPadGet { name: String },
    LexicalPadSet { name: String },

    // --- Dynamic input: variadic, short-circuits on error/control-flow ---
    /// `(children...) -> Value::List` of all evaluated elements.
    DynamicList,
}

impl Opcode {
    pub fn family(&self) -> OpcodeFamily {
        use Opcode::*;
        match self {
            LiteralInt(_) | LiteralBool(_) | LiteralOctets(_) | LiteralValue(_) | Add
            | Subtract | Multiply | Divide | Equal | Lesser | Greater | LesserEqual
            | GreaterEqual | Not | StaticCallable { .. } => OpcodeFamily::Interpreted,
            If | Sequence | FunctionCall | LoopOver => OpcodeFamily::ControlFlow,
            InvokeHost { .. } => OpcodeFamily::Callback,
            ReadUntilTerminator { .. } | WriteOctets | ParseMessage { .. } | SerializeMessage { .. } => {
                OpcodeFamily::InputOutput
            }
            LexicalPadInitialize { .. }
            | LexicalPadInitializeGlobal { .. }
            | LexicalPadGet { .. }
            | LexicalPadSet { .. } => OpcodeFamily::LexicalPad,
            DynamicList => OpcodeFamily::DynamicInput,
        }
    }

    /// Declared arity for every opcode except `Sequence`/`DynamicList`,
    /// whose arity is "however many children the tree declares" (returned
    /// as `None` here).
    pub fn fixed_arity(&self) -> Option<usize> {
        use Opcode::*;
        match self {
            LiteralInt(_) | LiteralBool(_) | LiteralOctets(_) | LiteralValue(_)
            | StaticCallable { .. } | LexicalPadGet { .. } | ParseMessage { .. } => Some(0),
            Not | LexicalPadInitialize { .. } | LexicalPadInitializeGlobal { .. }
            | LexicalPadSet { .. } | InvokeHost { .. } | ReadUntilTerminator { .. }
            | WriteOctets | SerializeMessage { .. } => Some(1),
            Add | Subtract | Multiply | Divide | Equal | Lesser | Greater | LesserEqual
            | GreaterEqual | FunctionCall | LoopOver => Some(2),
            If => Some(3),
            Sequence | DynamicList => None,
        }
    }
}

/// A node in the operation tree: an opcode plus its static children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpTreeNode {
    pub opcode: Opcode,
    pub children: Vec<OpTreeNode>,
}

impl OpTreeNode {
    pub fn leaf(opcode: Opcode) -> Self {
        Self {
            opcode,
            children: Vec::new(),
        }
    }

    pub fn with_children(opcode: Opcode, children: Vec<OpTreeNode>) -> Self {
        Self { opcode, children }
    }
}

impl Opcode {
    /// The bare opcode tag, with no operand data — the head of one
    /// [`OpTreeNode`]'s [`Display`](std::fmt::Display) line.
    fn tag(&self) -> &'static str {
        use Opcode::*;
        match self {
            LiteralInt(_) => "LiteralInt",
            LiteralBool(_) => "LiteralBool",
            LiteralOctets(_) => "LiteralOctets",
            Add => "Add",
            Subtract => "Subtract",
            Multiply => "Multiply",
            Divide => "Divide",
            Equal => "Equal",
            Lesser => "Lesser",
            Greater => "Greater",
            LesserEqual => "LesserEqual",
            GreaterEqual => "GreaterEqual",
            Not => "Not",
            StaticCallable { .. } => "StaticCallable",
            LiteralValue(_) => "LiteralValue",
            If => "If",
            Sequence => "Sequence",
            FunctionCall => "FunctionCall",
            LoopOver => "LoopOver",
            InvokeHost { .. } => "InvokeHost",
            ReadUntilTerminator { .. } => "ReadUntilTerminator",
            WriteOctets => "WriteOctets",
            ParseMessage { .. } => "ParseMessage",
            SerializeMessage { .. } => "SerializeMessage",
            LexicalPadInitialize { .. } => "LexicalPadInitialize",
            LexicalPadInitializeGlobal { .. } => "LexicalPadInitializeGlobal",
            LexicalPadGet { .. } => "LexicalPadGet",
            LexicalPadSet { .. } => "LexicalPadSet",
            DynamicList => "DynamicList",
        }
    }

    /// The opcode's own operand, rendered inline (e.g. the literal value,
    /// the callback/field name, the terminator bytes) — empty for opcodes
    /// whose only operands are their children.
    fn operand(&self) -> Option<String> {
        use Opcode::*;
        match self {
            LiteralInt(n) => Some(n.to_string()),
            LiteralBool(b) => Some(b.to_string()),
            LiteralOctets(b) => Some(format!("{b:?}")),
            LiteralValue(v) => Some(format!("{v:?}")),
            InvokeHost { name } => Some(name.clone()),
            ReadUntilTerminator { terminator } => Some(format!("{terminator:?}")),
            ParseMessage { message, .. } => Some(message.clone()),
            SerializeMessage { message, .. } => Some(message.clone()),
            LexicalPadInitialize { name }
            | LexicalPadInitializeGlobal { name }
            | LexicalPadGet { name }
            | LexicalPadSet { name } => Some(name.clone()),
            _ => None,
        }
    }
}

/// A human-readable tree dump, grounded in the reference interpreter's
/// `stringify()` (§10 "Stringified operation trees") — used for debugging
/// a malformed operation tree and in doctest examples.
///
/// ```
/// use protodsl_vm::optree::{OpTreeNode, Opcode};
///
/// let tree = OpTreeNode::with_children(
///     Opcode::Add,
///     vec![OpTreeNode::leaf(Opcode::LiteralInt(2)), OpTreeNode::leaf(Opcode::LiteralInt(3))],
/// );
/// assert_eq!(tree.to_string(), "Add(LiteralInt(2), LiteralInt(3))");
/// ```
impl std::fmt::Display for OpTreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode.tag())?;
        let operand = self.opcode.operand();
        if operand.is_none() && self.children.is_empty() {
            return Ok(());
        }
        write!(f, "(")?;
        let mut first = true;
        if let Some(operand) = operand {
            write!(f, "{operand}")?;
            first = false;
        }
        for child in &self.children {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{child}")?;
            first = false;
        }
        write!(f, ")")
    }
}
