//! The VM's tagged-union runtime value (§4.4 "Values"): int32, boolean,
//! octet-string, dynamic-list, dictionary, callable, and runtime-error-kind,
//! all sharing one `Value` enum rather than a class hierarchy.
//!
//! Errors are ordinary values here, not a separate failure channel: an
//! opcode that fails produces `Value::Error(..)` exactly like one that
//! succeeds produces `Value::Int(..)`, and it is up to the surrounding
//! accumulator logic ([`crate::frame`]) to decide whether to keep
//! evaluating or short-circuit. This mirrors the interpreted reference's
//! own `value::RuntimeError` variant living inside its value variant, not
//! as a thrown exception.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::optree::OpTreeNode;

/// Why an opcode failed. Carried as a `Value`, not a Rust `Error`, so it
/// can flow through an operation tree's accumulator the same way any other
/// value does (§4.4, §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeErrorKind {
    NameError(String),
    TypeError(String),
    ProtocolMismatch(String),
    Overflow(String),
}

impl std::fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeErrorKind::NameError(n) => write!(f, "name error: '{n}' is not bound"),
            RuntimeErrorKind::TypeError(msg) => write!(f, "type error: {msg}"),
            RuntimeErrorKind::ProtocolMismatch(msg) => write!(f, "protocol mismatch: {msg}"),
            RuntimeErrorKind::Overflow(msg) => write!(f, "overflow: {msg}"),
        }
    }
}

/// A non-value control signal (e.g. a loop break) that, like
/// [`RuntimeErrorKind`], travels through the accumulator as a `Value` so
/// dynamic-input opcodes can recognize and short-circuit on it without a
/// separate exception channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlFlowInstruction {
    Break,
    Return,
}

/// A closure: an operation-tree body plus the parameter names
/// [`crate::optree::Opcode::FunctionCall`] binds its argument list against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callable {
    pub params: Vec<String>,
    pub body: Arc<OpTreeNode>,
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && Arc::ptr_eq(&self.body, &other.body)
    }
}

/// `Dict`'s round-trip through `serde_json` is what snapshot-tests a VM
/// run's captured state (§10 "Serialization"); `Callable`'s body
/// round-trips as the same `OpTreeNode` tree it closed over, so a
/// serialized closure can still be called after deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Octets(Bytes),
    List(Arc<Vec<Value>>),
    Dict(Arc<Vec<(String, Value)>>),
    Callable(Arc<Callable>),
    Error(RuntimeErrorKind),
    ControlFlow(ControlFlowInstruction),
}

impl Value {
    /// True for the two variants that make a dynamic-input opcode stop
    /// accumulating children early rather than waiting for every child
    /// (§4.4: "Dynamic input ... accept all child results including
    /// errors", grounded in `executionstackframe.cpp`'s
    /// `DynamicInputOperationConcept` specialization).
    pub fn short_circuits(&self) -> bool {
        matches!(self, Value::Error(_) | Value::ControlFlow(_))
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Arc<Callable>> {
        match self {
            Value::Callable(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Arc<Vec<Value>>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Octets(_) => "octets",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Callable(_) => "callable",
            Value::Error(_) => "error",
            Value::ControlFlow(_) => "control-flow",
        }
    }

    pub fn type_error(expected: &str, got: &Value) -> Value {
        Value::Error(RuntimeErrorKind::TypeError(format!(
            "expected {expected}, got {}",
            got.type_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::Int(1), "int")]
    #[case(Value::Bool(true), "bool")]
    #[case(Value::Octets(bytes::Bytes::from_static(b"x")), "octets")]
    #[case(Value::List(Arc::new(Vec::new())), "list")]
    #[case(Value::Error(RuntimeErrorKind::NameError("x".into())), "error")]
    #[case(Value::ControlFlow(ControlFlowInstruction::Break), "control-flow")]
    fn type_name_matches_variant(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.type_name(), expected);
    }

    #[test]
    fn error_and_control_flow_short_circuit() {
        assert!(Value::Error(RuntimeErrorKind::NameError("x".into())).short_circuits());
        assert!(Value::ControlFlow(ControlFlowInstruction::Break).short_circuits());
        assert!(!Value::Int(1).short_circuits());
    }

    #[test]
    fn dict_value_survives_a_json_roundtrip() {
        let dict = Value::Dict(Arc::new(vec![
            ("code".to_string(), Value::Int(220)),
            ("msg".to_string(), Value::Octets(Bytes::from_static(b"Welcome"))),
        ]));
        let json = serde_json::to_string(&dict).unwrap();
        let recovered: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(dict, recovered);
    }

    #[test]
    fn type_error_names_both_types() {
        let err = Value::type_error("int", &Value::Bool(true));
        match err {
            Value::Error(RuntimeErrorKind::TypeError(msg)) => {
                assert!(msg.contains("int") && msg.contains("bool"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
