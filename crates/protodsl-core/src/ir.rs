//! The lowered action list a transition compiles to (§2 "Action IR"): the
//! same byte-level operations as [`crate::ast::Action`], but with every
//! identifier's declared [`Type`](crate::ast::Type) resolved inline so the
//! parser and serializer runtimes (`protodsl-runtime`) never need to walk
//! back to the AST's field declarations while driving a message.
//!
//! Lowering ([`lower_read`], [`lower_write`]) assumes the owning
//! [`crate::ast::Protocol`] already passed [`crate::ast::Protocol::validate`]
//! — it re-resolves identifiers rather than re-checking every invariant, and
//! will panic-free `Err` on anything validation should already have caught,
//! but does not repeat invariant 4's lookahead analysis.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ast::{Action, EscapeInfo, FieldDecl, ReadTransition, Type, WriteTransition};
use crate::{Error, Result};

/// One lowered action. Mirrors [`Action`] one-to-one except identifiers
/// carry their resolved [`Type`] alongside the name. Derives `Serialize`/
/// `Deserialize` so `protodsl-vm` can embed a transition's steps inside an
/// `Opcode` (§4.4/§4.5's interpreter) the same way it embeds an `OpTreeNode`
/// body in `Opcode::StaticCallable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    MatchLiteral(Bytes),
    EmitLiteral(Bytes),
    ReadUntilTerminator {
        terminator: Bytes,
        field: String,
        field_type: Type,
        escape: Option<EscapeInfo>,
    },
    WriteFromField {
        field: String,
        field_type: Type,
        escape: Option<EscapeInfo>,
    },
    Loop {
        variable: String,
        collection: String,
        element_type: Type,
        terminator: Bytes,
        inner: Vec<Step>,
    },
}

/// A transition after lowering: its target state, declared fields (kept for
/// [`crate::message_data::MessageData`] construction), and [`Step`] list.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredTransition {
    pub target_state: String,
    pub fields: Vec<FieldDecl>,
    pub steps: Vec<Step>,
}

type FieldEnv<'a> = HashMap<&'a str, &'a Type>;

fn field_env(fields: &[FieldDecl]) -> FieldEnv<'_> {
    fields.iter().map(|(n, t)| (n.as_str(), t)).collect()
}

fn element_type_of(collection_type: &Type, collection: &str) -> Result<Type> {
    match collection_type {
        Type::Array(elem) => Ok((**elem).clone()),
        other => Err(Error::IncompatibleFieldType {
            identifier: collection.to_string(),
            declared_type: other.to_string(),
        }),
    }
}

fn lower_action(action: &Action, env: &FieldEnv<'_>) -> Result<Step> {
    match action {
        Action::ReadStaticOctets(lit) => Ok(Step::MatchLiteral(lit.clone())),
        Action::WriteStaticOctets(lit) => Ok(Step::EmitLiteral(lit.clone())),
        Action::ReadOctetsUntilTerminator {
            terminator,
            field,
            escape,
        } => {
            let field_type = resolve(env, field)?.clone();
            Ok(Step::ReadUntilTerminator {
                terminator: terminator.clone(),
                field: field.clone(),
                field_type,
                escape: escape.clone(),
            })
        }
        Action::WriteFromIdentifier { field, escape } => {
            let field_type = resolve(env, field)?.clone();
            Ok(Step::WriteFromField {
                field: field.clone(),
                field_type,
                escape: escape.clone(),
            })
        }
        Action::Loop {
            variable,
            collection,
            terminator,
            inner,
        } => {
            let collection_type = resolve(env, collection)?;
            let element_type = element_type_of(collection_type, collection)?;
            let inner_steps = inner
                .iter()
                .map(|a| lower_action(a, env))
                .collect::<Result<Vec<_>>>()?;
            Ok(Step::Loop {
                variable: variable.clone(),
                collection: collection.clone(),
                element_type,
                terminator: terminator.clone(),
                inner: inner_steps,
            })
        }
    }
}

fn resolve<'a>(env: &FieldEnv<'a>, identifier: &str) -> Result<&'a Type> {
    env.get(identifier).copied().ok_or_else(|| Error::UndeclaredIdentifier {
        state: String::new(),
        identifier: identifier.to_string(),
    })
}

/// Lowers a [`ReadTransition`] into a [`LoweredTransition`] the parser
/// runtime drives directly.
pub fn lower_read(transition: &ReadTransition) -> Result<LoweredTransition> {
    let env = field_env(&transition.fields);
    let steps = transition
        .actions
        .iter()
        .map(|a| lower_action(a, &env))
        .collect::<Result<Vec<_>>>()?;
    Ok(LoweredTransition {
        target_state: transition.target_state.clone(),
        fields: transition.fields.clone(),
        steps,
    })
}

/// Lowers a [`WriteTransition`] into a [`LoweredTransition`] the serializer
/// runtime drives directly.
pub fn lower_write(transition: &WriteTransition) -> Result<LoweredTransition> {
    let env = field_env(&transition.fields);
    let steps = transition
        .actions
        .iter()
        .map(|a| lower_action(a, &env))
        .collect::<Result<Vec<_>>>()?;
    Ok(LoweredTransition {
        target_state: transition.target_state.clone(),
        fields: transition.fields.clone(),
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ReadTransition;

    fn lit(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    #[test]
    fn lowers_static_octets_and_terminator_read() {
        let transition = ReadTransition {
            target_state: "AwaitMail".to_string(),
            fields: vec![("domain".to_string(), Type::Str)],
            actions: vec![
                Action::ReadStaticOctets(lit("HELO ")),
                Action::ReadOctetsUntilTerminator {
                    terminator: lit("\r\n"),
                    field: "domain".to_string(),
                    escape: None,
                },
            ],
        };
        let lowered = lower_read(&transition).unwrap();
        assert_eq!(lowered.steps.len(), 2);
        assert!(matches!(lowered.steps[0], Step::MatchLiteral(_)));
        assert!(matches!(
            lowered.steps[1],
            Step::ReadUntilTerminator { field_type: Type::Str, .. }
        ));
    }

    #[test]
    fn lowers_loop_with_element_type() {
        let transition = ReadTransition {
            target_state: "Open".to_string(),
            fields: vec![("recipients".to_string(), Type::Array(Box::new(Type::Str)))],
            actions: vec![Action::Loop {
                variable: "addr".to_string(),
                collection: "recipients".to_string(),
                terminator: lit(".\r\n"),
                inner: vec![Action::ReadOctetsUntilTerminator {
                    terminator: lit(","),
                    field: "addr".to_string(),
                    escape: None,
                }],
            }],
        };
        let lowered = lower_read(&transition).unwrap();
        match &lowered.steps[0] {
            Step::Loop { element_type, .. } => assert_eq!(*element_type, Type::Str),
            other => panic!("expected Loop step, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_identifier_fails_lowering() {
        let transition = ReadTransition {
            target_state: "Open".to_string(),
            fields: vec![],
            actions: vec![Action::ReadOctetsUntilTerminator {
                terminator: lit("\r\n"),
                field: "missing".to_string(),
                escape: None,
            }],
        };
        assert!(lower_read(&transition).is_err());
    }
}
