//! The typed value carried between a parser/serializer and a handler: a
//! [`MessageData`] dictionary of [`FieldValue`]s, matching the field types
//! declared on a transition (§3 Data Model).

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ast::Type;
use crate::{Error, Result};

/// One field's runtime value. The variant set mirrors [`Type`] one-to-one so
/// that a value can always be checked against its declared field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int(i64),
    Str(String),
    Array(Vec<FieldValue>),
    Tuple(Vec<(String, FieldValue)>),
    /// Raw bytes, used for fields populated by `ReadOctetsUntilTerminator`
    /// before any numeric/string coercion is applied.
    Octets(Bytes),
}

impl FieldValue {
    /// Checks this value's shape against a declared [`Type`], recursing into
    /// array elements and tuple fields. Used by the serializer and by AST
    /// validation's identifier/type compatibility check (invariant 5).
    pub fn matches_type(&self, ty: &Type) -> bool {
        match (self, ty) {
            (FieldValue::Int(_), Type::Int { .. }) => true,
            (FieldValue::Str(_), Type::Str) => true,
            (FieldValue::Octets(_), Type::Str) => true,
            (FieldValue::Array(elems), Type::Array(elem_ty)) => {
                elems.iter().all(|e| e.matches_type(elem_ty))
            }
            (FieldValue::Tuple(fields), Type::Tuple(decl)) => {
                fields.len() == decl.len()
                    && fields
                        .iter()
                        .zip(decl.iter())
                        .all(|((n1, v), (n2, t))| n1 == n2 && v.matches_type(t))
            }
            _ => false,
        }
    }

    /// Renders this value the way `WriteFromIdentifier` emits it on the wire:
    /// integers as ASCII decimal, strings/octets verbatim.
    pub fn to_wire_bytes(&self) -> Bytes {
        match self {
            FieldValue::Int(n) => Bytes::from(n.to_string().into_bytes()),
            FieldValue::Str(s) => Bytes::from(s.clone().into_bytes()),
            FieldValue::Octets(b) => b.clone(),
            FieldValue::Array(_) | FieldValue::Tuple(_) => Bytes::new(),
        }
    }
}

/// An ordered dictionary of named field values, the unit a parser produces
/// and a serializer consumes (§3 Data Model: "MessageData").
///
/// Field order is preserved (insertion order), matching the declaration
/// order in the owning transition's field list, but lookup is by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    fields: Vec<(String, FieldValue)>,
}

impl MessageData {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fetches a required field, producing the [`Error::MissingField`] a
    /// serializer reports when the handler-supplied data is incomplete.
    pub fn require(&self, message: &str, name: &str) -> Result<&FieldValue> {
        self.get(name).ok_or_else(|| Error::MissingField {
            message: message.to_string(),
            field: name.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for MessageData {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        let mut data = MessageData::new();
        for (k, v) in iter {
            data.insert(k, v);
        }
        data
    }
}

/// A declared field's type as an ordered map, used for reporting/inspection
/// where the owning [`crate::ast::Transition`] isn't at hand.
pub type TypeEnv = BTreeMap<String, Type>;
