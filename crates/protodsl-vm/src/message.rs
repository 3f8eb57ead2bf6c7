//! Conversions between `protodsl_core::message_data` (what a parser
//! produces and a serializer consumes) and `crate::value::Value` (what the
//! interpreter computes with) — the bridge `Opcode::ParseMessage`/
//! `Opcode::SerializeMessage` (`crate::frame`) need so a compiled
//! transition can hand its result to, and take its input from, ordinary
//! op-tree nodes. `Value::Dict` already carries SMTP-reply-shaped fields in
//! its own doctest (`crate::value`); this module makes that the VM's
//! general encoding of a `MessageData`.

use std::sync::Arc;

use bytes::Bytes;

use protodsl_core::ast::{FieldDecl, Type};
use protodsl_core::message_data::{FieldValue, MessageData};

use crate::value::{RuntimeErrorKind, Value};

/// Renders a parsed `MessageData` as a `Value::Dict`, field by field.
pub fn message_data_to_value(data: &MessageData) -> Value {
    Value::Dict(Arc::new(
        data.iter().map(|(k, v)| (k.to_string(), field_value_to_value(v))).collect(),
    ))
}

fn field_value_to_value(value: &FieldValue) -> Value {
    match value {
        // The VM's arithmetic is int32-only (§4.4); a field whose declared
        // width doesn't fit is a VM-level overflow, not a parse error.
        FieldValue::Int(n) => match i32::try_from(*n) {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Error(RuntimeErrorKind::Overflow(format!(
                "field value {n} does not fit in the interpreter's int32"
            ))),
        },
        FieldValue::Str(s) => Value::Octets(Bytes::from(s.clone().into_bytes())),
        FieldValue::Octets(b) => Value::Octets(b.clone()),
        FieldValue::Array(items) => Value::List(Arc::new(items.iter().map(field_value_to_value).collect())),
        FieldValue::Tuple(fields) => Value::Dict(Arc::new(
            fields.iter().map(|(k, v)| (k.clone(), field_value_to_value(v))).collect(),
        )),
    }
}

/// Builds a `MessageData` from a `Value::Dict`, typed by `fields`'
/// declared types — the VM has no `Str` value of its own, so a `str` field
/// is told apart from an `int`/array/tuple field by consulting the
/// transition's own field declarations, not by inspecting the `Value` alone.
pub fn value_to_message_data(value: &Value, fields: &[FieldDecl]) -> Result<MessageData, String> {
    let Value::Dict(entries) = value else {
        return Err(format!("expected a dict of message fields, got {}", value.type_name()));
    };
    let mut data = MessageData::new();
    for (name, ty) in fields {
        let (_, v) = entries
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| format!("missing field '{name}'"))?;
        data.insert(name.clone(), value_to_field_value(v, ty)?);
    }
    Ok(data)
}

fn value_to_field_value(value: &Value, ty: &Type) -> Result<FieldValue, String> {
    match ty {
        Type::Str => match value {
            Value::Octets(b) => {
                String::from_utf8(b.to_vec()).map(FieldValue::Str).map_err(|_| "field is not valid UTF-8".to_string())
            }
            other => Err(format!("expected octets for a str field, got {}", other.type_name())),
        },
        Type::Int { .. } => match value.as_int() {
            Some(n) => Ok(FieldValue::Int(i64::from(n))),
            None => Err(format!("expected an int for an int field, got {}", value.type_name())),
        },
        Type::Array(elem_ty) => match value {
            Value::List(items) => items
                .iter()
                .map(|v| value_to_field_value(v, elem_ty))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::Array),
            other => Err(format!("expected a list for an array field, got {}", other.type_name())),
        },
        Type::Tuple(decl) => match value {
            Value::Dict(entries) => decl
                .iter()
                .map(|(name, ty)| {
                    let (_, v) = entries
                        .iter()
                        .find(|(n, _)| n == name)
                        .ok_or_else(|| format!("missing tuple field '{name}'"))?;
                    Ok((name.clone(), value_to_field_value(v, ty)?))
                })
                .collect::<Result<Vec<_>, String>>()
                .map(FieldValue::Tuple),
            other => Err(format!("expected a dict for a tuple field, got {}", other.type_name())),
        },
    }
}
