use crate::ast::{Document, ExprId, ExprKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// A document as plain data. Casts are dropped and references are kept as
/// their path text, so cycles never reach the serializer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlainValue {
    String(String),
    Integer(i64),
    Unsigned(u64),
    Number(f64),
    Boolean(bool),
    Null,
    Array(Vec<PlainValue>),
    Object(BTreeMap<String, PlainValue>),
}

pub(crate) fn to_plain(document: &Document, id: ExprId) -> PlainValue {
    match document.arena.kind(id) {
        ExprKind::Null => PlainValue::Null,
        ExprKind::Bool(b) => PlainValue::Boolean(*b),
        ExprKind::Numeric(raw) => plain_number(raw),
        ExprKind::Value(text) => PlainValue::String(text.clone()),
        ExprKind::Reference(r) => PlainValue::String(r.path.to_string()),
        ExprKind::Cast { inner, .. } => to_plain(document, *inner),
        ExprKind::Array(items) => {
            PlainValue::Array(items.iter().map(|item| to_plain(document, *item)).collect())
        }
        ExprKind::Object(object) => {
            // Constructor arguments have no key; only properties are data.
            let map = object
                .properties
                .iter()
                .map(|(key, value)| (key.clone(), to_plain(document, *value)))
                .collect();
            PlainValue::Object(map)
        }
    }
}

fn plain_number(raw: &str) -> PlainValue {
    if let Ok(i) = raw.parse::<i64>() {
        return PlainValue::Integer(i);
    }
    if let Ok(u) = raw.parse::<u64>() {
        return PlainValue::Unsigned(u);
    }
    match raw.parse::<f64>() {
        Ok(f) => PlainValue::Number(f),
        Err(_) => PlainValue::String(raw.to_string()),
    }
}
