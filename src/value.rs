use crate::types::Type;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(char),
    Str(String),
    Enum { type_name: String, variant: String },
    Object(ObjectId),
}

impl Value {
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn enum_variant(type_name: impl Into<String>, variant: impl Into<String>) -> Self {
        Value::Enum {
            type_name: type_name.into(),
            variant: variant.into(),
        }
    }

    /// The type a value has at runtime; objects report the type stored on
    /// the heap.
    pub fn runtime_type(&self, heap: &Heap) -> Option<Type> {
        use crate::types::{FloatKind, IntKind};
        Some(match self {
            Value::Null => Type::Any,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int(IntKind::I64),
            Value::UInt(_) => Type::Int(IntKind::U64),
            Value::Float(_) => Type::Float(FloatKind::F64),
            Value::Char(_) => Type::Char,
            Value::Str(_) => Type::String,
            Value::Enum { type_name, .. } => Type::Named(type_name.clone()),
            Value::Object(id) => heap.get(*id)?.ty.clone(),
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Named fields of a record or a generic map, in insertion order.
    Fields(Vec<(String, Value)>),
    /// Elements of a collection.
    Items(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub ty: Type,
    pub body: Body,
}

impl Object {
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.body {
            Body::Fields(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            Body::Items(_) => None,
        }
    }

    pub fn fields(&self) -> &[(String, Value)] {
        match &self.body {
            Body::Fields(fields) => fields,
            Body::Items(_) => &[],
        }
    }

    pub fn items(&self) -> &[Value] {
        match &self.body {
            Body::Items(items) => items,
            Body::Fields(_) => &[],
        }
    }
}

/// Arena of live objects. Handles stay valid for the life of the heap, so an
/// object has an identity before its fields are filled in.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, object: Object) -> ObjectId {
        self.objects.push(object);
        ObjectId(self.objects.len() - 1)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id.0)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(id.0)
    }

    /// Allocates a record or map with the given fields.
    pub fn record<K: Into<String>>(
        &mut self,
        ty: Type,
        fields: impl IntoIterator<Item = (K, Value)>,
    ) -> ObjectId {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.alloc(Object {
            ty,
            body: Body::Fields(fields),
        })
    }

    /// Allocates a collection with the given items.
    pub fn collection(&mut self, ty: Type, items: impl IntoIterator<Item = Value>) -> ObjectId {
        self.alloc(Object {
            ty,
            body: Body::Items(items.into_iter().collect()),
        })
    }

    pub fn field(&self, id: ObjectId, name: &str) -> Option<&Value> {
        self.get(id)?.field(name)
    }

    /// Sets a field, replacing an existing one in place or appending it.
    /// Returns `false` when `id` does not name a record.
    pub fn set_field(&mut self, id: ObjectId, name: &str, value: Value) -> bool {
        let Some(Object {
            body: Body::Fields(fields),
            ..
        }) = self.get_mut(id)
        else {
            return false;
        };
        match fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = value,
            None => fields.push((name.to_string(), value)),
        }
        true
    }

    pub fn items(&self, id: ObjectId) -> Option<&[Value]> {
        match &self.get(id)?.body {
            Body::Items(items) => Some(items),
            Body::Fields(_) => None,
        }
    }

    pub fn items_mut(&mut self, id: ObjectId) -> Option<&mut Vec<Value>> {
        match &mut self.get_mut(id)?.body {
            Body::Items(items) => Some(items),
            Body::Fields(_) => None,
        }
    }

    /// Rewrites every handle held by any object according to `redirects`.
    pub fn redirect_handles(&mut self, redirects: &HashMap<ObjectId, ObjectId>) {
        let redirect = |value: &mut Value| {
            if let Value::Object(id) = value {
                if let Some(into) = redirects.get(&*id) {
                    *id = *into;
                }
            }
        };
        for object in &mut self.objects {
            match &mut object.body {
                Body::Fields(fields) => fields.iter_mut().for_each(|(_, v)| redirect(v)),
                Body::Items(items) => items.iter_mut().for_each(|v| redirect(v)),
            }
        }
    }
}

/// Compares two graphs structurally, including their aliasing.
///
/// Objects are matched one-to-one: if `left` reaches the same object along
/// two paths, `right` must reach one object along those paths too. Floats
/// compare by bit pattern so `NaN` equals itself.
pub fn graphs_equal(left_heap: &Heap, left: &Value, right_heap: &Heap, right: &Value) -> bool {
    let mut forward: HashMap<ObjectId, ObjectId> = HashMap::new();
    let mut backward: HashMap<ObjectId, ObjectId> = HashMap::new();
    let mut pending = vec![(left.clone(), right.clone())];

    while let Some((l, r)) = pending.pop() {
        match (&l, &r) {
            (Value::Object(a), Value::Object(b)) => {
                match (forward.get(a), backward.get(b)) {
                    (Some(mapped), _) if mapped != b => return false,
                    (_, Some(mapped)) if mapped != a => return false,
                    (Some(_), Some(_)) => continue,
                    _ => {}
                }
                forward.insert(*a, *b);
                backward.insert(*b, *a);

                let (Some(oa), Some(ob)) = (left_heap.get(*a), right_heap.get(*b)) else {
                    return false;
                };
                if oa.ty != ob.ty {
                    return false;
                }
                match (&oa.body, &ob.body) {
                    (Body::Fields(fa), Body::Fields(fb)) => {
                        if fa.len() != fb.len() {
                            return false;
                        }
                        for (name, value) in fa {
                            let Some(other) = ob.field(name) else {
                                return false;
                            };
                            pending.push((value.clone(), other.clone()));
                        }
                    }
                    (Body::Items(ia), Body::Items(ib)) => {
                        if ia.len() != ib.len() {
                            return false;
                        }
                        pending.extend(ia.iter().cloned().zip(ib.iter().cloned()));
                    }
                    _ => return false,
                }
            }
            (Value::Float(a), Value::Float(b)) => {
                if a.to_bits() != b.to_bits() {
                    return false;
                }
            }
            _ => {
                if l != r {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_field_replaces_in_place() {
        let mut heap = Heap::new();
        let id = heap.record(Type::Map, [("a", Value::from(1)), ("b", Value::from(2))]);
        assert!(heap.set_field(id, "a", Value::from("x")));
        assert!(heap.set_field(id, "c", Value::Null));
        let names: Vec<_> = heap.get(id).unwrap().fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(heap.field(id, "a"), Some(&Value::from("x")));
    }

    #[test]
    fn test_set_field_on_collection_fails() {
        let mut heap = Heap::new();
        let id = heap.collection(Type::list(Type::Any), [Value::from(1)]);
        assert!(!heap.set_field(id, "a", Value::Null));
        assert_eq!(heap.items(id), Some(&[Value::from(1)][..]));
    }

    #[test]
    fn test_graphs_equal_respects_aliasing() {
        let mut left = Heap::new();
        let shared = left.record(Type::Map, [("v", Value::from(1))]);
        let l_root = left.collection(
            Type::list(Type::Any),
            [Value::Object(shared), Value::Object(shared)],
        );

        let mut right = Heap::new();
        let a = right.record(Type::Map, [("v", Value::from(1))]);
        let b = right.record(Type::Map, [("v", Value::from(1))]);
        let r_split = right.collection(Type::list(Type::Any), [Value::Object(a), Value::Object(b)]);
        let r_shared = right.collection(Type::list(Type::Any), [Value::Object(a), Value::Object(a)]);

        assert!(!graphs_equal(&left, &Value::Object(l_root), &right, &Value::Object(r_split)));
        assert!(graphs_equal(&left, &Value::Object(l_root), &right, &Value::Object(r_shared)));
    }

    #[test]
    fn test_graphs_equal_on_cycles() {
        let mut heap = Heap::new();
        let a = heap.record(Type::named("Node"), [("next", Value::Null)]);
        heap.set_field(a, "next", Value::Object(a));

        let mut other = Heap::new();
        let b = other.record(Type::named("Node"), [("next", Value::Null)]);
        other.set_field(b, "next", Value::Object(b));

        assert!(graphs_equal(&heap, &Value::Object(a), &other, &Value::Object(b)));
    }
}
