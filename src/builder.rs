use crate::ast::{Document, ExprArena, ExprId, ExprKind, ObjectExpr, Path, ReferenceExpr};
use crate::config::{ReferencePolicy, SerializerConfig};
use crate::error::BuildError;
use crate::evaluator::read_leaf;
use crate::schema::{CollectionKind, Converter, Schema, SchemaError, TypeKind};
use crate::types::Type;
use crate::value::{Body, Heap, ObjectId, Value};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Seen {
    path: Path,
    /// The reader can hand out this object's identity at `path`.
    can_reference: bool,
    /// Node the object was written as; `None` for converter-backed values.
    expr: Option<ExprId>,
}

/// Walks a live graph depth-first and produces the expression tree that
/// reads back into it, applying the configured [`ReferencePolicy`] to repeats.
pub struct ExpressionBuilder<'a> {
    schema: &'a dyn Schema,
    config: &'a SerializerConfig,
    arena: ExprArena,
    seen: HashMap<ObjectId, Seen>,
    // Objects whose node is still being built; a repeat of one is a cycle.
    active: HashSet<ObjectId>,
    depth: usize,
}

impl<'a> ExpressionBuilder<'a> {
    pub fn new(schema: &'a dyn Schema, config: &'a SerializerConfig) -> Self {
        Self {
            schema,
            config,
            arena: ExprArena::new(),
            seen: HashMap::new(),
            active: HashSet::new(),
            depth: 0,
        }
    }

    /// Builds the expression tree for `value`, read back as `declared`.
    pub fn build_document(
        mut self,
        heap: &Heap,
        value: &Value,
        declared: &Type,
    ) -> Result<Document, BuildError> {
        let root = self.build(heap, value, declared, &Path::root(), true)?;
        debug!(
            "built {} expression nodes for {} distinct objects",
            self.arena.len(),
            self.seen.len()
        );
        Ok(Document {
            arena: self.arena,
            root,
            source: None,
        })
    }

    fn build(
        &mut self,
        heap: &Heap,
        value: &Value,
        declared: &Type,
        path: &Path,
        addressable: bool,
    ) -> Result<ExprId, BuildError> {
        if self.depth >= self.config.max_depth {
            return Err(BuildError::DepthLimitExceeded {
                limit: self.config.max_depth,
                path: path.to_string(),
            });
        }
        self.depth += 1;
        let result = self.build_bare(heap, value, declared, path, addressable);
        self.depth -= 1;

        let (node, cast) = result?;
        match cast {
            Some(ty) if self.config.write_type_information => {
                trace!("cast to `{}` at {}", ty, path);
                let target = self.schema.type_name(&ty);
                Ok(self.leaf(ExprKind::Cast { target, inner: node }))
            }
            _ => Ok(node),
        }
    }

    /// Builds a node without its cast; returns the cast the node needs to
    /// read back as its runtime type.
    fn build_bare(
        &mut self,
        heap: &Heap,
        value: &Value,
        declared: &Type,
        path: &Path,
        addressable: bool,
    ) -> Result<(ExprId, Option<Type>), BuildError> {
        let id = match value {
            Value::Object(id) => *id,
            _ => return self.build_leaf(heap, value, declared, path),
        };
        if heap.get(id).is_none() {
            return Err(BuildError::DanglingHandle {
                path: path.to_string(),
            });
        }

        let Some(seen) = self.seen.get(&id).cloned() else {
            return self.build_tracked(heap, id, declared, path, addressable);
        };
        let cyclic = self.active.contains(&id);
        match self.config.reference_policy {
            ReferencePolicy::WriteIdentifier => match (seen.can_reference, seen.expr) {
                (true, Some(target)) => {
                    trace!("reference to {} at {}", seen.path, path);
                    let reference = ReferenceExpr {
                        path: seen.path,
                        target: Some(target),
                    };
                    Ok((self.leaf(ExprKind::Reference(reference)), None))
                }
                _ => Err(BuildError::NotYetReferenceable {
                    path: path.to_string(),
                    first_path: seen.path.to_string(),
                }),
            },
            ReferencePolicy::IgnoreCircularReferences if cyclic => {
                trace!("dropping circular reference to {} at {}", seen.path, path);
                Ok((self.leaf(ExprKind::Null), None))
            }
            ReferencePolicy::ErrorCircularReferences if cyclic => {
                Err(BuildError::CircularReference {
                    path: path.to_string(),
                    first_path: seen.path.to_string(),
                })
            }
            _ => {
                // A repeat outside its own subtree is written again; the
                // first occurrence stays the recorded one.
                trace!("duplicating {} at {}", seen.path, path);
                self.seen.remove(&id);
                let result = self.build_tracked(heap, id, declared, path, addressable);
                self.seen.insert(id, seen);
                result
            }
        }
    }

    fn build_tracked(
        &mut self,
        heap: &Heap,
        id: ObjectId,
        declared: &Type,
        path: &Path,
        addressable: bool,
    ) -> Result<(ExprId, Option<Type>), BuildError> {
        self.active.insert(id);
        let result = self.build_object(heap, id, declared, path, addressable);
        self.active.remove(&id);
        result
    }

    fn build_leaf(
        &mut self,
        heap: &Heap,
        value: &Value,
        declared: &Type,
        path: &Path,
    ) -> Result<(ExprId, Option<Type>), BuildError> {
        let runtime = value.runtime_type(heap).unwrap_or(Type::Any);
        if let Some(converter) = self.schema.converter(&runtime) {
            return self.build_converted(heap, value, runtime, converter, declared, path);
        }

        let kind = match value {
            Value::Null => ExprKind::Null,
            Value::Bool(b) => ExprKind::Bool(*b),
            Value::Int(i) => ExprKind::Numeric(i.to_string()),
            Value::UInt(u) => ExprKind::Numeric(u.to_string()),
            Value::Float(f) if f.is_finite() => ExprKind::Numeric(format!("{f:?}")),
            Value::Float(f) => ExprKind::Value(f.to_string()),
            Value::Char(c) => ExprKind::Value(c.to_string()),
            Value::Str(s) => ExprKind::Value(s.clone()),
            Value::Enum { variant, .. } => ExprKind::Value(variant.clone()),
            Value::Object(_) => ExprKind::Null,
        };
        let reads_back = read_leaf(self.schema, &kind, declared)
            .is_some_and(|read| same_leaf(&read, value));
        let cast = (!reads_back).then_some(runtime);
        Ok((self.leaf(kind), cast))
    }

    fn build_object(
        &mut self,
        heap: &Heap,
        id: ObjectId,
        declared: &Type,
        path: &Path,
        addressable: bool,
    ) -> Result<(ExprId, Option<Type>), BuildError> {
        let Some(object) = heap.get(id) else {
            return Err(BuildError::DanglingHandle {
                path: path.to_string(),
            });
        };
        let runtime = object.ty.clone();

        if let Some(converter) = self.schema.converter(&runtime) {
            self.seen.insert(
                id,
                Seen {
                    path: path.clone(),
                    can_reference: false,
                    expr: None,
                },
            );
            let value = Value::Object(id);
            return self.build_converted(heap, &value, runtime, converter, declared, path);
        }

        let node = self.leaf(ExprKind::Null);
        self.seen.insert(
            id,
            Seen {
                path: path.clone(),
                can_reference: false,
                expr: Some(node),
            },
        );

        let (kind, constructed) = match (self.schema.kind(&runtime), &object.body) {
            (TypeKind::Class, _) => self.build_class(heap, id, &runtime, path, addressable)?,
            (TypeKind::Map | TypeKind::Any, Body::Fields(fields)) => {
                self.mark_referenceable(id, addressable);
                let mut properties = Vec::with_capacity(fields.len());
                for (key, value) in fields {
                    let child =
                        self.build(heap, value, &Type::Any, &path.child_key(key), addressable)?;
                    properties.push((key.clone(), child));
                }
                let object = ObjectExpr {
                    properties,
                    ..ObjectExpr::default()
                };
                (ExprKind::Object(object), false)
            }
            (TypeKind::Collection, Body::Items(items)) => {
                let frozen = self.schema.collection_kind(&runtime) == Some(CollectionKind::Frozen);
                if !frozen {
                    self.mark_referenceable(id, addressable);
                }
                let item_ty = self.schema.item_type(&runtime).unwrap_or(Type::Any);
                let mut children = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    children.push(self.build(heap, item, &item_ty, &path.child_index(i), addressable)?);
                }
                if frozen {
                    self.mark_referenceable(id, addressable);
                }
                (ExprKind::Array(children), false)
            }
            _ => {
                return Err(BuildError::Schema {
                    path: path.to_string(),
                    source: SchemaError::UnknownType {
                        name: runtime.to_string(),
                    },
                })
            }
        };
        self.arena.get_mut(node).kind = kind;

        let cast = if constructed || runtime == *declared || natural_container(declared, &runtime) {
            None
        } else {
            Some(runtime)
        };
        Ok((node, cast))
    }

    /// Writes a record. Classes with constructor parameters become
    /// `new T(args) { props }`; the flag reports that.
    fn build_class(
        &mut self,
        heap: &Heap,
        id: ObjectId,
        ty: &Type,
        path: &Path,
        addressable: bool,
    ) -> Result<(ExprKind, bool), BuildError> {
        let params = self.schema.constructor_parameters(ty);
        let mut constructor_args = Vec::with_capacity(params.len());
        for param in &params {
            let value = self
                .schema
                .get_property(heap, id, &param.name)
                .unwrap_or(Value::Null);
            // Constructor arguments have no path of their own.
            let arg = self.build_member(heap, &value, &param.ty, param.has_converter, path, false)?;
            constructor_args.push(arg);
        }
        self.mark_referenceable(id, addressable);

        let mut properties = Vec::new();
        for prop in self.schema.properties(ty) {
            if prop.ignored || params.iter().any(|p| p.name == prop.name) {
                continue;
            }
            let Some(value) = self.schema.get_property(heap, id, &prop.name) else {
                continue;
            };
            let child_path = path.child_key(&prop.name);
            let child =
                self.build_member(heap, &value, &prop.ty, prop.has_converter, &child_path, addressable)?;
            properties.push((prop.name, child));
        }

        let constructed = !params.is_empty();
        let object = ObjectExpr {
            type_name: constructed.then(|| self.schema.type_name(ty)),
            constructor_args,
            properties,
        };
        Ok((ExprKind::Object(object), constructed))
    }

    /// Builds a property or constructor argument. A declared type with a
    /// converter also converts values whose own type has none, since the
    /// reader converts by declared type.
    fn build_member(
        &mut self,
        heap: &Heap,
        value: &Value,
        declared: &Type,
        has_converter: bool,
        path: &Path,
        addressable: bool,
    ) -> Result<ExprId, BuildError> {
        if has_converter && *value != Value::Null {
            let runtime = value.runtime_type(heap).unwrap_or(Type::Any);
            if let (None, Some(converter)) =
                (self.schema.converter(&runtime), self.schema.converter(declared))
            {
                let (node, _) =
                    self.build_converted(heap, value, declared.clone(), converter, declared, path)?;
                return Ok(node);
            }
        }
        self.build(heap, value, declared, path, addressable)
    }

    fn build_converted(
        &mut self,
        heap: &Heap,
        value: &Value,
        runtime: Type,
        converter: Arc<dyn Converter>,
        declared: &Type,
        path: &Path,
    ) -> Result<(ExprId, Option<Type>), BuildError> {
        let wire = converter
            .to_wire(heap, value)
            .map_err(|source| BuildError::Converter {
                type_name: runtime.to_string(),
                path: path.to_string(),
                source,
            })?;
        let wire_ty = converter.wire_type(&runtime);
        trace!("converted `{}` to `{}` at {}", runtime, wire_ty, path);
        // The wire form is read back as `wire_ty` and never carries a cast.
        let (node, _) = self.build_bare(heap, &wire, &wire_ty, path, false)?;
        let cast = (runtime != *declared).then_some(runtime);
        Ok((node, cast))
    }

    fn mark_referenceable(&mut self, id: ObjectId, addressable: bool) {
        if let Some(seen) = self.seen.get_mut(&id) {
            seen.can_reference = addressable;
        }
    }

    fn leaf(&mut self, kind: ExprKind) -> ExprId {
        self.arena.alloc(kind, 0, 0, None)
    }
}

/// Whether an untyped object or array literal already reads back as
/// `runtime` under `declared`.
fn natural_container(declared: &Type, runtime: &Type) -> bool {
    declared.is_any() && (*runtime == Type::Map || *runtime == Type::list(Type::Any))
}

fn same_leaf(read: &Value, value: &Value) -> bool {
    match (read, value) {
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        _ => read == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassDef, ConvertError, SchemaRegistry};
    use crate::types::IntKind;
    use crate::writer::render;

    fn schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .register_class(
                ClassDef::new("Node")
                    .property("name", Type::String)
                    .property("next", Type::named("Node")),
            )
            .register_class(
                ClassDef::new("Point")
                    .property("x", Type::Int(IntKind::I32))
                    .property("y", Type::Int(IntKind::I32))
                    .property("label", Type::String)
                    .ignored("cache", Type::Any)
                    .constructor(&["x", "y"]),
            )
            .register_enum("Color", &["Red", "Green"])
            .register_collection("Frozen", Type::Any, CollectionKind::Frozen);
        schema
    }

    fn node(heap: &mut Heap, name: &str) -> ObjectId {
        heap.record(
            Type::named("Node"),
            [("name", Value::from(name)), ("next", Value::Null)],
        )
    }

    /// `a.next = b; b.next = a`
    fn cycle(heap: &mut Heap) -> ObjectId {
        let a = node(heap, "a");
        let b = node(heap, "b");
        heap.set_field(a, "next", Value::Object(b));
        heap.set_field(b, "next", Value::Object(a));
        a
    }

    fn build(
        heap: &Heap,
        value: &Value,
        ty: &Type,
        policy: ReferencePolicy,
    ) -> Result<String, BuildError> {
        let schema = schema();
        let config = SerializerConfig::default().compact().with_policy(policy);
        let doc = ExpressionBuilder::new(&schema, &config).build_document(heap, value, ty)?;
        Ok(render(&doc, &config))
    }

    #[test]
    fn test_cycle_under_each_policy() {
        let mut heap = Heap::new();
        let a = Value::Object(cycle(&mut heap));
        let ty = Type::named("Node");

        assert_eq!(
            build(&heap, &a, &ty, ReferencePolicy::WriteIdentifier).unwrap(),
            r#"{"name":"a","next":{"name":"b","next":$}}"#
        );
        assert_eq!(
            build(&heap, &a, &ty, ReferencePolicy::IgnoreCircularReferences).unwrap(),
            r#"{"name":"a","next":{"name":"b","next":null}}"#
        );
        match build(&heap, &a, &ty, ReferencePolicy::ErrorCircularReferences) {
            Err(BuildError::CircularReference { path, first_path }) => {
                assert_eq!(path, "$.next.next");
                assert_eq!(first_path, "$");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_shared_instance_outside_a_cycle() {
        let mut heap = Heap::new();
        let p = node(&mut heap, "p");
        let root = heap.record(
            Type::Map,
            [("x", Value::Object(p)), ("y", Value::Object(p))],
        );
        let root = Value::Object(root);

        assert_eq!(
            build(&heap, &root, &Type::Any, ReferencePolicy::WriteIdentifier).unwrap(),
            r#"{"x":(Node){"name":"p","next":null},"y":$.x}"#
        );
        let duplicated = r#"{"x":(Node){"name":"p","next":null},"y":(Node){"name":"p","next":null}}"#;
        for policy in [
            ReferencePolicy::IgnoreCircularReferences,
            ReferencePolicy::ErrorCircularReferences,
        ] {
            assert_eq!(build(&heap, &root, &Type::Any, policy).unwrap(), duplicated);
        }
    }

    #[test]
    fn test_constructor_objects() {
        let mut heap = Heap::new();
        let p = heap.record(
            Type::named("Point"),
            [
                ("x", Value::Int(1)),
                ("y", Value::Int(-2)),
                ("label", Value::from("o")),
                ("cache", Value::from("stale")),
            ],
        );
        let out = build(&heap, &Value::Object(p), &Type::Any, ReferencePolicy::WriteIdentifier);
        assert_eq!(out.unwrap(), r#"new Point(1,-2){"label":"o"}"#);
    }

    #[test]
    fn test_casts_only_where_needed() {
        let mut heap = Heap::new();
        let root = heap.record(
            Type::Map,
            [
                ("i", Value::Int(5)),
                ("u", Value::UInt(5)),
                ("f", Value::Float(1.0)),
                ("c", Value::Char('x')),
                ("e", Value::enum_variant("Color", "Green")),
                ("s", Value::from("text")),
                ("nan", Value::Float(f64::NAN)),
            ],
        );
        let list = heap.collection(Type::list(Type::Int(IntKind::I32)), [Value::Int(1)]);
        heap.set_field(root, "l", Value::Object(list));
        assert_eq!(
            build(&heap, &Value::Object(root), &Type::Any, ReferencePolicy::WriteIdentifier).unwrap(),
            r#"{"i":5,"u":(u64)5,"f":1.0,"c":(char)"x","e":(Color)"Green","s":"text","nan":(f64)"NaN","l":(list<i32>)[1]}"#
        );
    }

    #[test]
    fn test_without_type_information() {
        let mut heap = Heap::new();
        let root = heap.record(Type::Map, [("u", Value::UInt(5))]);
        let schema = schema();
        let config = SerializerConfig {
            write_type_information: false,
            ..SerializerConfig::default().compact()
        };
        let doc = ExpressionBuilder::new(&schema, &config)
            .build_document(&heap, &Value::Object(root), &Type::Any)
            .unwrap();
        assert_eq!(render(&doc, &config), r#"{"u":5}"#);
    }

    #[test]
    fn test_frozen_collection_containing_itself() {
        let mut heap = Heap::new();
        let frozen = heap.collection(Type::named("Frozen"), []);
        if let Some(items) = heap.items_mut(frozen) {
            items.push(Value::Object(frozen));
        }
        let result = build(
            &heap,
            &Value::Object(frozen),
            &Type::named("Frozen"),
            ReferencePolicy::WriteIdentifier,
        );
        assert!(matches!(result, Err(BuildError::NotYetReferenceable { .. })));
    }

    #[test]
    fn test_growable_list_containing_itself() {
        let mut heap = Heap::new();
        let list = heap.collection(Type::list(Type::Any), []);
        if let Some(items) = heap.items_mut(list) {
            items.push(Value::Object(list));
        }
        let out = build(&heap, &Value::Object(list), &Type::Any, ReferencePolicy::WriteIdentifier);
        assert_eq!(out.unwrap(), "[$]");
    }

    #[test]
    fn test_dangling_handle() {
        let mut other = Heap::new();
        let stray = other.record(Type::Map, Vec::<(String, Value)>::new());
        let heap = Heap::new();
        let result = build(
            &heap,
            &Value::Object(stray),
            &Type::Any,
            ReferencePolicy::WriteIdentifier,
        );
        assert!(matches!(result, Err(BuildError::DanglingHandle { .. })));
    }

    #[test]
    fn test_depth_limit() {
        let mut heap = Heap::new();
        let mut value = Value::Null;
        for _ in 0..10 {
            value = Value::Object(heap.collection(Type::list(Type::Any), [value]));
        }
        let schema = schema();
        let config = SerializerConfig {
            max_depth: 5,
            ..SerializerConfig::default()
        };
        let result =
            ExpressionBuilder::new(&schema, &config).build_document(&heap, &value, &Type::Any);
        assert!(matches!(
            result,
            Err(BuildError::DepthLimitExceeded { limit: 5, .. })
        ));
    }

    struct CelsiusConverter;

    impl Converter for CelsiusConverter {
        fn wire_type(&self, _source: &Type) -> Type {
            Type::String
        }

        fn to_wire(&self, _heap: &Heap, value: &Value) -> Result<Value, ConvertError> {
            value
                .as_f64()
                .map(|c| Value::Str(format!("{c}C")))
                .ok_or_else(|| ConvertError::new("not a temperature"))
        }

        fn from_wire(&self, _heap: &mut Heap, wire: Value) -> Result<Value, ConvertError> {
            wire.as_str()
                .and_then(|s| s.strip_suffix('C'))
                .and_then(|s| s.parse().ok())
                .map(Value::Float)
                .ok_or_else(|| ConvertError::new("bad temperature"))
        }
    }

    #[test]
    fn test_declared_converter_applies_to_plain_values() {
        let mut schema = schema();
        schema
            .register_converter(Type::named("Celsius"), Arc::new(CelsiusConverter))
            .register_class(
                ClassDef::new("Reading")
                    .property("at", Type::String)
                    .property("temp", Type::named("Celsius"))
                    .constructor(&["at"]),
            );
        let mut heap = Heap::new();
        let reading = heap.record(
            Type::named("Reading"),
            [("at", Value::from("noon")), ("temp", Value::Float(21.5))],
        );
        let config = SerializerConfig::default().compact();
        let doc = ExpressionBuilder::new(&schema, &config)
            .build_document(&heap, &Value::Object(reading), &Type::named("Reading"))
            .unwrap();
        assert_eq!(render(&doc, &config), r#"new Reading("noon"){"temp":"21.5C"}"#);

        let empty = heap.record(
            Type::named("Reading"),
            [("at", Value::from("dawn")), ("temp", Value::Null)],
        );
        let doc = ExpressionBuilder::new(&schema, &config)
            .build_document(&heap, &Value::Object(empty), &Type::named("Reading"))
            .unwrap();
        assert_eq!(render(&doc, &config), r#"new Reading("dawn"){"temp":null}"#);
    }
}
