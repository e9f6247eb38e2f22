use crate::types::{Type, TypeName};
use crate::value::{Body, Heap, Object, ObjectId, Value};
use miette::Diagnostic;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// How a type is shaped, as far as the codec is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Any,
    Scalar,
    Enum,
    Class,
    Collection,
    Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Allocated up front and filled in place.
    Growable,
    /// Allocated once every item is known.
    Frozen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamMeta {
    pub name: String,
    pub ty: Type,
    pub has_converter: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropMeta {
    pub name: String,
    pub ty: Type,
    pub writable: bool,
    pub ignored: bool,
    pub has_converter: bool,
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown type `{name}`")]
    #[diagnostic(code(schema::unknown_type))]
    UnknownType { name: String },

    #[error("Constructor of `{type_name}` takes {expected} argument(s), got {found}")]
    #[diagnostic(code(schema::arity))]
    Arity {
        type_name: String,
        expected: usize,
        found: usize,
    },

    #[error("Type `{type_name}` cannot be instantiated")]
    #[diagnostic(code(schema::not_constructible))]
    NotConstructible { type_name: String },

    #[error("Type `{type_name}` is not a collection")]
    #[diagnostic(code(schema::not_a_collection))]
    NotACollection { type_name: String },

    #[error("Object {object} has no named fields")]
    #[diagnostic(code(schema::not_a_record))]
    NotARecord { object: usize },

    #[error("`{variant}` is not a variant of `{type_name}`")]
    #[diagnostic(code(schema::unknown_variant))]
    UnknownVariant { type_name: String, variant: String },

    #[error("Object handle {object} does not exist")]
    #[diagnostic(code(schema::dangling_handle))]
    DanglingHandle { object: usize },
}

/// A converter rejected a value.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
#[error("{message}")]
#[diagnostic(code(schema::convert))]
pub struct ConvertError {
    pub message: String,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Recoverable answer to "does this value have a stable identity yet?".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("not yet referenceable: {reason}")]
    NotYetReferenceable { reason: String },
}

/// Accumulates the items of one collection during evaluation.
pub trait CollectionBuilder {
    fn add(&mut self, heap: &mut Heap, item: Value);

    /// The identity of the collection under construction, if it already has
    /// one.
    fn partial_reference(&self) -> Result<ObjectId, ProbeError>;

    fn finish(self: Box<Self>, heap: &mut Heap) -> ObjectId;
}

/// Translates a value to and from another representation ("wire" form)
/// that the codec knows how to write.
pub trait Converter: Send + Sync {
    fn wire_type(&self, source: &Type) -> Type;

    /// On the write side a wire value that is an object must already live in
    /// `heap`.
    fn to_wire(&self, heap: &Heap, value: &Value) -> Result<Value, ConvertError>;

    fn from_wire(&self, heap: &mut Heap, wire: Value) -> Result<Value, ConvertError>;
}

pub trait Schema: Send + Sync {
    /// Resolves a name that is not a built-in type.
    fn named_type(&self, name: &TypeName) -> Option<Type>;

    fn resolve_type(&self, name: &TypeName) -> Option<Type> {
        Type::builtin(name, |item| self.resolve_type(item)).or_else(|| self.named_type(name))
    }

    fn type_name(&self, ty: &Type) -> TypeName {
        ty.type_name()
    }

    fn kind(&self, ty: &Type) -> TypeKind;

    fn enum_variants(&self, ty: &Type) -> Option<Vec<String>>;

    fn constructor_parameters(&self, ty: &Type) -> Vec<ParamMeta>;

    fn properties(&self, ty: &Type) -> Vec<PropMeta>;

    fn property(&self, ty: &Type, name: &str) -> Option<PropMeta> {
        self.properties(ty).into_iter().find(|p| p.name == name)
    }

    fn create_instance(
        &self,
        heap: &mut Heap,
        ty: &Type,
        args: Vec<Value>,
    ) -> Result<ObjectId, SchemaError>;

    fn is_collection(&self, ty: &Type) -> bool {
        self.kind(ty) == TypeKind::Collection
    }

    fn item_type(&self, ty: &Type) -> Option<Type>;

    fn collection_kind(&self, ty: &Type) -> Option<CollectionKind>;

    /// Starts a collection of type `ty`. With `existing`, the builder refills
    /// that instance instead of allocating a new one.
    fn collection_builder(
        &self,
        heap: &mut Heap,
        ty: &Type,
        size_hint: usize,
        existing: Option<ObjectId>,
    ) -> Result<Box<dyn CollectionBuilder>, SchemaError>;

    fn converter(&self, ty: &Type) -> Option<Arc<dyn Converter>>;

    fn get_property(&self, heap: &Heap, object: ObjectId, name: &str) -> Option<Value> {
        heap.field(object, name).cloned()
    }

    fn set_property(
        &self,
        heap: &mut Heap,
        object: ObjectId,
        name: &str,
        value: Value,
    ) -> Result<(), SchemaError> {
        if heap.set_field(object, name, value) {
            Ok(())
        } else {
            Err(SchemaError::NotARecord {
                object: object.index(),
            })
        }
    }
}

/// Appends to a list allocated when the builder is created.
pub struct GrowableBuilder {
    id: ObjectId,
}

impl GrowableBuilder {
    pub fn new(heap: &mut Heap, ty: Type, size_hint: usize) -> Self {
        let id = heap.alloc(Object {
            ty,
            body: Body::Items(Vec::with_capacity(size_hint)),
        });
        Self { id }
    }
}

impl CollectionBuilder for GrowableBuilder {
    fn add(&mut self, heap: &mut Heap, item: Value) {
        if let Some(items) = heap.items_mut(self.id) {
            items.push(item);
        }
    }

    fn partial_reference(&self) -> Result<ObjectId, ProbeError> {
        Ok(self.id)
    }

    fn finish(self: Box<Self>, _heap: &mut Heap) -> ObjectId {
        self.id
    }
}

/// Clears an existing list and refills it.
pub struct WrapExistingBuilder {
    id: ObjectId,
}

impl WrapExistingBuilder {
    pub fn new(heap: &mut Heap, id: ObjectId) -> Self {
        if let Some(items) = heap.items_mut(id) {
            items.clear();
        }
        Self { id }
    }
}

impl CollectionBuilder for WrapExistingBuilder {
    fn add(&mut self, heap: &mut Heap, item: Value) {
        if let Some(items) = heap.items_mut(self.id) {
            items.push(item);
        }
    }

    fn partial_reference(&self) -> Result<ObjectId, ProbeError> {
        Ok(self.id)
    }

    fn finish(self: Box<Self>, _heap: &mut Heap) -> ObjectId {
        self.id
    }
}

/// Buffers items and allocates the collection in [`finish`](CollectionBuilder::finish).
pub struct FrozenBuilder {
    ty: Type,
    items: Vec<Value>,
}

impl FrozenBuilder {
    pub fn new(ty: Type, size_hint: usize) -> Self {
        Self {
            ty,
            items: Vec::with_capacity(size_hint),
        }
    }
}

impl CollectionBuilder for FrozenBuilder {
    fn add(&mut self, _heap: &mut Heap, item: Value) {
        self.items.push(item);
    }

    fn partial_reference(&self) -> Result<ObjectId, ProbeError> {
        Err(ProbeError::NotYetReferenceable {
            reason: format!("`{}` is allocated only after its last item", self.ty),
        })
    }

    fn finish(self: Box<Self>, heap: &mut Heap) -> ObjectId {
        heap.collection(self.ty, self.items)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropDef {
    pub name: String,
    pub ty: Type,
    pub writable: bool,
    pub ignored: bool,
}

/// A record type: ordered properties plus the properties its constructor
/// takes, by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub properties: Vec<PropDef>,
    pub constructor: Vec<String>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            constructor: Vec::new(),
        }
    }

    pub fn property(self, name: &str, ty: Type) -> Self {
        self.with(name, ty, true, false)
    }

    /// A property that is never assigned; its value is created along with
    /// the instance and filled in place.
    pub fn read_only(self, name: &str, ty: Type) -> Self {
        self.with(name, ty, false, false)
    }

    pub fn ignored(self, name: &str, ty: Type) -> Self {
        self.with(name, ty, true, true)
    }

    /// Constructor parameters, each naming a property of the class.
    pub fn constructor(mut self, params: &[&str]) -> Self {
        self.constructor = params.iter().map(|p| p.to_string()).collect();
        self
    }

    fn with(mut self, name: &str, ty: Type, writable: bool, ignored: bool) -> Self {
        self.properties.push(PropDef {
            name: name.to_string(),
            ty,
            writable,
            ignored,
        });
        self
    }

    fn find(&self, name: &str) -> Option<&PropDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone)]
enum Registered {
    Class(ClassDef),
    Enum(Vec<String>),
    Collection { item: Type, kind: CollectionKind },
}

#[derive(Default, Clone)]
pub struct SchemaRegistry {
    types: HashMap<String, Registered>,
    converters: HashMap<Type, Arc<dyn Converter>>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("types", &self.types)
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&mut self, class: ClassDef) -> &mut Self {
        self.types
            .insert(class.name.clone(), Registered::Class(class));
        self
    }

    pub fn register_enum(&mut self, name: &str, variants: &[&str]) -> &mut Self {
        let variants = variants.iter().map(|v| v.to_string()).collect();
        self.types.insert(name.to_string(), Registered::Enum(variants));
        self
    }

    pub fn register_collection(&mut self, name: &str, item: Type, kind: CollectionKind) -> &mut Self {
        self.types
            .insert(name.to_string(), Registered::Collection { item, kind });
        self
    }

    pub fn register_converter(&mut self, ty: Type, converter: Arc<dyn Converter>) -> &mut Self {
        self.converters.insert(ty, converter);
        self
    }

    fn lookup(&self, ty: &Type) -> Option<&Registered> {
        match ty {
            Type::Named(name) => self.types.get(name),
            _ => None,
        }
    }

    fn class(&self, ty: &Type) -> Option<&ClassDef> {
        match self.lookup(ty) {
            Some(Registered::Class(class)) => Some(class),
            _ => None,
        }
    }

    /// The value a property holds right after construction: read-only
    /// containers exist up front so they can be filled in place.
    fn initial_value(&self, heap: &mut Heap, prop: &PropDef) -> Value {
        if prop.writable {
            return Value::Null;
        }
        match self.kind(&prop.ty) {
            TypeKind::Map => Value::Object(heap.record(Type::Map, Vec::<(String, Value)>::new())),
            TypeKind::Collection
                if self.collection_kind(&prop.ty) == Some(CollectionKind::Growable) =>
            {
                Value::Object(heap.collection(prop.ty.clone(), Vec::new()))
            }
            _ => Value::Null,
        }
    }
}

impl Schema for SchemaRegistry {
    fn named_type(&self, name: &TypeName) -> Option<Type> {
        if !name.args.is_empty() {
            return None;
        }
        let ty = Type::named(name.name.clone());
        (self.types.contains_key(&name.name) || self.converters.contains_key(&ty)).then_some(ty)
    }

    fn kind(&self, ty: &Type) -> TypeKind {
        match ty {
            Type::Any => TypeKind::Any,
            Type::Map => TypeKind::Map,
            Type::List(_) => TypeKind::Collection,
            Type::Named(_) => match self.lookup(ty) {
                Some(Registered::Class(_)) => TypeKind::Class,
                Some(Registered::Enum(_)) => TypeKind::Enum,
                Some(Registered::Collection { .. }) => TypeKind::Collection,
                None => TypeKind::Scalar,
            },
            _ => TypeKind::Scalar,
        }
    }

    fn enum_variants(&self, ty: &Type) -> Option<Vec<String>> {
        match self.lookup(ty) {
            Some(Registered::Enum(variants)) => Some(variants.clone()),
            _ => None,
        }
    }

    fn constructor_parameters(&self, ty: &Type) -> Vec<ParamMeta> {
        let Some(class) = self.class(ty) else {
            return Vec::new();
        };
        class
            .constructor
            .iter()
            .map(|name| {
                let ty = class.find(name).map_or(Type::Any, |p| p.ty.clone());
                ParamMeta {
                    name: name.clone(),
                    has_converter: self.converters.contains_key(&ty),
                    ty,
                }
            })
            .collect()
    }

    fn properties(&self, ty: &Type) -> Vec<PropMeta> {
        let Some(class) = self.class(ty) else {
            return Vec::new();
        };
        class
            .properties
            .iter()
            .map(|p| PropMeta {
                name: p.name.clone(),
                ty: p.ty.clone(),
                writable: p.writable,
                ignored: p.ignored,
                has_converter: self.converters.contains_key(&p.ty),
            })
            .collect()
    }

    fn create_instance(
        &self,
        heap: &mut Heap,
        ty: &Type,
        args: Vec<Value>,
    ) -> Result<ObjectId, SchemaError> {
        match self.kind(ty) {
            TypeKind::Map | TypeKind::Any => {
                if !args.is_empty() {
                    return Err(SchemaError::Arity {
                        type_name: ty.to_string(),
                        expected: 0,
                        found: args.len(),
                    });
                }
                Ok(heap.record(Type::Map, Vec::<(String, Value)>::new()))
            }
            TypeKind::Class => {
                let class = self.class(ty).ok_or_else(|| SchemaError::UnknownType {
                    name: ty.to_string(),
                })?;
                if args.len() != class.constructor.len() {
                    return Err(SchemaError::Arity {
                        type_name: class.name.clone(),
                        expected: class.constructor.len(),
                        found: args.len(),
                    });
                }
                let mut fields = Vec::with_capacity(class.properties.len());
                for prop in &class.properties {
                    fields.push((prop.name.clone(), self.initial_value(heap, prop)));
                }
                for (name, arg) in class.constructor.iter().zip(args) {
                    match fields.iter_mut().find(|(k, _)| k == name) {
                        Some((_, slot)) => *slot = arg,
                        None => fields.push((name.clone(), arg)),
                    }
                }
                Ok(heap.alloc(Object {
                    ty: ty.clone(),
                    body: Body::Fields(fields),
                }))
            }
            _ => Err(SchemaError::NotConstructible {
                type_name: ty.to_string(),
            }),
        }
    }

    fn item_type(&self, ty: &Type) -> Option<Type> {
        match ty {
            Type::List(item) => Some((**item).clone()),
            _ => match self.lookup(ty) {
                Some(Registered::Collection { item, .. }) => Some(item.clone()),
                _ => None,
            },
        }
    }

    fn collection_kind(&self, ty: &Type) -> Option<CollectionKind> {
        match ty {
            Type::List(_) => Some(CollectionKind::Growable),
            _ => match self.lookup(ty) {
                Some(Registered::Collection { kind, .. }) => Some(*kind),
                _ => None,
            },
        }
    }

    fn collection_builder(
        &self,
        heap: &mut Heap,
        ty: &Type,
        size_hint: usize,
        existing: Option<ObjectId>,
    ) -> Result<Box<dyn CollectionBuilder>, SchemaError> {
        let kind = self
            .collection_kind(ty)
            .ok_or_else(|| SchemaError::NotACollection {
                type_name: ty.to_string(),
            })?;
        Ok(match (kind, existing) {
            (CollectionKind::Growable, Some(id)) => Box::new(WrapExistingBuilder::new(heap, id)),
            (CollectionKind::Growable, None) => {
                Box::new(GrowableBuilder::new(heap, ty.clone(), size_hint))
            }
            (CollectionKind::Frozen, _) => Box::new(FrozenBuilder::new(ty.clone(), size_hint)),
        })
    }

    fn converter(&self, ty: &Type) -> Option<Arc<dyn Converter>> {
        self.converters.get(ty).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntKind;

    fn registry() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .register_class(
                ClassDef::new("Point")
                    .property("x", Type::Int(IntKind::I32))
                    .property("y", Type::Int(IntKind::I32))
                    .constructor(&["x", "y"]),
            )
            .register_class(
                ClassDef::new("Bag")
                    .read_only("items", Type::list(Type::Any))
                    .ignored("cache", Type::Any),
            )
            .register_enum("Color", &["Red", "Green"])
            .register_collection("Tuple", Type::Any, CollectionKind::Frozen);
        schema
    }

    #[test]
    fn test_resolve_builtin_and_named() {
        let schema = registry();
        let list = TypeName {
            name: "list".to_string(),
            args: vec![TypeName::simple("Point")],
        };
        assert_eq!(
            schema.resolve_type(&list),
            Some(Type::list(Type::named("Point")))
        );
        assert_eq!(schema.resolve_type(&TypeName::simple("Nope")), None);
        assert_eq!(schema.kind(&Type::named("Color")), TypeKind::Enum);
        assert!(schema.is_collection(&Type::named("Tuple")));
    }

    #[test]
    fn test_create_instance_checks_arity() {
        let schema = registry();
        let mut heap = Heap::new();
        let err = schema
            .create_instance(&mut heap, &Type::named("Point"), vec![Value::from(1)])
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::Arity {
                type_name: "Point".to_string(),
                expected: 2,
                found: 1
            }
        );

        let id = schema
            .create_instance(
                &mut heap,
                &Type::named("Point"),
                vec![Value::from(1), Value::from(2)],
            )
            .unwrap();
        assert_eq!(heap.field(id, "y"), Some(&Value::from(2)));
    }

    #[test]
    fn test_read_only_collection_is_preallocated() {
        let schema = registry();
        let mut heap = Heap::new();
        let bag = schema
            .create_instance(&mut heap, &Type::named("Bag"), Vec::new())
            .unwrap();
        let items = heap.field(bag, "items").and_then(Value::as_object).unwrap();
        assert_eq!(heap.items(items), Some(&[][..]));

        let props = schema.properties(&Type::named("Bag"));
        assert!(!props[0].writable);
        assert!(props[1].ignored);
    }

    #[test]
    fn test_frozen_builder_is_not_referenceable_until_finished() {
        let schema = registry();
        let mut heap = Heap::new();
        let mut builder = schema
            .collection_builder(&mut heap, &Type::named("Tuple"), 2, None)
            .unwrap();
        builder.add(&mut heap, Value::from(1));
        assert!(matches!(
            builder.partial_reference(),
            Err(ProbeError::NotYetReferenceable { .. })
        ));
        assert!(heap.is_empty());
        let id = builder.finish(&mut heap);
        assert_eq!(heap.items(id), Some(&[Value::from(1)][..]));
    }

    #[test]
    fn test_wrap_existing_builder_refills_in_place() {
        let schema = registry();
        let mut heap = Heap::new();
        let list = heap.collection(Type::list(Type::Any), [Value::from(9)]);
        let mut builder = schema
            .collection_builder(&mut heap, &Type::list(Type::Any), 1, Some(list))
            .unwrap();
        assert_eq!(builder.partial_reference(), Ok(list));
        builder.add(&mut heap, Value::from(1));
        assert_eq!(builder.finish(&mut heap), list);
        assert_eq!(heap.items(list), Some(&[Value::from(1)][..]));
    }
}
