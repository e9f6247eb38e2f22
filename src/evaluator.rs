use crate::ast::{Document, ExprArena, ExprId, ExprKind, ExprNode, ObjectExpr, ReferenceExpr};
use crate::config::{PropertyAction, SerializerConfig};
use crate::error::EvalError;
use crate::schema::{CollectionBuilder, ConvertError, Converter, ProbeError, Schema, TypeKind};
use crate::types::{FloatKind, IntKind, Type, TypeName};
use crate::value::{Body, Heap, ObjectId, Value};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;

const MAX_CONVERTER_CHAIN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Fresh,
    /// Constructor arguments are being evaluated.
    Constructing,
    /// The instance exists but its properties are not set yet.
    Constructed,
    Populating,
    Done,
}

#[derive(Default)]
struct NodeState {
    phase: Phase,
    /// A converter is producing the value; no identity is available.
    converting: bool,
    value: Option<Value>,
    builder: Option<Box<dyn CollectionBuilder>>,
    /// Instance to fill instead of creating one (read-only properties).
    existing: Option<ObjectId>,
}

/// A read-only property whose node produced an instance of its own; the
/// contents move into the instance the owner already holds.
struct Redirect {
    from: ObjectId,
    into: ObjectId,
    node: ExprId,
}

/// A type together with the converters that lead from it to the type the
/// document actually spells.
struct Shape {
    ty: Type,
    chain: Vec<Arc<dyn Converter>>,
}

/// Builds live objects from a resolved expression tree.
///
/// Type inference first gives every node the type it is read as; evaluation
/// then keeps one state per node, so a node yields a single instance however
/// many references reach it.
pub struct Evaluator<'a> {
    schema: &'a dyn Schema,
    config: &'a SerializerConfig,
    states: Vec<NodeState>,
    pending_redirects: Vec<Redirect>,
    redirects: HashMap<ObjectId, ObjectId>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(schema: &'a dyn Schema, config: &'a SerializerConfig) -> Self {
        Self {
            schema,
            config,
            states: Vec::new(),
            pending_redirects: Vec::new(),
            redirects: HashMap::new(),
            depth: 0,
        }
    }

    /// Evaluates the root of `document` as a value of type `ty`.
    pub fn evaluate_document(
        &mut self,
        heap: &mut Heap,
        document: &mut Document,
        ty: &Type,
    ) -> Result<Value, EvalError> {
        self.prepare(document, ty)?;
        let value = self.evaluate(heap, document, document.root)?;
        self.complete(heap, document)?;
        let value = self.redirected(value);
        debug!(
            "evaluated document as `{}` into {} heap objects",
            ty,
            heap.len()
        );
        Ok(value)
    }

    /// Runs type inference and resets all node states.
    pub fn prepare(&mut self, document: &mut Document, ty: &Type) -> Result<(), EvalError> {
        self.infer(&mut document.arena, document.root, ty)?;
        self.states = (0..document.arena.len())
            .map(|_| NodeState::default())
            .collect();
        self.pending_redirects.clear();
        self.redirects.clear();
        self.depth = 0;
        Ok(())
    }

    /// Fully evaluates a node. Evaluating a node again returns the cached
    /// result.
    pub fn evaluate(
        &mut self,
        heap: &mut Heap,
        document: &Document,
        id: ExprId,
    ) -> Result<Value, EvalError> {
        self.eval(heap, &document.arena, id)
    }

    /// Returns the identity of a node, constructing it if needed but not
    /// necessarily populating it.
    pub fn get_reference(
        &mut self,
        heap: &mut Heap,
        document: &Document,
        id: ExprId,
    ) -> Result<Value, EvalError> {
        self.reference(heap, &document.arena, id)
    }

    /// Populates objects that were constructed for a reference but never
    /// reached by their parent, e.g. under an ignored property.
    pub fn complete(&mut self, heap: &mut Heap, document: &Document) -> Result<(), EvalError> {
        loop {
            let pending: Vec<ExprId> = document
                .arena
                .ids()
                .filter(|id| self.states[id.index()].phase == Phase::Constructed)
                .collect();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                trace!("populating node {} reached only by reference", id.index());
                self.eval(heap, &document.arena, id)?;
            }
        }
        self.apply_redirects(heap, &document.arena)
    }

    /// Moves read-only property contents into the instances their owners
    /// hold and repoints every handle to the replaced instances.
    fn apply_redirects(&mut self, heap: &mut Heap, arena: &ExprArena) -> Result<(), EvalError> {
        if self.pending_redirects.is_empty() {
            return Ok(());
        }
        for redirect in std::mem::take(&mut self.pending_redirects) {
            let (Some(from), Some(into)) = (heap.get(redirect.from), heap.get(redirect.into)) else {
                continue;
            };
            let body = match (&from.body, &into.body) {
                (Body::Items(_), Body::Items(_)) | (Body::Fields(_), Body::Fields(_)) => {
                    from.body.clone()
                }
                _ => {
                    return Err(conversion(
                        arena.get(redirect.node),
                        &into.ty,
                        format!("`{}`", from.ty),
                    ))
                }
            };
            if let Some(target) = heap.get_mut(redirect.into) {
                target.body = body;
            }
            trace!("read-only node {} filled in place", redirect.node.index());
            self.redirects.insert(redirect.from, redirect.into);
        }
        heap.redirect_handles(&self.redirects);
        for state in &mut self.states {
            if let Some(Value::Object(id)) = &mut state.value {
                if let Some(into) = self.redirects.get(&*id) {
                    *id = *into;
                }
            }
        }
        Ok(())
    }

    fn redirected(&self, value: Value) -> Value {
        match value {
            Value::Object(id) => Value::Object(self.redirects.get(&id).copied().unwrap_or(id)),
            other => other,
        }
    }

    // === Type inference ===

    fn infer(&self, arena: &mut ExprArena, root: ExprId, ty: &Type) -> Result<(), EvalError> {
        let mut pending = vec![(root, ty.clone())];
        while let Some((id, expected)) = pending.pop() {
            let node = arena.get(id);
            let (ty, explicit) = match &node.kind {
                ExprKind::Cast { target, .. } => (self.resolve(target, node)?, true),
                ExprKind::Object(ObjectExpr {
                    type_name: Some(name),
                    ..
                }) => (self.resolve(name, node)?, true),
                _ => (expected, false),
            };
            let ty = match (&node.kind, ty) {
                (ExprKind::Object(_), Type::Any) => Type::Map,
                (ExprKind::Array(_), Type::Any) => Type::list(Type::Any),
                (_, ty) => ty,
            };

            match &node.kind {
                ExprKind::Cast { inner, .. } => pending.push((*inner, ty.clone())),
                ExprKind::Object(obj) => {
                    let shape = self.container_shape(&ty, node)?;
                    let params = self.schema.constructor_parameters(&shape);
                    for (i, arg) in obj.constructor_args.iter().enumerate() {
                        let arg_ty = params.get(i).map_or(Type::Any, |p| p.ty.clone());
                        pending.push((*arg, arg_ty));
                    }
                    let is_class = self.schema.kind(&shape) == TypeKind::Class;
                    for (key, child) in &obj.properties {
                        let prop_ty = if is_class {
                            self.schema
                                .property(&shape, key)
                                .map_or(Type::Any, |p| p.ty)
                        } else {
                            Type::Any
                        };
                        pending.push((*child, prop_ty));
                    }
                }
                ExprKind::Array(items) => {
                    let shape = self.container_shape(&ty, node)?;
                    let item = self.schema.item_type(&shape).unwrap_or(Type::Any);
                    pending.extend(items.iter().map(|id| (*id, item.clone())));
                }
                _ => {}
            }

            let node = arena.get_mut(id);
            node.result_type = Some(ty);
            node.explicit_type = explicit;
        }
        Ok(())
    }

    fn resolve(&self, name: &TypeName, node: &ExprNode) -> Result<Type, EvalError> {
        self.schema
            .resolve_type(name)
            .ok_or_else(|| EvalError::UnknownType {
                name: name.to_string(),
                line: node.line,
                column: node.column,
            })
    }

    fn shape(&self, ty: &Type, node: &ExprNode) -> Result<Shape, EvalError> {
        let mut chain = Vec::new();
        let mut current = ty.clone();
        while let Some(converter) = self.schema.converter(&current) {
            if chain.len() == MAX_CONVERTER_CHAIN {
                return Err(EvalError::Converter {
                    type_name: ty.to_string(),
                    source: ConvertError::new(format!(
                        "more than {MAX_CONVERTER_CHAIN} chained converters"
                    )),
                    line: node.line,
                    column: node.column,
                });
            }
            current = converter.wire_type(&current);
            chain.push(converter);
        }
        Ok(Shape { ty: current, chain })
    }

    /// The type an object or array node is built as, after converters.
    fn container_shape(&self, ty: &Type, node: &ExprNode) -> Result<Type, EvalError> {
        let shape = self.shape(ty, node)?.ty;
        Ok(match (&node.kind, shape) {
            (ExprKind::Object(_), Type::Any) => Type::Map,
            (ExprKind::Array(_), Type::Any) => Type::list(Type::Any),
            (_, shape) => shape,
        })
    }

    // === Evaluation ===

    fn enter(&mut self) -> Result<(), EvalError> {
        if self.depth >= self.config.max_depth {
            return Err(EvalError::DepthLimitExceeded {
                limit: self.config.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn eval(&mut self, heap: &mut Heap, arena: &ExprArena, id: ExprId) -> Result<Value, EvalError> {
        self.enter()?;
        let result = self.eval_node(heap, arena, id);
        self.depth -= 1;
        result
    }

    fn reference(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
    ) -> Result<Value, EvalError> {
        self.enter()?;
        let result = self.reference_node(heap, arena, id);
        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, heap: &mut Heap, arena: &ExprArena, id: ExprId) -> Result<Value, EvalError> {
        let i = id.index();
        if self.states[i].phase == Phase::Done {
            return Ok(self.states[i].value.clone().unwrap_or(Value::Null));
        }
        let node = arena.get(id);
        let value = match &node.kind {
            ExprKind::Cast { inner, .. } => self.eval(heap, arena, *inner)?,
            ExprKind::Reference(r) => {
                let target = self.target(node, r)?;
                self.reference(heap, arena, target)?
            }
            ExprKind::Null => Value::Null,
            _ => {
                let ty = result_type(node);
                let shape = self.shape(&ty, node)?;
                if shape.chain.is_empty() {
                    self.eval_shaped(heap, arena, id, &ty)?
                } else {
                    self.states[i].converting = true;
                    let mut value = self.eval_shaped(heap, arena, id, &shape.ty)?;
                    for converter in shape.chain.iter().rev() {
                        value = converter.from_wire(heap, value).map_err(|source| {
                            EvalError::Converter {
                                type_name: ty.to_string(),
                                source,
                                line: node.line,
                                column: node.column,
                            }
                        })?;
                    }
                    self.states[i].converting = false;
                    trace!("converted node {} into `{}`", i, ty);
                    value
                }
            }
        };
        self.store(id, value.clone());
        Ok(value)
    }

    fn reference_node(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
    ) -> Result<Value, EvalError> {
        let i = id.index();
        let node = arena.get(id);
        if self.states[i].converting {
            return Err(not_referenceable(
                node,
                format!("`{}` is still being converted", result_type(node)),
            ));
        }
        let phase = self.states[i].phase;
        if phase == Phase::Done {
            return Ok(self.states[i].value.clone().unwrap_or(Value::Null));
        }

        match &node.kind {
            ExprKind::Cast { inner, .. } => self.reference(heap, arena, *inner),
            ExprKind::Reference(r) => {
                let target = self.target(node, r)?;
                self.reference(heap, arena, target)
            }
            ExprKind::Object(obj) => match phase {
                Phase::Constructing => Err(not_referenceable(
                    node,
                    format!(
                        "constructor arguments of `{}` are still being evaluated",
                        result_type(node)
                    ),
                )),
                Phase::Constructed | Phase::Populating => {
                    Ok(self.states[i].value.clone().unwrap_or(Value::Null))
                }
                Phase::Fresh | Phase::Done => {
                    let ty = result_type(node);
                    let shape = self.shape(&ty, node)?;
                    if !shape.chain.is_empty() {
                        return self.eval(heap, arena, id);
                    }
                    let ty = self.container_shape(&ty, node)?;
                    let instance = self.construct(heap, arena, id, obj, &ty)?;
                    Ok(Value::Object(instance))
                }
            },
            ExprKind::Array(_) => {
                if let (Phase::Populating, Some(builder)) = (phase, self.states[i].builder.as_ref())
                {
                    return builder
                        .partial_reference()
                        .map(Value::Object)
                        .map_err(|ProbeError::NotYetReferenceable { reason }| {
                            not_referenceable(node, reason)
                        });
                }
                self.eval(heap, arena, id)
            }
            _ => self.eval(heap, arena, id),
        }
    }

    fn target(&self, node: &ExprNode, reference: &ReferenceExpr) -> Result<ExprId, EvalError> {
        reference.target.ok_or_else(|| {
            not_referenceable(node, format!("reference `{}` was never resolved", reference.path))
        })
    }

    fn store(&mut self, id: ExprId, value: Value) {
        let state = &mut self.states[id.index()];
        state.phase = Phase::Done;
        state.value = Some(value);
    }

    /// Evaluates a node that is not a cast or a reference as `ty`.
    fn eval_shaped(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
        ty: &Type,
    ) -> Result<Value, EvalError> {
        let node = arena.get(id);
        match &node.kind {
            ExprKind::Bool(b) => read_leaf(self.schema, &node.kind, ty)
                .ok_or_else(|| conversion(node, ty, b.to_string())),
            ExprKind::Numeric(raw) => read_leaf(self.schema, &node.kind, ty)
                .ok_or_else(|| conversion(node, ty, format!("number {raw}"))),
            ExprKind::Value(raw) => read_leaf(self.schema, &node.kind, ty)
                .ok_or_else(|| conversion(node, ty, format!("'{raw}'"))),
            ExprKind::Object(obj) => {
                let ty = self.container_shape(ty, node)?;
                Ok(Value::Object(self.eval_object(heap, arena, id, obj, &ty)?))
            }
            ExprKind::Array(items) => {
                let ty = self.container_shape(ty, node)?;
                Ok(Value::Object(self.eval_array(heap, arena, id, items, &ty)?))
            }
            ExprKind::Null | ExprKind::Cast { .. } | ExprKind::Reference(_) => Ok(Value::Null),
        }
    }

    fn eval_object(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
        obj: &ObjectExpr,
        ty: &Type,
    ) -> Result<ObjectId, EvalError> {
        let i = id.index();
        let node = arena.get(id);
        let instance = match self.states[i].phase {
            Phase::Fresh => self.construct(heap, arena, id, obj, ty)?,
            Phase::Constructing => {
                return Err(not_referenceable(
                    node,
                    format!("`{ty}` is used while its constructor arguments are evaluated"),
                ))
            }
            _ => match self.states[i].value {
                Some(Value::Object(instance)) => instance,
                _ => return Err(conversion(node, ty, "an object")),
            },
        };
        if self.states[i].phase == Phase::Constructed {
            self.populate(heap, arena, id, obj, ty, instance)?;
        }
        Ok(instance)
    }

    fn construct(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
        obj: &ObjectExpr,
        ty: &Type,
    ) -> Result<ObjectId, EvalError> {
        let i = id.index();
        let node = arena.get(id);
        if !matches!(
            self.schema.kind(ty),
            TypeKind::Class | TypeKind::Map | TypeKind::Any
        ) {
            return Err(conversion(node, ty, "an object"));
        }

        if let Some(existing) = self.states[i].existing {
            if obj.constructor_args.is_empty() {
                trace!("filling existing object for node {i}");
                self.states[i].phase = Phase::Constructed;
                self.states[i].value = Some(Value::Object(existing));
                return Ok(existing);
            }
        }

        let params = self.schema.constructor_parameters(ty);
        if params.len() != obj.constructor_args.len() {
            return Err(conversion(
                node,
                format!("`{ty}` with {} constructor argument(s)", params.len()),
                format!("{} argument(s)", obj.constructor_args.len()),
            ));
        }

        self.states[i].phase = Phase::Constructing;
        let mut args = Vec::with_capacity(params.len());
        for arg in &obj.constructor_args {
            args.push(self.eval(heap, arena, *arg)?);
        }
        let instance = self
            .schema
            .create_instance(heap, ty, args)
            .map_err(|source| EvalError::Schema {
                source,
                line: node.line,
                column: node.column,
            })?;
        trace!("constructed `{}` for node {}", ty, i);

        self.states[i].phase = Phase::Constructed;
        self.states[i].value = Some(Value::Object(instance));
        Ok(instance)
    }

    fn populate(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
        obj: &ObjectExpr,
        ty: &Type,
        instance: ObjectId,
    ) -> Result<(), EvalError> {
        self.states[id.index()].phase = Phase::Populating;
        let node = arena.get(id);
        let is_class = self.schema.kind(ty) == TypeKind::Class;
        for (key, child) in &obj.properties {
            if !is_class {
                let value = self.eval(heap, arena, *child)?;
                self.set(heap, node, instance, key, value)?;
                continue;
            }
            match self.schema.property(ty, key) {
                None => match self.config.missing_property {
                    PropertyAction::Ignore => trace!("skipping unknown property `{key}` of `{ty}`"),
                    PropertyAction::SetIfPossible => {
                        let value = self.eval(heap, arena, *child)?;
                        self.set(heap, node, instance, key, value)?;
                    }
                    PropertyAction::Throw => {
                        return Err(EvalError::MissingProperty {
                            type_name: ty.to_string(),
                            property: key.clone(),
                            line: arena.get(*child).line,
                            column: arena.get(*child).column,
                        })
                    }
                },
                Some(prop) if prop.ignored => match self.config.ignored_property {
                    PropertyAction::SetIfPossible if prop.writable => {
                        let value = self.eval(heap, arena, *child)?;
                        self.set(heap, node, instance, key, value)?;
                    }
                    PropertyAction::Throw => {
                        return Err(EvalError::IgnoredProperty {
                            type_name: ty.to_string(),
                            property: key.clone(),
                            line: arena.get(*child).line,
                            column: arena.get(*child).column,
                        })
                    }
                    _ => trace!("skipping ignored property `{key}` of `{ty}`"),
                },
                Some(prop) if !prop.writable => {
                    let existing = self.schema.get_property(heap, instance, key);
                    self.eval_into(heap, arena, *child, existing)?;
                }
                Some(_) => {
                    let value = self.eval(heap, arena, *child)?;
                    self.set(heap, node, instance, key, value)?;
                }
            }
        }
        self.store(id, Value::Object(instance));
        Ok(())
    }

    fn set(
        &self,
        heap: &mut Heap,
        node: &ExprNode,
        instance: ObjectId,
        key: &str,
        value: Value,
    ) -> Result<(), EvalError> {
        self.schema
            .set_property(heap, instance, key, value)
            .map_err(|source| EvalError::Schema {
                source,
                line: node.line,
                column: node.column,
            })
    }

    /// Evaluates a read-only property into the instance it already holds.
    fn eval_into(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        child: ExprId,
        existing: Option<Value>,
    ) -> Result<(), EvalError> {
        let target = arena.uncast(child);
        let existing = existing.and_then(|value| value.as_object());
        if let Some(existing) = existing {
            let state = &mut self.states[target.index()];
            if state.phase == Phase::Fresh {
                state.existing = Some(existing);
            }
        }
        let value = self.eval(heap, arena, child)?;
        trace!("read-only property evaluated in place to {:?}", value);

        // Reached through a reference or built before its owner: the instance
        // is merged into `existing` once evaluation completes.
        if let (Some(into), Value::Object(from)) = (existing, value) {
            if from == into {
                return Ok(());
            }
            let claimed = self
                .pending_redirects
                .iter()
                .find(|r| r.from == from)
                .map(|r| r.into);
            match claimed {
                Some(other) if other != into => {
                    return Err(not_referenceable(
                        arena.get(child),
                        "the value already fills another read-only property".to_string(),
                    ))
                }
                Some(_) => {}
                None => self.pending_redirects.push(Redirect {
                    from,
                    into,
                    node: target,
                }),
            }
        }
        Ok(())
    }

    fn eval_array(
        &mut self,
        heap: &mut Heap,
        arena: &ExprArena,
        id: ExprId,
        items: &[ExprId],
        ty: &Type,
    ) -> Result<ObjectId, EvalError> {
        let i = id.index();
        let node = arena.get(id);
        if self.schema.kind(ty) != TypeKind::Collection {
            return Err(conversion(node, ty, "an array"));
        }
        let existing = self.states[i].existing;
        let builder = self
            .schema
            .collection_builder(heap, ty, items.len(), existing)
            .map_err(|source| EvalError::Schema {
                source,
                line: node.line,
                column: node.column,
            })?;
        self.states[i].builder = Some(builder);
        self.states[i].phase = Phase::Populating;

        for item in items {
            let value = self.eval(heap, arena, *item)?;
            if let Some(builder) = self.states[i].builder.as_mut() {
                builder.add(heap, value);
            }
        }

        let builder = self.states[i].builder.take().ok_or_else(|| {
            not_referenceable(node, format!("collection `{ty}` was finished twice"))
        })?;
        Ok(builder.finish(heap))
    }
}

/// Reads a literal node as `ty`, or `None` if the literal does not fit.
pub(crate) fn read_leaf(schema: &dyn Schema, kind: &ExprKind, ty: &Type) -> Option<Value> {
    match kind {
        ExprKind::Null => Some(Value::Null),
        ExprKind::Bool(b) => match ty {
            Type::Any | Type::Bool => Some(Value::Bool(*b)),
            Type::String => Some(Value::Str(b.to_string())),
            _ => None,
        },
        ExprKind::Numeric(raw) => read_numeric(schema, raw, ty),
        ExprKind::Value(raw) => read_text(schema, raw, ty),
        _ => None,
    }
}

fn read_numeric(schema: &dyn Schema, raw: &str, ty: &Type) -> Option<Value> {
    match ty {
        Type::Any => natural_number(raw),
        Type::String => Some(Value::Str(raw.to_string())),
        Type::Int(kind) => integer(raw, *kind),
        Type::Float(kind) => float(raw, *kind),
        Type::Char => single_char(raw),
        Type::Named(name) => {
            let variants = schema.enum_variants(ty)?;
            let index: usize = raw.parse().ok()?;
            let variant = variants.get(index)?;
            Some(Value::enum_variant(name.clone(), variant.clone()))
        }
        _ => None,
    }
}

fn read_text(schema: &dyn Schema, raw: &str, ty: &Type) -> Option<Value> {
    match ty {
        Type::Any | Type::String => Some(Value::Str(raw.to_string())),
        Type::Char => single_char(raw),
        Type::Bool => match raw {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Type::Int(_) | Type::Float(_) => read_numeric(schema, raw, ty),
        Type::Named(name) => {
            let variants = schema.enum_variants(ty)?;
            if variants.iter().any(|v| v == raw) {
                Some(Value::enum_variant(name.clone(), raw))
            } else {
                read_numeric(schema, raw, ty)
            }
        }
        _ => None,
    }
}

fn result_type(node: &ExprNode) -> Type {
    node.result_type.clone().unwrap_or(Type::Any)
}

fn conversion(node: &ExprNode, expected: impl ToString, found: impl Into<String>) -> EvalError {
    EvalError::TypeConversion {
        expected: expected.to_string(),
        found: found.into(),
        line: node.line,
        column: node.column,
    }
}

fn not_referenceable(node: &ExprNode, reason: String) -> EvalError {
    EvalError::NotYetReferenceable {
        reason,
        line: node.line,
        column: node.column,
    }
}

/// `i64`, then `u64`, then `f64`, whichever reads the lexeme first.
fn natural_number(raw: &str) -> Option<Value> {
    match Type::natural_numeric(raw) {
        Type::Int(IntKind::I64) => raw.parse().ok().map(Value::Int),
        Type::Int(_) => raw.parse().ok().map(Value::UInt),
        _ => raw.parse().ok().map(Value::Float),
    }
}

/// Integer destinations also accept integral float lexemes such as `1e3`.
fn integer(raw: &str, kind: IntKind) -> Option<Value> {
    let value = match raw.parse::<i128>() {
        Ok(value) => value,
        Err(_) => {
            let f: f64 = raw.parse().ok()?;
            if !f.is_finite() || f.fract() != 0.0 || f.abs() >= 1e38 {
                return None;
            }
            f as i128
        }
    };
    if !kind.contains(value) {
        return None;
    }
    if kind.is_signed() {
        i64::try_from(value).ok().map(Value::Int)
    } else {
        u64::try_from(value).ok().map(Value::UInt)
    }
}

fn float(raw: &str, kind: FloatKind) -> Option<Value> {
    match kind {
        FloatKind::F64 => raw.parse::<f64>().ok().map(Value::Float),
        FloatKind::F32 => raw.parse::<f32>().ok().map(|f| Value::Float(f.into())),
    }
}

fn single_char(raw: &str) -> Option<Value> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(Value::Char(c)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::schema::{ClassDef, CollectionKind, SchemaRegistry};

    fn schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .register_class(
                ClassDef::new("Point")
                    .property("x", Type::Int(IntKind::I32))
                    .property("y", Type::Int(IntKind::I32))
                    .property("label", Type::String)
                    .constructor(&["x", "y"]),
            )
            .register_class(
                ClassDef::new("Node")
                    .property("name", Type::String)
                    .property("next", Type::named("Node"))
                    .constructor(&["name"]),
            )
            .register_class(
                ClassDef::new("Numbers")
                    .property("exact", Type::Int(IntKind::I64))
                    .property("approx", Type::Float(FloatKind::F64))
                    .property("small", Type::Int(IntKind::U8)),
            )
            .register_class(
                ClassDef::new("Bag")
                    .read_only("items", Type::list(Type::Int(IntKind::I32)))
                    .ignored("cache", Type::Any)
                    .property("alias", Type::Any),
            )
            .register_enum("Color", &["Red", "Green", "Blue"])
            .register_collection("Tuple", Type::Any, CollectionKind::Frozen);
        schema
    }

    fn parse(source: &str) -> Document {
        let mut doc = Parser::new(source).parse_document().unwrap();
        Resolver::new().resolve(&mut doc).unwrap();
        doc
    }

    fn eval_with(
        schema: &SchemaRegistry,
        config: &SerializerConfig,
        source: &str,
        ty: &Type,
    ) -> (Heap, Result<Value, EvalError>) {
        let mut doc = parse(source);
        let mut heap = Heap::new();
        let result = Evaluator::new(schema, config).evaluate_document(&mut heap, &mut doc, ty);
        (heap, result)
    }

    fn eval(source: &str, ty: &Type) -> (Heap, Value) {
        let (heap, result) = eval_with(&schema(), &SerializerConfig::default(), source, ty);
        (heap, result.unwrap())
    }

    fn object(value: &Value) -> ObjectId {
        value.as_object().unwrap()
    }

    #[test]
    fn test_forward_reference() {
        let (heap, root) = eval(r#"{ "a": $['b'], "b": 42 }"#, &Type::Any);
        assert_eq!(heap.field(object(&root), "a"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_self_reference() {
        let (heap, root) = eval("{ self_ref: $ }", &Type::Any);
        let id = object(&root);
        assert_eq!(heap.field(id, "self_ref"), Some(&Value::Object(id)));
    }

    #[test]
    fn test_shared_instance_through_references() {
        let (heap, root) = eval(
            "{ a: new Point(1, 2), b: $.a, c: [$.a, $.b] }",
            &Type::Any,
        );
        let id = object(&root);
        let a = heap.field(id, "a").cloned().unwrap();
        assert_eq!(heap.field(id, "b"), Some(&a));
        let c = object(heap.field(id, "c").unwrap());
        assert_eq!(heap.items(c), Some(&[a.clone(), a][..]));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let schema = schema();
        let config = SerializerConfig::default();
        let mut doc = parse("{ a: [1, { b: 2 }] }");
        let mut heap = Heap::new();
        let mut evaluator = Evaluator::new(&schema, &config);
        evaluator.prepare(&mut doc, &Type::Any).unwrap();
        let first = evaluator.evaluate(&mut heap, &doc, doc.root).unwrap();
        let objects = heap.len();
        let second = evaluator.evaluate(&mut heap, &doc, doc.root).unwrap();
        assert_eq!(first, second);
        assert_eq!(heap.len(), objects);
        assert_eq!(evaluator.get_reference(&mut heap, &doc, doc.root).unwrap(), first);
    }

    #[test]
    fn test_numeric_boundary() {
        let (heap, root) = eval(
            "{ exact: 123456789012345, approx: 123456789012345, small: 255 }",
            &Type::named("Numbers"),
        );
        let id = object(&root);
        assert_eq!(heap.field(id, "exact"), Some(&Value::Int(123456789012345)));
        assert_eq!(
            heap.field(id, "approx"),
            Some(&Value::Float(123456789012345.0))
        );
        assert_eq!(heap.field(id, "small"), Some(&Value::UInt(255)));

        let (_, result) = eval_with(
            &schema(),
            &SerializerConfig::default(),
            "{ small: 256 }",
            &Type::named("Numbers"),
        );
        assert!(matches!(result, Err(EvalError::TypeConversion { .. })));
    }

    #[test]
    fn test_natural_numbers_under_any() {
        let (heap, root) = eval("[1, 18446744073709551615, 1.5, 1e2, '7']", &Type::Any);
        assert_eq!(
            heap.items(object(&root)),
            Some(
                &[
                    Value::Int(1),
                    Value::UInt(u64::MAX),
                    Value::Float(1.5),
                    Value::Float(100.0),
                    Value::Str("7".to_string()),
                ][..]
            )
        );
    }

    #[test]
    fn test_casts_drive_leaf_types() {
        let (heap, root) = eval(
            "{ f: (f64) 1, s: (string) 42, c: (char) 'x', e: (Color) Green, n: (Color) 2, i: (i8) (i64) 1e1 }",
            &Type::Any,
        );
        let id = object(&root);
        assert_eq!(heap.field(id, "f"), Some(&Value::Float(1.0)));
        assert_eq!(heap.field(id, "s"), Some(&Value::from("42")));
        assert_eq!(heap.field(id, "c"), Some(&Value::Char('x')));
        assert_eq!(
            heap.field(id, "e"),
            Some(&Value::enum_variant("Color", "Green"))
        );
        assert_eq!(
            heap.field(id, "n"),
            Some(&Value::enum_variant("Color", "Blue"))
        );
        assert_eq!(heap.field(id, "i"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_bad_leaves() {
        let schema = schema();
        let config = SerializerConfig::default();
        for source in ["(char) 'ab'", "(Color) Purple", "(i32) 1.5", "(bool) 1", "(u8) -1"] {
            let (_, result) = eval_with(&schema, &config, source, &Type::Any);
            assert!(
                matches!(result, Err(EvalError::TypeConversion { .. })),
                "{source} should not convert: {result:?}"
            );
        }
        let (_, result) = eval_with(&schema, &config, "(Nope) 1", &Type::Any);
        assert!(matches!(result, Err(EvalError::UnknownType { .. })));
    }

    #[test]
    fn test_constructor_and_properties() {
        let (heap, root) = eval("new Point(3, 4) { label: origin }", &Type::Any);
        let id = object(&root);
        assert_eq!(heap.get(id).unwrap().ty, Type::named("Point"));
        assert_eq!(heap.field(id, "x"), Some(&Value::Int(3)));
        assert_eq!(heap.field(id, "label"), Some(&Value::from("origin")));

        let (_, result) = eval_with(
            &schema(),
            &SerializerConfig::default(),
            "new Point(3)",
            &Type::Any,
        );
        assert!(matches!(result, Err(EvalError::TypeConversion { .. })));
    }

    #[test]
    fn test_cycle_through_properties() {
        let (heap, root) = eval(
            "new Node('a') { next: new Node('b') { next: $ } }",
            &Type::Any,
        );
        let a = object(&root);
        let b = object(heap.field(a, "next").unwrap());
        assert_eq!(heap.field(b, "next"), Some(&Value::Object(a)));
    }

    #[test]
    fn test_constructor_argument_cannot_reference_its_object() {
        let (_, result) = eval_with(
            &schema(),
            &SerializerConfig::default(),
            "{ n: new Node($.n) }",
            &Type::Any,
        );
        assert!(matches!(
            result,
            Err(EvalError::NotYetReferenceable { .. })
        ));
    }

    #[test]
    fn test_collection_self_reference() {
        let (heap, root) = eval("[1, $]", &Type::Any);
        let id = object(&root);
        assert_eq!(heap.items(id).unwrap()[1], Value::Object(id));

        let (_, result) = eval_with(
            &schema(),
            &SerializerConfig::default(),
            "(Tuple) [1, $]",
            &Type::Any,
        );
        assert!(matches!(
            result,
            Err(EvalError::NotYetReferenceable { .. })
        ));
    }

    #[test]
    fn test_read_only_collection_is_filled_in_place() {
        let schema = schema();
        let mut heap = Heap::new();
        let mut doc = parse("{ items: [1, 2], alias: $.items }");
        let config = SerializerConfig::default();
        let root = Evaluator::new(&schema, &config)
            .evaluate_document(&mut heap, &mut doc, &Type::named("Bag"))
            .unwrap();
        let id = object(&root);
        let items = heap.field(id, "items").cloned().unwrap();
        assert_eq!(
            heap.items(object(&items)),
            Some(&[Value::Int(1), Value::Int(2)][..])
        );
        assert_eq!(heap.field(id, "alias"), Some(&items));
    }

    #[test]
    fn test_read_only_collection_reached_before_its_owner() {
        let schema = schema();
        let config = SerializerConfig::default();
        for source in [
            "{ alias: (list<i32>) [1, 2], items: $.alias }",
            "{ alias: $.items, items: [1, 2] }",
        ] {
            let (heap, result) = eval_with(&schema, &config, source, &Type::named("Bag"));
            let id = object(&result.unwrap());
            let items = heap.field(id, "items").cloned().unwrap();
            assert_eq!(
                heap.items(object(&items)),
                Some(&[Value::Int(1), Value::Int(2)][..]),
                "{source}"
            );
            assert_eq!(heap.field(id, "alias"), Some(&items), "{source}");
        }
    }

    #[test]
    fn test_read_only_collection_cannot_take_a_map() {
        let (_, result) = eval_with(
            &schema(),
            &SerializerConfig::default(),
            "{ alias: { a: 1 }, items: $.alias }",
            &Type::named("Bag"),
        );
        assert!(result.is_err(), "{result:?}");
    }

    #[test]
    fn test_property_actions() {
        let schema = schema();
        let source = "new Point(1, 2) { extra: 3 }";
        let ty = Type::named("Point");

        let (_, result) = eval_with(&schema, &SerializerConfig::default(), source, &ty);
        assert!(matches!(result, Err(EvalError::MissingProperty { .. })));

        let lenient = SerializerConfig {
            missing_property: PropertyAction::Ignore,
            ..SerializerConfig::default()
        };
        let (_, result) = eval_with(&schema, &lenient, source, &ty);
        assert!(result.is_ok());

        let keep = SerializerConfig {
            missing_property: PropertyAction::SetIfPossible,
            ..SerializerConfig::default()
        };
        let (heap, result) = eval_with(&schema, &keep, source, &ty);
        let id = object(&result.unwrap());
        assert_eq!(heap.field(id, "extra"), Some(&Value::Int(3)));

        let strict = SerializerConfig {
            ignored_property: PropertyAction::Throw,
            ..SerializerConfig::default()
        };
        let (_, result) = eval_with(&schema, &strict, "{ cache: 1 }", &Type::named("Bag"));
        assert!(matches!(result, Err(EvalError::IgnoredProperty { .. })));
    }

    #[test]
    fn test_object_reached_only_by_reference_is_populated() {
        let (heap, root) = eval("{ cache: { v: 1 }, alias: $.cache }", &Type::named("Bag"));
        let id = object(&root);
        assert_eq!(heap.field(id, "cache"), Some(&Value::Null));
        let alias = object(heap.field(id, "alias").unwrap());
        assert_eq!(heap.field(alias, "v"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_depth_limit() {
        let config = SerializerConfig {
            max_depth: 4,
            ..SerializerConfig::default()
        };
        let mut doc = Parser::new("[[[[[1]]]]]").parse_document().unwrap();
        let schema = schema();
        let mut heap = Heap::new();
        let result =
            Evaluator::new(&schema, &config).evaluate_document(&mut heap, &mut doc, &Type::Any);
        assert!(matches!(
            result,
            Err(EvalError::DepthLimitExceeded { limit: 4 })
        ));
    }

    struct VersionConverter;

    impl Converter for VersionConverter {
        fn wire_type(&self, _source: &Type) -> Type {
            Type::String
        }

        fn to_wire(&self, heap: &Heap, value: &Value) -> Result<Value, ConvertError> {
            let id = value
                .as_object()
                .ok_or_else(|| ConvertError::new("not a version"))?;
            let part = |name: &str| heap.field(id, name).and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::Str(format!("{}.{}", part("major"), part("minor"))))
        }

        fn from_wire(&self, heap: &mut Heap, wire: Value) -> Result<Value, ConvertError> {
            let text = wire
                .as_str()
                .ok_or_else(|| ConvertError::new("expected a string"))?;
            let (major, minor) = text
                .split_once('.')
                .ok_or_else(|| ConvertError::new(format!("bad version '{text}'")))?;
            let parse = |s: &str| {
                s.parse::<i64>()
                    .map_err(|_| ConvertError::new(format!("bad version '{text}'")))
            };
            let fields = [
                ("major", Value::Int(parse(major)?)),
                ("minor", Value::Int(parse(minor)?)),
            ];
            Ok(Value::Object(heap.record(Type::named("Version"), fields)))
        }
    }

    struct ReleaseConverter;

    impl Converter for ReleaseConverter {
        fn wire_type(&self, _source: &Type) -> Type {
            Type::named("Version")
        }

        fn to_wire(&self, heap: &Heap, value: &Value) -> Result<Value, ConvertError> {
            let id = value
                .as_object()
                .ok_or_else(|| ConvertError::new("not a release"))?;
            heap.field(id, "version")
                .cloned()
                .ok_or_else(|| ConvertError::new("release without version"))
        }

        fn from_wire(&self, heap: &mut Heap, wire: Value) -> Result<Value, ConvertError> {
            Ok(Value::Object(
                heap.record(Type::named("Release"), [("version", wire)]),
            ))
        }
    }

    #[test]
    fn test_chained_converters() {
        let mut schema = schema();
        schema
            .register_converter(Type::named("Version"), Arc::new(VersionConverter))
            .register_converter(Type::named("Release"), Arc::new(ReleaseConverter))
            .register_class(ClassDef::new("Holder").property("r", Type::named("Release")));
        let (heap, result) = eval_with(
            &schema,
            &SerializerConfig::default(),
            "{ r: '1.2' }",
            &Type::named("Holder"),
        );
        let holder = object(&result.unwrap());
        let release = object(heap.field(holder, "r").unwrap());
        let version = object(heap.field(release, "version").unwrap());
        assert_eq!(heap.field(version, "minor"), Some(&Value::Int(2)));

        let (_, result) = eval_with(
            &schema,
            &SerializerConfig::default(),
            "{ r: 'one.two' }",
            &Type::named("Holder"),
        );
        assert!(matches!(result, Err(EvalError::Converter { .. })));
    }

    struct MapConverter;

    impl Converter for MapConverter {
        fn wire_type(&self, _source: &Type) -> Type {
            Type::Map
        }

        fn to_wire(&self, _heap: &Heap, value: &Value) -> Result<Value, ConvertError> {
            Ok(value.clone())
        }

        fn from_wire(&self, _heap: &mut Heap, wire: Value) -> Result<Value, ConvertError> {
            Ok(wire)
        }
    }

    #[test]
    fn test_converting_value_is_not_referenceable() {
        let mut schema = schema();
        schema.register_converter(Type::named("Wrapped"), Arc::new(MapConverter));
        let (_, result) = eval_with(
            &schema,
            &SerializerConfig::default(),
            "{ w: (Wrapped) { me: $.w } }",
            &Type::Any,
        );
        assert!(matches!(
            result,
            Err(EvalError::NotYetReferenceable { .. })
        ));
    }
}
