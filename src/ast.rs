use crate::types::{Type, TypeName};
use miette::{NamedSource, SourceSpan};
use std::fmt::{self, Display};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

impl ExprId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    /// Assigned once by type inference; casts and `new` set it up front.
    pub result_type: Option<Type>,
    /// `result_type` came from a cast or a `new` expression.
    pub explicit_type: bool,
    pub line: usize,
    pub column: usize,
    pub span: Option<SourceSpan>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExprKind {
    Null,
    Bool(bool),
    /// A numeric lexeme, parsed once the destination type is known.
    Numeric(String),
    /// A string, a bare identifier or any other textual literal.
    Value(String),
    Object(ObjectExpr),
    Array(Vec<ExprId>),
    Cast { target: TypeName, inner: ExprId },
    Reference(ReferenceExpr),
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct ObjectExpr {
    /// Set for `new T(...)` objects.
    pub type_name: Option<TypeName>,
    pub constructor_args: Vec<ExprId>,
    pub properties: Vec<(String, ExprId)>,
}

impl ObjectExpr {
    pub fn property(&self, key: &str) -> Option<ExprId> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ReferenceExpr {
    pub path: Path,
    /// Bound by the resolver; never an owning edge.
    pub target: Option<ExprId>,
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// An absolute path from the document root. The empty path is the root.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Path(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Path(segments)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) if is_identifier(key) => write!(f, ".{key}")?,
                PathSegment::Key(key) => {
                    write!(f, "['")?;
                    for c in key.chars() {
                        match c {
                            '\'' => write!(f, "\\'")?,
                            '\\' => write!(f, "\\\\")?,
                            _ => crate::writer::write_escaped_char(f, c)?,
                        }
                    }
                    write!(f, "']")?;
                }
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Keys that can be written as `.key` in a path and unquoted as a value.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: ExprKind, line: usize, column: usize, span: Option<SourceSpan>) -> ExprId {
        self.nodes.push(ExprNode {
            kind,
            result_type: None,
            explicit_type: false,
            line,
            column,
            span,
        });
        ExprId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.0].kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ExprId> {
        (0..self.nodes.len()).map(ExprId)
    }

    /// The direct children of a node, in document order. Reference targets
    /// are not children.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match self.kind(id) {
            ExprKind::Object(obj) => obj
                .constructor_args
                .iter()
                .copied()
                .chain(obj.properties.iter().map(|(_, v)| *v))
                .collect(),
            ExprKind::Array(items) => items.clone(),
            ExprKind::Cast { inner, .. } => vec![*inner],
            _ => Vec::new(),
        }
    }

    /// Skips any number of casts.
    pub fn uncast(&self, mut id: ExprId) -> ExprId {
        while let ExprKind::Cast { inner, .. } = self.kind(id) {
            id = *inner;
        }
        id
    }
}

/// A parsed or built expression tree plus the text it came from, if any.
#[derive(Debug, Clone)]
pub struct Document {
    pub arena: ExprArena,
    pub root: ExprId,
    pub source: Option<Arc<NamedSource<String>>>,
}

impl Document {
    pub fn node(&self, id: ExprId) -> &ExprNode {
        self.arena.get(id)
    }

    /// Follows `path` from the root through objects, arrays and casts.
    /// References along the way are followed to their bound targets.
    pub fn lookup(&self, path: &Path) -> Option<ExprId> {
        let mut current = self.root;
        for segment in path.segments() {
            current = self.follow(current)?;
            current = match (self.arena.kind(current), segment) {
                (ExprKind::Object(obj), PathSegment::Key(key)) => obj.property(key)?,
                (ExprKind::Array(items), PathSegment::Index(i)) => *items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn follow(&self, mut id: ExprId) -> Option<ExprId> {
        for _ in 0..=self.arena.len() {
            id = self.arena.uncast(id);
            match self.arena.kind(id) {
                ExprKind::Reference(r) => id = r.target?,
                _ => return Some(id),
            }
        }
        None
    }
}
