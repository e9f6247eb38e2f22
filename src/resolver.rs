use crate::ast::{Document, ExprId, ExprKind, Path, PathSegment};
use crate::error::ReferenceError;
use log::{debug, trace};
use miette::NamedSource;
use std::collections::HashMap;
use std::sync::Arc;

/// Binds every `$` reference of a document to the node its path designates.
///
/// Runs after the whole tree is parsed, so references may point forward.
/// Paths are followed from the root; casts are transparent and references
/// met along the way are resolved on demand.
#[derive(Debug, Default)]
pub struct Resolver {
    resolved: HashMap<ExprId, ExprId>,
    // References whose path is currently being followed, to detect loops
    resolving_stack: Vec<ExprId>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, document: &mut Document) -> Result<(), ReferenceError> {
        self.resolved.clear();
        self.resolving_stack.clear();
        let references = collect_references(document);
        for &reference in &references {
            let target = self.resolve_reference(document, reference)?;
            if let ExprKind::Reference(r) = &mut document.arena.get_mut(reference).kind {
                r.target = Some(target);
            }
        }
        debug!("resolved {} references", references.len());
        Ok(())
    }

    fn resolve_reference(
        &mut self,
        document: &Document,
        reference: ExprId,
    ) -> Result<ExprId, ReferenceError> {
        if let Some(target) = self.resolved.get(&reference) {
            return Ok(*target);
        }
        let ExprKind::Reference(r) = document.arena.kind(reference) else {
            return Ok(reference);
        };
        if self.resolving_stack.contains(&reference) {
            return Err(self.error(document, reference, |path, line, column, src, span| {
                ReferenceError::ReferenceLoop {
                    path,
                    line,
                    column,
                    src,
                    span,
                }
            }));
        }
        self.resolving_stack.push(reference);
        let result = self.follow_path(document, reference, &r.path);
        self.resolving_stack.pop();

        let target = result?;
        self.resolved.insert(reference, target);
        trace!("{} -> node {}", r.path, target.index());
        Ok(target)
    }

    fn follow_path(
        &mut self,
        document: &Document,
        reference: ExprId,
        reference_path: &Path,
    ) -> Result<ExprId, ReferenceError> {
        let mut current = document.root;
        for (depth, segment) in reference_path.segments().iter().enumerate() {
            current = self.settle(document, current)?;
            current = match (document.arena.kind(current), segment) {
                (ExprKind::Object(obj), PathSegment::Key(key)) => match obj.property(key) {
                    Some(child) => child,
                    None => {
                        let key = key.clone();
                        return Err(self.error(document, reference, |path, line, column, src, span| {
                            ReferenceError::UnknownKey {
                                path,
                                key,
                                line,
                                column,
                                src,
                                span,
                            }
                        }));
                    }
                },
                (ExprKind::Array(items), PathSegment::Index(index)) => match items.get(*index) {
                    Some(child) => *child,
                    None => {
                        let (index, len) = (*index, items.len());
                        return Err(self.error(document, reference, |path, line, column, src, span| {
                            ReferenceError::IndexOutOfRange {
                                path,
                                index,
                                len,
                                line,
                                column,
                                src,
                                span,
                            }
                        }));
                    }
                },
                (_, segment) => {
                    let expected = match segment {
                        PathSegment::Key(_) => "an object",
                        PathSegment::Index(_) => "an array",
                    };
                    let segment = Path(vec![segment.clone()]).to_string();
                    let segment = segment.trim_start_matches('$').to_string();
                    trace!("segment {} of {} stops at {:?}", depth, reference_path, current);
                    return Err(self.error(document, reference, |path, line, column, src, span| {
                        ReferenceError::NotAContainer {
                            path,
                            segment,
                            expected: expected.to_string(),
                            line,
                            column,
                            src,
                            span,
                        }
                    }));
                }
            };
        }

        // A reference to a reference designates whatever that one designates.
        let inner = document.arena.uncast(current);
        match document.arena.kind(inner) {
            ExprKind::Reference(_) => self.resolve_reference(document, inner),
            _ => Ok(current),
        }
    }

    /// Strips casts and follows references until a container or leaf.
    fn settle(&mut self, document: &Document, id: ExprId) -> Result<ExprId, ReferenceError> {
        let inner = document.arena.uncast(id);
        match document.arena.kind(inner) {
            ExprKind::Reference(_) => {
                let target = self.resolve_reference(document, inner)?;
                Ok(document.arena.uncast(target))
            }
            _ => Ok(inner),
        }
    }

    fn error(
        &self,
        document: &Document,
        reference: ExprId,
        build: impl FnOnce(
            String,
            usize,
            usize,
            Arc<NamedSource<String>>,
            Option<miette::SourceSpan>,
        ) -> ReferenceError,
    ) -> ReferenceError {
        let node = document.node(reference);
        let path = match &node.kind {
            ExprKind::Reference(r) => r.path.to_string(),
            _ => String::new(),
        };
        let src = document
            .source
            .clone()
            .unwrap_or_else(|| Arc::new(NamedSource::new("document", String::new())));
        build(path, node.line, node.column, src, node.span)
    }
}

/// Every reference node reachable from the root, in document order.
fn collect_references(document: &Document) -> Vec<ExprId> {
    let mut references = Vec::new();
    let mut stack = vec![document.root];
    while let Some(id) = stack.pop() {
        if let ExprKind::Reference(_) = document.arena.kind(id) {
            references.push(id);
        }
        let children = document.arena.children(id);
        stack.extend(children.into_iter().rev());
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn resolve(source: &str) -> Result<Document, ReferenceError> {
        let mut doc = Parser::new(source).parse_document().unwrap();
        Resolver::new().resolve(&mut doc)?;
        Ok(doc)
    }

    fn target_of(doc: &Document, path: &Path) -> ExprId {
        let id = doc.lookup(path).unwrap();
        match doc.arena.kind(id) {
            ExprKind::Reference(r) => r.target.unwrap(),
            other => panic!("expected a reference, got {other:?}"),
        }
    }

    #[test]
    fn test_forward_and_backward_references() {
        let doc = resolve("{ a: $['b'], b: 42, c: $.b }").unwrap();
        let b = doc.lookup(&Path::root().child_key("b")).unwrap();
        assert_eq!(target_of(&doc, &Path::root().child_key("a")), b);
        assert_eq!(target_of(&doc, &Path::root().child_key("c")), b);
    }

    #[test]
    fn test_root_reference() {
        let doc = resolve("{ self_ref: $ }").unwrap();
        assert_eq!(target_of(&doc, &Path::root().child_key("self_ref")), doc.root);
    }

    #[test]
    fn test_paths_pass_through_casts_and_references() {
        let doc = resolve("{ list: (list<any>) [ { v: 1 } ], alias: $.list, v: $.alias[0].v }").unwrap();
        let leaf = doc
            .lookup(&Path::root().child_key("list").child_index(0).child_key("v"))
            .unwrap();
        assert_eq!(target_of(&doc, &Path::root().child_key("v")), leaf);
    }

    #[test]
    fn test_reference_chains_collapse() {
        let doc = resolve("{ a: $.b, b: $.c, c: [1] }").unwrap();
        let c = doc.lookup(&Path::root().child_key("c")).unwrap();
        assert_eq!(target_of(&doc, &Path::root().child_key("a")), c);
    }

    #[test]
    fn test_reference_loops() {
        for source in ["{ a: $.b, b: $.a }", "{ a: $.a }", "$", "{ a: $.a.b }"] {
            assert!(
                matches!(resolve(source), Err(ReferenceError::ReferenceLoop { .. })),
                "{source} should loop"
            );
        }
    }

    #[test]
    fn test_resolver_is_reusable_after_a_failure() {
        let mut resolver = Resolver::new();
        let mut broken = Parser::new("{ a: $.b.c, b: 1 }").parse_document().unwrap();
        assert!(matches!(
            resolver.resolve(&mut broken),
            Err(ReferenceError::NotAContainer { .. })
        ));

        let mut doc = Parser::new("{ a: $.b, b: [1] }").parse_document().unwrap();
        resolver.resolve(&mut doc).unwrap();
        let b = doc.lookup(&Path::root().child_key("b")).unwrap();
        assert_eq!(target_of(&doc, &Path::root().child_key("a")), b);
    }

    #[test]
    fn test_dangling_references() {
        match resolve("{ a: 1, b: $['missing'] }") {
            Err(ReferenceError::UnknownKey { key, path, .. }) => {
                assert_eq!(key, "missing");
                assert_eq!(path, "$.missing");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            resolve("{ a: [1], b: $.a[3] }"),
            Err(ReferenceError::IndexOutOfRange { index: 3, len: 1, .. })
        ));
        assert!(matches!(
            resolve("{ a: 1, b: $.a.c }"),
            Err(ReferenceError::NotAContainer { .. })
        ));
        assert!(matches!(
            resolve("{ a: {}, b: $.a[0] }"),
            Err(ReferenceError::NotAContainer { .. })
        ));
    }
}
