//
// model/mod.rs
//
// The R source model: scopes, element accesses, the semantic element
// tree, and the analyzer that builds them from a lowered AST.
//

pub mod access;
pub mod analyzer;
pub mod builtins;
pub mod elements;
pub mod registry;
pub mod scopes;

pub use access::{AccessFlags, AccessId, Accesses, ElementAccess, SegmentKind, SubSegment};
pub use analyzer::{AnalyzerContext, Request, SigSpec, SourceAnalyzer, Visited};
pub use builtins::{FormalsSpec, RCoreFunctions};
pub use elements::{
    ElementDetail, ElementId, ElementKind, ElementStore, FunArg, FunArgs, SourceElement,
};
pub use registry::ModelRegistry;
pub use scopes::{resolve_deferred, Envir, ScopeId, ScopeMap, ScopeType};

use crate::ast::{Ast, NodeId};
use std::collections::HashMap;

/// Semantic link from one AST node to the model built over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// The node opens a scope (source root, function definitions, class
    /// registration calls).
    Scope(ScopeId),
    /// The node defines a model element (completed assignments, method
    /// registrations).
    Element(ElementId),
}

/// Side map from node ids to semantic attachments. The AST itself is never
/// mutated by analysis; a node carries at most one attachment per run.
#[derive(Debug, Default, Clone)]
pub struct Attachments {
    map: HashMap<NodeId, Attachment>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, attachment: Attachment) {
        self.map.insert(node, attachment);
    }

    pub fn get(&self, node: NodeId) -> Option<&Attachment> {
        self.map.get(&node)
    }

    pub fn scope_of(&self, node: NodeId) -> Option<&ScopeId> {
        match self.map.get(&node) {
            Some(Attachment::Scope(id)) => Some(id),
            _ => None,
        }
    }

    pub fn element_of(&self, node: NodeId) -> Option<ElementId> {
        match self.map.get(&node) {
            Some(Attachment::Element(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The finished per-unit model. Immutable once returned; re-analysis
/// produces a fresh model that supersedes this one wholesale.
#[derive(Debug, Clone)]
pub struct RSourceModel {
    pub unit_id: String,
    pub ast: Ast,
    pub attachments: Attachments,
    pub accesses: Accesses,
    /// All scopes of the run, insertion-ordered.
    pub scopes: ScopeMap,
    pub elements: ElementStore,
    pub root_element: ElementId,
    /// The unit's top-level scope; doubles as the global scope.
    pub top_scope: ScopeId,
}

impl RSourceModel {
    pub fn root(&self) -> &SourceElement {
        self.elements.get(self.root_element)
    }

    pub fn element(&self, id: ElementId) -> &SourceElement {
        self.elements.get(id)
    }

    pub fn scope(&self, id: &ScopeId) -> Option<&Envir> {
        self.scopes.get(id)
    }

    pub fn top_level(&self) -> &Envir {
        &self.scopes[&self.top_scope]
    }

    pub fn attachment(&self, node: NodeId) -> Option<&Attachment> {
        self.attachments.get(node)
    }

    /// Children of an element in finalized (offset) order.
    pub fn children_of(&self, id: ElementId) -> impl Iterator<Item = &SourceElement> {
        self.elements
            .get(id)
            .children
            .iter()
            .map(|c| self.elements.get(*c))
    }
}
