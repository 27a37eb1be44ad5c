//
// access.rs
//
// ElementAccess: one syntactic occurrence of a name being read, written,
// deleted or referenced as a function/class. Accesses are appended to a
// per-run store and later claimed by exactly one scope.
//

use crate::ast::NodeId;
use crate::model::scopes::ScopeId;
use std::fmt;

bitflags::bitflags! {
    /// Access-kind bits. READ is explicit so `flags.is_empty()` never
    /// happens on a constructed access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const DELETE = 1 << 2;
        const FUNCTION = 1 << 3;
        const SUB = 1 << 4;
        const ARG = 1 << 5;
    }
}

/// Index of an access in the per-run [`Accesses`] store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessId(pub u32);

impl AccessId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One step of a sub-accessor chain (`x[i]`, `x$part`, `x@slot`,
/// `pkg::member`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    Indexed { double: bool },
    Part,
    Slot,
    Namespace { internal: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubSegment {
    pub kind: SegmentKind,
    /// Segment name when statically known (`$part` text, slot name, ...).
    pub name: Option<String>,
    /// Node carrying the segment.
    pub node: NodeId,
}

/// One occurrence of a name in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementAccess {
    pub flags: AccessFlags,
    /// Base name text; `None` when the name position is not statically
    /// resolvable (computed targets, parse errors).
    pub name: Option<String>,
    /// The full expression node this access covers (assignment, call, ...).
    pub node: NodeId,
    /// The node carrying the name itself, when one exists.
    pub name_node: Option<NodeId>,
    /// Ordered sub-accessor chain following the base name.
    pub path: Vec<SubSegment>,
    /// Scope that claimed the access. Set exactly once; later claims are
    /// refused.
    pub scope: Option<ScopeId>,
}

impl ElementAccess {
    pub fn new(flags: AccessFlags, node: NodeId) -> Self {
        Self {
            flags,
            name: None,
            node,
            name_node: None,
            path: Vec::new(),
            scope: None,
        }
    }

    pub fn is_write(&self) -> bool {
        self.flags.intersects(AccessFlags::WRITE)
    }

    pub fn is_function(&self) -> bool {
        self.flags.intersects(AccessFlags::FUNCTION)
    }

    /// Display form of the full access path, e.g. `x$y@slot` or `pkg::f`.
    pub fn display_name(&self) -> String {
        let mut out = String::new();
        match &self.name {
            Some(name) => out.push_str(name),
            None => out.push('?'),
        }
        for seg in &self.path {
            match &seg.kind {
                SegmentKind::Indexed { double } => {
                    out.push_str(if *double { "[[]]" } else { "[]" });
                }
                SegmentKind::Part => {
                    out.push('$');
                    out.push_str(seg.name.as_deref().unwrap_or("?"));
                }
                SegmentKind::Slot => {
                    out.push('@');
                    out.push_str(seg.name.as_deref().unwrap_or("?"));
                }
                SegmentKind::Namespace { internal } => {
                    out.push_str(if *internal { ":::" } else { "::" });
                    out.push_str(seg.name.as_deref().unwrap_or("?"));
                }
            }
        }
        out
    }
}

impl fmt::Display for ElementAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Per-run access store. Ids are dense and stable for the lifetime of one
/// analysis run and the model built from it.
#[derive(Debug, Default, Clone)]
pub struct Accesses {
    items: Vec<ElementAccess>,
}

impl Accesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, access: ElementAccess) -> AccessId {
        let id = AccessId(self.items.len() as u32);
        self.items.push(access);
        id
    }

    pub fn get(&self, id: AccessId) -> &ElementAccess {
        &self.items[id.index()]
    }

    pub fn get_mut(&mut self, id: AccessId) -> &mut ElementAccess {
        &mut self.items[id.index()]
    }

    /// Claim the access for `scope`. Returns `false` (and leaves the access
    /// untouched) when some scope already claimed it.
    pub fn claim(&mut self, id: AccessId, scope: &ScopeId) -> bool {
        let access = &mut self.items[id.index()];
        if access.scope.is_some() {
            return false;
        }
        access.scope = Some(scope.clone());
        true
    }

    pub fn is_claimed(&self, id: AccessId) -> bool {
        self.items[id.index()].scope.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccessId, &ElementAccess)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, a)| (AccessId(i as u32), a))
    }
}
