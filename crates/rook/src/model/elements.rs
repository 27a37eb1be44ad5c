//
// elements.rs
//
// Source Elements: the semantic outline tree built during analysis.
// Elements live in a per-run arena (`ElementStore`) and reference each
// other by id, which keeps builders free of shared mutable ownership.
//

use crate::ast::Span;
use crate::model::access::AccessId;
use serde::Serialize;

/// Placeholder class for arguments matched by a method signature whose
/// class is not statically known.
pub const SIG_CLASS_UNKNOWN: &str = "<?>";
/// Placeholder for formals with no declared class at all.
pub const ARG_CLASS_NONE: &str = "\u{2014}";

/// Index of an element in the per-run [`ElementStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(pub u32);

impl ElementId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Semantic element categories. `…Local…` variants mark definitions inside
/// function or class bodies rather than at the unit top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKind {
    SourceUnit,
    CommonFunction,
    CommonLocalFunction,
    GenericFunction,
    S4Method,
    S4Class,
    S4ClassExtension,
    S4Slot,
    CommonVariable,
    CommonLocalVariable,
    Argument,
    PackageImport,
}

/// Name bucket used for occurrence counting among siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameBucket {
    Common,
    Class,
    Import,
}

impl ElementKind {
    pub fn is_function(self) -> bool {
        matches!(
            self,
            ElementKind::CommonFunction
                | ElementKind::CommonLocalFunction
                | ElementKind::GenericFunction
                | ElementKind::S4Method
        )
    }

    /// Map to the LOCAL variant where one exists (definitions inside
    /// function/class scopes).
    pub fn local_variant(self) -> Self {
        match self {
            ElementKind::CommonFunction => ElementKind::CommonLocalFunction,
            ElementKind::CommonVariable => ElementKind::CommonLocalVariable,
            other => other,
        }
    }

    pub fn bucket(self) -> NameBucket {
        match self {
            ElementKind::S4Class | ElementKind::S4ClassExtension => NameBucket::Class,
            ElementKind::PackageImport => NameBucket::Import,
            _ => NameBucket::Common,
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            ElementKind::SourceUnit => "unit",
            ElementKind::CommonFunction => "function",
            ElementKind::CommonLocalFunction => "local function",
            ElementKind::GenericFunction => "generic",
            ElementKind::S4Method => "method",
            ElementKind::S4Class => "class",
            ElementKind::S4ClassExtension => "class extension",
            ElementKind::S4Slot => "slot",
            ElementKind::CommonVariable => "variable",
            ElementKind::CommonLocalVariable => "local variable",
            ElementKind::Argument => "argument",
            ElementKind::PackageImport => "import",
        }
    }
}

/// One formal argument of a function/method element, with the declared
/// class when a method signature supplied one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunArg {
    pub name: Option<String>,
    pub class_name: Option<String>,
}

/// Argument list of a function/method element.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FunArgs {
    pub args: Vec<FunArg>,
}

impl FunArgs {
    pub fn display(&self) -> String {
        let parts: Vec<&str> = self
            .args
            .iter()
            .map(|a| a.name.as_deref().unwrap_or("..."))
            .collect();
        format!("({})", parts.join(", "))
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ElementDetail {
    #[default]
    None,
    Function {
        args: Option<FunArgs>,
    },
    Class {
        superclasses: Vec<String>,
    },
    Slot {
        type_name: Option<String>,
        initialized: bool,
    },
}

/// One node of the semantic outline tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceElement {
    pub kind: ElementKind,
    /// Base name; `None` for anonymous functions and unresolvable targets.
    pub name: Option<String>,
    /// Index among same-named siblings in the same bucket, assigned at
    /// finalization (0 for the first occurrence).
    pub occurrence: u32,
    pub span: Span,
    /// The access that defined this element, when one exists.
    pub access: Option<AccessId>,
    pub children: Vec<ElementId>,
    pub detail: ElementDetail,
}

impl SourceElement {
    pub fn new(kind: ElementKind, span: Span) -> Self {
        Self {
            kind,
            name: None,
            occurrence: 0,
            span,
            access: None,
            children: Vec::new(),
            detail: ElementDetail::None,
        }
    }

    pub fn named(kind: ElementKind, name: impl Into<String>, span: Span) -> Self {
        let mut element = Self::new(kind, span);
        element.name = Some(name.into());
        element
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn fun_args(&self) -> Option<&FunArgs> {
        match &self.detail {
            ElementDetail::Function { args } => args.as_ref(),
            _ => None,
        }
    }
}

/// Per-run element arena.
#[derive(Debug, Default, Clone)]
pub struct ElementStore {
    items: Vec<SourceElement>,
}

impl ElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: SourceElement) -> ElementId {
        let id = ElementId(self.items.len() as u32);
        self.items.push(element);
        id
    }

    pub fn get(&self, id: ElementId) -> &SourceElement {
        &self.items[id.index()]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut SourceElement {
        &mut self.items[id.index()]
    }

    pub fn add_child(&mut self, parent: ElementId, child: ElementId) {
        self.items[parent.index()].children.push(child);
    }

    /// Sort a parent's children by source offset; equal offsets keep their
    /// declaration order.
    pub fn sort_children(&mut self, parent: ElementId) {
        let mut children = std::mem::take(&mut self.items[parent.index()].children);
        children.sort_by_key(|id| (self.items[id.index()].span.start, *id));
        self.items[parent.index()].children = children;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ElementId> {
        (0..self.items.len() as u32).map(ElementId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_buckets() {
        assert_eq!(ElementKind::S4Class.bucket(), NameBucket::Class);
        assert_eq!(ElementKind::S4ClassExtension.bucket(), NameBucket::Class);
        assert_eq!(ElementKind::PackageImport.bucket(), NameBucket::Import);
        assert_eq!(ElementKind::CommonFunction.bucket(), NameBucket::Common);
        assert_eq!(ElementKind::S4Slot.bucket(), NameBucket::Common);
    }

    #[test]
    fn test_local_variants() {
        assert_eq!(
            ElementKind::CommonFunction.local_variant(),
            ElementKind::CommonLocalFunction
        );
        assert_eq!(
            ElementKind::CommonVariable.local_variant(),
            ElementKind::CommonLocalVariable
        );
        assert_eq!(
            ElementKind::GenericFunction.local_variant(),
            ElementKind::GenericFunction
        );
    }

    #[test]
    fn test_sort_children_by_offset_stable() {
        let mut store = ElementStore::new();
        let root = store.push(SourceElement::new(ElementKind::SourceUnit, Span::new(0, 100)));
        let late = store.push(SourceElement::named(
            ElementKind::CommonVariable,
            "b",
            Span::new(50, 60),
        ));
        let early = store.push(SourceElement::named(
            ElementKind::CommonVariable,
            "a",
            Span::new(10, 20),
        ));
        let tied = store.push(SourceElement::named(
            ElementKind::CommonVariable,
            "c",
            Span::new(50, 55),
        ));
        store.add_child(root, late);
        store.add_child(root, early);
        store.add_child(root, tied);

        store.sort_children(root);

        let names: Vec<&str> = store.get(root).children.iter()
            .map(|id| store.get(*id).display_name())
            .collect();
        // `late` (id 1) sorts before `tied` (id 3) at the same offset
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fun_args_display() {
        let args = FunArgs {
            args: vec![
                FunArg {
                    name: Some("x".into()),
                    class_name: None,
                },
                FunArg {
                    name: Some("y".into()),
                    class_name: Some("numeric".into()),
                },
            ],
        };
        assert_eq!(args.display(), "(x, y)");
    }
}
