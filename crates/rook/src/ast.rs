//
// ast.rs
//
// R abstract syntax tree: a tagged node enum the semantic analyzer can
// match over exhaustively. Produced from tree-sitter CSTs by `lower`.
//

use std::fmt;

/// Identifier of a node within one parsed unit.
///
/// Ids are dense and assigned in lowering (pre-order) so they double as
/// deterministic keys for side tables such as attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Byte range of a node in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Assignment operators, normalized so `target` is always the written side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `<-`
    Left,
    /// `=`
    LeftEq,
    /// `<<-`
    LeftSuper,
    /// `->`
    Right,
    /// `->>`
    RightSuper,
}

impl AssignOp {
    /// Superassignment operators write through the search path rather than
    /// into the innermost scope.
    pub fn is_super(self) -> bool {
        matches!(self, AssignOp::LeftSuper | AssignOp::RightSuper)
    }
}

/// A single argument at a call site. Both parts are optional: `f(, x)` has
/// an argument with no name and no value; `f(a = )` has a name only.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub span: Span,
    /// Symbol or string node naming the argument, if written `name = value`.
    pub name: Option<Node>,
    pub value: Option<Node>,
}

impl Arg {
    /// The argument's name text, when the name is a symbol or string.
    pub fn name_text(&self) -> Option<&str> {
        self.name.as_ref().and_then(Node::name_text)
    }
}

/// A formal parameter in a function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub span: Span,
    /// Symbol node holding the parameter name (`...` included).
    pub name: Node,
    pub default: Option<Node>,
}

/// One AST node: identity, source range and the syntactic payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub span: Span,
    pub kind: NodeKind,
}

/// Syntactic forms the analyzer distinguishes. Anything without semantic
/// weight lowers to `Other` and is traversed generically.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Whole source unit (tree-sitter `program`).
    Source { exprs: Vec<Node> },
    /// `target <op> source`, already normalized for `->` and `->>`.
    Assign {
        op: AssignOp,
        target: Box<Node>,
        source: Box<Node>,
    },
    /// `target(args...)`
    Call { target: Box<Node>, args: Vec<Arg> },
    /// `function(params) body` (including the `\(x)` shorthand).
    FunDef { params: Vec<Param>, body: Box<Node> },
    /// Identifier, `...` and `..1` style symbols.
    Symbol { name: String },
    /// String literal with quotes stripped.
    StringConst { value: String },
    /// Numeric and logical literals; `text` keeps the source spelling
    /// (`1L`, `1e3`, `TRUE`, ...).
    NumConst { text: String },
    /// `NULL`
    NullConst,
    /// `pkg::member` (`internal` for `:::`).
    NsGet {
        pkg: Box<Node>,
        member: Box<Node>,
        internal: bool,
    },
    /// `obj$field` and `obj@slot` (`slot` distinguishes `@`).
    SubNamed {
        obj: Box<Node>,
        field: Box<Node>,
        slot: bool,
    },
    /// `obj[args]` and `obj[[args]]` (`double` distinguishes `[[`).
    SubIndexed {
        obj: Box<Node>,
        args: Vec<Arg>,
        double: bool,
    },
    /// `for (var in seq) body`
    For {
        var: Box<Node>,
        seq: Box<Node>,
        body: Box<Node>,
    },
    /// `while (cond) body`
    While { cond: Box<Node>, body: Box<Node> },
    /// `repeat body`
    Repeat { body: Box<Node> },
    /// `if (cond) then [else orelse]`
    If {
        cond: Box<Node>,
        then: Box<Node>,
        orelse: Option<Box<Node>>,
    },
    /// `?topic` and `type?topic`; never analyzed further.
    Help { topic: Option<Box<Node>> },
    /// `{ exprs }` and `( expr )`.
    Block { exprs: Vec<Node> },
    /// Any other syntax (arithmetic, formulas, `break`, parse errors...).
    /// Children are traversed but carry no binding semantics of their own.
    Other { children: Vec<Node> },
}

impl Node {
    pub fn new(id: NodeId, span: Span, kind: NodeKind) -> Self {
        Self { id, span, kind }
    }

    /// Name text when this node can serve as an element name: the symbol
    /// text, or the string value when strings are acceptable to the caller.
    pub fn name_text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symbol { name } => Some(name),
            NodeKind::StringConst { value } => Some(value),
            _ => None,
        }
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symbol { name } => Some(name),
            _ => None,
        }
    }

    pub fn string_value(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::StringConst { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.kind, NodeKind::Symbol { .. })
    }
}

/// A lowered unit: the root node plus the id space size, which sizes the
/// side tables built during analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub root: Node,
    pub node_count: u32,
}

impl Ast {
    /// An empty unit (no expressions). Used for unparseable input so the
    /// analyzer still produces a well-formed model.
    pub fn empty() -> Self {
        Self {
            root: Node::new(
                NodeId(0),
                Span::default(),
                NodeKind::Source { exprs: Vec::new() },
            ),
            node_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_op_super() {
        assert!(AssignOp::LeftSuper.is_super());
        assert!(AssignOp::RightSuper.is_super());
        assert!(!AssignOp::Left.is_super());
        assert!(!AssignOp::LeftEq.is_super());
        assert!(!AssignOp::Right.is_super());
    }

    #[test]
    fn test_name_text_prefers_symbol_and_string() {
        let sym = Node::new(
            NodeId(0),
            Span::new(0, 1),
            NodeKind::Symbol { name: "x".into() },
        );
        assert_eq!(sym.name_text(), Some("x"));
        assert_eq!(sym.symbol_name(), Some("x"));

        let s = Node::new(
            NodeId(1),
            Span::new(0, 3),
            NodeKind::StringConst { value: "y".into() },
        );
        assert_eq!(s.name_text(), Some("y"));
        assert_eq!(s.symbol_name(), None);

        let num = Node::new(
            NodeId(2),
            Span::new(0, 1),
            NodeKind::NumConst { text: "1".into() },
        );
        assert_eq!(num.name_text(), None);
    }

    #[test]
    fn test_empty_ast_has_single_source_node() {
        let ast = Ast::empty();
        assert_eq!(ast.node_count, 1);
        match &ast.root.kind {
            NodeKind::Source { exprs } => assert!(exprs.is_empty()),
            other => panic!("expected Source root, got {:?}", other),
        }
    }
}
