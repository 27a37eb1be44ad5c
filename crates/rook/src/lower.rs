//
// lower.rs
//
// Lowers tree-sitter CSTs into the `ast` node enum. Comments are dropped,
// `->` forms are normalized, and unknown or broken syntax becomes
// `NodeKind::Other` so the analyzer can always traverse a full tree.
//

use crate::ast::{Arg, AssignOp, Ast, Node, NodeId, NodeKind, Param, Span};
use crate::parser_pool;
use crate::parser_pool::non_extra_children;
use tree_sitter::Node as TsNode;

/// Parse R source text and lower it in one step.
///
/// Unparseable input yields `Ast::empty()` so downstream analysis still
/// produces a well-formed model for every unit.
pub fn parse_source(text: &str) -> Ast {
    match parser_pool::parse(text) {
        Some(tree) => lower_tree(&tree, text),
        None => {
            log::warn!("parser returned no tree; lowering empty unit");
            Ast::empty()
        }
    }
}

/// Lower a parsed tree-sitter tree into an [`Ast`].
pub fn lower_tree(tree: &tree_sitter::Tree, text: &str) -> Ast {
    let mut lowerer = Lowerer { text, next_id: 0 };
    let root = lowerer.lower_node(tree.root_node());
    Ast {
        root,
        node_count: lowerer.next_id,
    }
}

struct Lowerer<'a> {
    text: &'a str,
    next_id: u32,
}

impl<'a> Lowerer<'a> {
    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn text_of(&self, node: TsNode) -> &'a str {
        &self.text[node.byte_range()]
    }

    fn span_of(node: TsNode) -> Span {
        Span::new(node.start_byte(), node.end_byte())
    }

    fn lower_node(&mut self, node: TsNode) -> Node {
        // Ids are assigned pre-order: a parent's id is smaller than any id
        // in its subtree.
        let id = self.alloc();
        let span = Self::span_of(node);
        let kind = self.lower_kind(node);
        Node::new(id, span, kind)
    }

    fn lower_kind(&mut self, node: TsNode) -> NodeKind {
        match node.kind() {
            "program" => NodeKind::Source {
                exprs: self.lower_named_children(node),
            },
            "binary_operator" => self.lower_binary(node),
            "right_assignment" => self.lower_right_assignment(node),
            "unary_operator" => self.lower_unary(node),
            "call" => self.lower_call_like(node, CallForm::Call),
            "subset" => self.lower_call_like(node, CallForm::Subset { double: false }),
            "subset2" => self.lower_call_like(node, CallForm::Subset { double: true }),
            "function_definition" => self.lower_function(node),
            "extract_operator" => self.lower_extract(node),
            "namespace_operator" => self.lower_namespace(node),
            "identifier" => NodeKind::Symbol {
                name: self.text_of(node).trim_matches('`').to_string(),
            },
            "dots" | "dot_dot_i" => NodeKind::Symbol {
                name: self.text_of(node).to_string(),
            },
            "string" => NodeKind::StringConst {
                value: self.string_value(node),
            },
            "integer" | "float" | "complex" | "true" | "false" | "inf" | "nan" | "na" => {
                NodeKind::NumConst {
                    text: self.text_of(node).to_string(),
                }
            }
            "null" => NodeKind::NullConst,
            "if_statement" => self.lower_if(node),
            "for_statement" => self.lower_for(node),
            "while_statement" => self.lower_while(node),
            "repeat_statement" => self.lower_repeat(node),
            "braced_expression" | "brace_list" => NodeKind::Block {
                exprs: self.lower_named_children(node),
            },
            "parenthesized_expression" => NodeKind::Block {
                exprs: self.lower_named_children(node),
            },
            _ => NodeKind::Other {
                children: self.lower_named_children(node),
            },
        }
    }

    /// Lower every named, non-comment child in source order.
    fn lower_named_children(&mut self, node: TsNode) -> Vec<Node> {
        let mut cursor = node.walk();
        let children: Vec<TsNode> = node
            .children(&mut cursor)
            .filter(|c| c.is_named() && !c.is_extra())
            .collect();
        children.into_iter().map(|c| self.lower_node(c)).collect()
    }

    fn lower_binary(&mut self, node: TsNode) -> NodeKind {
        let mut cursor = node.walk();
        let children = non_extra_children(node, &mut cursor);
        if children.len() != 3 {
            return NodeKind::Other {
                children: self.lower_named_children(node),
            };
        }
        let (lhs, op, rhs) = (children[0], children[1], children[2]);
        let op_text = self.text_of(op);

        match op_text {
            "<-" | "=" | "<<-" => {
                let target = self.lower_node(lhs);
                let source = self.lower_node(rhs);
                NodeKind::Assign {
                    op: match op_text {
                        "<-" => AssignOp::Left,
                        "=" => AssignOp::LeftEq,
                        _ => AssignOp::LeftSuper,
                    },
                    target: Box::new(target),
                    source: Box::new(source),
                }
            }
            "->" | "->>" => {
                // Id order stays textual (value before name) even though the
                // value ends up in the `source` field.
                let source = self.lower_node(lhs);
                let target = self.lower_node(rhs);
                NodeKind::Assign {
                    op: if op_text == "->" {
                        AssignOp::Right
                    } else {
                        AssignOp::RightSuper
                    },
                    target: Box::new(target),
                    source: Box::new(source),
                }
            }
            "?" => {
                let topic = self.lower_node(rhs);
                NodeKind::Help {
                    topic: Some(Box::new(topic)),
                }
            }
            _ => {
                let lowered_lhs = self.lower_node(lhs);
                let lowered_rhs = self.lower_node(rhs);
                NodeKind::Other {
                    children: vec![lowered_lhs, lowered_rhs],
                }
            }
        }
    }

    /// Older grammar revisions expose `value -> name` as its own node kind.
    fn lower_right_assignment(&mut self, node: TsNode) -> NodeKind {
        let mut cursor = node.walk();
        let children = non_extra_children(node, &mut cursor);
        if children.len() != 3 {
            return NodeKind::Other {
                children: self.lower_named_children(node),
            };
        }
        let op_text = self.text_of(children[1]);
        let source = self.lower_node(children[0]);
        let target = self.lower_node(children[2]);
        NodeKind::Assign {
            op: if op_text == "->>" {
                AssignOp::RightSuper
            } else {
                AssignOp::Right
            },
            target: Box::new(target),
            source: Box::new(source),
        }
    }

    fn lower_unary(&mut self, node: TsNode) -> NodeKind {
        let mut cursor = node.walk();
        let children = non_extra_children(node, &mut cursor);
        if children.len() == 2 && self.text_of(children[0]) == "?" {
            let topic = self.lower_node(children[1]);
            return NodeKind::Help {
                topic: Some(Box::new(topic)),
            };
        }
        NodeKind::Other {
            children: self.lower_named_children(node),
        }
    }

    fn lower_call_like(&mut self, node: TsNode, form: CallForm) -> NodeKind {
        let target = match node.child_by_field_name("function") {
            Some(f) => self.lower_node(f),
            None => {
                return NodeKind::Other {
                    children: self.lower_named_children(node),
                }
            }
        };
        let args = match node.child_by_field_name("arguments") {
            Some(arguments) => self.lower_args(arguments),
            None => Vec::new(),
        };
        match form {
            CallForm::Call => NodeKind::Call {
                target: Box::new(target),
                args,
            },
            CallForm::Subset { double } => NodeKind::SubIndexed {
                obj: Box::new(target),
                args,
                double,
            },
        }
    }

    fn lower_args(&mut self, arguments: TsNode) -> Vec<Arg> {
        let mut cursor = arguments.walk();
        let children: Vec<TsNode> = arguments
            .children(&mut cursor)
            .filter(|c| c.is_named() && !c.is_extra())
            .collect();
        let mut args = Vec::with_capacity(children.len());
        for child in children {
            if child.kind() == "argument" {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| self.lower_node(n));
                let value = child
                    .child_by_field_name("value")
                    .map(|v| self.lower_node(v));
                args.push(Arg {
                    span: Self::span_of(child),
                    name,
                    value,
                });
            } else {
                // Stray nodes (usually ERROR) keep their position as an
                // unnamed argument so the analyzer still sees them.
                let value = self.lower_node(child);
                args.push(Arg {
                    span: Self::span_of(child),
                    name: None,
                    value: Some(value),
                });
            }
        }
        args
    }

    fn lower_function(&mut self, node: TsNode) -> NodeKind {
        let params = match node.child_by_field_name("parameters") {
            Some(parameters) => self.lower_params(parameters),
            None => Vec::new(),
        };
        let body = match node.child_by_field_name("body") {
            Some(b) => self.lower_node(b),
            None => {
                let id = self.alloc();
                Node::new(id, Self::span_of(node), NodeKind::Other { children: vec![] })
            }
        };
        NodeKind::FunDef {
            params,
            body: Box::new(body),
        }
    }

    fn lower_params(&mut self, parameters: TsNode) -> Vec<Param> {
        let mut cursor = parameters.walk();
        let children: Vec<TsNode> = parameters
            .children(&mut cursor)
            .filter(|c| c.is_named() && !c.is_extra() && c.kind() == "parameter")
            .collect();
        let mut params = Vec::with_capacity(children.len());
        for child in children {
            let name_node = child.child_by_field_name("name").or_else(|| {
                let mut c = child.walk();
                let first = child.children(&mut c).find(|n| n.is_named() && !n.is_extra());
                first
            });
            let Some(name_node) = name_node else {
                continue;
            };
            let name = self.lower_node(name_node);
            let default = child
                .child_by_field_name("default")
                .map(|d| self.lower_node(d));
            params.push(Param {
                span: Self::span_of(child),
                name,
                default,
            });
        }
        params
    }

    fn lower_extract(&mut self, node: TsNode) -> NodeKind {
        let mut cursor = node.walk();
        let children = non_extra_children(node, &mut cursor);
        if children.len() != 3 {
            return NodeKind::Other {
                children: self.lower_named_children(node),
            };
        }
        let slot = self.text_of(children[1]) == "@";
        let obj = self.lower_node(children[0]);
        let field = self.lower_node(children[2]);
        NodeKind::SubNamed {
            obj: Box::new(obj),
            field: Box::new(field),
            slot,
        }
    }

    fn lower_namespace(&mut self, node: TsNode) -> NodeKind {
        let mut cursor = node.walk();
        let children = non_extra_children(node, &mut cursor);
        if children.len() != 3 {
            return NodeKind::Other {
                children: self.lower_named_children(node),
            };
        }
        let internal = self.text_of(children[1]) == ":::";
        let pkg = self.lower_node(children[0]);
        let member = self.lower_node(children[2]);
        NodeKind::NsGet {
            pkg: Box::new(pkg),
            member: Box::new(member),
            internal,
        }
    }

    fn lower_if(&mut self, node: TsNode) -> NodeKind {
        let (cond, then) = match (
            node.child_by_field_name("condition"),
            node.child_by_field_name("consequence"),
        ) {
            (Some(c), Some(t)) => (c, t),
            _ => {
                return NodeKind::Other {
                    children: self.lower_named_children(node),
                }
            }
        };
        let cond = self.lower_node(cond);
        let then = self.lower_node(then);
        let orelse = node
            .child_by_field_name("alternative")
            .map(|a| Box::new(self.lower_node(a)));
        NodeKind::If {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse,
        }
    }

    fn lower_for(&mut self, node: TsNode) -> NodeKind {
        let (var, seq, body) = match (
            node.child_by_field_name("variable"),
            node.child_by_field_name("sequence"),
            node.child_by_field_name("body"),
        ) {
            (Some(v), Some(s), Some(b)) => (v, s, b),
            _ => {
                return NodeKind::Other {
                    children: self.lower_named_children(node),
                }
            }
        };
        let var = self.lower_node(var);
        let seq = self.lower_node(seq);
        let body = self.lower_node(body);
        NodeKind::For {
            var: Box::new(var),
            seq: Box::new(seq),
            body: Box::new(body),
        }
    }

    fn lower_while(&mut self, node: TsNode) -> NodeKind {
        let (cond, body) = match (
            node.child_by_field_name("condition"),
            node.child_by_field_name("body"),
        ) {
            (Some(c), Some(b)) => (c, b),
            _ => {
                return NodeKind::Other {
                    children: self.lower_named_children(node),
                }
            }
        };
        let cond = self.lower_node(cond);
        let body = self.lower_node(body);
        NodeKind::While {
            cond: Box::new(cond),
            body: Box::new(body),
        }
    }

    fn lower_repeat(&mut self, node: TsNode) -> NodeKind {
        match node.child_by_field_name("body") {
            Some(b) => {
                let body = self.lower_node(b);
                NodeKind::Repeat {
                    body: Box::new(body),
                }
            }
            None => NodeKind::Other {
                children: self.lower_named_children(node),
            },
        }
    }

    /// String literal value with delimiters stripped; escape sequences keep
    /// their source spelling.
    fn string_value(&self, node: TsNode) -> String {
        let mut cursor = node.walk();
        let mut out = String::new();
        let mut saw_content = false;
        for child in node.children(&mut cursor) {
            if child.is_named() {
                saw_content = true;
                out.push_str(self.text_of(child));
            }
        }
        if saw_content {
            out
        } else {
            self.text_of(node)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string()
        }
    }
}

enum CallForm {
    Call,
    Subset { double: bool },
}
