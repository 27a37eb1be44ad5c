//
// builtins.rs
//
// Formal-argument definitions for the R core functions the analyzer
// understands, plus call-site argument matching. The table is injected
// through `AnalyzerContext` so it can be swapped per R version.
//

use crate::ast::{Arg, Node};
use std::collections::HashMap;

/// Ordered formal names of one R function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalsSpec {
    formals: Vec<String>,
}

impl FormalsSpec {
    pub fn new(formals: &[&str]) -> Self {
        Self {
            formals: formals.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.formals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formals.is_empty()
    }

    pub fn formal(&self, index: usize) -> &str {
        &self.formals[index]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formals.iter().map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.formals.iter().position(|f| f == name)
    }

    fn ellipsis_index(&self) -> Option<usize> {
        self.formals.iter().position(|f| f == "...")
    }
}

/// Call-site arguments matched against a [`FormalsSpec`].
///
/// R allows any mix of named and positional arguments; handlers always
/// fetch by formal name and never look at call-site order directly.
#[derive(Debug)]
pub struct MatchedArgs<'s, 'a> {
    spec: &'s FormalsSpec,
    by_formal: Vec<Option<&'a Arg>>,
    /// Arguments absorbed by `...` plus named args matching no formal.
    pub ellipsis: Vec<&'a Arg>,
}

impl<'s, 'a> MatchedArgs<'s, 'a> {
    pub fn get(&self, formal: &str) -> Option<&'a Arg> {
        self.spec
            .index_of(formal)
            .and_then(|i| self.by_formal.get(i).copied().flatten())
    }

    /// Value node of the named formal, when the argument was supplied with
    /// a value.
    pub fn value(&self, formal: &str) -> Option<&'a Node> {
        self.get(formal).and_then(|arg| arg.value.as_ref())
    }
}

/// Match call-site arguments against a formals list.
///
/// Exact-named arguments claim their formal first; unnamed arguments then
/// fill the leftmost unclaimed formals up to (not including) `...`;
/// everything left over lands in `ellipsis`.
pub fn read_args<'s, 'a>(spec: &'s FormalsSpec, args: &'a [Arg]) -> MatchedArgs<'s, 'a> {
    let mut by_formal: Vec<Option<&'a Arg>> = vec![None; spec.len()];
    let mut ellipsis: Vec<&'a Arg> = Vec::new();
    let mut positional: Vec<&'a Arg> = Vec::new();

    for arg in args {
        match arg.name_text() {
            Some(name) => match spec.index_of(name) {
                Some(i) if by_formal[i].is_none() && spec.formal(i) != "..." => {
                    by_formal[i] = Some(arg);
                }
                _ => ellipsis.push(arg),
            },
            None => positional.push(arg),
        }
    }

    let limit = spec.ellipsis_index().unwrap_or(spec.len());
    let mut next = 0;
    'fill: for arg in positional {
        while next < limit {
            if by_formal[next].is_none() {
                by_formal[next] = Some(arg);
                next += 1;
                continue 'fill;
            }
            next += 1;
        }
        ellipsis.push(arg);
    }

    MatchedArgs {
        spec,
        by_formal,
        ellipsis,
    }
}

/// Which specialized analyzer handles a call to a given built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinHandler {
    Assign,
    Remove,
    Exists,
    Get,
    Save,
    CallName,
    Library,
    GlobalEnv,
    TopEnv,
    Concat,
    SetGeneric,
    RemoveGeneric,
    Signature,
    SetClass,
    Representation,
    Prototype,
    SetIs,
    RemoveClass,
    SetAs,
    SetValidity,
    ClassRead,
    SetMethod,
    RemoveMethod,
    MethodRead,
    Slot,
    /// Known function with no binding semantics; arguments are visited
    /// plainly and the assignment fallback is suppressed.
    ArgsOnly,
}

/// Dispatch table: resolved callee name to handler.
pub fn handler_for(name: &str) -> Option<BuiltinHandler> {
    use BuiltinHandler::*;
    Some(match name {
        "assign" => Assign,
        "remove" | "rm" => Remove,
        "exists" => Exists,
        "get" => Get,
        "save" => Save,
        "call" => CallName,
        "library" | "require" => Library,
        "globalenv" => GlobalEnv,
        "topenv" => TopEnv,
        "c" => Concat,
        "setGeneric" | "setGroupGeneric" => SetGeneric,
        "removeGeneric" => RemoveGeneric,
        "signature" => Signature,
        "setClass" | "setClassUnion" => SetClass,
        "representation" => Representation,
        "prototype" => Prototype,
        "setIs" => SetIs,
        "removeClass" => RemoveClass,
        "setAs" => SetAs,
        "setValidity" => SetValidity,
        "getClass" | "getClassDef" | "findClass" | "resetClass" | "isVirtualClass" | "new"
        | "as" => ClassRead,
        "setMethod" => SetMethod,
        "removeMethod" | "removeMethods" => RemoveMethod,
        "getMethod" | "selectMethod" | "getMethods" | "findMethod" | "existsMethod"
        | "hasMethod" | "isGeneric" => MethodRead,
        "slot" => Slot,
        "slotNames" | "validObject" => ArgsOnly,
        _ => return None,
    })
}

/// Formal-argument table for the functions in the dispatch table.
#[derive(Debug, Clone)]
pub struct RCoreFunctions {
    specs: HashMap<String, FormalsSpec>,
}

impl RCoreFunctions {
    /// The standard table matching current R core libraries.
    pub fn standard() -> Self {
        let mut specs = HashMap::new();
        let mut def = |name: &str, formals: &[&str]| {
            specs.insert(name.to_string(), FormalsSpec::new(formals));
        };

        // base
        def("assign", &["x", "value", "pos", "envir", "inherits", "immediate"]);
        def("remove", &["...", "list", "pos", "envir", "inherits"]);
        def("rm", &["...", "list", "pos", "envir", "inherits"]);
        def("exists", &["x", "where", "envir", "frame", "mode", "inherits"]);
        def("get", &["x", "pos", "envir", "mode", "inherits"]);
        def(
            "save",
            &[
                "...",
                "list",
                "file",
                "ascii",
                "version",
                "envir",
                "compress",
                "compression_level",
                "eval.promises",
                "precheck",
            ],
        );
        def("call", &["name", "..."]);
        def(
            "library",
            &[
                "package",
                "help",
                "pos",
                "lib.loc",
                "character.only",
                "logical.return",
                "warn.conflicts",
                "quietly",
                "verbose",
            ],
        );
        def(
            "require",
            &["package", "lib.loc", "quietly", "warn.conflicts", "character.only"],
        );
        def("globalenv", &[]);
        def("topenv", &["envir", "matchThisEnv"]);
        def("c", &["..."]);

        // methods (S4)
        def(
            "setGeneric",
            &[
                "name",
                "def",
                "group",
                "valueClass",
                "where",
                "package",
                "signature",
                "useAsDefault",
                "genericFunction",
            ],
        );
        def(
            "setGroupGeneric",
            &["name", "def", "group", "valueClass", "knownMembers", "package", "where"],
        );
        def("removeGeneric", &["f", "where"]);
        def("isGeneric", &["f", "where", "fdef", "getName"]);
        def("signature", &["..."]);
        def(
            "setClass",
            &[
                "Class",
                "representation",
                "prototype",
                "contains",
                "validity",
                "access",
                "where",
                "version",
                "sealed",
                "package",
                "S3methods",
            ],
        );
        def("setClassUnion", &["name", "members", "where"]);
        def("representation", &["..."]);
        def("prototype", &["..."]);
        def(
            "setIs",
            &[
                "class1",
                "class2",
                "test",
                "coerce",
                "replace",
                "where",
                "classDef",
                "extensionObject",
                "doComplete",
            ],
        );
        def("removeClass", &["Class", "where"]);
        def("resetClass", &["Class", "classDef", "where"]);
        def("isVirtualClass", &["Class", "where"]);
        def("setAs", &["from", "to", "def", "replace", "where"]);
        def("setValidity", &["Class", "method", "where"]);
        def("getClass", &["Class", ".Force", "where"]);
        def("getClassDef", &["Class", "where", "package", "inherits"]);
        def("findClass", &["Class", "where", "unless"]);
        def("new", &["Class", "..."]);
        def("as", &["object", "Class", "strict", "ext"]);
        def(
            "setMethod",
            &["f", "signature", "definition", "where", "valueClass", "sealed"],
        );
        def("removeMethod", &["f", "signature", "where"]);
        def("removeMethods", &["f", "where", "all"]);
        def("existsMethod", &["f", "signature", "where"]);
        def("hasMethod", &["f", "signature", "where"]);
        def(
            "getMethod",
            &["f", "signature", "where", "optional", "mlist", "fdef"],
        );
        def(
            "selectMethod",
            &["f", "signature", "optional", "useInherited", "mlist", "fdef", "verbose"],
        );
        def("getMethods", &["f", "where", "table"]);
        def("findMethod", &["f", "signature", "where"]);
        def("slot", &["object", "name", "check"]);
        def("slotNames", &["x"]);
        def("validObject", &["object", "test", "complete"]);

        Self { specs }
    }

    pub fn spec(&self, name: &str) -> Option<&FormalsSpec> {
        self.specs.get(name)
    }

    /// Replace or add one definition; used to adapt the table to a
    /// different R core-library version.
    pub fn with_spec(mut self, name: &str, formals: &[&str]) -> Self {
        self.specs
            .insert(name.to_string(), FormalsSpec::new(formals));
        self
    }
}

impl Default for RCoreFunctions {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeId, NodeKind, Span};

    fn arg(name: Option<&str>, id: u32) -> Arg {
        Arg {
            span: Span::new(0, 0),
            name: name.map(|n| {
                Node::new(
                    NodeId(id * 2),
                    Span::new(0, 0),
                    NodeKind::Symbol { name: n.into() },
                )
            }),
            value: Some(Node::new(
                NodeId(id * 2 + 1),
                Span::new(0, 0),
                NodeKind::NumConst { text: "1".into() },
            )),
        }
    }

    #[test]
    fn test_positional_fill() {
        let spec = FormalsSpec::new(&["x", "value", "pos"]);
        let args = vec![arg(None, 0), arg(None, 1)];
        let matched = read_args(&spec, &args);
        assert!(matched.get("x").is_some());
        assert!(matched.get("value").is_some());
        assert!(matched.get("pos").is_none());
        assert!(matched.ellipsis.is_empty());
    }

    #[test]
    fn test_named_args_claim_formals_out_of_order() {
        let spec = FormalsSpec::new(&["x", "value", "pos"]);
        let args = vec![arg(Some("value"), 0), arg(None, 1)];
        let matched = read_args(&spec, &args);
        // The unnamed arg fills `x`, skipping the claimed `value`
        assert_eq!(
            matched.get("x").map(|a| a.value.as_ref().unwrap().id),
            Some(NodeId(3))
        );
        assert_eq!(
            matched.get("value").map(|a| a.value.as_ref().unwrap().id),
            Some(NodeId(1))
        );
    }

    #[test]
    fn test_unknown_named_goes_to_ellipsis() {
        let spec = FormalsSpec::new(&["x"]);
        let args = vec![arg(Some("bogus"), 0), arg(None, 1)];
        let matched = read_args(&spec, &args);
        assert!(matched.get("x").is_some());
        assert_eq!(matched.ellipsis.len(), 1);
    }

    #[test]
    fn test_positional_stops_at_ellipsis() {
        // remove(..., list, pos, envir, inherits): positional args all
        // belong to `...`
        let table = RCoreFunctions::standard();
        let spec = table.spec("remove").unwrap();
        let args = vec![arg(None, 0), arg(None, 1), arg(Some("list"), 2)];
        let matched = read_args(spec, &args);
        assert_eq!(matched.ellipsis.len(), 2);
        assert!(matched.get("list").is_some());
        assert!(matched.get("pos").is_none());
    }

    #[test]
    fn test_standard_table_covers_dispatch_table() {
        let table = RCoreFunctions::standard();
        for name in [
            "assign",
            "rm",
            "get",
            "library",
            "require",
            "setGeneric",
            "setClass",
            "setMethod",
            "signature",
            "representation",
            "prototype",
            "slot",
            "c",
        ] {
            assert!(handler_for(name).is_some(), "{name} should dispatch");
            assert!(table.spec(name).is_some(), "{name} should have formals");
        }
        assert!(handler_for("print").is_none());
    }

    #[test]
    fn test_with_spec_overrides() {
        let table = RCoreFunctions::standard().with_spec("assign", &["x", "value"]);
        assert_eq!(table.spec("assign").unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_named_arg_overflows() {
        let spec = FormalsSpec::new(&["x", "value"]);
        let args = vec![arg(Some("x"), 0), arg(Some("x"), 1)];
        let matched = read_args(&spec, &args);
        assert!(matched.get("x").is_some());
        assert_eq!(matched.ellipsis.len(), 1);
    }
}
