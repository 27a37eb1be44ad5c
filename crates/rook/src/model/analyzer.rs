//
// analyzer.rs
//
// The source analyzer: a single-pass recursive descent over the lowered
// AST that builds scopes, element accesses and the semantic element tree
// for one unit. All run state lives in `Run`, which is dropped on every
// exit path; the analyzer itself is stateless between runs.
//

use crate::ast::{Arg, AssignOp, Ast, Node, NodeId, NodeKind, Param, Span};
use crate::model::access::{
    AccessFlags, AccessId, Accesses, ElementAccess, SegmentKind, SubSegment,
};
use crate::model::builtins::{
    handler_for, read_args, BuiltinHandler, MatchedArgs, RCoreFunctions,
};
use crate::model::elements::{
    ElementDetail, ElementId, ElementKind, ElementStore, FunArg, FunArgs, NameBucket,
    SourceElement, SIG_CLASS_UNKNOWN,
};
use crate::model::scopes::{resolve_deferred, Envir, ScopeId, ScopeMap, ScopeType};
use crate::model::{Attachment, Attachments, RSourceModel};
use crate::perf::TimingGuard;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

bitflags::bitflags! {
    /// Return shapes the enclosing expression can make use of. Passed down
    /// the traversal explicitly; an empty set means "plain visit".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Request: u8 {
        /// Collect string literals (`c("a", "b")`, single strings).
        const STRING_ARRAY = 1 << 0;
        /// A `signature(...)` value is useful.
        const SIGNATURE = 1 << 1;
        /// Inside `setClass(representation = ...)`.
        const CLASS_REPRESENTATION = 1 << 2;
        /// Inside `setClass(prototype = ...)`.
        const CLASS_PROTOTYPE = 1 << 3;
    }
}

/// One entry of a method signature: formal name and/or class name,
/// depending on how the signature was written.
#[derive(Debug, Clone, PartialEq)]
pub struct SigArg {
    pub name: Option<String>,
    pub class_name: Option<String>,
}

/// Signature read from `signature(...)` or a string array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SigSpec {
    pub args: Vec<SigArg>,
}

/// Value returned by visiting one expression, threaded explicitly through
/// the traversal.
#[derive(Debug, Clone, PartialEq)]
pub enum Visited {
    None,
    /// A plain node reference (symbols, strings, name-shaped reads).
    Node(NodeId),
    /// String-literal nodes collected under a `STRING_ARRAY` request.
    NodeArray(Vec<NodeId>),
    /// A signature built under a `SIGNATURE` request.
    Signature(SigSpec),
    /// A completed function element (function definitions).
    Element(ElementId),
    /// A scope value (`.GlobalEnv`, `globalenv()`, `topenv()`).
    Scope(ScopeId),
}

/// Everything the embedder injects into an analysis run.
#[derive(Debug, Clone)]
pub struct AnalyzerContext {
    /// Names the unit's top-level scope.
    pub project_id: String,
    /// Formal-argument table for the built-in handlers; swappable per R
    /// core-library version.
    pub fun_table: Arc<RCoreFunctions>,
    /// Checked at safe points; `update` returns `None` once cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for AnalyzerContext {
    fn default() -> Self {
        Self {
            project_id: "local".into(),
            fun_table: Arc::new(RCoreFunctions::standard()),
            cancel: None,
        }
    }
}

/// Where a registration lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// The innermost scope.
    Local,
    /// Deferred: walk lexical parents at finalize time.
    Search,
    /// The global (top-level) scope, regardless of nesting.
    Global,
}

/// Scope selection read from `pos`/`where`/`envir`/`inherits` arguments.
#[derive(Debug, Clone)]
enum ScopeTarget {
    Default,
    Global,
    Search,
    Scope(ScopeId),
}

/// The analyzer. Stateless between runs; `update` owns all per-run state.
#[derive(Debug, Clone, Default)]
pub struct SourceAnalyzer {
    ctx: AnalyzerContext,
}

impl SourceAnalyzer {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AnalyzerContext {
        &self.ctx
    }

    /// Analyze one unit and build its model. Returns `None` when the
    /// cancellation token fired mid-run; no partial state survives.
    pub fn update(&self, unit_id: &str, ast: Ast) -> Option<RSourceModel> {
        let _timing = TimingGuard::new("model update");
        let mut run = Run::new(&self.ctx, unit_id, &ast);
        run.walk(&ast);
        run.finish(unit_id, ast)
    }
}

// ============================================================================
// Run state
// ============================================================================

/// One source-element container under construction.
struct Builder {
    element: ElementId,
    scope: ScopeId,
    /// Assignment accesses no specialized handler claimed; candidates for
    /// the variable-synthesis pass.
    to_check: Vec<AccessId>,
}

struct Run<'c> {
    ctx: &'c AnalyzerContext,
    scopes: ScopeMap,
    accesses: Accesses,
    elements: ElementStore,
    attachments: Attachments,
    /// Innermost scope last; the top-level scope is always at the bottom.
    scope_stack: Vec<ScopeId>,
    /// Every container ever entered, kept for finalization.
    builders: Vec<Builder>,
    /// Indexes into `builders`; innermost last.
    builder_stack: Vec<usize>,
    /// Argument-value nodes a handler resolved itself; the generic
    /// argument pass removes each mark once instead of re-visiting.
    consumed: HashSet<NodeId>,
    anon_counter: u32,
    /// Imported-package scopes in first-import order.
    dependencies: IndexMap<String, ScopeId>,
    /// Node spans by id, for elements synthesized after traversal.
    node_spans: Vec<Span>,
    /// String-literal values by node id, for `NodeArray` consumers.
    node_strings: Vec<Option<String>>,
    top_scope: ScopeId,
    pkg_use_scope: ScopeId,
    root_element: ElementId,
}

impl<'c> Run<'c> {
    fn new(ctx: &'c AnalyzerContext, unit_id: &str, ast: &Ast) -> Self {
        let top_scope = ScopeId::named(ScopeType::Project, &ctx.project_id);
        let pkg_use_scope = ScopeId::package_use();
        let mut scopes = ScopeMap::new();
        scopes.insert(
            top_scope.clone(),
            Envir::new(ScopeType::Project, top_scope.clone(), vec![]),
        );
        scopes.insert(
            pkg_use_scope.clone(),
            Envir::new(ScopeType::PackageUse, pkg_use_scope.clone(), vec![]),
        );

        let mut elements = ElementStore::new();
        let root_element = elements.push(SourceElement::named(
            ElementKind::SourceUnit,
            unit_id,
            ast.root.span,
        ));
        if let Some(envir) = scopes.get_mut(&top_scope) {
            envir.set_model_element(root_element);
        }

        let mut node_spans = vec![Span::default(); ast.node_count as usize];
        let mut node_strings = vec![None; ast.node_count as usize];
        index_nodes(&ast.root, &mut node_spans, &mut node_strings);

        Self {
            ctx,
            scopes,
            accesses: Accesses::new(),
            elements,
            attachments: Attachments::new(),
            scope_stack: vec![top_scope.clone()],
            builders: vec![Builder {
                element: root_element,
                scope: top_scope.clone(),
                to_check: Vec::new(),
            }],
            builder_stack: vec![0],
            consumed: HashSet::new(),
            anon_counter: 0,
            dependencies: IndexMap::new(),
            node_spans,
            node_strings,
            top_scope,
            pkg_use_scope,
            root_element,
        }
    }

    fn cancelled(&self) -> bool {
        self.ctx
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn span_of(&self, id: NodeId) -> Span {
        self.node_spans.get(id.index()).copied().unwrap_or_default()
    }

    fn string_of(&self, id: NodeId) -> Option<&str> {
        self.node_strings.get(id.index()).and_then(Option::as_deref)
    }

    // ------------------------------------------------------------------
    // Scope and builder plumbing
    // ------------------------------------------------------------------

    fn current_scope(&self) -> ScopeId {
        self.scope_stack
            .last()
            .cloned()
            .unwrap_or_else(|| self.top_scope.clone())
    }

    fn current_builder_element(&self) -> ElementId {
        let idx = self.builder_stack.last().copied().unwrap_or(0);
        self.builders[idx].element
    }

    fn current_builder_scope(&self) -> ScopeId {
        let idx = self.builder_stack.last().copied().unwrap_or(0);
        self.builders[idx].scope.clone()
    }

    fn new_anonymous_id(&mut self, scope_type: ScopeType) -> ScopeId {
        self.anon_counter += 1;
        ScopeId::anonymous(scope_type, self.anon_counter)
    }

    /// Register the scope if this run has not seen its id yet. Two
    /// same-named class/generic scopes share one id; their bindings merge
    /// and the element back-link follows the later registration.
    fn create_scope(&mut self, scope_type: ScopeType, id: &ScopeId) {
        if !self.scopes.contains_key(id) {
            let parents = vec![self.current_scope()];
            self.scopes
                .insert(id.clone(), Envir::new(scope_type, id.clone(), parents));
        }
    }

    fn enter_element(&mut self, element: ElementId, scope: ScopeId, add_to_parent: bool) {
        if add_to_parent {
            let parent = self.current_builder_element();
            self.elements.add_child(parent, element);
        }
        self.builders.push(Builder {
            element,
            scope,
            to_check: Vec::new(),
        });
        self.builder_stack.push(self.builders.len() - 1);
    }

    fn leave_element(&mut self) {
        self.builder_stack.pop();
    }

    /// The scope a package contributes to the search path, created on
    /// first use and spliced into the parent chain at finalization.
    fn dependency_scope(&mut self, pkg: &str) -> ScopeId {
        if let Some(id) = self.dependencies.get(pkg) {
            return id.clone();
        }
        let id = ScopeId::package(pkg);
        if !self.scopes.contains_key(&id) {
            self.scopes
                .insert(id.clone(), Envir::new(ScopeType::Package, id.clone(), vec![]));
        }
        self.dependencies.insert(pkg.to_string(), id.clone());
        id
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn scope_add(&mut self, scope: &ScopeId, name: Option<String>, access: AccessId) {
        if let Some(envir) = self.scopes.get_mut(scope) {
            envir.add(name, access, &mut self.accesses);
        }
    }

    fn register(&mut self, mode: Mode, name: Option<String>, access: AccessId) {
        if self.accesses.is_claimed(access) {
            return;
        }
        match mode {
            Mode::Local => {
                let scope = self.current_scope();
                self.scope_add(&scope, name, access);
            }
            Mode::Global => {
                let scope = self.top_scope.clone();
                self.scope_add(&scope, name, access);
            }
            Mode::Search => {
                let scope = self.current_scope();
                if let Some(envir) = self.scopes.get_mut(&scope) {
                    envir.add_late_resolve(name, access);
                }
            }
        }
    }

    fn register_target(
        &mut self,
        target: ScopeTarget,
        default_mode: Mode,
        name: Option<String>,
        access: AccessId,
    ) {
        match target {
            ScopeTarget::Default => self.register(default_mode, name, access),
            ScopeTarget::Global => self.register(Mode::Global, name, access),
            ScopeTarget::Search => self.register(Mode::Search, name, access),
            ScopeTarget::Scope(id) => self.scope_add(&id, name, access),
        }
    }

    /// Class-name accesses live in the class bucket of the top level (the
    /// run's generic-defaults scope).
    fn register_class(&mut self, name: Option<String>, access: AccessId) {
        let top = self.top_scope.clone();
        if let Some(envir) = self.scopes.get_mut(&top) {
            envir.add_class(name, access, &mut self.accesses);
        }
    }

    /// Generic/method definitions bind into the top level, recorded when
    /// deferred resolution runs.
    fn register_generic(&mut self, name: Option<String>, access: AccessId) {
        let top = self.top_scope.clone();
        if let Some(envir) = self.scopes.get_mut(&top) {
            envir.add_run_resolve(name, access);
        }
    }

    fn register_deferred_top(&mut self, name: Option<String>, access: AccessId) {
        let top = self.top_scope.clone();
        if let Some(envir) = self.scopes.get_mut(&top) {
            envir.add_late_resolve(name, access);
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    fn walk(&mut self, ast: &Ast) {
        self.attachments
            .insert(ast.root.id, Attachment::Scope(self.top_scope.clone()));
        self.visit_expr(&ast.root, Request::empty(), false);
    }

    /// Visit one expression. `request` tells the node which return shapes
    /// the caller can use; `assign_ctx` is set only for the direct source
    /// child of an assignment (and drives the write-through heuristics).
    fn visit_expr(&mut self, node: &Node, request: Request, assign_ctx: bool) -> Visited {
        match &node.kind {
            NodeKind::Source { exprs } => {
                for expr in exprs {
                    if self.cancelled() {
                        break;
                    }
                    self.visit_expr(expr, Request::empty(), false);
                }
                Visited::None
            }
            NodeKind::Assign { op, target, source } => {
                self.visit_assign(node, *op, target, source, request)
            }
            NodeKind::Call { target, args } => {
                self.visit_call(node, target, args, request, assign_ctx)
            }
            NodeKind::FunDef { params, body } => self.visit_fun_def(node, params, body),
            NodeKind::Symbol { name } => {
                if name == ".GlobalEnv" {
                    return Visited::Scope(self.top_scope.clone());
                }
                let mut access = ElementAccess::new(AccessFlags::READ, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(node.id);
                let id = self.accesses.push(access);
                self.register(Mode::Search, Some(name.clone()), id);
                Visited::Node(node.id)
            }
            NodeKind::StringConst { .. } => {
                if request.contains(Request::STRING_ARRAY) {
                    Visited::NodeArray(vec![node.id])
                } else {
                    Visited::Node(node.id)
                }
            }
            NodeKind::NumConst { .. } | NodeKind::NullConst => Visited::None,
            NodeKind::NsGet { .. } => self.visit_ns_get(node, AccessFlags::READ),
            NodeKind::SubNamed { .. } | NodeKind::SubIndexed { .. } => self.visit_subscript(node),
            NodeKind::For { var, seq, body } => {
                if let Some(name) = var.symbol_name().map(str::to_string) {
                    let mut access = ElementAccess::new(AccessFlags::WRITE, node.id);
                    access.name = Some(name.clone());
                    access.name_node = Some(var.id);
                    let id = self.accesses.push(access);
                    self.register(Mode::Local, Some(name), id);
                }
                self.visit_expr(seq, Request::empty(), false);
                self.visit_expr(body, Request::empty(), false);
                Visited::None
            }
            NodeKind::While { cond, body } => {
                self.visit_expr(cond, Request::empty(), false);
                self.visit_expr(body, Request::empty(), false);
                Visited::None
            }
            NodeKind::Repeat { body } => {
                self.visit_expr(body, Request::empty(), false);
                Visited::None
            }
            NodeKind::If { cond, then, orelse } => {
                self.visit_expr(cond, Request::empty(), false);
                self.visit_expr(then, Request::empty(), false);
                if let Some(orelse) = orelse {
                    self.visit_expr(orelse, Request::empty(), false);
                }
                Visited::None
            }
            NodeKind::Help { .. } => Visited::None,
            NodeKind::Block { exprs } => {
                for expr in exprs {
                    self.visit_expr(expr, Request::empty(), false);
                }
                Visited::None
            }
            NodeKind::Other { children } => {
                for child in children {
                    self.visit_expr(child, Request::empty(), false);
                }
                Visited::None
            }
        }
    }

    fn visit_assign(
        &mut self,
        node: &Node,
        op: AssignOp,
        target: &Node,
        source: &Node,
        request: Request,
    ) -> Visited {
        // source first, so `f <- function() ...` sees the function value
        // before the name is bound
        let value = self.visit_expr(source, request, true);
        let mut access = ElementAccess::new(AccessFlags::WRITE, node.id);
        match self.resolve_element_name(target, &mut access, true) {
            Some(name) => {
                access.name = Some(name.clone());
                let sub = !access.path.is_empty();
                let id = self.accesses.push(access);
                let mode = if sub || op.is_super() {
                    Mode::Search
                } else {
                    Mode::Local
                };
                self.register(mode, Some(name), id);
                self.register_source_element(node, id, value)
            }
            None => {
                // computed target (`names(x) <- ...`): traverse it in
                // assignment context so call handlers can mark writes
                self.visit_expr(target, Request::empty(), true);
                Visited::None
            }
        }
    }

    fn visit_call(
        &mut self,
        node: &Node,
        target: &Node,
        args: &[Arg],
        request: Request,
        assign_ctx: bool,
    ) -> Visited {
        let mut fname: Option<String> = None;
        match &target.kind {
            NodeKind::Symbol { name } => {
                let mut access = ElementAccess::new(AccessFlags::READ | AccessFlags::FUNCTION, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(target.id);
                let id = self.accesses.push(access);
                self.register(Mode::Search, Some(name.clone()), id);
                fname = Some(name.clone());
            }
            NodeKind::NsGet { .. } => {
                self.visit_ns_get(target, AccessFlags::READ | AccessFlags::FUNCTION);
            }
            _ => {
                let mut access = ElementAccess::new(AccessFlags::READ | AccessFlags::FUNCTION, node.id);
                match self.resolve_element_name(target, &mut access, false) {
                    Some(base) => {
                        access.name = Some(base.clone());
                        let id = self.accesses.push(access);
                        self.register(Mode::Search, Some(base), id);
                    }
                    None => {
                        self.visit_expr(target, Request::empty(), false);
                    }
                }
            }
        }
        if let Some(name) = fname {
            if let Some(handler) = handler_for(&name) {
                return self.dispatch_builtin(handler, &name, node, args, request, assign_ctx);
            }
        }
        self.no_def_fallback(node, args, assign_ctx);
        Visited::None
    }

    fn visit_fun_def(&mut self, node: &Node, params: &[Param], body: &Node) -> Visited {
        if self.cancelled() {
            return Visited::None;
        }
        let scope_id = self.new_anonymous_id(ScopeType::Function);
        self.create_scope(ScopeType::Function, &scope_id);
        self.attachments
            .insert(node.id, Attachment::Scope(scope_id.clone()));

        let mut elem = SourceElement::new(ElementKind::CommonFunction, node.span);
        elem.detail = ElementDetail::Function {
            args: Some(fun_args_from_params(params)),
        };
        let elem_id = self.elements.push(elem);
        if let Some(envir) = self.scopes.get_mut(&scope_id) {
            envir.set_model_element(elem_id);
        }

        self.scope_stack.push(scope_id.clone());
        // not added to the parent yet: an enclosing assignment or handler
        // completes the element with its name
        self.enter_element(elem_id, scope_id, false);

        for param in params {
            let name = param.name.symbol_name().map(str::to_string);
            let mut access =
                ElementAccess::new(AccessFlags::WRITE | AccessFlags::ARG, param.name.id);
            access.name = name.clone();
            access.name_node = Some(param.name.id);
            let id = self.accesses.push(access);
            self.register(Mode::Local, name.clone(), id);

            let mut arg_elem = SourceElement::new(ElementKind::Argument, param.span);
            arg_elem.name = name;
            arg_elem.access = Some(id);
            let arg_id = self.elements.push(arg_elem);
            self.elements.add_child(elem_id, arg_id);

            if let Some(default) = &param.default {
                self.visit_expr(default, Request::empty(), false);
            }
        }
        self.visit_expr(body, Request::empty(), false);
        self.leave_element();
        self.scope_stack.pop();
        Visited::Element(elem_id)
    }

    /// `pkg::member`: the package occurrence lands in the package-use
    /// scope, the member in the package's own scope.
    fn visit_ns_get(&mut self, node: &Node, member_flags: AccessFlags) -> Visited {
        let NodeKind::NsGet { pkg, member, .. } = &node.kind else {
            return Visited::None;
        };
        let pkg_name = pkg.name_text().map(str::to_string);
        if let Some(pkg_name) = &pkg_name {
            let mut access = ElementAccess::new(AccessFlags::READ, node.id);
            access.name = Some(pkg_name.clone());
            access.name_node = Some(pkg.id);
            let id = self.accesses.push(access);
            let pkg_use = self.pkg_use_scope.clone();
            if let Some(envir) = self.scopes.get_mut(&pkg_use) {
                envir.add_import(Some(pkg_name.clone()), id, &mut self.accesses);
            }
        }
        let member_name = member.name_text().map(str::to_string);
        let mut access = ElementAccess::new(member_flags, node.id);
        access.name = member_name.clone();
        access.name_node = Some(member.id);
        let id = self.accesses.push(access);
        match pkg_name {
            Some(pkg_name) => {
                let scope = self.dependency_scope(&pkg_name);
                self.scope_add(&scope, member_name, id);
            }
            // package not statically known: leave the member to late
            // resolution in the current chain
            None => self.register(Mode::Search, member_name, id),
        }
        Visited::Node(node.id)
    }

    fn visit_subscript(&mut self, node: &Node) -> Visited {
        let mut access = ElementAccess::new(AccessFlags::READ, node.id);
        match self.resolve_element_name(node, &mut access, false) {
            Some(base) => {
                access.name = Some(base.clone());
                let id = self.accesses.push(access);
                self.register(Mode::Search, Some(base), id);
                Visited::Node(node.id)
            }
            None => {
                // computed base (`f()$x`): only the parts that are real
                // expressions get visited
                match &node.kind {
                    NodeKind::SubNamed { obj, .. } => {
                        self.visit_expr(obj, Request::empty(), false);
                    }
                    NodeKind::SubIndexed { obj, args, .. } => {
                        self.visit_expr(obj, Request::empty(), false);
                        for arg in args {
                            if let Some(value) = &arg.value {
                                self.visit_expr(value, Request::empty(), false);
                            }
                        }
                    }
                    _ => {}
                }
                Visited::None
            }
        }
    }

    /// Peel a name-shaped expression down to its base name, pushing
    /// sub-accessor segments onto the access. Subscript index expressions
    /// are visited here (they are ordinary reads). Returns `None` for
    /// shapes that cannot name an element; nothing is registered then and
    /// no partial visits have happened.
    fn resolve_element_name(
        &mut self,
        node: &Node,
        access: &mut ElementAccess,
        allow_string: bool,
    ) -> Option<String> {
        match &node.kind {
            NodeKind::Symbol { name } => {
                if access.name_node.is_none() {
                    access.name_node = Some(node.id);
                }
                Some(name.clone())
            }
            NodeKind::StringConst { value } if allow_string => {
                if access.name_node.is_none() {
                    access.name_node = Some(node.id);
                }
                Some(value.clone())
            }
            NodeKind::SubNamed { obj, field, slot } => {
                let base = self.resolve_element_name(obj, access, allow_string)?;
                access.path.push(SubSegment {
                    kind: if *slot {
                        SegmentKind::Slot
                    } else {
                        SegmentKind::Part
                    },
                    name: field.name_text().map(str::to_string),
                    node: field.id,
                });
                access.flags |= AccessFlags::SUB;
                Some(base)
            }
            NodeKind::SubIndexed { obj, args, double } => {
                let base = self.resolve_element_name(obj, access, allow_string)?;
                let mut seg_name = None;
                if let [arg] = args.as_slice() {
                    seg_name = arg
                        .value
                        .as_ref()
                        .and_then(Node::string_value)
                        .map(str::to_string);
                }
                for arg in args {
                    if let Some(value) = &arg.value {
                        self.visit_expr(value, Request::empty(), false);
                    }
                }
                access.path.push(SubSegment {
                    kind: SegmentKind::Indexed { double: *double },
                    name: seg_name,
                    node: node.id,
                });
                access.flags |= AccessFlags::SUB;
                Some(base)
            }
            NodeKind::NsGet { pkg, member, internal } => {
                let base = pkg.name_text()?.to_string();
                if access.name_node.is_none() {
                    access.name_node = Some(pkg.id);
                }
                access.path.push(SubSegment {
                    kind: SegmentKind::Namespace {
                        internal: *internal,
                    },
                    name: member.name_text().map(str::to_string),
                    node: member.id,
                });
                access.flags |= AccessFlags::SUB;
                Some(base)
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Element registration
    // ------------------------------------------------------------------

    /// Feed an assignment's source value into element registration: a
    /// function element completes with the assigned name; plain values
    /// become candidates for the variable-synthesis pass.
    fn register_source_element(
        &mut self,
        node: &Node,
        access_id: AccessId,
        value: Visited,
    ) -> Visited {
        if let Visited::Element(elem_id) = value {
            if self.elements.get(elem_id).kind.is_function() {
                self.register_function_element(node, elem_id, access_id);
                return Visited::None;
            }
        }
        let access = self.accesses.get(access_id);
        if access.path.is_empty() && access.name.is_some() {
            let idx = self.builder_stack.last().copied().unwrap_or(0);
            self.builders[idx].to_check.push(access_id);
        }
        Visited::None
    }

    fn register_function_element(&mut self, node: &Node, elem_id: ElementId, access_id: AccessId) {
        let local = self.current_scope() != self.top_scope;
        let name = self.accesses.get(access_id).name.clone();
        let elem = self.elements.get_mut(elem_id);
        elem.name = name;
        elem.access = Some(access_id);
        elem.span = node.span;
        if local {
            elem.kind = elem.kind.local_variant();
        }
        let parent = self.current_builder_element();
        self.elements.add_child(parent, elem_id);
        self.attachments.insert(node.id, Attachment::Element(elem_id));
    }

    /// Visit a function-valued argument (`test=`, `coerce=`, ...); a
    /// returned function element joins the current container under the
    /// formal's name.
    fn visit_and_check_value(&mut self, value: &Node, name: &str) {
        self.consumed.insert(value.id);
        if let Visited::Element(elem_id) = self.visit_expr(value, Request::empty(), false) {
            if self.elements.get(elem_id).kind.is_function() {
                let elem = self.elements.get_mut(elem_id);
                elem.name = Some(name.to_string());
                elem.kind = elem.kind.local_variant();
                let parent = self.current_builder_element();
                self.elements.add_child(parent, elem_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Built-in call handlers
    // ------------------------------------------------------------------

    fn dispatch_builtin(
        &mut self,
        handler: BuiltinHandler,
        fname: &str,
        node: &Node,
        args: &[Arg],
        request: Request,
        assign_ctx: bool,
    ) -> Visited {
        let table = Arc::clone(&self.ctx.fun_table);
        let Some(spec) = table.spec(fname) else {
            self.no_def_fallback(node, args, assign_ctx);
            return Visited::None;
        };
        let matched = read_args(spec, args);
        match handler {
            BuiltinHandler::Assign => self.handle_assign(node, args, &matched),
            BuiltinHandler::Remove => self.handle_remove(node, args, &matched),
            BuiltinHandler::Exists | BuiltinHandler::Get => self.handle_get(node, args, &matched),
            BuiltinHandler::Save => self.handle_save(node, args, &matched),
            BuiltinHandler::CallName => self.handle_call_name(node, args, &matched),
            BuiltinHandler::Library => self.handle_library(node, args, &matched),
            BuiltinHandler::GlobalEnv | BuiltinHandler::TopEnv => {
                self.visit_remaining_args(args);
                Visited::Scope(self.top_scope.clone())
            }
            BuiltinHandler::Concat => self.handle_concat(args, request),
            BuiltinHandler::SetGeneric => self.handle_set_generic(node, args, &matched),
            BuiltinHandler::RemoveGeneric => self.handle_remove_generic(node, args, &matched),
            BuiltinHandler::Signature => self.handle_signature(args, request),
            BuiltinHandler::SetClass => self.handle_set_class(node, args, &matched),
            BuiltinHandler::Representation => self.handle_representation(node, args, request),
            BuiltinHandler::Prototype => self.handle_prototype(args, request),
            BuiltinHandler::SetIs => self.handle_set_is(node, args, &matched),
            BuiltinHandler::RemoveClass => {
                self.handle_class_access(node, args, &matched, AccessFlags::DELETE)
            }
            BuiltinHandler::SetAs => self.handle_set_as(node, args, &matched),
            BuiltinHandler::SetValidity => {
                self.handle_class_access(node, args, &matched, AccessFlags::WRITE)
            }
            BuiltinHandler::ClassRead => {
                self.handle_class_access(node, args, &matched, AccessFlags::READ)
            }
            BuiltinHandler::SetMethod => self.handle_set_method(node, args, &matched),
            BuiltinHandler::RemoveMethod => self.handle_remove_method(node, args, &matched),
            BuiltinHandler::MethodRead => self.handle_method_read(node, args, &matched),
            BuiltinHandler::Slot => self.handle_slot(node, args, &matched, assign_ctx),
            BuiltinHandler::ArgsOnly => {
                self.visit_remaining_args(args);
                Visited::None
            }
        }
    }

    /// Visit every argument value no handler consumed.
    fn visit_remaining_args(&mut self, args: &[Arg]) {
        for arg in args {
            if let Some(value) = &arg.value {
                if !self.consumed.remove(&value.id) {
                    self.visit_expr(value, Request::empty(), false);
                }
            }
        }
    }

    /// Calls without a table entry. In assignment context, R
    /// replacement-style calls (`dim(x) <- ...`) write through their first
    /// argument; an unnamed or `x`-named first argument is treated as the
    /// write target.
    fn no_def_fallback(&mut self, node: &Node, args: &[Arg], assign_ctx: bool) {
        let mut write_target: Option<NodeId> = None;
        if assign_ctx {
            if let Some(first) = args.first() {
                let eligible = first.name.is_none() || first.name_text() == Some("x");
                if eligible {
                    if let Some(value) = &first.value {
                        let mut access = ElementAccess::new(AccessFlags::WRITE, node.id);
                        if let Some(base) = self.resolve_element_name(value, &mut access, true) {
                            access.name = Some(base.clone());
                            let id = self.accesses.push(access);
                            self.register(Mode::Search, Some(base), id);
                            write_target = Some(value.id);
                        }
                    }
                }
            }
        }
        for arg in args {
            if let Some(value) = &arg.value {
                if Some(value.id) == write_target {
                    continue;
                }
                if !self.consumed.remove(&value.id) {
                    self.visit_expr(value, Request::empty(), false);
                }
            }
        }
    }

    /// Evaluate `pos`/`where`/`envir` plus `inherits` into a scope target;
    /// consumed values are skipped by the generic argument pass.
    fn read_scope_args(&mut self, matched: &MatchedArgs) -> ScopeTarget {
        let mut target = ScopeTarget::Default;
        for formal in ["pos", "where", "envir"] {
            let Some(value) = matched.value(formal) else {
                continue;
            };
            self.consumed.insert(value.id);
            target = match &value.kind {
                NodeKind::NumConst { text } if text == "1" || text == "1L" => ScopeTarget::Global,
                NodeKind::StringConst { value: s } => match s.strip_prefix("package:") {
                    Some(pkg) => ScopeTarget::Scope(self.dependency_scope(pkg)),
                    None => ScopeTarget::Default,
                },
                _ => match self.visit_expr(value, Request::empty(), false) {
                    Visited::Scope(id) => ScopeTarget::Scope(id),
                    _ => ScopeTarget::Default,
                },
            };
            break;
        }
        if let Some(value) = matched.value("inherits") {
            self.consumed.insert(value.id);
            if matches!(target, ScopeTarget::Default) && eval_boolean(value) == Some(true) {
                target = ScopeTarget::Search;
            }
        }
        target
    }

    fn handle_assign(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let target = self.read_scope_args(matched);
        // value first, so assigned functions complete with the name
        let value = match matched.value("value") {
            Some(value) => {
                self.consumed.insert(value.id);
                self.visit_expr(value, Request::empty(), false)
            }
            None => Visited::None,
        };
        let mut result = Visited::None;
        if let Some(x) = matched.value("x") {
            if let Some(name) = x.name_text().map(str::to_string) {
                self.consumed.insert(x.id);
                let mut access = ElementAccess::new(AccessFlags::WRITE, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(x.id);
                let id = self.accesses.push(access);
                self.register_target(target, Mode::Local, Some(name), id);
                result = self.register_source_element(node, id, value);
            }
        }
        self.visit_remaining_args(args);
        result
    }

    fn handle_remove(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let target = self.read_scope_args(matched);
        for arg in &matched.ellipsis {
            if let Some(value) = &arg.value {
                if let Some(name) = value.name_text().map(str::to_string) {
                    self.consumed.insert(value.id);
                    let mut access = ElementAccess::new(AccessFlags::DELETE, node.id);
                    access.name = Some(name.clone());
                    access.name_node = Some(value.id);
                    let id = self.accesses.push(access);
                    self.register_target(target.clone(), Mode::Search, Some(name), id);
                }
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_get(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let target = self.read_scope_args(matched);
        if let Some(x) = matched.value("x") {
            if let Some(name) = x.name_text().map(str::to_string) {
                self.consumed.insert(x.id);
                let mut access = ElementAccess::new(AccessFlags::READ, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(x.id);
                let id = self.accesses.push(access);
                self.register_target(target, Mode::Search, Some(name), id);
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_save(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let target = self.read_scope_args(matched);
        for arg in &matched.ellipsis {
            if let Some(value) = &arg.value {
                if let Some(name) = value.name_text().map(str::to_string) {
                    self.consumed.insert(value.id);
                    let mut access = ElementAccess::new(AccessFlags::READ, node.id);
                    access.name = Some(name.clone());
                    access.name_node = Some(value.id);
                    let id = self.accesses.push(access);
                    self.register_target(target.clone(), Mode::Search, Some(name), id);
                }
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_call_name(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        if let Some(value) = matched.value("name") {
            if let Some(name) = value.string_value().map(str::to_string) {
                self.consumed.insert(value.id);
                let mut access =
                    ElementAccess::new(AccessFlags::READ | AccessFlags::FUNCTION, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(value.id);
                let id = self.accesses.push(access);
                self.register(Mode::Search, Some(name), id);
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_library(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let character_only = matched
            .value("character.only")
            .and_then(eval_boolean)
            .unwrap_or(false);
        if let Some(pkg_node) = matched.value("package") {
            let name = match &pkg_node.kind {
                NodeKind::StringConst { value } => Some(value.clone()),
                // a bare symbol names the package only under standard
                // (non-character.only) evaluation
                NodeKind::Symbol { name } if !character_only => Some(name.clone()),
                _ => None,
            };
            if let Some(pkg) = name {
                self.consumed.insert(pkg_node.id);
                self.register_import(node, pkg_node.id, &pkg);
            }
        }
        self.visit_remaining_args(args);
        Visited::Scope(self.top_scope.clone())
    }

    /// Record one package import: an import access in the package-use
    /// scope, a `PackageImport` element under the current container, and
    /// the dependency scope finalization splices into the search path.
    fn register_import(&mut self, node: &Node, name_node: NodeId, pkg: &str) {
        let mut access = ElementAccess::new(AccessFlags::READ, node.id);
        access.name = Some(pkg.to_string());
        access.name_node = Some(name_node);
        let id = self.accesses.push(access);
        let pkg_use = self.pkg_use_scope.clone();
        if let Some(envir) = self.scopes.get_mut(&pkg_use) {
            envir.add_import(Some(pkg.to_string()), id, &mut self.accesses);
        }
        let mut elem = SourceElement::named(ElementKind::PackageImport, pkg, node.span);
        elem.access = Some(id);
        let elem_id = self.elements.push(elem);
        let parent = self.current_builder_element();
        self.elements.add_child(parent, elem_id);
        self.attachments.insert(node.id, Attachment::Element(elem_id));
        self.dependency_scope(pkg);
    }

    fn handle_concat(&mut self, args: &[Arg], request: Request) -> Visited {
        if request.contains(Request::STRING_ARRAY) {
            let mut nodes = Vec::new();
            let mut all_strings = true;
            for arg in args {
                if let Some(value) = &arg.value {
                    match &value.kind {
                        NodeKind::StringConst { .. } => nodes.push(value.id),
                        _ => all_strings = false,
                    }
                }
            }
            if all_strings && !nodes.is_empty() {
                for id in &nodes {
                    self.consumed.insert(*id);
                }
                self.visit_remaining_args(args);
                return Visited::NodeArray(nodes);
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_set_generic(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let name_node = matched.value("name");
        let name = name_node.and_then(Node::name_text).map(str::to_string);
        let mut access = ElementAccess::new(AccessFlags::WRITE | AccessFlags::FUNCTION, node.id);
        access.name = name.clone();
        if let (Some(n), true) = (name_node, name.is_some()) {
            self.consumed.insert(n.id);
            access.name_node = Some(n.id);
        }
        let access_id = self.accesses.push(access);
        self.register_generic(name.clone(), access_id);

        let scope_id = match &name {
            Some(n) => ScopeId::named(ScopeType::Function, n),
            None => self.new_anonymous_id(ScopeType::Function),
        };
        self.create_scope(ScopeType::Function, &scope_id);
        self.scope_stack.push(scope_id.clone());

        let mut elem = SourceElement::new(ElementKind::GenericFunction, node.span);
        elem.name = name;
        elem.access = Some(access_id);
        let elem_id = self.elements.push(elem);
        if let Some(envir) = self.scopes.get_mut(&scope_id) {
            envir.set_model_element(elem_id);
        }
        self.enter_element(elem_id, scope_id, true);
        self.attachments.insert(node.id, Attachment::Element(elem_id));

        // the default definition seeds the argument list
        let mut def_args: Option<FunArgs> = None;
        for formal in ["def", "useAsDefault"] {
            if let Some(value) = matched.value(formal) {
                self.consumed.insert(value.id);
                if let Visited::Element(e) = self.visit_expr(value, Request::empty(), false) {
                    if def_args.is_none() {
                        def_args = self.elements.get(e).fun_args().cloned();
                    }
                }
            }
        }
        let sig = match matched.value("signature") {
            Some(value) => {
                self.consumed.insert(value.id);
                self.read_signature(value, false)
            }
            None => None,
        };
        self.elements.get_mut(elem_id).detail = ElementDetail::Function {
            args: create_method_arg_def(def_args.as_ref(), sig.as_ref()),
        };

        self.visit_remaining_args(args);
        self.leave_element();
        self.scope_stack.pop();
        Visited::None
    }

    fn handle_remove_generic(
        &mut self,
        node: &Node,
        args: &[Arg],
        matched: &MatchedArgs,
    ) -> Visited {
        if let Some(f) = matched.value("f") {
            if let Some(name) = f.name_text().map(str::to_string) {
                self.consumed.insert(f.id);
                let mut access =
                    ElementAccess::new(AccessFlags::DELETE | AccessFlags::FUNCTION, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(f.id);
                let id = self.accesses.push(access);
                self.register_generic(Some(name), id);
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_signature(&mut self, args: &[Arg], request: Request) -> Visited {
        if !request.contains(Request::SIGNATURE) {
            self.visit_remaining_args(args);
            return Visited::None;
        }
        let mut sig = SigSpec::default();
        for arg in args {
            let name = arg.name_text().map(str::to_string);
            let class_name = arg
                .value
                .as_ref()
                .and_then(Node::string_value)
                .map(str::to_string);
            if let (Some(value), Some(class)) = (arg.value.as_ref(), class_name.clone()) {
                self.consumed.insert(value.id);
                let mut access = ElementAccess::new(AccessFlags::READ, value.id);
                access.name = Some(class.clone());
                access.name_node = Some(value.id);
                let id = self.accesses.push(access);
                self.register_class(Some(class), id);
            }
            sig.args.push(SigArg { name, class_name });
        }
        self.visit_remaining_args(args);
        Visited::Signature(sig)
    }

    /// Read a `signature=` argument: either a `signature(...)` value or a
    /// string array. `strings_are_classes` decides how bare strings are
    /// interpreted (classes for `setMethod`, formal names for
    /// `setGeneric`).
    fn read_signature(&mut self, node: &Node, strings_are_classes: bool) -> Option<SigSpec> {
        match self.visit_expr(node, Request::SIGNATURE | Request::STRING_ARRAY, false) {
            Visited::Signature(sig) => Some(sig),
            Visited::NodeArray(ids) => {
                let mut sig = SigSpec::default();
                for id in ids {
                    let value = self.string_of(id).map(str::to_string);
                    if strings_are_classes {
                        if let Some(class) = &value {
                            let mut access = ElementAccess::new(AccessFlags::READ, id);
                            access.name = Some(class.clone());
                            access.name_node = Some(id);
                            let aid = self.accesses.push(access);
                            self.register_class(Some(class.clone()), aid);
                        }
                        sig.args.push(SigArg {
                            name: None,
                            class_name: value,
                        });
                    } else {
                        sig.args.push(SigArg {
                            name: value,
                            class_name: None,
                        });
                    }
                }
                Some(sig)
            }
            _ => None,
        }
    }

    fn handle_set_class(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let name_node = matched.value("Class").or_else(|| matched.value("name"));
        let name = name_node.and_then(Node::string_value).map(str::to_string);
        // the class write is recorded even when the name is not literal
        let mut access = ElementAccess::new(AccessFlags::WRITE, node.id);
        access.name = name.clone();
        if let (Some(n), true) = (name_node, name.is_some()) {
            self.consumed.insert(n.id);
            access.name_node = Some(n.id);
        }
        let access_id = self.accesses.push(access);
        self.register_class(name.clone(), access_id);

        let scope_id = match &name {
            Some(n) => ScopeId::named(ScopeType::Class, n),
            None => self.new_anonymous_id(ScopeType::Class),
        };
        self.create_scope(ScopeType::Class, &scope_id);
        self.attachments
            .insert(node.id, Attachment::Scope(scope_id.clone()));
        self.scope_stack.push(scope_id.clone());

        let mut elem = SourceElement::new(ElementKind::S4Class, node.span);
        elem.name = name;
        elem.access = Some(access_id);
        elem.detail = ElementDetail::Class {
            superclasses: Vec::new(),
        };
        let elem_id = self.elements.push(elem);
        if let Some(envir) = self.scopes.get_mut(&scope_id) {
            envir.set_model_element(elem_id);
        }
        self.enter_element(elem_id, scope_id, true);

        if let Some(value) = matched.value("representation") {
            self.consumed.insert(value.id);
            self.visit_expr(value, Request::CLASS_REPRESENTATION, false);
        }
        for formal in ["contains", "members"] {
            if let Some(value) = matched.value(formal) {
                self.consumed.insert(value.id);
                self.read_superclasses(value, elem_id);
            }
        }
        if let Some(value) = matched.value("prototype") {
            self.consumed.insert(value.id);
            self.visit_expr(value, Request::CLASS_PROTOTYPE, false);
        }
        self.visit_remaining_args(args);
        self.leave_element();
        self.scope_stack.pop();
        Visited::None
    }

    fn read_superclasses(&mut self, value: &Node, elem_id: ElementId) {
        if let Visited::NodeArray(ids) = self.visit_expr(value, Request::STRING_ARRAY, false) {
            for id in ids {
                let Some(class) = self.string_of(id).map(str::to_string) else {
                    continue;
                };
                let mut access = ElementAccess::new(AccessFlags::READ, id);
                access.name = Some(class.clone());
                access.name_node = Some(id);
                let aid = self.accesses.push(access);
                self.register_class(Some(class.clone()), aid);
                if let ElementDetail::Class { superclasses } =
                    &mut self.elements.get_mut(elem_id).detail
                {
                    superclasses.push(class);
                }
            }
        }
    }

    fn handle_representation(&mut self, node: &Node, args: &[Arg], request: Request) -> Visited {
        let class_elem = self.current_builder_element();
        let in_class = matches!(
            self.elements.get(class_elem).kind,
            ElementKind::S4Class | ElementKind::S4ClassExtension
        );
        if !request.contains(Request::CLASS_REPRESENTATION) || !in_class {
            self.visit_remaining_args(args);
            return Visited::None;
        }
        let class_scope = self.current_builder_scope();
        for arg in args {
            match (arg.name_text().map(str::to_string), arg.value.as_ref()) {
                (Some(slot_name), value) => {
                    let type_name = value.and_then(|v| v.string_value()).map(str::to_string);
                    let name_id = arg.name.as_ref().map(|n| n.id).unwrap_or(node.id);
                    let mut access = ElementAccess::new(AccessFlags::WRITE, name_id);
                    access.name = Some(slot_name.clone());
                    access.name_node = arg.name.as_ref().map(|n| n.id);
                    let aid = self.accesses.push(access);
                    // the slot binds into the class scope at resolution
                    if let Some(envir) = self.scopes.get_mut(&class_scope) {
                        envir.add_run_resolve(Some(slot_name.clone()), aid);
                    }
                    let mut elem = SourceElement::named(ElementKind::S4Slot, slot_name, arg.span);
                    elem.access = Some(aid);
                    elem.detail = ElementDetail::Slot {
                        type_name: type_name.clone(),
                        initialized: false,
                    };
                    let slot_id = self.elements.push(elem);
                    self.elements.add_child(class_elem, slot_id);

                    if let (Some(v), Some(t)) = (value, type_name) {
                        self.consumed.insert(v.id);
                        let mut access = ElementAccess::new(AccessFlags::READ, v.id);
                        access.name = Some(t.clone());
                        access.name_node = Some(v.id);
                        let tid = self.accesses.push(access);
                        self.register_class(Some(t), tid);
                    }
                }
                (None, Some(value)) => {
                    // unnamed strings are superclasses
                    if let Some(class) = value.string_value().map(str::to_string) {
                        self.consumed.insert(value.id);
                        let mut access = ElementAccess::new(AccessFlags::READ, value.id);
                        access.name = Some(class.clone());
                        access.name_node = Some(value.id);
                        let aid = self.accesses.push(access);
                        self.register_class(Some(class.clone()), aid);
                        if let ElementDetail::Class { superclasses } =
                            &mut self.elements.get_mut(class_elem).detail
                        {
                            superclasses.push(class);
                        }
                    }
                }
                _ => {}
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_prototype(&mut self, args: &[Arg], request: Request) -> Visited {
        let class_elem = self.current_builder_element();
        let in_class = matches!(
            self.elements.get(class_elem).kind,
            ElementKind::S4Class | ElementKind::S4ClassExtension
        );
        if request.contains(Request::CLASS_PROTOTYPE) && in_class {
            for arg in args {
                let Some(name) = arg.name_text() else {
                    continue;
                };
                let children = self.elements.get(class_elem).children.clone();
                for child in children {
                    let elem = self.elements.get_mut(child);
                    if elem.kind == ElementKind::S4Slot && elem.name.as_deref() == Some(name) {
                        if let ElementDetail::Slot { initialized, .. } = &mut elem.detail {
                            *initialized = true;
                        }
                    }
                }
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_set_is(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let class1_node = matched.value("class1");
        let class1 = class1_node.and_then(Node::string_value).map(str::to_string);
        let mut access = ElementAccess::new(AccessFlags::WRITE, node.id);
        access.name = class1.clone();
        if let (Some(n), true) = (class1_node, class1.is_some()) {
            self.consumed.insert(n.id);
            access.name_node = Some(n.id);
        }
        let access_id = self.accesses.push(access);
        self.register_class(class1.clone(), access_id);

        let mut superclasses = Vec::new();
        if let Some(c2) = matched.value("class2") {
            if let Some(name) = c2.string_value().map(str::to_string) {
                self.consumed.insert(c2.id);
                let mut access = ElementAccess::new(AccessFlags::READ, c2.id);
                access.name = Some(name.clone());
                access.name_node = Some(c2.id);
                let id = self.accesses.push(access);
                self.register_class(Some(name.clone()), id);
                superclasses.push(name);
            }
        }

        let scope_id = match &class1 {
            Some(n) => ScopeId::named(ScopeType::Class, n),
            None => self.new_anonymous_id(ScopeType::Class),
        };
        self.create_scope(ScopeType::Class, &scope_id);
        self.attachments
            .insert(node.id, Attachment::Scope(scope_id.clone()));
        self.scope_stack.push(scope_id.clone());

        let mut elem = SourceElement::new(ElementKind::S4ClassExtension, node.span);
        elem.name = class1;
        elem.access = Some(access_id);
        elem.detail = ElementDetail::Class { superclasses };
        let elem_id = self.elements.push(elem);
        if let Some(envir) = self.scopes.get_mut(&scope_id) {
            envir.set_model_element(elem_id);
        }
        self.enter_element(elem_id, scope_id, true);

        for formal in ["test", "coerce", "replace"] {
            if let Some(value) = matched.value(formal) {
                self.visit_and_check_value(value, formal);
            }
        }
        self.visit_remaining_args(args);
        self.leave_element();
        self.scope_stack.pop();
        Visited::None
    }

    fn handle_class_access(
        &mut self,
        node: &Node,
        args: &[Arg],
        matched: &MatchedArgs,
        flags: AccessFlags,
    ) -> Visited {
        if let Some(value) = matched.value("Class") {
            if let Some(name) = value.string_value().map(str::to_string) {
                self.consumed.insert(value.id);
                let mut access = ElementAccess::new(flags, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(value.id);
                let id = self.accesses.push(access);
                self.register_class(Some(name), id);
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_set_as(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        for (formal, flags) in [("from", AccessFlags::WRITE), ("to", AccessFlags::READ)] {
            if let Some(value) = matched.value(formal) {
                if let Some(name) = value.string_value().map(str::to_string) {
                    self.consumed.insert(value.id);
                    let mut access = ElementAccess::new(flags, node.id);
                    access.name = Some(name.clone());
                    access.name_node = Some(value.id);
                    let id = self.accesses.push(access);
                    self.register_class(Some(name), id);
                }
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_set_method(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        let f_node = matched.value("f");
        let name = f_node.and_then(Node::name_text).map(str::to_string);
        let mut access = ElementAccess::new(AccessFlags::WRITE | AccessFlags::FUNCTION, node.id);
        access.name = name.clone();
        if let (Some(n), true) = (f_node, name.is_some()) {
            self.consumed.insert(n.id);
            access.name_node = Some(n.id);
        }
        let access_id = self.accesses.push(access);
        self.register_generic(name.clone(), access_id);

        let sig = match matched.value("signature") {
            Some(value) => {
                self.consumed.insert(value.id);
                self.read_signature(value, true)
            }
            None => None,
        };

        let mut method: Option<ElementId> = None;
        if let Some(def) = matched.value("definition") {
            self.consumed.insert(def.id);
            if let Visited::Element(e) = self.visit_expr(def, Request::empty(), false) {
                if self.elements.get(e).kind.is_function() {
                    method = Some(e);
                }
            }
        }
        let elem_id = match method {
            Some(e) => {
                let def_args = self.elements.get(e).fun_args().cloned();
                let fun_args = create_method_arg_def(def_args.as_ref(), sig.as_ref());
                let elem = self.elements.get_mut(e);
                elem.kind = ElementKind::S4Method;
                elem.name = name;
                elem.access = Some(access_id);
                elem.span = node.span;
                elem.detail = ElementDetail::Function { args: fun_args };
                e
            }
            None => {
                // no statically visible definition: synthesize the entry
                let mut elem = SourceElement::new(ElementKind::S4Method, node.span);
                elem.name = name;
                elem.access = Some(access_id);
                elem.detail = ElementDetail::Function {
                    args: create_method_arg_def(None, sig.as_ref()),
                };
                self.elements.push(elem)
            }
        };
        let parent = self.current_builder_element();
        self.elements.add_child(parent, elem_id);
        self.attachments.insert(node.id, Attachment::Element(elem_id));
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_remove_method(
        &mut self,
        node: &Node,
        args: &[Arg],
        matched: &MatchedArgs,
    ) -> Visited {
        if let Some(f) = matched.value("f") {
            if let Some(name) = f.name_text().map(str::to_string) {
                self.consumed.insert(f.id);
                let mut access =
                    ElementAccess::new(AccessFlags::DELETE | AccessFlags::FUNCTION, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(f.id);
                let id = self.accesses.push(access);
                self.register_deferred_top(Some(name), id);
            }
        }
        if let Some(value) = matched.value("signature") {
            self.consumed.insert(value.id);
            self.read_signature(value, true);
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_method_read(&mut self, node: &Node, args: &[Arg], matched: &MatchedArgs) -> Visited {
        if let Some(f) = matched.value("f") {
            if let Some(name) = f.name_text().map(str::to_string) {
                self.consumed.insert(f.id);
                let mut access =
                    ElementAccess::new(AccessFlags::READ | AccessFlags::FUNCTION, node.id);
                access.name = Some(name.clone());
                access.name_node = Some(f.id);
                let id = self.accesses.push(access);
                self.register(Mode::Search, Some(name), id);
            }
        }
        if let Some(value) = matched.value("signature") {
            self.consumed.insert(value.id);
            self.read_signature(value, true);
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    fn handle_slot(
        &mut self,
        node: &Node,
        args: &[Arg],
        matched: &MatchedArgs,
        assign_ctx: bool,
    ) -> Visited {
        let slot_name = matched
            .value("name")
            .and_then(Node::string_value)
            .map(str::to_string);
        if let Some(obj) = matched.value("object") {
            let base_flags = if assign_ctx {
                AccessFlags::WRITE
            } else {
                AccessFlags::READ
            };
            let mut access = ElementAccess::new(base_flags | AccessFlags::SUB, node.id);
            if let Some(base) = self.resolve_element_name(obj, &mut access, false) {
                self.consumed.insert(obj.id);
                if let (Some(v), true) = (matched.value("name"), slot_name.is_some()) {
                    self.consumed.insert(v.id);
                }
                access.name = Some(base.clone());
                access.path.push(SubSegment {
                    kind: SegmentKind::Slot,
                    name: slot_name,
                    node: matched.value("name").map(|n| n.id).unwrap_or(node.id),
                });
                let id = self.accesses.push(access);
                self.register(Mode::Search, Some(base), id);
            }
        }
        self.visit_remaining_args(args);
        Visited::None
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    fn finish(mut self, unit_id: &str, ast: Ast) -> Option<RSourceModel> {
        if self.cancelled() {
            log::debug!("analysis of {unit_id} cancelled");
            return None;
        }
        // settle imported-package scopes first, then splice them in front
        // of the top level's parents so deferred lookups reach them
        let dep_ids: Vec<ScopeId> = self.dependencies.values().cloned().collect();
        let top = self.top_scope.clone();
        for id in &dep_ids {
            resolve_deferred(&mut self.scopes, &mut self.accesses, id, &top, false);
        }
        if !dep_ids.is_empty() {
            if let Some(envir) = self.scopes.get_mut(&top) {
                let tail = std::mem::take(&mut envir.parents);
                let mut parents = dep_ids;
                parents.extend(tail);
                envir.parents = parents;
            }
        }
        let scope_ids: Vec<ScopeId> = self.scopes.keys().cloned().collect();
        for id in &scope_ids {
            resolve_deferred(&mut self.scopes, &mut self.accesses, id, &top, true);
        }

        let builders = std::mem::take(&mut self.builders);
        for builder in &builders {
            self.synthesize_variables(builder);
            self.elements.sort_children(builder.element);
            self.count_occurrences(builder.element);
        }

        log::trace!(
            "model for {unit_id}: {} elements, {} scopes, {} accesses",
            self.elements.len(),
            self.scopes.len(),
            self.accesses.len()
        );
        Some(RSourceModel {
            unit_id: unit_id.to_string(),
            ast,
            attachments: self.attachments,
            accesses: self.accesses,
            scopes: self.scopes,
            elements: self.elements,
            root_element: self.root_element,
            top_scope: self.top_scope,
        })
    }

    /// Turn unclaimed assignment targets that settled in this container's
    /// scope into variable elements, unless a same-named sibling exists.
    fn synthesize_variables(&mut self, builder: &Builder) {
        let local = builder.scope != self.top_scope;
        for &access_id in &builder.to_check {
            let access = self.accesses.get(access_id);
            if access.scope.as_ref() != Some(&builder.scope) {
                continue;
            }
            let Some(name) = access.name.clone() else {
                continue;
            };
            let node = access.node;
            let already = self.elements.get(builder.element).children.iter().any(|c| {
                let elem = self.elements.get(*c);
                elem.kind.bucket() == NameBucket::Common && elem.name.as_deref() == Some(name.as_str())
            });
            if already {
                continue;
            }
            let kind = if local {
                ElementKind::CommonLocalVariable
            } else {
                ElementKind::CommonVariable
            };
            let mut elem = SourceElement::named(kind, name, self.span_of(node));
            elem.access = Some(access_id);
            let id = self.elements.push(elem);
            self.elements.add_child(builder.element, id);
        }
    }

    /// Assign occurrence indices among same-named siblings, per name
    /// bucket, in finalized child order.
    fn count_occurrences(&mut self, parent: ElementId) {
        let children = self.elements.get(parent).children.clone();
        let mut counts: HashMap<(NameBucket, String), u32> = HashMap::new();
        for child in children {
            let elem = self.elements.get_mut(child);
            let Some(name) = elem.name.clone() else {
                continue;
            };
            let count = counts.entry((elem.kind.bucket(), name)).or_insert(0);
            elem.occurrence = *count;
            *count += 1;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// TRUE/FALSE literal arguments (`character.only = TRUE`).
fn eval_boolean(node: &Node) -> Option<bool> {
    match &node.kind {
        NodeKind::NumConst { text } => match text.as_str() {
            "TRUE" => Some(true),
            "FALSE" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn fun_args_from_params(params: &[Param]) -> FunArgs {
    FunArgs {
        args: params
            .iter()
            .map(|p| FunArg {
                name: p.name.symbol_name().map(str::to_string),
                class_name: None,
            })
            .collect(),
    }
}

/// Cross formal parameters with a method signature: named signature
/// entries match by formal name, unnamed entries fill remaining formals
/// in order (`...` never takes a signature slot). A match without a class
/// name records the unknown-class placeholder.
fn create_method_arg_def(def_args: Option<&FunArgs>, sig: Option<&SigSpec>) -> Option<FunArgs> {
    match (def_args, sig) {
        (Some(def), Some(sig)) => {
            let mut out = Vec::with_capacity(def.args.len());
            let mut positional = 0usize;
            for formal in &def.args {
                if formal.name.as_deref() == Some("...") {
                    out.push(FunArg {
                        name: formal.name.clone(),
                        class_name: None,
                    });
                    continue;
                }
                let mut class = None;
                if let Some(name) = &formal.name {
                    if let Some(entry) = sig.args.iter().find(|a| a.name.as_deref() == Some(name)) {
                        class = Some(
                            entry
                                .class_name
                                .clone()
                                .unwrap_or_else(|| SIG_CLASS_UNKNOWN.into()),
                        );
                    }
                }
                if class.is_none() {
                    while positional < sig.args.len() {
                        let entry = &sig.args[positional];
                        positional += 1;
                        if entry.name.is_none() {
                            class = Some(
                                entry
                                    .class_name
                                    .clone()
                                    .unwrap_or_else(|| SIG_CLASS_UNKNOWN.into()),
                            );
                            break;
                        }
                    }
                }
                out.push(FunArg {
                    name: formal.name.clone(),
                    class_name: class,
                });
            }
            Some(FunArgs { args: out })
        }
        (Some(def), None) => Some(def.clone()),
        (None, Some(sig)) => Some(FunArgs {
            args: sig
                .args
                .iter()
                .map(|entry| FunArg {
                    name: entry.name.clone(),
                    class_name: entry
                        .class_name
                        .clone()
                        .or_else(|| Some(SIG_CLASS_UNKNOWN.into())),
                })
                .collect(),
        }),
        (None, None) => None,
    }
}

fn index_nodes(node: &Node, spans: &mut Vec<Span>, strings: &mut Vec<Option<String>>) {
    let i = node.id.index();
    if i < spans.len() {
        spans[i] = node.span;
        if let NodeKind::StringConst { value } = &node.kind {
            strings[i] = Some(value.clone());
        }
    }
    for_each_child(node, &mut |child| index_nodes(child, spans, strings));
}

fn for_each_child<'a>(node: &'a Node, f: &mut impl FnMut(&'a Node)) {
    match &node.kind {
        NodeKind::Source { exprs } | NodeKind::Block { exprs } => {
            for e in exprs {
                f(e);
            }
        }
        NodeKind::Other { children } => {
            for c in children {
                f(c);
            }
        }
        NodeKind::Assign { target, source, .. } => {
            f(target);
            f(source);
        }
        NodeKind::Call { target, args } => {
            f(target);
            for arg in args {
                if let Some(n) = &arg.name {
                    f(n);
                }
                if let Some(v) = &arg.value {
                    f(v);
                }
            }
        }
        NodeKind::FunDef { params, body } => {
            for p in params {
                f(&p.name);
                if let Some(d) = &p.default {
                    f(d);
                }
            }
            f(body);
        }
        NodeKind::NsGet { pkg, member, .. } => {
            f(pkg);
            f(member);
        }
        NodeKind::SubNamed { obj, field, .. } => {
            f(obj);
            f(field);
        }
        NodeKind::SubIndexed { obj, args, .. } => {
            f(obj);
            for arg in args {
                if let Some(n) = &arg.name {
                    f(n);
                }
                if let Some(v) = &arg.value {
                    f(v);
                }
            }
        }
        NodeKind::For { var, seq, body } => {
            f(var);
            f(seq);
            f(body);
        }
        NodeKind::While { cond, body } => {
            f(cond);
            f(body);
        }
        NodeKind::Repeat { body } => f(body),
        NodeKind::If { cond, then, orelse } => {
            f(cond);
            f(then);
            if let Some(o) = orelse {
                f(o);
            }
        }
        NodeKind::Help { topic } => {
            if let Some(t) = topic {
                f(t);
            }
        }
        NodeKind::Symbol { .. }
        | NodeKind::StringConst { .. }
        | NodeKind::NumConst { .. }
        | NodeKind::NullConst => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    include!("analyzer_tests.rs");

    #[test]
    fn test_create_method_arg_def_named_signature() {
        let def = FunArgs {
            args: vec![
                FunArg {
                    name: Some("shape".into()),
                    class_name: None,
                },
                FunArg {
                    name: Some("scale".into()),
                    class_name: None,
                },
            ],
        };
        let sig = SigSpec {
            args: vec![SigArg {
                name: Some("shape".into()),
                class_name: Some("Square".into()),
            }],
        };
        let out = create_method_arg_def(Some(&def), Some(&sig)).unwrap();
        assert_eq!(out.args[0].class_name.as_deref(), Some("Square"));
        assert_eq!(out.args[1].class_name, None);
    }

    #[test]
    fn test_create_method_arg_def_positional_signature() {
        let def = FunArgs {
            args: vec![
                FunArg {
                    name: Some("x".into()),
                    class_name: None,
                },
                FunArg {
                    name: Some("y".into()),
                    class_name: None,
                },
            ],
        };
        let sig = SigSpec {
            args: vec![
                SigArg {
                    name: None,
                    class_name: Some("numeric".into()),
                },
                SigArg {
                    name: None,
                    class_name: Some("character".into()),
                },
            ],
        };
        let out = create_method_arg_def(Some(&def), Some(&sig)).unwrap();
        assert_eq!(out.args[0].class_name.as_deref(), Some("numeric"));
        assert_eq!(out.args[1].class_name.as_deref(), Some("character"));
    }

    #[test]
    fn test_create_method_arg_def_name_match_without_class() {
        let def = FunArgs {
            args: vec![FunArg {
                name: Some("x".into()),
                class_name: None,
            }],
        };
        let sig = SigSpec {
            args: vec![SigArg {
                name: Some("x".into()),
                class_name: None,
            }],
        };
        let out = create_method_arg_def(Some(&def), Some(&sig)).unwrap();
        assert_eq!(out.args[0].class_name.as_deref(), Some(SIG_CLASS_UNKNOWN));
    }

    #[test]
    fn test_ellipsis_takes_no_signature_slot() {
        let def = FunArgs {
            args: vec![
                FunArg {
                    name: Some("...".into()),
                    class_name: None,
                },
                FunArg {
                    name: Some("x".into()),
                    class_name: None,
                },
            ],
        };
        let sig = SigSpec {
            args: vec![SigArg {
                name: None,
                class_name: Some("numeric".into()),
            }],
        };
        let out = create_method_arg_def(Some(&def), Some(&sig)).unwrap();
        assert_eq!(out.args[0].class_name, None);
        assert_eq!(out.args[1].class_name.as_deref(), Some("numeric"));
    }

    #[test]
    fn test_eval_boolean_literals() {
        let t = Node::new(
            NodeId(0),
            Span::new(0, 4),
            NodeKind::NumConst {
                text: "TRUE".into(),
            },
        );
        let f = Node::new(
            NodeId(1),
            Span::new(0, 5),
            NodeKind::NumConst {
                text: "FALSE".into(),
            },
        );
        let n = Node::new(
            NodeId(2),
            Span::new(0, 1),
            NodeKind::NumConst { text: "1".into() },
        );
        assert_eq!(eval_boolean(&t), Some(true));
        assert_eq!(eval_boolean(&f), Some(false));
        assert_eq!(eval_boolean(&n), None);
    }
}
