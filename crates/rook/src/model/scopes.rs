//
// scopes.rs
//
// Envir: named binding scopes (project top level, functions, classes,
// packages) with three binding buckets and the deferred-resolution queues.
// Phase 2 of name resolution (`resolve_deferred`) lives here as a free
// function over the run-wide scope map so it can be tested in isolation.
//

use crate::model::access::{AccessId, Accesses};
use crate::model::elements::ElementId;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Scope categories. The project scope doubles as the global scope of a
/// unit: top-level analysis treats the unit's own top level as the end of
/// the search path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScopeType {
    /// Unit top level; acts as the global/search-path root for the run.
    Project,
    /// Per-unit bucket for package-import occurrences.
    PackageUse,
    /// One imported package on the search path.
    Package,
    Function,
    Class,
}

impl ScopeType {
    fn tag(self) -> &'static str {
        match self {
            ScopeType::Project => "proj",
            ScopeType::PackageUse => "pkgUse",
            ScopeType::Package => "pkg",
            ScopeType::Function => "fun",
            ScopeType::Class => "cls",
        }
    }
}

/// Stable scope identifier: `tag:name` for named scopes, `tag:#N` with a
/// run-unique counter for anonymous ones. Two same-named scopes in one run
/// collide deliberately (the later registration wins, see the model docs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn named(scope_type: ScopeType, name: &str) -> Self {
        Self(format!("{}:{}", scope_type.tag(), name))
    }

    pub fn anonymous(scope_type: ScopeType, counter: u32) -> Self {
        Self(format!("{}:#{}", scope_type.tag(), counter))
    }

    pub fn package(name: &str) -> Self {
        Self::named(ScopeType::Package, name)
    }

    /// The per-unit package-use scope; exactly one exists per run.
    pub fn package_use() -> Self {
        Self(String::from("pkgUse:unit"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deferred/run-local queue entry.
#[derive(Debug, Clone, PartialEq)]
struct PendingEntry {
    name: Option<String>,
    access: AccessId,
}

/// One binding scope.
#[derive(Debug, Clone)]
pub struct Envir {
    pub id: ScopeId,
    pub scope_type: ScopeType,
    /// Parent scopes in lookup order. The global scope's parents are the
    /// imported-package scopes, spliced in at finalization.
    pub parents: Vec<ScopeId>,
    common: IndexMap<Option<String>, Vec<AccessId>>,
    classes: IndexMap<Option<String>, Vec<AccessId>>,
    imports: IndexMap<Option<String>, Vec<AccessId>>,
    deferred: Vec<PendingEntry>,
    run_resolve: Vec<PendingEntry>,
    element: Option<ElementId>,
}

impl Envir {
    pub fn new(scope_type: ScopeType, id: ScopeId, parents: Vec<ScopeId>) -> Self {
        Self {
            id,
            scope_type,
            parents,
            common: IndexMap::new(),
            classes: IndexMap::new(),
            imports: IndexMap::new(),
            deferred: Vec::new(),
            run_resolve: Vec::new(),
            element: None,
        }
    }

    /// Add an access to the `common` bucket, claiming it for this scope.
    /// An access already claimed elsewhere is left untouched.
    pub fn add(&mut self, name: Option<String>, id: AccessId, accesses: &mut Accesses) {
        if !accesses.claim(id, &self.id) {
            return;
        }
        self.common.entry(name).or_default().push(id);
    }

    /// Add an access to the `classes` bucket (S4 class names).
    pub fn add_class(&mut self, name: Option<String>, id: AccessId, accesses: &mut Accesses) {
        if !accesses.claim(id, &self.id) {
            return;
        }
        self.classes.entry(name).or_default().push(id);
    }

    /// Add an access to the `imports` bucket (package imports).
    pub fn add_import(&mut self, name: Option<String>, id: AccessId, accesses: &mut Accesses) {
        if !accesses.claim(id, &self.id) {
            return;
        }
        self.imports.entry(name).or_default().push(id);
    }

    /// Queue a binding whose owning scope is not yet known (`<<-`, plain
    /// symbol reads, `get`/`exists` lookups). Settled by `resolve_deferred`.
    pub fn add_late_resolve(&mut self, name: Option<String>, access: AccessId) {
        self.deferred.push(PendingEntry { name, access });
    }

    /// Queue a binding that belongs to this scope but is recorded only when
    /// deferred resolution runs (S4 slots, generic definitions).
    pub fn add_run_resolve(&mut self, name: Option<String>, access: AccessId) {
        self.run_resolve.push(PendingEntry { name, access });
    }

    /// Link the scope to the Source Element it represents. Last write wins;
    /// a relink is possible when two same-named scopes collide on one id.
    pub fn set_model_element(&mut self, element: ElementId) {
        if let Some(old) = self.element.replace(element) {
            if old != element {
                log::trace!(
                    "scope {} element relinked ({:?} -> {:?})",
                    self.id,
                    old,
                    element
                );
            }
        }
    }

    pub fn model_element(&self) -> Option<ElementId> {
        self.element
    }

    pub fn has_common(&self, name: &Option<String>) -> bool {
        self.common.get(name).is_some_and(|b| !b.is_empty())
    }

    /// Accesses bound under `name` in the `common` bucket, oldest first.
    /// The last entry is the current binding.
    pub fn common_accesses(&self, name: &str) -> &[AccessId] {
        self.common
            .get(&Some(name.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn class_accesses(&self, name: &str) -> &[AccessId] {
        self.classes
            .get(&Some(name.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn import_accesses(&self, name: &str) -> &[AccessId] {
        self.imports
            .get(&Some(name.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn common_names(&self) -> impl Iterator<Item = Option<&str>> {
        self.common.keys().map(|k| k.as_deref())
    }

    pub fn import_names(&self) -> impl Iterator<Item = Option<&str>> {
        self.imports.keys().map(|k| k.as_deref())
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn binding_count(&self) -> usize {
        self.common.values().map(Vec::len).sum::<usize>()
            + self.classes.values().map(Vec::len).sum::<usize>()
            + self.imports.values().map(Vec::len).sum::<usize>()
    }
}

/// Run-wide scope table, insertion-ordered so resolution and model dumps
/// are deterministic.
pub type ScopeMap = IndexMap<ScopeId, Envir>;

/// Settle the deferred and run-local queues of one scope against the
/// finalized parent graph.
///
/// Run-local entries bind into the scope itself. Each deferred entry walks
/// the parent chain breadth-first from the owning scope; the first scope
/// (the owner included) already holding a `common` binding of the name
/// claims the access. Entries that find no binding home into the global
/// scope when `include_global` is set (the search path bottoms out there),
/// and stay in the owning scope otherwise (dependency scopes).
///
/// Already-claimed accesses are skipped, so running this twice yields the
/// same binding set as running it once.
pub fn resolve_deferred(
    scopes: &mut ScopeMap,
    accesses: &mut Accesses,
    scope_id: &ScopeId,
    global_id: &ScopeId,
    include_global: bool,
) {
    let (run_entries, deferred_entries) = match scopes.get_mut(scope_id) {
        Some(envir) => (
            std::mem::take(&mut envir.run_resolve),
            std::mem::take(&mut envir.deferred),
        ),
        None => return,
    };

    if let Some(envir) = scopes.get_mut(scope_id) {
        for entry in run_entries {
            envir.add(entry.name, entry.access, accesses);
        }
    }

    for entry in deferred_entries {
        if accesses.is_claimed(entry.access) {
            continue;
        }
        let home = find_binding_scope(scopes, scope_id, &entry.name);
        let target = match &home {
            Some(id) => id,
            None if include_global => global_id,
            None => scope_id,
        };
        if let Some(envir) = scopes.get_mut(target) {
            envir.add(entry.name, entry.access, accesses);
        }
    }
}

/// Breadth-first walk over the parent graph looking for the first scope
/// with a `common` binding of `name`. The walk starts at `start` itself.
fn find_binding_scope(
    scopes: &ScopeMap,
    start: &ScopeId,
    name: &Option<String>,
) -> Option<ScopeId> {
    let mut queue: VecDeque<ScopeId> = VecDeque::new();
    let mut seen: HashSet<ScopeId> = HashSet::new();
    queue.push_back(start.clone());
    seen.insert(start.clone());

    while let Some(id) = queue.pop_front() {
        let Some(envir) = scopes.get(&id) else {
            continue;
        };
        if envir.has_common(name) {
            return Some(id);
        }
        for parent in &envir.parents {
            if seen.insert(parent.clone()) {
                queue.push_back(parent.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeId;
    use crate::model::access::{AccessFlags, ElementAccess};

    fn new_access(accesses: &mut Accesses, name: &str) -> AccessId {
        let mut access = ElementAccess::new(AccessFlags::READ, NodeId(0));
        access.name = Some(name.to_string());
        accesses.push(access)
    }

    /// global <- f chain with an optional binding of `name` in global.
    fn chain(bind_global: Option<&str>, accesses: &mut Accesses) -> (ScopeMap, ScopeId, ScopeId) {
        let global_id = ScopeId::named(ScopeType::Project, "unit");
        let fun_id = ScopeId::anonymous(ScopeType::Function, 1);
        let mut global = Envir::new(ScopeType::Project, global_id.clone(), vec![]);
        if let Some(name) = bind_global {
            let id = new_access(accesses, name);
            global.add(Some(name.to_string()), id, accesses);
        }
        let fun = Envir::new(
            ScopeType::Function,
            fun_id.clone(),
            vec![global_id.clone()],
        );
        let mut scopes = ScopeMap::new();
        scopes.insert(global_id.clone(), global);
        scopes.insert(fun_id.clone(), fun);
        (scopes, global_id, fun_id)
    }

    #[test]
    fn test_deferred_binds_to_defining_ancestor() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(Some("x"), &mut accesses);
        let read = new_access(&mut accesses, "x");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_late_resolve(Some("x".into()), read);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);

        assert_eq!(accesses.get(read).scope, Some(global_id.clone()));
        assert_eq!(scopes[&global_id].common_accesses("x").len(), 2);
        assert!(scopes[&fun_id].common_accesses("x").is_empty());
    }

    #[test]
    fn test_deferred_prefers_own_binding_over_ancestor() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(Some("x"), &mut accesses);
        let local_def = new_access(&mut accesses, "x");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add(Some("x".into()), local_def, &mut accesses);
        let read = new_access(&mut accesses, "x");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_late_resolve(Some("x".into()), read);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);

        assert_eq!(accesses.get(read).scope, Some(fun_id.clone()));
    }

    #[test]
    fn test_unresolved_homes_into_global() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(None, &mut accesses);
        let write = new_access(&mut accesses, "x");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_late_resolve(Some("x".into()), write);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);

        assert_eq!(accesses.get(write).scope, Some(global_id.clone()));
        assert_eq!(scopes[&global_id].common_accesses("x").len(), 1);
    }

    #[test]
    fn test_unresolved_stays_local_without_global() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(None, &mut accesses);
        let read = new_access(&mut accesses, "y");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_late_resolve(Some("y".into()), read);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, false);

        assert_eq!(accesses.get(read).scope, Some(fun_id.clone()));
        assert_eq!(scopes[&fun_id].common_accesses("y").len(), 1);
    }

    #[test]
    fn test_run_resolve_binds_into_own_scope() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(Some("slotname"), &mut accesses);
        let slot = new_access(&mut accesses, "slotname");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_run_resolve(Some("slotname".into()), slot);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);

        // Run-local entries never walk the parent chain
        assert_eq!(accesses.get(slot).scope, Some(fun_id.clone()));
    }

    #[test]
    fn test_claimed_access_is_skipped() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(Some("x"), &mut accesses);
        let read = new_access(&mut accesses, "x");
        // Claim before resolution runs
        accesses.claim(read, &fun_id);
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_late_resolve(Some("x".into()), read);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);

        assert_eq!(accesses.get(read).scope, Some(fun_id.clone()));
        // Nothing was re-homed into global
        assert_eq!(scopes[&global_id].common_accesses("x").len(), 1);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut accesses = Accesses::new();
        let (mut scopes, global_id, fun_id) = chain(Some("x"), &mut accesses);
        let read = new_access(&mut accesses, "x");
        scopes
            .get_mut(&fun_id)
            .unwrap()
            .add_late_resolve(Some("x".into()), read);

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);
        let bindings_after_first: Vec<usize> =
            scopes.values().map(Envir::binding_count).collect();

        resolve_deferred(&mut scopes, &mut accesses, &fun_id, &global_id, true);
        let bindings_after_second: Vec<usize> =
            scopes.values().map(Envir::binding_count).collect();

        assert_eq!(bindings_after_first, bindings_after_second);
    }

    #[test]
    fn test_parent_cycles_do_not_hang() {
        let mut accesses = Accesses::new();
        let a_id = ScopeId::anonymous(ScopeType::Function, 1);
        let b_id = ScopeId::anonymous(ScopeType::Function, 2);
        let a = Envir::new(ScopeType::Function, a_id.clone(), vec![b_id.clone()]);
        let b = Envir::new(ScopeType::Function, b_id.clone(), vec![a_id.clone()]);
        let mut scopes = ScopeMap::new();
        scopes.insert(a_id.clone(), a);
        scopes.insert(b_id.clone(), b);

        let read = new_access(&mut accesses, "x");
        scopes
            .get_mut(&a_id)
            .unwrap()
            .add_late_resolve(Some("x".into()), read);

        resolve_deferred(&mut scopes, &mut accesses, &a_id, &a_id, true);
        assert_eq!(accesses.get(read).scope, Some(a_id));
    }

    #[test]
    fn test_scope_id_formats() {
        assert_eq!(
            ScopeId::named(ScopeType::Project, "unit0").as_str(),
            "proj:unit0"
        );
        assert_eq!(
            ScopeId::anonymous(ScopeType::Function, 3).as_str(),
            "fun:#3"
        );
        assert_eq!(ScopeId::package("stats").as_str(), "pkg:stats");
        assert_eq!(ScopeId::package_use().as_str(), "pkgUse:unit");
    }

    #[test]
    fn test_set_model_element_last_write_wins() {
        let mut envir = Envir::new(
            ScopeType::Class,
            ScopeId::named(ScopeType::Class, "Foo"),
            vec![],
        );
        envir.set_model_element(ElementId(1));
        envir.set_model_element(ElementId(2));
        assert_eq!(envir.model_element(), Some(ElementId(2)));
    }
}

// ============================================================================
// Property Tests for Deferred Resolution
// ============================================================================
