//
// analyzer_tests.rs
//
// Included by analyzer.rs inside its `tests` module. End-to-end model
// building: R source text in, scopes and element tree out.
//

#[cfg(test)]
mod model_build_tests {
    use super::super::*;

    fn analyze(code: &str) -> RSourceModel {
        let ast = crate::lower::parse_source(code);
        SourceAnalyzer::new(AnalyzerContext::default())
            .update("test.R", ast)
            .expect("analysis not cancelled")
    }

    fn fun_scope(model: &RSourceModel, counter: u32) -> &Envir {
        model
            .scope(&ScopeId::anonymous(ScopeType::Function, counter))
            .expect("function scope")
    }

    #[test]
    fn test_local_assignment_binds_in_function_scope() {
        let model = analyze("f <- function() {\n  x <- 1\n  x\n}\n");

        let top = model.top_level();
        assert_eq!(top.common_accesses("f").len(), 1);
        assert!(top.common_accesses("x").is_empty());

        // both the write and the read of x settle in the function scope
        let fun = fun_scope(&model, 1);
        assert_eq!(fun.common_accesses("x").len(), 2);

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, ElementKind::CommonFunction);
        assert_eq!(children[0].name.as_deref(), Some("f"));

        let f_id = model.root().children[0];
        let f_children: Vec<_> = model.children_of(f_id).collect();
        assert_eq!(f_children.len(), 1);
        assert_eq!(f_children[0].kind, ElementKind::CommonLocalVariable);
        assert_eq!(f_children[0].name.as_deref(), Some("x"));
    }

    #[test]
    fn test_superassignment_settles_in_global_scope() {
        let model = analyze("f <- function() {\n  x <<- 1\n}\n");

        let top = model.top_level();
        let ids = top.common_accesses("x");
        assert_eq!(ids.len(), 1);
        assert!(model.accesses.get(ids[0]).flags.contains(AccessFlags::WRITE));

        let fun = fun_scope(&model, 1);
        assert!(fun.common_accesses("x").is_empty());

        // the access did not settle in the function's own scope, so the
        // function element has no variable child for it
        let f_id = model.root().children[0];
        assert_eq!(model.children_of(f_id).count(), 0);
    }

    #[test]
    fn test_set_class_builds_class_element_with_slots() {
        let model = analyze("setClass(\"Foo\", representation(bar = \"numeric\"))\n");

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, ElementKind::S4Class);
        assert_eq!(children[0].name.as_deref(), Some("Foo"));

        let class_id = model.root().children[0];
        let slots: Vec<_> = model.children_of(class_id).collect();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].kind, ElementKind::S4Slot);
        assert_eq!(slots[0].name.as_deref(), Some("bar"));
        match &slots[0].detail {
            ElementDetail::Slot { type_name, initialized } => {
                assert_eq!(type_name.as_deref(), Some("numeric"));
                assert!(!initialized);
            }
            other => panic!("expected Slot detail, got {:?}", other),
        }

        let class_scope = model
            .scope(&ScopeId::named(ScopeType::Class, "Foo"))
            .expect("class scope");
        assert_eq!(class_scope.common_accesses("bar").len(), 1);

        let top = model.top_level();
        assert_eq!(top.class_accesses("Foo").len(), 1);
        assert_eq!(top.class_accesses("numeric").len(), 1);
    }

    #[test]
    fn test_prototype_marks_slots_initialized() {
        let model = analyze(
            "setClass(\"Cfg\", representation(n = \"numeric\", s = \"character\"),\n  prototype(n = 1))\n",
        );
        let class_id = model.root().children[0];
        let slots: Vec<_> = model.children_of(class_id).collect();
        assert_eq!(slots.len(), 2);
        for slot in slots {
            let ElementDetail::Slot { initialized, .. } = &slot.detail else {
                panic!("expected Slot detail");
            };
            match slot.name.as_deref() {
                Some("n") => assert!(initialized),
                Some("s") => assert!(!initialized),
                other => panic!("unexpected slot {:?}", other),
            }
        }
    }

    #[test]
    fn test_sibling_duplicates_get_occurrence_indices() {
        let model = analyze("f <- function() 1\nf <- function() 2\n");

        let top = model.top_level();
        assert_eq!(top.common_accesses("f").len(), 2);

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name.as_deref(), Some("f"));
        assert_eq!(children[1].name.as_deref(), Some("f"));
        assert_eq!(children[0].occurrence, 0);
        assert_eq!(children[1].occurrence, 1);
        assert!(children[0].span.start < children[1].span.start);
    }

    #[test]
    fn test_empty_unit_builds_minimal_model() {
        let model = analyze("");
        assert_eq!(model.root().kind, ElementKind::SourceUnit);
        assert_eq!(model.root().name.as_deref(), Some("test.R"));
        assert!(model.root().children.is_empty());

        assert_eq!(model.scopes.len(), 2);
        assert!(model.scopes.contains_key(&model.top_scope));
        assert!(model.scopes.contains_key(&ScopeId::package_use()));
        assert_eq!(model.top_level().binding_count(), 0);
    }

    #[test]
    fn test_library_imports_package() {
        let model = analyze("library(stats)\n");

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, ElementKind::PackageImport);
        assert_eq!(children[0].name.as_deref(), Some("stats"));

        let pkg_use = model.scope(&ScopeId::package_use()).expect("pkgUse scope");
        assert_eq!(pkg_use.import_accesses("stats").len(), 1);

        assert!(model.scopes.contains_key(&ScopeId::package("stats")));
        // the imported package is consulted before other parents
        assert_eq!(
            model.top_level().parents.first(),
            Some(&ScopeId::package("stats"))
        );
        // the `library` callee itself homes into the global scope
        assert_eq!(model.top_level().common_accesses("library").len(), 1);
    }

    #[test]
    fn test_character_only_blocks_symbol_import() {
        let model = analyze("pkg <- \"data.table\"\nlibrary(pkg, character.only = TRUE)\n");
        let pkg_use = model.scope(&ScopeId::package_use()).expect("pkgUse scope");
        assert_eq!(pkg_use.import_names().count(), 0);
        // no dependency scope was created
        assert_eq!(model.scopes.len(), 2);
        // the symbol is an ordinary read of the variable
        assert_eq!(model.top_level().common_accesses("pkg").len(), 2);
    }

    #[test]
    fn test_generic_and_method_registration() {
        let model = analyze(
            "setGeneric(\"area\", function(shape) standardGeneric(\"area\"))\nsetMethod(\"area\", signature(\"Square\"), function(shape) shape@side * shape@side)\n",
        );

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].kind, ElementKind::GenericFunction);
        assert_eq!(children[1].kind, ElementKind::S4Method);
        assert_eq!(children[0].name.as_deref(), Some("area"));
        assert_eq!(children[1].name.as_deref(), Some("area"));
        assert_eq!(children[0].occurrence, 0);
        assert_eq!(children[1].occurrence, 1);

        let generic_args = children[0].fun_args().expect("generic args");
        assert_eq!(generic_args.args.len(), 1);
        assert_eq!(generic_args.args[0].name.as_deref(), Some("shape"));
        assert_eq!(generic_args.args[0].class_name, None);

        // the method's formal picks up the signature class positionally
        let method_args = children[1].fun_args().expect("method args");
        assert_eq!(method_args.args.len(), 1);
        assert_eq!(method_args.args[0].name.as_deref(), Some("shape"));
        assert_eq!(method_args.args[0].class_name.as_deref(), Some("Square"));

        assert!(model
            .scopes
            .contains_key(&ScopeId::named(ScopeType::Function, "area")));
        let top = model.top_level();
        assert_eq!(top.common_accesses("area").len(), 2);
        assert_eq!(top.class_accesses("Square").len(), 1);
    }

    #[test]
    fn test_assign_call_creates_variable() {
        let model = analyze("assign(\"x\", 1)\nf <- function() assign(\"y\", 2, envir = .GlobalEnv)\n");

        let top = model.top_level();
        assert_eq!(top.common_accesses("x").len(), 1);
        assert_eq!(top.common_accesses("y").len(), 1);

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].kind, ElementKind::CommonVariable);
        assert_eq!(children[0].name.as_deref(), Some("x"));
        assert_eq!(children[1].kind, ElementKind::CommonFunction);

        // y settled in the global scope, not the function's, so no child
        let f_id = model.root().children[1];
        assert_eq!(model.children_of(f_id).count(), 0);
    }

    #[test]
    fn test_scope_arguments_select_target() {
        let model = analyze("f <- function() {\n  get(\"cfg\", pos = 1)\n  rm(\"tmp\", envir = .GlobalEnv)\n}\n");

        let top = model.top_level();
        let cfg = top.common_accesses("cfg");
        assert_eq!(cfg.len(), 1);
        assert!(model.accesses.get(cfg[0]).flags.contains(AccessFlags::READ));
        let tmp = top.common_accesses("tmp");
        assert_eq!(tmp.len(), 1);
        assert!(model.accesses.get(tmp[0]).flags.contains(AccessFlags::DELETE));

        let fun = fun_scope(&model, 1);
        assert!(fun.common_accesses("cfg").is_empty());
        assert!(fun.common_accesses("tmp").is_empty());
    }

    #[test]
    fn test_namespace_access_targets_package_scope() {
        let model = analyze("stats::median(x)\n");

        let pkg_use = model.scope(&ScopeId::package_use()).expect("pkgUse scope");
        assert_eq!(pkg_use.import_accesses("stats").len(), 1);

        let pkg = model.scope(&ScopeId::package("stats")).expect("pkg scope");
        let median = pkg.common_accesses("median");
        assert_eq!(median.len(), 1);
        assert!(model
            .accesses
            .get(median[0])
            .flags
            .contains(AccessFlags::FUNCTION));

        assert_eq!(
            model.top_level().parents.first(),
            Some(&ScopeId::package("stats"))
        );
        assert_eq!(model.top_level().common_accesses("x").len(), 1);
    }

    #[test]
    fn test_for_loop_variable_is_local() {
        let model = analyze("for (i in 1:10) print(i)\n");
        // the loop write and the read inside the body both bind at top
        assert_eq!(model.top_level().common_accesses("i").len(), 2);
        assert!(model.root().children.is_empty());
    }

    #[test]
    fn test_anonymous_function_is_not_an_outline_element() {
        let model = analyze("function(x) x\n");
        assert!(model.root().children.is_empty());
        assert_eq!(model.scopes.len(), 3);
        let fun = fun_scope(&model, 1);
        assert_eq!(fun.common_accesses("x").len(), 2);
    }

    #[test]
    fn test_replacement_heuristic_marks_first_argument() {
        let model = analyze("x <- foo(y)\n");

        let top = model.top_level();
        let y = top.common_accesses("y");
        assert_eq!(y.len(), 1);
        assert!(model.accesses.get(y[0]).flags.contains(AccessFlags::WRITE));

        // only x becomes an outline element
        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name.as_deref(), Some("x"));
        assert_eq!(children[0].kind, ElementKind::CommonVariable);
    }

    #[test]
    fn test_slot_call_in_assignment_writes_through() {
        let model = analyze("slot(obj, \"side\") <- 5\n");

        let top = model.top_level();
        let ids = top.common_accesses("obj");
        assert_eq!(ids.len(), 1);
        let access = model.accesses.get(ids[0]);
        assert!(access.flags.contains(AccessFlags::WRITE));
        assert!(access.flags.contains(AccessFlags::SUB));
        assert_eq!(access.path.len(), 1);
        assert!(matches!(access.path[0].kind, SegmentKind::Slot));
        assert_eq!(access.path[0].name.as_deref(), Some("side"));
    }

    #[test]
    fn test_part_assignment_creates_no_element() {
        let model = analyze("x$settings <- 5\n");
        let top = model.top_level();
        let ids = top.common_accesses("x");
        assert_eq!(ids.len(), 1);
        assert!(model.accesses.get(ids[0]).flags.contains(AccessFlags::SUB));
        assert!(model.root().children.is_empty());
    }

    #[test]
    fn test_set_is_records_extension() {
        let model = analyze("setIs(\"Square\", \"Shape\")\n");

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, ElementKind::S4ClassExtension);
        assert_eq!(children[0].name.as_deref(), Some("Square"));
        match &children[0].detail {
            ElementDetail::Class { superclasses } => {
                assert_eq!(superclasses, &vec!["Shape".to_string()]);
            }
            other => panic!("expected Class detail, got {:?}", other),
        }

        let top = model.top_level();
        assert_eq!(top.class_accesses("Square").len(), 1);
        assert_eq!(top.class_accesses("Shape").len(), 1);
        assert!(model
            .scopes
            .contains_key(&ScopeId::named(ScopeType::Class, "Square")));
    }

    #[test]
    fn test_set_as_records_both_classes() {
        let model = analyze("setAs(\"Circle\", \"Ellipse\", function(from) from)\n");
        let top = model.top_level();
        let from = top.class_accesses("Circle");
        let to = top.class_accesses("Ellipse");
        assert_eq!(from.len(), 1);
        assert_eq!(to.len(), 1);
        assert!(model.accesses.get(from[0]).flags.contains(AccessFlags::WRITE));
        assert!(model.accesses.get(to[0]).flags.contains(AccessFlags::READ));
    }

    #[test]
    fn test_redefined_class_reuses_scope() {
        let model = analyze(
            "setClass(\"A\", representation(x = \"numeric\"))\nsetClass(\"A\", representation(y = \"numeric\"))\n",
        );

        // one shared scope collects both runs' slots
        let class_scope = model
            .scope(&ScopeId::named(ScopeType::Class, "A"))
            .expect("class scope");
        assert_eq!(class_scope.common_accesses("x").len(), 1);
        assert_eq!(class_scope.common_accesses("y").len(), 1);

        let children: Vec<_> = model.children_of(model.root_element).collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].occurrence, 0);
        assert_eq!(children[1].occurrence, 1);

        // the scope's element link follows the later definition
        assert_eq!(class_scope.model_element(), Some(model.root().children[1]));
    }

    #[test]
    fn test_assigned_generic_yields_both_elements() {
        let model =
            analyze("g <- setGeneric(\"area\", function(shape) standardGeneric(\"area\"))\n");

        let mut names: Vec<(ElementKind, Option<String>)> = model
            .children_of(model.root_element)
            .map(|e| (e.kind, e.name.clone()))
            .collect();
        names.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            names,
            vec![
                (ElementKind::GenericFunction, Some("area".to_string())),
                (ElementKind::CommonVariable, Some("g".to_string())),
            ]
        );
    }

    #[test]
    fn test_node_attachments() {
        let code = "f <- function() NULL\n";
        let ast = crate::lower::parse_source(code);
        let root_id = ast.root.id;
        let (assign_id, fundef_id) = match &ast.root.kind {
            NodeKind::Source { exprs } => match &exprs[0].kind {
                NodeKind::Assign { source, .. } => (exprs[0].id, source.id),
                other => panic!("expected Assign, got {:?}", other),
            },
            other => panic!("expected Source, got {:?}", other),
        };
        let model = SourceAnalyzer::new(AnalyzerContext::default())
            .update("test.R", ast)
            .expect("analysis not cancelled");

        assert_eq!(
            model.attachments.scope_of(root_id),
            Some(&model.top_scope)
        );
        assert_eq!(
            model.attachments.scope_of(fundef_id),
            Some(&ScopeId::anonymous(ScopeType::Function, 1))
        );
        let f_id = model.root().children[0];
        assert_eq!(model.attachments.element_of(assign_id), Some(f_id));
    }

    #[test]
    fn test_cancelled_run_yields_no_model() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = AnalyzerContext {
            cancel: Some(token),
            ..Default::default()
        };
        let ast = crate::lower::parse_source("x <- 1\n");
        assert!(SourceAnalyzer::new(ctx).update("test.R", ast).is_none());
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let code = "library(one)\nf <- function(a) {\n  b <- a\n  b\n}\nsetClass(\"K\", representation(s = \"numeric\"))\n";
        let a = analyze(code);
        let b = analyze(code);

        let a_keys: Vec<_> = a.scopes.keys().cloned().collect();
        let b_keys: Vec<_> = b.scopes.keys().cloned().collect();
        assert_eq!(a_keys, b_keys);
        assert_eq!(a.elements.len(), b.elements.len());

        let a_children: Vec<_> = a
            .children_of(a.root_element)
            .map(|e| (e.kind, e.name.clone(), e.occurrence))
            .collect();
        let b_children: Vec<_> = b
            .children_of(b.root_element)
            .map(|e| (e.kind, e.name.clone(), e.occurrence))
            .collect();
        assert_eq!(a_children, b_children);
    }
}

#[cfg(test)]
mod model_property_tests {
    use super::super::*;
    use proptest::prelude::*;

    fn analyze(code: &str) -> RSourceModel {
        let ast = crate::lower::parse_source(code);
        SourceAnalyzer::new(AnalyzerContext::default())
            .update("test.R", ast)
            .expect("analysis not cancelled")
    }

    proptest! {
        /// Same input, same model shape, independent of run order or
        /// hashing.
        #[test]
        fn prop_analysis_is_deterministic(names in proptest::collection::vec("[a-z]{2,6}", 1..6)) {
            let code: String = names
                .iter()
                .map(|n| format!("{n} <- 1\n{n}\n"))
                .collect();
            let a = analyze(&code);
            let b = analyze(&code);
            let a_keys: Vec<_> = a.scopes.keys().cloned().collect();
            let b_keys: Vec<_> = b.scopes.keys().cloned().collect();
            prop_assert_eq!(a_keys, b_keys);
            prop_assert_eq!(a.elements.len(), b.elements.len());
            let a_names: Vec<_> = a.children_of(a.root_element).map(|e| e.name.clone()).collect();
            let b_names: Vec<_> = b.children_of(b.root_element).map(|e| e.name.clone()).collect();
            prop_assert_eq!(a_names, b_names);
        }

        /// Re-running deferred resolution on a finished model's scopes
        /// changes nothing: every queue is already drained.
        #[test]
        fn prop_finished_models_have_no_pending_deferred(n in 1usize..8) {
            let code: String = (0..n).map(|i| format!("v{i} <- {i}\nf{i} <- function() v{i}\n")).collect();
            let model = analyze(&code);
            for envir in model.scopes.values() {
                prop_assert_eq!(envir.deferred_len(), 0);
            }
        }
    }
}
