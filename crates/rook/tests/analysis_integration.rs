//! End-to-end checks of the public analysis API: R source text in, model
//! out, exercised through the same entry points the CLI and embedders use.

use tokio_util::sync::CancellationToken;

use rook::lower;
use rook::model::{
    AnalyzerContext, ElementKind, ModelRegistry, RSourceModel, ScopeType, SourceAnalyzer,
};

fn analyze(unit_id: &str, code: &str) -> RSourceModel {
    let ast = lower::parse_source(code);
    SourceAnalyzer::new(AnalyzerContext::default())
        .update(unit_id, ast)
        .expect("analysis not cancelled")
}

#[test]
fn analyzes_a_realistic_script_end_to_end() {
    let code = r#"
library(methods)
library(stats)

default_span <- 0.75

smooth_series <- function(x, span = default_span) {
  fitted <- stats::lowess(x, f = span)
  fitted$y
}

setClass("Series", representation(label = "character", values = "numeric"))

setGeneric("rescale", function(object, ...) standardGeneric("rescale"))

setMethod("rescale", signature(object = "Series"), function(object, ...) {
  object@values <- object@values / max(object@values)
  object
})
"#;
    let model = analyze("file:///demo/series.R", code);

    let kinds: Vec<ElementKind> = model
        .children_of(model.root_element)
        .map(|element| element.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ElementKind::PackageImport,
            ElementKind::PackageImport,
            ElementKind::CommonVariable,
            ElementKind::CommonFunction,
            ElementKind::S4Class,
            ElementKind::GenericFunction,
            ElementKind::S4Method,
        ]
    );

    let class = model
        .children_of(model.root_element)
        .find(|element| element.kind == ElementKind::S4Class)
        .expect("class element");
    assert_eq!(class.display_name(), "Series");
    let slots: Vec<&str> = class
        .children
        .iter()
        .map(|id| model.element(*id).display_name())
        .collect();
    assert_eq!(slots, vec!["label", "values"]);

    let top = model.top_level();
    assert!(top.has_common(&Some("default_span".to_string())));
    assert!(top.has_common(&Some("smooth_series".to_string())));
    let imports: Vec<&str> = top.import_names().flatten().collect();
    assert_eq!(imports, vec!["methods", "stats"]);
    // Imported packages are spliced into the global lookup chain.
    assert!(top
        .parents
        .iter()
        .any(|parent| parent.as_str().contains("stats")));
}

#[test]
fn counts_occurrences_of_repeated_definitions() {
    let code = "value <- 1\nvalue <- 2\nvalue <- 3\n";
    let model = analyze("file:///demo/occurrences.R", code);

    let occurrences: Vec<u32> = model
        .children_of(model.root_element)
        .filter(|element| element.display_name() == "value")
        .map(|element| element.occurrence)
        .collect();
    assert_eq!(occurrences, vec![0, 1, 2]);
}

#[test]
fn registry_replaces_models_wholesale() {
    let registry = ModelRegistry::new();
    registry.insert(analyze("file:///demo/unit.R", "a <- 1\n"));
    let held = registry.get("file:///demo/unit.R").expect("inserted");
    assert_eq!(held.unit_id, "file:///demo/unit.R");

    let previous = registry.insert(analyze("file:///demo/unit.R", "b <- 2\n"));
    assert!(previous.is_some());
    assert_eq!(registry.len(), 1);

    let replacement = registry.get("file:///demo/unit.R").expect("still present");
    assert!(replacement.top_level().has_common(&Some("b".to_string())));
    // The superseded model stays valid for existing holders.
    assert!(held.top_level().has_common(&Some("a".to_string())));
}

#[test]
fn cancelled_analysis_returns_none() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = AnalyzerContext {
        cancel: Some(cancel),
        ..AnalyzerContext::default()
    };
    let ast = lower::parse_source("x <- 1\n");
    assert!(SourceAnalyzer::new(ctx)
        .update("file:///demo/cancelled.R", ast)
        .is_none());
}

#[test]
fn super_assignment_binds_at_the_top_level() {
    let code = "bump <- function() {\n  counter <<- counter + 1\n}\n";
    let model = analyze("file:///demo/super.R", code);
    assert!(model.top_level().has_common(&Some("counter".to_string())));
}

#[test]
fn assign_call_with_global_envir_binds_at_the_top_level() {
    let code = "setup <- function() {\n  assign(\"cache\", list(), envir = globalenv())\n}\n";
    let model = analyze("file:///demo/assign.R", code);
    assert!(model.top_level().has_common(&Some("cache".to_string())));
}

#[test]
fn syntax_errors_still_produce_a_model() {
    let code = "broken <- function(x { x }\nok <- 1\n";
    let model = analyze("file:///demo/broken.R", code);
    assert_eq!(model.top_level().scope_type, ScopeType::Project);
    assert!(model.top_level().has_common(&Some("ok".to_string())));
}
