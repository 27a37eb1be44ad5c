//
// cli/model_stats.rs
//
// `rook model` subcommand: builds source models for an R file or a
// directory tree and prints the semantic outline per unit, with optional
// phase timing and JSON output.
//
// Phases measured:
//   1. scan    — discovering R files under the path
//   2. parse   — tree-sitter parsing
//   3. lower   — CST to AST lowering
//   4. analyze — model building (scopes, accesses, elements)
//

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use regex::Regex;
use ropey::Rope;
use serde::Serialize;
use url::Url;
use walkdir::WalkDir;

use crate::ast::Ast;
use crate::lower;
use crate::model::{
    AnalyzerContext, ElementDetail, ElementKind, FunArgs, ModelRegistry, RSourceModel,
    SourceAnalyzer, SourceElement,
};
use crate::parser_pool;
use crate::perf::{self, TimingGuard};

/// Parsed arguments for the `model` subcommand.
#[derive(Debug)]
pub struct ModelStatsArgs {
    pub path: PathBuf,
    pub json: bool,
    pub stats: bool,
    pub only: Option<String>,
}

/// Timing record for one pipeline phase.
pub struct PhaseResult {
    pub name: String,
    pub duration: Duration,
    pub peak_rss_bytes: Option<u64>,
    pub detail: String,
}

/// One outline row in the report.
#[derive(Debug, Serialize)]
pub struct ElementSummary {
    pub kind: &'static str,
    pub name: String,
    pub line: usize,
    pub column: usize,
    /// Display suffix: argument list, superclasses or slot type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSummary>,
}

/// Per-unit entry in the report.
#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub unit_id: String,
    pub scopes: usize,
    pub accesses: usize,
    /// Validated `library()` targets, in outline order.
    pub imports: Vec<String>,
    pub outline: Vec<ElementSummary>,
}

/// Full output of one `rook model` run.
pub struct ModelStatsReport {
    pub phases: Vec<PhaseResult>,
    pub summaries: Vec<ModelSummary>,
}

/// All valid phase names.
const VALID_PHASES: &[&str] = &["scan", "parse", "lower", "analyze"];

/// Entry point for `rook model`, wired from `main`.
pub fn run(args: &mut impl Iterator<Item = String>) -> Result<(), String> {
    let args = parse_args(args)?;
    let report = run_model_stats(&args);
    if args.json {
        print_report_json(&report, &args)?;
    } else {
        print_report(&report, &args);
    }
    Ok(())
}

/// Parse `model` arguments from the remaining CLI args.
///
/// Expected usage: `rook model <path> [--json] [--stats] [--only <phase>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<ModelStatsArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut json = false;
    let mut stats = false;
    let mut only: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--stats" => stats = true,
            "--only" => {
                let phase = args
                    .next()
                    .ok_or_else(|| "--only requires a phase name".to_string())?;
                if !VALID_PHASES.contains(&phase.as_str()) {
                    return Err(format!(
                        "Unknown phase '{}'. Valid phases: {}",
                        phase,
                        VALID_PHASES.join(", ")
                    ));
                }
                only = Some(phase);
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if path.is_some() {
                    return Err("Multiple paths provided; expected exactly one".to_string());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let path = path.ok_or_else(|| "Missing required <path> argument".to_string())?;
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }

    Ok(ModelStatsArgs {
        path,
        json,
        stats,
        only,
    })
}

/// Run the pipeline and collect phase timings plus per-unit summaries.
///
/// With `--only <phase>` just that phase is timed; earlier phases still
/// run untimed when a later one needs their output.
pub fn run_model_stats(args: &ModelStatsArgs) -> ModelStatsReport {
    let should_run =
        |phase: &str| -> bool { args.only.as_ref().map_or(true, |only| only == phase) };
    let mut phases = Vec::new();

    // Phase 1: scan
    let mut sources: Vec<(PathBuf, String)> = Vec::new();
    if should_run("scan") {
        let _guard = TimingGuard::new("model-stats:scan");
        let start = Instant::now();
        sources = discover_r_files(&args.path);
        let duration = start.elapsed();
        perf::record_scan(duration, sources.len());
        phases.push(PhaseResult {
            name: "scan".to_string(),
            duration,
            peak_rss_bytes: perf::peak_rss_bytes(),
            detail: format!("{} files", sources.len()),
        });
    }
    if sources.is_empty() && !should_run("scan") {
        sources = discover_r_files(&args.path);
    }

    // Phase 2: parse, fanned out across the thread pool; each worker
    // uses its own thread-local parser.
    let mut parsed: Vec<ParsedUnit> = Vec::new();
    if should_run("parse") {
        let _guard = TimingGuard::new("model-stats:parse");
        let start = Instant::now();
        parsed = parse_sources(&sources);
        let duration = start.elapsed();
        perf::record_parse(duration);
        let ok = parsed.iter().filter(|unit| unit.tree.is_some()).count();
        phases.push(PhaseResult {
            name: "parse".to_string(),
            duration,
            peak_rss_bytes: perf::peak_rss_bytes(),
            detail: format!("{} files parsed ({} succeeded)", parsed.len(), ok),
        });
    }
    if parsed.is_empty() && !should_run("parse") {
        parsed = parse_sources(&sources);
    }

    // Phase 3: lower
    let mut lowered: Vec<(String, Ast)> = Vec::new();
    if should_run("lower") {
        let _guard = TimingGuard::new("model-stats:lower");
        let start = Instant::now();
        lowered = lower_units(&parsed);
        let duration = start.elapsed();
        let nodes: usize = lowered.iter().map(|(_, ast)| ast.node_count as usize).sum();
        phases.push(PhaseResult {
            name: "lower".to_string(),
            duration,
            peak_rss_bytes: perf::peak_rss_bytes(),
            detail: format!("{} units, {} nodes", lowered.len(), nodes),
        });
    }
    if lowered.is_empty() && !should_run("lower") {
        lowered = lower_units(&parsed);
    }

    // Phase 4: analyze in parallel, collecting into a shared registry
    let registry = ModelRegistry::new();
    let mut summaries = Vec::new();
    if should_run("analyze") {
        let _guard = TimingGuard::new("model-stats:analyze");
        let start = Instant::now();
        let analyzer = SourceAnalyzer::new(AnalyzerContext::default());
        let models: Vec<RSourceModel> = lowered
            .into_par_iter()
            .filter_map(|(unit_id, ast)| analyzer.update(&unit_id, ast))
            .collect();
        let built = models.len();
        for model in models {
            registry.insert(model);
        }
        let duration = start.elapsed();
        perf::record_analysis(duration, built);
        phases.push(PhaseResult {
            name: "analyze".to_string(),
            duration,
            peak_rss_bytes: perf::peak_rss_bytes(),
            detail: format!("{} models built", built),
        });

        // Scan order is sorted, so the report is deterministic.
        for unit in &parsed {
            if let Some(model) = registry.get(&unit.unit_id) {
                summaries.push(summarize_model(&model, &unit.content));
            }
        }
    }

    ModelStatsReport { phases, summaries }
}

struct ParsedUnit {
    unit_id: String,
    content: String,
    tree: Option<tree_sitter::Tree>,
}

fn parse_sources(sources: &[(PathBuf, String)]) -> Vec<ParsedUnit> {
    sources
        .par_iter()
        .map(|(path, content)| ParsedUnit {
            unit_id: unit_id_for(path),
            content: content.clone(),
            tree: parser_pool::with_parser(|parser| parser.parse(content, None)),
        })
        .collect()
}

fn lower_units(parsed: &[ParsedUnit]) -> Vec<(String, Ast)> {
    parsed
        .iter()
        .map(|unit| {
            let ast = match &unit.tree {
                Some(tree) => lower::lower_tree(tree, &unit.content),
                None => Ast::empty(),
            };
            (unit.unit_id.clone(), ast)
        })
        .collect()
}

/// Unit ids are file URLs; relative inputs are resolved first so the id
/// is stable regardless of the working directory.
fn unit_id_for(path: &Path) -> String {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    match Url::from_file_path(&absolute) {
        Ok(url) => url.to_string(),
        Err(()) => format!("file://{}", absolute.display()),
    }
}

/// R package names: letters, digits and periods, at least two characters,
/// starting with a letter and not ending with a period.
fn package_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9.]*[A-Za-z0-9]$").unwrap()
    })
}

fn summarize_model(model: &RSourceModel, content: &str) -> ModelSummary {
    let rope = Rope::from_str(content);
    let outline: Vec<ElementSummary> = model
        .children_of(model.root_element)
        .map(|element| summarize_element(model, element, &rope))
        .collect();

    let mut imports = Vec::new();
    for element in model.children_of(model.root_element) {
        if element.kind != ElementKind::PackageImport {
            continue;
        }
        let name = element.display_name();
        if package_name_pattern().is_match(name) {
            imports.push(name.to_string());
        } else {
            log::warn!(
                "{}: skipping import with invalid package name {:?}",
                model.unit_id,
                name
            );
        }
    }

    ModelSummary {
        unit_id: model.unit_id.clone(),
        scopes: model.scopes.len(),
        accesses: model.accesses.len(),
        imports,
        outline,
    }
}

fn summarize_element(model: &RSourceModel, element: &SourceElement, rope: &Rope) -> ElementSummary {
    let (line, column) = line_col(rope, element.span.start);
    let children = element
        .children
        .iter()
        .map(|id| summarize_element(model, model.element(*id), rope))
        .collect();
    ElementSummary {
        kind: element.kind.display(),
        name: element.display_name().to_string(),
        line,
        column,
        signature: element_signature(element),
        children,
    }
}

fn element_signature(element: &SourceElement) -> Option<String> {
    match &element.detail {
        ElementDetail::Function { args } => args.as_ref().map(FunArgs::display),
        ElementDetail::Class { superclasses } if !superclasses.is_empty() => {
            Some(format!("extends {}", superclasses.join(", ")))
        }
        ElementDetail::Class { .. } => None,
        ElementDetail::Slot { type_name, .. } => type_name.clone(),
        ElementDetail::None => None,
    }
}

/// 1-based line and column for a byte offset.
fn line_col(rope: &Rope, byte: usize) -> (usize, usize) {
    let byte = byte.min(rope.len_bytes());
    let line = rope.byte_to_line(byte);
    (line + 1, byte - rope.line_to_byte(line) + 1)
}

/// Print the report for people: outline per unit, then the phase table
/// when `--stats` was given.
pub fn print_report(report: &ModelStatsReport, args: &ModelStatsArgs) {
    for summary in &report.summaries {
        println!("{}", summary.unit_id);
        println!(
            "  scopes: {}  accesses: {}  imports: {}",
            summary.scopes,
            summary.accesses,
            if summary.imports.is_empty() {
                "-".to_string()
            } else {
                summary.imports.join(", ")
            }
        );
        for element in &summary.outline {
            print_element(element, 1);
        }
        println!();
    }
    if args.stats {
        print_phases(&report.phases);
    }
}

fn print_element(element: &ElementSummary, depth: usize) {
    let mut text = format!("{}{} {}", "  ".repeat(depth), element.kind, element.name);
    if let Some(signature) = &element.signature {
        text.push(' ');
        text.push_str(signature);
    }
    println!("{}  [{}:{}]", text, element.line, element.column);
    for child in &element.children {
        print_element(child, depth + 1);
    }
}

fn print_phases(phases: &[PhaseResult]) {
    println!("=== Phase timing ===");
    for phase in phases {
        let rss = match phase.peak_rss_bytes {
            Some(bytes) => format_bytes(bytes),
            None => "N/A".to_string(),
        };
        println!(
            "  {:<10} {:>10.2?}   RSS: {:<10}  ({})",
            phase.name, phase.duration, rss, phase.detail
        );
    }
    if phases.len() > 1 {
        let total: Duration = phases.iter().map(|p| p.duration).sum();
        println!("\n  {:<10} {:>10.2?}", "TOTAL", total);
    }
    println!();
}

/// Print the report as one JSON document on stdout.
pub fn print_report_json(report: &ModelStatsReport, args: &ModelStatsArgs) -> Result<(), String> {
    #[derive(Serialize)]
    struct JsonPhase<'a> {
        name: &'a str,
        duration_ms: f64,
        peak_rss_bytes: Option<u64>,
        detail: &'a str,
    }
    #[derive(Serialize)]
    struct JsonReport<'a> {
        units: &'a [ModelSummary],
        #[serde(skip_serializing_if = "Option::is_none")]
        phases: Option<Vec<JsonPhase<'a>>>,
    }

    let phases = if args.stats {
        Some(
            report
                .phases
                .iter()
                .map(|phase| JsonPhase {
                    name: &phase.name,
                    duration_ms: phase.duration.as_secs_f64() * 1000.0,
                    peak_rss_bytes: phase.peak_rss_bytes,
                    detail: &phase.detail,
                })
                .collect(),
        )
    } else {
        None
    };
    let doc = JsonReport {
        units: &report.summaries,
        phases,
    };
    match serde_json::to_string_pretty(&doc) {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(err) => Err(format!("Failed to serialize report: {}", err)),
    }
}

/// Discover R files under `root` (or `root` itself when it is a file) and
/// read their contents, sorted by path.
fn discover_r_files(root: &Path) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    if root.is_file() {
        if let Ok(content) = std::fs::read_to_string(root) {
            files.push((root.to_path_buf(), content));
        }
        return files;
    }
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry))
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_r_source = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("r"));
        if !is_r_source {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path.to_path_buf(), content));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map_or(false, should_skip_directory)
}

/// Directories that never hold project R sources.
fn should_skip_directory(name: &str) -> bool {
    matches!(
        name,
        ".git"
            | ".svn"
            | ".hg"
            | "node_modules"
            | ".Rproj.user"
            | "renv"
            | "packrat"
            | ".vscode"
            | ".idea"
            | "target"
    )
}

/// Format a byte count as a human-readable string (e.g., "12.3 MB").
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
