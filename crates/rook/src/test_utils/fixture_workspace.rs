//! Deterministic fixture generator for benchmarks and tests.
//!
//! Generates synthetic R units with controlled characteristics: file
//! count, functions per file, S4 class blocks, `library()` calls, and
//! extra lines of plain assignments. All output is deterministic so
//! benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

/// Configuration for generating fixture units.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub functions_per_file: usize,
    pub classes_per_file: usize,
    pub library_calls_per_file: usize,
    pub extra_lines_per_file: usize,
}

/// A set of well-known library names used deterministically in generated code.
const LIBRARIES: &[&str] = &[
    "stats", "utils", "dplyr", "ggplot2", "tidyr",
    "stringr", "purrr", "readr", "tibble", "forcats",
];

impl FixtureConfig {
    /// Small workspace: 10 files, 5 functions and 1 class block each.
    pub fn small() -> Self {
        Self {
            file_count: 10,
            functions_per_file: 5,
            classes_per_file: 1,
            library_calls_per_file: 1,
            extra_lines_per_file: 5,
        }
    }

    /// Medium workspace: 50 files, 10 functions and 2 class blocks each.
    pub fn medium() -> Self {
        Self {
            file_count: 50,
            functions_per_file: 10,
            classes_per_file: 2,
            library_calls_per_file: 2,
            extra_lines_per_file: 10,
        }
    }

    /// Large workspace: 200 files, 20 functions and 3 class blocks each.
    pub fn large() -> Self {
        Self {
            file_count: 200,
            functions_per_file: 20,
            classes_per_file: 3,
            library_calls_per_file: 3,
            extra_lines_per_file: 20,
        }
    }
}

/// Generate the source of a single R unit deterministically.
///
/// Every feature of the generated code drives a distinct part of the
/// model builder: imports, function scopes with locals, an S4 generic
/// with classes and methods, and top-level variables.
pub fn unit_source(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();

    for lib_i in 0..config.library_calls_per_file {
        let lib = LIBRARIES[(index * config.library_calls_per_file + lib_i) % LIBRARIES.len()];
        writeln!(content, "library({})", lib).unwrap();
    }
    if config.library_calls_per_file > 0 {
        content.push('\n');
    }

    for fun_i in 0..config.functions_per_file {
        writeln!(
            content,
            "calc_{}_{} <- function(x, y = {}) {{",
            index,
            fun_i,
            fun_i + 1
        )
        .unwrap();
        writeln!(content, "    scaled <- x + y * {}", fun_i + 1).unwrap();
        writeln!(content, "    if (is.na(scaled)) {{").unwrap();
        writeln!(content, "        return(NULL)").unwrap();
        writeln!(content, "    }}").unwrap();
        writeln!(content, "    scaled").unwrap();
        writeln!(content, "}}").unwrap();
        content.push('\n');
    }

    if config.classes_per_file > 0 {
        writeln!(
            content,
            "setGeneric(\"describe{}\", function(obj) standardGeneric(\"describe{}\"))",
            index, index
        )
        .unwrap();
        content.push('\n');
        for cls_i in 0..config.classes_per_file {
            writeln!(
                content,
                "setClass(\"Record{}_{}\", representation(label = \"character\", value = \"numeric\"))",
                index, cls_i
            )
            .unwrap();
            writeln!(
                content,
                "setMethod(\"describe{}\", signature(obj = \"Record{}_{}\"), function(obj) obj@label)",
                index, index, cls_i
            )
            .unwrap();
            content.push('\n');
        }
    }

    for line_i in 0..config.extra_lines_per_file {
        writeln!(content, "item_{}_{} <- {}", index, line_i, line_i + 1).unwrap();
    }

    content
}

/// Create a temporary fixture workspace from the given configuration.
///
/// Returns a `TempDir` whose path contains the generated `.R` files.
/// The directory is cleaned up when the `TempDir` is dropped.
///
/// Calling this twice with the same `FixtureConfig` produces byte-identical files.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
///
/// Useful when you need to control the directory path (e.g., for named temp dirs).
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    for i in 0..config.file_count {
        let content = unit_source(i, config);
        let filename = format!("unit_{}.R", i);
        let filepath = dir.join(&filename);
        std::fs::write(&filepath, &content)
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
}
