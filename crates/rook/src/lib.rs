// lib.rs — Exposes the crate's modules for the binary, benchmarks and
// integration tests.
//
// The `rook` binary entry point lives in main.rs; everything else is
// library code so tests and benches can reach it.

pub mod ast;
pub mod cli;
pub mod controller;
pub mod lower;
pub mod model;
pub mod parser_pool;
pub mod perf;
pub mod protocol;

// test_utils is available in test builds and when the `test-support` feature
// is enabled, so benchmarks and integration tests can import the scripted
// engine and fixture helpers directly.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
