//
// mod.rs
//
// Shared test doubles and fixtures, available in test builds and behind
// the `test-support` feature so integration tests and benchmarks can
// import them without #[path] hacks.
//

pub mod fixture_workspace;
pub mod mock_engine;
