//
// cli/mod.rs
//
// Command-line subcommands. `main` matches the leading command word and
// hands the remaining arguments to the subcommand's own parser.
//

pub mod model_stats;
