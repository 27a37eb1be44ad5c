//
// main.rs
//
// Command-line entry point. The library carries the model builder and
// the session controller; the binary wires up logging and dispatches the
// `model` subcommand.
//

use std::env;

fn print_usage() {
    println!(
        "rook {}, a static R source-model builder.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: rook <COMMAND> [OPTIONS]

Commands:

model <path> [--json] [--stats] [--only <phase>]
                             Build source models for an R file or a
                             directory and print the semantic outline

Options:

--version                    Print the version
--help                       Print this help message

"#
    );
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut argv = env::args();
    argv.next(); // skip executable name

    match argv.next().as_deref() {
        Some("model") => {
            rook::cli::model_stats::run(&mut argv).map_err(|message| anyhow::anyhow!(message))
        }
        Some("--version") => {
            println!("rook {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("--help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => Err(anyhow::anyhow!("Unknown command: '{other}'")),
    }
}
