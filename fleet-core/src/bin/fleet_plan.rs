//! `fleet-plan`: reads an IAllocator request envelope from a file path
//! given as the single positional argument, runs it, and prints the
//! response envelope to stdout.
//!
//! Exit codes: `0` on a successful plan, `1` when the request file is
//! missing or unreadable (an argument error), `2` when the request parses
//! but planning finds no feasible result, or any other internal failure.
//! Argument-parsing grammar (flags, subcommands, `--help`) is out of
//! scope; this binary exists to be a runnable entry point, not a CLI UX.

use std::io::Read;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: fleet-plan <request.json>");
            return ExitCode::from(1);
        }
    };

    let mut input = String::new();
    let file = std::fs::File::open(&path).and_then(|mut f| f.read_to_string(&mut input));
    if let Err(err) = file {
        tracing::error!(path = %path, error = %err, "failed to read request file");
        return ExitCode::from(1);
    }

    match fleet_core::iallocator::handle_request(&input) {
        Ok(response) => {
            println!("{response}");
            if response.contains("\"success\":true") {
                ExitCode::from(0)
            } else {
                ExitCode::from(2)
            }
        }
        Err(err) => {
            tracing::error!(error_type = err.error_type(), error = %err, "request failed");
            ExitCode::from(2)
        }
    }
}
