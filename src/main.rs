use clap::Parser;
use roadsync::cli::{commands, Cli, Commands};
use roadsync::error::RoadsyncError;
use roadsync::logging::init_logging;
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = match &cli.command {
        Commands::Init(args) => commands::init::execute(args, None),
        Commands::Sync(args) => {
            commands::sync::execute(args, cli.json, cli.db.as_ref(), cli.token.as_deref())
        }
        Commands::Inspect(args) => commands::inspect::execute(args, cli.json),
        Commands::Status => commands::status::execute(cli.json, cli.db.as_ref()),
        Commands::Version => commands::version::execute(cli.json),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to
/// stderr. Otherwise, outputs a human-readable error plus a hint when one
/// exists.
fn handle_error(err: &RoadsyncError, json_mode: bool) -> ! {
    let exit_code = err.exit_code();
    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        let json = err.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        eprintln!("Error: {err}");
        if let Some(hint) = err.suggestion() {
            eprintln!("Hint: {hint}");
        }
    }

    std::process::exit(exit_code);
}
