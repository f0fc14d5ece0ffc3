//! Leasehold CLI: the `leasehold` command.

mod cli;
mod commands;
mod config;
mod support;

use clap::Parser;
use cli::{Cli, Commands};
use support::GlobalArgs;

fn main() {
    let cli = Cli::parse();
    let globals = GlobalArgs {
        config: cli.config,
        root: cli.root,
        now: cli.now,
    };
    setup_tracing(&globals, cli.verbose);

    match cli.command {
        Commands::Declare {
            resource,
            source,
            source_file,
            json,
        } => commands::declare::run_declare(&globals, resource, source, source_file, json),

        Commands::Undeclare { resource, json } => {
            commands::declare::run_undeclare(&globals, resource, json)
        }

        Commands::Checkout {
            resource,
            holder,
            json,
        } => commands::checkout::run_checkout(&globals, resource, holder, json),

        Commands::Return {
            resource,
            holder,
            sweep,
            json,
        } => commands::checkout::run_return(&globals, resource, holder, sweep, json),

        Commands::Sweep {
            resource,
            watch,
            interval_seconds,
            json,
        } => commands::sweep::run(
            &globals,
            commands::sweep::Args {
                resource,
                watch,
                interval_seconds,
                json,
            },
        ),

        Commands::Status {
            resource,
            holder,
            json,
        } => commands::status::run_status(&globals, resource, holder, json),

        Commands::Holders { resource, json } => {
            commands::status::run_holders(&globals, resource, json)
        }
    }
}

/// Log to stderr. `RUST_LOG` wins; otherwise `-v` means debug and the config
/// file's `[log] filter` applies.
fn setup_tracing(globals: &GlobalArgs, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            let configured = support::load_config_or_exit(globals).log.filter;
            EnvFilter::try_new(&configured).unwrap_or_else(|e| {
                eprintln!("error: invalid [log] filter `{configured}`: {e}");
                std::process::exit(1);
            })
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
