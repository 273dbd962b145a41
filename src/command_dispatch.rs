//! Purpose: Hold top-level CLI command dispatch for `sproutdb`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `serve` and `check` share `seed::build_database`.
use std::net::SocketAddr;

use clap::CommandFactory;
use serde_json::json;

use super::*;
use crate::seed::{Bootstrap, build_database};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "sproutdb", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Check(args) => {
            serve::init_tracing("warn");
            let db = build_database(&bootstrap_from_args(args))?;
            let tables = db
                .tables()
                .into_iter()
                .map(|(name, table)| {
                    json!({
                        "name": name,
                        "records": table.len(),
                        "validated": table.has_validator(),
                    })
                })
                .collect::<Vec<_>>();
            emit_json(json!({ "tables": tables }));
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(&args)?;
            serve::validate_config(&config)?;
            serve::init_tracing("info");
            let db = build_database(&bootstrap_from_args(args.bootstrap))?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config, db))?;
            Ok(RunOutcome::ok())
        }
    }
}

fn bootstrap_from_args(args: BootstrapArgs) -> Bootstrap {
    Bootstrap {
        seed: args.seed,
        schema: args.schema,
        tables: args.tables,
    }
}

fn serve_config_from_args(args: &ServeArgs) -> Result<serve::ServeConfig, Error> {
    let mut bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:3000.")
    })?;
    if let Some(port) = args.port {
        bind.set_port(port);
    }
    Ok(serve::ServeConfig {
        bind,
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
    })
}
