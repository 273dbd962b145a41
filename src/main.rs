//! Purpose: `sproutdb` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: `serve` and `check` build the registry through the same bootstrap path.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod seed;
mod serve;

use sproutdb::api::{Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

#[derive(Parser)]
#[command(
    name = "sproutdb",
    version,
    about = "In-memory JSON table store with a query language and an HTTP API",
    long_about = r#"In-memory JSON table store with a query language and an HTTP API.

Tables hold JSON objects. Query with where/sort/offset/limit, validate
writes with per-table schemas, and serve everything over HTTP."#,
    after_help = r#"EXAMPLES
  $ sproutdb serve --seed data.json --schema schema.json
  $ sproutdb check --seed data/
  $ sproutdb completion bash > /etc/bash_completion.d/sproutdb"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Serve tables over HTTP (loopback by default)")]
    Serve(ServeArgs),
    #[command(
        about = "Build tables from seed/schema files and print a summary",
        long_about = r#"Build tables from seed/schema files and print a summary.

Runs exactly the startup path `serve` uses, then prints
{"tables":[{"name","records","validated"}]} and exits."#
    )]
    Check(BootstrapArgs),
    #[command(about = "Print shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Clone, Debug, Default)]
struct BootstrapArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Seed file (table -> records) or folder of <table>.json files",
        value_hint = ValueHint::AnyPath
    )]
    seed: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Schema file (table -> schema)",
        value_hint = ValueHint::FilePath
    )]
    schema: Option<PathBuf>,
    #[arg(
        long = "table",
        value_name = "NAME",
        help = "Create an empty table at startup (repeatable)"
    )]
    tables: Vec<String>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:3000", help = "Bind address")]
    bind: String,
    #[arg(long, help = "Override the port of --bind")]
    port: Option<u16>,
    #[arg(long, help = "Allow binding to a non-loopback address")]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = serve::DEFAULT_MAX_BODY_BYTES,
        help = "Maximum request body size in bytes"
    )]
    max_body_bytes: u64,
    #[command(flatten)]
    bootstrap: BootstrapArgs,
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `sproutdb --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(|err| (err, color_mode))
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check that the path exists and is readable, and that the port is free.")
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Validation => "validation failed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if !err.issues().is_empty() {
        inner.insert("issues".to_string(), json!(err.issues()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];

    for issue in err.issues() {
        lines.push(format!("  - {issue}"));
    }
    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, error_json, error_text};
    use clap::{CommandFactory, Parser};
    use sproutdb::api::{Error, ErrorKind, ValidationIssue};

    #[test]
    fn serve_defaults_to_loopback_port_3000() {
        let cli = Cli::try_parse_from(["sproutdb", "serve"]).expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind, "127.0.0.1:3000");
        assert_eq!(args.port, None);
        assert!(args.bootstrap.tables.is_empty());
    }

    #[test]
    fn color_flag_only_claims_stderr_diagnostics() {
        let cmd = Cli::command();
        let color = cmd
            .get_arguments()
            .find(|arg| arg.get_id() == "color")
            .expect("color arg");
        let help = color.get_help().map(ToString::to_string).unwrap_or_default();
        assert_eq!(help, "Colorize stderr diagnostics: auto|always|never");
    }

    #[test]
    fn tables_flag_is_repeatable() {
        let cli = Cli::try_parse_from(["sproutdb", "check", "--table", "users", "--table", "posts"])
            .expect("parse");
        let Command::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.tables, ["users", "posts"]);
    }

    #[test]
    fn error_json_includes_issues_and_hint() {
        let err = Error::validation(vec![ValidationIssue::new("id", "ID must be positive")])
            .with_hint("fix the seed");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Validation");
        assert_eq!(value["error"]["hint"], "fix the seed");
        assert_eq!(value["error"]["issues"][0]["path"], "id");
    }

    #[test]
    fn error_text_respects_color_flag() {
        let err = Error::new(ErrorKind::NotFound).with_message("table 'x' not found");
        let plain = error_text(&err, false);
        assert_eq!(plain, "error: table 'x' not found");
        let colored = error_text(&err, true);
        assert!(colored.contains("\u{1b}[31merror:\u{1b}[0m"));
    }
}
