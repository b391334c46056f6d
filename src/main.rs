//! Binary entry point for the pondnote CLI.
//!
//! Every command prints one JSON document on stdout; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Turn a SQL script into a stored notebook
//! pondnote import analysis.sql --name "Q3 analysis"
//!
//! # Dependency graph, cycles and execution order
//! pondnote graph <notebook-id>
//!
//! # Preview, then apply, an alias rename that rewrites references
//! pondnote rename <notebook-id> <cell-id> --to orders
//! pondnote rename <notebook-id> <cell-id> --to orders --apply
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use pondnote::cli::{
    build_resolver, open_controller, run_check_name, run_graph, run_import, run_list, run_plan,
    run_rename,
};
use pondnote::config::{CliOverrides, PondnoteConfig};
use pondnote::error::{NotebookError, OutputErrorCode};
use pondnote::notebook::NotebookId;
use pondnote::output::{emit_response, ErrorResponse};
use pondnote_core::CellId;

// ============================================================================
// CLI Structure
// ============================================================================

/// SQL notebooks with stable cell references.
#[derive(Parser, Debug)]
#[command(name = "pondnote", version, about = "SQL notebook dependency and rename engine")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Notebook store directory (default: platform data dir).
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// External lineage analyzer command; enables lineage resolution.
    #[arg(long, global = true)]
    lineage_command: Option<String>,

    /// SQL dialect passed to the lineage analyzer.
    #[arg(long, global = true)]
    dialect: Option<String>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored notebooks.
    List,
    /// Create a notebook from a SQL script, one cell per statement.
    Import {
        /// Script to import.
        script: PathBuf,
        /// Notebook name (default: script file stem).
        #[arg(long)]
        name: Option<String>,
    },
    /// Show a notebook's dependency graph.
    Graph { notebook: String },
    /// Rename (or clear) a cell alias and rewrite references to it.
    Rename {
        notebook: String,
        cell: String,
        /// New alias.
        #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
        to: Option<String>,
        /// Remove the alias; references fall back to the stable ref.
        #[arg(long)]
        clear: bool,
        /// Persist the rename (default: preview only).
        #[arg(long)]
        apply: bool,
    },
    /// Check whether a name is acceptable as a cell alias.
    CheckName {
        notebook: String,
        cell: String,
        name: String,
    },
    /// SQL to run a cell together with everything upstream of it.
    Plan { notebook: String, cell: String },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level, cli.global.log_json);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON like every other response.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn execute(cli: Cli) -> Result<(), NotebookError> {
    let cwd = std::env::current_dir()
        .map_err(|e| NotebookError::internal(format!("cannot read working directory: {}", e)))?;
    let config = PondnoteConfig::resolve(&cwd, &overrides(&cli.global))?;
    let mut controller = open_controller(&config)?;
    let mut stdout = io::stdout();

    let written = match cli.command {
        Command::List => emit_response(&run_list(&controller), &mut stdout),
        Command::Import { script, name } => {
            let response = run_import(&mut controller, &script, name.as_deref())?;
            emit_response(&response, &mut stdout)
        }
        Command::Graph { notebook } => {
            let resolver = build_resolver(&config);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| NotebookError::internal(format!("cannot start runtime: {}", e)))?;
            let notebook_id = NotebookId::from(notebook.as_str());
            let response =
                runtime.block_on(run_graph(&controller, &notebook_id, &resolver))?;
            emit_response(&response, &mut stdout)
        }
        Command::Rename {
            notebook,
            cell,
            to,
            clear,
            apply,
        } => {
            let to = if clear { None } else { to };
            let response = run_rename(
                &mut controller,
                &NotebookId::from(notebook.as_str()),
                &CellId::from(cell.as_str()),
                to.as_deref(),
                apply,
            )?;
            emit_response(&response, &mut stdout)
        }
        Command::CheckName {
            notebook,
            cell,
            name,
        } => {
            let response = run_check_name(
                &controller,
                &NotebookId::from(notebook.as_str()),
                &CellId::from(cell.as_str()),
                &name,
            )?;
            emit_response(&response, &mut stdout)
        }
        Command::Plan { notebook, cell } => {
            let response = run_plan(
                &controller,
                &NotebookId::from(notebook.as_str()),
                &CellId::from(cell.as_str()),
            )?;
            emit_response(&response, &mut stdout)
        }
    };
    written.map_err(|e| NotebookError::internal(format!("cannot write output: {}", e)))
}

fn overrides(global: &GlobalArgs) -> CliOverrides {
    CliOverrides {
        store_dir: global.store_dir.clone(),
        lineage_command: global.lineage_command.clone(),
        dialect: global.dialect.clone(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod cli_parsing {
        use super::*;

        #[test]
        fn rename_preview_by_default() {
            let cli = Cli::try_parse_from(["pondnote", "rename", "nb1", "c1", "--to", "orders"])
                .unwrap();
            match cli.command {
                Command::Rename {
                    notebook,
                    cell,
                    to,
                    clear,
                    apply,
                } => {
                    assert_eq!(notebook, "nb1");
                    assert_eq!(cell, "c1");
                    assert_eq!(to.as_deref(), Some("orders"));
                    assert!(!clear);
                    assert!(!apply);
                }
                other => panic!("expected Rename, got {:?}", other),
            }
        }

        #[test]
        fn rename_needs_to_or_clear() {
            assert!(Cli::try_parse_from(["pondnote", "rename", "nb1", "c1"]).is_err());
            assert!(Cli::try_parse_from(["pondnote", "rename", "nb1", "c1", "--clear"]).is_ok());
            assert!(Cli::try_parse_from([
                "pondnote", "rename", "nb1", "c1", "--clear", "--to", "x"
            ])
            .is_err());
        }

        #[test]
        fn global_flags_after_subcommand() {
            let cli = Cli::try_parse_from([
                "pondnote",
                "graph",
                "nb1",
                "--lineage-command",
                "lineage-tool",
                "--dialect",
                "duckdb",
                "--log-level",
                "debug",
            ])
            .unwrap();
            assert_eq!(cli.global.lineage_command.as_deref(), Some("lineage-tool"));
            assert_eq!(cli.global.dialect.as_deref(), Some("duckdb"));
            assert!(matches!(cli.global.log_level, LogLevel::Debug));
            assert!(matches!(cli.command, Command::Graph { .. }));
        }

        #[test]
        fn import_name_is_optional() {
            let cli = Cli::try_parse_from(["pondnote", "import", "q.sql"]).unwrap();
            match cli.command {
                Command::Import { script, name } => {
                    assert_eq!(script, PathBuf::from("q.sql"));
                    assert!(name.is_none());
                }
                other => panic!("expected Import, got {:?}", other),
            }
        }

        #[test]
        fn check_name_subcommand() {
            let cli =
                Cli::try_parse_from(["pondnote", "check-name", "nb1", "c1", "totals"]).unwrap();
            assert!(matches!(cli.command, Command::CheckName { .. }));
        }
    }
}
