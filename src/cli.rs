//! Command-line dispatch.
//!
//! `server [config-file]` runs the HTTP server; `db [args...]` hands the
//! remaining arguments to the application's database command.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Server {
        /// Configuration file (YAML, or TOML with a .toml extension)
        config_file: Option<PathBuf>,
        /// Ignored
        #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
        extra: Vec<String>,
    },
    /// Run a database command
    Db {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Server { config_file: PathBuf },
    Db { args: Vec<String> },
}

/// Unrecognized or missing command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Usage: {program} <server|db> [args...]")]
pub struct UsageError {
    pub program: String,
}

/// Default configuration file for an application: `<lowercased name>.yml`.
pub fn default_config_file(app_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.yml", app_name.to_lowercase()))
}

/// Parse process arguments. The first item is the program path.
pub fn parse_invocation<I>(app_name: &str, args: I) -> Result<Invocation, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let usage = || UsageError {
        program: app_name.to_string(),
    };

    let cli = Cli::try_parse_from(args).map_err(|e| {
        tracing::debug!(error = %e, "Invalid command line");
        usage()
    })?;

    match cli.command {
        Some(Commands::Server { config_file, extra }) => {
            if !extra.is_empty() {
                tracing::debug!(?extra, "Ignoring extra server arguments");
            }
            Ok(Invocation::Server {
                config_file: config_file.unwrap_or_else(|| default_config_file(app_name)),
            })
        }
        Some(Commands::Db { args }) => Ok(Invocation::Db { args }),
        None => Err(usage()),
    }
}
