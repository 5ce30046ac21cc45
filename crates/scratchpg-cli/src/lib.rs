//! Command-line front end for `scratchpg`.
//!
//! `scratchpg locate` reports which PostgreSQL installation would be used.
//! `scratchpg run` starts a disposable server, creates the requested
//! databases, prints their connection strings, and tears everything down
//! again when a termination signal arrives.

mod errors;
mod shutdown;
mod telemetry;

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use scratchpg::{ADMIN_DATABASE, Instance, InstanceBuilder, InstanceOption, TracingLog};
use tracing::info;

use crate::errors::CliError;
use crate::shutdown::{ShutdownSignal, SystemShutdownSignal};
use crate::telemetry::{DEFAULT_LOG_FILTER, LogFormat};

pub(crate) const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

#[derive(Debug, Parser)]
#[command(
    name = "scratchpg",
    version,
    about = "Disposable PostgreSQL servers for tests"
)]
struct Cli {
    /// Tracing filter directives, in `RUST_LOG` syntax.
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
    /// Diagnostic output format: `json` or `compact`.
    #[arg(long, global = true, default_value_t = LogFormat::default())]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report the installation that would be used.
    Locate {
        /// Only look for the engine utilities in this directory.
        #[arg(long)]
        search_path: Option<PathBuf>,
    },
    /// Start a server and keep it running until interrupted.
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Only look for the engine utilities in this directory.
    #[arg(long)]
    search_path: Option<PathBuf>,
    /// Existing directory to hold the data directory and socket.
    #[arg(long)]
    working_dir: Option<PathBuf>,
    /// Encoding passed to the initializer.
    #[arg(long)]
    encoding: Option<String>,
    /// Database to create once the server is up; may be repeated.
    #[arg(long = "database", value_name = "NAME")]
    databases: Vec<String>,
}

impl RunArgs {
    fn options(&self) -> impl Iterator<Item = InstanceOption> {
        let search = self.search_path.clone().map(InstanceOption::SearchPath);
        let working_dir = self.working_dir.clone().map(InstanceOption::WorkingDir);
        let encoding = self.encoding.clone().map(InstanceOption::Encoding);
        search.into_iter().chain(working_dir).chain(encoding)
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_signal(args, stdout, stderr, &mut SystemShutdownSignal::default())
}

fn run_with_signal<I, W, E>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    signal: &mut dyn ShutdownSignal,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if is_informational(&error) => {
            return match write!(stdout, "{}", error.render()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report(stderr, &CliError::Usage(error)),
    };

    let result = telemetry::initialise(&cli.log_filter, cli.log_format)
        .map_err(CliError::from)
        .and_then(|_| match cli.command {
            Command::Locate { search_path } => locate(search_path, stdout),
            Command::Run(args) => serve(&args, stdout, signal),
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report(stderr, &error),
    }
}

fn is_informational(error: &clap::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn report<E: Write>(stderr: &mut E, error: &CliError) -> ExitCode {
    let _ = writeln!(stderr, "scratchpg: {error}");
    ExitCode::FAILURE
}

fn builder() -> InstanceBuilder {
    Instance::builder().log(TracingLog)
}

fn locate<W: Write>(search_path: Option<PathBuf>, stdout: &mut W) -> Result<(), CliError> {
    let instance = builder()
        .options(search_path.map(InstanceOption::SearchPath))
        .build()?;
    let engine = instance.engine();
    writeln!(stdout, "directory\t{}", engine.commands().directory().display())
        .and_then(|()| writeln!(stdout, "version\t{}", engine.version()))
        .map_err(CliError::Output)
}

fn serve<W: Write>(
    args: &RunArgs,
    stdout: &mut W,
    signal: &mut dyn ShutdownSignal,
) -> Result<(), CliError> {
    signal.install()?;
    let mut instance = builder().options(args.options()).build()?;
    let served = announce(&mut instance, &args.databases, stdout).and_then(|()| {
        info!(target: CLI_TARGET, "waiting for a shutdown signal");
        signal.wait().map_err(CliError::from)
    });
    let torn_down = instance.teardown().map_err(CliError::from);
    served.and(torn_down)
}

fn announce<W: Write>(
    instance: &mut Instance,
    databases: &[String],
    stdout: &mut W,
) -> Result<(), CliError> {
    instance.start()?;
    writeln!(stdout, "{ADMIN_DATABASE}\t{}", instance.db_uri(ADMIN_DATABASE))
        .map_err(CliError::Output)?;
    for name in databases {
        let uri = instance.create_db(name, "")?;
        writeln!(stdout, "{name}\t{uri}").map_err(CliError::Output)?;
    }
    stdout.flush().map_err(CliError::Output)
}
