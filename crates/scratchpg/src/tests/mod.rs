//! Crate-level test support and behaviour tests.
//!
//! [`ScriptedRunner`] stands in for the engine utilities. It answers each
//! invocation the way the real tools do closely enough for the lifecycle
//! controller: the initializer creates the data directory, the controller
//! tracks whether the server is up, the shell client remembers created
//! databases, and the dumper only dumps databases that exist.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::instance::Instance;
use crate::locator::Utility;
use crate::options::{InstanceBuilder, InstanceOption};
use crate::process::{Invocation, ProcessOutput, ProcessRunner, StreamError};


/// Version reported by the scripted shell client.
pub(crate) const SCRIPTED_VERSION: &str = "16.4";

#[derive(Default)]
struct Script {
    calls: Vec<Invocation>,
    databases: BTreeSet<String>,
    running: bool,
    fail_start: bool,
    fail_stop: bool,
    unlaunchable: Option<Utility>,
}

/// In-memory stand-in for the engine utilities.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }

    /// Makes every subsequent `pg_ctl start` fail.
    pub(crate) fn fail_start(&self) {
        self.script().fail_start = true;
    }

    /// Makes every subsequent `pg_ctl stop` fail.
    pub(crate) fn fail_stop(&self) {
        self.script().fail_stop = true;
    }

    /// Makes `utility` fail to launch, as if it had lost its execute bit.
    pub(crate) fn unlaunchable(&self, utility: Utility) {
        self.script().unlaunchable = Some(utility);
    }

    /// Every invocation seen so far, in order.
    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.script().calls.clone()
    }

    /// Argument lists of every invocation of `utility`, excluding the
    /// version query.
    pub(crate) fn calls_to(&self, utility: Utility) -> Vec<Vec<String>> {
        self.calls()
            .iter()
            .filter(|invocation| utility_of(invocation) == Some(utility))
            .map(arguments)
            .filter(|args| args.first().map(String::as_str) != Some("-V"))
            .collect()
    }

    /// Number of controller invocations ending in `action`.
    pub(crate) fn control_calls(&self, action: &str) -> usize {
        self.calls_to(Utility::Controller)
            .iter()
            .filter(|args| args.last().map(String::as_str) == Some(action))
            .count()
    }

    /// Whether the scripted server is currently up.
    pub(crate) fn running(&self) -> bool {
        self.script().running
    }

    fn record(&self, invocation: &Invocation) -> Result<(Utility, Vec<String>), io::Error> {
        let mut script = self.script();
        script.calls.push(invocation.clone());
        let utility = utility_of(invocation).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "not an engine utility")
        })?;
        if script.unlaunchable == Some(utility) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok((utility, arguments(invocation)))
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let (utility, args) = self.record(invocation)?;
        let output = match utility {
            Utility::Shell if args.first().map(String::as_str) == Some("-V") => {
                ProcessOutput::success(format!("psql (PostgreSQL) {SCRIPTED_VERSION}\n"))
            }
            Utility::Shell => self.create_database(&args),
            Utility::Initializer => initialise(&args),
            Utility::Controller => self.control(&args),
            Utility::Dumper => ProcessOutput::failure(2, "pg_dump: expected to be streamed"),
        };
        Ok(output)
    }

    fn stream(
        &self,
        invocation: &Invocation,
        sink: &mut dyn Write,
    ) -> Result<ProcessOutput, StreamError> {
        let (utility, args) = self.record(invocation).map_err(StreamError::Launch)?;
        if utility != Utility::Dumper {
            return Ok(ProcessOutput::failure(2, "only pg_dump is streamed"));
        }
        let name = args
            .first()
            .and_then(|uri| database_in_uri(uri))
            .unwrap_or_default();
        let known = name == "postgres" || self.script().databases.contains(&name);
        if !known {
            return Ok(ProcessOutput::failure(
                1,
                format!("pg_dump: error: FATAL:  database \"{name}\" does not exist\n"),
            ));
        }
        write!(
            sink,
            "--\n-- PostgreSQL database dump\n--\n\n-- Dumped database: {name}\n"
        )
        .map_err(StreamError::Transfer)?;
        Ok(ProcessOutput::success(Vec::new()))
    }
}

impl ScriptedRunner {
    fn create_database(&self, args: &[String]) -> ProcessOutput {
        let mut script = self.script();
        if !script.running {
            return ProcessOutput::failure(2, "psql: error: connection to server failed");
        }
        let Some(name) = args.get(1).and_then(|statement| database_in_statement(statement))
        else {
            return ProcessOutput::failure(1, "ERROR:  syntax error");
        };
        if !script.databases.insert(name.clone()) {
            return ProcessOutput::failure(
                1,
                format!("ERROR:  database \"{name}\" already exists\n"),
            );
        }
        ProcessOutput::success("CREATE DATABASE\n")
    }

    fn control(&self, args: &[String]) -> ProcessOutput {
        let mut script = self.script();
        match args.last().map(String::as_str) {
            Some("start") if script.fail_start => {
                ProcessOutput::failure(1, "pg_ctl: could not start server\n")
            }
            Some("start") => {
                script.running = true;
                ProcessOutput::success(Vec::new())
            }
            Some("stop") if script.fail_stop => {
                ProcessOutput::failure(1, "pg_ctl: server does not shut down\n")
            }
            Some("stop") => {
                script.running = false;
                ProcessOutput::success("waiting for server to shut down.... done\n")
            }
            _ => ProcessOutput::failure(1, "pg_ctl: unrecognized operation mode\n"),
        }
    }
}

fn initialise(args: &[String]) -> ProcessOutput {
    if value_after(args, "-E") == Some("GARBAGE") {
        return ProcessOutput::failure(
            1,
            "initdb: error: \"GARBAGE\" is not a valid server encoding name\n",
        );
    }
    let Some(data_dir) = value_after(args, "-D") else {
        return ProcessOutput::failure(1, "initdb: error: no data directory specified\n");
    };
    match fs::create_dir_all(data_dir) {
        Ok(()) => ProcessOutput::success("\nSuccess. You can now start the database server.\n"),
        Err(error) => ProcessOutput::failure(1, format!("initdb: error: {error}\n")),
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

fn database_in_statement(statement: &str) -> Option<String> {
    let rest = statement.strip_prefix("CREATE DATABASE \"")?;
    let (name, _) = rest.split_once('"')?;
    Some(name.to_owned())
}

fn database_in_uri(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("postgresql:///")?;
    let (name, _) = rest.split_once('?')?;
    Some(name.to_owned())
}

fn utility_of(invocation: &Invocation) -> Option<Utility> {
    let name = invocation.program().file_name()?.to_str()?;
    Utility::ALL
        .into_iter()
        .find(|utility| utility.binary_name() == name)
}

fn arguments(invocation: &Invocation) -> Vec<String> {
    invocation
        .arguments()
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

/// A directory holding an empty file for every engine utility.
#[fixture]
pub(crate) fn engine_dir() -> TempDir {
    let dir = TempDir::new().expect("engine dir");
    for utility in Utility::ALL {
        fs::write(dir.path().join(utility.binary_name()), b"").expect("write utility");
    }
    dir
}

/// Builder for a scripted instance resolving its engine from `engine`.
pub(crate) fn scripted(engine: &Path) -> InstanceBuilder<ScriptedRunner> {
    InstanceBuilder::new()
        .runner(ScriptedRunner::default())
        .search_path(engine)
}

/// A scripted instance with `options` applied after the search path.
pub(crate) fn scripted_instance(
    engine: &Path,
    options: impl IntoIterator<Item = InstanceOption>,
) -> Instance<ScriptedRunner> {
    scripted(engine)
        .options(options)
        .build()
        .expect("scripted instance builds")
}

/// A caller-owned working directory that does not exist.
pub(crate) fn missing_dir() -> PathBuf {
    PathBuf::from("/nonexistent/scratchpg/working-dir")
}

#[rstest]
fn scripted_round_trip_through_the_public_surface(engine_dir: TempDir) {
    let mut instance = scripted_instance(engine_dir.path(), []);

    instance.start().expect("start");
    let uri = instance.create_db("orders", "").expect("create");
    let mut dump = Vec::new();
    instance.dump_db("orders", &mut dump).expect("dump");
    instance.teardown().expect("teardown");

    assert!(uri.starts_with("postgresql:///orders?host="));
    assert!(String::from_utf8_lossy(&dump).contains("Dumped database: orders"));
    assert_eq!(instance.runner().control_calls("stop"), 1);
    assert!(!instance.runner().running());
}
