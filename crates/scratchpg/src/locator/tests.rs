//! Unit tests for engine discovery.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::log::DiscardLog;
use crate::process::{ProcessOutput, StreamError};

fn install(dir: &Path, utilities: &[Utility]) {
    fs::create_dir_all(dir).expect("create install dir");
    for utility in utilities {
        fs::write(dir.join(utility.binary_name()), b"").expect("write utility");
    }
}

#[fixture]
fn root() -> TempDir {
    TempDir::new().expect("temp dir")
}

fn only_dirs(dirs: &[&Path]) -> Locator {
    Locator::new(SearchSpace::new(
        dirs.iter().map(|dir| dir.to_path_buf()).collect(),
        Vec::new(),
    ))
}

#[rstest]
fn first_complete_directory_wins(root: TempDir) {
    let partial = root.path().join("partial");
    let complete = root.path().join("complete");
    let later = root.path().join("later");
    install(&partial, &[Utility::Shell, Utility::Controller]);
    install(&complete, &Utility::ALL);
    install(&later, &Utility::ALL);

    let commands = only_dirs(&[&partial, &complete, &later])
        .find_commands(None)
        .expect("complete directory found");

    assert_eq!(commands.directory(), complete);
    for utility in Utility::ALL {
        assert_eq!(
            commands.path(utility),
            complete.join(utility.binary_name())
        );
    }
}

#[rstest]
fn utilities_are_never_mixed_across_directories(root: TempDir) {
    let first = root.path().join("first");
    let second = root.path().join("second");
    install(&first, &[Utility::Shell, Utility::Initializer]);
    install(&second, &[Utility::Controller, Utility::Dumper]);

    let error = only_dirs(&[&first, &second])
        .find_commands(None)
        .expect_err("no single directory is complete");

    assert!(
        matches!(&error, InstanceError::NotFound { tried } if tried == &vec![first.clone(), second.clone()]),
        "expected NotFound listing both directories, got: {error:?}"
    );
}

#[rstest]
fn directories_named_like_utilities_do_not_count(root: TempDir) {
    let dir = root.path().join("bin");
    install(&dir, &[Utility::Shell, Utility::Initializer, Utility::Controller]);
    fs::create_dir_all(dir.join("pg_dump")).expect("create decoy directory");

    assert!(only_dirs(&[&dir]).find_commands(None).is_err());
}

#[rstest]
fn hint_replaces_the_search_space(root: TempDir) {
    let searched = root.path().join("searched");
    let hinted = root.path().join("hinted");
    install(&searched, &Utility::ALL);

    let error = only_dirs(&[&searched])
        .find_commands(Some(&hinted))
        .expect_err("hinted directory is empty");
    assert!(matches!(&error, InstanceError::NotFound { tried } if tried == &vec![hinted.clone()]));

    install(&hinted, &Utility::ALL);
    let commands = only_dirs(&[&searched])
        .find_commands(Some(&hinted))
        .expect("hinted directory is complete");
    assert_eq!(commands.directory(), hinted);
}

#[rstest]
fn empty_hint_searches_normally(root: TempDir) {
    let dir = root.path().join("bin");
    install(&dir, &Utility::ALL);

    let commands = only_dirs(&[&dir])
        .find_commands(Some(Path::new("")))
        .expect("search path used");
    assert_eq!(commands.directory(), dir);
}

#[rstest]
fn glob_matches_follow_the_path_directories(root: TempDir) {
    let path_dir = root.path().join("path");
    let versioned = root.path().join("postgresql").join("16").join("bin");
    fs::create_dir_all(&path_dir).expect("create path dir");
    install(&versioned, &Utility::ALL);

    let pattern = format!("{}/postgresql/*/bin", root.path().display());
    let space = SearchSpace::new(vec![path_dir.clone()], vec![pattern, String::from("[")]);

    assert_eq!(space.candidates(None), vec![path_dir, versioned.clone()]);
    let commands = Locator::new(space)
        .find_commands(None)
        .expect("glob match is complete");
    assert_eq!(commands.directory(), versioned);
}

#[test]
fn system_search_space_ends_with_well_known_globs() {
    let space = SearchSpace::system();
    assert_eq!(space.globs.len(), WELL_KNOWN_GLOBS.len());
    assert_eq!(
        space.globs.first().map(String::as_str),
        Some("/usr/lib/postgresql/*/bin")
    );
}

#[rstest]
#[case::debian("psql (PostgreSQL) 16.4 (Ubuntu 16.4-1.pgdg22.04+1)\n", Some("16.4-1.pgdg22.04+1)"))]
#[case::plain("psql (PostgreSQL) 15.2\n", Some("15.2"))]
#[case::empty("   \n", None)]
fn version_is_the_last_field(#[case] output: &str, #[case] expected: Option<&str>) {
    assert_eq!(parse_version(output), expected);
}

/// Runner answering every invocation with the same standard output.
struct VersionRunner(&'static str);

impl ProcessRunner for VersionRunner {
    fn run(&self, _invocation: &Invocation) -> io::Result<ProcessOutput> {
        Ok(ProcessOutput::success(self.0))
    }

    fn stream(
        &self,
        _invocation: &Invocation,
        _sink: &mut dyn Write,
    ) -> Result<ProcessOutput, StreamError> {
        Ok(ProcessOutput::success(Vec::new()))
    }
}

#[rstest]
fn locate_records_the_reported_version(root: TempDir) {
    install(root.path(), &Utility::ALL);
    let runner = VersionRunner("psql (PostgreSQL) 16.4\n");
    let engine = only_dirs(&[root.path()])
        .locate(None, &Orchestrator::new(&runner, &DiscardLog))
        .expect("engine located");

    assert_eq!(engine.version(), "16.4");
    assert_eq!(engine.commands().directory(), root.path());
}

#[rstest]
fn silent_version_query_is_unrecognised(root: TempDir) {
    install(root.path(), &Utility::ALL);
    let runner = VersionRunner("");
    let error = only_dirs(&[root.path()])
        .locate(None, &Orchestrator::new(&runner, &DiscardLog))
        .expect_err("no version token");

    assert!(
        matches!(&error, InstanceError::UnrecognisedVersion { program, .. } if program == &root.path().join("psql")),
        "expected UnrecognisedVersion, got: {error:?}"
    );
}
