// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while building and testing projects.

use camino::Utf8PathBuf;
use itertools::Itertools;
use std::io;
use thiserror::Error;
use treebuild_config::errors::DependencyCycle;

/// An error building a [`TestFilter`](crate::test_filter::TestFilter).
#[derive(Clone, Debug, Error)]
#[error("invalid test filter `{pattern}`")]
pub struct TestFilterBuildError {
    pattern: String,
    #[source]
    error: regex::Error,
}

impl TestFilterBuildError {
    pub(crate) fn new(pattern: impl Into<String>, error: regex::Error) -> Self {
        Self {
            pattern: pattern.into(),
            error,
        }
    }
}

/// An error returned while choosing the projects to build and test.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// `--skip-project` named projects that weren't selected.
    #[error("unknown project passed to --skip-project: {}", .names.iter().join(", "))]
    UnknownSkipProject {
        /// The unknown names.
        names: Vec<String>,
    },

    /// The selected projects have cyclic build dependencies.
    #[error(transparent)]
    DependencyCycle(#[from] DependencyCycle),
}

/// An error reported by a test environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The project's build directory doesn't exist, so there's nothing to load.
    #[error("project build directory `{path}` does not exist")]
    MissingProjectRoot {
        /// The build directory.
        path: Utf8PathBuf,
    },

    /// A command couldn't be started.
    #[error("failed to execute `{command}`")]
    Spawn {
        /// The command line.
        command: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The environment couldn't start a runner.
    #[error("failed to initialize test environment: {message}")]
    Init {
        /// A description of the failure.
        message: String,
    },
}

/// A fatal error while running a project's tests.
///
/// Test failures aren't errors: they're recorded in
/// [`TestResults`](crate::reporter::TestResults). These errors stop the project's test run.
#[derive(Debug, Error)]
pub enum RunTestsError {
    /// A reboot command appeared outside a composite test.
    #[error("reboot command in project `{project}` is not part of a composite test")]
    MisplacedReboot {
        /// The project.
        project: String,
    },

    /// The test environment couldn't be loaded, initialized or used.
    #[error("test environment error for project `{project}`")]
    Environment {
        /// The project.
        project: String,
        /// The underlying error.
        #[source]
        error: EnvironmentError,
    },

    /// A host test couldn't be started.
    #[error("failed to execute host test `{name}` for project `{project}`")]
    HostTest {
        /// The project.
        project: String,
        /// The test name.
        name: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error while building projects.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build root couldn't be created.
    #[error("failed to create build root `{path}`")]
    CreateBuildRoot {
        /// The build root.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The build tool couldn't be started.
    #[error("failed to execute build for project `{project}`")]
    Spawn {
        /// The project.
        project: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error while reading or writing the build id counter.
#[derive(Debug, Error)]
pub enum BuildIdError {
    /// The counter file couldn't be written.
    #[error("failed to update build id counter")]
    Write(#[source] io::Error),

    /// The counter is already at its maximum value.
    #[error("build id counter in `{path}` cannot be incremented past {}", u64::MAX)]
    CounterOverflow {
        /// The counter file.
        path: Utf8PathBuf,
    },

    /// The current user couldn't be determined.
    #[error("failed to determine the current user")]
    User(#[source] whoami::Error),

    /// The host name couldn't be determined.
    #[error("failed to determine the host name")]
    Hostname(#[source] nix::Error),

    /// The host name isn't valid UTF-8.
    #[error("host name `{}` is not valid UTF-8", .0.to_string_lossy())]
    NonUtf8Hostname(std::ffi::OsString),
}

/// An error copying build artifacts into the archive directory.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A required artifact doesn't exist.
    #[error("required artifact `{path}` for project `{project}` does not exist")]
    MissingArtifact {
        /// The project.
        project: String,
        /// The missing file.
        path: Utf8PathBuf,
    },

    /// An I/O error occurred.
    #[error("failed to archive artifacts for project `{project}`")]
    Io {
        /// The project.
        project: String,
        /// The underlying error, which includes the paths involved.
        #[source]
        error: io::Error,
    },
}

/// An error assembling the SDK directory.
#[derive(Debug, Error)]
#[error("failed to assemble SDK `{sdk_dir}`")]
pub struct SdkError {
    sdk_dir: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl SdkError {
    pub(crate) fn new(sdk_dir: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            sdk_dir: sdk_dir.into(),
            error,
        }
    }
}
