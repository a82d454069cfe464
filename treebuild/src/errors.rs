// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::StderrStyles;
use owo_colors::OwoColorize;
use std::{error::Error, io, path::PathBuf};
use thiserror::Error;
use tracing::error;
use treebuild_config::errors::ConfigError;
use treebuild_runner::errors::{
    ArchiveError, BuildError, BuildIdError, RunTestsError, SdkError, SelectionError,
    TestFilterBuildError,
};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Process exit codes returned by treebuild.
pub enum TreebuildExitCode {}

impl TreebuildExitCode {
    /// Every selected project built and every test passed.
    pub const OK: i32 = 0;

    /// A project failed to build or a test failed.
    pub const FAILED: i32 = 1;

    /// The build config or the command line is invalid.
    pub const CONFIG_ERROR: i32 = 2;

    /// The test environment or the file system couldn't be set up.
    pub const SETUP_ERROR: i32 = 3;
}

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that stops a treebuild run before results are reported.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        error: io::Error,
    },
    #[error("path is not valid UTF-8")]
    NonUtf8Path { path: PathBuf },
    #[error("build config error")]
    Config { error: Box<ConfigError> },
    #[error("test filter build error")]
    TestFilter {
        #[from]
        error: TestFilterBuildError,
    },
    #[error("project selection error")]
    Selection {
        #[from]
        error: SelectionError,
    },
    #[error("build id error")]
    BuildId {
        #[from]
        error: BuildIdError,
    },
    #[error("build error")]
    Build {
        #[from]
        error: BuildError,
    },
    #[error("archive error")]
    Archive {
        #[from]
        error: ArchiveError,
    },
    #[error("SDK error")]
    Sdk {
        #[from]
        error: SdkError,
    },
    #[error("test run error")]
    RunTests {
        #[from]
        error: RunTestsError,
    },
    #[error("failed to write output")]
    WriteOutput {
        #[source]
        error: io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn config(error: ConfigError) -> Self {
        Self::Config {
            error: Box::new(error),
        }
    }

    pub(crate) fn write_output(error: io::Error) -> Self {
        Self::WriteOutput { error }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::TestFilter { .. } | Self::Selection { .. } => {
                TreebuildExitCode::CONFIG_ERROR
            }
            Self::RunTests {
                error: RunTestsError::MisplacedReboot { .. },
            } => TreebuildExitCode::CONFIG_ERROR,
            Self::CurrentDir { .. }
            | Self::NonUtf8Path { .. }
            | Self::BuildId { .. }
            | Self::Build { .. }
            | Self::Archive { .. }
            | Self::Sdk { .. }
            | Self::RunTests { .. }
            | Self::WriteOutput { .. } => TreebuildExitCode::SETUP_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(self, styles: &StderrStyles) {
        let this = match self {
            Self::Config { error } => {
                // The report includes the source chain and any labelled source snippets.
                let report = miette::Report::new_boxed(error);
                error!(target: "treebuild::no_heading", "{:?}", report);
                return;
            }
            other => other,
        };

        let mut next_error = match &this {
            Self::CurrentDir { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::NonUtf8Path { path } => {
                error!(
                    "path `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::Config { .. } => None,
            Self::TestFilter { error } => {
                error!("{error}");
                error.source()
            }
            Self::Selection { error } => {
                error!("{error}");
                error.source()
            }
            Self::BuildId { error } => {
                error!("failed to compute build id");
                Some(error as &dyn Error)
            }
            Self::Build { error } => {
                error!("{error}");
                error.source()
            }
            Self::Archive { error } => {
                error!("{error}");
                error.source()
            }
            Self::Sdk { error } => {
                error!("{error}");
                error.source()
            }
            Self::RunTests { error } => {
                error!("{error}");
                error.source()
            }
            Self::WriteOutput { error } => {
                error!("failed to write test report");
                Some(error as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: "treebuild::no_heading", "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
