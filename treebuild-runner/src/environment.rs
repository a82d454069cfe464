// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test environment contract.
//!
//! Tests other than host tests run inside a test environment: an emulator or device driven by a
//! project-specific module. The engine only depends on the lifecycle here:
//!
//! 1. [`EnvironmentDriver::load`] loads a module for a project's build directory.
//! 2. [`EnvironmentModule::init`] starts a runner.
//! 3. [`EnvironmentModule::run_test`] runs a command line against the runner and returns its
//!    exit status.
//! 4. [`EnvironmentModule::shutdown`] stops the runner. It is called with `None` if no runner was
//!    started, and may be called many times during a run.

use crate::{errors::EnvironmentError, host::exit_code};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// Options passed to [`EnvironmentModule::init`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// The Android build to run against.
    pub android: Option<Utf8PathBuf>,
    /// Whether the test disables RPMB storage. Inferred from `--disable_rpmb` in the test's
    /// command line.
    pub disable_rpmb: bool,
    /// Verbose output from the environment.
    pub verbose: bool,
    /// Wait for a debugger to attach if a test fails.
    pub debug_on_error: bool,
}

/// Loads test environment modules.
pub trait EnvironmentDriver {
    /// The module type.
    type Module: EnvironmentModule;

    /// Loads the module for the project whose build output is at `project_root`.
    fn load(&mut self, project_root: &Utf8Path) -> Result<Self::Module, EnvironmentError>;
}

/// A loaded test environment module.
pub trait EnvironmentModule {
    /// A running environment instance.
    type Runner;

    /// Starts a runner.
    fn init(&mut self, options: &RunnerOptions) -> Result<Self::Runner, EnvironmentError>;

    /// Runs `argv` and returns its exit status.
    fn run_test(
        &mut self,
        runner: &mut Self::Runner,
        argv: &[String],
    ) -> Result<i32, EnvironmentError>;

    /// Stops `runner`, if any.
    fn shutdown(&mut self, runner: Option<Self::Runner>);
}

/// The default driver: runs each test command from the project's build directory.
#[derive(Clone, Debug, Default)]
pub struct ProcessEnvironment;

impl EnvironmentDriver for ProcessEnvironment {
    type Module = ProcessModule;

    fn load(&mut self, project_root: &Utf8Path) -> Result<ProcessModule, EnvironmentError> {
        if !project_root.is_dir() {
            return Err(EnvironmentError::MissingProjectRoot {
                path: project_root.to_owned(),
            });
        }
        debug!(%project_root, "loaded test environment");
        Ok(ProcessModule {
            project_root: project_root.to_owned(),
        })
    }
}

/// The module returned by [`ProcessEnvironment`].
#[derive(Clone, Debug)]
pub struct ProcessModule {
    project_root: Utf8PathBuf,
}

/// A runner started by [`ProcessModule`].
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    options: RunnerOptions,
}

impl ProcessModule {
    /// The arguments passed to `nice` to run `argv`: `<project-root>/<argv0> argv[1..]`, followed
    /// by `--verbose` and `--debug-on-error` if requested.
    pub fn nice_args(&self, argv: &[String], options: &RunnerOptions) -> Vec<String> {
        let mut command = Vec::with_capacity(argv.len() + 2);
        if let Some((program, args)) = argv.split_first() {
            command.push(self.project_root.join(program).into_string());
            command.extend(args.iter().cloned());
        }
        if options.verbose {
            command.push("--verbose".to_owned());
        }
        if options.debug_on_error {
            command.push("--debug-on-error".to_owned());
        }
        command
    }
}

impl EnvironmentModule for ProcessModule {
    type Runner = ProcessRunner;

    fn init(&mut self, options: &RunnerOptions) -> Result<ProcessRunner, EnvironmentError> {
        debug!(project_root = %self.project_root, ?options, "starting runner");
        Ok(ProcessRunner {
            options: options.clone(),
        })
    }

    fn run_test(
        &mut self,
        runner: &mut ProcessRunner,
        argv: &[String],
    ) -> Result<i32, EnvironmentError> {
        let args = self.nice_args(argv, &runner.options);
        let output = duct::cmd("nice", &args)
            .dir(&self.project_root)
            .unchecked()
            .run()
            .map_err(|error| EnvironmentError::Spawn {
                command: format!("nice {}", shell_words::join(&args)),
                error,
            })?;
        Ok(exit_code(output.status))
    }

    fn shutdown(&mut self, runner: Option<ProcessRunner>) {
        if runner.is_some() {
            debug!(project_root = %self.project_root, "stopped runner");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_requires_build_dir() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let missing = dir.path().join("build-missing");
        let err = ProcessEnvironment
            .load(&missing)
            .expect_err("build dir does not exist");
        assert!(
            matches!(&err, EnvironmentError::MissingProjectRoot { path } if *path == missing),
            "unexpected error: {err:?}"
        );

        ProcessEnvironment
            .load(dir.path())
            .expect("build dir exists");
    }

    #[test]
    fn nice_args() {
        let module = ProcessModule {
            project_root: "/out/build-qemu".into(),
        };
        let argv = vec![
            "run".to_owned(),
            "--headless".to_owned(),
            "--boot-test".to_owned(),
            "com.android.ipc".to_owned(),
        ];

        assert_eq!(
            module.nice_args(&argv, &RunnerOptions::default()),
            vec![
                "/out/build-qemu/run",
                "--headless",
                "--boot-test",
                "com.android.ipc"
            ]
        );

        let options = RunnerOptions {
            verbose: true,
            debug_on_error: true,
            ..RunnerOptions::default()
        };
        let command = module.nice_args(&argv, &options);
        assert_eq!(&command[command.len() - 2..], ["--verbose", "--debug-on-error"]);
    }
}
