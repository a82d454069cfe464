// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running host tests.

use camino::Utf8Path;
use std::{io, os::unix::process::ExitStatusExt, process::ExitStatus};

/// Runs host test commands.
pub trait HostExecutor {
    /// Runs `argv` from `build_dir` and returns its exit status. `argv[0]` is relative to
    /// `build_dir`.
    fn run(&mut self, build_dir: &Utf8Path, argv: &[String]) -> io::Result<i32>;
}

/// Runs host tests at a lowered scheduling priority through `nice`.
#[derive(Clone, Debug, Default)]
pub struct NiceHostExecutor;

impl NiceHostExecutor {
    /// The arguments passed to `nice`.
    pub fn nice_args(build_dir: &Utf8Path, argv: &[String]) -> Vec<String> {
        match argv.split_first() {
            Some((program, args)) => std::iter::once(build_dir.join(program).into_string())
                .chain(args.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl HostExecutor for NiceHostExecutor {
    fn run(&mut self, build_dir: &Utf8Path, argv: &[String]) -> io::Result<i32> {
        let output = duct::cmd("nice", Self::nice_args(build_dir, argv))
            .dir(build_dir)
            .unchecked()
            .run()?;
        Ok(exit_code(output.status))
    }
}

/// Converts an exit status into a shell-style status code. Processes killed by a signal report
/// `128 + signal`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
