// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invoking the native build system.

use crate::{errors::BuildError, host::exit_code};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info};

/// Builds a single project.
pub trait ProjectBuilder {
    /// Builds `project`, stamping its outputs with `build_id`. Returns true if the build
    /// succeeded.
    fn build(&mut self, project: &str, build_id: &str) -> Result<bool, BuildError>;
}

/// Builds projects with `nice make <project> -j <jobs>`.
#[derive(Clone, Debug)]
pub struct MakeBuilder {
    tree_root: Utf8PathBuf,
    build_root: Utf8PathBuf,
    jobs: usize,
}

impl MakeBuilder {
    /// Creates a builder that runs `make` from `tree_root`, placing outputs under `build_root`.
    pub fn new(
        tree_root: impl Into<Utf8PathBuf>,
        build_root: impl Into<Utf8PathBuf>,
        jobs: usize,
    ) -> Self {
        Self {
            tree_root: tree_root.into(),
            build_root: build_root.into(),
            jobs,
        }
    }

    /// The arguments passed to `nice`.
    pub fn nice_args(&self, project: &str) -> Vec<String> {
        vec![
            "make".to_owned(),
            project.to_owned(),
            "-j".to_owned(),
            self.jobs.to_string(),
        ]
    }

    /// Converts the build of `project` to a [`duct::Expression`].
    pub fn to_expression(&self, project: &str, build_id: &str) -> duct::Expression {
        duct::cmd("nice", self.nice_args(project))
            .dir(&self.tree_root)
            .env("BUILDROOT", &self.build_root)
            .env("BUILDID", build_id)
            .unchecked()
    }
}

impl ProjectBuilder for MakeBuilder {
    fn build(&mut self, project: &str, build_id: &str) -> Result<bool, BuildError> {
        let output = self
            .to_expression(project, build_id)
            .run()
            .map_err(|error| BuildError::Spawn {
                project: project.to_owned(),
                error,
            })?;
        let status = exit_code(output.status);
        info!(
            "nice {} returned {status}",
            shell_words::join(self.nice_args(project))
        );
        Ok(status == 0)
    }
}

/// The projects that built, and those that didn't.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Projects that built successfully, in build order.
    pub succeeded: Vec<String>,
    /// Projects whose build failed, in build order.
    pub failed: Vec<String>,
}

/// Builds `projects` in order. A failed build doesn't stop later projects from building.
pub fn build_projects(
    builder: &mut dyn ProjectBuilder,
    build_root: &Utf8Path,
    projects: &[String],
    build_id: &str,
) -> Result<BuildSummary, BuildError> {
    fs_err::create_dir_all(build_root).map_err(|error| BuildError::CreateBuildRoot {
        path: build_root.to_owned(),
        error,
    })?;

    let mut summary = BuildSummary::default();
    for project in projects {
        info!(%project, build_id, "building");
        if builder.build(project, build_id)? {
            summary.succeeded.push(project.clone());
        } else {
            error!(%project, "build failed");
            summary.failed.push(project.clone());
        }
    }
    Ok(summary)
}
