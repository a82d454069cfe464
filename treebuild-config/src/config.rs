// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    deps,
    errors::{ConfigError, DependencyCycle},
    interpreter::ConfigLoader,
    test_def::TestDef,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};

/// Options that affect how a build config is interpreted.
#[derive(Clone, Debug, Default)]
pub struct ConfigOptions {
    /// The Android build to run Android tests against. Passed to every Android test as
    /// `--android <path>`.
    pub android: Option<Utf8PathBuf>,
}

/// A named, independently buildable unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Project {
    /// Whether the project is built by default.
    pub build: bool,
    /// Tests, in execution order.
    pub tests: Vec<TestDef>,
    /// Projects that must be built before this one.
    pub also_build: BTreeSet<String>,
    /// Signing keys for this project, overriding the config-wide default list.
    pub signing_keys: Option<Vec<Utf8PathBuf>>,
}

/// An instruction to copy a build artifact into the archive directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistEntry {
    /// The path relative to the project build directory.
    pub src: Utf8PathBuf,
    /// The file name in the archive directory. Defaults to `src`.
    pub dest: Option<Utf8PathBuf>,
    /// If true, a missing source is skipped rather than reported.
    pub optional: bool,
}

impl DistEntry {
    /// The destination name, falling back to the source path.
    pub fn dest(&self) -> &Utf8Path {
        self.dest.as_deref().unwrap_or(&self.src)
    }
}

/// An evaluated build config: every project declared by the root config and its includes.
#[derive(Clone, Debug, Default)]
pub struct BuildConfig {
    pub(crate) projects: BTreeMap<String, Project>,
    pub(crate) dist: Vec<DistEntry>,
    pub(crate) default_signing_keys: Vec<Utf8PathBuf>,
}

impl BuildConfig {
    /// Reads and evaluates the config at `path`, along with everything it includes.
    pub fn from_file(
        path: impl AsRef<Utf8Path>,
        options: &ConfigOptions,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        ConfigLoader::new(&mut config, options).load_file(path.as_ref())?;
        Ok(config)
    }

    /// Evaluates `source` as if it were the contents of `path`. Relative includes are resolved
    /// against the directory of `path`.
    pub fn from_source(
        path: impl AsRef<Utf8Path>,
        source: impl Into<String>,
        options: &ConfigOptions,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        ConfigLoader::new(&mut config, options).load_source(path.as_ref(), source.into())?;
        Ok(config)
    }

    /// Iterates over all projects, sorted by name.
    pub fn projects(&self) -> impl Iterator<Item = (&str, &Project)> {
        self.projects
            .iter()
            .map(|(name, project)| (name.as_str(), project))
    }

    /// Looks up a project by name.
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }

    /// Returns sorted project names, optionally filtered by build flag and by whether the project
    /// has any tests.
    pub fn get_projects(&self, build: Option<bool>, have_tests: Option<bool>) -> Vec<&str> {
        self.projects()
            .filter(|(_, project)| {
                build.is_none_or(|build| build == project.build)
                    && have_tests.is_none_or(|have_tests| have_tests == !project.tests.is_empty())
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Archive instructions, applied to every built project.
    pub fn dist(&self) -> &[DistEntry] {
        &self.dist
    }

    /// The signing keys used when a project doesn't override them.
    pub fn default_signing_keys(&self) -> &[Utf8PathBuf] {
        &self.default_signing_keys
    }

    /// The signing keys for `project`: its override list if set, otherwise the default list.
    pub fn signing_keys(&self, project: &str) -> &[Utf8PathBuf] {
        self.project(project)
            .and_then(|project| project.signing_keys.as_deref())
            .unwrap_or(&self.default_signing_keys)
    }

    /// Returns `roots` and everything they transitively depend on, dependencies first.
    pub fn build_order<'a>(
        &'a self,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>, DependencyCycle> {
        deps::build_order(&self.projects, roots)
    }

    // Projects are created on first reference.
    pub(crate) fn project_mut(&mut self, name: &str) -> &mut Project {
        self.projects.entry(name.to_owned()).or_default()
    }
}
