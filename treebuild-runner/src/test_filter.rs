// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering tests based on user-specified parameters.

use crate::errors::TestFilterBuildError;
use regex::Regex;
use treebuild_config::{Project, TestDef};

/// Decides which of a project's top-level tests run.
#[derive(Clone, Debug, Default)]
pub struct TestFilter {
    patterns: Vec<Regex>,
    run_disabled: bool,
}

impl TestFilter {
    /// Creates a new `TestFilter` from name patterns.
    ///
    /// A test name matches if any pattern matches anywhere within it. If `patterns` is empty, all
    /// names match.
    pub fn new(
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
        run_disabled: bool,
    ) -> Result<Self, TestFilterBuildError> {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|error| TestFilterBuildError::new(pattern, error))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            patterns,
            run_disabled,
        })
    }

    /// Returns true if name patterns were supplied.
    ///
    /// A filtered run is a targeted investigation, so failing tests aren't retried.
    pub fn has_patterns(&self) -> bool {
        !self.patterns.is_empty()
    }

    /// Whether disabled tests run too.
    pub fn run_disabled(&self) -> bool {
        self.run_disabled
    }

    /// Returns true if `name` matches the name patterns.
    pub fn name_matches(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Returns true if `test` should run.
    pub fn should_run(&self, test: &TestDef) -> bool {
        (test.enabled() || self.run_disabled) && self.name_matches(test.name())
    }

    /// Returns true if any test in `project` should run.
    pub fn matches_project(&self, project: &Project) -> bool {
        project.tests.iter().any(|test| self.should_run(test))
    }
}
