// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collecting and printing test results.
//!
//! A full report is always written to stdout. If anything failed, a failures-only report is also
//! written to stderr, so that the failure summary survives when the two streams are captured
//! separately.

use itertools::Itertools;
use owo_colors::{OwoColorize, Style};
use std::{io, io::Write, time::Duration};

/// The outcome of a single test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    /// The test name.
    pub name: String,
    /// Whether the final attempt passed.
    pub passed: bool,
    /// Whether this is the outcome of a retry.
    pub retried: bool,
    /// How long the final attempt took.
    pub elapsed: Duration,
}

impl TestResult {
    /// Returns true if the test failed, then passed on retry.
    pub fn is_flaky(&self) -> bool {
        self.passed && self.retried
    }
}

/// Results for one project, in execution order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResults {
    project: String,
    results: Vec<TestResult>,
}

impl TestResults {
    /// Creates an empty result set for `project`.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            results: Vec::new(),
        }
    }

    /// The project these results are for.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The recorded results, in execution order.
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Records a result.
    pub fn add_result(
        &mut self,
        name: impl Into<String>,
        passed: bool,
        retried: bool,
        elapsed: Duration,
    ) {
        self.results.push(TestResult {
            name: name.into(),
            passed,
            retried,
            elapsed,
        });
    }

    /// Returns true if no test failed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|result| result.passed)
    }

    /// The number of tests that passed, including flaky ones.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|result| result.passed).count()
    }

    /// The number of tests that failed.
    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }

    /// The number of tests that failed, then passed on retry.
    pub fn flaked_count(&self) -> usize {
        self.results.iter().filter(|result| result.is_flaky()).count()
    }

    /// The number of tests that were retried.
    pub fn retried_count(&self) -> usize {
        self.results.iter().filter(|result| result.retried).count()
    }
}

/// Results across every project in a run.
#[derive(Clone, Debug, Default)]
pub struct MultiProjectResults {
    projects: Vec<TestResults>,
    build_failures: Vec<String>,
}

impl MultiProjectResults {
    /// Creates an empty set of results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a project's test results.
    pub fn add(&mut self, results: TestResults) {
        self.projects.push(results);
    }

    /// Records that `project` failed to build.
    pub fn add_build_failure(&mut self, project: impl Into<String>) {
        self.build_failures.push(project.into());
    }

    /// Per-project results, in the order they were added.
    pub fn projects(&self) -> &[TestResults] {
        &self.projects
    }

    /// Projects that failed to build.
    pub fn build_failures(&self) -> &[String] {
        &self.build_failures
    }

    /// The total number of passing tests.
    pub fn tests_passed(&self) -> usize {
        self.projects.iter().map(TestResults::passed_count).sum()
    }

    /// The total number of failing tests.
    pub fn tests_failed(&self) -> usize {
        self.projects.iter().map(TestResults::failed_count).sum()
    }

    /// The number of projects with at least one passing test.
    pub fn projects_passed(&self) -> usize {
        self.projects
            .iter()
            .filter(|results| results.passed_count() > 0)
            .count()
    }

    /// The number of projects with at least one failing test.
    pub fn projects_failed(&self) -> usize {
        self.failed_projects().count()
    }

    /// The names of projects with at least one failing test.
    pub fn failed_projects(&self) -> impl Iterator<Item = &str> {
        self.projects
            .iter()
            .filter(|results| !results.passed())
            .map(TestResults::project)
    }

    /// Returns true if every build and every test succeeded.
    pub fn passed(&self) -> bool {
        self.build_failures.is_empty() && self.projects.iter().all(TestResults::passed)
    }
}

#[derive(Debug, Default, Clone)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    flaky: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.flaky = Style::new().magenta().bold();
    }
}

/// Writes test reports.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    styles: Styles,
}

impl Reporter {
    /// Creates a reporter that writes plain text.
    pub fn new() -> Self {
        Self::default()
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Writes the report for one project.
    ///
    /// With `failed_only`, nothing is written for a project whose tests all passed, and passing
    /// tests are omitted.
    pub fn write_project(
        &self,
        results: &TestResults,
        failed_only: bool,
        mut writer: impl Write,
    ) -> io::Result<()> {
        if failed_only && results.passed() {
            return Ok(());
        }
        let styles = &self.styles;
        let count = results.results().len();
        writeln!(writer)?;
        writeln!(
            writer,
            "Ran {} tests for project {}.",
            count.style(styles.count),
            results.project()
        )?;
        if count == 0 {
            return Ok(());
        }

        for result in results.results() {
            if !result.passed {
                writeln!(
                    writer,
                    "[ {} ] {}",
                    format!("{:^8}", "FAILED").style(styles.fail),
                    result.name
                )?;
            } else if !failed_only {
                writeln!(
                    writer,
                    "[ {} ] {}",
                    format!("{:>8}", "OK").style(styles.pass),
                    result.name
                )?;
                if result.retried {
                    writeln!(
                        writer,
                        "{}: {} was re-run and passed on second try; it may be flaky",
                        "WARNING".style(styles.flaky),
                        result.name
                    )?;
                }
            }
        }

        writeln!(
            writer,
            "[==========] {} tests ran for project {}.",
            count.style(styles.count),
            results.project()
        )?;
        let passed = results.passed_count();
        if passed > 0 && !failed_only {
            writeln!(
                writer,
                "[ {} ] {} tests.",
                format!("{:^8}", "PASSED").style(styles.pass),
                passed.style(styles.count)
            )?;
        }
        let failed = results.failed_count();
        if failed > 0 {
            writeln!(
                writer,
                "[ {} ] {} tests.",
                format!("{:^8}", "FAILED").style(styles.fail),
                failed.style(styles.count)
            )?;
        }
        let flaked = results.flaked_count();
        if flaked > 0 && !failed_only {
            writeln!(
                writer,
                "[ {} ] {} tests.",
                format!("{:^8}", "FLAKED").style(styles.flaky),
                flaked.style(styles.count)
            )?;
        }
        Ok(())
    }

    /// Writes the run-wide report: every project's full report and the totals to `stdout`, then
    /// if anything failed, the failures-only report to `stderr`.
    pub fn write_summary(
        &self,
        results: &MultiProjectResults,
        mut stdout: impl Write,
        mut stderr: impl Write,
    ) -> io::Result<()> {
        for project in results.projects() {
            self.write_project(project, false, &mut stdout)?;
        }
        writeln!(stdout)?;
        if results.projects_passed() > 0 {
            writeln!(
                stdout,
                "[ {} ] {} tests in {} projects.",
                format!("{:^8}", "PASSED").style(self.styles.pass),
                results.tests_passed().style(self.styles.count),
                results.projects_passed().style(self.styles.count)
            )?;
        }
        if results.passed() {
            return stdout.flush();
        }

        self.write_failure_totals(results, &mut stdout)?;
        stdout.flush()?;

        for project in results.projects() {
            self.write_project(project, true, &mut stderr)?;
        }
        writeln!(stderr)?;
        self.write_failure_totals(results, &mut stderr)?;
        stderr.flush()
    }

    fn write_failure_totals(
        &self,
        results: &MultiProjectResults,
        mut writer: impl Write,
    ) -> io::Result<()> {
        let failed_label = format!("{:^8}", "FAILED");
        for project in results.build_failures() {
            writeln!(
                writer,
                "[ {} ] build of {project}",
                failed_label.style(self.styles.fail)
            )?;
        }
        if results.projects_failed() > 0 {
            writeln!(
                writer,
                "[ {} ] {} tests in {} projects.",
                failed_label.style(self.styles.fail),
                results.tests_failed().style(self.styles.count),
                results.projects_failed().style(self.styles.count)
            )?;
            writeln!(
                writer,
                "Projects with failing tests: {}",
                results.failed_projects().join(", ")
            )?;
        }
        Ok(())
    }
}
