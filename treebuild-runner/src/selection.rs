// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Choosing which projects to build and test.

use crate::{errors::SelectionError, test_filter::TestFilter};
use tracing::debug;
use treebuild_config::BuildConfig;

/// Selects every buildable project.
pub const ALL_PROJECTS: &str = ".test.all";

/// Selects every buildable project that has tests.
pub const PROJECTS_WITH_TESTS: &str = ".test";

/// Expands `requested` into the ordered list of projects to build and test.
///
/// 1. [`ALL_PROJECTS`] and [`PROJECTS_WITH_TESTS`] are expanded. No names at all means
///    [`ALL_PROJECTS`].
/// 2. Every name in `skip` is removed. Naming a project that wasn't selected is an error.
/// 3. If `filter` has name patterns, only projects with a test that would run are kept.
/// 4. The result is expanded with build dependencies, dependencies first.
pub fn select_projects(
    config: &BuildConfig,
    requested: &[String],
    skip: &[String],
    filter: &TestFilter,
) -> Result<Vec<String>, SelectionError> {
    let mut projects = Vec::new();
    if requested.is_empty() {
        projects.extend(config.get_projects(Some(true), None));
    }
    for name in requested {
        match name.as_str() {
            ALL_PROJECTS => projects.extend(config.get_projects(Some(true), None)),
            PROJECTS_WITH_TESTS => projects.extend(config.get_projects(Some(true), Some(true))),
            name => projects.push(name),
        }
    }

    let unknown: Vec<_> = skip
        .iter()
        .filter(|name| !projects.contains(&name.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(SelectionError::UnknownSkipProject { names: unknown });
    }
    projects.retain(|project| !skip.iter().any(|name| name.as_str() == *project));

    if filter.has_patterns() {
        projects.retain(|project| {
            config
                .project(project)
                .is_some_and(|project| filter.matches_project(project))
        });
    }

    let order = config.build_order(projects)?;
    debug!(?order, "selected projects");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use treebuild_config::ConfigOptions;

    const CONFIG: &str = indoc! {r#"
        [
            build(["qemu", "arm64", "no-tests"]),
            build(["sim"], enabled=False),
            builddep(["qemu"], needs=["sim"]),
            testmap(["qemu"], tests=boottests([porttest("com.android.ipc")])),
            testmap(["arm64"], tests=[
                hosttest("storage_test"),
                porttest("com.android.storage", enabled=False),
            ]),
        ]
    "#};

    fn config() -> BuildConfig {
        BuildConfig::from_source("/tree/build-config", CONFIG, &ConfigOptions::default())
            .expect("valid config")
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test_case(&[], &[], &["arm64", "no-tests", "sim", "qemu"]; "default is all")]
    #[test_case(&[".test.all"], &[], &["arm64", "no-tests", "sim", "qemu"]; "all")]
    #[test_case(&[".test"], &[], &["arm64", "sim", "qemu"]; "with tests")]
    #[test_case(&[".test"], &["arm64"], &["sim", "qemu"]; "skip")]
    #[test_case(&["sim", "qemu"], &[], &["sim", "qemu"]; "explicit")]
    #[test_case(&["unknown"], &[], &["unknown"]; "unknown project is kept")]
    fn selection(requested: &[&str], skip: &[&str], expected: &[&str]) {
        let selected = select_projects(
            &config(),
            &strings(requested),
            &strings(skip),
            &TestFilter::default(),
        )
        .expect("valid selection");
        assert_eq!(selected, strings(expected));
    }

    #[test]
    fn unknown_skip_project() {
        let err = select_projects(
            &config(),
            &strings(&["qemu"]),
            &strings(&["arm64", "nope"]),
            &TestFilter::default(),
        )
        .expect_err("arm64 and nope were not selected");
        assert_eq!(
            err.to_string(),
            "unknown project passed to --skip-project: arm64, nope"
        );
    }

    #[test_case(&["ipc"], false, &["sim", "qemu"]; "matches port test")]
    #[test_case(&["storage"], false, &["arm64"]; "matches host test")]
    #[test_case(&["android.storage"], false, &[]; "disabled test")]
    #[test_case(&["android.storage"], true, &["arm64"]; "run disabled")]
    fn filtered(patterns: &[&str], run_disabled: bool, expected: &[&str]) {
        let filter = TestFilter::new(patterns, run_disabled).expect("valid patterns");
        let selected = select_projects(&config(), &[], &[], &filter).expect("valid selection");
        assert_eq!(selected, strings(expected));
    }
}
