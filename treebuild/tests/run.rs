// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use clap::Parser;
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    io,
    rc::Rc,
};
use treebuild::{Backends, TreebuildApp, TreebuildExitCode};
use treebuild_runner::{
    build::ProjectBuilder,
    environment::{EnvironmentDriver, EnvironmentModule, RunnerOptions},
    errors::{BuildError, EnvironmentError},
    host::HostExecutor,
};

const CONFIG: &str = indoc! {r#"
    # Two projects, one with device tests and one with host tests.
    [
        build(["qemu", "arm64"]),
        testmap(["qemu"], tests=[
            porttest("com.android.ipc"),
            porttest("com.android.storage"),
            porttest("com.android.slow", enabled=False),
        ]),
        testmap(["arm64"], tests=[hosttest("storage_test")]),
    ]
"#};

/// Exit statuses handed out per test, keyed by the last element of the test's command line.
/// Tests without a scripted status pass.
#[derive(Clone, Default)]
struct Script {
    statuses: Rc<RefCell<BTreeMap<String, VecDeque<i32>>>>,
    runs: Rc<RefCell<Vec<String>>>,
}

impl Script {
    fn fail(&self, key: &str, statuses: &[i32]) {
        self.statuses
            .borrow_mut()
            .insert(key.to_owned(), statuses.iter().copied().collect());
    }

    fn next(&self, argv: &[String]) -> i32 {
        let key = argv.last().cloned().unwrap_or_default();
        self.runs.borrow_mut().push(key.clone());
        self.statuses
            .borrow_mut()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0)
    }

    fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }
}

struct FakeDriver(Script);

struct FakeModule(Script);

impl EnvironmentDriver for FakeDriver {
    type Module = FakeModule;

    fn load(&mut self, _project_root: &Utf8Path) -> Result<FakeModule, EnvironmentError> {
        Ok(FakeModule(self.0.clone()))
    }
}

impl EnvironmentModule for FakeModule {
    type Runner = ();

    fn init(&mut self, _options: &RunnerOptions) -> Result<(), EnvironmentError> {
        Ok(())
    }

    fn run_test(&mut self, _runner: &mut (), argv: &[String]) -> Result<i32, EnvironmentError> {
        Ok(self.0.next(argv))
    }

    fn shutdown(&mut self, _runner: Option<()>) {}
}

struct FakeHost(Script);

impl HostExecutor for FakeHost {
    fn run(&mut self, _build_dir: &Utf8Path, argv: &[String]) -> io::Result<i32> {
        Ok(self.0.next(argv))
    }
}

struct FakeBuilder {
    fail: &'static [&'static str],
    built: Rc<RefCell<Vec<(String, String)>>>,
}

impl ProjectBuilder for FakeBuilder {
    fn build(&mut self, project: &str, build_id: &str) -> Result<bool, BuildError> {
        self.built
            .borrow_mut()
            .push((project.to_owned(), build_id.to_owned()));
        Ok(!self.fail.contains(&project))
    }
}

struct Tree {
    dir: Utf8TempDir,
}

impl Tree {
    fn new(config: &str) -> Self {
        let dir = Utf8TempDir::new().expect("created temp dir");
        fs_write(&dir.path().join("build-config"), config);
        Self { dir }
    }

    fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    fn build_root(&self) -> Utf8PathBuf {
        self.root().join("build-root")
    }
}

fn fs_write(path: &Utf8Path, contents: &str) {
    std::fs::create_dir_all(path.parent().expect("has parent")).expect("created dir");
    std::fs::write(path, contents).expect("wrote file");
}

struct Outcome {
    code: Result<i32, i32>,
    stdout: String,
    stderr: String,
}

fn run(tree: &Tree, args: &[&str], script: &Script, builder: Option<FakeBuilder>) -> Outcome {
    let mut argv = vec![
        "treebuild",
        "--color",
        "never",
        "--tree-root",
        tree.root().as_str(),
    ];
    argv.extend_from_slice(args);
    let app = TreebuildApp::try_parse_from(argv).expect("valid arguments");
    let output = app.init_output();

    let backends = Backends {
        environment: FakeDriver(script.clone()),
        host: FakeHost(script.clone()),
        builder: builder.map(|builder| Box::new(builder) as Box<dyn ProjectBuilder>),
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = app
        .exec_with(output, backends, &mut stdout, &mut stderr)
        .map_err(|error| error.process_exit_code());
    Outcome {
        code,
        stdout: String::from_utf8(stdout).expect("UTF-8 stdout"),
        stderr: String::from_utf8(stderr).expect("UTF-8 stderr"),
    }
}

#[test]
fn passing_run_with_flaky_test() {
    let tree = Tree::new(CONFIG);
    let script = Script::default();
    script.fail("com.android.storage", &[1]);

    let outcome = run(&tree, &["run", "--skip-build"], &script, None);
    assert_eq!(outcome.code, Ok(TreebuildExitCode::OK));
    assert_eq!(
        script.runs(),
        vec![
            "host_tests/storage_test",
            "com.android.ipc",
            "com.android.storage",
            "com.android.storage",
        ]
    );
    assert_eq!(
        outcome.stdout,
        indoc! {"

            Ran 1 tests for project arm64.
            [       OK ] host-test:storage_test
            [==========] 1 tests ran for project arm64.
            [  PASSED  ] 1 tests.

            Ran 2 tests for project qemu.
            [       OK ] com.android.ipc
            [       OK ] com.android.storage
            WARNING: com.android.storage was re-run and passed on second try; it may be flaky
            [==========] 2 tests ran for project qemu.
            [  PASSED  ] 2 tests.
            [  FLAKED  ] 1 tests.

            [  PASSED  ] 3 tests in 2 projects.
        "}
    );
    assert_eq!(outcome.stderr, "");
}

#[test]
fn failing_test() {
    let tree = Tree::new(CONFIG);
    let script = Script::default();
    script.fail("com.android.ipc", &[1, 1]);

    let outcome = run(
        &tree,
        &["run", "--skip-build", "qemu", "--run-disabled-tests"],
        &script,
        None,
    );
    assert_eq!(outcome.code, Ok(TreebuildExitCode::FAILED));
    assert_eq!(
        script.runs(),
        vec![
            "com.android.ipc",
            "com.android.ipc",
            "com.android.storage",
            "com.android.slow",
        ]
    );
    assert_eq!(
        outcome.stderr,
        indoc! {"

            Ran 3 tests for project qemu.
            [  FAILED  ] com.android.ipc
            [==========] 3 tests ran for project qemu.
            [  FAILED  ] 1 tests.

            [  FAILED  ] 1 tests in 1 projects.
            Projects with failing tests: qemu
        "}
    );
    assert!(
        outcome
            .stdout
            .ends_with("[  FAILED  ] 1 tests in 1 projects.\nProjects with failing tests: qemu\n"),
        "stdout ends with the failure totals:\n{}",
        outcome.stdout
    );
}

#[test]
fn test_filter_disables_retries() {
    let tree = Tree::new(CONFIG);
    let script = Script::default();
    script.fail("com.android.storage", &[1]);

    let outcome = run(
        &tree,
        &["run", "--skip-build", "--test", "storage"],
        &script,
        None,
    );
    assert_eq!(outcome.code, Ok(TreebuildExitCode::FAILED));
    assert_eq!(
        script.runs(),
        vec!["host_tests/storage_test", "com.android.storage"]
    );
}

#[test]
fn build_failure_skips_tests() {
    let tree = Tree::new(CONFIG);
    fs_write(&tree.build_root().join("build-arm64/lk.bin"), "lk");
    let script = Script::default();
    let built = Rc::new(RefCell::new(Vec::new()));
    let builder = FakeBuilder {
        fail: &["qemu"],
        built: built.clone(),
    };

    let outcome = run(
        &tree,
        &["run", "--buildid", "me@host-7"],
        &script,
        Some(builder),
    );
    assert_eq!(outcome.code, Ok(TreebuildExitCode::FAILED));
    assert_eq!(
        *built.borrow(),
        vec![
            ("arm64".to_owned(), "me@host-7".to_owned()),
            ("qemu".to_owned(), "me@host-7".to_owned()),
        ]
    );
    assert_eq!(script.runs(), vec!["host_tests/storage_test"]);
    assert!(
        tree.build_root().join("archive/arm64.lk.bin").is_file(),
        "arm64 artifacts were archived"
    );
    assert_eq!(
        outcome.stderr,
        indoc! {"

            [  FAILED  ] build of qemu
        "}
    );
}

#[test]
fn invalid_config() {
    let tree = Tree::new("[frobnicate()]");
    let outcome = run(&tree, &["run", "--skip-build"], &Script::default(), None);
    assert_eq!(outcome.code, Err(TreebuildExitCode::CONFIG_ERROR));
}

#[test]
fn unknown_skip_project() {
    let tree = Tree::new(CONFIG);
    let outcome = run(
        &tree,
        &["run", "--skip-build", "qemu", "--skip-project", "arm64"],
        &Script::default(),
        None,
    );
    assert_eq!(outcome.code, Err(TreebuildExitCode::CONFIG_ERROR));
}

#[test]
fn list_projects() {
    let tree = Tree::new(indoc! {r#"
        [
            build(["qemu", "arm64"]),
            build(["sim"], enabled=False),
            testmap(["qemu"], tests=[porttest("com.android.ipc")]),
        ]
    "#});
    let script = Script::default();

    let outcome = run(&tree, &["list-projects"], &script, None);
    assert_eq!(outcome.code, Ok(TreebuildExitCode::OK));
    assert_eq!(outcome.stdout, "arm64\nqemu\n");

    let outcome = run(&tree, &["list-projects", "--all", "--without-tests"], &script, None);
    assert_eq!(outcome.stdout, "arm64\nsim\n");

    let outcome = run(&tree, &["list-projects", "--disabled"], &script, None);
    assert_eq!(outcome.stdout, "sim\n");
}
