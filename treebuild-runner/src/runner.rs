// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test execution engine.
//!
//! [`TestEngine`] runs a project's tests one at a time. Host tests run directly on the host; all
//! other tests run against a test environment runner that is started lazily and reused until a
//! reboot, a retry or the end of the project.

use crate::{
    environment::{EnvironmentDriver, EnvironmentModule, RunnerOptions},
    errors::{EnvironmentError, RunTestsError},
    host::HostExecutor,
    reporter::TestResults,
    test_filter::TestFilter,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    borrow::Cow,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use treebuild_config::{BuildConfig, CompositeTest, TestDef};

/// The maximum number of retries in a single project's test run.
pub const MAX_RETRIES: usize = 4;

/// Options for a [`TestEngine`].
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    /// The build root. Each project's build output is in `<build_root>/build-<project>`.
    pub build_root: Utf8PathBuf,
    /// The Android build to run against.
    pub android: Option<Utf8PathBuf>,
    /// Verbose output from the test environment.
    pub verbose: bool,
    /// Wait for a debugger to attach if a test fails. Disables retries.
    pub debug_on_error: bool,
}

enum Invocation<'t> {
    Host(&'t [String]),
    Environment(Cow<'t, [String]>),
}

type RunnerOf<D> = <<D as EnvironmentDriver>::Module as EnvironmentModule>::Runner;

struct LoadedModule<M> {
    project_root: Utf8PathBuf,
    module: M,
}

/// Runs tests for projects in a build config.
pub struct TestEngine<'a, D: EnvironmentDriver, H> {
    config: &'a BuildConfig,
    filter: &'a TestFilter,
    options: EngineOptions,
    driver: D,
    host: H,
    // Kept across projects, and reloaded when the project changes.
    module: Option<LoadedModule<D::Module>>,
}

// State for a single project's run.
struct ExecutionContext<'p, R> {
    project: &'p str,
    project_root: Utf8PathBuf,
    runner: Option<R>,
    retry_enabled: bool,
    retried: usize,
    results: TestResults,
}

impl<'a, D, H> TestEngine<'a, D, H>
where
    D: EnvironmentDriver,
    H: HostExecutor,
{
    /// Creates a new engine.
    pub fn new(
        config: &'a BuildConfig,
        filter: &'a TestFilter,
        options: EngineOptions,
        driver: D,
        host: H,
    ) -> Self {
        Self {
            config,
            filter,
            options,
            driver,
            host,
            module: None,
        }
    }

    /// The build output directory for `project`.
    pub fn project_root(&self, project: &str) -> Utf8PathBuf {
        project_root(&self.options.build_root, project)
    }

    /// Runs the tests of `project` selected by the filter.
    ///
    /// Test failures are recorded in the returned results. An error stops the project's run; any
    /// active runner is shut down before this returns either way.
    pub fn run_project(&mut self, project: &str) -> Result<TestResults, RunTestsError> {
        let mut cx = ExecutionContext {
            project,
            project_root: self.project_root(project),
            runner: None,
            retry_enabled: !self.filter.has_patterns() && !self.options.debug_on_error,
            retried: 0,
            results: TestResults::new(project),
        };

        let res = self.run_tests(&mut cx);
        self.shutdown_runner(&mut cx);
        res.map(|()| cx.results)
    }

    fn run_tests(
        &mut self,
        cx: &mut ExecutionContext<'_, RunnerOf<D>>,
    ) -> Result<(), RunTestsError> {
        let config = self.config;
        let Some(project) = config.project(cx.project) else {
            return Ok(());
        };
        for test in &project.tests {
            // A top-level reboot is a config error whether or not the filter selects it.
            if matches!(test, TestDef::Reboot) || self.filter.should_run(test) {
                self.run_test(cx, test, None, true)?;
            }
        }
        Ok(())
    }

    fn run_test(
        &mut self,
        cx: &mut ExecutionContext<'_, RunnerOf<D>>,
        test: &TestDef,
        parent: Option<&CompositeTest>,
        retry: bool,
    ) -> Result<i32, RunTestsError> {
        let (name, invocation) = match test {
            TestDef::Composite(composite) => return self.run_composite(cx, composite),
            TestDef::Reboot => {
                if parent.is_none() {
                    return Err(RunTestsError::MisplacedReboot {
                        project: cx.project.to_owned(),
                    });
                }
                self.shutdown_runner(cx);
                return Ok(0);
            }
            TestDef::Host(host) => (host.name.as_str(), Invocation::Host(&host.argv)),
            TestDef::Port(port) => (
                port.port.as_str(),
                Invocation::Environment(Cow::Owned(port.boot_argv())),
            ),
            TestDef::Device(device) => (
                device.name.as_str(),
                Invocation::Environment(Cow::Borrowed(&device.argv)),
            ),
        };

        info!("running {name} on {}", cx.project);
        let start = Instant::now();
        let status = match invocation {
            Invocation::Host(argv) => {
                debug!("command line: nice {}", shell_words::join(argv));
                self.host
                    .run(&cx.project_root, argv)
                    .map_err(|error| RunTestsError::HostTest {
                        project: cx.project.to_owned(),
                        name: name.to_owned(),
                        error,
                    })?
            }
            Invocation::Environment(argv) => {
                debug!("command line: {}", shell_words::join(argv.iter()));
                self.run_in_environment(cx, &argv)?
            }
        };
        let elapsed = start.elapsed();
        info!(
            "{name} returned {status} after {:.3} seconds",
            elapsed.as_secs_f64()
        );

        if status != 0 && retry && cx.retry_enabled && cx.retried < MAX_RETRIES {
            warn!(test = name, status, "test failed, retrying");
            self.shutdown_runner(cx);
            cx.retried += 1;
            return self.run_test(cx, test, parent, false);
        }

        cx.record(name, status, !retry, elapsed);
        Ok(status)
    }

    fn run_composite(
        &mut self,
        cx: &mut ExecutionContext<'_, RunnerOf<D>>,
        composite: &CompositeTest,
    ) -> Result<i32, RunTestsError> {
        for step in composite.sequence() {
            let status = self.run_test(cx, step, Some(composite), true)?;
            if status != 0 {
                return Ok(status);
            }
        }
        Ok(0)
    }

    fn run_in_environment(
        &mut self,
        cx: &mut ExecutionContext<'_, RunnerOf<D>>,
        argv: &[String],
    ) -> Result<i32, RunTestsError> {
        let options = RunnerOptions {
            android: self.options.android.clone(),
            disable_rpmb: argv.iter().any(|arg| arg == "--disable_rpmb"),
            verbose: self.options.verbose,
            debug_on_error: self.options.debug_on_error,
        };
        let project = cx.project;
        let wrap = |error: EnvironmentError| RunTestsError::Environment {
            project: project.to_owned(),
            error,
        };

        let module = self.load_module(&cx.project_root).map_err(wrap)?;
        let runner = match cx.runner.take() {
            Some(runner) => runner,
            None => module.init(&options).map_err(wrap)?,
        };
        let runner = cx.runner.insert(runner);
        module.run_test(runner, argv).map_err(wrap)
    }

    fn load_module(
        &mut self,
        project_root: &Utf8Path,
    ) -> Result<&mut D::Module, EnvironmentError> {
        let loaded = match self.module.take() {
            Some(loaded) if loaded.project_root.as_path() == project_root => loaded,
            _ => LoadedModule {
                module: self.driver.load(project_root)?,
                project_root: project_root.to_owned(),
            },
        };
        Ok(&mut self.module.insert(loaded).module)
    }

    // Leaves the module loaded. Safe to call without an active runner.
    fn shutdown_runner(&mut self, cx: &mut ExecutionContext<'_, RunnerOf<D>>) {
        if let Some(loaded) = &mut self.module {
            loaded.module.shutdown(cx.runner.take());
        }
    }
}

impl<R> ExecutionContext<'_, R> {
    fn record(&mut self, name: &str, status: i32, retried: bool, elapsed: Duration) {
        let passed = status == 0;
        if passed && retried {
            warn!(test = name, project = self.project, "passed on retry; it may be flaky");
        }
        self.results.add_result(name, passed, retried, elapsed);
    }
}

/// The build output directory for `project` under `build_root`.
pub fn project_root(build_root: &Utf8Path, project: &str) -> Utf8PathBuf {
    build_root.join(format!("build-{project}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{
        cell::RefCell,
        collections::{HashMap, VecDeque},
        io,
        rc::Rc,
    };
    use test_case::test_case;
    use treebuild_config::ConfigOptions;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Event {
        Load(String),
        Init(RunnerOptions),
        Run(Vec<String>),
        Shutdown(bool),
        Host(String, Vec<String>),
    }

    // Statuses are looked up by the last argument (port tests) or argv[0] (host tests); each
    // queue is consumed in order and defaults to 0 once empty.
    #[derive(Clone, Default)]
    struct Script {
        events: Rc<RefCell<Vec<Event>>>,
        statuses: Rc<RefCell<HashMap<String, VecDeque<i32>>>>,
        fail_init: bool,
    }

    impl Script {
        fn status(&self, key: &str, statuses: &[i32]) -> Self {
            self.statuses
                .borrow_mut()
                .insert(key.to_owned(), statuses.iter().copied().collect());
            self.clone()
        }

        fn next_status(&self, key: &str) -> i32 {
            self.statuses
                .borrow_mut()
                .get_mut(key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(0)
        }

        fn push(&self, event: Event) {
            self.events.borrow_mut().push(event);
        }

        fn events(&self) -> Vec<Event> {
            self.events.borrow().clone()
        }
    }

    struct FakeDriver(Script);
    struct FakeModule(Script);
    struct FakeRunner;

    impl EnvironmentDriver for FakeDriver {
        type Module = FakeModule;

        fn load(&mut self, project_root: &Utf8Path) -> Result<FakeModule, EnvironmentError> {
            self.0.push(Event::Load(project_root.to_string()));
            Ok(FakeModule(self.0.clone()))
        }
    }

    impl EnvironmentModule for FakeModule {
        type Runner = FakeRunner;

        fn init(&mut self, options: &RunnerOptions) -> Result<FakeRunner, EnvironmentError> {
            self.0.push(Event::Init(options.clone()));
            if self.0.fail_init {
                return Err(EnvironmentError::Init {
                    message: "emulator did not boot".to_owned(),
                });
            }
            Ok(FakeRunner)
        }

        fn run_test(
            &mut self,
            _runner: &mut FakeRunner,
            argv: &[String],
        ) -> Result<i32, EnvironmentError> {
            self.0.push(Event::Run(argv.to_vec()));
            let key = argv.last().map(String::as_str).unwrap_or_default();
            Ok(self.0.next_status(key))
        }

        fn shutdown(&mut self, runner: Option<FakeRunner>) {
            self.0.push(Event::Shutdown(runner.is_some()));
        }
    }

    struct FakeHost(Script);

    impl HostExecutor for FakeHost {
        fn run(&mut self, build_dir: &Utf8Path, argv: &[String]) -> io::Result<i32> {
            self.0
                .push(Event::Host(build_dir.to_string(), argv.to_vec()));
            Ok(self.0.next_status(&argv[0]))
        }
    }

    fn config(source: &str) -> BuildConfig {
        BuildConfig::from_source("/tree/build-config", source, &ConfigOptions::default())
            .expect("valid config")
    }

    fn options() -> EngineOptions {
        EngineOptions {
            build_root: "/out".into(),
            ..EngineOptions::default()
        }
    }

    fn run(
        config: &BuildConfig,
        filter: &TestFilter,
        options: EngineOptions,
        script: &Script,
        project: &str,
    ) -> Result<TestResults, RunTestsError> {
        let mut engine = TestEngine::new(
            config,
            filter,
            options,
            FakeDriver(script.clone()),
            FakeHost(script.clone()),
        );
        engine.run_project(project)
    }

    fn outcomes(results: &TestResults) -> Vec<(&str, bool, bool)> {
        results
            .results()
            .iter()
            .map(|result| (result.name.as_str(), result.passed, result.retried))
            .collect()
    }

    fn boot(port: &str) -> Vec<String> {
        ["run", "--headless", "--boot-test", port]
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    const TWO_PORTS: &str = indoc! {r#"
        testmap(["qemu"], tests=boottests([porttest("a"), porttest("b")]))
    "#};

    #[test]
    fn runner_is_shared_and_shut_down() {
        let config = config(TWO_PORTS);
        let script = Script::default();
        let results =
            run(&config, &TestFilter::default(), options(), &script, "qemu").expect("ran tests");

        assert_eq!(
            outcomes(&results),
            vec![("boot-test:a", true, false), ("boot-test:b", true, false)]
        );
        assert_eq!(
            script.events(),
            vec![
                Event::Load("/out/build-qemu".to_owned()),
                Event::Init(RunnerOptions::default()),
                Event::Run(boot("a")),
                Event::Run(boot("b")),
                Event::Shutdown(true),
            ]
        );
    }

    #[test]
    fn flaky_test_is_retried_once() {
        let config = config(TWO_PORTS);
        let script = Script::default().status("a", &[1, 0]);
        let results =
            run(&config, &TestFilter::default(), options(), &script, "qemu").expect("ran tests");

        assert_eq!(
            outcomes(&results),
            vec![("boot-test:a", true, true), ("boot-test:b", true, false)]
        );
        assert_eq!(results.flaked_count(), 1);
        assert_eq!(results.retried_count(), 1);
        assert_eq!(
            script.events(),
            vec![
                Event::Load("/out/build-qemu".to_owned()),
                Event::Init(RunnerOptions::default()),
                Event::Run(boot("a")),
                Event::Shutdown(true),
                Event::Init(RunnerOptions::default()),
                Event::Run(boot("a")),
                Event::Run(boot("b")),
                Event::Shutdown(true),
            ]
        );
    }

    #[test]
    fn retries_are_capped() {
        let config = config(indoc! {r#"
            testmap(["qemu"], tests=boottests([
                porttest("a"), porttest("b"), porttest("c"),
                porttest("d"), porttest("e"), porttest("f"),
            ]))
        "#});
        let script = Script::default();
        for port in ["a", "b", "c", "d", "e", "f"] {
            script.status(port, &[1, 1]);
        }
        let results =
            run(&config, &TestFilter::default(), options(), &script, "qemu").expect("ran tests");

        assert_eq!(
            outcomes(&results),
            vec![
                ("boot-test:a", false, true),
                ("boot-test:b", false, true),
                ("boot-test:c", false, true),
                ("boot-test:d", false, true),
                ("boot-test:e", false, false),
                ("boot-test:f", false, false),
            ]
        );
        let runs = script
            .events()
            .into_iter()
            .filter(|event| matches!(event, Event::Run(_)))
            .count();
        assert_eq!(runs, 6 + MAX_RETRIES);
    }

    #[test_case(TestFilter::new(["a"], false).unwrap(), false; "filtered")]
    #[test_case(TestFilter::default(), true; "debug on error")]
    fn retry_disabled(filter: TestFilter, debug_on_error: bool) {
        let config = config(TWO_PORTS);
        let script = Script::default().status("a", &[1, 0]);
        let engine_options = EngineOptions {
            debug_on_error,
            ..options()
        };
        let results = run(&config, &filter, engine_options, &script, "qemu").expect("ran tests");
        assert_eq!(results.results()[0].name, "boot-test:a");
        assert!(!results.results()[0].passed);
        assert_eq!(results.retried_count(), 0);
    }

    #[test]
    fn composite_fails_fast() {
        let config = config(indoc! {r#"
            testmap(["qemu"], tests=boottests([
                compositetest("seq", [porttest("a"), porttest("b"), porttest("c")]),
                porttest("after"),
            ]))
        "#});
        let script = Script::default().status("b", &[3, 3]);
        let results =
            run(&config, &TestFilter::default(), options(), &script, "qemu").expect("ran tests");

        assert_eq!(
            outcomes(&results),
            vec![
                ("boot-test:a", true, false),
                ("boot-test:b", false, true),
                ("boot-test:after", true, false),
            ]
        );
        assert!(!script.events().contains(&Event::Run(boot("c"))));
    }

    #[test]
    fn reboot_in_composite_restarts_runner() {
        let config = config(indoc! {r#"
            testmap(["qemu"], tests=boottests([
                compositetest("seq", [porttest("a"), reboot(), porttest("b")]),
            ]))
        "#});
        let script = Script::default();
        let results =
            run(&config, &TestFilter::default(), options(), &script, "qemu").expect("ran tests");

        assert_eq!(
            outcomes(&results),
            vec![("boot-test:a", true, false), ("boot-test:b", true, false)]
        );
        assert_eq!(
            script.events(),
            vec![
                Event::Load("/out/build-qemu".to_owned()),
                Event::Init(RunnerOptions::default()),
                Event::Run(boot("a")),
                Event::Shutdown(true),
                Event::Init(RunnerOptions::default()),
                Event::Run(boot("b")),
                Event::Shutdown(true),
            ]
        );
    }

    #[test]
    fn reboot_outside_composite_is_fatal() {
        let config = config(r#"testmap(["qemu"], tests=[boottests([porttest("a")]), reboot()])"#);
        let script = Script::default();
        let err = run(&config, &TestFilter::default(), options(), &script, "qemu")
            .expect_err("misplaced reboot");
        assert!(
            matches!(&err, RunTestsError::MisplacedReboot { project } if project == "qemu"),
            "unexpected error: {err:?}"
        );
        // The runner started for `a` is still shut down.
        assert_eq!(script.events().last(), Some(&Event::Shutdown(true)));
    }

    #[test]
    fn filtered_out_reboot_is_still_fatal() {
        let config = config(r#"testmap(["qemu"], tests=[boottests([porttest("a")]), reboot()])"#);
        let script = Script::default();
        let filter = TestFilter::new(["^boot-test:a$"], false).expect("valid filter");
        assert!(!filter.should_run(&TestDef::Reboot));

        let err = run(&config, &filter, options(), &script, "qemu").expect_err("misplaced reboot");
        assert!(
            matches!(&err, RunTestsError::MisplacedReboot { project } if project == "qemu"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn init_failure_stops_project() {
        let config = config(TWO_PORTS);
        let script = Script {
            fail_init: true,
            ..Script::default()
        };
        let err = run(&config, &TestFilter::default(), options(), &script, "qemu")
            .expect_err("init fails");
        assert!(
            matches!(&err, RunTestsError::Environment { project, .. } if project == "qemu"),
            "unexpected error: {err:?}"
        );
        assert_eq!(
            script.events(),
            vec![
                Event::Load("/out/build-qemu".to_owned()),
                Event::Init(RunnerOptions::default()),
                Event::Shutdown(false),
            ]
        );
    }

    #[test]
    fn host_tests_and_raw_port_tests() {
        let config = config(indoc! {r#"
            testmap(["qemu"], tests=[
                hosttest("binder_test -v"),
                porttest("com.android.raw", timeout=5),
            ])
        "#});
        let script = Script::default().status("host_tests/binder_test", &[2]);
        let filter = TestFilter::new(["binder|raw"], false).expect("valid filter");
        let results = run(&config, &filter, options(), &script, "qemu").expect("ran tests");

        assert_eq!(
            outcomes(&results),
            vec![
                ("host-test:binder_test -v", false, false),
                ("com.android.raw", true, false),
            ]
        );
        assert_eq!(
            script.events()[0],
            Event::Host(
                "/out/build-qemu".to_owned(),
                vec!["host_tests/binder_test".to_owned(), "-v".to_owned()]
            )
        );
        assert_eq!(
            script.events()[3],
            Event::Run(
                ["run", "--headless", "--boot-test", "com.android.raw", "--timeout", "5"]
                    .into_iter()
                    .map(str::to_owned)
                    .collect()
            )
        );
    }

    #[test]
    fn disabled_tests_and_runner_options() {
        let config = config(indoc! {r#"
            testmap(["qemu"], tests=[
                porttest("off", enabled=False),
                androidtest("rpmb", "true", runargs=["--disable_rpmb"]),
            ])
        "#});
        let script = Script::default();
        let engine_options = EngineOptions {
            android: Some("/android".into()),
            verbose: true,
            ..options()
        };
        let results = run(&config, &TestFilter::default(), engine_options, &script, "qemu")
            .expect("ran tests");
        assert_eq!(
            outcomes(&results),
            vec![("android-test:rpmb", true, false)]
        );
        assert_eq!(
            script.events()[1],
            Event::Init(RunnerOptions {
                android: Some("/android".into()),
                disable_rpmb: true,
                verbose: true,
                debug_on_error: false,
            })
        );

        let script = Script::default();
        let filter = TestFilter::new(Vec::<String>::new(), true).expect("valid filter");
        let results = run(&config, &filter, options(), &script, "qemu").expect("ran tests");
        assert_eq!(results.results().len(), 2);
    }

    #[test]
    fn module_reloaded_per_project() {
        let config = config(indoc! {r#"
            [
                testmap(["a", "b"], tests=boottests([porttest("x")])),
                testmap(["c"], tests=[hosttest("only_host")]),
            ]
        "#});
        let script = Script::default();
        let filter = TestFilter::default();
        let mut engine = TestEngine::new(
            &config,
            &filter,
            options(),
            FakeDriver(script.clone()),
            FakeHost(script.clone()),
        );
        for project in ["a", "a", "b", "c"] {
            engine.run_project(project).expect("ran tests");
        }

        let loads: Vec<_> = script
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Load(root) => Some(root),
                _ => None,
            })
            .collect();
        assert_eq!(loads, vec!["/out/build-a", "/out/build-b"]);
        // Project `c` starts no runner, but shutdown is still called.
        assert_eq!(script.events().last(), Some(&Event::Shutdown(false)));
    }

    #[test]
    fn unknown_project_has_no_results() {
        let config = config(TWO_PORTS);
        let script = Script::default();
        let results = run(&config, &TestFilter::default(), options(), &script, "missing")
            .expect("no tests to run");
        assert!(results.results().is_empty());
        assert!(script.events().is_empty());
    }
}
