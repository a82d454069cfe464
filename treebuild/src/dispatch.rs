// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result, TreebuildExitCode},
    output::{OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Args, Parser, Subcommand};
use itertools::Itertools;
use std::{
    io::{self, Write},
    num::NonZeroUsize,
};
use tracing::{info, warn};
use treebuild_config::{BuildConfig, ConfigOptions, Project, TestDef};
use treebuild_runner::{
    archive::Archiver,
    build::{MakeBuilder, ProjectBuilder, build_projects},
    build_id::next_build_id,
    environment::{EnvironmentDriver, ProcessEnvironment},
    host::{HostExecutor, NiceHostExecutor},
    reporter::{MultiProjectResults, Reporter},
    runner::{EngineOptions, TestEngine},
    sdk::{SdkPaths, assemble_sdk},
    selection::select_projects,
    test_filter::TestFilter,
};

/// Build and test projects in a multi-project OS tree.
#[derive(Debug, Parser)]
#[command(
    version,
    bin_name = "treebuild",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100
)]
pub struct TreebuildApp {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Global options")]
struct GlobalOpts {
    /// Root of the source tree [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    tree_root: Option<Utf8PathBuf>,

    /// Build config to load [default: <tree-root>/build-config]
    #[arg(long, global = true, env = "TREEBUILD_CONFIG", value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    /// Android build to run Android tests against
    #[arg(long, global = true, value_name = "DIR")]
    android: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputOpts,
}

impl GlobalOpts {
    fn tree_root(&self) -> Result<Utf8PathBuf> {
        if let Some(tree_root) = &self.tree_root {
            return Ok(tree_root.clone());
        }
        let cwd = std::env::current_dir().map_err(|error| ExpectedError::CurrentDir { error })?;
        Utf8PathBuf::try_from(cwd).map_err(|error| ExpectedError::NonUtf8Path {
            path: error.into_path_buf(),
        })
    }

    fn load_config(&self, tree_root: &Utf8Path) -> Result<BuildConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| tree_root.join("build-config"));
        let options = ConfigOptions {
            android: self.android.clone(),
        };
        info!(%path, "loading build config");
        BuildConfig::from_file(&path, &options).map_err(ExpectedError::config)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build projects, archive their artifacts and run their tests
    ///
    /// With no projects, every buildable project is selected. The pseudo-projects `.test.all` and
    /// `.test` select every buildable project, and every buildable project with tests.
    Run(Box<RunOpts>),

    /// List projects in the build config
    ListProjects(ListProjectsOpts),

    /// Print projects, their build settings and their tests
    ShowConfig(ShowConfigOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Projects to build and test
    #[arg(value_name = "PROJECT")]
    projects: Vec<String>,

    /// Build output directory [default: <tree-root>/build-root]
    #[arg(long, env = "TREEBUILD_BUILD_ROOT", value_name = "DIR")]
    build_root: Option<Utf8PathBuf>,

    /// Directory to copy build artifacts into [default: <build-root>/archive]
    #[arg(long, value_name = "DIR")]
    archive: Option<Utf8PathBuf>,

    /// Build id to stamp builds with, instead of incrementing the build root's counter
    #[arg(long, value_name = "ID")]
    buildid: Option<String>,

    /// Number of build jobs [default: available parallelism]
    #[arg(long, short = 'j', env = "TREEBUILD_JOBS", value_name = "N")]
    jobs: Option<NonZeroUsize>,

    /// Only run tests whose names match this regex (can be repeated)
    #[arg(long = "test", value_name = "REGEX", action = ArgAction::Append)]
    tests: Vec<String>,

    /// Pass --verbose to the test environment
    #[arg(long, short, env = "TREEBUILD_VERBOSE")]
    verbose: bool,

    /// Wait for a debugger if a test fails. Disables retries
    #[arg(long)]
    debug_on_error: bool,

    /// Also run tests that are disabled by default
    #[arg(long)]
    run_disabled_tests: bool,

    /// Don't build, only run tests against existing build output
    #[arg(long)]
    skip_build: bool,

    /// Don't run tests
    #[arg(long)]
    skip_tests: bool,

    /// Leave out a selected project (can be repeated)
    #[arg(long, value_name = "PROJECT", action = ArgAction::Append)]
    skip_project: Vec<String>,

    /// Assemble an SDK directory in the archive directory
    #[arg(long)]
    sdk: bool,
}

#[derive(Debug, Args)]
struct ListProjectsOpts {
    /// Only list projects that have tests
    #[arg(long, conflicts_with = "without_tests")]
    with_tests: bool,

    /// Only list projects that have no tests
    #[arg(long)]
    without_tests: bool,

    /// List projects whether or not they're built by default
    #[arg(long, conflicts_with = "disabled")]
    all: bool,

    /// Only list projects that aren't built by default
    #[arg(long)]
    disabled: bool,
}

impl ListProjectsOpts {
    fn build_filter(&self) -> Option<bool> {
        if self.all {
            None
        } else {
            Some(!self.disabled)
        }
    }

    fn have_tests_filter(&self) -> Option<bool> {
        match (self.with_tests, self.without_tests) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Args)]
struct ShowConfigOpts {
    /// Projects to show [default: all]
    #[arg(value_name = "PROJECT")]
    projects: Vec<String>,
}

/// The external collaborators a run drives.
pub struct Backends<D, H> {
    /// The test environment driver.
    pub environment: D,
    /// The host test executor.
    pub host: H,
    /// The project builder. Defaults to `nice make` from the tree root.
    pub builder: Option<Box<dyn ProjectBuilder>>,
}

impl Default for Backends<ProcessEnvironment, NiceHostExecutor> {
    fn default() -> Self {
        Self {
            environment: ProcessEnvironment,
            host: NiceHostExecutor,
            builder: None,
        }
    }
}

impl TreebuildApp {
    /// Initializes logging and diagnostics, and returns the output context.
    pub fn init_output(&self) -> OutputContext {
        self.global.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        self.exec_with(output, Backends::default(), io::stdout(), io::stderr())
    }

    /// Executes the app against the given backends, writing reports to `stdout` and `stderr`.
    pub fn exec_with<D, H>(
        self,
        output: OutputContext,
        backends: Backends<D, H>,
        mut stdout: impl Write,
        stderr: impl Write,
    ) -> Result<i32>
    where
        D: EnvironmentDriver,
        H: HostExecutor,
    {
        let tree_root = self.global.tree_root()?;
        let config = self.global.load_config(&tree_root)?;
        match self.command {
            Command::Run(opts) => {
                let run = RunContext {
                    global: &self.global,
                    opts: &opts,
                    tree_root,
                    config: &config,
                };
                run.exec(output, backends, stdout, stderr)
            }
            Command::ListProjects(opts) => {
                for name in config.get_projects(opts.build_filter(), opts.have_tests_filter()) {
                    writeln!(stdout, "{name}").map_err(ExpectedError::write_output)?;
                }
                stdout.flush().map_err(ExpectedError::write_output)?;
                Ok(TreebuildExitCode::OK)
            }
            Command::ShowConfig(opts) => {
                show_config(&config, &opts.projects, &mut stdout)
                    .map_err(ExpectedError::write_output)?;
                Ok(TreebuildExitCode::OK)
            }
        }
    }
}

struct RunContext<'a> {
    global: &'a GlobalOpts,
    opts: &'a RunOpts,
    tree_root: Utf8PathBuf,
    config: &'a BuildConfig,
}

impl RunContext<'_> {
    fn exec<D, H>(
        self,
        output: OutputContext,
        backends: Backends<D, H>,
        stdout: impl Write,
        stderr: impl Write,
    ) -> Result<i32>
    where
        D: EnvironmentDriver,
        H: HostExecutor,
    {
        let opts = self.opts;
        let filter = TestFilter::new(&opts.tests, opts.run_disabled_tests)?;
        let projects = select_projects(self.config, &opts.projects, &opts.skip_project, &filter)?;
        let build_root = opts
            .build_root
            .clone()
            .unwrap_or_else(|| self.tree_root.join("build-root"));
        let archive_dir = opts
            .archive
            .clone()
            .unwrap_or_else(|| build_root.join("archive"));

        let build_id = if !opts.skip_build || opts.sdk {
            Some(match &opts.buildid {
                Some(build_id) => build_id.clone(),
                None => next_build_id(&build_root)?,
            })
        } else {
            None
        };

        let mut results = MultiProjectResults::new();
        let mut to_test = projects.clone();
        if let (false, Some(build_id)) = (opts.skip_build, &build_id) {
            let mut builder = backends.builder.unwrap_or_else(|| {
                Box::new(MakeBuilder::new(&self.tree_root, &build_root, self.jobs()))
            });
            let summary = build_projects(builder.as_mut(), &build_root, &projects, build_id)?;

            let archiver = Archiver::new(&build_root, &archive_dir);
            for project in &summary.succeeded {
                archiver.archive_project(project, self.config.dist())?;
            }
            for project in summary.failed {
                results.add_build_failure(project);
            }
            to_test = summary.succeeded;
        }

        if let (true, Some(build_id)) = (opts.sdk, &build_id) {
            let paths = SdkPaths {
                tree_root: self.tree_root.clone(),
                build_root: build_root.clone(),
                archive_dir: archive_dir.clone(),
            };
            let sdk_dir = assemble_sdk(&paths, self.config, &to_test, build_id)?;
            info!(%sdk_dir, "SDK assembled");
        }

        if opts.skip_tests {
            info!("skipping tests");
        } else {
            let options = EngineOptions {
                build_root,
                android: self.global.android.clone(),
                verbose: opts.verbose,
                debug_on_error: opts.debug_on_error,
            };
            let mut engine = TestEngine::new(
                self.config,
                &filter,
                options,
                backends.environment,
                backends.host,
            );
            for project in &to_test {
                if self.config.project(project).is_none() {
                    warn!(%project, "project is not in the build config");
                }
                results.add(engine.run_project(project)?);
            }
        }

        let mut reporter = Reporter::new();
        if output.color.should_colorize(supports_color::Stream::Stdout) {
            reporter.colorize();
        }
        reporter
            .write_summary(&results, stdout, stderr)
            .map_err(ExpectedError::write_output)?;

        if results.passed() {
            Ok(TreebuildExitCode::OK)
        } else {
            Ok(TreebuildExitCode::FAILED)
        }
    }

    fn jobs(&self) -> usize {
        self.opts
            .jobs
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }
}

fn show_config(
    config: &BuildConfig,
    projects: &[String],
    mut writer: impl Write,
) -> io::Result<()> {
    let selected: Vec<(&str, &Project)> = if projects.is_empty() {
        config.projects().collect()
    } else {
        projects
            .iter()
            .filter_map(|name| match config.project(name) {
                Some(project) => Some((name.as_str(), project)),
                None => {
                    warn!(project = %name, "project is not in the build config");
                    None
                }
            })
            .collect()
    };

    for (name, project) in selected {
        writeln!(
            writer,
            "{name} (build: {})",
            if project.build { "yes" } else { "no" }
        )?;
        if !project.also_build.is_empty() {
            writeln!(writer, "  also build: {}", project.also_build.iter().join(", "))?;
        }
        let keys = config.signing_keys(name);
        if !keys.is_empty() {
            writeln!(writer, "  signing keys: {}", keys.iter().join(", "))?;
        }
        if !project.tests.is_empty() {
            writeln!(writer, "  tests:")?;
            for test in &project.tests {
                write_test(test, 2, &mut writer)?;
            }
        }
    }
    writer.flush()
}

fn write_test(test: &TestDef, depth: usize, writer: &mut impl Write) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    write!(writer, "{indent}{}", test.kind_name())?;
    if !matches!(test, TestDef::Reboot) {
        write!(writer, " `{}`", test.name())?;
    }
    if !test.enabled() {
        write!(writer, " (disabled)")?;
    }
    if let Some(need) = test.need().filter(|need| !need.is_empty()) {
        write!(writer, " needs {need}")?;
    }
    writeln!(writer)?;

    let argv = match test {
        TestDef::Host(test) => Some(test.argv.clone()),
        TestDef::Port(test) => Some(test.boot_argv()),
        TestDef::Device(test) => Some(test.argv.clone()),
        TestDef::Composite(test) => {
            for step in test.sequence() {
                write_test(step, depth + 1, writer)?;
            }
            None
        }
        TestDef::Reboot => None,
    };
    if let Some(argv) = argv {
        writeln!(writer, "{indent}  argv: {}", shell_words::join(&argv))?;
    }
    Ok(())
}
