// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Evaluation of parsed build configs.

use crate::{
    config::{BuildConfig, ConfigOptions, DistEntry},
    errors::{ConfigError, ConfigEvalError, ConfigParseError, EvalErrorKind},
    flags::CapabilityFlags,
    parsing::{Builder, CallArg, Expr, ExprKind, parse_config},
    test_def::{AndroidTestOptions, CompositeTest, DeviceTest, HostTest, PortTest, TestDef},
    value::Value,
};
use camino::{Utf8Path, Utf8PathBuf};
use miette::SourceSpan;
use tracing::debug;

/// Loads config files into a [`BuildConfig`], following includes.
pub(crate) struct ConfigLoader<'c> {
    config: &'c mut BuildConfig,
    options: &'c ConfigOptions,
    // Canonical paths of the files currently being evaluated, outermost first.
    include_stack: Vec<Utf8PathBuf>,
}

impl<'c> ConfigLoader<'c> {
    pub(crate) fn new(config: &'c mut BuildConfig, options: &'c ConfigOptions) -> Self {
        Self {
            config,
            options,
            include_stack: Vec::new(),
        }
    }

    pub(crate) fn load_file(&mut self, path: &Utf8Path) -> Result<Vec<Value>, ConfigError> {
        let contents = fs_err::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_owned(),
            error,
        })?;
        self.load_source(path, contents)
    }

    pub(crate) fn load_source(
        &mut self,
        path: &Utf8Path,
        contents: String,
    ) -> Result<Vec<Value>, ConfigError> {
        debug!(%path, "reading config file");
        let expr = match parse_config(&contents) {
            Ok(expr) => expr,
            Err(error) => {
                return Err(ConfigParseError::new(path.to_owned(), contents, error).into());
            }
        };

        self.include_stack.push(canonical_key(path));
        let dir = path.parent().unwrap_or(Utf8Path::new(""));
        let result = Evaluator { loader: self, dir }.eval(&expr);
        self.include_stack.pop();

        match result {
            Ok(value) => Ok(value.flatten()),
            Err(EvalError::Call { span, kind }) => Err(ConfigEvalError::new(
                path.to_owned(),
                contents,
                span.unwrap_or_else(|| SourceSpan::from((0, 0))),
                kind,
            )
            .into()),
            Err(EvalError::Include(error)) => Err(*error),
        }
    }
}

fn canonical_key(path: &Utf8Path) -> Utf8PathBuf {
    path.canonicalize_utf8().unwrap_or_else(|_| path.to_owned())
}

enum EvalError {
    // The span is filled in by the innermost enclosing call.
    Call {
        span: Option<SourceSpan>,
        kind: EvalErrorKind,
    },
    // An included file failed; the error already carries that file's source.
    Include(Box<ConfigError>),
}

impl EvalError {
    fn at(span: SourceSpan, kind: EvalErrorKind) -> Self {
        Self::Call {
            span: Some(span),
            kind,
        }
    }

    fn or_span(self, span: SourceSpan) -> Self {
        match self {
            Self::Call { span: None, kind } => Self::at(span, kind),
            other => other,
        }
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        Self::Call { span: None, kind }
    }
}

struct Evaluator<'l, 'c> {
    loader: &'l mut ConfigLoader<'c>,
    dir: &'l Utf8Path,
}

impl Evaluator<'_, '_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::List(items) | ExprKind::Tuple(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<_, _>>()
                .map(Value::List),
            ExprKind::Dict(entries) => entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.eval(value)?)))
                .collect::<Result<_, _>>()
                .map(Value::Dict),
            ExprKind::Call { builder, args } => {
                let args = self.bind(*builder, args, expr.span)?;
                self.call(*builder, args)
                    .map_err(|error| error.or_span(expr.span))
            }
            ExprKind::Needs { receiver, args } => {
                let receiver = self.eval(receiver)?;
                let flags = self.bind_method_flags(args, expr.span)?;
                apply_needs(receiver, &flags).map_err(|kind| EvalError::at(expr.span, kind))
            }
        }
    }

    /// Matches arguments to parameters using Python call rules.
    fn bind(
        &mut self,
        builder: Builder,
        args: &[CallArg],
        span: SourceSpan,
    ) -> Result<BoundArgs, EvalError> {
        let params = builder.params();
        let mut values: Vec<Option<Value>> = vec![None; params.len()];
        let mut flags = Vec::new();

        let positional = args.iter().filter(|arg| arg.name.is_none()).count();
        if positional > params.len() {
            return Err(EvalError::at(
                span,
                EvalErrorKind::TooManyArguments {
                    builder: builder.name(),
                    max: params.len(),
                    actual: positional,
                },
            ));
        }

        // Positional arguments always precede keyword arguments.
        for (index, arg) in args.iter().enumerate() {
            let value = self.eval(&arg.value)?;
            let Some(name) = &arg.name else {
                values[index] = Some(value);
                continue;
            };

            if let Some(slot) = params.iter().position(|param| param.name == name) {
                if values[slot].is_some() {
                    return Err(EvalError::at(
                        span,
                        EvalErrorKind::DuplicateArgument {
                            builder: builder.name(),
                            name: name.clone(),
                        },
                    ));
                }
                values[slot] = Some(value);
            } else if builder.takes_flag_kwargs() {
                push_flag(&mut flags, builder, name, value)
                    .map_err(|kind| EvalError::at(span, kind))?;
            } else {
                return Err(EvalError::at(
                    span,
                    EvalErrorKind::UnexpectedKeyword {
                        builder: builder.name(),
                        name: name.clone(),
                    },
                ));
            }
        }

        if let Some((param, _)) = params
            .iter()
            .zip(&values)
            .find(|(param, value)| param.required && value.is_none())
        {
            return Err(EvalError::at(
                span,
                EvalErrorKind::MissingArgument {
                    builder: builder.name(),
                    name: param.name,
                },
            ));
        }

        Ok(BoundArgs {
            builder,
            values: params.iter().map(|param| param.name).zip(values).collect(),
            flags,
        })
    }

    // `.needs(...)` takes flag keywords only.
    fn bind_method_flags(
        &mut self,
        args: &[CallArg],
        span: SourceSpan,
    ) -> Result<Vec<(String, bool)>, EvalError> {
        let positional = args.iter().filter(|arg| arg.name.is_none()).count();
        if positional > 0 {
            return Err(EvalError::at(
                span,
                EvalErrorKind::TooManyArguments {
                    builder: Builder::Needs.name(),
                    max: 0,
                    actual: positional,
                },
            ));
        }

        let mut flags = Vec::new();
        for arg in args {
            let value = self.eval(&arg.value)?;
            if let Some(name) = &arg.name {
                push_flag(&mut flags, Builder::Needs, name, value)
                    .map_err(|kind| EvalError::at(span, kind))?;
            }
        }
        Ok(flags)
    }

    fn call(&mut self, builder: Builder, mut args: BoundArgs) -> Result<Value, EvalError> {
        let value = match builder {
            Builder::Include => {
                let path = args.required("path")?.into_str("path")?;
                let optional = args.bool_or("optional", false)?;
                return self.include(&path, optional);
            }
            Builder::Build => {
                let projects = args.required("projects")?.into_str_list("projects")?;
                let enabled = args.bool_or("enabled", true)?;
                let dist = match args.optional("dist") {
                    Some(dist) => dist.into_dist_list("dist")?,
                    None => Vec::new(),
                };
                let config = &mut *self.loader.config;
                for project in projects {
                    debug!(%project, enabled, "build");
                    config.project_mut(&project).build = enabled;
                }
                config.dist.extend(dist);
                Value::None
            }
            Builder::BuildDep => {
                let projects = args.required("projects")?.into_str_list("projects")?;
                let needs = args.required("needs")?.into_str_list("needs")?;
                let config = &mut *self.loader.config;
                for project in projects {
                    for dep in &needs {
                        debug!(%project, %dep, "builddep");
                        config.project_mut(dep);
                        config.project_mut(&project).also_build.insert(dep.clone());
                    }
                }
                Value::None
            }
            Builder::Archive => {
                let src = args.required("src")?.into_str("src")?;
                let dest = args.optional_str("dest")?;
                let optional = args.bool_or("optional", false)?;
                Value::Dist(DistEntry {
                    src: src.into(),
                    dest: dest.map(Into::into),
                    optional,
                })
            }
            Builder::TestMap => {
                let projects = args.required("projects")?.into_str_list("projects")?;
                let tests = match args.optional("tests") {
                    Some(tests) => tests.into_tests("tests")?,
                    None => Vec::new(),
                };
                for project in projects {
                    debug!(%project, count = tests.len(), "testmap");
                    self.loader
                        .config
                        .project_mut(&project)
                        .tests
                        .extend(tests.iter().cloned());
                }
                Value::None
            }
            Builder::HostTest => {
                let cmd = args.required("host_cmd")?.into_str("host_cmd")?;
                let enabled = args.bool_or("enabled", true)?;
                let test =
                    HostTest::new(&cmd, enabled).map_err(EvalErrorKind::InvalidHostCommand)?;
                Value::Test(TestDef::Host(test))
            }
            Builder::PortTest => {
                let port = args.required("port")?.into_str("port")?;
                let enabled = args.bool_or("enabled", true)?;
                let timeout = args.optional_u64("timeout")?;
                Value::Test(TestDef::Port(PortTest::new(port, enabled, timeout)))
            }
            Builder::CompositeTest => {
                let name = args.required("name")?.into_str("name")?;
                let sequence = args.required("sequence")?.into_tests("sequence")?;
                let enabled = args.bool_or("enabled", true)?;
                let test = CompositeTest::new(name, sequence, enabled)
                    .map_err(EvalErrorKind::InvalidCompositeStep)?;
                Value::Test(TestDef::Composite(test))
            }
            Builder::PortTestFlags => {
                let flags = CapabilityFlags::from_pairs(
                    args.flags.iter().map(|(name, value)| (name.as_str(), *value)),
                )
                .map_err(EvalErrorKind::UnknownFlag)?;
                Value::Flags(flags)
            }
            Builder::HostTests => {
                let tests = args.required("tests")?.flatten();
                Value::List(
                    tests
                        .into_iter()
                        .filter(|test| matches!(test, Value::Test(TestDef::Host(_))))
                        .collect(),
                )
            }
            Builder::BootTests => {
                let port_tests = args.required("port_tests")?.flatten();
                let provides = args.flags_or(
                    "provides",
                    CapabilityFlags::STORAGE_BOOT | CapabilityFlags::SMP4,
                )?;
                let tests = port_tests
                    .into_iter()
                    .filter_map(|test| match test {
                        Value::Test(TestDef::Port(port)) if port.need.matches_provide(provides) => {
                            Some(TestDef::Device(port.to_boot_test()))
                        }
                        Value::Test(TestDef::Composite(composite))
                            if composite.need().matches_provide(provides) =>
                        {
                            Some(TestDef::Composite(composite.to_boot_test()))
                        }
                        _ => None,
                    })
                    .inspect(|test| debug!(name = test.name(), "boottests"))
                    .map(Value::Test)
                    .collect();
                Value::List(tests)
            }
            Builder::AndroidPortTests => {
                let port_tests = args.required("port_tests")?.flatten();
                let provides = args.flags_or("provides", CapabilityFlags::all())?;
                let nameprefix = args.optional_str("nameprefix")?.unwrap_or_default();
                let cmdargs = args.str_list_or_empty("cmdargs")?;
                let options = AndroidTestOptions {
                    nameprefix: format!("{nameprefix}android-port-test:"),
                    runargs: args.str_list_or_empty("runargs")?,
                    timeout: None,
                    android: self.loader.options.android.clone(),
                };
                let tests = port_tests
                    .into_iter()
                    .filter_map(|test| match test {
                        Value::Test(TestDef::Port(port)) if port.need.matches_provide(provides) => {
                            Some(TestDef::Device(port.to_android_test(&cmdargs, &options)))
                        }
                        Value::Test(TestDef::Composite(composite))
                            if composite.need().matches_provide(provides) =>
                        {
                            Some(TestDef::Composite(
                                composite.to_android_test(&cmdargs, &options),
                            ))
                        }
                        _ => None,
                    })
                    .inspect(|test| debug!(name = test.name(), "androidporttests"))
                    .map(Value::Test)
                    .collect();
                Value::List(tests)
            }
            Builder::AndroidTest => {
                let name = args.required("name")?.into_str("name")?;
                let command = args.required("command")?.into_str("command")?;
                let enabled = args.bool_or("enabled", true)?;
                let options = AndroidTestOptions {
                    nameprefix: args.optional_str("nameprefix")?.unwrap_or_default(),
                    runargs: args.str_list_or_empty("runargs")?,
                    timeout: args.optional_u64("timeout")?,
                    android: self.loader.options.android.clone(),
                };
                Value::Test(TestDef::Device(DeviceTest::android(
                    &name, command, enabled, &options,
                )))
            }
            Builder::Needs => {
                let tests = args.required("tests")?;
                apply_needs(tests, &args.flags)?
            }
            Builder::Reboot => Value::Test(TestDef::Reboot),
            Builder::DevSigningKeys => {
                let defaults = args
                    .required("default_key_paths")?
                    .into_str_list("default_key_paths")?;
                let overrides = match args.optional("project_overrides") {
                    Some(overrides) => overrides.into_dict("project_overrides")?,
                    None => Vec::new(),
                };
                let config = &mut *self.loader.config;
                config
                    .default_signing_keys
                    .extend(defaults.into_iter().map(Utf8PathBuf::from));
                for (project, keys) in overrides {
                    let keys = keys.into_str_list("project_overrides")?;
                    debug!(%project, ?keys, "devsigningkeys");
                    config
                        .project_mut(&project)
                        .signing_keys
                        .get_or_insert_with(Vec::new)
                        .extend(keys.into_iter().map(Utf8PathBuf::from));
                }
                Value::None
            }
        };
        Ok(value)
    }

    fn include(&mut self, path: &str, optional: bool) -> Result<Value, EvalError> {
        let path = Utf8Path::new(path);
        let resolved = if path.is_absolute() {
            path.to_owned()
        } else {
            self.dir.join(path)
        };

        if !resolved.exists() {
            if optional {
                debug!(path = %resolved, "skipping optional config file");
                return Ok(Value::List(Vec::new()));
            }
            return Err(EvalErrorKind::MissingInclude { path: resolved }.into());
        }

        let key = canonical_key(&resolved);
        let stack = &self.loader.include_stack;
        if let Some(pos) = stack.iter().position(|entry| *entry == key) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(key);
            return Err(EvalErrorKind::IncludeCycle { cycle }.into());
        }

        debug!(path = %resolved, optional, "include");
        self.loader
            .load_file(&resolved)
            .map(Value::List)
            .map_err(|error| EvalError::Include(Box::new(error)))
    }
}

fn push_flag(
    flags: &mut Vec<(String, bool)>,
    builder: Builder,
    name: &str,
    value: Value,
) -> Result<(), EvalErrorKind> {
    if flags.iter().any(|(flag, _)| flag == name) {
        return Err(EvalErrorKind::DuplicateArgument {
            builder: builder.name(),
            name: name.to_owned(),
        });
    }
    let value = value.into_bool(name)?;
    flags.push((name.to_owned(), value));
    Ok(())
}

/// Applies `needs` flags to a test or to every test in a (nested) list.
fn apply_needs(value: Value, flags: &[(String, bool)]) -> Result<Value, EvalErrorKind> {
    let flags: Vec<(&str, bool)> = flags
        .iter()
        .map(|(name, value)| (name.as_str(), *value))
        .collect();
    let set_needs = |mut test: TestDef| -> Result<Value, EvalErrorKind> {
        test.set_needs(&flags)?;
        Ok(Value::Test(test))
    };

    match value {
        Value::Test(test) => set_needs(test),
        Value::List(_) => value
            .into_tests("tests")?
            .into_iter()
            .map(set_needs)
            .collect::<Result<_, _>>()
            .map(Value::List),
        other => Err(EvalErrorKind::TypeMismatch {
            what: "argument `tests`".to_owned(),
            expected: "a test or a list of tests",
            found: other.type_name(),
        }),
    }
}

/// Arguments matched to a builder's parameters.
struct BoundArgs {
    builder: Builder,
    values: Vec<(&'static str, Option<Value>)>,
    flags: Vec<(String, bool)>,
}

impl BoundArgs {
    // Explicit `None` is treated the same as an omitted argument.
    fn optional(&mut self, name: &'static str) -> Option<Value> {
        self.values
            .iter_mut()
            .find(|(param, _)| *param == name)
            .and_then(|(_, value)| value.take())
            .filter(|value| !matches!(value, Value::None))
    }

    fn required(&mut self, name: &'static str) -> Result<Value, EvalErrorKind> {
        self.optional(name).ok_or(EvalErrorKind::MissingArgument {
            builder: self.builder.name(),
            name,
        })
    }

    fn bool_or(&mut self, name: &'static str, default: bool) -> Result<bool, EvalErrorKind> {
        self.optional(name)
            .map_or(Ok(default), |value| value.into_bool(name))
    }

    fn optional_str(&mut self, name: &'static str) -> Result<Option<String>, EvalErrorKind> {
        self.optional(name)
            .map(|value| value.into_str(name))
            .transpose()
    }

    fn optional_u64(&mut self, name: &'static str) -> Result<Option<u64>, EvalErrorKind> {
        self.optional(name)
            .map(|value| value.into_u64(name))
            .transpose()
    }

    fn str_list_or_empty(&mut self, name: &'static str) -> Result<Vec<String>, EvalErrorKind> {
        self.optional(name)
            .map_or(Ok(Vec::new()), |value| value.into_str_list(name))
    }

    fn flags_or(
        &mut self,
        name: &'static str,
        default: CapabilityFlags,
    ) -> Result<CapabilityFlags, EvalErrorKind> {
        self.optional(name)
            .map_or(Ok(default), |value| value.into_flags(name))
    }
}
