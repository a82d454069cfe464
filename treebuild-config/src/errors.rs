// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while reading build configs.

use crate::flags::CapabilityFlags;
use camino::Utf8PathBuf;
use itertools::Itertools;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// A capability flag name outside the fixed vocabulary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown capability flag `{name}` (known flags: {})", CapabilityFlags::known_names().join(", "))]
pub struct UnknownCapabilityFlag {
    name: String,
}

impl UnknownCapabilityFlag {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The unrecognized name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An error returned by [`TestDef::set_needs`](crate::TestDef::set_needs).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NeedsError {
    /// The test variant has no settable need set.
    #[error("`needs` cannot be applied to a {kind}")]
    NotSupported {
        /// The kind of test.
        kind: &'static str,
    },

    /// A flag name was not recognized.
    #[error(transparent)]
    UnknownFlag(#[from] UnknownCapabilityFlag),
}

/// A step that isn't allowed inside a composite test.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("composite test sequences cannot contain a {kind}")]
pub struct InvalidCompositeStep {
    kind: &'static str,
}

impl InvalidCompositeStep {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

/// A single syntax error in a build config.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseSingleError {
    /// An identifier that is neither a literal keyword nor a builder.
    #[error("unknown identifier `{name}`")]
    UnknownIdentifier {
        /// The identifier.
        name: String,
        /// Where it occurred.
        span: SourceSpan,
    },

    /// A method other than `.needs`.
    #[error("unknown method `.{name}`")]
    UnknownMethod {
        /// The method name.
        name: String,
        /// Where it occurred.
        span: SourceSpan,
    },

    /// A builder named without being called.
    #[error("builder `{name}` must be called")]
    ExpectedCall {
        /// The builder name.
        name: String,
        /// Where it occurred.
        span: SourceSpan,
    },

    /// A string literal without a closing quote.
    #[error("unterminated string literal")]
    UnterminatedString(SourceSpan),

    /// An unknown backslash escape.
    #[error("invalid escape sequence")]
    InvalidEscape(SourceSpan),

    /// A list, tuple, dict or argument list that isn't separated or closed properly.
    #[error("expected `,` or `{close}`")]
    ExpectedSeparator {
        /// The closing delimiter.
        close: char,
        /// Where the separator was expected.
        span: SourceSpan,
    },

    /// Lists, tuples, dicts and argument lists nested deeper than the parser allows.
    #[error("expression nesting exceeds the maximum depth of {max}")]
    NestingTooDeep {
        /// The maximum nesting depth.
        max: usize,
        /// The opening delimiter that went over the limit.
        span: SourceSpan,
    },

    /// Any other syntax error.
    #[error("{message}")]
    Syntax {
        /// The message produced by the parser.
        message: String,
        /// Where parsing failed.
        span: SourceSpan,
    },
}

impl ParseSingleError {
    /// The location of the error in the source.
    pub fn span(&self) -> SourceSpan {
        match self {
            Self::UnknownIdentifier { span, .. }
            | Self::UnknownMethod { span, .. }
            | Self::ExpectedCall { span, .. }
            | Self::ExpectedSeparator { span, .. }
            | Self::NestingTooDeep { span, .. }
            | Self::Syntax { span, .. } => *span,
            Self::UnterminatedString(span) | Self::InvalidEscape(span) => *span,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::UnknownIdentifier { .. } => "not a builder".to_owned(),
            Self::UnknownMethod { .. } => "only `.needs(...)` is supported".to_owned(),
            Self::ExpectedCall { .. } => "missing argument list".to_owned(),
            Self::UnterminatedString(_) => "string starts here".to_owned(),
            Self::InvalidEscape(_) => "unknown escape".to_owned(),
            Self::ExpectedSeparator { close, .. } => format!("missing `,` or `{close}`"),
            Self::NestingTooDeep { .. } => "nested too deeply".to_owned(),
            Self::Syntax { .. } => "here".to_owned(),
        }
    }
}

/// A build config could not be parsed.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse build config `{path}`: {error}")]
pub struct ConfigParseError {
    path: Utf8PathBuf,
    #[source_code]
    source_code: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    label: String,
    error: ParseSingleError,
}

impl ConfigParseError {
    pub(crate) fn new(path: Utf8PathBuf, contents: String, error: ParseSingleError) -> Self {
        Self {
            source_code: NamedSource::new(path.as_str(), contents),
            span: error.span(),
            label: error.label(),
            path,
            error,
        }
    }

    /// The config file that failed to parse.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// The underlying syntax error.
    pub fn error(&self) -> &ParseSingleError {
        &self.error
    }
}

/// An error that occurred while evaluating a builder call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EvalErrorKind {
    /// Too many positional arguments.
    #[error("`{builder}` takes at most {max} positional arguments, {actual} given")]
    TooManyArguments {
        /// The builder.
        builder: &'static str,
        /// The number of parameters.
        max: usize,
        /// The number of positional arguments.
        actual: usize,
    },

    /// A keyword argument the builder doesn't accept.
    #[error("`{builder}` got an unexpected keyword argument `{name}`")]
    UnexpectedKeyword {
        /// The builder.
        builder: &'static str,
        /// The keyword.
        name: String,
    },

    /// An argument given both positionally and by keyword, or twice by keyword.
    #[error("`{builder}` got multiple values for argument `{name}`")]
    DuplicateArgument {
        /// The builder.
        builder: &'static str,
        /// The parameter.
        name: String,
    },

    /// A required argument is missing.
    #[error("`{builder}` is missing required argument `{name}`")]
    MissingArgument {
        /// The builder.
        builder: &'static str,
        /// The parameter.
        name: &'static str,
    },

    /// An argument has the wrong type.
    #[error("{what} must be {expected}, found {found}")]
    TypeMismatch {
        /// What was being checked, e.g. "argument `projects`".
        what: String,
        /// The expected type.
        expected: &'static str,
        /// The actual type.
        found: &'static str,
    },

    /// A capability flag name isn't recognized.
    #[error(transparent)]
    UnknownFlag(#[from] UnknownCapabilityFlag),

    /// `.needs` was applied to a test that doesn't support it.
    #[error(transparent)]
    Needs(NeedsError),

    /// A composite sequence contains a disallowed step.
    #[error(transparent)]
    InvalidCompositeStep(#[from] InvalidCompositeStep),

    /// A host test command couldn't be split into words.
    #[error("invalid host test command")]
    InvalidHostCommand(#[source] shell_words::ParseError),

    /// A non-optional include names a file that doesn't exist.
    #[error("included config `{path}` does not exist")]
    MissingInclude {
        /// The resolved include path.
        path: Utf8PathBuf,
    },

    /// A file includes itself, directly or indirectly.
    #[error("include cycle: {}", .cycle.iter().join(" -> "))]
    IncludeCycle {
        /// The include chain, starting and ending with the same file.
        cycle: Vec<Utf8PathBuf>,
    },
}

impl From<NeedsError> for EvalErrorKind {
    fn from(err: NeedsError) -> Self {
        match err {
            NeedsError::UnknownFlag(err) => Self::UnknownFlag(err),
            err @ NeedsError::NotSupported { .. } => Self::Needs(err),
        }
    }
}

/// A build config parsed, but evaluating it failed.
#[derive(Debug, Error, Diagnostic)]
#[error("error in build config `{path}`: {kind}")]
pub struct ConfigEvalError {
    path: Utf8PathBuf,
    #[source_code]
    source_code: NamedSource<String>,
    #[label("in this call")]
    span: SourceSpan,
    kind: EvalErrorKind,
}

impl ConfigEvalError {
    pub(crate) fn new(
        path: Utf8PathBuf,
        contents: String,
        span: SourceSpan,
        kind: EvalErrorKind,
    ) -> Self {
        Self {
            source_code: NamedSource::new(path.as_str(), contents),
            path,
            span,
            kind,
        }
    }

    /// The config file containing the failing call.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// The call that failed.
    pub fn span(&self) -> SourceSpan {
        self.span
    }

    /// What went wrong.
    pub fn kind(&self) -> &EvalErrorKind {
        &self.kind
    }
}

/// An error that occurred while loading a build config.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The root config file couldn't be read.
    #[error("failed to read build config `{path}`")]
    Read {
        /// The config path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A config file has a syntax error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(Box<ConfigParseError>),

    /// A builder call failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(Box<ConfigEvalError>),
}

impl From<ConfigParseError> for ConfigError {
    fn from(err: ConfigParseError) -> Self {
        Self::Parse(Box::new(err))
    }
}

impl From<ConfigEvalError> for ConfigError {
    fn from(err: ConfigEvalError) -> Self {
        Self::Eval(Box::new(err))
    }
}

/// Build dependencies form a cycle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("build dependency cycle: {}", .cycle.iter().join(" -> "))]
pub struct DependencyCycle {
    cycle: Vec<String>,
}

impl DependencyCycle {
    pub(crate) fn new(cycle: Vec<String>) -> Self {
        Self { cycle }
    }

    /// The projects in the cycle, starting and ending with the same project.
    pub fn cycle(&self) -> &[String] {
        &self.cycle
    }
}
