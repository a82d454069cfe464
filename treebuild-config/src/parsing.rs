// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing for build configs.
//!
//! The grammar is intentionally narrow: literals, lists, tuples, string-keyed dicts, calls to the
//! enumerated [`Builder`]s and the chained `.needs(...)` method. Nothing else is accepted, so a
//! config file can never name anything outside the builder namespace.
//!
//! All parsing functions report the first meaningful error into the parsing state and then cut,
//! so the caller gets a single labelled span rather than a generic backtrack.

use crate::errors::ParseSingleError;
use miette::SourceSpan;
use std::{cell::RefCell, fmt};
use winnow::{
    LocatingSlice, Parser,
    ascii::{digit1, multispace1},
    combinator::{alt, eof, opt, peek, repeat, trace},
    error::ErrMode,
    stream::{Location, Stream},
    token::{any, one_of, take_till, take_while},
};

mod string;

pub(crate) type Span<'a> = winnow::Stateful<LocatingSlice<&'a str>, State<'a>>;
type Error = ();
type PResult<T> = winnow::ModalResult<T, Error>;

/// The deepest that lists, tuples, dicts and argument lists may nest.
pub(crate) const MAX_NESTING_DEPTH: usize = 128;

#[derive(Clone, Debug)]
pub(crate) struct State<'a> {
    // A `RefCell` is required here because the state must implement `Clone` to work with winnow.
    errors: &'a RefCell<Vec<ParseSingleError>>,
    // Number of currently open delimiters.
    depth: usize,
}

impl<'a> State<'a> {
    fn new(errors: &'a RefCell<Vec<ParseSingleError>>) -> Self {
        Self { errors, depth: 0 }
    }

    fn report_error(&self, error: ParseSingleError) {
        self.errors.borrow_mut().push(error);
    }
}

fn new_span<'a>(input: &'a str, errors: &'a RefCell<Vec<ParseSingleError>>) -> Span<'a> {
    Span {
        input: LocatingSlice::new(input),
        state: State::new(errors),
    }
}

/// The builder functions a build config may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builder {
    /// `include(path, optional=False)`
    Include,
    /// `build(projects, enabled=True, dist=None)`
    Build,
    /// `builddep(projects, needs)`
    BuildDep,
    /// `archive(src, dest=None, optional=False)`
    Archive,
    /// `testmap(projects, tests=())`
    TestMap,
    /// `hosttest(host_cmd, enabled=True)`
    HostTest,
    /// `porttest(port, enabled=True, timeout=None)`
    PortTest,
    /// `compositetest(name, sequence, enabled=True)`
    CompositeTest,
    /// `porttestflags(**flags)`
    PortTestFlags,
    /// `hosttests(tests)`
    HostTests,
    /// `boottests(port_tests, provides=None)`
    BootTests,
    /// `androidporttests(port_tests, provides=None, nameprefix="", cmdargs=(), runargs=())`
    AndroidPortTests,
    /// `androidtest(name, command, enabled=True, nameprefix="", runargs=(), timeout=None)`
    AndroidTest,
    /// `needs(tests, **flags)`
    Needs,
    /// `reboot()`
    Reboot,
    /// `devsigningkeys(default_key_paths, project_overrides=None)`
    DevSigningKeys,
}

/// A formal parameter of a builder.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Param {
    pub(crate) name: &'static str,
    pub(crate) required: bool,
}

const fn required(name: &'static str) -> Param {
    Param {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> Param {
    Param {
        name,
        required: false,
    }
}

impl Builder {
    /// Every builder, in the order they're documented.
    pub const ALL: &'static [Builder] = &[
        Self::Include,
        Self::Build,
        Self::BuildDep,
        Self::Archive,
        Self::TestMap,
        Self::HostTest,
        Self::PortTest,
        Self::CompositeTest,
        Self::PortTestFlags,
        Self::HostTests,
        Self::BootTests,
        Self::AndroidPortTests,
        Self::AndroidTest,
        Self::Needs,
        Self::Reboot,
        Self::DevSigningKeys,
    ];

    /// Looks up a builder by the name used in config files.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|builder| builder.name() == name)
    }

    /// The name used in config files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Build => "build",
            Self::BuildDep => "builddep",
            Self::Archive => "archive",
            Self::TestMap => "testmap",
            Self::HostTest => "hosttest",
            Self::PortTest => "porttest",
            Self::CompositeTest => "compositetest",
            Self::PortTestFlags => "porttestflags",
            Self::HostTests => "hosttests",
            Self::BootTests => "boottests",
            Self::AndroidPortTests => "androidporttests",
            Self::AndroidTest => "androidtest",
            Self::Needs => "needs",
            Self::Reboot => "reboot",
            Self::DevSigningKeys => "devsigningkeys",
        }
    }

    pub(crate) fn params(self) -> &'static [Param] {
        const INCLUDE: &[Param] = &[required("path"), optional("optional")];
        const BUILD: &[Param] = &[required("projects"), optional("enabled"), optional("dist")];
        const BUILD_DEP: &[Param] = &[required("projects"), required("needs")];
        const ARCHIVE: &[Param] = &[required("src"), optional("dest"), optional("optional")];
        const TEST_MAP: &[Param] = &[required("projects"), optional("tests")];
        const HOST_TEST: &[Param] = &[required("host_cmd"), optional("enabled")];
        const PORT_TEST: &[Param] = &[required("port"), optional("enabled"), optional("timeout")];
        const COMPOSITE_TEST: &[Param] =
            &[required("name"), required("sequence"), optional("enabled")];
        const HOST_TESTS: &[Param] = &[required("tests")];
        const BOOT_TESTS: &[Param] = &[required("port_tests"), optional("provides")];
        const ANDROID_PORT_TESTS: &[Param] = &[
            required("port_tests"),
            optional("provides"),
            optional("nameprefix"),
            optional("cmdargs"),
            optional("runargs"),
        ];
        const ANDROID_TEST: &[Param] = &[
            required("name"),
            required("command"),
            optional("enabled"),
            optional("nameprefix"),
            optional("runargs"),
            optional("timeout"),
        ];
        const NEEDS: &[Param] = &[required("tests")];
        const DEV_SIGNING_KEYS: &[Param] = &[
            required("default_key_paths"),
            optional("project_overrides"),
        ];

        match self {
            Self::Include => INCLUDE,
            Self::Build => BUILD,
            Self::BuildDep => BUILD_DEP,
            Self::Archive => ARCHIVE,
            Self::TestMap => TEST_MAP,
            Self::HostTest => HOST_TEST,
            Self::PortTest => PORT_TEST,
            Self::CompositeTest => COMPOSITE_TEST,
            Self::PortTestFlags | Self::Reboot => &[],
            Self::HostTests => HOST_TESTS,
            Self::BootTests => BOOT_TESTS,
            Self::AndroidPortTests => ANDROID_PORT_TESTS,
            Self::AndroidTest => ANDROID_TEST,
            Self::Needs => NEEDS,
            Self::DevSigningKeys => DEV_SIGNING_KEYS,
        }
    }

    /// Whether unmatched keyword arguments are capability flags.
    pub(crate) fn takes_flag_kwargs(self) -> bool {
        matches!(self, Self::PortTestFlags | Self::Needs)
    }
}

impl fmt::Display for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed expression, with its location in the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Expr {
    pub(crate) kind: ExprKind,
    pub(crate) span: SourceSpan,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ExprKind {
    None,
    Bool(bool),
    Int(u64),
    Str(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(String, Expr)>),
    Call {
        builder: Builder,
        args: Vec<CallArg>,
    },
    Needs {
        receiver: Box<Expr>,
        args: Vec<CallArg>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CallArg {
    pub(crate) name: Option<String>,
    pub(crate) value: Expr,
}

/// Parses a whole config source into a single expression.
pub(crate) fn parse_config(input: &str) -> Result<Expr, ParseSingleError> {
    let errors = RefCell::new(Vec::new());
    let mut span = new_span(input, &errors);
    let result = parse_top_level.parse_next(&mut span);
    let offset = span.current_token_start();

    match result {
        Ok(expr) => Ok(expr),
        Err(_) => Err(errors
            .into_inner()
            .into_iter()
            .next()
            .unwrap_or_else(|| ParseSingleError::Syntax {
                message: "invalid syntax".to_owned(),
                span: (offset, 0).into(),
            })),
    }
}

fn parse_top_level(input: &mut Span<'_>) -> PResult<Expr> {
    trace("parse_top_level", |input: &mut Span<'_>| {
        let expr = parse_expr(input)?;
        trivia(input)?;
        if opt(eof).parse_next(input)?.is_none() {
            return cut_with(
                input,
                ParseSingleError::Syntax {
                    message: "expected end of config after the top-level expression".to_owned(),
                    span: (input.current_token_start(), 0).into(),
                },
            );
        }
        Ok(expr)
    })
    .parse_next(input)
}

fn cut_with<T>(input: &mut Span<'_>, error: ParseSingleError) -> PResult<T> {
    input.state.report_error(error);
    Err(ErrMode::Cut(()))
}

// Whitespace and `#` comments.
fn trivia(input: &mut Span<'_>) -> PResult<()> {
    () = repeat(
        0..,
        alt((
            multispace1.void(),
            ('#', take_till(0.., ['\n', '\r'])).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

fn ident<'i>(input: &mut Span<'i>) -> PResult<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn parse_expr(input: &mut Span<'_>) -> PResult<Expr> {
    trace("parse_expr", |input: &mut Span<'_>| {
        trivia(input)?;
        let start = input.current_token_start();
        let mut expr = parse_atom(input)?;

        loop {
            let checkpoint = input.checkpoint();
            trivia(input)?;
            if opt('.').parse_next(input)?.is_none() {
                input.reset(&checkpoint);
                break;
            }
            trivia(input)?;
            let method_start = input.current_token_start();
            let Some(method) = opt(ident).parse_next(input)? else {
                return cut_with(
                    input,
                    ParseSingleError::Syntax {
                        message: "expected a method name after `.`".to_owned(),
                        span: (method_start, 0).into(),
                    },
                );
            };
            let method_span = (method_start, method.len()).into();
            if method != "needs" {
                return cut_with(
                    input,
                    ParseSingleError::UnknownMethod {
                        name: method.to_owned(),
                        span: method_span,
                    },
                );
            }
            trivia(input)?;
            if opt('(').parse_next(input)?.is_none() {
                return cut_with(
                    input,
                    ParseSingleError::ExpectedCall {
                        name: method.to_owned(),
                        span: method_span,
                    },
                );
            }
            let args = parse_call_args(input)?;
            let end = input.previous_token_end();
            expr = Expr {
                kind: ExprKind::Needs {
                    receiver: Box::new(expr),
                    args,
                },
                span: (start, end - start).into(),
            };
        }

        Ok(expr)
    })
    .parse_next(input)
}

fn parse_atom(input: &mut Span<'_>) -> PResult<Expr> {
    let start = input.current_token_start();
    let Some(next) = opt(peek(any)).parse_next(input)? else {
        return cut_with(
            input,
            ParseSingleError::Syntax {
                message: "unexpected end of config, expected an expression".to_owned(),
                span: (start, 0).into(),
            },
        );
    };

    let kind = match next {
        '"' | '\'' => ExprKind::Str(string::parse_string(input)?),
        '0'..='9' => ExprKind::Int(parse_int(input)?),
        '[' => {
            '['.parse_next(input)?;
            ExprKind::List(delimited_items(input, ']', parse_expr)?.0)
        }
        '{' => {
            '{'.parse_next(input)?;
            ExprKind::Dict(delimited_items(input, '}', parse_dict_entry)?.0)
        }
        '(' => return parse_parens(input),
        c if c.is_ascii_alphabetic() || c == '_' => return parse_name(input),
        c => {
            return cut_with(
                input,
                ParseSingleError::Syntax {
                    message: format!("unexpected character `{c}`, expected an expression"),
                    span: (start, c.len_utf8()).into(),
                },
            );
        }
    };

    let end = input.previous_token_end();
    Ok(Expr {
        kind,
        span: (start, end - start).into(),
    })
}

fn parse_int(input: &mut Span<'_>) -> PResult<u64> {
    let start = input.current_token_start();
    let digits = digit1.parse_next(input)?;
    match digits.parse::<u64>() {
        Ok(value) => Ok(value),
        Err(_) => cut_with(
            input,
            ParseSingleError::Syntax {
                message: "integer literal is too large".to_owned(),
                span: (start, digits.len()).into(),
            },
        ),
    }
}

// A parenthesised expression is either a tuple or just grouping.
fn parse_parens(input: &mut Span<'_>) -> PResult<Expr> {
    let start = input.current_token_start();
    '('.parse_next(input)?;
    let (mut items, trailing_comma) = delimited_items(input, ')', parse_expr)?;
    if items.len() == 1 && !trailing_comma {
        if let Some(expr) = items.pop() {
            return Ok(expr);
        }
    }
    let end = input.previous_token_end();
    Ok(Expr {
        kind: ExprKind::Tuple(items),
        span: (start, end - start).into(),
    })
}

fn parse_dict_entry(input: &mut Span<'_>) -> PResult<(String, Expr)> {
    trivia(input)?;
    let start = input.current_token_start();
    if opt(peek(one_of(['"', '\'']))).parse_next(input)?.is_none() {
        return cut_with(
            input,
            ParseSingleError::Syntax {
                message: "dict keys must be string literals".to_owned(),
                span: (start, 0).into(),
            },
        );
    }
    let key = string::parse_string(input)?;
    trivia(input)?;
    if opt(':').parse_next(input)?.is_none() {
        return cut_with(
            input,
            ParseSingleError::Syntax {
                message: "expected `:` after dict key".to_owned(),
                span: (input.current_token_start(), 0).into(),
            },
        );
    }
    let value = parse_expr(input)?;
    Ok((key, value))
}

fn parse_name(input: &mut Span<'_>) -> PResult<Expr> {
    let start = input.current_token_start();
    let name = ident(input)?;
    let span: SourceSpan = (start, name.len()).into();

    let kind = match name {
        "True" => ExprKind::Bool(true),
        "False" => ExprKind::Bool(false),
        "None" => ExprKind::None,
        _ => {
            let Some(builder) = Builder::from_name(name) else {
                return cut_with(
                    input,
                    ParseSingleError::UnknownIdentifier {
                        name: name.to_owned(),
                        span,
                    },
                );
            };
            trivia(input)?;
            if opt('(').parse_next(input)?.is_none() {
                return cut_with(
                    input,
                    ParseSingleError::ExpectedCall {
                        name: name.to_owned(),
                        span,
                    },
                );
            }
            let args = parse_call_args(input)?;
            let end = input.previous_token_end();
            return Ok(Expr {
                kind: ExprKind::Call { builder, args },
                span: (start, end - start).into(),
            });
        }
    };

    Ok(Expr { kind, span })
}

// Expects the opening parenthesis to have been consumed.
fn parse_call_args(input: &mut Span<'_>) -> PResult<Vec<CallArg>> {
    let (args, _) = delimited_items(input, ')', parse_call_arg)?;

    let mut seen_keyword = false;
    for arg in &args {
        match arg.name {
            Some(_) => seen_keyword = true,
            None if seen_keyword => {
                return cut_with(
                    input,
                    ParseSingleError::Syntax {
                        message: "positional argument follows keyword argument".to_owned(),
                        span: arg.value.span,
                    },
                );
            }
            None => {}
        }
    }

    Ok(args)
}

fn parse_call_arg(input: &mut Span<'_>) -> PResult<CallArg> {
    trivia(input)?;
    let checkpoint = input.checkpoint();
    if let Some(name) = opt(ident).parse_next(input)? {
        trivia(input)?;
        if opt('=').parse_next(input)?.is_some() {
            let value = parse_expr(input)?;
            return Ok(CallArg {
                name: Some(name.to_owned()),
                value,
            });
        }
        input.reset(&checkpoint);
    }

    Ok(CallArg {
        name: None,
        value: parse_expr(input)?,
    })
}

/// Parses comma-separated items up to and including `close`. The opening delimiter must already
/// have been consumed.
///
/// Returns the items and whether the last item was followed by a comma.
fn delimited_items<'i, T>(
    input: &mut Span<'i>,
    close: char,
    item: impl FnMut(&mut Span<'i>) -> PResult<T>,
) -> PResult<(Vec<T>, bool)> {
    if input.state.depth >= MAX_NESTING_DEPTH {
        let open = input.previous_token_end().saturating_sub(1);
        return cut_with(
            input,
            ParseSingleError::NestingTooDeep {
                max: MAX_NESTING_DEPTH,
                span: (open, 1).into(),
            },
        );
    }

    input.state.depth += 1;
    let result = delimited_items_inner(input, close, item);
    input.state.depth -= 1;
    result
}

fn delimited_items_inner<'i, T>(
    input: &mut Span<'i>,
    close: char,
    mut item: impl FnMut(&mut Span<'i>) -> PResult<T>,
) -> PResult<(Vec<T>, bool)> {
    let mut items = Vec::new();
    trivia(input)?;
    if opt(close).parse_next(input)?.is_some() {
        return Ok((items, false));
    }

    loop {
        items.push(item(input)?);
        trivia(input)?;
        if opt(close).parse_next(input)?.is_some() {
            return Ok((items, false));
        }
        if opt(',').parse_next(input)?.is_none() {
            return cut_with(
                input,
                ParseSingleError::ExpectedSeparator {
                    close,
                    span: (input.current_token_start(), 0).into(),
                },
            );
        }
        trivia(input)?;
        if opt(close).parse_next(input)?.is_some() {
            return Ok((items, true));
        }
    }
}
