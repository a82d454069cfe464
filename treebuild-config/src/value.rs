// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::DistEntry, errors::EvalErrorKind, flags::CapabilityFlags, test_def::TestDef,
};

/// The result of evaluating a config expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(u64),
    Str(String),
    /// Lists and tuples.
    List(Vec<Value>),
    Dict(Vec<(String, Value)>),
    Test(TestDef),
    Flags(CapabilityFlags),
    Dist(DistEntry),
}

impl Value {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "a bool",
            Self::Int(_) => "an integer",
            Self::Str(_) => "a string",
            Self::List(_) => "a list",
            Self::Dict(_) => "a dict",
            Self::Test(_) => "a test",
            Self::Flags(_) => "a capability flag set",
            Self::Dist(_) => "an archive entry",
        }
    }

    /// Flattens arbitrarily nested lists, preserving order. Non-list values become a single-item
    /// list.
    pub(crate) fn flatten(self) -> Vec<Value> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Value>) {
        match self {
            Self::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            other => out.push(other),
        }
    }

    fn mismatch(&self, what: String, expected: &'static str) -> EvalErrorKind {
        EvalErrorKind::TypeMismatch {
            what,
            expected,
            found: self.type_name(),
        }
    }

    pub(crate) fn into_str(self, name: &str) -> Result<String, EvalErrorKind> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(other.mismatch(format!("argument `{name}`"), "a string")),
        }
    }

    pub(crate) fn into_bool(self, name: &str) -> Result<bool, EvalErrorKind> {
        match self {
            Self::Bool(b) => Ok(b),
            other => Err(other.mismatch(format!("argument `{name}`"), "a bool")),
        }
    }

    pub(crate) fn into_u64(self, name: &str) -> Result<u64, EvalErrorKind> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(other.mismatch(format!("argument `{name}`"), "an integer")),
        }
    }

    pub(crate) fn into_flags(self, name: &str) -> Result<CapabilityFlags, EvalErrorKind> {
        match self {
            Self::Flags(flags) => Ok(flags),
            other => Err(other.mismatch(format!("argument `{name}`"), "a capability flag set")),
        }
    }

    pub(crate) fn into_dict(self, name: &str) -> Result<Vec<(String, Value)>, EvalErrorKind> {
        match self {
            Self::Dict(entries) => Ok(entries),
            other => Err(other.mismatch(format!("argument `{name}`"), "a dict")),
        }
    }

    /// A list of strings. A bare string is rejected rather than iterated character by character.
    pub(crate) fn into_str_list(self, name: &str) -> Result<Vec<String>, EvalErrorKind> {
        match self {
            Self::List(_) => self
                .flatten()
                .into_iter()
                .map(|item| match item {
                    Self::Str(s) => Ok(s),
                    other => Err(other.mismatch(format!("items of `{name}`"), "a string")),
                })
                .collect(),
            other => Err(other.mismatch(format!("argument `{name}`"), "a list of strings")),
        }
    }

    /// A flattened list of tests.
    pub(crate) fn into_tests(self, name: &str) -> Result<Vec<TestDef>, EvalErrorKind> {
        match self {
            Self::List(_) => self
                .flatten()
                .into_iter()
                .map(|item| match item {
                    Self::Test(test) => Ok(test),
                    other => Err(other.mismatch(format!("items of `{name}`"), "a test")),
                })
                .collect(),
            other => Err(other.mismatch(format!("argument `{name}`"), "a list of tests")),
        }
    }

    pub(crate) fn into_dist_list(self, name: &str) -> Result<Vec<DistEntry>, EvalErrorKind> {
        match self {
            Self::List(_) => self
                .flatten()
                .into_iter()
                .map(|item| match item {
                    Self::Dist(entry) => Ok(entry),
                    other => Err(other.mismatch(format!("items of `{name}`"), "an archive entry")),
                })
                .collect(),
            other => Err(other.mismatch(format!("argument `{name}`"), "a list of archive entries")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn s(value: &str) -> Value {
        Value::Str(value.to_owned())
    }

    #[test]
    fn flatten_preserves_order() {
        let value = Value::List(vec![
            s("a"),
            Value::List(vec![s("b"), Value::List(vec![]), Value::List(vec![s("c")])]),
            s("d"),
        ]);
        assert_eq!(value.flatten(), vec![s("a"), s("b"), s("c"), s("d")]);
        assert_eq!(Value::None.flatten(), vec![Value::None]);
    }

    #[test]
    fn str_list_rejects_bare_string() {
        let err = s("generic-arm64")
            .into_str_list("projects")
            .expect_err("bare strings are not lists");
        assert_eq!(
            err.to_string(),
            "argument `projects` must be a list of strings, found a string"
        );

        let err = Value::List(vec![s("a"), Value::Int(1)])
            .into_str_list("projects")
            .expect_err("ints are not strings");
        assert_eq!(
            err.to_string(),
            "items of `projects` must be a string, found an integer"
        );
    }
}
