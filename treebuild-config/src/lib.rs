// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The build-config language used by treebuild.
//!
//! A build config is a single expression written against a fixed set of builder functions
//! (`build`, `testmap`, `porttest`, ...). Evaluating a config and everything it includes
//! produces a [`BuildConfig`]: a table of projects, each with a build flag, an ordered test list
//! and build dependencies, plus a global list of [`DistEntry`] archive instructions.
//!
//! The language is deliberately not a general-purpose scripting surface: the parser accepts only
//! literals, calls to the enumerated [`Builder`]s and the chained `.needs(...)` method.

mod config;
mod deps;
pub mod errors;
mod flags;
mod interpreter;
mod parsing;
mod test_def;
mod value;

pub use config::{BuildConfig, ConfigOptions, DistEntry, Project};
pub use flags::{CapabilityFlags, matches};
pub use parsing::Builder;
pub use test_def::{
    AndroidTestOptions, CompositeTest, DeviceTest, HostTest, PortTest, TEST_CONTROL_BINARY,
    TestDef,
};
