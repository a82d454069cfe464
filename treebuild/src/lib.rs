// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builds and tests the projects of a multi-project OS tree.
//!
//! Projects, their tests and their build dependencies are declared in a build config (see
//! [`treebuild_config`]). `treebuild run` selects projects, builds them, archives their
//! artifacts and runs their tests through [`treebuild_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, OutputContext, StderrStyles};
