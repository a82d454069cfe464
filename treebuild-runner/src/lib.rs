// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for treebuild: selecting projects, building and archiving them, and running
//! their tests.
//!
//! The main entry point for running tests is [`runner::TestEngine`], which walks each project's
//! test list against an [`environment::EnvironmentDriver`]. Results are collected into
//! [`reporter::MultiProjectResults`] and printed by a [`reporter::Reporter`].

pub mod archive;
pub mod build;
pub mod build_id;
pub mod environment;
pub mod errors;
pub mod host;
pub mod reporter;
pub mod runner;
pub mod sdk;
pub mod selection;
pub mod test_filter;
