// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Build ids stamped into build outputs.
//!
//! The build root holds a `BUILDID` file with a counter that is incremented for every build. The
//! id itself is `<user>@<host>-<counter>`.

use crate::errors::BuildIdError;
use camino::Utf8Path;
use tracing::debug;

/// The name of the counter file in the build root.
pub const BUILD_ID_FILE: &str = "BUILDID";

/// Increments the counter in `build_root` and returns a new build id.
pub fn next_build_id(build_root: &Utf8Path) -> Result<String, BuildIdError> {
    let counter = increment_counter(build_root)?;
    let user = whoami::username().map_err(BuildIdError::User)?;
    let host = nix::unistd::gethostname()
        .map_err(BuildIdError::Hostname)?
        .into_string()
        .map_err(BuildIdError::NonUtf8Hostname)?;
    Ok(format_build_id(&user, &host, counter))
}

/// Formats a build id.
pub fn format_build_id(user: &str, host: &str, counter: u64) -> String {
    format!("{user}@{host}-{counter}")
}

/// Increments the counter in `build_root`, creating it if necessary, and returns the new value.
///
/// A missing or unparseable counter file counts as 0.
pub fn increment_counter(build_root: &Utf8Path) -> Result<u64, BuildIdError> {
    let path = build_root.join(BUILD_ID_FILE);
    let current = match fs_err::read_to_string(&path) {
        Ok(contents) => contents.trim().parse::<u64>().unwrap_or_else(|_| {
            debug!(%path, "ignoring unparseable build id counter");
            0
        }),
        Err(_) => 0,
    };
    let next = current
        .checked_add(1)
        .ok_or_else(|| BuildIdError::CounterOverflow { path: path.clone() })?;

    fs_err::create_dir_all(build_root).map_err(BuildIdError::Write)?;
    fs_err::write(&path, next.to_string()).map_err(BuildIdError::Write)?;
    Ok(next)
}
