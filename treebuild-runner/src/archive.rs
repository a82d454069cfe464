// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Copying build artifacts into the archive directory.
//!
//! Each artifact is copied from `<build-root>/build-<project>/<src>` to
//! `<archive>/<project>.<dest>`.

use crate::{errors::ArchiveError, runner::project_root};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};
use treebuild_config::DistEntry;

/// Artifacts archived for every project after the config's dist entries: (source, destination,
/// optional).
pub const STANDARD_ARTIFACTS: &[(&str, Option<&str>, bool)] = &[
    ("tos.img", None, true),
    ("monitor/monitor.bin", Some("monitor.bin"), true),
    ("trusty.padded", None, true),
    ("trusty.signed", None, true),
    ("trusty_usb.signed", None, true),
    ("lk.bin", None, false),
    ("trusty_qemu_package.zip", None, true),
    ("trusty_test_package.zip", None, true),
    (
        "host_tools/apploader_package_tool",
        Some("apploader_package_tool"),
        true,
    ),
];

/// Copies build artifacts into an archive directory.
#[derive(Clone, Debug)]
pub struct Archiver {
    build_root: Utf8PathBuf,
    archive_dir: Utf8PathBuf,
}

impl Archiver {
    /// Creates a new archiver.
    pub fn new(build_root: impl Into<Utf8PathBuf>, archive_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            build_root: build_root.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// The archive directory.
    pub fn archive_dir(&self) -> &Utf8Path {
        &self.archive_dir
    }

    /// Archives `dist` and then [`STANDARD_ARTIFACTS`] for `project`.
    pub fn archive_project(&self, project: &str, dist: &[DistEntry]) -> Result<(), ArchiveError> {
        fs_err::create_dir_all(&self.archive_dir).map_err(|error| ArchiveError::Io {
            project: project.to_owned(),
            error,
        })?;

        let standard = STANDARD_ARTIFACTS
            .iter()
            .map(|(src, dest, optional)| DistEntry {
                src: (*src).into(),
                dest: dest.map(Utf8PathBuf::from),
                optional: *optional,
            });
        for entry in dist.iter().cloned().chain(standard) {
            self.copy(project, &entry)?;
        }
        Ok(())
    }

    fn copy(&self, project: &str, entry: &DistEntry) -> Result<(), ArchiveError> {
        let src = project_root(&self.build_root, project).join(&entry.src);
        let dest = self.archive_dir.join(format!("{project}.{}", entry.dest()));
        if !src.exists() {
            if entry.optional {
                debug!(%src, "skipping missing optional artifact");
                return Ok(());
            }
            return Err(ArchiveError::MissingArtifact {
                project: project.to_owned(),
                path: src,
            });
        }

        info!("copy: {src} -> {dest}");
        fs_err::copy(&src, &dest).map_err(|error| ArchiveError::Io {
            project: project.to_owned(),
            error,
        })?;
        Ok(())
    }
}
