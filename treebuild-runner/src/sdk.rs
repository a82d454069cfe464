// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembling the SDK directory from built projects.

use crate::{errors::SdkError, runner::project_root};
use camino::{Utf8Path, Utf8PathBuf};
use std::io;
use tracing::info;
use treebuild_config::BuildConfig;

/// Where SDK inputs are read from and where the SDK is written.
#[derive(Clone, Debug)]
pub struct SdkPaths {
    /// The source tree root. Relative signing key paths are resolved against it.
    pub tree_root: Utf8PathBuf,
    /// The build root.
    pub build_root: Utf8PathBuf,
    /// The archive directory the SDK is created in.
    pub archive_dir: Utf8PathBuf,
}

/// Lays out `<archive>/trusty_sdk-<build_id>/` for `projects` and returns its path.
pub fn assemble_sdk(
    paths: &SdkPaths,
    config: &BuildConfig,
    projects: &[String],
    build_id: &str,
) -> Result<Utf8PathBuf, SdkError> {
    let sdk_dir = paths.archive_dir.join(format!("trusty_sdk-{build_id}"));
    info!(%sdk_dir, "assembling SDK");
    lay_out(paths, config, projects, &sdk_dir).map_err(|error| SdkError::new(&sdk_dir, error))?;
    Ok(sdk_dir)
}

fn lay_out(
    paths: &SdkPaths,
    config: &BuildConfig,
    projects: &[String],
    sdk_dir: &Utf8Path,
) -> io::Result<()> {
    let tools_dir = sdk_dir.join("tools");
    fs_err::create_dir_all(&tools_dir)?;
    for project in projects {
        let build_dir = project_root(&paths.build_root, project);
        copy_dir_all(
            &build_dir.join("sdk/sysroot/usr"),
            &sdk_dir.join("sysroots").join(project).join("usr"),
        )?;
        fs_err::copy(build_dir.join("sdk/LICENSE"), sdk_dir.join("LICENSE"))?;
        for tool in ["host_tools/apploader_package_tool", "sdk/tools/manifest_compiler.py"] {
            copy_into(&build_dir.join(tool), &tools_dir)?;
        }
        for key in config.signing_keys(project) {
            copy_into(&paths.tree_root.join(key), &tools_dir)?;
        }
    }
    Ok(())
}

fn copy_into(src: &Utf8Path, dir: &Utf8Path) -> io::Result<()> {
    let file_name = src.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("`{src}` has no file name"),
        )
    })?;
    fs_err::copy(src, dir.join(file_name))?;
    Ok(())
}

fn copy_dir_all(src: &Utf8Path, dest: &Utf8Path) -> io::Result<()> {
    fs_err::create_dir_all(dest)?;
    for entry in src.read_dir_utf8()? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(entry.path(), &target)?;
        } else {
            fs_err::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use treebuild_config::ConfigOptions;

    fn touch(path: &Utf8Path) {
        fs_err::create_dir_all(path.parent().expect("has parent")).expect("created dir");
        fs_err::write(path, path.as_str()).expect("wrote file");
    }

    #[test]
    fn sdk_layout() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let tree_root = dir.path().to_owned();
        let build_root = tree_root.join("build-root");
        let build_dir = build_root.join("build-arm64");
        for file in [
            "sdk/sysroot/usr/include/trusty/ipc.h",
            "sdk/sysroot/usr/lib/libc.a",
            "sdk/LICENSE",
            "sdk/tools/manifest_compiler.py",
            "host_tools/apploader_package_tool",
        ] {
            touch(&build_dir.join(file));
        }
        touch(&tree_root.join("keys/dev_key.der"));

        let config = BuildConfig::from_source(
            tree_root.join("build-config"),
            r#"[build(["arm64"]), devsigningkeys(["keys/dev_key.der"])]"#,
            &ConfigOptions::default(),
        )
        .expect("valid config");
        let paths = SdkPaths {
            tree_root: tree_root.clone(),
            build_root,
            archive_dir: tree_root.join("archive"),
        };

        let sdk_dir =
            assemble_sdk(&paths, &config, &["arm64".to_owned()], "me@host-2").expect("assembled");
        assert_eq!(sdk_dir, tree_root.join("archive/trusty_sdk-me@host-2"));
        for file in [
            "sysroots/arm64/usr/include/trusty/ipc.h",
            "sysroots/arm64/usr/lib/libc.a",
            "LICENSE",
            "tools/apploader_package_tool",
            "tools/manifest_compiler.py",
            "tools/dev_key.der",
        ] {
            assert!(sdk_dir.join(file).is_file(), "{file} missing from SDK");
        }
    }

    #[test]
    fn missing_input() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let paths = SdkPaths {
            tree_root: dir.path().to_owned(),
            build_root: dir.path().join("build-root"),
            archive_dir: dir.path().join("archive"),
        };
        let err = assemble_sdk(&paths, &BuildConfig::default(), &["arm64".to_owned()], "1")
            .expect_err("project was never built");
        assert_eq!(
            err.to_string(),
            format!("failed to assemble SDK `{}`", dir.path().join("archive/trusty_sdk-1"))
        );
    }
}
