//! Sandbox materialisation: lays a test's files out in a fresh directory.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

use crate::config::{self, Input};
use crate::environment::NIX_FILE;
use crate::error::{Error, Result};
use crate::testing::catalog::TestCase;


pub const TEST_SCRIPT: &str = ".test.sh";
pub const LOCAL_NIX_FILE: &str = "devkit.local.nix";

/// Utilities every sandbox gets on top of the test's own environment.
pub const LOCAL_NIX: &str = "{ pkgs, ... }: {\n  packages = [ pkgs.coreutils-full ];\n}\n";

/// Relative to the invocation root; present when devkit tests itself.
const LOCAL_MODULES: &str = "src/modules";


/// Fresh temporary directory named `<test>_<random>`.
pub fn create(test: &str) -> Result<TempDir> {
    Ok(tempfile::Builder::new()
        .prefix(&format!("{}_", test))
        .tempdir()?)
}


/// Populate `sandbox` with `test`'s files.
///
/// `invocation_root` is the project `devkit test` was run from; its
/// `src/modules` tree, when present, replaces the `devkit` input.
pub fn materialize(test: &TestCase, sandbox: &Path, invocation_root: &Path) -> Result<()> {
    match test.source_dir() {
        Some(src) => copy_tree(src, sandbox)?,
        None => {
            write_if_defined(&sandbox.join(NIX_FILE), test.nix.as_deref())?;
            write_if_defined(&sandbox.join(config::CONFIG_FILE), test.yaml.as_deref())?;
            let script = sandbox.join(TEST_SCRIPT);
            if write_if_defined(&script, test.test.as_deref())? {
                set_mode(&script, 0o755)?;
            }
        }
    }

    let local = sandbox.join(LOCAL_NIX_FILE);
    std::fs::write(&local, LOCAL_NIX).map_err(|e| Error::file(&local, e))?;

    let modules = invocation_root.join(LOCAL_MODULES);
    if modules.join("latest-version").exists() {
        info!("    Detected devkit module. Using src/modules for tests.");
        use_local_modules(sandbox, &modules)?;
    }
    Ok(())
}


/// Point the sandbox's `devkit` input at a local module tree.
fn use_local_modules(sandbox: &Path, modules: &Path) -> Result<()> {
    let yaml = sandbox.join(config::CONFIG_FILE);
    if !yaml.exists() {
        std::fs::write(&yaml, "inputs: {}\n").map_err(|e| Error::file(&yaml, e))?;
    }
    // copied sources may be read-only
    set_mode(&yaml, 0o644)?;

    let mut cfg = config::load(sandbox)?;
    cfg.inputs.insert(
        "devkit".into(),
        Input::new(&format!("path:{}", modules.display())),
    );
    config::save(sandbox, &cfg)
}


/// Copy `src` into `dst`, following symlinks. Files and directories keep
/// their mode; directories additionally gain `u+wx` and `a+x` once
/// everything is copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut dirs: Vec<(PathBuf, u32)> = Vec::new();
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::file(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::ConfigInvalid {
                file: entry.path().display().to_string(),
                message: format!("outside of {}", src.display()),
            })?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            let mode = entry
                .metadata()
                .map_err(|e| Error::file(entry.path(), e.into()))?
                .permissions()
                .mode();
            std::fs::create_dir_all(&target).map_err(|e| Error::file(&target, e))?;
            dirs.push((target, mode));
        } else {
            // fs::copy carries the permission bits along
            std::fs::copy(entry.path(), &target).map_err(|e| Error::file(&target, e))?;
        }
    }

    // deepest first, so a parent never loses write access too early
    for (dir, mode) in dirs.into_iter().rev() {
        set_mode(&dir, (mode & 0o7777) | 0o311)?;
    }
    Ok(())
}


fn write_if_defined(path: &Path, content: Option<&str>) -> Result<bool> {
    match content {
        Some(text) if !text.is_empty() => {
            std::fs::write(path, text).map_err(|e| Error::file(path, e))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}


fn set_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::file(path, e))
}
