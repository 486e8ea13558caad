//! GC sweeper: classifies GC-root symlinks and drives engine collection.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::log;


/// Outcome of one pass over a GC directory.
#[derive(Debug, Default, PartialEq)]
pub struct Sweep {
    /// Symlinks whose target exists.
    pub active: Vec<PathBuf>,
    /// Dangling symlinks that were deleted.
    pub removed: Vec<PathBuf>,
}


/// Summary of `collect_garbage`.
#[derive(Debug, PartialEq)]
pub struct GcReport {
    pub active_before: usize,
    pub dangling_removed: usize,
    pub reclaimed: usize,
    pub elapsed: Duration,
}


/// Walk `root`, deleting dangling symlinks and collecting active ones.
///
/// Links are never followed: a symlink to a directory is classified like any
/// other link and its target is not descended into.
pub fn sweep(root: &Path) -> Result<Sweep> {
    std::fs::create_dir_all(root).map_err(|e| Error::file(root, e))?;
    let mut result = Sweep::default();

    for entry in WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.path_is_symlink() {
            continue;
        }
        let path = entry.into_path();
        // metadata() follows the link; failure means the target is gone
        if std::fs::metadata(&path).is_ok() {
            result.active.push(path);
        } else {
            std::fs::remove_file(&path).map_err(|e| Error::file(&path, e))?;
            result.removed.push(path);
        }
    }
    Ok(result)
}


/// Sweep the user GC directory, ask the engine to delete what the active
/// roots reference, then sweep again to count what disappeared.
pub fn collect_garbage(engine: &Engine) -> Result<GcReport> {
    let root = &engine.ctx().home_gc;
    let start = Instant::now();

    let before = log::task(
        &format!("Removing non-existing symlinks in {}", root.display()),
        || sweep(root),
    )?;
    info!("  Found {} active symlinks.", before.active.len());
    info!("  Deleted {} dangling symlinks.", before.removed.len());

    info!("Running garbage collection (this process may take some time) ...");
    if !before.active.is_empty() {
        let paths: Vec<String> = before
            .active
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        engine.store_delete(&paths)?;
    }

    let after = sweep(root)?;
    let elapsed = start.elapsed();
    let reclaimed = before.active.len().saturating_sub(after.active.len());
    info!(
        "Done. Successfully removed {} symlinks in {:.0} seconds.",
        reclaimed,
        elapsed.as_secs_f64()
    );

    Ok(GcReport {
        active_before: before.active.len(),
        dangling_removed: before.removed.len(),
        reclaimed,
        elapsed,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::infrastructure::MockRunner;
    use std::os::unix::fs::symlink;

    #[test]
    fn sweep_classifies_and_deletes_dangling() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gc");
        std::fs::create_dir_all(&root).unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, "x").unwrap();
        symlink(&target, root.join("valid")).unwrap();
        symlink(dir.path().join("missing"), root.join("broken")).unwrap();

        let s = sweep(&root).unwrap();
        assert_eq!(s.active, vec![root.join("valid")]);
        assert_eq!(s.removed, vec![root.join("broken")]);
        assert!(std::fs::symlink_metadata(root.join("broken")).is_err());
        assert!(root.join("valid").exists());
    }

    #[test]
    fn sweep_recurses_but_not_through_links() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gc");
        let nested = root.join("project");
        std::fs::create_dir_all(&nested).unwrap();

        // A linked directory holding a dangling link of its own.
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        symlink(dir.path().join("nowhere"), outside.join("inner-broken")).unwrap();
        symlink(&outside, nested.join("dir-link")).unwrap();
        std::fs::write(root.join("plain-file"), "").unwrap();

        let s = sweep(&root).unwrap();
        assert_eq!(s.active, vec![nested.join("dir-link")]);
        assert!(s.removed.is_empty());
        // the link inside the linked directory is untouched
        assert!(std::fs::symlink_metadata(outside.join("inner-broken")).is_ok());
    }

    #[test]
    fn sweep_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("gc");
        assert_eq!(sweep(&root).unwrap(), Sweep::default());
        assert!(root.is_dir());
    }

    #[test]
    fn collect_garbage_deletes_active_roots() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home-gc");
        std::fs::create_dir_all(&home).unwrap();
        let target = dir.path().join("store-path");
        std::fs::write(&target, "").unwrap();
        symlink(&target, home.join("1-shell")).unwrap();
        symlink(dir.path().join("gone"), home.join("2-ci")).unwrap();

        let ctx = Context::new(dir.path(), &home, dir.path());
        let runner = MockRunner::new();
        let report = collect_garbage(&Engine::new(&ctx, &runner)).unwrap();

        assert_eq!(report.active_before, 1);
        assert_eq!(report.dangling_removed, 1);
        // the mock engine deletes nothing, so the link survives
        assert_eq!(report.reclaimed, 0);
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].contains("store delete --recursive"));
        assert!(cmds[0].contains("1-shell"));
    }

    #[test]
    fn collect_garbage_skips_engine_when_nothing_active() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(dir.path(), &dir.path().join("gc"), dir.path());
        let runner = MockRunner::new();
        let report = collect_garbage(&Engine::new(&ctx, &runner)).unwrap();
        assert_eq!(report.active_before, 0);
        assert!(runner.executed_commands().is_empty());
    }
}
