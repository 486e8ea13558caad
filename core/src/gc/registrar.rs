//! Artifact registrar: durable GC roots for build outputs.

use std::path::Path;

use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::infrastructure::lock::{acquire_lock, DEFAULT_LOCK_TIMEOUT_MS};


/// Register `store_path` as GC root `name`.
///
/// Creates the engine-level root `<gc>/<name>` and refreshes the user-scoped
/// symlink `<gc_project>-<name>` that `devkit gc` later sweeps.
pub fn register(engine: &Engine, name: &str, store_path: &str) -> Result<()> {
    let ctx = engine.ctx();
    std::fs::create_dir_all(&ctx.gc).map_err(|e| Error::file(&ctx.gc, e))?;
    engine.add_root(&ctx.gc.join(name), store_path)?;
    symlink_force(Path::new(store_path), &ctx.home_root(name))
}


/// Point `dst` at `src`, replacing whatever `dst` was.
///
/// Runs under `<dst>.lock` so a concurrent registration or sweep never sees a
/// half-replaced link.
pub fn symlink_force(src: &Path, dst: &Path) -> Result<()> {
    symlink_force_within(src, dst, DEFAULT_LOCK_TIMEOUT_MS)
}


pub fn symlink_force_within(src: &Path, dst: &Path, timeout_ms: u64) -> Result<()> {
    let mut lock_path = dst.as_os_str().to_owned();
    lock_path.push(".lock");
    let _guard = acquire_lock(Path::new(&lock_path), timeout_ms)?;

    match std::fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::file(dst, e)),
    }
    std::os::unix::fs::symlink(src, dst).map_err(|e| Error::file(dst, e))?;
    debug!("Linked {} -> {}", dst.display(), src.display());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::infrastructure::MockRunner;

    #[test]
    fn register_twice_keeps_one_link_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home-gc");
        let ctx = Context::new(&dir.path().join("proj"), &home, &dir.path().join("mods"));
        let runner = MockRunner::new();
        let engine = Engine::new(&ctx, &runner);

        register(&engine, "ci", "/nix/store/aaa-ci").unwrap();
        register(&engine, "ci", "/nix/store/bbb-ci").unwrap();

        let links: Vec<_> = std::fs::read_dir(&home)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with("-ci"))
            .collect();
        assert_eq!(links.len(), 1);
        assert_eq!(
            std::fs::read_link(links[0].path()).unwrap(),
            Path::new("/nix/store/bbb-ci")
        );

        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 2);
        assert!(cmds[1].contains("--add-root"));
        assert!(cmds[1].contains("/nix/store/bbb-ci"));
        assert!(ctx.gc.is_dir());
    }

    #[test]
    fn symlink_force_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("link");
        std::fs::write(&dst, "stale").unwrap();
        symlink_force(Path::new("/target"), &dst).unwrap();
        assert_eq!(std::fs::read_link(&dst).unwrap(), Path::new("/target"));
        // the lock file outlives the guard
        assert!(dir.path().join("link.lock").is_file());
    }

    #[test]
    fn symlink_force_times_out_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("link");
        let _held = acquire_lock(&dir.path().join("link.lock"), 1_000).unwrap();
        let err = symlink_force_within(Path::new("/target"), &dst, 150).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(std::fs::symlink_metadata(&dst).is_err());
    }
}
