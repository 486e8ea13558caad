//! Context: the explicit configuration every component receives.
//!
//! Built once by the CLI from global flags and the environment, then passed
//! by reference. Sandboxed operations derive a copy rooted at the sandbox
//! with `scoped_to`, so nothing depends on the process working directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};


/// Flags shared by every command, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct GlobalFlags {
    pub verbose: bool,
    pub nix_flags: Vec<String>,
    pub debugger: bool,
    pub system: Option<String>,
    pub offline: bool,
}


#[derive(Debug, Clone)]
pub struct Context {
    /// Project directory holding `devkit.nix` / `devkit.yaml`.
    pub root: PathBuf,
    /// `<root>/.devkit`
    pub dotfile: PathBuf,
    /// `<root>/.devkit/gc`, project-scoped GC roots.
    pub gc: PathBuf,
    /// User-scoped GC directory swept by `devkit gc`.
    pub home_gc: PathBuf,
    /// `<home_gc>/<invocation ms>`, prefix for this invocation's symlinks.
    pub gc_project: PathBuf,
    pub system: String,
    pub verbose: bool,
    /// Extra flags for every `nix` call, `--system` included.
    pub nix_flags: Vec<String>,
    /// Flags appended after the `nix` subcommand.
    pub command_flags: Vec<String>,
    /// Directory holding patched engine binaries (`$DEVKIT_NIX/bin`).
    pub nix_bin_dir: Option<PathBuf>,
    /// Module tree with `flake.tmpl.nix` and `latest-version`.
    pub modules_dir: PathBuf,
    /// The running devkit binary.
    pub exe: PathBuf,
}


impl Context {
    /// Minimal context with defaults; used directly by tests.
    pub fn new(root: &Path, home_gc: &Path, modules_dir: &Path) -> Context {
        let system = default_system();
        let dotfile = root.join(".devkit");
        Context {
            root: root.to_path_buf(),
            gc: dotfile.join("gc"),
            dotfile,
            home_gc: home_gc.to_path_buf(),
            gc_project: home_gc.join(invocation_stamp()),
            nix_flags: vec!["--system".into(), system.clone()],
            system,
            verbose: false,
            command_flags: Vec::new(),
            nix_bin_dir: None,
            modules_dir: modules_dir.to_path_buf(),
            exe: PathBuf::from("devkit"),
        }
    }

    /// Build the context for this invocation from flags and environment.
    ///
    /// Creates the user GC directory so later registrations can assume it.
    pub fn from_env(flags: &GlobalFlags) -> Result<Context> {
        let root = std::env::current_dir()?;
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("devkit"));
        let home_gc = resolve_data_dir().join("gc");
        std::fs::create_dir_all(&home_gc).map_err(|e| Error::file(&home_gc, e))?;

        let modules_dir = match std::env::var_os("DEVKIT_MODULES") {
            Some(dir) => PathBuf::from(dir),
            None => exe
                .parent()
                .map(|bin| bin.join("..").join("share").join("devkit").join("modules"))
                .unwrap_or_else(|| PathBuf::from("modules")),
        };

        let mut ctx = Context::new(&root, &home_gc, &modules_dir);
        ctx.exe = exe;
        ctx.verbose = flags.verbose;
        ctx.nix_bin_dir = std::env::var_os("DEVKIT_NIX").map(|dir| PathBuf::from(dir).join("bin"));
        ctx.apply_flags(flags);
        Ok(ctx)
    }

    /// Fold global flags into the engine flag lists.
    pub fn apply_flags(&mut self, flags: &GlobalFlags) {
        if let Some(system) = &flags.system {
            self.system = system.clone();
        }
        let mut nix_flags = flags.nix_flags.clone();
        nix_flags.push("--system".into());
        nix_flags.push(self.system.clone());
        if flags.offline {
            nix_flags.push("--offline".into());
        }
        self.nix_flags = nix_flags;
        if flags.debugger {
            // --ignore-try keeps the debugger out of unrelated caught errors
            self.command_flags = vec!["--debugger".into(), "--ignore-try".into()];
        }
    }

    /// Same invocation, rooted at another project directory.
    pub fn scoped_to(&self, root: &Path) -> Context {
        let dotfile = root.join(".devkit");
        Context {
            root: root.to_path_buf(),
            gc: dotfile.join("gc"),
            dotfile,
            ..self.clone()
        }
    }

    /// Environment passed to every child process.
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![
            ("DEVKIT_DIR".into(), self.dotfile.display().to_string()),
            ("DEVKIT_GC".into(), self.gc.display().to_string()),
        ]
    }

    /// Command name for an engine tool, honouring `DEVKIT_NIX`.
    pub fn nix_tool(&self, tool: &str) -> String {
        match &self.nix_bin_dir {
            Some(dir) => dir.join(tool).display().to_string(),
            None => tool.to_string(),
        }
    }

    /// User-scoped symlink path for a GC root registered under `name`.
    pub fn home_root(&self, name: &str) -> PathBuf {
        let mut path: OsString = self.gc_project.clone().into_os_string();
        path.push(format!("-{}", name));
        PathBuf::from(path)
    }

    pub fn processes_pid(&self) -> PathBuf {
        self.dotfile.join("processes.pid")
    }

    pub fn processes_log(&self) -> PathBuf {
        self.dotfile.join("processes.log")
    }

    pub fn processes_script(&self) -> PathBuf {
        self.dotfile.join("processes")
    }
}


/// `$XDG_DATA_HOME/.devkit`, falling back to `$HOME/.devkit`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(dir).join(".devkit");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".devkit")
}


/// Engine system double such as `x86_64-linux` or `aarch64-darwin`.
pub fn default_system() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{}-{}", std::env::consts::ARCH, os)
}


fn invocation_stamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(
            Path::new("/work/app"),
            Path::new("/home/u/.devkit/gc"),
            Path::new("/opt/devkit/modules"),
        )
    }

    #[test]
    fn derived_paths() {
        let c = ctx();
        assert_eq!(c.dotfile, PathBuf::from("/work/app/.devkit"));
        assert_eq!(c.gc, PathBuf::from("/work/app/.devkit/gc"));
        assert_eq!(c.processes_pid(), PathBuf::from("/work/app/.devkit/processes.pid"));
        assert_eq!(c.processes_log(), PathBuf::from("/work/app/.devkit/processes.log"));
        assert!(c.gc_project.starts_with("/home/u/.devkit/gc"));
    }

    #[test]
    fn scoped_context_keeps_flags_and_home() {
        let mut c = ctx();
        c.apply_flags(&GlobalFlags {
            offline: true,
            ..Default::default()
        });
        let s = c.scoped_to(Path::new("/tmp/t1_abc"));
        assert_eq!(s.gc, PathBuf::from("/tmp/t1_abc/.devkit/gc"));
        assert_eq!(s.home_gc, c.home_gc);
        assert_eq!(s.gc_project, c.gc_project);
        assert!(s.nix_flags.contains(&"--offline".to_string()));
    }

    #[test]
    fn flags_fold_into_nix_flags() {
        let mut c = ctx();
        c.apply_flags(&GlobalFlags {
            nix_flags: vec!["--option".into(), "sandbox".into(), "false".into()],
            system: Some("aarch64-linux".into()),
            debugger: true,
            ..Default::default()
        });
        assert_eq!(c.system, "aarch64-linux");
        assert_eq!(
            c.nix_flags,
            vec!["--option", "sandbox", "false", "--system", "aarch64-linux"]
        );
        assert_eq!(c.command_flags, vec!["--debugger", "--ignore-try"]);
    }

    #[test]
    fn home_root_appends_name_to_stamp() {
        let c = ctx();
        let p = c.home_root("shell");
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-shell"));
        assert_eq!(p.parent().unwrap(), Path::new("/home/u/.devkit/gc"));
    }

    #[test]
    fn nix_tool_uses_bin_dir() {
        let mut c = ctx();
        assert_eq!(c.nix_tool("nix-store"), "nix-store");
        c.nix_bin_dir = Some(PathBuf::from("/opt/nix/bin"));
        assert_eq!(c.nix_tool("nix-store"), "/opt/nix/bin/nix-store");
    }

    #[test]
    fn child_env_exports_dirs() {
        let env = ctx().child_env();
        assert!(env.contains(&("DEVKIT_DIR".into(), "/work/app/.devkit".into())));
        assert!(env.contains(&("DEVKIT_GC".into(), "/work/app/.devkit/gc".into())));
    }
}
