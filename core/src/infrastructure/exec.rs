//! Process replacement.
//!
//! Operations that end in "become another program" (entering a shell,
//! running the supervisor attached, the debug drop-in) return a `Handoff`
//! instead of calling `exec` themselves. The CLI performs the replacement as
//! its last act, which keeps those operations testable.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::context::Context;
use crate::error::Error;


#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}


impl Handoff {
    /// Replace the process with `sh -c <cmd>` in the project root.
    pub fn shell_command(ctx: &Context, cmd: &str) -> Handoff {
        Handoff {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), cmd.to_string()],
            cwd: Some(ctx.root.clone()),
            envs: ctx.child_env(),
        }
    }

    /// Replace the process with an executable file and no arguments.
    pub fn program(ctx: &Context, program: &Path) -> Handoff {
        Handoff {
            program: program.to_path_buf(),
            args: Vec::new(),
            cwd: Some(ctx.root.clone()),
            envs: ctx.child_env(),
        }
    }

    /// Interactive `/bin/sh` anchored at `dir`.
    pub fn interactive_shell(dir: &Path) -> Handoff {
        Handoff {
            program: PathBuf::from("/bin/sh"),
            args: Vec::new(),
            cwd: Some(dir.to_path_buf()),
            envs: Vec::new(),
        }
    }

    /// Replace the current process image. Only returns on failure.
    pub fn exec(self) -> Error {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &self.envs {
            command.env(k, v);
        }
        Error::file(&self.program, command.exec())
    }
}
