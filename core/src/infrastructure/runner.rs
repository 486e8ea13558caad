//! Command runner abstraction for executing shell commands.
//!
//! `CommandRunner` is the subprocess boundary every component goes through.
//! `ShellRunner` is the production implementation that spawns `sh -c`.
//! `MockRunner` is the test double that records calls and answers from rules.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::interrupt;


/// Per-call options for a runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory; the caller's when `None`.
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub envs: Vec<(String, String)>,
    /// Send the child's stderr to /dev/null.
    pub quiet_stderr: bool,
    /// Let the child write to our stdout instead of capturing it.
    pub inherit_stdout: bool,
    /// Do not log the failing command line on non-zero exit.
    pub silent: bool,
}

impl RunOptions {
    pub fn in_dir(cwd: &Path) -> Self {
        RunOptions {
            cwd: Some(cwd.to_path_buf()),
            ..Default::default()
        }
    }
}


/// Trait for executing shell command strings.
pub trait CommandRunner {
    /// Run to completion, returning trimmed stdout.
    fn run(&self, cmd: &str, opts: &RunOptions) -> Result<String>;

    /// Start in the background and return its pid. With `log`, stdout and
    /// stderr are appended to that file; otherwise they are inherited.
    fn spawn(&self, cmd: &str, opts: &RunOptions, log: Option<&Path>) -> Result<u32>;

    /// Send SIGTERM to `pid`.
    fn terminate(&self, pid: u32) -> Result<()>;
}


/// How long `terminate` waits for an own child to exit before leaving it
/// to a later reap.
const REAP_GRACE: Duration = Duration::from_secs(5);

const REAP_POLL: Duration = Duration::from_millis(20);


/// Production runner that spawns `sh -c <cmd>`.
///
/// Background children are kept so they can be reaped once terminated
/// instead of lingering as zombies until devkit exits.
pub struct ShellRunner {
    children: RefCell<HashMap<u32, Child>>,
    interrupted: fn() -> bool,
}

impl Default for ShellRunner {
    fn default() -> Self {
        ShellRunner {
            children: RefCell::new(HashMap::new()),
            interrupted: interrupt::requested,
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every background child that has already exited.
    fn reap_finished(&self) {
        self.children
            .borrow_mut()
            .retain(|_, child| !matches!(child.try_wait(), Ok(Some(_))));
    }

    /// Wait briefly for `pid` if it is one of ours.
    fn reap(&self, pid: u32) {
        let mut children = self.children.borrow_mut();
        let deadline = Instant::now() + REAP_GRACE;
        loop {
            let status = match children.get_mut(&pid) {
                Some(child) => child.try_wait(),
                None => return,
            };
            match status {
                Ok(Some(_)) | Err(_) => {
                    children.remove(&pid);
                    return;
                }
                Ok(None) if Instant::now() >= deadline => {
                    debug!("pid {} still running after SIGTERM", pid);
                    return;
                }
                Ok(None) => std::thread::sleep(REAP_POLL),
            }
        }
    }

    fn command(cmd: &str, opts: &RunOptions) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &opts.envs {
            command.env(k, v);
        }
        command
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, cmd: &str, opts: &RunOptions) -> Result<String> {
        debug!("Running command: {}", cmd);
        if (self.interrupted)() {
            return Err(Error::Interrupted);
        }
        let mut command = Self::command(cmd, opts);
        command
            .stdin(Stdio::null())
            .stdout(if opts.inherit_stdout { Stdio::inherit() } else { Stdio::piped() })
            .stderr(if opts.quiet_stderr { Stdio::null() } else { Stdio::inherit() });

        let output = command.output().map_err(|e| Error::file("sh", e))?;
        if (self.interrupted)() {
            return Err(Error::Interrupted);
        }
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        // A child killed by a signal has no code.
        let code = output.status.code().unwrap_or(1);
        if !opts.silent {
            error!("Following command exited with code {}:\n\n  {}", code, cmd);
        }
        Err(Error::EngineInvocationFailed {
            command: cmd.to_string(),
            code,
        })
    }

    fn spawn(&self, cmd: &str, opts: &RunOptions, log: Option<&Path>) -> Result<u32> {
        debug!("Spawning command: {}", cmd);
        if (self.interrupted)() {
            return Err(Error::Interrupted);
        }
        self.reap_finished();
        // exec so the recorded pid is the command itself, not the shell
        let mut command = Self::command(&format!("exec {}", cmd), opts);
        command.stdin(Stdio::null());
        if let Some(log_path) = log {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .map_err(|e| Error::file(log_path, e))?;
            let log_stderr = log_file.try_clone().map_err(|e| Error::file(log_path, e))?;
            command.stdout(log_file).stderr(log_stderr);
        }
        let child = command.spawn().map_err(|e| Error::file("sh", e))?;
        let pid = child.id();
        self.children.borrow_mut().insert(pid, child);
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if ret == 0 {
            self.reap(pid);
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Err(Error::ProcessNotFound(pid))
        } else {
            Err(Error::Io(err))
        }
    }
}


/// A recorded call made against `MockRunner`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub cmd: String,
    pub cwd: Option<PathBuf>,
}


enum Response {
    Output(String),
    Exit(i32),
    Interrupted,
}


struct Rule {
    pattern: String,
    cwd_prefix: Option<String>,
    response: Response,
}

impl Rule {
    fn matches(&self, cmd: &str, opts: &RunOptions) -> bool {
        if !cmd.contains(&self.pattern) {
            return false;
        }
        match (&self.cwd_prefix, &opts.cwd) {
            (None, _) => true,
            (Some(prefix), Some(cwd)) => cwd
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(prefix.as_str()))
                .unwrap_or(false),
            (Some(_), None) => false,
        }
    }
}


/// Test-double runner that records commands and answers from pattern rules.
///
/// The first rule whose pattern is a substring of the command wins; calls
/// with no matching rule succeed with empty output.
pub struct MockRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<Call>>,
    spawned: RefCell<Vec<(String, Option<PathBuf>)>>,
    terminated: RefCell<Vec<u32>>,
    dead_pids: RefCell<Vec<u32>>,
    next_pid: RefCell<u32>,
}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner {
            rules: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            spawned: RefCell::new(Vec::new()),
            terminated: RefCell::new(Vec::new()),
            dead_pids: RefCell::new(Vec::new()),
            next_pid: RefCell::new(4000),
        }
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(self, pattern: &str, output: &str) -> Self {
        self.rules.borrow_mut().push(Rule {
            pattern: pattern.into(),
            cwd_prefix: None,
            response: Response::Output(output.into()),
        });
        self
    }

    /// Fail commands containing `pattern` with exit `code`.
    pub fn fail(self, pattern: &str, code: i32) -> Self {
        self.rules.borrow_mut().push(Rule {
            pattern: pattern.into(),
            cwd_prefix: None,
            response: Response::Exit(code),
        });
        self
    }

    /// Fail commands containing `pattern` run in a directory whose name
    /// starts with `dir_prefix`.
    pub fn fail_in(self, dir_prefix: &str, pattern: &str, code: i32) -> Self {
        self.rules.borrow_mut().push(Rule {
            pattern: pattern.into(),
            cwd_prefix: Some(dir_prefix.into()),
            response: Response::Exit(code),
        });
        self
    }

    /// Behave as if Ctrl+C arrived while a command containing `pattern`
    /// ran in a directory whose name starts with `dir_prefix`.
    pub fn interrupt_in(self, dir_prefix: &str, pattern: &str) -> Self {
        self.rules.borrow_mut().push(Rule {
            pattern: pattern.into(),
            cwd_prefix: Some(dir_prefix.into()),
            response: Response::Interrupted,
        });
        self
    }

    /// Make `terminate(pid)` report the process as gone.
    pub fn with_dead_pid(self, pid: u32) -> Self {
        self.dead_pids.borrow_mut().push(pid);
        self
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.cmd.clone()).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn spawned_commands(&self) -> Vec<String> {
        self.spawned.borrow().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn terminated_pids(&self) -> Vec<u32> {
        self.terminated.borrow().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, cmd: &str, opts: &RunOptions) -> Result<String> {
        self.calls.borrow_mut().push(Call {
            cmd: cmd.to_string(),
            cwd: opts.cwd.clone(),
        });
        let rules = self.rules.borrow();
        match rules.iter().find(|r| r.matches(cmd, opts)) {
            Some(rule) => match &rule.response {
                Response::Output(out) => Ok(out.clone()),
                Response::Exit(code) => Err(Error::EngineInvocationFailed {
                    command: cmd.to_string(),
                    code: *code,
                }),
                Response::Interrupted => Err(Error::Interrupted),
            },
            None => Ok(String::new()),
        }
    }

    fn spawn(&self, cmd: &str, _opts: &RunOptions, log: Option<&Path>) -> Result<u32> {
        self.spawned
            .borrow_mut()
            .push((cmd.to_string(), log.map(Path::to_path_buf)));
        let mut next = self.next_pid.borrow_mut();
        *next += 1;
        Ok(*next)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        if self.dead_pids.borrow().contains(&pid) {
            return Err(Error::ProcessNotFound(pid));
        }
        self.terminated.borrow_mut().push(pid);
        Ok(())
    }
}
