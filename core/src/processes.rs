//! Process runner: builds the project's process supervisor and runs it
//! attached or detached.
//!
//! A detached supervisor is tracked only through `.devkit/processes.pid`;
//! `stop` signals whatever pid that file names.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tracing::info;

use crate::engine::Engine;
use crate::environment;
use crate::error::{Error, Result};
use crate::gc;
use crate::infrastructure::Handoff;
use crate::log;


/// How `up` left the supervisor.
#[derive(Debug, PartialEq)]
pub enum Started {
    /// Running in the background with this pid.
    Detached { pid: u32, log: PathBuf },
    /// The caller must replace itself with the wrapper.
    Attached(Handoff),
}


/// Build the supervisor script and return its store path.
pub fn build_supervisor_script(engine: &Engine) -> Result<String> {
    environment::assemble(engine)?;
    engine.build("'.#procfileScript'")
}


/// Start the declared processes, optionally only `process`.
pub fn up(engine: &Engine, process: Option<&str>, detach: bool) -> Result<Started> {
    let ctx = engine.ctx();
    let script = log::task("Building processes", || build_supervisor_script(engine))?;

    let contents = std::fs::read_to_string(&script).map_err(|e| Error::file(&script, e))?;
    if contents.trim().is_empty() {
        return Err(Error::NoProcesses);
    }

    let dev = environment::activate(engine, false)?;
    info!("Starting processes ...");
    gc::register(engine, "procfilescript", &script)?;

    let wrapper = ctx.processes_script();
    std::fs::create_dir_all(&ctx.dotfile).map_err(|e| Error::file(&ctx.dotfile, e))?;
    let body = format!(
        "#!/usr/bin/env bash\n{}\nexec {} {}\n",
        dev.env,
        script,
        process.unwrap_or("")
    );
    std::fs::write(&wrapper, body).map_err(|e| Error::file(&wrapper, e))?;
    std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::file(&wrapper, e))?;

    if !detach {
        return Ok(Started::Attached(Handoff::program(ctx, &wrapper)));
    }

    let log_path = ctx.processes_log();
    let pid = engine.runner().spawn(
        &format!("'{}'", wrapper.display()),
        &engine.options(),
        Some(&log_path),
    )?;
    let pid_path = ctx.processes_pid();
    std::fs::write(&pid_path, pid.to_string()).map_err(|e| Error::file(&pid_path, e))?;

    info!("  PID is {}.", pid);
    info!("  See logs:  $ tail -f {}", log_path.display());
    info!("  Stop:      $ devkit processes stop");
    Ok(Started::Detached { pid, log: log_path })
}


/// Signal the detached supervisor and forget its pid.
pub fn stop(engine: &Engine) -> Result<u32> {
    let pid_path = engine.ctx().processes_pid();
    log::task("Stopping processes", || {
        if !pid_path.exists() {
            return Err(Error::ProcessNotRunning);
        }
        let raw = std::fs::read_to_string(&pid_path).map_err(|e| Error::file(&pid_path, e))?;
        let pid: u32 = raw.trim().parse().map_err(|_| Error::ConfigInvalid {
            file: pid_path.display().to_string(),
            message: format!("not a process id: {:?}", raw.trim()),
        })?;

        info!("Stopping process with PID {} ...", pid);
        engine.runner().terminate(pid)?;

        std::fs::remove_file(&pid_path).map_err(|e| Error::file(&pid_path, e))?;
        Ok(pid)
    })
}
