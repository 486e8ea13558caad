//! Logging setup and task progress lines.
//!
//! Everything in devkit logs through `tracing`. The CLI installs a plain
//! stderr subscriber; `task` brackets a unit of work with a start line and a
//! ✔/✖ completion line.

use tracing::{error, info, Level};

use crate::error::Result;


/// Install the stderr subscriber. `verbose` enables debug output, which
/// includes every engine command line before it runs.
pub fn init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .try_init();
}


/// Run `f` as a named task, logging `<message> ...` before and the outcome after.
pub fn task<T>(message: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("{} ...", message);
    let result = f();
    match &result {
        Ok(_) => info!("✔ {}", message),
        Err(_) => error!("✖ {}", message),
    }
    result
}
