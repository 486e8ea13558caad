//! SIGINT tracking.
//!
//! The terminal delivers Ctrl+C to the whole foreground process group, so
//! engine children die on their own. devkit records the signal instead of
//! dying so that teardown guards still run, and every runner call that
//! observes the flag turns into `Error::Interrupted`.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);


/// Install the Ctrl+C handler. Called once by the CLI before dispatch.
///
/// Handlers reset to the default disposition across `exec`, so shells and
/// supervisors entered through a handoff keep normal Ctrl+C behaviour.
pub fn install() {
    if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        warn!("Could not install the Ctrl+C handler: {}", err);
    }
}


/// Whether SIGINT has been received since start.
pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
