//! Infrastructure: the OS-facing edges of devkit.
//!
//! Subprocess execution (`runner`), advisory locking (`lock`) and process
//! replacement (`exec`). Everything above this layer talks to the OS only
//! through these modules, which is what lets `MockRunner` stand in for the
//! engine in tests.

pub mod exec;
pub mod lock;
pub mod runner;

pub use exec::Handoff;
pub use runner::{CommandRunner, MockRunner, RunOptions, ShellRunner};
