//! Garbage-collection roots: registration and sweeping.

pub mod registrar;
pub mod sweeper;

pub use registrar::{register, symlink_force};
pub use sweeper::{collect_garbage, sweep, GcReport, Sweep};
