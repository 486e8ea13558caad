//! devkit core: developer environments on top of a Nix-style engine.
//!
//! The CLI builds a `Context`, turns its arguments into a `Command` and hands
//! both to `Sys`. Everything that touches the outside world goes through an
//! `infrastructure::CommandRunner`.

pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod environment;
pub mod error;
pub mod gc;
pub mod infrastructure;
pub mod interrupt;
pub mod log;
pub mod processes;
pub mod project;
pub mod sys;
pub mod testing;

pub use error::{Error, Result};
