//! Test orchestration: declared tests run in isolated sandboxes.

pub mod catalog;
pub mod lifecycle;
pub mod sandbox;

pub use catalog::{discover_tests, resolve_selection, TagIndex, TestCase, Tests};
pub use lifecycle::{run_suite, SuiteOptions, SuiteOutcome};
