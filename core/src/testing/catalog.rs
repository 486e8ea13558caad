//! Test catalog: discovery, tag index and selection.
//!
//! Tests are declared in project configuration and reach devkit as JSON from
//! the engine. Selection expands tag names into their member tests; the
//! exclusion list only ever filters those tag expansions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::Engine;
use crate::error::Result;


/// Attribute the engine evaluates to list the project's tests.
pub const TESTS_ATTR: &str = ".#devkit.tests";

/// Tag group selected when no names are given.
pub const DEFAULT_TAG: &str = "local";


/// One declared test.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TestCase {
    /// Filled from the map key during discovery.
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Directory copied verbatim into the sandbox.
    #[serde(default)]
    pub src: Option<PathBuf>,

    /// Contents of `devkit.nix`.
    #[serde(default)]
    pub nix: Option<String>,

    /// Contents of `devkit.yaml`.
    #[serde(default)]
    pub yaml: Option<String>,

    /// Contents of `.test.sh`.
    #[serde(default)]
    pub test: Option<String>,
}


impl TestCase {
    /// `src`, unless absent or empty.
    pub fn source_dir(&self) -> Option<&PathBuf> {
        self.src.as_ref().filter(|p| !p.as_os_str().is_empty())
    }
}


pub type Tests = BTreeMap<String, TestCase>;


/// Parse the engine's test declaration JSON.
pub fn parse_tests(json: &str) -> Result<Tests> {
    Ok(with_names(serde_json::from_str(json)?))
}


/// Ask the engine for every declared test.
pub fn discover_tests(engine: &Engine) -> Result<Tests> {
    Ok(with_names(engine.eval_json(TESTS_ATTR)?))
}


fn with_names(mut tests: Tests) -> Tests {
    for (name, test) in tests.iter_mut() {
        test.name = name.clone();
    }
    tests
}


/// Tag → member tests, in test iteration order.
#[derive(Debug, Default, PartialEq)]
pub struct TagIndex {
    groups: BTreeMap<String, Vec<String>>,
}


impl TagIndex {
    /// Collect every tag first, then invert test → tags into tag → tests.
    pub fn build(tests: &Tests) -> TagIndex {
        let tags: BTreeSet<&String> = tests.values().flat_map(|t| t.tags.iter()).collect();
        let mut groups: BTreeMap<String, Vec<String>> =
            tags.into_iter().map(|tag| (tag.clone(), Vec::new())).collect();

        for (name, test) in tests {
            for tag in &test.tags {
                if let Some(members) = groups.get_mut(tag) {
                    members.push(name.clone());
                }
            }
        }
        TagIndex { groups }
    }

    pub fn members(&self, tag: &str) -> &[String] {
        self.groups.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tags(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }
}


/// Resolve requested names into the ordered list of tests to run.
///
/// A name that is a test is included as-is, even when excluded. A name that
/// is a tag contributes its members minus `exclude`. Names that are neither
/// contribute nothing. Duplicates are kept; each one runs.
pub fn resolve_selection(
    names: &[String],
    tests: &Tests,
    tags: &TagIndex,
    exclude: &[String],
) -> Vec<String> {
    let default = [DEFAULT_TAG.to_string()];
    let names = if names.is_empty() { &default[..] } else { names };

    let mut selected = Vec::new();
    for name in names {
        if tests.contains_key(name) {
            selected.push(name.clone());
        }
        for member in tags.members(name) {
            if !exclude.contains(member) {
                selected.push(member.clone());
            }
        }
    }
    selected
}
