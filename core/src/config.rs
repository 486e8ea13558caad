//! Parser for `devkit.yaml` project configuration files.
//!
//! The schema is strict: unknown keys are rejected so a typo surfaces as an
//! error naming the field instead of being silently ignored. `assemble`
//! derives three artifacts from it for the engine to read.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};


pub const CONFIG_FILE: &str = "devkit.yaml";


/// Top-level configuration from a `devkit.yaml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Flake inputs by name.
    #[serde(default)]
    pub inputs: BTreeMap<String, Input>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_unfree: bool,

    /// Extra module paths to import.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permitted_insecure_packages: Vec<String>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Input {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flake: Option<bool>,

    /// Nested input overrides, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<serde_yaml::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlays: Option<Vec<String>>,
}


impl Input {
    pub fn new(url: &str) -> Self {
        Input {
            url: url.to_string(),
            flake: None,
            inputs: None,
            overlays: None,
        }
    }
}


fn is_false(b: &bool) -> bool {
    !*b
}


/// Load and validate `devkit.yaml` from a project root.
pub fn load(root: &Path) -> Result<ProjectConfig> {
    let path = root.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| Error::file(&path, e))?;
    parse(&content)
}


/// Parse a `devkit.yaml` document. Validation errors name the offending field.
pub fn parse(content: &str) -> Result<ProjectConfig> {
    // An empty document is a valid, empty config.
    if content.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    serde_yaml::from_str(content).map_err(|e| Error::ConfigInvalid {
        file: CONFIG_FILE.into(),
        message: e.to_string(),
    })
}


/// Write `devkit.yaml` into a project root.
pub fn save(root: &Path, config: &ProjectConfig) -> Result<()> {
    let path = root.join(CONFIG_FILE);
    let content = serde_yaml::to_string(config)?;
    std::fs::write(&path, content).map_err(|e| Error::file(&path, e))
}


/// Validate `devkit.yaml` and write the engine-facing artifacts into `dotfile`:
/// `flake.json` (inputs reduced to url/inputs/flake), `devkit.json` (the
/// whole config) and `imports.txt` (one import per line).
pub fn write_artifacts(root: &Path, dotfile: &Path) -> Result<ProjectConfig> {
    let config = load(root)?;
    std::fs::create_dir_all(dotfile).map_err(|e| Error::file(dotfile, e))?;

    let mut flake_inputs = serde_json::Map::new();
    for (name, input) in &config.inputs {
        let mut attrs = serde_json::Map::new();
        attrs.insert("url".into(), serde_json::Value::String(input.url.clone()));
        if let Some(inputs) = &input.inputs {
            attrs.insert("inputs".into(), serde_json::to_value(inputs)?);
        }
        if let Some(flake) = input.flake {
            attrs.insert("flake".into(), serde_json::Value::Bool(flake));
        }
        flake_inputs.insert(name.clone(), serde_json::Value::Object(attrs));
    }

    write_file(&dotfile.join("flake.json"), &serde_json::to_string(&flake_inputs)?)?;
    write_file(&dotfile.join("devkit.json"), &serde_json::to_string(&config)?)?;
    write_file(&dotfile.join("imports.txt"), &config.imports.join("\n"))?;
    Ok(config)
}


/// Remove artifacts left by an earlier `devkit.yaml` that no longer exists.
pub fn remove_artifacts(dotfile: &Path) -> Result<()> {
    for name in ["devkit.json", "flake.json", "imports.txt"] {
        let path = dotfile.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::file(&path, e)),
        }
    }
    Ok(())
}


/// Add an input, each `follows` entry pointing at an existing input.
pub fn add_input(config: &mut ProjectConfig, name: &str, url: &str, follows: &[String]) -> Result<()> {
    let mut nested = serde_yaml::Mapping::new();
    for follow in follows {
        if !config.inputs.contains_key(follow) {
            return Err(Error::ConfigInvalid {
                file: CONFIG_FILE.into(),
                message: format!("input {} does not exist so it can't be followed", follow),
            });
        }
        let mut target = serde_yaml::Mapping::new();
        target.insert("follows".into(), follow.as_str().into());
        nested.insert(follow.as_str().into(), serde_yaml::Value::Mapping(target));
    }

    let mut input = Input::new(url);
    if !nested.is_empty() {
        input.inputs = Some(serde_yaml::Value::Mapping(nested));
    }
    config.inputs.insert(name.to_string(), input);
    Ok(())
}


fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| Error::file(path, e))
}
