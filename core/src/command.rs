//! Command: the typed interface for every devkit operation.
//!
//! Every operation that can be dispatched through `Sys::execute()` is a variant
//! of the `Command` enum. The CLI builds one from its arguments; the serde
//! form is what `--verbose` logs for each dispatch.
//!
//! # Wire Format
//!
//! Commands serialize as JSON objects with a `"command"` discriminant:
//!
//! ```json
//! {"command": "test", "names": ["local"], "keep_going": true}
//! {"command": "processes.up", "process": "web", "detach": true}
//! {"command": "version"}
//! ```
//!
//! # Command Groups
//!
//! | Group | Commands |
//! |-------|----------|
//! | Project | `init`, `version`, `info`, `update`, `build`, `ci`, `inputs.add`, `search`, `container` |
//! | Environment | `assemble`, `shell`, `print-dev-env` |
//! | Processes | `processes.up`, `processes.stop` |
//! | Maintenance | `gc` |
//! | Tests | `test` |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};


/// A typed devkit operation.
///
/// Each variant corresponds to exactly one arm in `Sys::execute()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command")]
pub enum Command {
    // -----------------------------------------------------------------
    // Project
    // -----------------------------------------------------------------

    /// Scaffold `devkit.nix`, `devkit.yaml` and `.envrc` in `target`.
    #[serde(rename = "init")]
    Init {
        #[serde(default = "default_target")]
        target: PathBuf,
    },

    #[serde(rename = "version")]
    Version,

    /// Locked inputs and the environment summary.
    #[serde(rename = "info")]
    Info,

    /// Update one input's lock, or all of them.
    #[serde(rename = "update")]
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },

    /// Build `devkit.<attr>` for each attribute.
    #[serde(rename = "build")]
    Build { attrs: Vec<String> },

    /// Build everything and root the result.
    #[serde(rename = "ci")]
    Ci,

    #[serde(rename = "inputs.add")]
    InputsAdd {
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        follows: Vec<String>,
    },

    /// Packages and options whose name contains `name`.
    #[serde(rename = "search")]
    Search { name: String },

    /// Build container `name`, optionally copy it and run it.
    #[serde(rename = "container")]
    Container {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registry: Option<String>,
        #[serde(default)]
        copy: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        copy_args: Option<String>,
        #[serde(default)]
        docker_run: bool,
    },

    // -----------------------------------------------------------------
    // Environment
    // -----------------------------------------------------------------

    #[serde(rename = "assemble")]
    Assemble,

    /// Enter the environment, or run one command inside it.
    #[serde(rename = "shell")]
    Shell {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cmd: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },

    #[serde(rename = "print-dev-env")]
    PrintDevEnv {
        #[serde(default)]
        json: bool,
    },

    // -----------------------------------------------------------------
    // Processes
    // -----------------------------------------------------------------

    /// Start the declared processes, all or just `process`.
    #[serde(rename = "processes.up")]
    ProcessesUp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process: Option<String>,
        #[serde(default)]
        detach: bool,
    },

    #[serde(rename = "processes.stop")]
    ProcessesStop,

    // -----------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------

    /// Sweep the user GC directory and collect unreferenced store paths.
    #[serde(rename = "gc")]
    Gc,

    // -----------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------

    #[serde(rename = "test")]
    Test {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        names: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclude: Vec<String>,
        #[serde(default)]
        debug: bool,
        #[serde(default)]
        keep_going: bool,
    },
}


fn default_target() -> PathBuf {
    PathBuf::from(".")
}


impl Command {
    /// The `"command"` discriminant, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init { .. } => "init",
            Command::Version => "version",
            Command::Info => "info",
            Command::Update { .. } => "update",
            Command::Build { .. } => "build",
            Command::Ci => "ci",
            Command::InputsAdd { .. } => "inputs.add",
            Command::Search { .. } => "search",
            Command::Container { .. } => "container",
            Command::Assemble => "assemble",
            Command::Shell { .. } => "shell",
            Command::PrintDevEnv { .. } => "print-dev-env",
            Command::ProcessesUp { .. } => "processes.up",
            Command::ProcessesStop => "processes.stop",
            Command::Gc => "gc",
            Command::Test { .. } => "test",
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_deserializes_with_minimal_fields() {
        let cases = [
            r#"{"command":"init"}"#,
            r#"{"command":"version"}"#,
            r#"{"command":"info"}"#,
            r#"{"command":"update"}"#,
            r#"{"command":"build","attrs":["packages"]}"#,
            r#"{"command":"ci"}"#,
            r#"{"command":"inputs.add","name":"n","url":"github:a/b"}"#,
            r#"{"command":"search","name":"python"}"#,
            r#"{"command":"container","name":"shell"}"#,
            r#"{"command":"assemble"}"#,
            r#"{"command":"shell"}"#,
            r#"{"command":"print-dev-env"}"#,
            r#"{"command":"processes.up"}"#,
            r#"{"command":"processes.stop"}"#,
            r#"{"command":"gc"}"#,
            r#"{"command":"test"}"#,
        ];
        for json in cases {
            let cmd: Command = serde_json::from_str(json)
                .unwrap_or_else(|e| panic!("{} failed: {}", json, e));
            assert!(json.contains(&format!(r#""{}""#, cmd.name())));
        }
    }

    #[test]
    fn init_defaults_to_current_dir() {
        let cmd: Command = serde_json::from_str(r#"{"command":"init"}"#).unwrap();
        assert_eq!(cmd, Command::Init { target: PathBuf::from(".") });
    }

    #[test]
    fn test_command_omits_empty_lists() {
        let cmd = Command::Test {
            names: vec!["local".into()],
            exclude: Vec::new(),
            debug: false,
            keep_going: true,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""command":"test""#));
        assert!(json.contains(r#""keep_going":true"#));
        assert!(!json.contains("exclude"));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"command":"container"}"#).is_err());
    }
}
