//! Environment activator: assembles the project and realises its
//! development environment.
//!
//! `activate` asks the engine for the environment's shell bindings through a
//! GC-rooted profile, so the realised environment survives collection for as
//! long as the project keeps it as its current `shell` root.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gc::symlink_force;
use crate::infrastructure::{Handoff, RunOptions};
use crate::log;


pub const NIX_FILE: &str = "devkit.nix";
pub const FLAKE_FILE: &str = ".devkit.flake.nix";
pub const FLAKE_TEMPLATE: &str = "flake.tmpl.nix";
pub const TEMPLATE_PLACEHOLDER: &str = "__DEVKIT_VARS__";


/// A realised development environment.
#[derive(Debug, Clone, PartialEq)]
pub struct DevEnv {
    /// Shell-export text, or JSON bindings when requested.
    pub env: String,
    /// Profile the environment is rooted at.
    pub gc_root: PathBuf,
}


/// Prepare the project for evaluation: validate `devkit.yaml`, refresh its
/// derived artifacts and render the flake from the module template.
pub fn assemble(engine: &Engine) -> Result<()> {
    let ctx = engine.ctx();
    if !ctx.root.join(NIX_FILE).exists() {
        return Err(Error::MissingProjectFile {
            file: NIX_FILE.into(),
            hint: "To get started, run:\n  $ devkit init".into(),
        });
    }

    std::fs::create_dir_all(&ctx.gc).map_err(|e| Error::file(&ctx.gc, e))?;

    if ctx.root.join(config::CONFIG_FILE).exists() {
        config::write_artifacts(&ctx.root, &ctx.dotfile)?;
    } else {
        config::remove_artifacts(&ctx.dotfile)?;
    }

    let template_path = ctx.modules_dir.join(FLAKE_TEMPLATE);
    let template =
        std::fs::read_to_string(&template_path).map_err(|e| Error::file(&template_path, e))?;
    let vars = format!(
        "\n  version = \"{}\";\n  system = \"{}\";\n  devkit_root = \"{}\";\n",
        latest_version(&ctx.modules_dir)?,
        ctx.system,
        ctx.root.display()
    );
    let flake_path = ctx.root.join(FLAKE_FILE);
    std::fs::write(&flake_path, template.replace(TEMPLATE_PLACEHOLDER, &vars))
        .map_err(|e| Error::file(&flake_path, e))
}


/// Version of the module set, read from `<modules>/latest-version`.
pub fn latest_version(modules_dir: &Path) -> Result<String> {
    let path = modules_dir.join("latest-version");
    let raw = std::fs::read_to_string(&path).map_err(|e| Error::file(&path, e))?;
    Ok(raw.trim().to_string())
}


/// Assemble, then realise the environment under the `shell` GC root.
pub fn activate(engine: &Engine, json: bool) -> Result<DevEnv> {
    assemble(engine)?;
    let ctx = engine.ctx();
    log::task("Building shell", || {
        let gc_root = ctx.gc.join("shell");
        let mut cmd = format!("print-dev-env --profile '{}'", gc_root.display());
        if json {
            cmd.push_str(" --json");
        }
        let env = engine.run_nix(&cmd)?;
        engine.delete_old_generations(&gc_root)?;
        symlink_force(&gc_root, &ctx.home_root("shell"))?;
        Ok(DevEnv { env, gc_root })
    })
}


/// The environment's shell bindings (or JSON), for direnv and editors.
pub fn print_dev_env(engine: &Engine, json: bool) -> Result<String> {
    Ok(activate(engine, json)?.env)
}


/// Enter the environment, optionally running one command in it.
pub fn shell(engine: &Engine, cmd: Option<&str>, args: &[String]) -> Result<Handoff> {
    let dev = activate(engine, false)?;
    let develop = match cmd {
        Some(cmd) => format!(
            "develop '{}' -c {} {}",
            dev.gc_root.display(),
            cmd,
            args.join(" ")
        ),
        None => {
            info!("Entering shell");
            format!("develop '{}'", dev.gc_root.display())
        }
    };
    Ok(Handoff::shell_command(engine.ctx(), engine.nix_command(develop.trim_end()).as_str()))
}


/// Run `command` inside the environment as a child, output passed through.
pub fn run_in(engine: &Engine, command: &str) -> Result<()> {
    let dev = activate(engine, false)?;
    let opts = RunOptions {
        inherit_stdout: true,
        ..engine.options()
    };
    engine.run_nix_with(
        &format!("develop '{}' -c {}", dev.gc_root.display(), command),
        &opts,
    )?;
    Ok(())
}
