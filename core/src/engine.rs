//! Engine: composes and runs Nix command lines.
//!
//! An `Engine` pairs a `Context` with a `CommandRunner`. Every call runs in
//! the context's project root with `DEVKIT_DIR`/`DEVKIT_GC` exported.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::error::Result;
use crate::infrastructure::{CommandRunner, RunOptions};


/// Flags passed to every `nix` call.
pub const NIX_FLAGS: &[&str] = &[
    "--show-trace",
    "--extra-experimental-features",
    "nix-command",
    "--extra-experimental-features",
    "flakes",
    // silence dirty-tree warnings
    "--option",
    "warn-dirty",
    "false",
    // the flake eval cache is too aggressive
    "--option",
    "eval-cache",
    "false",
];


#[derive(Clone, Copy)]
pub struct Engine<'a> {
    ctx: &'a Context,
    runner: &'a dyn CommandRunner,
}


impl<'a> Engine<'a> {
    pub fn new(ctx: &'a Context, runner: &'a dyn CommandRunner) -> Engine<'a> {
        Engine { ctx, runner }
    }

    pub fn ctx(&self) -> &'a Context {
        self.ctx
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    /// The same runner over a different context (sandboxes).
    pub fn with_context<'b>(&self, ctx: &'b Context) -> Engine<'b>
    where
        'a: 'b,
    {
        Engine {
            ctx,
            runner: self.runner,
        }
    }

    /// Base options: project root as cwd, devkit variables exported.
    pub fn options(&self) -> RunOptions {
        RunOptions {
            cwd: Some(self.ctx.root.clone()),
            envs: self.ctx.child_env(),
            ..Default::default()
        }
    }

    /// Full `nix` command line for a subcommand string.
    pub fn nix_command(&self, command: &str) -> String {
        let mut parts: Vec<String> = vec![self.ctx.nix_tool("nix")];
        parts.extend(NIX_FLAGS.iter().map(|f| f.to_string()));
        parts.extend(self.ctx.nix_flags.iter().cloned());
        parts.push(command.to_string());
        parts.extend(self.ctx.command_flags.iter().cloned());
        parts.join(" ")
    }

    pub fn run_nix(&self, command: &str) -> Result<String> {
        self.run_nix_with(command, &self.options())
    }

    pub fn run_nix_with(&self, command: &str, opts: &RunOptions) -> Result<String> {
        self.runner.run(&self.nix_command(command), opts)
    }

    /// Run a non-`nix` command in the project root.
    pub fn run(&self, command: &str) -> Result<String> {
        self.runner.run(command, &self.options())
    }

    /// `nix eval <attr> --json`, decoded.
    pub fn eval_json<T: DeserializeOwned>(&self, attr: &str) -> Result<T> {
        let raw = self.run_nix(&format!("eval {} --json", attr))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Build one installable without a result link and return its out path.
    pub fn build(&self, installable: &str) -> Result<String> {
        self.run_nix(&format!("build --no-link --print-out-paths {}", installable))
    }

    /// `nix-store --add-root <root> -r <store_path>`
    pub fn add_root(&self, root: &Path, store_path: &str) -> Result<()> {
        self.run(&format!(
            "{} --add-root \"{}\" -r {} >/dev/null",
            self.ctx.nix_tool("nix-store"),
            root.display(),
            store_path
        ))?;
        Ok(())
    }

    /// Drop every generation of `profile` but the current one.
    pub fn delete_old_generations(&self, profile: &Path) -> Result<()> {
        let opts = RunOptions {
            quiet_stderr: true,
            silent: true,
            ..self.options()
        };
        self.runner.run(
            &format!(
                "{} -p '{}' --delete-generations old",
                self.ctx.nix_tool("nix-env"),
                profile.display()
            ),
            &opts,
        )?;
        Ok(())
    }

    /// `nix store delete --recursive <paths...>`
    pub fn store_delete(&self, paths: &[String]) -> Result<()> {
        self.run_nix(&format!("store delete --recursive {}", paths.join(" ")))?;
        Ok(())
    }
}
