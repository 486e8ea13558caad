//! Sys: the dispatcher that owns the invocation context and runs commands.

use tracing::debug;

use crate::command::Command;
use crate::context::Context;
use crate::engine::Engine;
use crate::environment;
use crate::error::Result;
use crate::gc;
use crate::infrastructure::{CommandRunner, Handoff, ShellRunner};
use crate::processes::{self, Started};
use crate::project::{self, ContainerOptions};
use crate::testing::{self, SuiteOptions, SuiteOutcome};


/// What the caller must do after a successful dispatch.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Done,
    /// Write this to stdout.
    Print(String),
    /// Replace the process; never returns when performed.
    Exec(Handoff),
}


/// Central runtime for one devkit invocation.
///
/// `Sys` pairs the `Context` built from flags and environment with the
/// runner every engine call goes through.
pub struct Sys {
    ctx: Context,
    runner: Box<dyn CommandRunner>,
}


impl Sys {
    /// Production dispatcher spawning real subprocesses.
    pub fn new(ctx: Context) -> Sys {
        Sys::with_runner(ctx, Box::new(ShellRunner::new()))
    }

    /// Dispatcher over any runner. Useful for testing.
    pub fn with_runner(ctx: Context, runner: Box<dyn CommandRunner>) -> Sys {
        Sys { ctx, runner }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    fn engine(&self) -> Engine<'_> {
        Engine::new(&self.ctx, self.runner.as_ref())
    }

    /// The single dispatch method. Every command enters here.
    pub fn execute(&self, cmd: Command) -> Result<Outcome> {
        debug!(
            "dispatch {}",
            serde_json::to_string(&cmd).unwrap_or_else(|_| cmd.name().to_string())
        );
        let engine = self.engine();
        match cmd {
            Command::Init { target } => {
                project::init(&engine, &self.ctx.root.join(target))?;
                Ok(Outcome::Done)
            }
            Command::Version => Ok(Outcome::Print(project::version(&self.ctx)?)),
            Command::Info => Ok(Outcome::Print(project::info(&engine)?)),
            Command::Update { input } => {
                project::update(&engine, input.as_deref())?;
                Ok(Outcome::Done)
            }
            Command::Build { attrs } => {
                project::build(&engine, &attrs)?;
                Ok(Outcome::Done)
            }
            Command::Ci => {
                project::ci(&engine)?;
                Ok(Outcome::Done)
            }
            Command::InputsAdd { name, url, follows } => {
                project::inputs_add(&self.ctx, &name, &url, &follows)?;
                Ok(Outcome::Done)
            }
            Command::Search { name } => {
                let tables = project::search(&engine, &name)?;
                if tables.is_empty() {
                    Ok(Outcome::Done)
                } else {
                    Ok(Outcome::Print(tables))
                }
            }
            Command::Container {
                name,
                registry,
                copy,
                copy_args,
                docker_run,
            } => {
                let opts = ContainerOptions {
                    registry,
                    copy,
                    copy_args,
                    docker_run,
                };
                match project::container(&engine, &name, &opts)? {
                    Some(handoff) => Ok(Outcome::Exec(handoff)),
                    None => Ok(Outcome::Done),
                }
            }
            Command::Assemble => {
                environment::assemble(&engine)?;
                Ok(Outcome::Done)
            }
            Command::Shell { cmd, args } => Ok(Outcome::Exec(environment::shell(
                &engine,
                cmd.as_deref(),
                &args,
            )?)),
            Command::PrintDevEnv { json } => {
                Ok(Outcome::Print(environment::print_dev_env(&engine, json)?))
            }
            Command::ProcessesUp { process, detach } => {
                match processes::up(&engine, process.as_deref(), detach)? {
                    Started::Attached(handoff) => Ok(Outcome::Exec(handoff)),
                    Started::Detached { .. } => Ok(Outcome::Done),
                }
            }
            Command::ProcessesStop => {
                processes::stop(&engine)?;
                Ok(Outcome::Done)
            }
            Command::Gc => {
                gc::collect_garbage(&engine)?;
                Ok(Outcome::Done)
            }
            Command::Test {
                names,
                exclude,
                debug,
                keep_going,
            } => {
                let opts = SuiteOptions {
                    names,
                    exclude,
                    debug,
                    keep_going,
                };
                match testing::run_suite(&engine, &opts)? {
                    SuiteOutcome::Passed(_) => Ok(Outcome::Done),
                    SuiteOutcome::DebugShell(handoff) => Ok(Outcome::Exec(handoff)),
                }
            }
        }
    }
}
