//! devkit CLI: the command-line entry point.
//!
//! # Usage
//!
//! ```text
//! devkit init
//! devkit shell cargo build
//! devkit up -d
//! devkit processes stop
//! devkit test --keep-going local
//! devkit -n "--option sandbox false" ci
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::error;

use devkit_core::command::Command;
use devkit_core::context::{Context, GlobalFlags};
use devkit_core::error::Error;
use devkit_core::interrupt;
use devkit_core::log;
use devkit_core::sys::{Outcome, Sys};


#[derive(Parser, Debug)]
#[command(name = "devkit", version, about = "Fast, declarative, reproducible developer environments")]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Pass additional flags to nix commands.
    #[arg(short = 'n', long = "nix-flags", value_name = "FLAGS", allow_hyphen_values = true)]
    nix_flags: Vec<String>,

    /// Enable the Nix debugger.
    #[arg(short, long)]
    debugger: bool,

    /// Nix system to use.
    #[arg(short, long)]
    system: Option<String>,

    /// Disable network access.
    #[arg(short, long)]
    offline: bool,

    #[command(subcommand)]
    command: Cmd,
}


#[derive(Subcommand, Debug)]
enum Cmd {
    /// Scaffold devkit.yaml, devkit.nix and .envrc.
    Init {
        #[arg(default_value = ".")]
        target: PathBuf,
    },

    #[command(hide = true)]
    Assemble,

    /// Delete unused environments to save disk space.
    Gc,

    /// Activate the developer environment, or run CMD inside it.
    Shell {
        cmd: Option<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Start the declared processes.
    Up {
        process: Option<String>,
        /// Start processes in the background.
        #[arg(short, long)]
        detach: bool,
    },

    /// Start or stop processes.
    #[command(subcommand)]
    Processes(ProcessesCmd),

    /// Print information about this developer environment.
    Info,

    /// Display devkit version.
    Version,

    /// Update the lock file from devkit.yaml inputs.
    Update { input: Option<String> },

    /// Build your developer environment and check that everything builds.
    Ci,

    #[command(hide = true)]
    PrintDevEnv {
        #[arg(long)]
        json: bool,
    },

    /// Search packages matching NAME in nixpkgs input.
    Search { name: String },

    /// Build, copy and run a container.
    Container {
        container_name: String,
        /// Registry to copy the container to.
        #[arg(long, value_name = "REGISTRY")]
        registry: Option<String>,
        /// Copy the container to the registry.
        #[arg(long)]
        copy: bool,
        /// Arguments passed to `skopeo copy`.
        #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
        copy_args: Option<String>,
        /// Execute `docker run`.
        #[arg(long)]
        docker_run: bool,
    },

    /// Manage inputs in devkit.yaml.
    #[command(subcommand)]
    Inputs(InputsCmd),

    /// Build attributes in your devkit.nix.
    Build {
        #[arg(required = true)]
        attrs: Vec<String>,
    },

    /// Run tests.
    Test {
        names: Vec<String>,
        /// Enter a shell in the sandbox of the first failing test.
        #[arg(long)]
        debug: bool,
        /// Continue running tests if one fails.
        #[arg(long)]
        keep_going: bool,
        /// A test name to exclude, may be specified multiple times.
        #[arg(long)]
        exclude: Vec<String>,
    },
}


#[derive(Subcommand, Debug)]
enum ProcessesCmd {
    /// Start the declared processes.
    Up {
        process: Option<String>,
        #[arg(short, long)]
        detach: bool,
    },
    /// Stop processes running in the background.
    Stop,
}


#[derive(Subcommand, Debug)]
enum InputsCmd {
    /// Add a new input to the developer environment.
    Add {
        name: String,
        url: String,
        /// Add a dependency to the input.
        #[arg(short, long = "follows")]
        follows: Vec<String>,
    },
}


impl Cli {
    fn global_flags(&self) -> GlobalFlags {
        GlobalFlags {
            verbose: self.verbose,
            nix_flags: self.nix_flags.clone(),
            debugger: self.debugger,
            system: self.system.clone(),
            offline: self.offline,
        }
    }
}


impl Cmd {
    fn into_command(self) -> Command {
        match self {
            Cmd::Init { target } => Command::Init { target },
            Cmd::Assemble => Command::Assemble,
            Cmd::Gc => Command::Gc,
            Cmd::Shell { cmd, args } => Command::Shell { cmd, args },
            Cmd::Up { process, detach }
            | Cmd::Processes(ProcessesCmd::Up { process, detach }) => {
                Command::ProcessesUp { process, detach }
            }
            Cmd::Processes(ProcessesCmd::Stop) => Command::ProcessesStop,
            Cmd::Info => Command::Info,
            Cmd::Version => Command::Version,
            Cmd::Update { input } => Command::Update { input },
            Cmd::Ci => Command::Ci,
            Cmd::PrintDevEnv { json } => Command::PrintDevEnv { json },
            Cmd::Inputs(InputsCmd::Add { name, url, follows }) => {
                Command::InputsAdd { name, url, follows }
            }
            Cmd::Build { attrs } => Command::Build { attrs },
            Cmd::Search { name } => Command::Search { name },
            Cmd::Container {
                container_name,
                registry,
                copy,
                copy_args,
                docker_run,
            } => Command::Container {
                name: container_name,
                registry,
                copy,
                copy_args,
                docker_run,
            },
            Cmd::Test {
                names,
                debug,
                keep_going,
                exclude,
            } => Command::Test {
                names,
                exclude,
                debug,
                keep_going,
            },
        }
    }
}


fn main() {
    let cli = Cli::parse();
    log::init(cli.verbose);
    interrupt::install();
    process::exit(run(cli));
}


/// Dispatch and turn the outcome into an exit status. Only returns when no
/// process replacement happened.
fn run(cli: Cli) -> i32 {
    let ctx = match Context::from_env(&cli.global_flags()) {
        Ok(ctx) => ctx,
        Err(e) => return report(&e),
    };
    let sys = Sys::new(ctx);
    match sys.execute(cli.command.into_command()) {
        Ok(Outcome::Done) => 0,
        Ok(Outcome::Print(text)) => {
            println!("{}", text);
            0
        }
        Ok(Outcome::Exec(handoff)) => report(&handoff.exec()),
        Err(e) => report(&e),
    }
}


fn report(err: &Error) -> i32 {
    // the runner already printed the failing command line
    if !matches!(err, Error::EngineInvocationFailed { .. }) {
        error!("✖ {}", err);
    }
    err.exit_code()
}
