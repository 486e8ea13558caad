//! Per-test lifecycle and the suite loop.
//!
//! Each test runs in its own temporary directory through a `Context` scoped
//! to it: build the project's `ci` output, start its processes if it has any,
//! then run `.test.sh` inside the environment. Processes are torn down by a
//! guard so every exit path stops them.

use std::path::Path;

use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::environment;
use crate::error::{Error, Result};
use crate::infrastructure::Handoff;
use crate::interrupt;
use crate::log;
use crate::processes;
use crate::project;
use crate::testing::catalog::{self, TagIndex, TestCase};
use crate::testing::sandbox::{self, TEST_SCRIPT};


/// `ci` output content that means the project declares processes.
pub const PROCESSES_MARKER: &str = "-devkit-up";

const STREAM_LOGS: &str = "tail -f .devkit/processes.log";


#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    /// Test or tag names; empty selects the `local` tag.
    pub names: Vec<String>,
    /// Dropped from tag expansions only.
    pub exclude: Vec<String>,
    pub debug: bool,
    pub keep_going: bool,
}


/// How a suite that did not error ended.
#[derive(Debug, PartialEq)]
pub enum SuiteOutcome {
    /// Every selected test passed, in run order.
    Passed(Vec<String>),
    /// A test failed under `--debug`; the caller drops into its sandbox.
    DebugShell(Handoff),
}


/// Stops a test's processes and log streamer when dropped.
struct Teardown<'e> {
    engine: Engine<'e>,
    streamer: Option<u32>,
}


impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if let Err(err) = processes::stop(&self.engine) {
            warn!("Could not stop test processes: {}", err);
        }
        if let Some(pid) = self.streamer.take() {
            let _ = self.engine.runner().terminate(pid);
        }
    }
}


/// Whether the sandbox's `ci` output declares processes.
pub fn has_processes(sandbox: &Path) -> bool {
    std::fs::read(sandbox.join(".devkit").join("gc").join("ci"))
        .map(|bytes| String::from_utf8_lossy(&bytes).contains(PROCESSES_MARKER))
        .unwrap_or(false)
}


/// Build, start and exercise one materialised test.
///
/// `started` is set once processes are up so the caller can point at their
/// log when dropping into a debug shell. With `debug` the processes are left
/// running for inspection.
pub fn run_test(engine: &Engine, debug: bool, started: &mut bool) -> Result<()> {
    let sandbox = engine.ctx().root.clone();

    info!("    Running $ devkit ci ...");
    project::ci(engine)?;

    let mut teardown: Option<Teardown> = None;
    if has_processes(&sandbox) {
        info!("    Starting processes ...");
        processes::up(engine, None, true)?;
        *started = true;
        if !debug {
            teardown = Some(Teardown {
                engine: *engine,
                streamer: None,
            });
        }
        let streamer = engine.runner().spawn(STREAM_LOGS, &engine.options(), None)?;
        if let Some(guard) = teardown.as_mut() {
            guard.streamer = Some(streamer);
        }
    }

    if sandbox.join(TEST_SCRIPT).exists() {
        info!("    Running {} ...", TEST_SCRIPT);
        environment::run_in(engine, &format!("bash ./{}", TEST_SCRIPT))?;
    }
    Ok(())
}


/// Discover, select and run tests one after another.
///
/// Interrupts always propagate. Otherwise a failure is recorded and skipped
/// with `keep_going`, turns into a shell in the kept sandbox with `debug`,
/// or ends the suite with the test's own error.
pub fn run_suite(engine: &Engine, opts: &SuiteOptions) -> Result<SuiteOutcome> {
    let ctx = engine.ctx();
    environment::assemble(engine)?;
    let tests = log::task("Gathering tests", || catalog::discover_tests(engine))?;
    let index = TagIndex::build(&tests);
    let selected = catalog::resolve_selection(&opts.names, &tests, &index, &opts.exclude);
    info!("Found {} test(s), running {}:", tests.len(), selected.len());

    let mut passed = Vec::new();
    let mut failed = Vec::new();

    for name in &selected {
        if interrupt::requested() {
            return Err(Error::Interrupted);
        }
        let test: &TestCase = match tests.get(name) {
            Some(test) => test,
            None => continue,
        };

        let dir = sandbox::create(name)?;
        sandbox::materialize(test, dir.path(), &ctx.root)?;
        let scoped = ctx.scoped_to(dir.path());
        let scoped_engine = engine.with_context(&scoped);

        let mut started = false;
        let result = log::task(&format!("  Testing {}", name), || {
            run_test(&scoped_engine, opts.debug, &mut started)
        });
        let err = match result {
            Ok(()) => {
                passed.push(name.clone());
                continue;
            }
            Err(err) if err.is_interrupt() => return Err(err),
            Err(err) => err,
        };

        error!("Test {} failed.", name);
        if opts.keep_going {
            failed.push(name.clone());
            continue;
        }
        if opts.debug {
            #[allow(deprecated)]
            let kept = dir.into_path();
            warn!("Entering shell because of the --debug flag:");
            warn!("  - devkit: {}", ctx.exe.display());
            warn!("  - cwd: {}", kept.display());
            if started {
                warn!("  - up logs: .devkit/processes.log:");
            }
            return Ok(SuiteOutcome::DebugShell(Handoff::interactive_shell(&kept)));
        }
        warn!("Pass --debug flag to enter shell.");
        return Err(err);
    }

    if !failed.is_empty() {
        return Err(Error::TestFailure(failed));
    }
    Ok(SuiteOutcome::Passed(passed))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::environment::tests::modules_fixture;
    use crate::infrastructure::MockRunner;
    use std::path::PathBuf;

    /// Project with a `devkit.nix` and a store path the mock `ci` build returns.
    fn setup(dir: &Path) -> (Context, String) {
        let root = dir.join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("devkit.nix"), "{ ... }: { }\n").unwrap();
        let modules = modules_fixture(dir);
        let store = dir.join("ci-out");
        std::fs::write(&store, "").unwrap();
        (
            Context::new(&root, &dir.join("home-gc"), &modules),
            store.display().to_string(),
        )
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn sandboxes(runner: &MockRunner, marker: &str) -> Vec<PathBuf> {
        runner
            .calls()
            .into_iter()
            .filter(|c| c.cmd.contains(marker))
            .filter_map(|c| c.cwd)
            .collect()
    }

    const TWO_LOCAL: &str = r#"{
        "a": {"tags": ["local"], "nix": "{ }", "test": "exit 1"},
        "b": {"tags": ["local"], "nix": "{ }", "test": "true"}
    }"#;

    #[test]
    fn passing_suite_runs_each_test_in_its_own_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .respond(".#ci", &store);

        let outcome = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap();
        assert_eq!(outcome, SuiteOutcome::Passed(names(&["a", "b"])));

        let scripts = sandboxes(&runner, "-c bash ./.test.sh");
        assert_eq!(scripts.len(), 2);
        let first = scripts[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(first.starts_with("a_"));
        // sandboxes are removed afterwards
        assert!(!scripts[0].exists());
        assert!(runner.spawned_commands().is_empty());
    }

    #[test]
    fn keep_going_reports_only_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .fail_in("a_", "-c bash ./.test.sh", 1)
            .respond(".#ci", &store);

        let opts = SuiteOptions {
            keep_going: true,
            ..Default::default()
        };
        let err = run_suite(&Engine::new(&ctx, &runner), &opts).unwrap_err();
        match &err {
            Error::TestFailure(failed) => assert_eq!(failed, &names(&["a"])),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "Failed: a");
        // b still ran
        assert_eq!(sandboxes(&runner, "-c bash ./.test.sh").len(), 2);
    }

    #[test]
    fn interrupt_ends_suite_even_with_keep_going() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .interrupt_in("a_", "-c bash ./.test.sh")
            .respond(".#ci", &store);

        let opts = SuiteOptions {
            keep_going: true,
            ..Default::default()
        };
        let err = run_suite(&Engine::new(&ctx, &runner), &opts).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert_eq!(err.exit_code(), 130);
        // no failure summary and b never started
        let scripts = sandboxes(&runner, "-c bash ./.test.sh");
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].file_name().unwrap().to_string_lossy().starts_with("a_"));
    }

    #[test]
    fn test_selected_twice_runs_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(
                ".#devkit.tests",
                r#"{"a": {"tags": ["local", "fast"], "nix": "{ }", "test": "true"}}"#,
            )
            .respond(".#ci", &store);

        let opts = SuiteOptions {
            names: names(&["local", "fast"]),
            ..Default::default()
        };
        let outcome = run_suite(&Engine::new(&ctx, &runner), &opts).unwrap();
        assert_eq!(outcome, SuiteOutcome::Passed(names(&["a", "a"])));

        let scripts = sandboxes(&runner, "-c bash ./.test.sh");
        assert_eq!(scripts.len(), 2);
        assert_ne!(scripts[0], scripts[1]);
    }

    #[test]
    fn failure_without_flags_propagates_engine_code() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .fail_in("a_", "-c bash ./.test.sh", 3)
            .respond(".#ci", &store);

        let err = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        // b never ran
        assert_eq!(sandboxes(&runner, "-c bash ./.test.sh").len(), 1);
    }

    #[test]
    fn debug_failure_keeps_sandbox_and_hands_off_shell() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .fail_in("a_", "-c bash ./.test.sh", 1)
            .respond(".#ci", &store);

        let opts = SuiteOptions {
            debug: true,
            ..Default::default()
        };
        let outcome = run_suite(&Engine::new(&ctx, &runner), &opts).unwrap();
        let handoff = match outcome {
            SuiteOutcome::DebugShell(h) => h,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(handoff.program, PathBuf::from("/bin/sh"));
        let kept = handoff.cwd.unwrap();
        assert!(kept.join(TEST_SCRIPT).exists());
        std::fs::remove_dir_all(kept).unwrap();
    }

    #[test]
    fn build_failure_fails_the_test() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .fail(".#ci", 100);

        let err = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 100);
        assert!(sandboxes(&runner, "-c bash ./.test.sh").is_empty());
    }

    #[test]
    fn excluded_tag_members_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", TWO_LOCAL)
            .respond(".#ci", &store);

        let opts = SuiteOptions {
            exclude: names(&["a"]),
            ..Default::default()
        };
        let outcome = run_suite(&Engine::new(&ctx, &runner), &opts).unwrap();
        assert_eq!(outcome, SuiteOutcome::Passed(names(&["b"])));
    }

    #[test]
    fn script_is_skipped_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", r#"{"n": {"tags": ["local"], "nix": "{ }"}}"#)
            .respond(".#ci", &store);

        let outcome = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap();
        assert_eq!(outcome, SuiteOutcome::Passed(names(&["n"])));
        assert!(sandboxes(&runner, "develop").is_empty());
    }

    #[test]
    fn missing_project_file_stops_before_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(dir.path(), &dir.path().join("gc"), dir.path());
        let runner = MockRunner::new();
        let err = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingProjectFile { .. }));
        assert!(runner.executed_commands().is_empty());
    }

    /// A test whose source tree already carries a `ci` output declaring
    /// processes, standing in for a real build.
    fn process_test(dir: &Path) -> String {
        let src = dir.join("src-tree");
        let gc = src.join(".devkit").join("gc");
        std::fs::create_dir_all(&gc).unwrap();
        std::fs::write(gc.join("ci"), "exec /nix/store/x-devkit-up\n").unwrap();
        std::fs::write(src.join("devkit.nix"), "{ ... }: { }\n").unwrap();
        std::fs::write(src.join(TEST_SCRIPT), "curl localhost\n").unwrap();
        format!(
            r#"{{"p": {{"tags": ["local"], "src": "{}"}}}}"#,
            src.display()
        )
    }

    fn supervisor(dir: &Path) -> String {
        let script = dir.join("procfile-script");
        std::fs::write(&script, "process-compose up\n").unwrap();
        script.display().to_string()
    }

    #[test]
    fn processes_are_started_streamed_and_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", &process_test(dir.path()))
            .respond(".#ci", &store)
            .respond("procfileScript", &supervisor(dir.path()));

        let outcome = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap();
        assert_eq!(outcome, SuiteOutcome::Passed(names(&["p"])));

        let spawned = runner.spawned_commands();
        assert_eq!(spawned.len(), 2);
        assert!(spawned[0].ends_with("/.devkit/processes'"));
        assert_eq!(spawned[1], STREAM_LOGS);
        // supervisor and streamer both terminated
        assert_eq!(runner.terminated_pids().len(), 2);
    }

    #[test]
    fn processes_are_stopped_when_the_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", &process_test(dir.path()))
            .respond(".#ci", &store)
            .respond("procfileScript", &supervisor(dir.path()))
            .fail("-c bash ./.test.sh", 7);

        let err = run_suite(&Engine::new(&ctx, &runner), &SuiteOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 7);
        assert_eq!(runner.terminated_pids().len(), 2);
    }

    #[test]
    fn debug_leaves_processes_running() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = setup(dir.path());
        let runner = MockRunner::new()
            .respond(".#devkit.tests", &process_test(dir.path()))
            .respond(".#ci", &store)
            .respond("procfileScript", &supervisor(dir.path()))
            .fail("-c bash ./.test.sh", 7);

        let opts = SuiteOptions {
            debug: true,
            ..Default::default()
        };
        match run_suite(&Engine::new(&ctx, &runner), &opts).unwrap() {
            SuiteOutcome::DebugShell(h) => {
                let kept = h.cwd.unwrap();
                assert!(kept.join(".devkit").join("processes.pid").exists());
                std::fs::remove_dir_all(kept).unwrap();
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(runner.terminated_pids().is_empty());
    }

    #[test]
    fn marker_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_processes(dir.path()));
        let gc = dir.path().join(".devkit").join("gc");
        std::fs::create_dir_all(&gc).unwrap();
        std::fs::write(gc.join("ci"), "no processes here").unwrap();
        assert!(!has_processes(dir.path()));
        std::fs::write(gc.join("ci"), "/nix/store/abc-devkit-up").unwrap();
        assert!(has_processes(dir.path()));
    }
}
