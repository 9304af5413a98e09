// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Script runner lifecycle: construction, sandboxed execution and restoration.

use scriptbox::debugger::{Debugger, DebuggerError, TcpDebugger};
use scriptbox::host::{self, Host, LocalHost};
use scriptbox::interpreter::Interpreter;
use scriptbox::model::{Access, ScriptSpec, Settings};
use scriptbox::runner::{RunnerError, ScriptRunner};
use scriptbox::runtime::Runtime;
use scriptbox_fixtures::{env_lock, write_script, Harness};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn env_snapshot() -> BTreeMap<OsString, OsString> {
    std::env::vars_os().collect()
}

fn canonical(path: &std::path::Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap()
}

/// Debugger whose client never arrives.
struct UnreachableDebugger;

impl Debugger for UnreachableDebugger {
    fn debug_this_thread(&self) -> Result<(), DebuggerError> {
        Ok(())
    }

    fn wait_for_client(&self) -> Result<(), DebuggerError> {
        Err(DebuggerError::Io(std::io::Error::other("listener closed")))
    }
}

/// Host whose view refresh blows up on the main thread.
struct CrashingHost {
    inner: LocalHost,
}

impl Host for CrashingHost {
    fn native_argv(&self) -> Vec<String> {
        self.inner.native_argv()
    }

    fn set_native_argv(&self, argv: Vec<String>) {
        self.inner.set_native_argv(argv);
    }

    fn refresh_view(&self) {
        panic!("view refresh crashed");
    }
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn latin1_declared_script_runs_as_main() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let mut raw = b"// -*- coding: latin-1 -*-\nlet word = \"caf".to_vec();
    raw.push(0xe9);
    raw.extend_from_slice(b"\";\nlet is_main = __name__ == \"__main__\";\n");
    let path = write_script(dir.path(), "main.rhai", raw);
    let harness = Harness::new();

    let mut runner =
        ScriptRunner::new(ScriptSpec::new("main.rhai").cwd(dir.path()), &harness.runtime).unwrap();

    assert_eq!(runner.encoding(), "latin-1");
    assert_eq!(runner.abspath(), path.as_path());
    assert_eq!(
        runner.code().reported_source(),
        Some(path.to_string_lossy().as_ref())
    );

    runner.exec().unwrap();

    assert_eq!(runner.global_string("word").as_deref(), Some("café"));
    assert_eq!(runner.globals().get_value::<bool>("is_main"), Some(true));
}

#[test]
fn argv_starts_with_the_path_as_given() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "tools/dump.rhai",
        "let first = argv()[0];\nlet argc = argv().len();\nlet host_args = host_argv();\nlet file = __file__;\n",
    );
    let harness = Harness::new();
    let spec = ScriptSpec::new("tools/dump.rhai")
        .cwd(dir.path())
        .args(["--limit", "3"]);

    let mut runner = ScriptRunner::new(spec, &harness.runtime).unwrap();

    assert_eq!(
        runner.argv(),
        ["tools/dump.rhai", "--limit", "3"].map(String::from).as_slice()
    );
    let abspath = dir.path().join("tools/dump.rhai");
    assert_eq!(runner.abspath(), abspath.as_path());
    assert_eq!(
        runner.global_string("__file__"),
        Some(abspath.to_string_lossy().into_owned())
    );

    runner.exec().unwrap();

    // The interpreter argv holds only the path; the host argv holds everything.
    assert_eq!(runner.global_string("first").as_deref(), Some("tools/dump.rhai"));
    assert_eq!(runner.globals().get_value::<rhai::INT>("argc"), Some(1));
    let host_args = runner.globals().get_value::<rhai::Array>("host_args").unwrap();
    assert_eq!(host_args.len(), 3);
    assert_eq!(
        runner.global_string("file"),
        Some(abspath.to_string_lossy().into_owned())
    );
}

#[test]
fn absolute_path_is_used_as_is() {
    let _lock = env_lock();
    let script_dir = tempfile::tempdir().unwrap();
    let other_dir = tempfile::tempdir().unwrap();
    let path = write_script(script_dir.path(), "abs.rhai", "let x = 1;");
    let harness = Harness::new();

    let runner = ScriptRunner::new(ScriptSpec::new(&path).cwd(other_dir.path()), &harness.runtime)
        .unwrap();

    assert_eq!(runner.abspath(), path.as_path());
    assert_eq!(runner.argv()[0], path.to_string_lossy());
}

#[test]
fn undecodable_script_fails_construction() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "bad.rhai", [b'l', b'e', b't', 0xff, 0xfe]);
    let harness = Harness::new();

    let err = ScriptRunner::new(ScriptSpec::new("bad.rhai").cwd(dir.path()), &harness.runtime)
        .unwrap_err();

    assert_eq!(err.code(), "E_ENCODING_UNRESOLVED");
    assert_eq!(err.exit_code(), 3);
    assert_eq!(harness.host.refresh_count(), 0);
}

#[test]
fn syntax_error_fails_construction_as_compile_error() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "broken.rhai", "let x = ;\nset_env(\"NEVER\", \"1\");\n");
    let harness = Harness::new();

    let err = ScriptRunner::new(ScriptSpec::new("broken.rhai").cwd(dir.path()), &harness.runtime)
        .unwrap_err();

    assert!(matches!(err, RunnerError::Compile { .. }));
    assert_eq!(err.code(), "E_COMPILE");
    assert!(std::env::var_os("NEVER").is_none());
}

#[test]
fn missing_script_is_an_io_error() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let err = ScriptRunner::new(ScriptSpec::new("nope.rhai").cwd(dir.path()), &harness.runtime)
        .unwrap_err();

    assert_eq!(err.code(), "E_IO");
}

#[test]
fn invalid_env_key_is_rejected() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "ok.rhai", "let x = 1;");
    let harness = Harness::new();

    let err = ScriptRunner::new(
        ScriptSpec::new("ok.rhai").cwd(dir.path()).env_var("A=B", "1"),
        &harness.runtime,
    )
    .unwrap_err();

    assert_eq!(err.code(), "E_INVALID_ARG");
}

// =============================================================================
// Execution and restoration
// =============================================================================

#[test]
fn env_overlay_is_visible_during_run_and_gone_after() {
    let _lock = env_lock();
    std::env::set_var("SCRIPTBOX_TEST_Y", "old");
    std::env::remove_var("SCRIPTBOX_TEST_X");
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "env.rhai",
        "let x = env(\"SCRIPTBOX_TEST_X\");\nlet y = env(\"SCRIPTBOX_TEST_Y\");\nset_env(\"SCRIPTBOX_TEST_Z\", \"script\");\n",
    );
    let harness = Harness::new();
    let before = env_snapshot();

    let mut runner = ScriptRunner::new(
        ScriptSpec::new("env.rhai")
            .cwd(dir.path())
            .env_var("SCRIPTBOX_TEST_X", "1"),
        &harness.runtime,
    )
    .unwrap();
    runner.exec().unwrap();

    assert_eq!(runner.global_string("x").as_deref(), Some("1"));
    assert_eq!(runner.global_string("y").as_deref(), Some("old"));
    assert!(std::env::var_os("SCRIPTBOX_TEST_X").is_none());
    assert!(std::env::var_os("SCRIPTBOX_TEST_Z").is_none());
    assert_eq!(std::env::var("SCRIPTBOX_TEST_Y").unwrap(), "old");
    assert_eq!(env_snapshot(), before);
    std::env::remove_var("SCRIPTBOX_TEST_Y");
}

#[test]
fn overlay_value_for_existing_key_is_reverted() {
    let _lock = env_lock();
    std::env::set_var("SCRIPTBOX_TEST_MODE", "host");
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "mode.rhai", "let mode = env(\"SCRIPTBOX_TEST_MODE\");");
    let harness = Harness::new();

    let mut runner = ScriptRunner::new(
        ScriptSpec::new("mode.rhai")
            .cwd(dir.path())
            .env_var("SCRIPTBOX_TEST_MODE", "script"),
        &harness.runtime,
    )
    .unwrap();
    runner.exec().unwrap();

    assert_eq!(runner.global_string("mode").as_deref(), Some("script"));
    assert_eq!(std::env::var("SCRIPTBOX_TEST_MODE").unwrap(), "host");
    std::env::remove_var("SCRIPTBOX_TEST_MODE");
}

#[test]
fn ambient_state_is_restored_after_success() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "helper.rhai", "fn greet(name) { \"hello \" + name }\n");
    write_script(
        dir.path(),
        "main.rhai",
        "import \"helper\" as helper;\nlet greeting = helper::greet(\"box\");\nlet here = cwd();\n",
    );
    let harness = Harness::new();
    harness
        .interpreter
        .modules()
        .insert("preloaded", rhai::Module::new().into());
    let argv_before = harness.interpreter.argv();
    let native_before = harness.host.native_argv();
    let cwd_before = std::env::current_dir().unwrap();
    let modules_before = harness.interpreter.modules().names();

    let mut runner =
        ScriptRunner::new(ScriptSpec::new("main.rhai").cwd(dir.path()), &harness.runtime).unwrap();
    let report = runner.exec().unwrap();

    assert_eq!(runner.global_string("greeting").as_deref(), Some("hello box"));
    assert_eq!(
        PathBuf::from(runner.global_string("here").unwrap()),
        canonical(dir.path())
    );
    assert_eq!(report.evicted_modules, vec!["helper".to_string()]);
    assert_eq!(harness.interpreter.argv(), argv_before);
    assert_eq!(harness.host.native_argv(), native_before);
    assert_eq!(std::env::current_dir().unwrap(), cwd_before);
    assert_eq!(harness.interpreter.modules().names(), modules_before);
    assert!(harness.interpreter.modules().contains("preloaded"));
}

#[test]
fn ambient_state_is_restored_after_script_error() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "helper.rhai", "fn twice(x) { x * 2 }\n");
    write_script(
        dir.path(),
        "fail.rhai",
        "import \"helper\" as helper;\nset_env(\"SCRIPTBOX_TEST_LEAK\", \"1\");\nthrow \"boom\";\n",
    );
    let harness = Harness::new();
    let argv_before = harness.interpreter.argv();
    let native_before = harness.host.native_argv();
    let cwd_before = std::env::current_dir().unwrap();
    let env_before = env_snapshot();

    let mut runner = ScriptRunner::new(
        ScriptSpec::new("fail.rhai")
            .cwd(dir.path())
            .env_var("SCRIPTBOX_TEST_OVERLAY", "1"),
        &harness.runtime,
    )
    .unwrap();
    let err = runner.exec().unwrap_err();

    assert!(matches!(err, RunnerError::Runtime { .. }));
    assert_eq!(err.code(), "E_RUNTIME");
    assert!(err.to_string().contains("boom"));
    assert_eq!(harness.interpreter.argv(), argv_before);
    assert_eq!(harness.host.native_argv(), native_before);
    assert_eq!(std::env::current_dir().unwrap(), cwd_before);
    assert_eq!(env_snapshot(), env_before);
    assert!(harness.interpreter.modules().is_empty());
}

#[test]
fn exec_runs_only_once() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "once.rhai", "print(\"ran\");");
    let harness = Harness::new();

    let mut runner =
        ScriptRunner::new(ScriptSpec::new("once.rhai").cwd(dir.path()), &harness.runtime).unwrap();
    runner.exec().unwrap();
    let err = runner.exec().unwrap_err();

    assert!(matches!(err, RunnerError::AlreadyExecuted));
    assert_eq!(harness.host.messages(), vec!["ran".to_string()]);
}

#[test]
fn preamble_refreshes_the_view_before_the_body() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "noop.rhai", "let x = 1;");
    let harness = Harness::new();

    let mut runner =
        ScriptRunner::new(ScriptSpec::new("noop.rhai").cwd(dir.path()), &harness.runtime).unwrap();
    assert_eq!(harness.host.refresh_count(), 0);
    runner.exec().unwrap();

    assert_eq!(harness.host.refresh_count(), 1);
}

#[test]
fn exec_waits_for_a_debugger_client() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "debugged.rhai", "let done = true;");
    let debugger = Arc::new(TcpDebugger::bind("127.0.0.1:0").unwrap());
    let addr = debugger.local_addr().unwrap();
    let harness = Harness::with(
        Settings::default(),
        Some(Arc::clone(&debugger) as Arc<dyn Debugger>),
    );

    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        TcpStream::connect(addr).unwrap()
    });
    let mut runner =
        ScriptRunner::new(ScriptSpec::new("debugged.rhai").cwd(dir.path()), &harness.runtime)
            .unwrap();
    runner.exec().unwrap();
    let _stream = client.join().unwrap();

    assert_eq!(runner.globals().get_value::<bool>("done"), Some(true));
    assert!(debugger.client_addr().is_some());
    // The preamble attaches the host's main thread, not the caller.
    assert_eq!(debugger.attached_thread().as_deref(), Some("host-main"));
}

#[test]
fn read_only_host_rejects_the_run_and_restores_state() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "write.rhai", "set_env(\"SCRIPTBOX_TEST_RO\", \"1\");");
    let (main_thread, dispatcher) = host::dispatch::channel_with_access(Access::Read);
    let _handle = dispatcher.spawn("read-only-main").unwrap();
    let host = Arc::new(LocalHost::new());
    let runtime = Runtime::builder(main_thread)
        .interpreter(Interpreter::new(Vec::new()))
        .host(Arc::clone(&host) as Arc<dyn Host>)
        .build();
    let cwd_before = std::env::current_dir().unwrap();

    let mut runner =
        ScriptRunner::new(ScriptSpec::new("write.rhai").cwd(dir.path()), &runtime).unwrap();
    let err = runner.exec().unwrap_err();

    assert_eq!(err.code(), "E_DISPATCH");
    assert!(std::env::var_os("SCRIPTBOX_TEST_RO").is_none());
    assert_eq!(std::env::current_dir().unwrap(), cwd_before);
    assert_eq!(host.refresh_count(), 0);
}

#[test]
fn run_script_reports_encoding_and_evictions() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "lib/util.rhai", "fn one() { 1 }\n");
    write_script(
        dir.path(),
        "report.rhai",
        "import \"lib/util\" as util;\nlet v = util::one();\n",
    );
    let harness = Harness::new();

    let report = scriptbox::run::run_script(
        ScriptSpec::new("report.rhai").cwd(dir.path()),
        &harness.runtime,
    )
    .unwrap();

    assert_eq!(report.path, "report.rhai");
    assert_eq!(report.encoding, "utf-8");
    assert_eq!(report.evicted_modules, vec!["lib/util".to_string()]);
}

#[test]
fn debugger_failure_aborts_the_run_and_restores_state() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "never.rhai", "set_env(\"SCRIPTBOX_TEST_NEVER\", \"1\");");
    let harness = Harness::with(
        Settings::default(),
        Some(Arc::new(UnreachableDebugger) as Arc<dyn Debugger>),
    );
    let argv_before = harness.interpreter.argv();
    let native_before = harness.host.native_argv();
    let cwd_before = std::env::current_dir().unwrap();
    let env_before = env_snapshot();

    let mut runner = ScriptRunner::new(
        ScriptSpec::new("never.rhai")
            .cwd(dir.path())
            .env_var("SCRIPTBOX_TEST_ATTACH", "1"),
        &harness.runtime,
    )
    .unwrap();
    let err = runner.exec().unwrap_err();

    assert!(matches!(err, RunnerError::Attach { .. }));
    assert_eq!(err.code(), "E_ATTACH");
    assert_eq!(harness.interpreter.argv(), argv_before);
    assert_eq!(harness.host.native_argv(), native_before);
    assert_eq!(std::env::current_dir().unwrap(), cwd_before);
    assert_eq!(env_snapshot(), env_before);
    // The body never ran and the view was never refreshed.
    assert_eq!(harness.host.refresh_count(), 0);
}

#[test]
fn panic_on_the_main_thread_restores_state() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "crash.rhai", "let x = 1;");
    let (main_thread, dispatcher) = host::channel();
    let _handle = dispatcher.spawn("crashing-main").unwrap();
    let host = Arc::new(CrashingHost {
        inner: LocalHost::with_native_argv(vec!["host-binary".to_string()]),
    });
    let interpreter = Interpreter::new(Vec::new());
    let runtime = Runtime::builder(main_thread)
        .interpreter(interpreter.clone())
        .host(Arc::clone(&host) as Arc<dyn Host>)
        .build();
    let argv_before = interpreter.argv();
    let cwd_before = std::env::current_dir().unwrap();
    let env_before = env_snapshot();

    let mut runner = ScriptRunner::new(
        ScriptSpec::new("crash.rhai")
            .cwd(dir.path())
            .env_var("SCRIPTBOX_TEST_CRASH", "1"),
        &runtime,
    )
    .unwrap();
    let err = runner.exec().unwrap_err();

    assert_eq!(err.code(), "E_DISPATCH");
    assert_eq!(interpreter.argv(), argv_before);
    assert_eq!(host.native_argv(), vec!["host-binary".to_string()]);
    assert_eq!(std::env::current_dir().unwrap(), cwd_before);
    assert_eq!(env_snapshot(), env_before);
    // The dispatcher survives the panic and keeps serving.
    assert_eq!(
        runtime
            .main_thread()
            .execute_sync(Access::Read, || 5)
            .unwrap(),
        5
    );
}

