//! Scriptbox: run an external script inside a long-lived host's embedded
//! scripting engine without leaking the script's effects into the host.
//!
//! A [`runner::ScriptRunner`] resolves the script's text encoding, compiles it
//! eagerly, then executes it on the host's main thread behind a saved-state
//! guard: command-line vectors, environment, working directory and the module
//! registry are overridden for the run and restored afterwards on every exit
//! path. A short debugger-attach preamble runs on the main thread right before
//! the script body.

#![forbid(unsafe_code)]
// Internal helpers are documented where non-obvious; public API types have docs.
#![allow(missing_docs)]

pub mod compiler;
pub mod config;
pub mod context;
pub mod debugger;
pub mod encoding;
pub mod host;
pub mod interpreter;
pub mod model;
pub mod runner;
pub mod runtime;

pub use crate::model::*;

pub mod run {
    use super::model::{RunReport, ScriptSpec};
    use super::runner::{RunnerResult, ScriptRunner};
    use super::runtime::Runtime;

    /// Construct a runner for `spec` and execute it once.
    pub fn run_script(spec: ScriptSpec, runtime: &Runtime) -> RunnerResult<RunReport> {
        let mut runner = ScriptRunner::new(spec, runtime)?;
        let report = runner.exec()?;
        Ok(RunReport {
            run_id: runner.run_id(),
            path: runner.path().display().to_string(),
            abspath: runner.abspath().display().to_string(),
            encoding: runner.encoding().to_string(),
            evicted_modules: report.evicted_modules,
            duration_ms: report.duration_ms,
        })
    }

    /// Resolve the encoding and compile `spec` without executing it.
    pub fn check_script(spec: ScriptSpec, runtime: &Runtime) -> RunnerResult<RunReport> {
        let runner = ScriptRunner::new(spec, runtime)?;
        Ok(RunReport {
            run_id: runner.run_id(),
            path: runner.path().display().to_string(),
            abspath: runner.abspath().display().to_string(),
            encoding: runner.encoding().to_string(),
            evicted_modules: Vec::new(),
            duration_ms: 0,
        })
    }
}
