//! Saved ambient state around a single script execution.
//!
//! [`ContextGuard::enter`] captures the command-line vector, the host-native
//! argument vector, the process environment, the working directory and the
//! set of loaded module names, then applies a script's overrides. Dropping
//! the guard (or calling [`ContextGuard::restore`]) puts everything back,
//! including on error returns and unwinding.
//!
//! The state touched here is process-wide. Nothing serialises concurrent
//! guards; at most one script may be in flight per process.

use crate::host::Host;
use crate::interpreter::Interpreter;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Overrides presented to a script for the duration of its run.
#[derive(Clone, Copy, Debug)]
pub struct Overrides<'a> {
    /// Replaces the interpreter's command-line vector.
    pub argv: &'a [String],
    /// Replaces the host-native argument vector.
    pub native_argv: &'a [String],
    /// Merged into the process environment.
    pub env: &'a BTreeMap<String, String>,
    /// Becomes the working directory.
    pub cwd: &'a Path,
}

/// Snapshot of ambient state taken before a script runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedContext {
    argv: Vec<String>,
    native_argv: Vec<String>,
    env: BTreeMap<OsString, OsString>,
    cwd: PathBuf,
    modules: BTreeSet<String>,
}

/// What restoring a [`SavedContext`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Modules loaded during the run and evicted afterwards.
    pub evicted_modules: Vec<String>,
    /// Environment variables removed or reset.
    pub env_changes: usize,
}

/// The working directory could not be restored. Everything else was, and
/// `report` says what changed.
#[derive(Debug, Error)]
#[error("failed to restore working directory {}", cwd.display())]
pub struct RestoreError {
    pub cwd: PathBuf,
    #[source]
    pub source: io::Error,
    pub report: RestoreReport,
}

fn env_snapshot() -> BTreeMap<OsString, OsString> {
    std::env::vars_os().collect()
}

impl SavedContext {
    pub fn capture(interpreter: &Interpreter, host: &dyn Host) -> io::Result<Self> {
        Ok(Self {
            argv: interpreter.argv(),
            native_argv: host.native_argv(),
            env: env_snapshot(),
            cwd: std::env::current_dir()?,
            modules: interpreter.modules().names(),
        })
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    #[must_use]
    pub fn native_argv(&self) -> &[String] {
        &self.native_argv
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// Put the captured state back.
    ///
    /// Every step is attempted even if changing back to the saved working
    /// directory fails; the error then still carries the report.
    pub fn restore(
        self,
        interpreter: &Interpreter,
        host: &dyn Host,
    ) -> Result<RestoreReport, RestoreError> {
        interpreter.replace_argv(self.argv);
        host.set_native_argv(self.native_argv);
        let cwd_result = std::env::set_current_dir(&self.cwd);
        let env_changes = restore_env(&self.env);
        let evicted_modules = interpreter.modules().retain_only(&self.modules);
        if !evicted_modules.is_empty() {
            tracing::debug!(modules = ?evicted_modules, "evicted modules loaded by script");
        }
        let report = RestoreReport {
            evicted_modules,
            env_changes,
        };
        match cwd_result {
            Ok(()) => Ok(report),
            Err(source) => Err(RestoreError {
                cwd: self.cwd,
                source,
                report,
            }),
        }
    }
}

fn restore_env(saved: &BTreeMap<OsString, OsString>) -> usize {
    let current = env_snapshot();
    let mut changes = 0;
    for key in current.keys().filter(|key| !saved.contains_key(*key)) {
        std::env::remove_var(key);
        changes += 1;
    }
    for (key, value) in saved {
        if current.get(key) != Some(value) {
            std::env::set_var(key, value);
            changes += 1;
        }
    }
    changes
}

fn apply(overrides: Overrides<'_>, interpreter: &Interpreter, host: &dyn Host) -> io::Result<()> {
    interpreter.replace_argv(overrides.argv.to_vec());
    host.set_native_argv(overrides.native_argv.to_vec());
    for (key, value) in overrides.env {
        std::env::set_var(key, value);
    }
    std::env::set_current_dir(overrides.cwd)
}

/// Scoped override of ambient state; restores on drop.
pub struct ContextGuard<'a> {
    saved: Option<SavedContext>,
    interpreter: &'a Interpreter,
    host: &'a dyn Host,
}

impl<'a> ContextGuard<'a> {
    /// Capture the current state, then apply `overrides`.
    ///
    /// If applying fails part-way, the captured state is restored before the
    /// error is returned.
    pub fn enter(
        interpreter: &'a Interpreter,
        host: &'a dyn Host,
        overrides: Overrides<'_>,
    ) -> io::Result<Self> {
        let saved = SavedContext::capture(interpreter, host)?;
        let guard = Self {
            saved: Some(saved),
            interpreter,
            host,
        };
        apply(overrides, interpreter, host)?;
        Ok(guard)
    }

    /// The captured state, while the guard is active.
    #[must_use]
    pub fn saved(&self) -> Option<&SavedContext> {
        self.saved.as_ref()
    }

    /// Restore now and report what changed.
    pub fn restore(mut self) -> Result<RestoreReport, RestoreError> {
        match self.saved.take() {
            Some(saved) => saved.restore(self.interpreter, self.host),
            None => Ok(RestoreReport::default()),
        }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = saved.restore(self.interpreter, self.host) {
                tracing::warn!(
                    %err,
                    evicted = ?err.report.evicted_modules,
                    "failed to restore ambient state"
                );
            }
        }
    }
}
