//! Shared helpers for scriptbox integration tests.
//!
//! Script execution mutates process-wide state (environment, working
//! directory), so every test that executes a script must hold
//! [`env_lock`] for its whole duration.

#![allow(missing_docs)]

use scriptbox::debugger::Debugger;
use scriptbox::host::{self, Host, LocalHost};
use scriptbox::interpreter::Interpreter;
use scriptbox::model::Settings;
use scriptbox::runtime::Runtime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Serialise tests that touch the environment or working directory.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Write `bytes` to `dir/name`, creating parent directories.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_script(dir: &Path, name: &str, bytes: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        #[allow(clippy::expect_used)]
        fs::create_dir_all(parent).expect("failed to create script directory");
    }
    #[allow(clippy::expect_used)]
    fs::write(&path, bytes).expect("failed to write script");
    path
}

/// A runtime wired to a [`LocalHost`] and a private [`Interpreter`], with
/// its dispatcher running on a background "main" thread.
pub struct Harness {
    pub runtime: Runtime,
    pub host: Arc<LocalHost>,
    pub interpreter: Interpreter,
    // Detached: the thread exits once every MainThread handle is dropped.
    _dispatcher: JoinHandle<()>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::with(Settings::default(), None)
    }

    /// # Panics
    ///
    /// Panics if the dispatcher thread cannot be spawned.
    #[must_use]
    pub fn with(settings: Settings, debugger: Option<Arc<dyn Debugger>>) -> Self {
        let host = Arc::new(LocalHost::with_native_argv(vec!["host-binary".to_string()]));
        let interpreter = Interpreter::new(settings.search_path.clone());
        let (main_thread, dispatcher) = host::channel();
        #[allow(clippy::expect_used)]
        let handle = dispatcher
            .spawn("host-main")
            .expect("failed to spawn dispatcher thread");
        let mut builder = Runtime::builder(main_thread)
            .settings(settings)
            .interpreter(interpreter.clone())
            .host(Arc::clone(&host) as Arc<dyn Host>);
        if let Some(debugger) = debugger {
            builder = builder.debugger(debugger);
        }
        Self {
            runtime: builder.build(),
            host,
            interpreter,
            _dispatcher: handle,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
