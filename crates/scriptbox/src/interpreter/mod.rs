//! Ambient interpreter state shared by every script run in the process.
//!
//! Besides the real process environment and working directory, scripts see
//! three pieces of interpreter-owned state: the command-line vector, the
//! module search path and the module registry. [`Interpreter`] owns those.
//! [`Interpreter::global`] is the process-wide instance; hosts and tests may
//! create private ones.

pub mod modules;

pub use modules::{ModuleLoader, ModuleRegistry};

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

#[derive(Debug)]
struct InterpreterState {
    argv: RwLock<Vec<String>>,
    search_path: RwLock<Vec<String>>,
    modules: ModuleRegistry,
}

/// Handle to a set of ambient interpreter state. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Interpreter {
    state: Arc<InterpreterState>,
}

impl Interpreter {
    /// Create an interpreter whose argv is the process arguments.
    ///
    /// The current directory (`""`) is put at the front of the search path
    /// if it is not already present.
    #[must_use]
    pub fn new(search_path: Vec<String>) -> Self {
        let argv = std::env::args_os()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let interpreter = Self {
            state: Arc::new(InterpreterState {
                argv: RwLock::new(argv),
                search_path: RwLock::new(search_path),
                modules: ModuleRegistry::default(),
            }),
        };
        interpreter.ensure_current_dir_first();
        interpreter
    }

    /// The process-wide interpreter, created on first use from
    /// `SCRIPTBOX_PATH`.
    pub fn global() -> &'static Interpreter {
        static GLOBAL: OnceLock<Interpreter> = OnceLock::new();
        GLOBAL.get_or_init(|| Interpreter::new(crate::config::search_path_from_env()))
    }

    /// Current command-line vector as scripts see it.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        self.state
            .argv
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the command-line vector, returning the previous one.
    pub fn replace_argv(&self, argv: Vec<String>) -> Vec<String> {
        let mut slot = self
            .state
            .argv
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, argv)
    }

    #[must_use]
    pub fn search_path(&self) -> Vec<String> {
        self.state
            .search_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Insert `""` at the front of the search path unless it is already
    /// present anywhere. Returns whether an entry was inserted.
    pub fn ensure_current_dir_first(&self) -> bool {
        let mut path = self
            .state
            .search_path
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if path.iter().any(String::is_empty) {
            return false;
        }
        path.insert(0, String::new());
        true
    }

    /// Append each entry of `entries` not already on the search path.
    /// Returns how many were added.
    pub fn extend_search_path(&self, entries: &[String]) -> usize {
        let mut path = self
            .state
            .search_path
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for entry in entries {
            if !path.contains(entry) {
                path.push(entry.clone());
                added += 1;
            }
        }
        added
    }

    #[must_use]
    pub fn modules(&self) -> &ModuleRegistry {
        &self.state.modules
    }
}
