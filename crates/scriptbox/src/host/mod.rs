//! Narrow interfaces onto the host process.
//!
//! The host owns a native argument vector (distinct from the interpreter's
//! command-line vector), a view that can be refreshed after a script mutates
//! host state, and an output channel for script messages. Work that touches
//! host state is funnelled through the host's main thread; see [`dispatch`].

pub mod dispatch;

pub use dispatch::{channel, DispatchError, Dispatcher, MainThread};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// Capabilities a host provides to running scripts.
pub trait Host: Send + Sync {
    /// The host-native argument vector read by host scripting APIs.
    fn native_argv(&self) -> Vec<String>;

    /// Replace the host-native argument vector.
    fn set_native_argv(&self, argv: Vec<String>);

    /// Force the host's view to redraw.
    fn refresh_view(&self);

    /// Deliver a line of script output.
    fn message(&self, text: &str) {
        tracing::info!(target: "scriptbox::script", "{text}");
    }
}

/// In-process host: keeps the native argv in memory and records output.
#[derive(Debug, Default)]
pub struct LocalHost {
    native_argv: RwLock<Vec<String>>,
    refreshes: AtomicU64,
    messages: Mutex<Vec<String>>,
}

impl LocalHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_native_argv(argv: Vec<String>) -> Self {
        Self {
            native_argv: RwLock::new(argv),
            ..Self::default()
        }
    }

    /// Number of times the view was refreshed.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Every message delivered so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Host for LocalHost {
    fn native_argv(&self) -> Vec<String> {
        self.native_argv
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_native_argv(&self, argv: Vec<String>) {
        *self
            .native_argv
            .write()
            .unwrap_or_else(PoisonError::into_inner) = argv;
    }

    fn refresh_view(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn message(&self, text: &str) {
        tracing::info!(target: "scriptbox::script", "{text}");
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}
