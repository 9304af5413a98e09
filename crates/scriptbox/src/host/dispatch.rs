//! Synchronous hand-off to the host's main thread.
//!
//! [`MainThread::execute_sync`] sends a task over a single-slot channel and
//! blocks until the host's [`Dispatcher`] has run it and replied. Tasks are
//! served one at a time in submission order, so two submissions from the same
//! caller never overlap with each other or with any other queued work.

use crate::model::Access;
use miette::Diagnostic;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce(Result<(), DispatchError>) + Send + 'static>;

struct Request {
    access: Access,
    job: Job,
}

#[derive(Debug)]
struct Shared {
    max_access: Access,
    home: OnceLock<ThreadId>,
}

impl Shared {
    fn grant(&self, requested: Access) -> Result<(), DispatchError> {
        if requested <= self.max_access {
            Ok(())
        } else {
            Err(DispatchError::AccessDenied {
                requested,
                granted: self.max_access,
            })
        }
    }
}

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("host main thread is not accepting work")]
    #[diagnostic(code(E_DISPATCH))]
    Closed,

    #[error("main-thread task ended without producing a result")]
    #[diagnostic(code(E_DISPATCH))]
    Abandoned,

    #[error("host denied {requested:?} access (grants up to {granted:?})")]
    #[diagnostic(code(E_DISPATCH))]
    AccessDenied { requested: Access, granted: Access },
}

/// Submitting side of the main-thread queue. Cheap to clone.
#[derive(Clone)]
pub struct MainThread {
    tx: mpsc::Sender<Request>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MainThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThread")
            .field("max_access", &self.shared.max_access)
            .field("home", &self.shared.home.get())
            .finish_non_exhaustive()
    }
}

/// Host side of the main-thread queue.
pub struct Dispatcher {
    rx: mpsc::Receiver<Request>,
    shared: Arc<Shared>,
}

/// Create a queue whose dispatcher grants every access level.
#[must_use]
pub fn channel() -> (MainThread, Dispatcher) {
    channel_with_access(Access::Write)
}

/// Create a queue whose dispatcher grants at most `max_access`.
#[must_use]
pub fn channel_with_access(max_access: Access) -> (MainThread, Dispatcher) {
    let (tx, rx) = mpsc::channel(1);
    let shared = Arc::new(Shared {
        max_access,
        home: OnceLock::new(),
    });
    (
        MainThread {
            tx,
            shared: Arc::clone(&shared),
        },
        Dispatcher { rx, shared },
    )
}

impl MainThread {
    /// Whether the calling thread is the one serving this queue.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.shared.home.get() == Some(&thread::current().id())
    }

    /// Run `task` on the host's main thread with `access`, blocking until it
    /// has finished.
    ///
    /// Called from the main thread itself, the task runs inline.
    ///
    /// # Panics
    ///
    /// Must not be called from within an async runtime context.
    pub fn execute_sync<F, R>(&self, access: Access, task: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            self.shared.grant(access)?;
            return Ok(task());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |granted| {
            // The submitter may have gone away; nothing to report then.
            let _ = reply_tx.send(granted.map(|()| task()));
        });
        self.tx
            .blocking_send(Request { access, job })
            .map_err(|_| DispatchError::Closed)?;
        reply_rx
            .blocking_recv()
            .map_err(|_| DispatchError::Abandoned)?
    }
}

impl Dispatcher {
    /// Serve requests on the calling thread until every [`MainThread`]
    /// handle has been dropped.
    pub fn run(mut self) {
        self.claim();
        while let Some(request) = self.rx.blocking_recv() {
            self.serve(request);
        }
        tracing::debug!("main-thread queue closed");
    }

    /// Serve whatever is queued right now without blocking. Returns the
    /// number of requests served.
    pub fn drain(&mut self) -> usize {
        self.claim();
        let mut served = 0;
        while let Ok(request) = self.rx.try_recv() {
            self.serve(request);
            served += 1;
        }
        served
    }

    /// Run the dispatcher on a dedicated, named thread.
    pub fn spawn(self, name: &str) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
    }

    fn claim(&self) {
        let current = thread::current().id();
        let home = *self.shared.home.get_or_init(|| current);
        if home != current {
            tracing::warn!("main-thread queue served from a different thread than before");
        }
    }

    fn serve(&self, request: Request) {
        let Request { access, job } = request;
        let granted = self.shared.grant(access);
        if let Err(err) = &granted {
            tracing::warn!(%err, "rejecting main-thread request");
        }
        if panic::catch_unwind(AssertUnwindSafe(move || job(granted))).is_err() {
            tracing::error!("main-thread task panicked");
        }
    }
}
