//! Debugger attach support.
//!
//! Before a script body runs, a fixed [`PREAMBLE`] is executed on the host's
//! main thread. It calls the functions registered from a [`Debugger`]:
//! attach the current thread, block until a client connects, then refresh
//! the host view.

use miette::Diagnostic;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Script text run on the main thread right before the script body.
pub const PREAMBLE: &str = "debug_this_thread();\nwait_for_client();\nrefresh_view();\n";

/// Source name reported for the preamble.
pub const PREAMBLE_SOURCE: &str = "<preamble>";

#[derive(Debug, Error, Diagnostic)]
pub enum DebuggerError {
    #[error("debugger i/o failed")]
    #[diagnostic(code(E_ATTACH))]
    Io(#[from] std::io::Error),
}

/// A debugger a script thread can attach to.
pub trait Debugger: Send + Sync {
    /// Mark the calling thread as debuggable.
    fn debug_this_thread(&self) -> Result<(), DebuggerError>;

    /// Block until a debugger client is connected.
    fn wait_for_client(&self) -> Result<(), DebuggerError>;
}

/// Debugger that needs no client; every call returns at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebugger;

impl Debugger for NoDebugger {
    fn debug_this_thread(&self) -> Result<(), DebuggerError> {
        Ok(())
    }

    fn wait_for_client(&self) -> Result<(), DebuggerError> {
        tracing::debug!("no debugger configured; not waiting for a client");
        Ok(())
    }
}

/// Debugger endpoint listening for a client over TCP.
///
/// `wait_for_client` blocks in `accept` with no timeout; once a client is
/// connected further waits return immediately.
#[derive(Debug)]
pub struct TcpDebugger {
    listener: TcpListener,
    client: Mutex<Option<TcpStream>>,
    attached: Mutex<Option<String>>,
}

impl TcpDebugger {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, DebuggerError> {
        let listener = TcpListener::bind(addr)?;
        tracing::info!(addr = %listener.local_addr()?, "debugger listening");
        Ok(Self {
            listener,
            client: Mutex::new(None),
            attached: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DebuggerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Name of the thread that last called `debug_this_thread`.
    #[must_use]
    pub fn attached_thread(&self) -> Option<String> {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Address of the connected client, if any.
    #[must_use]
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|stream| stream.peer_addr().ok())
    }
}

impl Debugger for TcpDebugger {
    fn debug_this_thread(&self) -> Result<(), DebuggerError> {
        let current = std::thread::current();
        let name = current
            .name()
            .map_or_else(|| format!("{:?}", current.id()), str::to_string);
        tracing::debug!(thread = %name, "attaching thread to debugger");
        *self.attached.lock().unwrap_or_else(PoisonError::into_inner) = Some(name);
        Ok(())
    }

    fn wait_for_client(&self) -> Result<(), DebuggerError> {
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if client.is_some() {
            return Ok(());
        }
        tracing::info!(addr = %self.listener.local_addr()?, "waiting for debugger client");
        let (stream, peer) = self.listener.accept()?;
        tracing::info!(%peer, "debugger client connected");
        *client = Some(stream);
        Ok(())
    }
}
