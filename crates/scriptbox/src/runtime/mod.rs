//! The bundle of collaborators a script runs against.

pub mod engine;

use crate::debugger::{Debugger, NoDebugger, PREAMBLE, PREAMBLE_SOURCE};
use crate::host::{Host, LocalHost, MainThread};
use crate::interpreter::Interpreter;
use crate::model::Settings;
use rhai::{Engine, ParseError, AST};
use std::sync::Arc;

struct RuntimeParts {
    settings: Settings,
    interpreter: Interpreter,
    host: Arc<dyn Host>,
    debugger: Arc<dyn Debugger>,
    main_thread: MainThread,
    engine: Engine,
    preamble: Result<AST, ParseError>,
}

/// Settings, ambient interpreter state, host collaborators and the engine
/// built from them. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    parts: Arc<RuntimeParts>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("settings", &self.parts.settings)
            .field("interpreter", &self.parts.interpreter)
            .field("main_thread", &self.parts.main_thread)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    #[must_use]
    pub fn builder(main_thread: MainThread) -> RuntimeBuilder {
        RuntimeBuilder {
            main_thread,
            settings: Settings::default(),
            interpreter: None,
            host: None,
            debugger: None,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.parts.settings
    }

    #[must_use]
    pub fn interpreter(&self) -> &Interpreter {
        &self.parts.interpreter
    }

    #[must_use]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.parts.host
    }

    #[must_use]
    pub fn debugger(&self) -> &Arc<dyn Debugger> {
        &self.parts.debugger
    }

    #[must_use]
    pub fn main_thread(&self) -> &MainThread {
        &self.parts.main_thread
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.parts.engine
    }

    /// The debugger-attach preamble, compiled once when the runtime was built.
    pub fn preamble(&self) -> Result<&AST, ParseError> {
        self.parts.preamble.as_ref().map_err(Clone::clone)
    }
}

/// Builder for [`Runtime`].
///
/// Defaults: [`Settings::default`], the process-wide
/// [`Interpreter::global`] (extended with the settings' search path), a
/// [`LocalHost`] and [`NoDebugger`].
#[must_use]
pub struct RuntimeBuilder {
    main_thread: MainThread,
    settings: Settings,
    interpreter: Option<Interpreter>,
    host: Option<Arc<dyn Host>>,
    debugger: Option<Arc<dyn Debugger>>,
}

impl RuntimeBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn build(self) -> Runtime {
        let interpreter = self
            .interpreter
            .unwrap_or_else(|| {
                let global = Interpreter::global().clone();
                global.extend_search_path(&self.settings.search_path);
                global
            });
        let host = self
            .host
            .unwrap_or_else(|| Arc::new(LocalHost::new()) as Arc<dyn Host>);
        let debugger = self
            .debugger
            .unwrap_or_else(|| Arc::new(NoDebugger) as Arc<dyn Debugger>);
        let engine = engine::build_engine(
            &interpreter,
            &host,
            &debugger,
            &self.settings.default_encoding,
        );
        let preamble = engine.compile(PREAMBLE).map(|mut ast| {
            ast.set_source(PREAMBLE_SOURCE);
            ast
        });
        Runtime {
            parts: Arc::new(RuntimeParts {
                settings: self.settings,
                interpreter,
                host,
                debugger,
                main_thread: self.main_thread,
                engine,
                preamble,
            }),
        }
    }
}
