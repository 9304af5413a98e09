//! Preparing and executing one script invocation.
//!
//! [`ScriptRunner::new`] resolves the path, decodes and compiles the source
//! eagerly; any failure there means no runner exists and nothing runs.
//! [`ScriptRunner::exec`] then:
//!
//! 1. snapshots and overrides ambient state ([`ContextGuard`]),
//! 2. runs the debugger-attach preamble on the host main thread,
//! 3. runs the compiled script on the host main thread with its globals,
//! 4. restores ambient state, whichever way steps 2-3 ended.

use crate::compiler::{self, CompiledScript};
use crate::context::{ContextGuard, Overrides, RestoreError};
use crate::encoding::{self, EncodingError};
use crate::host::DispatchError;
use crate::model::{ErrorInfo, RunId, ScriptSpec, MAIN_MODULE_NAME};
use crate::runtime::Runtime;
use miette::Diagnostic;
use rhai::{EvalAltResult, ParseError, Scope};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("failed to read {path}")]
    #[diagnostic(code(E_IO))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Encoding(#[from] EncodingError),

    #[error("failed to compile {path}: {source}")]
    #[diagnostic(code(E_COMPILE))]
    Compile {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("{message}")]
    #[diagnostic(code(E_INVALID_ARG))]
    InvalidArgument { message: String },

    #[error("{message}")]
    #[diagnostic(code(E_CONFIG))]
    Config { message: String, detail: String },

    #[error("failed to apply execution context")]
    #[diagnostic(code(E_CONTEXT))]
    Context {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restore execution context")]
    #[diagnostic(code(E_RESTORE))]
    Restore {
        #[source]
        source: RestoreError,
    },

    #[error("debugger attach preamble failed: {source}")]
    #[diagnostic(code(E_ATTACH))]
    Attach {
        #[source]
        source: Box<EvalAltResult>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("script failed: {source}")]
    #[diagnostic(code(E_RUNTIME))]
    Runtime {
        #[source]
        source: Box<EvalAltResult>,
    },

    #[error("script has already been executed")]
    #[diagnostic(code(E_ALREADY_EXECUTED))]
    AlreadyExecuted,
}

impl RunnerError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.into(),
            detail: err.to_string(),
        }
    }

    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "E_IO",
            Self::Encoding(err) => err.code(),
            Self::Compile { .. } => "E_COMPILE",
            Self::InvalidArgument { .. } => "E_INVALID_ARG",
            Self::Config { .. } => "E_CONFIG",
            Self::Context { .. } => "E_CONTEXT",
            Self::Restore { .. } => "E_RESTORE",
            Self::Attach { .. } => "E_ATTACH",
            Self::Dispatch(_) => "E_DISPATCH",
            Self::Runtime { .. } => "E_RUNTIME",
            Self::AlreadyExecuted => "E_ALREADY_EXECUTED",
        }
    }

    /// Process exit code for CLI use.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Runtime { .. } => 1,
            Self::InvalidArgument { .. } | Self::Config { .. } | Self::AlreadyExecuted => 2,
            Self::Encoding(_) => 3,
            Self::Compile { .. } => 4,
            Self::Context { .. } | Self::Restore { .. } | Self::Attach { .. } | Self::Dispatch(_) => 5,
            Self::Io { .. } => 6,
        }
    }

    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        let context = match self {
            Self::Io { path, source } => Some(serde_json::json!({
                "path": path.display().to_string(),
                "source": source.to_string(),
            })),
            Self::Compile { path, source } => Some(serde_json::json!({
                "path": path.display().to_string(),
                "line": source.1.line(),
                "position": source.1.position(),
            })),
            Self::Config { detail, .. } => Some(serde_json::json!({ "source": detail })),
            Self::Context { source } => Some(serde_json::json!({ "source": source.to_string() })),
            Self::Restore { source } => Some(serde_json::json!({
                "source": source.source.to_string(),
                "cwd": source.cwd.display().to_string(),
                "evicted_modules": source.report.evicted_modules,
            })),
            Self::Runtime { source } | Self::Attach { source } => Some(serde_json::json!({
                "position": source.position().to_string(),
            })),
            _ => None,
        };
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
            context,
        }
    }
}

/// Outcome of a completed [`ScriptRunner::exec`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecReport {
    /// Modules imported by the script that were evicted afterwards.
    pub evicted_modules: Vec<String>,
    pub duration_ms: u64,
}

/// One prepared, executable script invocation.
pub struct ScriptRunner {
    run_id: RunId,
    path: PathBuf,
    cwd: PathBuf,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    abspath: PathBuf,
    encoding: String,
    globals: Scope<'static>,
    code: CompiledScript,
    runtime: Runtime,
    executed: bool,
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("run_id", &self.run_id)
            .field("path", &self.path)
            .field("cwd", &self.cwd)
            .field("argv", &self.argv)
            .field("env", &self.env)
            .field("abspath", &self.abspath)
            .field("encoding", &self.encoding)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

fn validate_env(env: &BTreeMap<String, String>) -> RunnerResult<()> {
    for (key, value) in env {
        if key.is_empty() || key.contains(['=', '\0']) {
            return Err(RunnerError::invalid_argument(format!(
                "invalid environment variable name {key:?}"
            )));
        }
        if value.contains('\0') {
            return Err(RunnerError::invalid_argument(format!(
                "environment variable {key:?} contains a NUL byte"
            )));
        }
    }
    Ok(())
}

fn seed_globals(abspath: &Path) -> Scope<'static> {
    let mut globals = Scope::new();
    globals.push("__name__", MAIN_MODULE_NAME.to_string());
    globals.push("__file__", abspath.to_string_lossy().into_owned());
    globals
}

impl ScriptRunner {
    /// Resolve, decode and compile the script described by `spec`.
    pub fn new(spec: ScriptSpec, runtime: &Runtime) -> RunnerResult<Self> {
        let ScriptSpec {
            path,
            cwd,
            args,
            env,
            encoding: explicit_encoding,
        } = spec;
        validate_env(&env)?;

        let cwd = match cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir().map_err(|source| RunnerError::Io {
                path: PathBuf::from("."),
                source,
            })?,
        };
        let abspath = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(&path)
        };

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(path.to_string_lossy().into_owned());
        argv.extend(args);

        let raw = std::fs::read(&abspath).map_err(|source| RunnerError::Io {
            path: abspath.clone(),
            source,
        })?;
        let decoded = encoding::resolve(
            &raw,
            explicit_encoding.as_deref(),
            &runtime.settings().default_encoding,
        )?;
        tracing::debug!(
            path = %abspath.display(),
            encoding = %decoded.encoding,
            source = ?decoded.source,
            "resolved script encoding"
        );
        let code = compiler::compile(runtime.engine(), &decoded.text, &abspath).map_err(
            |source| RunnerError::Compile {
                path: abspath.clone(),
                source,
            },
        )?;

        Ok(Self {
            run_id: RunId::new(),
            globals: seed_globals(&abspath),
            path,
            cwd,
            argv,
            env,
            abspath,
            encoding: decoded.encoding,
            code,
            runtime: runtime.clone(),
            executed: false,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Script path as given by the caller.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// The script's command line: the path as given, then the caller's arguments.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn abspath(&self) -> &Path {
        &self.abspath
    }

    /// Encoding the source was decoded with.
    #[must_use]
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    #[must_use]
    pub fn code(&self) -> &CompiledScript {
        &self.code
    }

    /// The script's top-level namespace. After `exec` it holds whatever the
    /// script left there.
    #[must_use]
    pub fn globals(&self) -> &Scope<'static> {
        &self.globals
    }

    /// Read a string-valued global.
    #[must_use]
    pub fn global_string(&self, name: &str) -> Option<String> {
        self.globals.get_value::<String>(name)
    }

    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Execute the script once on the host main thread.
    ///
    /// Script errors propagate as [`RunnerError::Runtime`] after ambient
    /// state has been restored.
    pub fn exec(&mut self) -> RunnerResult<ExecReport> {
        if self.executed {
            return Err(RunnerError::AlreadyExecuted);
        }
        self.executed = true;

        let span = tracing::info_span!("exec", run_id = %self.run_id, path = %self.abspath.display());
        let _entered = span.enter();
        let started = Instant::now();

        let runtime = self.runtime.clone();
        let native_argv = self.argv.clone();
        let command_line = vec![self.path.to_string_lossy().into_owned()];
        let guard = ContextGuard::enter(
            runtime.interpreter(),
            runtime.host().as_ref(),
            Overrides {
                argv: &command_line,
                native_argv: &native_argv,
                env: &self.env,
                cwd: &self.cwd,
            },
        )
        .map_err(|source| RunnerError::Context { source })?;
        tracing::debug!(cwd = %self.cwd.display(), "ambient state overridden");

        let outcome = self.attach_debugger().and_then(|()| self.run_body());

        let restored = guard
            .restore()
            .map_err(|source| RunnerError::Restore { source });
        if let (Err(_), Err(err)) = (&outcome, &restored) {
            tracing::warn!(%err, "ambient state not fully restored after failed run");
        }
        outcome?;
        let restored = restored?;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(duration_ms, evicted = restored.evicted_modules.len(), "script finished");
        Ok(ExecReport {
            evicted_modules: restored.evicted_modules,
            duration_ms,
        })
    }

    fn attach_debugger(&self) -> RunnerResult<()> {
        let runtime = self.runtime.clone();
        let access = runtime.settings().access;
        tracing::debug!("running debugger attach preamble");
        let result = self.runtime.main_thread().execute_sync(
            access,
            move || -> Result<(), Box<EvalAltResult>> {
                let preamble = runtime.preamble()?;
                runtime.engine().run_ast(preamble)
            },
        )?;
        result.map_err(|source| RunnerError::Attach { source })
    }

    fn run_body(&mut self) -> RunnerResult<()> {
        let runtime = self.runtime.clone();
        let access = runtime.settings().access;
        let ast = self.code.ast().clone();
        let mut globals = std::mem::take(&mut self.globals);
        tracing::debug!("running script body");
        let returned = self.runtime.main_thread().execute_sync(access, move || {
            let result = runtime.engine().run_ast_with_scope(&mut globals, &ast);
            (globals, result)
        });
        match returned {
            Ok((globals, result)) => {
                self.globals = globals;
                result.map_err(|source| RunnerError::Runtime { source })
            }
            Err(err) => {
                self.globals = seed_globals(&self.abspath);
                Err(err.into())
            }
        }
    }
}
