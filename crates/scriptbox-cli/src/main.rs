//! Scriptbox CLI: run a script with sandboxed ambient state.
//!
//! The process main thread plays the host's main thread: it serves the
//! dispatch queue while a worker thread prepares and executes the script.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // Script output and JSON reports go to stdout
#![allow(clippy::print_stderr)] // Diagnostics go to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use scriptbox::config;
use scriptbox::debugger::{Debugger, TcpDebugger};
use scriptbox::host::{self, Host};
use scriptbox::interpreter::Interpreter;
use scriptbox::model::{RunReport, ScriptSpec, Settings};
use scriptbox::run::{check_script, run_script};
use scriptbox::runner::{RunnerError, RunnerResult};
use scriptbox::runtime::Runtime;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "SCRIPTBOX_LOG";

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "scriptbox",
    version,
    about = "Run scripts without leaking their effects into the host"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a script once with overridden argv, environment and working directory
    Run {
        /// Script to run, relative to --cwd unless absolute
        script: PathBuf,
        #[arg(long, help = "Working directory for the script (default: current)")]
        cwd: Option<PathBuf>,
        #[arg(long = "env", value_name = "KEY=VALUE", help = "Set an environment variable for the run")]
        env: Vec<String>,
        #[arg(long, help = "Source encoding label (default: detect)")]
        encoding: Option<String>,
        #[arg(long, value_name = "ADDR", help = "Wait for a debugger client on this address")]
        listen: Option<String>,
        #[arg(long, help = "Settings file (JSON or YAML)")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        #[arg(long, short = 'v', help = "Log debug detail to stderr")]
        verbose: bool,
        /// Arguments passed to the script after its path
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run the invocation described by a JSON or YAML job file
    Job {
        file: PathBuf,
        #[arg(long, value_name = "ADDR", help = "Wait for a debugger client on this address")]
        listen: Option<String>,
        #[arg(long, help = "Settings file (JSON or YAML)")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        #[arg(long, short = 'v', help = "Log debug detail to stderr")]
        verbose: bool,
    },
    /// Resolve the encoding and compile a script without running it
    Check {
        script: PathBuf,
        #[arg(long, help = "Working directory the script path is relative to")]
        cwd: Option<PathBuf>,
        #[arg(long, help = "Source encoding label (default: detect)")]
        encoding: Option<String>,
        #[arg(long, help = "Settings file (JSON or YAML)")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false);
    if let Err(err) = builder.try_init() {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    match cli.command {
        Commands::Run {
            script,
            cwd,
            env,
            encoding,
            listen,
            config,
            json,
            verbose,
            args,
        } => cmd_run(script, cwd, env, encoding, listen, config, json, verbose, args),
        Commands::Job {
            file,
            listen,
            config,
            json,
            verbose,
        } => cmd_job(file, listen, config, json, verbose),
        Commands::Check {
            script,
            cwd,
            encoding,
            config,
            json,
        } => cmd_check(script, cwd, encoding, config, json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run command.
#[allow(clippy::too_many_arguments)]
fn cmd_run(
    script: PathBuf,
    cwd: Option<PathBuf>,
    env: Vec<String>,
    encoding: Option<String>,
    listen: Option<String>,
    config_path: Option<PathBuf>,
    json: bool,
    verbose: bool,
    args: Vec<String>,
) -> Result<()> {
    init_tracing(verbose);
    let mut spec = ScriptSpec::new(script).args(args);
    spec.cwd = cwd;
    spec.encoding = encoding;
    for pair in &env {
        let Some((key, value)) = pair.split_once('=') else {
            return emit_cli_error(json, &format!("--env expects KEY=VALUE, got {pair:?}"));
        };
        spec = spec.env_var(key, value);
    }
    let settings = match load_settings(config_path, listen) {
        Ok(settings) => settings,
        Err(err) => return emit_error(json, &err),
    };
    emit_result(json, execute(spec, settings, json))
}

/// Handle the job command.
fn cmd_job(
    file: PathBuf,
    listen: Option<String>,
    config_path: Option<PathBuf>,
    json: bool,
    verbose: bool,
) -> Result<()> {
    init_tracing(verbose);
    let prepared = config::load_job_file(&file)
        .and_then(|spec| load_settings(config_path, listen).map(|settings| (spec, settings)));
    match prepared {
        Ok((spec, settings)) => emit_result(json, execute(spec, settings, json)),
        Err(err) => emit_error(json, &err),
    }
}

/// Handle the check command.
fn cmd_check(
    script: PathBuf,
    cwd: Option<PathBuf>,
    encoding: Option<String>,
    config_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    init_tracing(false);
    let mut spec = ScriptSpec::new(script);
    spec.cwd = cwd;
    spec.encoding = encoding;
    let result = load_settings(config_path, None).and_then(|settings| {
        // Nothing is dispatched when only compiling.
        let (main_thread, _dispatcher) = host::channel();
        let runtime = Runtime::builder(main_thread)
            .interpreter(Interpreter::new(settings.search_path.clone()))
            .settings(settings)
            .build();
        check_script(spec, &runtime)
    });
    match result {
        Ok(report) => {
            if json {
                let payload = serde_json::to_string(&report).into_diagnostic()?;
                println!("{payload}");
            } else {
                println!("{}: ok ({})", report.path, report.encoding);
            }
            Ok(())
        }
        Err(err) => emit_error(json, &err),
    }
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Execution
// =============================================================================

fn load_settings(path: Option<PathBuf>, listen: Option<String>) -> RunnerResult<Settings> {
    let mut settings = config::load_settings(path.as_deref())?;
    if listen.is_some() {
        settings.debugger.listen = listen;
    }
    Ok(settings)
}

/// Run `spec` on a worker thread while this thread serves the host queue.
fn execute(spec: ScriptSpec, settings: Settings, json: bool) -> RunnerResult<RunReport> {
    let debugger = match settings.debugger.listen.as_deref() {
        Some(addr) => Some(Arc::new(TcpDebugger::bind(addr).map_err(|err| {
            RunnerError::config(format!("cannot listen for a debugger on {addr}"), err)
        })?) as Arc<dyn Debugger>),
        None => None,
    };
    let host = Arc::new(ConsoleHost::new(json)) as Arc<dyn Host>;
    let (main_thread, dispatcher) = host::channel();
    let mut builder = Runtime::builder(main_thread)
        .interpreter(Interpreter::new(settings.search_path.clone()))
        .settings(settings)
        .host(host);
    if let Some(debugger) = debugger {
        builder = builder.debugger(debugger);
    }
    let runtime = builder.build();

    thread::scope(|scope| {
        // The worker owns the only queue handle; the dispatcher stops once
        // the worker is done with it.
        let worker = scope.spawn(move || run_script(spec, &runtime));
        dispatcher.run();
        worker
            .join()
            .unwrap_or_else(|_| Err(RunnerError::Dispatch(host::DispatchError::Abandoned)))
    })
}

/// Host for a terminal process: script output goes to stdout, or to stderr
/// when stdout is reserved for the JSON report.
struct ConsoleHost {
    native_argv: RwLock<Vec<String>>,
    json: bool,
}

impl ConsoleHost {
    fn new(json: bool) -> Self {
        Self {
            native_argv: RwLock::new(std::env::args().collect()),
            json,
        }
    }
}

impl Host for ConsoleHost {
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
        let flushed = if self.json {
            io::stderr().flush()
        } else {
            io::stdout().flush()
        };
        if let Err(err) = flushed {
            tracing::debug!(%err, "failed to flush script output");
        }
    }

    fn message(&self, text: &str) {
        if self.json {
            eprintln!("{text}");
        } else {
            println!("{text}");
        }
    }
}

// =============================================================================
// Output
// =============================================================================

fn emit_result(json: bool, result: RunnerResult<RunReport>) -> Result<()> {
    match result {
        Ok(report) => {
            if json {
                let payload = serde_json::to_string(&report).into_diagnostic()?;
                println!("{payload}");
            } else {
                eprintln!("run completed: {} ({} ms)", report.path, report.duration_ms);
            }
            Ok(())
        }
        Err(err) => emit_error(json, &err),
    }
}

fn emit_error(json: bool, err: &RunnerError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("error[{}]: {err}", err.code());
    }
    std::process::exit(exit_code_for_error(err));
}

fn emit_cli_error(json: bool, message: &str) -> Result<()> {
    emit_error(json, &RunnerError::invalid_argument(message))
}

fn exit_code_for_error(err: &RunnerError) -> i32 {
    err.exit_code()
}
