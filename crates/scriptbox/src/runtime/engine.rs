//! Construction of the scripting engine shared by compile and run.

use crate::debugger::Debugger;
use crate::host::Host;
use crate::interpreter::{Interpreter, ModuleLoader};
use rhai::{Array, Dynamic, Engine, EvalAltResult, OptimizationLevel};
use std::sync::Arc;

fn to_array(values: Vec<String>) -> Array {
    values.into_iter().map(Dynamic::from).collect()
}

fn valid_env_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['=', '\0'])
}

/// Build an engine wired to the given collaborators.
///
/// Functions available to scripts: `argv()`, `host_argv()`, `env(name)`,
/// `set_env(name, value)`, `cwd()`, `refresh_view()`, `debug_this_thread()`
/// and `wait_for_client()`. `print` goes to [`Host::message`].
pub fn build_engine(
    interpreter: &Interpreter,
    host: &Arc<dyn Host>,
    debugger: &Arc<dyn Debugger>,
    default_encoding: &str,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_optimization_level(OptimizationLevel::None);
    engine.set_module_resolver(ModuleLoader::new(interpreter.clone(), default_encoding));

    let printer = Arc::clone(host);
    engine.on_print(move |text| printer.message(text));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "scriptbox::script", source = source.unwrap_or(""), %pos, "{text}");
    });

    let argv_source = interpreter.clone();
    engine.register_fn("argv", move || to_array(argv_source.argv()));

    let native = Arc::clone(host);
    engine.register_fn("host_argv", move || to_array(native.native_argv()));

    let view = Arc::clone(host);
    engine.register_fn("refresh_view", move || view.refresh_view());

    engine.register_fn("env", |name: &str| {
        std::env::var(name).map_or(Dynamic::UNIT, Dynamic::from)
    });
    engine.register_fn(
        "set_env",
        |name: &str, value: &str| -> Result<(), Box<EvalAltResult>> {
            if !valid_env_key(name) || value.contains('\0') {
                return Err(format!("invalid environment variable {name:?}").into());
            }
            std::env::set_var(name, value);
            Ok(())
        },
    );
    engine.register_fn("cwd", || -> Result<String, Box<EvalAltResult>> {
        std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .map_err(|err| format!("cannot read working directory: {err}").into())
    });

    let attach = Arc::clone(debugger);
    engine.register_fn("debug_this_thread", move || -> Result<(), Box<EvalAltResult>> {
        attach
            .debug_this_thread()
            .map_err(|err| format!("debugger attach failed: {err}").into())
    });
    let wait = Arc::clone(debugger);
    engine.register_fn("wait_for_client", move || -> Result<(), Box<EvalAltResult>> {
        wait.wait_for_client()
            .map_err(|err| format!("waiting for debugger client failed: {err}").into())
    });

    engine
}
