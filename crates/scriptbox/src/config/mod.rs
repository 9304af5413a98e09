//! Loading settings and job files.
//!
//! Settings are layered: defaults, then an optional JSON/YAML file, then the
//! environment (`SCRIPTBOX_IO_ENCODING`, `SCRIPTBOX_PATH`,
//! `SCRIPTBOX_DEBUG_LISTEN`, `SCRIPTBOX_ACCESS`). CLI flags are applied on top
//! by the caller.

use crate::model::{Access, ScriptSpec, Settings};
use crate::runner::{RunnerError, RunnerResult};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub const ENV_IO_ENCODING: &str = "SCRIPTBOX_IO_ENCODING";
pub const ENV_SEARCH_PATH: &str = "SCRIPTBOX_PATH";
pub const ENV_DEBUG_LISTEN: &str = "SCRIPTBOX_DEBUG_LISTEN";
pub const ENV_ACCESS: &str = "SCRIPTBOX_ACCESS";

fn load_file<T: DeserializeOwned>(path: &Path, what: &str) -> RunnerResult<T> {
    let data = fs::read_to_string(path).map_err(|source| RunnerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path.to_string_lossy();
    if name.ends_with(".yaml") || name.ends_with(".yml") {
        serde_yml::from_str(&data)
            .map_err(|err| RunnerError::config(format!("failed to parse {what} yaml"), err))
    } else {
        serde_json::from_str(&data)
            .map_err(|err| RunnerError::config(format!("failed to parse {what} json"), err))
    }
}

/// Read a settings file (`.yaml`/`.yml` as YAML, anything else as JSON).
pub fn load_settings_file(path: &Path) -> RunnerResult<Settings> {
    load_file(path, "settings")
}

/// Read a job file describing one script invocation.
pub fn load_job_file(path: &Path) -> RunnerResult<ScriptSpec> {
    load_file(path, "job")
}

fn parse_access(value: &str) -> RunnerResult<Access> {
    match value.trim().to_ascii_lowercase().as_str() {
        "read" => Ok(Access::Read),
        "write" => Ok(Access::Write),
        other => Err(RunnerError::config(
            format!("invalid {ENV_ACCESS} value"),
            format!("expected `read` or `write`, got {other:?}"),
        )),
    }
}

/// Overlay environment-provided values onto `settings`.
pub fn apply_env_overrides(settings: &mut Settings) -> RunnerResult<()> {
    if let Some(encoding) = non_empty_var(ENV_IO_ENCODING) {
        settings.default_encoding = encoding;
    }
    if std::env::var_os(ENV_SEARCH_PATH).is_some() {
        settings.search_path = search_path_from_env();
    }
    if let Some(listen) = non_empty_var(ENV_DEBUG_LISTEN) {
        settings.debugger.listen = Some(listen);
    }
    if let Some(access) = non_empty_var(ENV_ACCESS) {
        settings.access = parse_access(&access)?;
    }
    Ok(())
}

/// Defaults overlaid with the environment.
pub fn settings_from_env() -> RunnerResult<Settings> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Settings from an optional file, overlaid with the environment.
pub fn load_settings(path: Option<&Path>) -> RunnerResult<Settings> {
    let mut settings = match path {
        Some(path) => load_settings_file(path)?,
        None => Settings::default(),
    };
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Module search path entries from `SCRIPTBOX_PATH`, split on the platform
/// path separator.
#[must_use]
pub fn search_path_from_env() -> Vec<String> {
    std::env::var_os(ENV_SEARCH_PATH)
        .map(|value| {
            std::env::split_paths(&value)
                .map(|entry| entry.to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
