use serde::{Deserialize, Serialize};

/// Encoding assumed for script sources when nothing else is known.
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Access level requested when submitting work to the host's main thread.
///
/// Ordered: a dispatcher granting `Write` also grants `Read`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Inspect host state only.
    Read,
    /// Mutate host state (the level scripts run at).
    #[default]
    Write,
}

/// Debugger attach configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggerSettings {
    /// Address to listen on for a debugger client, e.g. `127.0.0.1:5678`.
    /// When unset the attach preamble completes immediately.
    #[serde(default)]
    pub listen: Option<String>,
}

/// Runtime configuration for a scriptbox host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default text encoding for script sources.
    pub default_encoding: String,
    /// Module search path entries; `""` means the current directory.
    pub search_path: Vec<String>,
    /// Access level requested for the preamble and the script body.
    pub access: Access,
    pub debugger: DebuggerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_encoding: DEFAULT_ENCODING.to_string(),
            search_path: Vec::new(),
            access: Access::Write,
            debugger: DebuggerSettings::default(),
        }
    }
}
