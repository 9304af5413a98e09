use crate::model::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error payload for JSON output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code, e.g. `E_COMPILE`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Summary of a completed script run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Script path as given by the caller.
    pub path: String,
    /// Absolute path the script was compiled from.
    pub abspath: String,
    /// Encoding the source was decoded with.
    pub encoding: String,
    /// Modules the script imported that were evicted afterwards.
    #[serde(default)]
    pub evicted_modules: Vec<String>,
    pub duration_ms: u64,
}
