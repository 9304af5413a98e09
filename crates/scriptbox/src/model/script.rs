use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Caller-supplied description of one script invocation.
///
/// This is the unit a host hands to [`crate::runner::ScriptRunner::new`], and
/// the shape of a job file loaded by [`crate::config::load_job_file`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Script location as given; may be relative to `cwd`.
    pub path: PathBuf,
    /// Working directory the script expects at run time.
    /// Defaults to the process working directory when the runner is built.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra arguments following the script path in the script's argv.
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables overlaid onto the process environment during execution.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Explicit source encoding label; detected when absent.
    #[serde(default)]
    pub encoding: Option<String>,
}

impl ScriptSpec {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }
}
