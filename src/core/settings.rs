//! File-based service settings.

use crate::error::{Result, ServiceError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service options that can be kept in a YAML, TOML or JSON file.
///
/// ```yaml
/// id: greeter
/// resources:
///   - config/greeter.yaml
///   - config/greeter.local.yaml
/// profiles: [production]
/// component: greeter
/// fail_fast: true
/// check_interval_ms: 2000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Overrides the service identifier
    pub id: Option<String>,
    /// Configuration files, in merge order
    pub resources: Vec<PathBuf>,
    /// Active profiles, in activation order
    pub profiles: Vec<String>,
    /// Name of the exposed component
    pub component: Option<String>,
    /// Whether a failed initial load fails `start`
    pub fail_fast: bool,
    /// Interval between periodic checks, in milliseconds; zero disables them
    pub check_interval_ms: Option<u64>,
}

impl ServiceSettings {
    /// Load settings from a file, detecting the format from its extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or does not match
    /// the settings layout.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ServiceError::Settings(format!("{}: {e}", path.display())))
    }

    /// Interval between periodic checks, if enabled.
    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
