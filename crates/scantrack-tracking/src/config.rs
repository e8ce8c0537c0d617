use std::path::Path;

use serde::{Deserialize, Serialize};

use scantrack_icp::RegistrationConfig;

use crate::TrackingError;

/// Upper bound on the automatically sized worker pool.
pub const MAX_AUTO_WORKERS: usize = 8;

/// Configuration of the tracking controller.
///
/// Every field has a default, so a config document only needs the values it
/// overrides:
///
/// ```
/// use scantrack_tracking::TrackingConfig;
///
/// let config = TrackingConfig::from_json_str(r#"{ "num_workers": 2 }"#).unwrap();
/// assert_eq!(config.num_workers, Some(2));
/// assert_eq!(config.registration.min_points, 200);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Number of registration threads, `None` to follow the available parallelism.
    pub num_workers: Option<usize>,
    /// Parameters shared by every registration worker.
    pub registration: RegistrationConfig,
}

impl TrackingConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json_str(s: &str) -> Result<Self, TrackingError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.num_workers == Some(0) {
            return Err(TrackingError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        self.registration.validate()?;
        Ok(())
    }

    /// Number of worker threads to start.
    ///
    /// Always 1 when the `parallel` feature is disabled.
    pub fn resolved_num_workers(&self) -> usize {
        if !cfg!(feature = "parallel") {
            return 1;
        }

        match self.num_workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_AUTO_WORKERS),
        }
    }
}
