use serde::{Deserialize, Serialize};

use crate::IcpError;

/// Default spatial stride applied in both grid dimensions.
pub const DEFAULT_DOWNSAMPLE_STRIDE: usize = 4;

/// Default minimum number of valid points required in both frames.
pub const DEFAULT_MIN_POINTS: usize = 200;

/// Parameters of the point-to-point ICP loop.
///
/// The defaults are generic ICP defaults, not values tuned for a specific
/// sensor; override them from the tracking configuration when needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Fraction of correspondences kept per iteration, the closest ones first.
    pub outlier_ratio: f64,
    /// Convergence threshold on the mean incremental rotation, in radians.
    pub rotation_epsilon: f64,
    /// Convergence threshold on the mean incremental translation.
    pub translation_epsilon: f64,
    /// Number of trailing iterations averaged by the convergence check.
    pub smoothing_window: usize,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            outlier_ratio: 0.60,
            rotation_epsilon: 1e-5,
            translation_epsilon: 1e-4,
            smoothing_window: 4,
        }
    }
}

impl IcpConfig {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), IcpError> {
        if self.max_iterations == 0 {
            return Err(IcpError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.outlier_ratio > 0.0 && self.outlier_ratio <= 1.0) {
            return Err(IcpError::InvalidConfig(format!(
                "outlier_ratio must be in (0, 1], got {}",
                self.outlier_ratio
            )));
        }
        if !(self.rotation_epsilon >= 0.0 && self.translation_epsilon >= 0.0) {
            return Err(IcpError::InvalidConfig(
                "convergence epsilons must be non negative".to_string(),
            ));
        }
        if self.smoothing_window == 0 {
            return Err(IcpError::InvalidConfig(
                "smoothing_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of a registration worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Keep every n-th column and row of the grid.
    pub downsample_stride: usize,
    /// Below this many valid points in either frame registration is skipped.
    pub min_points: usize,
    /// ICP loop parameters.
    pub icp: IcpConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            downsample_stride: DEFAULT_DOWNSAMPLE_STRIDE,
            min_points: DEFAULT_MIN_POINTS,
            icp: IcpConfig::default(),
        }
    }
}

impl RegistrationConfig {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), IcpError> {
        if self.downsample_stride == 0 {
            return Err(IcpError::InvalidConfig(
                "downsample_stride must be at least 1".to_string(),
            ));
        }
        if self.min_points < 3 {
            return Err(IcpError::InvalidConfig(format!(
                "min_points must be at least 3, got {}",
                self.min_points
            )));
        }
        self.icp.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RegistrationConfig::default();
        assert_eq!(config.downsample_stride, 4);
        assert_eq!(config.min_points, 200);
        assert_eq!(config.icp.outlier_ratio, 0.60);
        assert_eq!(config.icp.smoothing_window, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = RegistrationConfig {
            downsample_stride: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IcpError::InvalidConfig(_))
        ));

        let icp = IcpConfig {
            outlier_ratio: 1.5,
            ..Default::default()
        };
        assert!(icp.validate().is_err());

        let icp = IcpConfig {
            rotation_epsilon: f64::NAN,
            ..Default::default()
        };
        assert!(icp.validate().is_err());
    }
}
