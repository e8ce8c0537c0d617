use scantrack_icp::IcpError;

/// An error type for the tracking module.
#[derive(thiserror::Error, Debug)]
pub enum TrackingError {
    /// Error reading a configuration file.
    #[error("Failed to read the tracking config")]
    Io(#[from] std::io::Error),

    /// Error parsing a configuration document.
    #[error("Failed to parse the tracking config")]
    Parse(#[from] serde_json::Error),

    /// A tracking parameter is out of range.
    #[error("Invalid tracking config: {0}")]
    InvalidConfig(String),

    /// A registration parameter is out of range.
    #[error(transparent)]
    Registration(#[from] IcpError),
}
