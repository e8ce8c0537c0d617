/// An error type for the registration module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum IcpError {
    /// Not enough points to estimate a rigid transform.
    #[error("Not enough points for registration: required {required}, got {actual}")]
    NotEnoughPoints {
        /// Minimum number of points needed.
        required: usize,
        /// Number of points available.
        actual: usize,
    },

    /// The input or an intermediate result contains NaN or infinite values.
    #[error("Non finite values in the registration data")]
    NonFinite,

    /// The least squares problem has no unique solution.
    #[error("Degenerate point configuration: {0}")]
    Degenerate(&'static str),

    /// A configuration parameter is out of range.
    #[error("Invalid registration config: {0}")]
    InvalidConfig(String),
}
