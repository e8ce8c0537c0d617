#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod config;
pub use config::*;

mod error;
pub use error::IcpError;

mod icp;
pub use icp::*;

mod ops;
pub use ops::{compute_centroids, fit_transformation, Correspondence};

mod worker;
pub use worker::*;

use scantrack_core::RigidTransform;

/// A pluggable rigid registration backend.
///
/// Implementors receive the flat, already filtered and downsampled point sets
/// of both frames and return the transform that aligns `source` onto `target`.
/// Scratch memory should be kept inside the implementor and reused between
/// calls; one instance is owned by each worker thread.
pub trait RegistrationStrategy: Send {
    /// Compute the rigid transform mapping `source` points onto `target` points.
    fn find_transform(
        &mut self,
        target: &[[f64; 3]],
        source: &[[f64; 3]],
    ) -> Result<RigidTransform, IcpError>;
}
