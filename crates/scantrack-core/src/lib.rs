#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Point-cloud frames produced by the depth pipeline.
pub mod frame;

/// Small fixed-size linear algebra helpers.
pub mod linalg;

/// Rigid body transforms.
pub mod transform;

pub use frame::{Frame, FrameError, FrameSize, Point4};
pub use transform::RigidTransform;
