#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use scantrack_core as core;

#[doc(inline)]
pub use scantrack_icp as icp;

#[doc(inline)]
pub use scantrack_tracking as tracking;
