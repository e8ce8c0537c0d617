#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod config;
pub use config::*;

mod controller;
pub use controller::*;

mod error;
pub use error::TrackingError;

mod output;
pub use output::*;

mod pool;
pub use pool::*;
