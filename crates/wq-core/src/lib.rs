//! wq-core: shared foundation for wqmorris.
//!
//! Contains:
//! - numeric (Real + validation and rounding helpers)
//! - timing (wall-clock stopwatch for stage reporting)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod timing;

pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use timing::Stopwatch;
