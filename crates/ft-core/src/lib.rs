//! # ft-core
//!
//! Shared foundation for FewTreat: the error type, the contract between the
//! resampling engines and the regression estimator, and the fit result the
//! two sides exchange.
//!
//! The inference crate depends only on the [`RegressionBackend`] trait, never
//! on a concrete estimator, so alternative estimators can be swapped in
//! without touching the resampling code.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Crate version, surfaced by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types.
pub mod error;
/// Estimator traits.
pub mod traits;
/// Regression contract types.
pub mod types;

pub use error::{Error, Result};
pub use traits::RegressionBackend;
pub use types::{RegressionData, RegressionFit};
