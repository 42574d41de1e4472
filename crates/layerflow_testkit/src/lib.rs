//! # LayerFlow Testkit
//!
//! Test utilities for LayerFlow.
//!
//! This crate provides:
//! - A fully wired in-memory environment (`TestEnv`) with resource builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use layerflow_testkit::prelude::*;
//!
//! #[test]
//! fn reconciles() {
//!     let env = TestEnv::new();
//!     let resource = env.vector_resource("roads");
//!     let report = env.reconciler().reconcile(resource).unwrap();
//!     assert!(report.report.is_clean());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
