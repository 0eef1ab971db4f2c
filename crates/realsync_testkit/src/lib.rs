//! # realsync testkit
//!
//! Test utilities for realsync.
//!
//! This crate provides:
//! - A scriptable in-memory adapter with failure injection
//! - Fixture entities and target registries
//! - Property-based generators for change events
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realsync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn recovers() {
//!     let adapter = Arc::new(ScriptedAdapter::failing(2));
//!     // ... start an orchestrator over `adapter`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod fixtures;
pub mod generators;

use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use adapter::*;
pub use fixtures::*;
pub use generators::*;

/// Installs a test-friendly tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
