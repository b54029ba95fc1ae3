//! # Threadline Testkit
//!
//! Testing utilities for Threadline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a wired-up engine over an in-memory store and remote, plus
//!   record and event builders
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use threadline_testkit::fixtures::TestHarness;
//!
//! # async fn example() {
//! let harness = TestHarness::new();
//! let summary = harness.seed("general", 3).await;
//! let report = harness.engine.synchronize_all().await.unwrap();
//! assert!(report.success());
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use threadline_testkit::generators::event_stream;
//!
//! proptest! {
//!     #[test]
//!     fn replay_is_idempotent(events in event_stream("c1", 40)) {
//!         // apply twice, compare snapshots
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, TestHarness};
