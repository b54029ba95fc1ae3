//! # Threadline Store
//!
//! The local store contract and the persistence gateway in front of it.
//!
//! ## Overview
//!
//! The engine is storage-agnostic: it consumes the [`LocalStore`] trait and
//! never touches a storage engine directly. All mutations go through the
//! [`PersistenceGateway`], which wraps each logical operation in one
//! [`StoreTransaction`] and serializes transactions.
//!
//! ## Key Types
//!
//! - [`LocalStore`] - Committed reads and the transaction entry point
//! - [`StoreTransaction`] - Staged writes with read-your-own-writes
//! - [`MemoryStore`] - In-memory implementation for tests and embedders
//! - [`PersistenceGateway`] - The single choke-point for mutations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use threadline_store::{MemoryStore, PersistenceGateway};
//!
//! async fn example() {
//!     let gateway = PersistenceGateway::new(Arc::new(MemoryStore::new()));
//!
//!     // let applied = gateway.apply_events(&conversation_id, &page).await?;
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent upserts**: Every write is keyed by natural id
//! - **Monotonic merges**: Event bounds and statuses only move forward
//! - **Orphaned statuses**: Parked until their message arrives, then applied
//!   in the same transaction as the message write

pub mod error;
pub mod gateway;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use gateway::{PageApplied, PersistenceGateway, ReconcileApplied};
pub use memory::{MemoryStore, StoreSnapshot};
pub use traits::{LocalStore, StoreTransaction};
