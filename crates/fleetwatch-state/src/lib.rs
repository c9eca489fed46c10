//! fleetwatch-state: durable run-to-run state for fleetwatch.
//!
//! Holds the `GroupSnapshot` data model (the unit compared across runs)
//! and a [redb](https://docs.rs/redb) backed `SnapshotStore` that keeps
//! exactly one snapshot per group name.
//!
//! # Architecture
//!
//! Snapshots are JSON-serialized into redb's `&[u8]` value column under
//! the group name. A save always replaces the whole record inside a single
//! write transaction, so a crashed run never leaves a partial snapshot.
//!
//! A missing or unreadable record loads as a blank snapshot: cold start is
//! a normal path, not an error.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::SnapshotStore;
pub use types::*;
