//! redb table definitions for the snapshot store.
//!
//! Values are JSON-serialized `GroupSnapshot`s keyed by group name.

use redb::TableDefinition;

/// One snapshot per autoscaling group, keyed by `{group_name}`.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
