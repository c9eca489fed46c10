//! Domain types for the fleetwatch snapshot store.
//!
//! A `GroupSnapshot` is the full control state of one autoscaling group as
//! of one run. Every field carries `#[serde(default)]` so snapshots written
//! by older builds, or missing fields, still load.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Name of an autoscaling group; also the persistence key.
pub type GroupName = String;

/// Cloud provider instance identifier.
pub type InstanceId = String;

// ── Counters ──────────────────────────────────────────────────────

/// Consecutive-violation counts used for hysteresis.
///
/// Each counter resets to zero on the first evaluated run where its
/// condition does not hold.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HysteresisCounters {
    /// Runs in a row where the N-1 projection stayed below `low_limit`.
    pub low_counter: u32,
    /// Runs in a row where the fleet average exceeded `high_limit`.
    pub high_counter: u32,
    /// Runs in a row where some single instance was an outlier.
    pub kill_counter: u32,
}

// ── Timestamps ────────────────────────────────────────────────────

/// Unix timestamps (seconds) of the last relevant events for a group.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActionTimestamps {
    /// Last time this engine sent an action to the control plane.
    pub last_action_ts: u64,
    /// Last time the instance count or desired capacity changed.
    pub last_changed_ts: u64,
    /// Last time the instance count was observed to grow.
    pub last_scale_up_ts: u64,
    /// Last time the instance count was observed to shrink.
    pub last_scale_down_ts: u64,
}

// ── History ───────────────────────────────────────────────────────

/// One row of the bounded load history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub ts: u64,
    pub instance_count: u32,
    pub total_load: f64,
    pub avg_load: f64,
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Control state of one group, persisted in full at the end of every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroupSnapshot {
    pub group_name: GroupName,
    /// Unix timestamp (seconds) of this measurement.
    pub timestamp: u64,

    /// In-service instances observed this run.
    pub instance_count: u32,
    /// Instance count before the most recent observed change.
    pub previous_instance_count: u32,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,

    /// Mean utilization percent per instance with at least one datapoint.
    pub per_instance_load: BTreeMap<InstanceId, f64>,
    /// Datapoints backing each entry of `per_instance_load`.
    pub sample_counts: BTreeMap<InstanceId, u32>,
    /// Most loaded instance, if any instance reported load.
    pub max_loaded: Option<InstanceId>,
    /// Least loaded instance, if any instance reported load.
    pub min_loaded: Option<InstanceId>,

    /// Trimmed mean utilization.
    pub aggregate_load: f64,
    /// Sum of load over the instances retained by the trimmed mean.
    pub total_load: f64,
    pub exponential_average: f64,
    pub trend: f64,

    pub counters: HysteresisCounters,
    pub timestamps: ActionTimestamps,

    /// Oldest first; bounded by the configured history size.
    pub history: VecDeque<HistoryEntry>,

    /// True if this run produced an action that needs a human.
    pub emergency: bool,
    pub last_action_description: String,
}

impl GroupSnapshot {
    /// Zero-valued snapshot for a group that has never been observed.
    pub fn blank(group_name: &str) -> Self {
        Self {
            group_name: group_name.to_string(),
            ..Self::default()
        }
    }

    /// Build the key for the snapshots table.
    pub fn table_key(&self) -> &str {
        &self.group_name
    }

    /// Load of the most loaded instance, if any.
    pub fn max_load(&self) -> Option<f64> {
        self.max_loaded
            .as_ref()
            .and_then(|id| self.per_instance_load.get(id).copied())
    }

    /// Load of the least loaded instance, if any.
    pub fn min_load(&self) -> Option<f64> {
        self.min_loaded
            .as_ref()
            .and_then(|id| self.per_instance_load.get(id).copied())
    }

    /// Average load the fleet would see with one instance fewer.
    ///
    /// `None` when the fleet has fewer than two instances.
    pub fn projected_load_without_one(&self) -> Option<f64> {
        if self.instance_count < 2 {
            return None;
        }
        Some(self.total_load / f64::from(self.instance_count - 1))
    }

    /// Append this run's numbers to the history, then trim it to `limit`.
    ///
    /// A `limit` of zero disables history entirely.
    pub fn record_history(&mut self, limit: usize) {
        if limit == 0 {
            self.history.clear();
            return;
        }
        self.history.push_back(HistoryEntry {
            ts: self.timestamp,
            instance_count: self.instance_count,
            total_load: self.total_load,
            avg_load: self.aggregate_load,
        });
        self.trim_history(limit);
    }

    /// Drop the oldest history entries until at most `limit` remain.
    pub fn trim_history(&mut self, limit: usize) {
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(count: u32, total: f64) -> GroupSnapshot {
        GroupSnapshot {
            instance_count: count,
            total_load: total,
            ..GroupSnapshot::blank("web")
        }
    }

    #[test]
    fn blank_is_zero_valued() {
        let snap = GroupSnapshot::blank("web");
        assert_eq!(snap.group_name, "web");
        assert_eq!(snap.counters, HysteresisCounters::default());
        assert_eq!(snap.timestamps, ActionTimestamps::default());
        assert!(snap.history.is_empty());
        assert!(!snap.emergency);
        assert_eq!(snap.exponential_average, 0.0);
    }

    #[test]
    fn projection_needs_two_instances() {
        assert_eq!(snapshot_with(0, 0.0).projected_load_without_one(), None);
        assert_eq!(snapshot_with(1, 50.0).projected_load_without_one(), None);
        assert_eq!(
            snapshot_with(3, 120.0).projected_load_without_one(),
            Some(60.0)
        );
    }

    #[test]
    fn history_is_a_ring_buffer() {
        let mut snap = snapshot_with(2, 80.0);
        for ts in 1..=5 {
            snap.timestamp = ts;
            snap.record_history(3);
        }
        let kept: Vec<u64> = snap.history.iter().map(|h| h.ts).collect();
        assert_eq!(kept, vec![3, 4, 5]);
    }

    #[test]
    fn zero_history_limit_keeps_nothing() {
        let mut snap = snapshot_with(2, 80.0);
        snap.record_history(0);
        assert!(snap.history.is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let snap: GroupSnapshot =
            serde_json::from_str(r#"{"group_name":"web","counters":{"low_counter":2}}"#).unwrap();
        assert_eq!(snap.counters.low_counter, 2);
        assert_eq!(snap.counters.kill_counter, 0);
        assert_eq!(snap.max_loaded, None);
    }

    #[test]
    fn extreme_loads_follow_ids() {
        let mut snap = GroupSnapshot::blank("web");
        snap.per_instance_load.insert("i-a".into(), 12.5);
        snap.per_instance_load.insert("i-b".into(), 80.0);
        snap.max_loaded = Some("i-b".into());
        snap.min_loaded = Some("i-a".into());
        assert_eq!(snap.max_load(), Some(80.0));
        assert_eq!(snap.min_load(), Some(12.5));
    }
}
