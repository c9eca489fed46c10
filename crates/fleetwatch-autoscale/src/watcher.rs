//! Watcher: one invocation of the engine for one group.
//!
//! Fetches the fleet and its metrics, evaluates against the stored
//! snapshot, applies the decision, and persists the new snapshot.
//!
//! Any collaborator failure aborts the run before the save, leaving the
//! previous snapshot untouched. Callers must ensure at most one run per
//! group at a time; opening the group's store file enforces that across
//! processes when each group has its own file.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tracing::{info, warn};

use fleetwatch_state::{GroupSnapshot, InstanceId, SnapshotStore};

use crate::aggregate::InstanceLoad;
use crate::config::WatchConfig;
use crate::engine::{Decision, DecisionEngine, Observation};
use crate::provider::{
    ActionExecutor, FleetQuery, FleetStatus, MetricQuery, MetricWindow, Notifier,
};
use crate::summary::fleet_summary;

/// What a single run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub decision: Decision,
    /// The decision reached the control plane.
    pub applied: bool,
    /// A notification was delivered.
    pub notified: bool,
    /// The snapshot as persisted.
    pub snapshot: GroupSnapshot,
}

/// Wires the engine to its collaborators for one-shot runs.
pub struct Watcher<'a> {
    engine: DecisionEngine,
    store: SnapshotStore,
    fleet: &'a dyn FleetQuery,
    metrics: &'a dyn MetricQuery,
    executor: &'a dyn ActionExecutor,
    notifier: Option<(&'a dyn Notifier, String)>,
}

impl<'a> Watcher<'a> {
    pub fn new(
        config: WatchConfig,
        store: SnapshotStore,
        fleet: &'a dyn FleetQuery,
        metrics: &'a dyn MetricQuery,
        executor: &'a dyn ActionExecutor,
    ) -> Self {
        let store = store.with_history_limit(config.history_size);
        Self {
            engine: DecisionEngine::new(config),
            store,
            fleet,
            metrics,
            executor,
            notifier: None,
        }
    }

    /// Notify `recipient` about emergency actions.
    pub fn with_notifier(mut self, notifier: &'a dyn Notifier, recipient: &str) -> Self {
        self.notifier = Some((notifier, recipient.to_string()));
        self
    }

    /// Run once for `group` at the current wall-clock time.
    pub fn run(&self, group: &str) -> anyhow::Result<RunReport> {
        self.run_at(group, epoch_secs())
    }

    /// Run once for `group` as of `now` (unix seconds).
    pub fn run_at(&self, group: &str, now: u64) -> anyhow::Result<RunReport> {
        let config = self.engine.config();

        let fleet = self
            .fleet
            .describe_group(group)
            .with_context(|| format!("describing group {group}"))?;

        let window = MetricWindow::ending_at(now, config.stats_period_secs, config.stats_window_periods);
        let loads = collect_loads(&fleet, self.metrics, window)?;

        let previous = self
            .store
            .load(group)
            .with_context(|| format!("loading snapshot for {group}"))?;
        let evaluation = self
            .engine
            .evaluate(Observation::from_fleet(&fleet, now, loads), &previous);
        let mut snapshot = evaluation.snapshot;
        let decision = evaluation.decision;

        info!(
            %group,
            instances = snapshot.instance_count,
            desired = snapshot.desired_capacity,
            min = snapshot.min_size,
            max = snapshot.max_size,
            average = snapshot.aggregate_load,
            trend = snapshot.trend,
            counters = ?snapshot.counters,
            "group evaluated"
        );

        let applied = self.apply(&snapshot, &decision)?;
        if applied {
            snapshot.timestamps.last_action_ts = now;
        }

        snapshot.record_history(config.history_size);
        self.store
            .save(&snapshot)
            .with_context(|| format!("saving snapshot for {group}"))?;

        let notified = snapshot.emergency && self.notify(&fleet, &snapshot);

        Ok(RunReport {
            decision,
            applied,
            notified,
            snapshot,
        })
    }

    /// Send the decision to the control plane. Returns whether it was sent.
    fn apply(&self, snap: &GroupSnapshot, decision: &Decision) -> anyhow::Result<bool> {
        let group = &snap.group_name;
        if *decision == Decision::NoChange {
            return Ok(false);
        }
        if self.engine.config().dry_run {
            info!(%group, %decision, dry_run = true, "not applying decision");
            return Ok(false);
        }

        match decision {
            Decision::NoChange => Ok(false),
            Decision::ScaleUp { to, .. } | Decision::ScaleDown { to, .. } => {
                if !(snap.min_size..=snap.max_size).contains(to) {
                    warn!(%group, desired = to, min = snap.min_size, max = snap.max_size, "desired capacity out of bounds, not applied");
                    return Ok(false);
                }
                self.executor
                    .set_desired_capacity(group, *to)
                    .with_context(|| format!("setting desired capacity of {group} to {to}"))?;
                info!(%group, from = snap.instance_count, to, "desired capacity set");
                Ok(true)
            }
            Decision::Kill {
                instance,
                decrement_desired,
                ..
            } => {
                self.executor
                    .terminate(instance, *decrement_desired)
                    .with_context(|| format!("terminating {instance}"))?;
                info!(%group, %instance, decrement = decrement_desired, instances = snap.instance_count, "instance terminated");
                Ok(true)
            }
        }
    }

    /// Deliver the emergency notification. Failures are logged, not fatal.
    fn notify(&self, fleet: &FleetStatus, snap: &GroupSnapshot) -> bool {
        let Some((notifier, recipient)) = &self.notifier else {
            return false;
        };
        let summary = fleet_summary(fleet, snap, true);
        match notifier.notify(&snap.last_action_description, &summary, recipient) {
            Ok(()) => {
                info!(group = %snap.group_name, %recipient, "emergency notification sent");
                true
            }
            Err(e) => {
                warn!(group = %snap.group_name, %recipient, error = %e, "emergency notification failed");
                false
            }
        }
    }
}

/// Average each in-service instance's datapoints over `window`.
///
/// Instances without datapoints are left out.
pub fn collect_loads(
    fleet: &FleetStatus,
    metrics: &dyn MetricQuery,
    window: MetricWindow,
) -> anyhow::Result<BTreeMap<InstanceId, InstanceLoad>> {
    let mut loads = BTreeMap::new();
    for instance in fleet.in_service() {
        let points = metrics
            .cpu_datapoints(&instance.id, window)
            .with_context(|| format!("reading CPU metrics for {}", instance.id))?;
        match InstanceLoad::from_datapoints(&points) {
            Some(load) => {
                loads.insert(instance.id.clone(), load);
            }
            None => info!(group = %fleet.group, instance = %instance.id, "no datapoints yet, skipping"),
        }
    }
    Ok(loads)
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
