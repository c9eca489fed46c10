//! Decision engine: hysteresis-gated fleet actions.
//!
//! `DecisionEngine::evaluate` is pure: it takes this run's observation and
//! the previous snapshot and returns the decision together with the next
//! snapshot. Executing the decision and persisting the snapshot happen in
//! the `Watcher`.
//!
//! Checks run in a fixed order and the first one that acts ends the run:
//!
//! 1. overloaded instance: kill it, or scale up by one if any instance is
//!    above the urgent limit;
//! 2. idle instance: kill it;
//! 3. fleet average above `high_limit`: scale up by one;
//! 4. N-1 projection below `low_limit`: scale down by one.
//!
//! Each check sits behind an elapsed-time guard, and each action needs its
//! counter to exceed the configured limit on consecutive runs.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use fleetwatch_state::{ActionTimestamps, GroupSnapshot, InstanceId};

use crate::aggregate::{InstanceLoad, LoadAggregator};
use crate::config::{GuardPeriods, WatchConfig};
use crate::provider::FleetStatus;
use crate::trend::TrendEstimator;

/// Why an instance is being terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// Far above the fleet average.
    Overloaded,
    /// Far below the fleet average and nearly idle.
    Idle,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoChange,
    /// Set desired capacity to `to`. `urgent` skips hysteresis.
    ScaleUp { from: u32, to: u32, urgent: bool },
    /// Set desired capacity to `to`.
    ScaleDown { from: u32, to: u32 },
    /// Terminate one instance, optionally shrinking desired capacity.
    Kill {
        instance: InstanceId,
        decrement_desired: bool,
        reason: KillReason,
    },
}

impl Decision {
    /// Emergency decisions are reported to a human.
    pub fn is_emergency(&self) -> bool {
        matches!(
            self,
            Decision::Kill { .. } | Decision::ScaleUp { urgent: true, .. }
        )
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::NoChange => write!(f, "no change"),
            Decision::ScaleUp { from, to, urgent } => {
                let kind = if *urgent { "urgent scale up" } else { "scale up" };
                write!(f, "{kind} {from} -> {to}")
            }
            Decision::ScaleDown { from, to } => write!(f, "scale down {from} -> {to}"),
            Decision::Kill {
                instance,
                decrement_desired,
                ..
            } => write!(f, "kill {instance} (decrement desired: {decrement_desired})"),
        }
    }
}

/// What the fleet looked like at the start of this run.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub group: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// In-service instances.
    pub instance_count: u32,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    /// Instances that reported at least one datapoint.
    pub loads: BTreeMap<InstanceId, InstanceLoad>,
}

impl Observation {
    pub fn from_fleet(
        fleet: &FleetStatus,
        timestamp: u64,
        loads: BTreeMap<InstanceId, InstanceLoad>,
    ) -> Self {
        Self {
            group: fleet.group.clone(),
            timestamp,
            instance_count: fleet.in_service_count(),
            desired_capacity: fleet.desired_capacity,
            min_size: fleet.min_size,
            max_size: fleet.max_size,
            loads,
        }
    }
}

/// A decision plus the snapshot to persist for the next run.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub snapshot: GroupSnapshot,
}

/// Which checks may run, given how recently the fleet changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenChecks {
    too_high: bool,
    too_low: bool,
    fleet_high: bool,
    fleet_low: bool,
}

impl OpenChecks {
    fn at(now: u64, ts: &ActionTimestamps, guards: GuardPeriods) -> Self {
        let past = |since: u64, period: u64| period == 0 || now.saturating_sub(since) > period;
        let fleet_high = past(ts.last_changed_ts, guards.short_secs)
            && past(ts.last_action_ts, guards.short_secs);
        Self {
            too_high: past(ts.last_scale_down_ts, guards.long_secs)
                && past(ts.last_action_ts, guards.emergency_secs)
                && past(ts.last_scale_up_ts, guards.short_secs),
            too_low: past(ts.last_changed_ts, guards.long_secs)
                && past(ts.last_action_ts, guards.long_secs),
            fleet_high,
            fleet_low: fleet_high && past(ts.last_scale_up_ts, guards.long_secs),
        }
    }
}

/// Turns repeated threshold violations into fleet actions.
pub struct DecisionEngine {
    config: WatchConfig,
}

impl DecisionEngine {
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Evaluate one run against the previous snapshot.
    pub fn evaluate(&self, observation: Observation, previous: &GroupSnapshot) -> Evaluation {
        let now = observation.timestamp;
        let mut snapshot = self.carry_over(observation, previous);

        let open = OpenChecks::at(now, &snapshot.timestamps, self.config.guards);
        debug!(group = %snapshot.group_name, ?open, "guards evaluated");

        let decision = self.decide(&mut snapshot, open);
        if decision.is_emergency() {
            snapshot.emergency = true;
        }
        if decision != Decision::NoChange {
            info!(
                group = %snapshot.group_name,
                %decision,
                action = %snapshot.last_action_description,
                dry_run = self.config.dry_run,
                "decision"
            );
        }

        Evaluation { decision, snapshot }
    }

    /// Build this run's snapshot: aggregate, smooth, and inherit state.
    fn carry_over(&self, observation: Observation, previous: &GroupSnapshot) -> GroupSnapshot {
        let now = observation.timestamp;
        let per_instance_load: BTreeMap<InstanceId, f64> = observation
            .loads
            .iter()
            .map(|(id, l)| (id.clone(), l.load))
            .collect();
        let sample_counts = observation
            .loads
            .iter()
            .map(|(id, l)| (id.clone(), l.samples))
            .collect();

        let summary = LoadAggregator::summarize(&per_instance_load);
        let trend = TrendEstimator::estimate(
            summary.aggregate_load,
            now,
            previous.timestamp,
            previous.exponential_average,
        );

        let mut timestamps = previous.timestamps;
        let previous_instance_count = if observation.instance_count != previous.instance_count {
            if observation.instance_count > previous.instance_count {
                timestamps.last_scale_up_ts = now;
            } else {
                timestamps.last_scale_down_ts = now;
            }
            previous.instance_count
        } else {
            previous.previous_instance_count
        };
        if observation.instance_count != previous.instance_count
            || observation.desired_capacity != previous.desired_capacity
        {
            timestamps.last_changed_ts = now;
        }

        GroupSnapshot {
            group_name: observation.group,
            timestamp: now,
            instance_count: observation.instance_count,
            previous_instance_count,
            desired_capacity: observation.desired_capacity,
            min_size: observation.min_size,
            max_size: observation.max_size,
            per_instance_load,
            sample_counts,
            max_loaded: summary.max_loaded,
            min_loaded: summary.min_loaded,
            aggregate_load: summary.aggregate_load,
            total_load: summary.total_load,
            exponential_average: trend.exponential_average,
            trend: trend.trend,
            counters: previous.counters,
            timestamps,
            history: previous.history.clone(),
            emergency: false,
            last_action_description: previous.last_action_description.clone(),
        }
    }

    fn decide(&self, snap: &mut GroupSnapshot, open: OpenChecks) -> Decision {
        if (open.too_high || open.too_low)
            && let Some(decision) = self.check_instances(snap, open)
        {
            return decision;
        }
        if open.fleet_high
            && let Some(decision) = self.check_fleet_high(snap)
        {
            return decision;
        }
        if open.fleet_low
            && let Some(decision) = self.check_fleet_low(snap)
        {
            return decision;
        }
        Decision::NoChange
    }

    /// First instance, in key order, with enough datapoints whose load
    /// matches `pred`.
    fn find_trusted(&self, snap: &GroupSnapshot, pred: impl Fn(f64) -> bool) -> Option<(InstanceId, f64)> {
        snap.per_instance_load
            .iter()
            .filter(|(id, _)| {
                snap.sample_counts.get(*id).copied().unwrap_or(0) >= self.config.min_samples
            })
            .find(|(_, load)| pred(**load))
            .map(|(id, load)| (id.clone(), *load))
    }

    /// Checks 1 and 2: a single overloaded or idle instance.
    ///
    /// Both share the kill counter: it grows on any run where some trusted
    /// instance is an outlier and resets on a run where none is.
    fn check_instances(&self, snap: &mut GroupSnapshot, open: OpenChecks) -> Option<Decision> {
        let cfg = &self.config;
        let aggregate = snap.aggregate_load;

        let overloaded = if open.too_high && snap.instance_count > 2 {
            self.find_trusted(snap, |load| load > aggregate * cfg.high_outlier_factor)
        } else {
            None
        };
        let idle = if open.too_low && snap.instance_count > 1 {
            self.find_trusted(snap, |load| {
                load < aggregate * cfg.low_outlier_factor && load < cfg.idle_floor
            })
        } else {
            None
        };
        let urgent = if open.too_high {
            self.find_trusted(snap, |load| load > cfg.high_urgent)
        } else {
            None
        };

        if overloaded.is_none() && idle.is_none() {
            snap.counters.kill_counter = 0;
        } else {
            snap.counters.kill_counter += 1;
            debug!(
                group = %snap.group_name,
                kill_counter = snap.counters.kill_counter,
                limit = cfg.kill_counter_limit,
                "outlier instance observed"
            );
        }
        let kill_due = snap.counters.kill_counter > cfg.kill_counter_limit;

        if kill_due && let Some((instance, load)) = overloaded {
            snap.counters.kill_counter = 0;
            snap.last_action_description = format!(
                "Emergency: kill bad instance with high load ({instance} {load:5.2}%)"
            );
            let decrement = self.decrement_allowed(snap, aggregate < cfg.high_limit);
            warn!(group = %snap.group_name, %instance, load, aggregate, decrement, "killing overloaded instance");
            return Some(Decision::Kill {
                instance,
                decrement_desired: decrement,
                reason: KillReason::Overloaded,
            });
        }

        if let Some((instance, load)) = urgent {
            if snap.instance_count < snap.max_size {
                let to = snap.instance_count + 1;
                snap.last_action_description = format!(
                    "Emergency: high load in one instance ({instance} {load:5.2}%) increasing instances to {to}"
                );
                warn!(group = %snap.group_name, %instance, load, from = snap.instance_count, to, "urgent scale up");
                return Some(Decision::ScaleUp {
                    from: snap.instance_count,
                    to,
                    urgent: true,
                });
            }
            debug!(group = %snap.group_name, %instance, load, "urgent load at max size, no runway");
        }

        if kill_due && let Some((instance, load)) = idle {
            // The fleet low check runs here for its counter side effect.
            // Whether it should is an open product question; keep the call.
            // A ScaleDown it returns is deliberately not applied: the kill
            // below already decrements desired capacity by one, and also
            // sending set_desired(n - 1) would shrink the group twice.
            if let Some(scale_down) = self.check_fleet_low(snap) {
                info!(
                    group = %snap.group_name,
                    %scale_down,
                    "low check qualified during idle kill, scale down not applied"
                );
            }
            snap.counters.kill_counter = 0;
            snap.last_action_description =
                format!("Warning: terminated instance with low load ({instance} {load:5.2}%)");
            let decrement = self.decrement_allowed(snap, true);
            warn!(group = %snap.group_name, %instance, load, aggregate, decrement, "killing idle instance");
            return Some(Decision::Kill {
                instance,
                decrement_desired: decrement,
                reason: KillReason::Idle,
            });
        }

        None
    }

    /// A kill may only shrink desired capacity while above `min_size`.
    fn decrement_allowed(&self, snap: &GroupSnapshot, wanted: bool) -> bool {
        if wanted && snap.min_size > 0 && snap.instance_count <= snap.min_size {
            info!(group = %snap.group_name, "at min size, replacing killed instance");
            return false;
        }
        wanted
    }

    /// Check 3: sustained fleet-wide high load.
    fn check_fleet_high(&self, snap: &mut GroupSnapshot) -> Option<Decision> {
        let cfg = &self.config;
        if snap.instance_count >= snap.max_size {
            snap.counters.high_counter = 0;
            return None;
        }
        if snap.aggregate_load <= cfg.high_limit {
            snap.counters.high_counter = 0;
            return None;
        }

        snap.counters.high_counter += 1;
        debug!(
            group = %snap.group_name,
            high_counter = snap.counters.high_counter,
            limit = cfg.high_counter_limit,
            load = snap.aggregate_load,
            "fleet above high limit"
        );
        if snap.counters.high_counter <= cfg.high_counter_limit {
            return None;
        }

        snap.counters.high_counter = 0;
        let (from, to) = (snap.instance_count, snap.instance_count + 1);
        snap.last_action_description = format!(
            "WARN, high load ({:5.2}/{:5.2}): {from} -> {to}",
            snap.aggregate_load, cfg.high_limit
        );
        Some(Decision::ScaleUp {
            from,
            to,
            urgent: false,
        })
    }

    /// Check 4: the fleet would stay below `low_limit` with one fewer instance.
    fn check_fleet_low(&self, snap: &mut GroupSnapshot) -> Option<Decision> {
        let cfg = &self.config;
        if snap.instance_count <= snap.min_size {
            snap.counters.low_counter = 0;
            return None;
        }
        let projected = match snap.projected_load_without_one() {
            Some(p) if p < cfg.low_limit => p,
            _ => {
                snap.counters.low_counter = 0;
                return None;
            }
        };

        snap.counters.low_counter += 1;
        debug!(
            group = %snap.group_name,
            low_counter = snap.counters.low_counter,
            limit = cfg.low_counter_limit,
            projected,
            "projection below low limit"
        );
        if snap.counters.low_counter <= cfg.low_counter_limit {
            return None;
        }

        snap.counters.low_counter = 0;
        let (from, to) = (snap.instance_count, snap.instance_count - 1);
        snap.last_action_description = format!(
            "low load ({:5.2}/{:5.2}): {from} -> {to}",
            snap.aggregate_load, cfg.low_limit
        );
        Some(Decision::ScaleDown { from, to })
    }
}
