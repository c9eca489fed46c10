//! fleetwatch-autoscale: periodic fleet autoscaling decisions.
//!
//! One invocation looks at one autoscaling group: it averages per-instance
//! CPU load (dropping the most and least loaded instance), smooths it
//! against the previous run, and decides whether to grow the fleet, shrink
//! it, or terminate a misbehaving instance.
//!
//! # Decision Algorithm
//!
//! ```text
//! aggregate   = mean(loads minus max and min, when >= 3 instances)
//! projected   = total_load / (instances - 1)
//!
//! one instance > aggregate * 1.4          -> kill it (after kill_counter_limit runs)
//! one instance > high_urgent              -> ScaleUp(instances + 1), no hysteresis
//! one instance < aggregate * 0.2 and < 4% -> kill it (after kill_counter_limit runs)
//! aggregate > high_limit                  -> ScaleUp(instances + 1) (after high_counter_limit runs)
//! projected < low_limit                   -> ScaleDown(instances - 1) (after low_counter_limit runs)
//! ```
//!
//! Counters must be exceeded on consecutive runs and reset the first time
//! their condition is not met. Quiet periods after recent changes keep the
//! engine from reacting to transients it caused itself.
//!
//! The engine expects to be re-run by an external scheduler and at most
//! one run per group may be in flight.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod provider;
pub mod summary;
pub mod trend;
pub mod watcher;

pub use aggregate::{InstanceLoad, LoadAggregator, LoadSummary};
pub use config::{GuardPeriods, WatchConfig};
pub use engine::{Decision, DecisionEngine, Evaluation, KillReason, Observation};
pub use provider::{
    ActionExecutor, Datapoint, FleetQuery, FleetStatus, InstanceInfo, LifecycleState, MetricQuery,
    MetricWindow, Notifier, Placement,
};
pub use summary::fleet_summary;
pub use trend::{TrendEstimate, TrendEstimator};
pub use watcher::{RunReport, Watcher, collect_loads, epoch_secs};
