//! Collaborator contracts for the cloud control plane.
//!
//! The engine never talks to a provider SDK directly. A run is handed
//! implementations of these traits; the binary ships a JSON-file backed
//! fleet and tests use in-process fakes.

use serde::{Deserialize, Serialize};

use fleetwatch_state::InstanceId;

/// Lifecycle state reported by the control plane for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    Detached,
    Standby,
    #[serde(untagged)]
    Other(String),
}

impl LifecycleState {
    /// Only in-service instances are counted and measured.
    pub fn is_in_service(&self) -> bool {
        matches!(self, LifecycleState::InService)
    }
}

/// Where an instance runs. Every field may legitimately be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    pub private_ip: Option<String>,
    pub private_dns: Option<String>,
}

/// One member of an autoscaling group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub placement: Placement,
}

/// Current configuration and membership of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub group: String,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub instances: Vec<InstanceInfo>,
}

impl FleetStatus {
    /// Instances the engine counts and measures.
    pub fn in_service(&self) -> impl Iterator<Item = &InstanceInfo> {
        self.instances
            .iter()
            .filter(|i| i.lifecycle_state.is_in_service())
    }

    pub fn in_service_count(&self) -> u32 {
        self.in_service().count() as u32
    }
}

/// One utilization datapoint for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Average CPU utilization percent over the datapoint's period.
    pub average: f64,
}

/// Time window and period for a metric query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricWindow {
    pub start: u64,
    pub end: u64,
    pub period_secs: u64,
}

impl MetricWindow {
    /// Window of `periods * period_secs` seconds ending at `end`.
    pub fn ending_at(end: u64, period_secs: u64, periods: u64) -> Self {
        Self {
            start: end.saturating_sub(period_secs.saturating_mul(periods)),
            end,
            period_secs,
        }
    }

    pub fn contains(&self, ts: u64) -> bool {
        (self.start..=self.end).contains(&ts)
    }
}

/// Reads group membership and sizes.
pub trait FleetQuery {
    fn describe_group(&self, group: &str) -> anyhow::Result<FleetStatus>;
}

/// Reads utilization datapoints.
pub trait MetricQuery {
    /// Datapoints for one instance inside `window`; empty if none exist.
    fn cpu_datapoints(&self, instance: &str, window: MetricWindow) -> anyhow::Result<Vec<Datapoint>>;
}

/// Applies decisions to the control plane. Calls are fire-and-forget.
pub trait ActionExecutor {
    fn terminate(&self, instance: &str, decrement_desired: bool) -> anyhow::Result<()>;
    fn set_desired_capacity(&self, group: &str, desired: u32) -> anyhow::Result<()>;
}

/// Tells a human about emergency actions.
pub trait Notifier {
    fn notify(&self, action: &str, summary: &str, recipient: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_parses_known_and_unknown_states() {
        let known: LifecycleState = serde_json::from_str(r#""InService""#).unwrap();
        assert!(known.is_in_service());

        let other: LifecycleState = serde_json::from_str(r#""Warmed:Pending""#).unwrap();
        assert_eq!(other, LifecycleState::Other("Warmed:Pending".into()));
        assert!(!other.is_in_service());
    }

    #[test]
    fn only_in_service_instances_count() {
        let fleet = FleetStatus {
            group: "web".into(),
            desired_capacity: 3,
            min_size: 1,
            max_size: 5,
            instances: vec![
                InstanceInfo {
                    id: "i-1".into(),
                    lifecycle_state: LifecycleState::InService,
                    placement: Placement::default(),
                },
                InstanceInfo {
                    id: "i-2".into(),
                    lifecycle_state: LifecycleState::Pending,
                    placement: Placement::default(),
                },
                InstanceInfo {
                    id: "i-3".into(),
                    lifecycle_state: LifecycleState::InService,
                    placement: Placement::default(),
                },
            ],
        };
        assert_eq!(fleet.in_service_count(), 2);
    }

    #[test]
    fn window_covers_whole_periods() {
        let window = MetricWindow::ending_at(1_000, 60, 3);
        assert_eq!(window.start, 820);
        assert!(window.contains(820));
        assert!(window.contains(1_000));
        assert!(!window.contains(819));
    }

    #[test]
    fn oversized_window_starts_at_epoch() {
        let window = MetricWindow::ending_at(1_000, u64::MAX / 2, 3);
        assert_eq!(window.start, 0);
        assert!(window.contains(0));
    }

    #[test]
    fn placement_fields_are_optional() {
        let info: InstanceInfo =
            serde_json::from_str(r#"{"id":"i-1","lifecycle_state":"InService"}"#).unwrap();
        assert_eq!(info.placement, Placement::default());
    }
}
