//! Human-readable fleet summary, used in logs, notifications and the
//! `status` command.

use std::fmt::Write;

use fleetwatch_state::GroupSnapshot;

use crate::provider::FleetStatus;

/// Render the fleet and the loads measured in `snapshot`.
///
/// With `detailed`, each instance line also carries its private DNS name.
pub fn fleet_summary(fleet: &FleetStatus, snapshot: &GroupSnapshot, detailed: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} values: instances: {} min: {} max: {} desired: {}",
        fleet.group,
        fleet.in_service_count(),
        fleet.min_size,
        fleet.max_size,
        fleet.desired_capacity
    );

    for instance in &fleet.instances {
        let load = snapshot
            .per_instance_load
            .get(&instance.id)
            .copied()
            .unwrap_or(0.0);
        let state = format!("{:?}", instance.lifecycle_state);
        let _ = write!(out, "{} {:5.2}% {}", instance.id, load, state);

        let p = &instance.placement;
        for field in [&p.instance_type, &p.availability_zone, &p.private_ip]
            .into_iter()
            .flatten()
        {
            let _ = write!(out, " {field}");
        }
        if detailed && let Some(dns) = &p.private_dns {
            let _ = write!(out, " {dns}");
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        "Average load: {:5.2}% Trend: {:5.2}",
        snapshot.aggregate_load, snapshot.trend
    );
    if let (Some(max), Some(min)) = (snapshot.max_load(), snapshot.min_load()) {
        let _ = write!(out, " Max: {max:5.2} Min: {min:5.2}");
    }
    out.push('\n');

    if let Some(projected) = snapshot.projected_load_without_one() {
        let _ = writeln!(
            out,
            "Average load with {} instances: {:5.2}%",
            snapshot.instance_count - 1,
            projected
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InstanceInfo, LifecycleState, Placement};

    fn test_fleet() -> FleetStatus {
        FleetStatus {
            group: "web".into(),
            desired_capacity: 2,
            min_size: 1,
            max_size: 4,
            instances: vec![
                InstanceInfo {
                    id: "i-1".into(),
                    lifecycle_state: LifecycleState::InService,
                    placement: Placement {
                        instance_type: Some("c5.large".into()),
                        availability_zone: Some("eu-west-1a".into()),
                        private_ip: Some("10.0.0.5".into()),
                        private_dns: Some("ip-10-0-0-5.internal".into()),
                    },
                },
                InstanceInfo {
                    id: "i-2".into(),
                    lifecycle_state: LifecycleState::Pending,
                    placement: Placement::default(),
                },
            ],
        }
    }

    fn test_snapshot() -> GroupSnapshot {
        let mut snap = GroupSnapshot::blank("web");
        snap.instance_count = 2;
        snap.per_instance_load.insert("i-1".into(), 42.0);
        snap.max_loaded = Some("i-1".into());
        snap.min_loaded = Some("i-1".into());
        snap.aggregate_load = 42.0;
        snap.total_load = 42.0;
        snap
    }

    #[test]
    fn summary_lists_instances_and_averages() {
        let text = fleet_summary(&test_fleet(), &test_snapshot(), false);
        assert!(text.starts_with("web values: instances: 1 min: 1 max: 4 desired: 2"));
        assert!(text.contains("i-1 42.00% InService c5.large eu-west-1a 10.0.0.5\n"));
        assert!(text.contains("i-2  0.00% Pending\n"));
        assert!(text.contains("Average load: 42.00%"));
        assert!(text.contains("Average load with 1 instances: 42.00%"));
        assert!(!text.contains("internal"));
    }

    #[test]
    fn detailed_summary_adds_dns() {
        let text = fleet_summary(&test_fleet(), &test_snapshot(), true);
        assert!(text.contains("10.0.0.5 ip-10-0-0-5.internal"));
    }
}
