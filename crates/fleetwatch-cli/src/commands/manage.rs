//! Manual actions: `set-desired` and `kill`.
//!
//! Both take the group's state lock for the duration of the call so they
//! cannot interleave with a scheduled run.

use anyhow::bail;
use tracing::info;

use fleetwatch_autoscale::{ActionExecutor, FleetQuery};

use super::GroupArgs;
use crate::fleet::FileFleet;

/// Largest manual step away from the current instance count.
const MAX_MANUAL_STEP: u32 = 2;

pub fn set_desired(target: &GroupArgs, desired: u32) -> anyhow::Result<()> {
    let _lock = target.open_store()?;
    let fleet = FileFleet::open(&target.fleet)?;
    let status = fleet.describe_group(&target.group)?;
    let count = status.in_service_count();

    if desired == 0 {
        bail!("desired capacity must be positive");
    }
    if desired.abs_diff(count) > MAX_MANUAL_STEP {
        bail!("desired capacity {desired} is too far from {count} running instances");
    }
    fleet.set_desired_capacity(&target.group, desired)?;
    info!(group = %target.group, from = count, to = desired, "desired capacity set by hand");
    println!("{}: desired capacity {count} -> {desired}", target.group);
    Ok(())
}

pub fn kill(target: &GroupArgs, instance: &str) -> anyhow::Result<()> {
    let _lock = target.open_store()?;
    let fleet = FileFleet::open(&target.fleet)?;
    let status = fleet.describe_group(&target.group)?;

    if !status.instances.iter().any(|i| i.id == instance) {
        bail!("instance {instance} is not part of group {}", target.group);
    }
    fleet.terminate(instance, true)?;
    info!(group = %target.group, %instance, "instance terminated by hand");
    println!("{}: terminated {instance}", target.group);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil;

    fn desired(target: &GroupArgs) -> u32 {
        let fleet = FileFleet::open(&target.fleet).unwrap();
        fleet.describe_group("web").unwrap().desired_capacity
    }

    #[test]
    fn set_desired_within_two_of_count() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());

        set_desired(&target, 5).unwrap();
        assert_eq!(desired(&target), 5);
    }

    #[test]
    fn set_desired_rejects_large_steps_and_zero() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());

        assert!(set_desired(&target, 6).is_err());
        assert!(set_desired(&target, 0).is_err());
        assert_eq!(desired(&target), 3);
    }

    #[test]
    fn kill_removes_instance_and_decrements() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());

        kill(&target, "i-2").unwrap();
        let fleet = FileFleet::open(&target.fleet).unwrap();
        let status = fleet.describe_group("web").unwrap();
        assert_eq!(status.desired_capacity, 2);
        assert_eq!(status.instances.len(), 2);
    }

    #[test]
    fn kill_unknown_instance_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());
        assert!(kill(&target, "i-9").is_err());
    }
}
