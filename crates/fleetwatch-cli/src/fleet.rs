//! JSON-file backed fleet.
//!
//! Stands in for the cloud provider: the file describes one group, its
//! instances and their CPU datapoints. Actions rewrite the file, so a
//! scheduler can drive repeated runs against it offline.
//!
//! ```json
//! {
//!   "group": "web",
//!   "desired_capacity": 3, "min_size": 2, "max_size": 6,
//!   "instances": [
//!     { "id": "i-0a1", "lifecycle_state": "InService",
//!       "placement": { "availability_zone": "eu-west-1a" },
//!       "datapoints": [ { "timestamp": 1700000000, "average": 41.5 } ] }
//!   ]
//! }
//! ```

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleetwatch_autoscale::{
    ActionExecutor, Datapoint, FleetQuery, FleetStatus, InstanceInfo, MetricQuery, MetricWindow,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetFile {
    pub group: String,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    #[serde(default)]
    pub instances: Vec<FleetFileInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetFileInstance {
    #[serde(flatten)]
    pub info: InstanceInfo,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

/// Fleet, metrics and control plane backed by one JSON file.
pub struct FileFleet {
    path: PathBuf,
    doc: RefCell<FleetFile>,
}

impl FileFleet {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading fleet file {}", path.display()))?;
        let doc: FleetFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing fleet file {}", path.display()))?;
        debug!(path = %path.display(), instances = doc.instances.len(), "fleet file loaded");
        Ok(Self {
            path: path.to_path_buf(),
            doc: RefCell::new(doc),
        })
    }

    /// Write the document back, replacing the file atomically.
    fn persist(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&*self.doc.borrow())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl FleetQuery for FileFleet {
    fn describe_group(&self, group: &str) -> anyhow::Result<FleetStatus> {
        let doc = self.doc.borrow();
        if doc.group != group {
            bail!("no autoscaling group {group} in {}", self.path.display());
        }
        Ok(FleetStatus {
            group: doc.group.clone(),
            desired_capacity: doc.desired_capacity,
            min_size: doc.min_size,
            max_size: doc.max_size,
            instances: doc.instances.iter().map(|i| i.info.clone()).collect(),
        })
    }
}

impl MetricQuery for FileFleet {
    fn cpu_datapoints(&self, instance: &str, window: MetricWindow) -> anyhow::Result<Vec<Datapoint>> {
        let doc = self.doc.borrow();
        let points = doc
            .instances
            .iter()
            .find(|i| i.info.id == instance)
            .map(|i| {
                i.datapoints
                    .iter()
                    .filter(|p| window.contains(p.timestamp))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(points)
    }
}

impl ActionExecutor for FileFleet {
    fn terminate(&self, instance: &str, decrement_desired: bool) -> anyhow::Result<()> {
        {
            let mut doc = self.doc.borrow_mut();
            let Some(pos) = doc.instances.iter().position(|i| i.info.id == instance) else {
                bail!("instance {instance} is not part of group {}", doc.group);
            };
            if decrement_desired {
                if doc.desired_capacity <= doc.min_size {
                    bail!(
                        "cannot decrement desired capacity of {} below min size {}",
                        doc.group,
                        doc.min_size
                    );
                }
                doc.desired_capacity -= 1;
            }
            doc.instances.remove(pos);
            info!(group = %doc.group, %instance, decrement_desired, desired = doc.desired_capacity, "instance removed from fleet file");
        }
        self.persist()
    }

    fn set_desired_capacity(&self, group: &str, desired: u32) -> anyhow::Result<()> {
        {
            let mut doc = self.doc.borrow_mut();
            if doc.group != group {
                bail!("no autoscaling group {group} in {}", self.path.display());
            }
            if !(doc.min_size..=doc.max_size).contains(&desired) {
                bail!(
                    "desired capacity {desired} outside [{}, {}]",
                    doc.min_size,
                    doc.max_size
                );
            }
            doc.desired_capacity = desired;
            info!(%group, desired, "desired capacity written to fleet file");
        }
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_autoscale::LifecycleState;

    const FLEET_JSON: &str = r#"{
  "group": "web",
  "desired_capacity": 3,
  "min_size": 2,
  "max_size": 5,
  "instances": [
    { "id": "i-1", "lifecycle_state": "InService",
      "placement": { "availability_zone": "eu-west-1a", "private_ip": "10.0.0.1" },
      "datapoints": [
        { "timestamp": 1000, "average": 40.0 },
        { "timestamp": 1060, "average": 60.0 },
        { "timestamp": 500, "average": 99.0 }
      ] },
    { "id": "i-2", "lifecycle_state": "InService" },
    { "id": "i-3", "lifecycle_state": "Pending" }
  ]
}"#;

    fn write_fleet(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, FLEET_JSON).unwrap();
        path
    }

    #[test]
    fn describes_group_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = FileFleet::open(&write_fleet(&dir)).unwrap();

        let status = fleet.describe_group("web").unwrap();
        assert_eq!(status.instances.len(), 3);
        assert_eq!(status.in_service_count(), 2);
        assert_eq!(status.instances[2].lifecycle_state, LifecycleState::Pending);
        assert_eq!(
            status.instances[0].placement.private_ip.as_deref(),
            Some("10.0.0.1")
        );
        assert!(fleet.describe_group("api").is_err());
    }

    #[test]
    fn datapoints_are_filtered_by_window() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = FileFleet::open(&write_fleet(&dir)).unwrap();

        let window = MetricWindow::ending_at(1_080, 60, 3);
        let points = fleet.cpu_datapoints("i-1", window).unwrap();
        assert_eq!(points.len(), 2);
        assert!(fleet.cpu_datapoints("i-2", window).unwrap().is_empty());
        assert!(fleet.cpu_datapoints("i-missing", window).unwrap().is_empty());
    }

    #[test]
    fn terminate_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fleet(&dir);
        let fleet = FileFleet::open(&path).unwrap();

        fleet.terminate("i-2", true).unwrap();

        let reread = FileFleet::open(&path).unwrap();
        let status = reread.describe_group("web").unwrap();
        assert_eq!(status.desired_capacity, 2);
        assert!(status.instances.iter().all(|i| i.id != "i-2"));
    }

    #[test]
    fn terminate_rejects_unknown_instance_and_min_breach() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = FileFleet::open(&write_fleet(&dir)).unwrap();

        assert!(fleet.terminate("i-9", false).is_err());
        fleet.terminate("i-1", true).unwrap();
        // Desired is now at min size.
        assert!(fleet.terminate("i-2", true).is_err());
        fleet.terminate("i-2", false).unwrap();
    }

    #[test]
    fn set_desired_respects_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fleet(&dir);
        let fleet = FileFleet::open(&path).unwrap();

        assert!(fleet.set_desired_capacity("web", 6).is_err());
        assert!(fleet.set_desired_capacity("web", 1).is_err());
        fleet.set_desired_capacity("web", 5).unwrap();

        let reread = FileFleet::open(&path).unwrap();
        assert_eq!(reread.describe_group("web").unwrap().desired_capacity, 5);
    }
}
