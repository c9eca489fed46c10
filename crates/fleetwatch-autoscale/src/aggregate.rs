//! Load aggregation: per-instance samples to a trimmed fleet average.
//!
//! With three or more loaded instances the single most and least loaded
//! ones are left out, so one runaway or idle instance cannot drag the
//! fleet-wide number that drives scaling.

use std::collections::BTreeMap;

use fleetwatch_state::InstanceId;

use crate::provider::Datapoint;

/// Below this many loaded instances nothing is trimmed.
const TRIM_MIN_INSTANCES: usize = 3;

/// Mean utilization of one instance over the sampling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceLoad {
    pub load: f64,
    pub samples: u32,
}

impl InstanceLoad {
    /// Average a set of datapoints. `None` when there are none.
    pub fn from_datapoints(points: &[Datapoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let sum: f64 = points.iter().map(|p| p.average).sum();
        Some(Self {
            load: sum / points.len() as f64,
            samples: points.len() as u32,
        })
    }
}

/// Result of aggregating one run's per-instance loads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    /// Trimmed mean over the aggregation set; zero when the set is empty.
    pub aggregate_load: f64,
    /// Sum over the aggregation set.
    pub total_load: f64,
    pub max_loaded: Option<InstanceId>,
    pub min_loaded: Option<InstanceId>,
    /// Instances that contributed to `aggregate_load`.
    pub aggregated: Vec<InstanceId>,
}

/// Computes the trimmed fleet average.
pub struct LoadAggregator;

impl LoadAggregator {
    /// Aggregate instances that reported at least one datapoint.
    ///
    /// Ties for max or min go to the first instance in key order, so at
    /// most one instance is trimmed from each end.
    pub fn summarize(loads: &BTreeMap<InstanceId, f64>) -> LoadSummary {
        let mut max: Option<(&InstanceId, f64)> = None;
        let mut min: Option<(&InstanceId, f64)> = None;
        for (id, &load) in loads {
            if max.is_none_or(|(_, m)| load > m) {
                max = Some((id, load));
            }
            if min.is_none_or(|(_, m)| load < m) {
                min = Some((id, load));
            }
        }
        let max_loaded = max.map(|(id, _)| id.clone());
        let min_loaded = min.map(|(id, _)| id.clone());

        let trim = loads.len() >= TRIM_MIN_INSTANCES;
        let mut aggregated: Vec<InstanceId> = loads
            .keys()
            .filter(|id| {
                !trim || (Some(*id) != max_loaded.as_ref() && Some(*id) != min_loaded.as_ref())
            })
            .cloned()
            .collect();
        if aggregated.is_empty() {
            aggregated = loads.keys().cloned().collect();
        }

        let total_load: f64 = aggregated.iter().map(|id| loads[id]).sum();
        let aggregate_load = if aggregated.is_empty() {
            0.0
        } else {
            total_load / aggregated.len() as f64
        };

        LoadSummary {
            aggregate_load,
            total_load,
            max_loaded,
            min_loaded,
            aggregated,
        }
    }
}
