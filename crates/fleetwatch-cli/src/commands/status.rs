//! `fleetwatch status`: read-only view of a group.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local};
use tracing::warn;

use fleetwatch_autoscale::{
    FleetQuery, LoadAggregator, MetricWindow, WatchConfig, collect_loads, epoch_secs,
    fleet_summary,
};
use fleetwatch_state::{GroupSnapshot, SnapshotStore, StateError};

use super::GroupArgs;
use crate::fleet::FileFleet;

/// `config` should be the file `run` uses, so both measure the same window.
pub fn status(target: &GroupArgs, all: bool, config: Option<&Path>) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => WatchConfig::from_file(path)?,
        None => WatchConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    print!("{}", render(target, all, &config, epoch_secs())?);
    Ok(())
}

fn render(target: &GroupArgs, all: bool, config: &WatchConfig, now: u64) -> anyhow::Result<String> {
    let fleet = FileFleet::open(&target.fleet)?;
    let status = fleet.describe_group(&target.group)?;
    let previous = persisted(target)?;

    let window = MetricWindow::ending_at(now, config.stats_period_secs, config.stats_window_periods);
    let loads: BTreeMap<_, _> = collect_loads(&status, &fleet, window)?
        .into_iter()
        .map(|(id, l)| (id, l.load))
        .collect();
    let summary = LoadAggregator::summarize(&loads);

    // Current measurements over the persisted state.
    let mut current = previous.clone();
    current.instance_count = status.in_service_count();
    current.per_instance_load = loads;
    current.aggregate_load = summary.aggregate_load;
    current.total_load = summary.total_load;
    current.max_loaded = summary.max_loaded;
    current.min_loaded = summary.min_loaded;

    let mut out = fleet_summary(&status, &current, all);
    let ts = &previous.timestamps;
    let _ = writeln!(
        out,
        "Last change: {} Last action: {}",
        format_ts(ts.last_changed_ts),
        format_ts(ts.last_action_ts)
    );
    let _ = writeln!(
        out,
        "Last scale up: {} Last scale down: {}",
        format_ts(ts.last_scale_up_ts),
        format_ts(ts.last_scale_down_ts)
    );
    let c = &previous.counters;
    let _ = writeln!(
        out,
        "Counters: low {} high {} kill {}",
        c.low_counter, c.high_counter, c.kill_counter
    );
    if !previous.last_action_description.is_empty() {
        let _ = writeln!(out, "Last action: {}", previous.last_action_description);
    }
    Ok(out)
}

/// The stored snapshot, or a blank one if the group was never run here.
fn persisted(target: &GroupArgs) -> anyhow::Result<GroupSnapshot> {
    let path = target.store_path();
    if !path.exists() {
        return Ok(GroupSnapshot::blank(&target.group));
    }
    let store = match SnapshotStore::open(&path) {
        Ok(store) => store,
        // Left for the next run to set aside; status never writes.
        Err(StateError::Corrupt(reason)) => {
            warn!(path = %path.display(), %reason, "state file damaged");
            return Ok(GroupSnapshot::blank(&target.group));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("opening state {}", path.display()));
        }
    };
    Ok(store.load(&target.group)?)
}

fn format_ts(ts: u64) -> String {
    if ts == 0 {
        return "never".to_string();
    }
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil;

    #[test]
    fn zero_timestamp_reads_never() {
        assert_eq!(format_ts(0), "never");
        assert_ne!(format_ts(1_700_000_000), "never");
    }

    #[test]
    fn status_without_state_shows_measured_loads() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());

        let out = render(&target, false, &WatchConfig::default(), 1_060).unwrap();
        assert!(out.starts_with("web values: instances: 3 min: 2 max: 6 desired: 3\n"));
        assert!(out.contains("i-1 40.00% InService"));
        assert!(out.contains("Average load: 50.00%"));
        assert!(out.contains("Last change: never Last action: never"));
        assert!(out.contains("Counters: low 0 high 0 kill 0"));
        // Status never creates state.
        assert!(!target.store_path().exists());
    }

    #[test]
    fn status_reports_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());
        {
            let store = target.open_store().unwrap();
            let mut snap = GroupSnapshot::blank("web");
            snap.counters.high_counter = 2;
            snap.last_action_description = "Increasing instances to 4".into();
            store.save(&snap).unwrap();
        }

        let out = render(&target, true, &WatchConfig::default(), 1_060).unwrap();
        assert!(out.contains("Counters: low 0 high 2 kill 0"));
        assert!(out.contains("Last action: Increasing instances to 4"));
    }

    #[test]
    fn status_uses_configured_window() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());
        let wide = WatchConfig {
            stats_period_secs: 3_000,
            ..WatchConfig::default()
        };

        let out = render(&target, false, &WatchConfig::default(), 5_000).unwrap();
        assert!(out.contains("Average load:  0.00%"));

        let out = render(&target, false, &wide, 5_000).unwrap();
        assert!(out.contains("Average load: 50.00%"));
    }

    #[test]
    fn status_survives_damaged_state_without_touching_it() {
        let dir = tempfile::tempdir().unwrap();
        let target = testutil::target(dir.path());
        std::fs::create_dir_all(&target.data_dir).unwrap();
        std::fs::write(target.store_path(), b"not a database").unwrap();

        let out = render(&target, false, &WatchConfig::default(), 1_060).unwrap();
        assert!(out.contains("Counters: low 0 high 0 kill 0"));
        assert_eq!(std::fs::read(target.store_path()).unwrap(), b"not a database");
    }
}
