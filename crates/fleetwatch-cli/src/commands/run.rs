//! `fleetwatch run`: one evaluation of one group.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use fleetwatch_autoscale::{RunReport, WatchConfig, Watcher};

use super::GroupArgs;
use crate::fleet::FileFleet;
use crate::notify::MailNotifier;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: GroupArgs,
    /// TOML file with engine thresholds
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Decide and log, but do not touch the fleet
    #[arg(short, long)]
    pub dry: bool,
    /// Send emergency notifications to this address
    #[arg(short, long)]
    pub mail: Option<String>,
    /// Command that reads an RFC 822 message on stdin
    #[arg(long, default_value = "sendmail -t")]
    pub mail_command: String,
    /// Scale-down threshold (percent)
    #[arg(long)]
    pub low: Option<f64>,
    /// Scale-up threshold (percent)
    #[arg(long)]
    pub high: Option<f64>,
    /// Per-instance load that triggers an immediate scale-up
    #[arg(short = 'u', long)]
    pub high_urgent: Option<f64>,
    #[arg(long)]
    pub low_counter: Option<u32>,
    #[arg(long)]
    pub high_counter: Option<u32>,
    #[arg(long)]
    pub kill_counter: Option<u32>,
    /// History entries kept in the state database (0 disables)
    #[arg(short = 'H', long)]
    pub history: Option<usize>,
}

impl RunArgs {
    /// Defaults, then the config file, then flags.
    pub fn config(&self) -> anyhow::Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::from_file(path)?,
            None => WatchConfig::default(),
        };
        if let Some(v) = self.low {
            config.low_limit = v;
        }
        if let Some(v) = self.high {
            config.high_limit = v;
        }
        if let Some(v) = self.high_urgent {
            config.high_urgent = v;
        }
        if let Some(v) = self.low_counter {
            config.low_counter_limit = v;
        }
        if let Some(v) = self.high_counter {
            config.high_counter_limit = v;
        }
        if let Some(v) = self.kill_counter {
            config.kill_counter_limit = v;
        }
        if let Some(v) = self.history {
            config.history_size = v;
        }
        config.dry_run |= self.dry;
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

pub fn run(args: &RunArgs) -> anyhow::Result<()> {
    let report = execute(args)?;

    println!("{}: {}", args.target.group, report.decision);
    if !report.snapshot.last_action_description.is_empty() {
        println!("  last action: {}", report.snapshot.last_action_description);
    }
    if report.notified {
        println!("  notification sent");
    }
    Ok(())
}

fn execute(args: &RunArgs) -> anyhow::Result<RunReport> {
    let config = args.config()?;
    info!(group = %args.target.group, dry_run = config.dry_run, "starting run");

    let store = args.target.open_store()?;
    let fleet = FileFleet::open(&args.target.fleet)?;
    let mailer = args
        .mail
        .as_ref()
        .map(|_| MailNotifier::new(&args.mail_command))
        .transpose()?;

    let mut watcher = Watcher::new(config, store, &fleet, &fleet, &fleet);
    if let (Some(mailer), Some(recipient)) = (&mailer, &args.mail) {
        watcher = watcher.with_notifier(mailer, recipient);
    }
    watcher.run(&args.target.group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil;
    use fleetwatch_autoscale::Decision;
    use fleetwatch_state::SnapshotStore;

    fn args(target: GroupArgs) -> RunArgs {
        RunArgs {
            target,
            config: None,
            dry: false,
            mail: None,
            mail_command: "sendmail -t".into(),
            low: None,
            high: None,
            high_urgent: None,
            low_counter: None,
            high_counter: None,
            kill_counter: None,
            history: None,
        }
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("watch.toml");
        std::fs::write(&config_path, "low_limit = 50.0\nhigh_limit = 80.0\nhigh_urgent = 85.0\n").unwrap();

        let mut a = args(testutil::target(dir.path()));
        a.config = Some(config_path);
        a.high = Some(75.0);
        a.kill_counter = Some(4);
        a.dry = true;

        let config = a.config().unwrap();
        assert_eq!(config.low_limit, 50.0);
        assert_eq!(config.high_limit, 75.0);
        assert_eq!(config.high_urgent, 85.0);
        assert_eq!(config.kill_counter_limit, 4);
        assert!(config.dry_run);
    }

    #[test]
    fn inconsistent_flags_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(testutil::target(dir.path()));
        a.low = Some(95.0);
        assert!(a.config().is_err());
    }

    #[test]
    fn first_run_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(testutil::target(dir.path()));

        let report = execute(&a).unwrap();
        assert_eq!(report.decision, Decision::NoChange);

        let store = SnapshotStore::open(&a.target.store_path()).unwrap();
        let snap = store.get("web").unwrap().unwrap();
        assert_eq!(snap.instance_count, 3);
        assert_eq!(snap.desired_capacity, 3);
        assert_eq!(snap.history.len(), 1);
    }

    #[test]
    fn damaged_state_file_starts_cold() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(testutil::target(dir.path()));
        std::fs::create_dir_all(&a.target.data_dir).unwrap();
        std::fs::write(a.target.store_path(), b"garbage left by a crashed disk").unwrap();

        let report = execute(&a).unwrap();
        assert_eq!(report.decision, Decision::NoChange);

        let store = SnapshotStore::open(&a.target.store_path()).unwrap();
        let snap = store.get("web").unwrap().unwrap();
        assert_eq!(snap.instance_count, 3);
        assert!(a.target.data_dir.join("web.redb.corrupt").exists());
    }

    #[test]
    fn concurrent_run_for_same_group_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(testutil::target(dir.path()));

        let _held = a.target.open_store().unwrap();
        assert!(execute(&a).is_err());
        assert!(!a.target.data_dir.join("web.redb.corrupt").exists());
    }
}
