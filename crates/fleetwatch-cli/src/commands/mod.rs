pub mod manage;
pub mod run;
pub mod status;

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use fleetwatch_state::SnapshotStore;

pub use run::RunArgs;

/// Which group to act on and where its fleet and state live.
#[derive(Debug, Clone, Args)]
pub struct GroupArgs {
    /// Autoscaling group name
    #[arg(short, long, default_value = "web")]
    pub group: String,
    /// JSON file describing the group's instances and metrics
    #[arg(short, long)]
    pub fleet: PathBuf,
    /// Directory holding one state database per group
    #[arg(long, default_value = "/var/lib/fleetwatch")]
    pub data_dir: PathBuf,
}

impl GroupArgs {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.redb", self.group))
    }

    /// Open the group's state database, creating the data directory.
    ///
    /// Fails while another process holds the same group. A damaged
    /// database file is set aside and the group starts cold.
    pub fn open_store(&self) -> anyhow::Result<SnapshotStore> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data dir {}", self.data_dir.display()))?;
        let path = self.store_path();
        SnapshotStore::open_or_reset(&path)
            .with_context(|| format!("opening state {} for {}", path.display(), self.group))
    }
}
