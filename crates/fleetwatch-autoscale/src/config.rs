//! Engine configuration.
//!
//! Built once per invocation (defaults, then an optional TOML file, then
//! command-line overrides) and handed to the engine by value. Nothing in
//! here is mutated after construction.

use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Thresholds and limits consumed by the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Scale down while the N-1 projection stays below this (percent).
    pub low_limit: f64,
    /// Scale up while the trimmed average stays above this (percent).
    pub high_limit: f64,
    /// A single instance above this load triggers an immediate scale-up.
    pub high_urgent: f64,
    /// Consecutive low runs that must be exceeded before scaling down.
    pub low_counter_limit: u32,
    /// Consecutive high runs that must be exceeded before scaling up.
    pub high_counter_limit: u32,
    /// Consecutive outlier runs that must be exceeded before a kill.
    pub kill_counter_limit: u32,
    /// Maximum history entries kept in the snapshot. Zero disables history.
    pub history_size: usize,
    /// Compute and log decisions without calling the control plane.
    pub dry_run: bool,
    /// Datapoints an instance needs before it can be singled out.
    pub min_samples: u32,
    /// An instance above `aggregate * high_outlier_factor` is overloaded.
    pub high_outlier_factor: f64,
    /// An instance below `aggregate * low_outlier_factor` is idle...
    pub low_outlier_factor: f64,
    /// ...provided it is also below this absolute load (percent).
    pub idle_floor: f64,
    /// Metric aggregation period in seconds.
    pub stats_period_secs: u64,
    /// Number of periods in the sampling window.
    pub stats_window_periods: u64,
    pub guards: GuardPeriods,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            low_limit: 70.0,
            high_limit: 90.0,
            high_urgent: 95.0,
            low_counter_limit: 5,
            high_counter_limit: 3,
            kill_counter_limit: 15,
            history_size: 1800,
            dry_run: false,
            min_samples: 2,
            high_outlier_factor: 1.4,
            low_outlier_factor: 0.2,
            idle_floor: 4.0,
            stats_period_secs: 60,
            stats_window_periods: 3,
            guards: GuardPeriods::default(),
        }
    }
}

/// Quiet periods (seconds) that keep checks from reacting to transients
/// the engine caused itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardPeriods {
    pub short_secs: u64,
    pub long_secs: u64,
    pub emergency_secs: u64,
}

impl Default for GuardPeriods {
    fn default() -> Self {
        Self {
            short_secs: 600,
            long_secs: 1080,
            emergency_secs: 120,
        }
    }
}

impl GuardPeriods {
    /// No quiet periods at all; every check runs on every invocation.
    pub fn disabled() -> Self {
        Self {
            short_secs: 0,
            long_secs: 0,
            emergency_secs: 0,
        }
    }
}

impl WatchConfig {
    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: WatchConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject threshold combinations the engine cannot act on sensibly.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.low_limit >= self.high_limit {
            bail!(
                "low limit ({}) must be below high limit ({})",
                self.low_limit,
                self.high_limit
            );
        }
        if self.high_urgent < self.high_limit {
            bail!(
                "urgent limit ({}) must not be below high limit ({})",
                self.high_urgent,
                self.high_limit
            );
        }
        if self.high_outlier_factor <= 1.0 {
            bail!("high outlier factor must be above 1.0");
        }
        if !(0.0..1.0).contains(&self.low_outlier_factor) {
            bail!("low outlier factor must be in [0, 1)");
        }
        if self.stats_period_secs == 0 || self.stats_window_periods == 0 {
            bail!("sampling window must be non-empty");
        }
        if self
            .stats_period_secs
            .checked_mul(self.stats_window_periods)
            .is_none()
        {
            bail!(
                "sampling window of {} x {}s is too long",
                self.stats_window_periods,
                self.stats_period_secs
            );
        }
        Ok(())
    }

    /// Length of the metric sampling window in seconds.
    pub fn sample_window_secs(&self) -> u64 {
        self.stats_period_secs.saturating_mul(self.stats_window_periods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sample_window_secs(), 180);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
low_limit = 50
kill_counter_limit = 4

[guards]
long_secs = 900
"#;
        let config: WatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.low_limit, 50.0);
        assert_eq!(config.kill_counter_limit, 4);
        assert_eq!(config.high_limit, 90.0);
        assert_eq!(config.guards.long_secs, 900);
        assert_eq!(config.guards.short_secs, 600);
    }

    #[test]
    fn toml_round_trip() {
        let config = WatchConfig {
            dry_run: true,
            ..WatchConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        let parsed: WatchConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_inverted_limits() {
        let config = WatchConfig {
            low_limit: 95.0,
            ..WatchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WatchConfig {
            high_urgent: 80.0,
            ..WatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_window() {
        let config = WatchConfig {
            stats_period_secs: 0,
            ..WatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overflowing_window() {
        let config = WatchConfig {
            stats_period_secs: u64::MAX / 2,
            stats_window_periods: 3,
            ..WatchConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.sample_window_secs(), u64::MAX);
    }
}
