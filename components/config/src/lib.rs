use std::{fs::File, path::Path, time::Duration};

use error::ConfigurationError;
use log::warn;
use serde::{Deserialize, Serialize};
pub mod error;

/// Prefix of environment variables overriding the repairer section.
pub const ENV_PREFIX: &str = "REPAIRER_";

const MAX_PIECES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Repairer {
    /// Maximum number of segments repaired concurrently by the repair service.
    #[serde(rename = "max-repair")]
    pub max_repair: usize,

    /// How long the repair service sleeps when the repair queue is empty.
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,

    /// Shared deadline for uploading repaired pieces to new nodes.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Deadline for downloading a single piece.
    #[serde(rename = "download-timeout-ms")]
    pub download_timeout_ms: u64,

    /// Deadline for a whole repair attempt, and for the download phase within it.
    #[serde(rename = "total-timeout-ms")]
    pub total_timeout_ms: u64,

    /// Fraction over the optimal threshold to request replacement nodes for, so that some
    /// uploads may fail without leaving the segment short. Negative values are treated as 0.
    #[serde(rename = "max-excess-rate-optimal-threshold")]
    pub max_excess_rate_optimal_threshold: f64,

    /// Overrides the repair threshold of every segment when non-zero.
    #[serde(rename = "repair-override")]
    pub repair_override: usize,

    /// Cap on simultaneous piece transfers within one repair attempt.
    #[serde(rename = "max-concurrent-transfers")]
    pub max_concurrent_transfers: usize,

    /// Extra pieces fetched beyond the minimum required, to tolerate slow or failing nodes.
    #[serde(rename = "download-overfetch")]
    pub download_overfetch: usize,
}

impl Default for Repairer {
    fn default() -> Self {
        Self {
            max_repair: 5,
            interval_ms: 5 * 60 * 1000,
            timeout_ms: 5 * 60 * 1000,
            download_timeout_ms: 5 * 60 * 1000,
            total_timeout_ms: 45 * 60 * 1000,
            max_excess_rate_optimal_threshold: 0.05,
            repair_override: 0,
            max_concurrent_transfers: 32,
            download_overfetch: 2,
        }
    }
}

impl Repairer {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    pub fn repair_override(&self) -> Option<usize> {
        if self.repair_override == 0 {
            None
        } else {
            Some(self.repair_override)
        }
    }
}

/// Environment overrides of [`Repairer`], e.g. `REPAIRER_MAX_REPAIR=10`.
#[derive(Debug, Default, Deserialize)]
struct RepairerOverrides {
    max_repair: Option<usize>,
    interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
    download_timeout_ms: Option<u64>,
    total_timeout_ms: Option<u64>,
    max_excess_rate_optimal_threshold: Option<f64>,
    repair_override: Option<usize>,
    max_concurrent_transfers: Option<usize>,
    download_overfetch: Option<usize>,
}

impl RepairerOverrides {
    fn apply(self, repairer: &mut Repairer) {
        macro_rules! apply {
            ($($field:ident),*) => {
                $(
                    if let Some(value) = self.$field {
                        repairer.$field = value;
                    }
                )*
            };
        }
        apply!(
            max_repair,
            interval_ms,
            timeout_ms,
            download_timeout_ms,
            total_timeout_ms,
            max_excess_rate_optimal_threshold,
            repair_override,
            max_concurrent_transfers,
            download_overfetch
        );
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub repairer: Repairer,
}

impl Configuration {
    /// Load configuration from a YAML file. Keys absent from the file keep their defaults.
    pub fn from_file<P>(path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    /// Apply `REPAIRER_*` environment variables on top of the current values.
    pub fn apply_env(&mut self) -> Result<(), ConfigurationError> {
        self.apply_overrides(std::env::vars())
    }

    fn apply_overrides<Iter>(&mut self, vars: Iter) -> Result<(), ConfigurationError>
    where
        Iter: IntoIterator<Item = (String, String)>,
    {
        let vars = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|key| (key.to_owned(), value))
            });
        let overrides: RepairerOverrides = envy::from_iter(vars)?;
        overrides.apply(&mut self.repairer);
        Ok(())
    }

    /// Check and apply the configuration.
    ///
    /// A negative excess rate is clamped to 0 rather than rejected.
    pub fn check_and_apply(&mut self) -> Result<(), ConfigurationError> {
        let repairer = &mut self.repairer;
        if repairer.max_repair == 0 {
            return Err(ConfigurationError::NotPositive("max-repair"));
        }
        if repairer.max_concurrent_transfers == 0 {
            return Err(ConfigurationError::NotPositive("max-concurrent-transfers"));
        }
        if repairer.timeout_ms == 0 {
            return Err(ConfigurationError::NotPositive("timeout-ms"));
        }
        if repairer.download_timeout_ms == 0 {
            return Err(ConfigurationError::NotPositive("download-timeout-ms"));
        }
        if repairer.total_timeout_ms == 0 {
            return Err(ConfigurationError::NotPositive("total-timeout-ms"));
        }
        if repairer.repair_override > MAX_PIECES {
            return Err(ConfigurationError::RepairOverrideTooLarge(
                repairer.repair_override,
            ));
        }
        if repairer.max_excess_rate_optimal_threshold < 0.0
            || repairer.max_excess_rate_optimal_threshold.is_nan()
        {
            warn!(
                "max-excess-rate-optimal-threshold {} is negative, using 0",
                repairer.max_excess_rate_optimal_threshold
            );
            repairer.max_excess_rate_optimal_threshold = 0.0;
        }
        Ok(())
    }
}
