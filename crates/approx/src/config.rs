//! Bootstrap configuration.

use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, BootstrapResult};

/// Number of replicas used when no configuration is given.
pub const DEFAULT_REPLICAS: usize = 100;

pub const fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

/// Configuration of a [`BootstrappedAggregation`](crate::BootstrappedAggregation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Number of independently resampled replicas of the wrapped
    /// aggregation.
    ///
    /// Every accumulator created from the same wrapper uses this count, and
    /// intermediate states can only be merged between accumulators with the
    /// same count.  Must be at least 2, since the confidence interval is
    /// computed from percentiles of the replica results.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
        }
    }
}

impl BootstrapConfig {
    pub fn with_replicas(replicas: usize) -> Self {
        Self { replicas }
    }

    pub fn validate(&self) -> BootstrapResult<()> {
        if self.replicas < 2 {
            return Err(BootstrapError::Configuration(format!(
                "bootstrapping requires at least 2 replicas, got {}",
                self.replicas
            )));
        }
        Ok(())
    }
}
