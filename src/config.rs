// src/config.rs

//! Tuning knobs for observe drivers: defaults and validation.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Tuning configuration shared by every `ObserveDriver` created from it.
///
/// All fields have conservative defaults; a zero value disables the
/// corresponding behavior where noted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObserveConfig {
    /// Delay before retrying a failed poll query, in milliseconds.
    /// The initial query is never retried; see the polling module.
    #[serde(default = "default_poll_retry_delay_ms")]
    pub poll_retry_delay_ms: u64,

    /// If non-zero, arms a watchdog on every entry into the FETCHING phase.
    /// When it fires and the driver is still fetching the same batch
    /// generation, the driver falls back to a full requery. `0` disables
    /// the watchdog.
    #[serde(default)]
    pub fetching_timeout_ms: u64,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            poll_retry_delay_ms: default_poll_retry_delay_ms(),
            fetching_timeout_ms: 0,
        }
    }
}

impl ObserveConfig {
    /// Checks the configuration for values that would break the driver's
    /// retry discipline.
    pub fn validate(&self) -> Result<()> {
        if self.poll_retry_delay_ms == 0 {
            return Err(anyhow!(
                "poll_retry_delay_ms must be positive; a zero delay would busy-loop on a failing query"
            ));
        }
        Ok(())
    }
}

fn default_poll_retry_delay_ms() -> u64 {
    100
}
