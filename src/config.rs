//! configuration for the sealing control plane

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ChainEpoch;

/// The quantity of epochs into the future (from the chain head epoch) at
/// which point we expect the pieces in a newly created self-deal to have
/// been sealed into a proven sector. Roughly one day assuming 30s epochs.
const DEFAULT_SELF_DEAL_PROVING_DELAY: ChainEpoch = 2 * 60 * 24;

/// The quantity of epochs for which a self-deal is valid.
const DEFAULT_SELF_DEAL_DURATION: ChainEpoch = 2 * 60 * 24;

/// Fallback pre-commit expiration for sectors whose pieces carry no live
/// deal schedule.
const DEFAULT_PRE_COMMIT_DURATION: ChainEpoch = 2 * 60 * 24;

const DEFAULT_MIN_RETRY_TIME: Duration = Duration::from_secs(60);

/// configurations for sealing sectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealingConfig {
    /// self-deal start offset from the chain head
    pub self_deal_proving_delay: ChainEpoch,

    /// epochs for which published self-deals stay valid
    pub self_deal_duration: ChainEpoch,

    /// fallback pre-commit expiration offset from the chain head
    pub pre_commit_duration: ChainEpoch,

    /// cooldown between a sector failure and its retry
    #[serde(with = "humantime_serde")]
    pub min_retry_time: Duration,
}

impl Default for SealingConfig {
    fn default() -> Self {
        SealingConfig {
            self_deal_proving_delay: DEFAULT_SELF_DEAL_PROVING_DELAY,
            self_deal_duration: DEFAULT_SELF_DEAL_DURATION,
            pre_commit_duration: DEFAULT_PRE_COMMIT_DURATION,
            min_retry_time: DEFAULT_MIN_RETRY_TIME,
        }
    }
}
