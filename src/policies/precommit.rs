use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chain::Chain;
use crate::logging::warn;
use crate::types::{ChainEpoch, PieceWithDealInfo};

/// Picks the expiration epoch carried by a pre-commit message.
pub trait Policy: Send + Sync {
    fn expiration(&self, pieces: &[PieceWithDealInfo]) -> Result<ChainEpoch>;
}

/// BasicPolicy has two modes:
///
/// If any piece carries a deal schedule that has not yet ended, the
/// pre-commit expiration epoch is the maximum deal end epoch over such
/// pieces.
///
/// Otherwise the expiration epoch is the current chain head epoch plus the
/// configured default duration.
pub struct BasicPolicy {
    api: Arc<dyn Chain>,
    duration: ChainEpoch,
}

impl BasicPolicy {
    pub fn new(api: Arc<dyn Chain>, duration: ChainEpoch) -> Self {
        BasicPolicy { api, duration }
    }
}

impl Policy for BasicPolicy {
    fn expiration(&self, pieces: &[PieceWithDealInfo]) -> Result<ChainEpoch> {
        let (_, epoch) = self.api.chain_head().context("failed to get chain head")?;

        let mut end: Option<ChainEpoch> = None;

        for piece in pieces {
            let schedule = &piece.deal_info.deal_schedule;

            if schedule.end_epoch < epoch {
                warn!(
                    deal = piece.deal_info.deal_id,
                    end = schedule.end_epoch,
                    epoch,
                    "piece schedule ended before current epoch",
                );
                continue;
            }

            if end.map_or(true, |e| e < schedule.end_epoch) {
                end.replace(schedule.end_epoch);
            }
        }

        Ok(end.unwrap_or(epoch + self.duration))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{BasicPolicy, Policy};
    use crate::chain::mock::MockChain;
    use crate::types::{DealInfo, DealSchedule, PaddedPieceSize, PieceInfo, PieceWithDealInfo};

    fn piece(deal_id: u64, start: i64, end: i64) -> PieceWithDealInfo {
        PieceWithDealInfo {
            piece: PieceInfo {
                size: PaddedPieceSize(1024),
                piece_cid: crate::chain::mock::make_cid(&deal_id.to_be_bytes()),
            },
            deal_info: DealInfo {
                deal_id,
                deal_schedule: DealSchedule {
                    start_epoch: start,
                    end_epoch: end,
                },
            },
        }
    }

    fn chain_at(epoch: i64) -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new(66));
        chain.set_epoch(epoch);
        chain
    }

    #[test]
    fn test_empty_sector_uses_default_duration() {
        let policy = BasicPolicy::new(chain_at(55), 10);
        assert_eq!(policy.expiration(&[]).unwrap(), 65);
    }

    #[test]
    fn test_most_constrictive_schedule() {
        let policy = BasicPolicy::new(chain_at(55), 100);

        let pieces = vec![piece(42, 70, 75), piece(43, 80, 100)];
        assert_eq!(policy.expiration(&pieces).unwrap(), 100);
    }

    #[test]
    fn test_ignores_expired_schedule() {
        let policy = BasicPolicy::new(chain_at(55), 100);

        let pieces = vec![piece(44, 1, 10)];
        assert_eq!(policy.expiration(&pieces).unwrap(), 155);
    }
}
