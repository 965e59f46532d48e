use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chain::Chain;
use crate::logging::warn;
use crate::types::{ChainEpoch, DealSchedule, PieceWithOptionalDealInfo};

/// Picks the (start, end) epochs of the self-deals packed alongside real
/// pieces.
pub trait Policy: Send + Sync {
    fn schedule(&self, pieces: &[PieceWithOptionalDealInfo]) -> Result<DealSchedule>;
}

/// BasicPolicy has two modes:
///
/// If at least one piece carries a deal whose start and end epochs are both
/// in the future, the self-deal schedule spans the minimum start and maximum
/// end epoch over such pieces.
///
/// Otherwise the self-deal starts `proving_delay` epochs after the current
/// head and lasts for the configured duration.
pub struct BasicPolicy {
    api: Arc<dyn Chain>,

    /// An estimate for the number of epochs between the current chain head
    /// and when the sector should have been proven.
    proving_delay: ChainEpoch,

    /// The number of epochs for which the self-dealing miner will be
    /// required to honor the self-deal.
    duration: ChainEpoch,
}

impl BasicPolicy {
    pub fn new(api: Arc<dyn Chain>, proving_delay: ChainEpoch, duration: ChainEpoch) -> Self {
        BasicPolicy {
            api,
            proving_delay,
            duration,
        }
    }
}

impl Policy for BasicPolicy {
    fn schedule(&self, pieces: &[PieceWithOptionalDealInfo]) -> Result<DealSchedule> {
        let (_, epoch) = self.api.chain_head().context("failed to get chain head")?;

        let mut start: Option<ChainEpoch> = None;
        let mut end: Option<ChainEpoch> = None;

        for piece in pieces {
            let deal = match piece.deal_info.as_ref() {
                Some(deal) => deal,
                None => continue,
            };

            if deal.deal_schedule.start_epoch < epoch {
                warn!(
                    deal = deal.deal_id,
                    start = deal.deal_schedule.start_epoch,
                    epoch,
                    "piece schedule starts before current epoch",
                );
                continue;
            }

            if deal.deal_schedule.end_epoch < epoch {
                warn!(
                    deal = deal.deal_id,
                    end = deal.deal_schedule.end_epoch,
                    epoch,
                    "piece schedule ended before current epoch",
                );
                continue;
            }

            if start.map_or(true, |s| s > deal.deal_schedule.start_epoch) {
                start.replace(deal.deal_schedule.start_epoch);
            }

            if end.map_or(true, |e| e < deal.deal_schedule.end_epoch) {
                end.replace(deal.deal_schedule.end_epoch);
            }
        }

        Ok(DealSchedule {
            start_epoch: start.unwrap_or(epoch + self.proving_delay),
            end_epoch: end.unwrap_or(epoch + self.proving_delay + self.duration),
        })
    }
}
