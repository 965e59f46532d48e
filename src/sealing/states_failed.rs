//! side-effect handlers for the recoverable failure states

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};

use super::event::Event;
use super::failure::Failure;
use super::sector::SectorInfo;
use super::Inner;
use crate::chain::CheckSealingError;
use crate::commcid;
use crate::logging::{error, info, warn};
use crate::types::Commitment;

impl Inner {
    /// Waits out the remainder of the retry cooldown, measured from the last
    /// journal entry so rapid restarts do not re-attempt immediately.
    fn failed_cooldown(&self, sector: &SectorInfo) -> Result<(), Failure> {
        let last = match sector.log.last() {
            Some(last) => last,
            None => return Ok(()),
        };

        let retry_start =
            UNIX_EPOCH + Duration::from_secs(last.timestamp) + self.cfg.min_retry_time;

        if let Ok(wait) = retry_start.duration_since(SystemTime::now()) {
            info!(
                state = ?sector.state,
                sector = sector.sector_num,
                "waiting {:?} before retrying",
                wait,
            );

            self.wait_or_interrupted(wait)?;
        }

        Ok(())
    }

    /// Probes the chain for an existing pre-commit of this sector and
    /// returns its CommR if one is found.
    fn check_pre_committed(&self, sector: &SectorInfo) -> Result<Option<Commitment>> {
        let (tok, _) = self.chain.chain_head().context("failed to get chain head")?;

        let sealed_cid = match self.chain.get_sealed_cid(&tok, sector.sector_num)? {
            Some(sealed_cid) => sealed_cid,
            None => return Ok(None),
        };

        let comm_r = commcid::cid_to_replica_commitment(&sealed_cid)
            .context("mapping sealed cid to CommR")?;

        warn!(sector = sector.sector_num, "sector found in miner preseal array");

        Ok(Some(comm_r))
    }

    pub(crate) fn handle_seal_failed(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        if matches!(self.check_pre_committed(&sector), Ok(Some(_))) {
            // sector already pre-committed on chain; nothing to redo until
            // re-precommit is possible
            return Ok(None);
        }

        self.failed_cooldown(&sector)?;

        Ok(Some(Event::SectorRetrySeal))
    }

    pub(crate) fn handle_pre_commit_failed(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        let comm_d = sector.comm_d.unwrap_or_default();
        let ticket = sector.ticket.clone().unwrap_or_default();

        match self.chain.check_sealing(&comm_d, &sector.deal_ids(), &ticket) {
            Ok(()) => {}

            Err(CheckSealingError::Api(e)) => {
                error!(
                    sector = sector.sector_num,
                    "handle_pre_commit_failed: api error, not proceeding: {:?}",
                    e,
                );
                return Ok(None);
            }

            Err(e @ CheckSealingError::BadCommD(_)) => {
                return Ok(Some(Event::SectorSealFailed {
                    error: anyhow!(e).context("bad CommD error"),
                }));
            }

            Err(e @ CheckSealingError::ExpiredTicket(_)) => {
                return Ok(Some(Event::SectorSealFailed {
                    error: anyhow!(e).context("ticket expired error"),
                }));
            }
        }

        if let Ok(Some(on_chain_comm_r)) = self.check_pre_committed(&sector) {
            if on_chain_comm_r != Commitment::default() {
                if sector.pre_commit_message.is_none() {
                    warn!(
                        sector = sector.sector_num,
                        "sector is precommitted on chain, but we don't have precommit message",
                    );
                    return Ok(None);
                }

                if sector.comm_r != Some(on_chain_comm_r) {
                    warn!(
                        sector = sector.sector_num,
                        "sector is precommitted on chain, with different CommR",
                    );
                    return Ok(None);
                }

                // CommR matching tells us CommD, the pieces and the ticket
                // all match the on-chain pre-commit
                self.failed_cooldown(&sector)?;

                return Ok(Some(Event::SectorRetryWaitSeed));
            }
        }

        if sector.pre_commit_message.is_some() {
            warn!(
                sector = sector.sector_num,
                "retrying precommit even though the message failed to apply",
            );
        }

        self.failed_cooldown(&sector)?;

        Ok(Some(Event::SectorRetryPreCommit))
    }
}
