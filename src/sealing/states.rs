//! side-effect handlers for the happy-path states

use anyhow::{anyhow, Context};

use super::event::Event;
use super::failure::{Failure, IntoFailure, MapErrToFailure};
use super::sector::SectorInfo;
use super::util::{cloned_required, field_required, fillers_from_rem, user_bytes_for_sector_size};
use super::{Inner, INTERACTIVE_POREP_DELAY};
use crate::chain::{CheckPiecesError, CheckSealingError, SeedError, SeedOutcome};
use crate::commcid;
use crate::logging::{error, info, warn};
use crate::sectorbuilder::NoSuitablePath;
use crate::types::UnpaddedPieceSize;

impl Inner {
    pub(crate) fn handle_packing(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        info!(sector = sector.sector_num, "performing filling up rest of the sector");

        let mut allocated = 0u64;
        for padded in sector.existing_pieces() {
            allocated += padded.unpadded().0;
        }

        let capacity = user_bytes_for_sector_size(self.sb.sector_size());

        if allocated > capacity.0 {
            return Err(anyhow!("too much data in sector: {} > {}", allocated, capacity).perm());
        }

        let filler_sizes = fillers_from_rem(UnpaddedPieceSize(capacity.0 - allocated));

        if !filler_sizes.is_empty() {
            warn!(
                sector = sector.sector_num,
                count = filler_sizes.len(),
                "creating filler pieces",
            );
        }

        Ok(Some(
            match self.pledge_sector(sector.sector_num, &sector.pieces, &filler_sizes) {
                Ok(pieces) => Event::SectorPacked { pieces },
                Err(e) => Event::SectorPackingFailed {
                    error: e.context(format!("filling up the sector ({:?})", filler_sizes)),
                },
            },
        ))
    }

    pub(crate) fn handle_unsealed(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        // sanity check state
        match self.chain.check_pieces(sector.sector_num, &sector.pieces) {
            Ok(()) => {}

            Err(CheckPiecesError::Api(e)) => {
                error!(sector = sector.sector_num, "handle_unsealed: api error, not proceeding: {:?}", e);
                return Ok(None);
            }

            Err(e @ CheckPiecesError::InvalidDeals(_)) => {
                return Ok(Some(Event::SectorPackingFailed {
                    error: anyhow!(e).context("invalid deals in sector"),
                }));
            }

            // probably not much we can do here, maybe re-pack the sector?
            Err(e @ CheckPiecesError::ExpiredDeals(_)) => {
                return Ok(Some(Event::SectorPackingFailed {
                    error: anyhow!(e).context("expired deals in sector"),
                }));
            }
        }

        let (tok, _) = self
            .chain
            .chain_head()
            .context("failed to get chain head")
            .temp()?;

        info!(sector = sector.sector_num, "performing sector replication");

        let ticket = match self.chain.get_seal_ticket(&tok) {
            Ok(ticket) => ticket,
            Err(e) => {
                return Ok(Some(Event::SectorSealFailed {
                    error: e.context("getting ticket failed"),
                }));
            }
        };

        let (sealed_cid, unsealed_cid) = match self.sb.seal_pre_commit(
            sector.sector_num,
            &ticket,
            &sector.piece_infos(),
        ) {
            Ok(out) => out,
            Err(e) => {
                return Ok(Some(Event::SectorSealFailed {
                    error: e.context("seal pre commit failed"),
                }));
            }
        };

        let comm_r = match commcid::cid_to_replica_commitment(&sealed_cid) {
            Ok(comm) => comm,
            Err(e) => {
                return Ok(Some(Event::SectorSealFailed {
                    error: e.context("mapping sealed cid to CommR"),
                }));
            }
        };

        let comm_d = match commcid::cid_to_data_commitment(&unsealed_cid) {
            Ok(comm) => comm,
            Err(e) => {
                return Ok(Some(Event::SectorSealFailed {
                    error: e.context("mapping unsealed cid to CommD"),
                }));
            }
        };

        Ok(Some(Event::SectorSealed {
            comm_d,
            comm_r,
            ticket,
        }))
    }

    pub(crate) fn handle_pre_committing(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        field_required!(comm_d, sector.comm_d.as_ref());
        cloned_required!(ticket, sector.ticket);
        field_required!(comm_r, sector.comm_r.as_ref());

        match self.chain.check_sealing(comm_d, &sector.deal_ids(), &ticket) {
            Ok(()) => {}

            Err(CheckSealingError::Api(e)) => {
                error!(sector = sector.sector_num, "handle_pre_committing: api error, not proceeding: {:?}", e);
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

        let expiration = match self.pre_commit_policy.expiration(&sector.pieces) {
            Ok(expiration) => expiration,
            Err(e) => {
                return Ok(Some(Event::SectorPreCommitFailed {
                    error: e.context("computing pre-commit expiration"),
                }));
            }
        };

        let sealed_cid = commcid::replica_commitment_to_cid(comm_r)
            .context("mapping CommR to sealed cid")
            .abort()?;

        Ok(Some(
            match self.chain.send_pre_commit_sector(
                self.sb.seal_proof_type(),
                sector.sector_num,
                sealed_cid,
                ticket.block_height,
                expiration,
                &sector.pieces,
            ) {
                Ok(message) => Event::SectorPreCommitted { message },
                Err(e) => Event::SectorPreCommitFailed {
                    error: e.context("failed to send pre-commit message"),
                },
            },
        ))
    }

    pub(crate) fn handle_wait_seed(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        field_required!(pre_commit_msg, sector.pre_commit_message.as_ref());

        let stream = self
            .chain
            .get_seal_seed(pre_commit_msg, INTERACTIVE_POREP_DELAY);

        match stream.next(&self.done) {
            SeedOutcome::Seed(seed) => Ok(Some(Event::SectorSeedReady { seed })),

            SeedOutcome::Invalidated => {
                warn!(sector = sector.sector_num, "revert in interactive commit sector step");
                Ok(None)
            }

            SeedOutcome::Finality => Ok(None),

            SeedOutcome::Error(SeedError::Failed(e)) => {
                error!(sector = sector.sector_num, "error waiting for precommit: {:?}", e);
                Ok(Some(Event::SectorPreCommitFailed { error: e }))
            }

            SeedOutcome::Error(SeedError::Fatal(e)) => {
                error!(sector = sector.sector_num, "fatal error waiting for precommit: {:?}", e);
                Ok(Some(Event::SectorFatalError { error: e }))
            }

            SeedOutcome::Interrupted => Ok(None),
        }
    }

    pub(crate) fn handle_committing(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        info!(sector = sector.sector_num, "scheduling seal proof computation");

        cloned_required!(ticket, sector.ticket);
        cloned_required!(seed, sector.seed);
        field_required!(comm_d, sector.comm_d.as_ref());
        field_required!(comm_r, sector.comm_r.as_ref());

        let sealed_cid = commcid::replica_commitment_to_cid(comm_r)
            .context("mapping CommR to sealed cid")
            .abort()?;
        let unsealed_cid = commcid::data_commitment_to_cid(comm_d)
            .context("mapping CommD to unsealed cid")
            .abort()?;

        let proof = match self.sb.seal_commit(
            sector.sector_num,
            &ticket,
            &seed,
            &sector.piece_infos(),
            &sealed_cid,
            &unsealed_cid,
        ) {
            Ok(proof) => proof,
            Err(e) => {
                return Ok(Some(Event::SectorComputeProofFailed {
                    error: e.context("computing seal proof failed"),
                }));
            }
        };

        Ok(Some(
            match self.chain.send_prove_commit_sector(
                self.sb.seal_proof_type(),
                sector.sector_num,
                &proof,
                &sector.deal_ids(),
            ) {
                Ok(message) => Event::SectorCommitted { proof, message },
                Err(e) => Event::SectorCommitFailed {
                    error: e.context("error sending prove commit sector"),
                },
            },
        ))
    }

    pub(crate) fn handle_commit_wait(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        let commit_msg = match sector.commit_message.as_ref() {
            Some(msg) => msg,
            None => {
                error!(sector = sector.sector_num, "sector entered commit wait state without a message cid");
                return Ok(Some(Event::SectorCommitFailed {
                    error: anyhow!("entered commit wait with no commit cid"),
                }));
            }
        };

        let exit_code = match self.chain.wait_for_prove_commit_sector(commit_msg) {
            Ok(exit_code) => exit_code,
            Err(e) => {
                return Ok(Some(Event::SectorCommitFailed {
                    error: e.context("failed to wait for porep inclusion"),
                }));
            }
        };

        if exit_code != 0 {
            return Ok(Some(Event::SectorCommitFailed {
                error: anyhow!(
                    "submitting sector proof failed (exit={}, msg={})",
                    exit_code,
                    commit_msg,
                ),
            }));
        }

        Ok(Some(Event::SectorProving))
    }

    pub(crate) fn handle_finalize_sector(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        if let Err(e) = self.sb.finalize_sector(sector.sector_num) {
            if !e.is::<NoSuitablePath>() {
                return Ok(Some(Event::SectorFinalizeFailed {
                    error: e.context("finalize sector"),
                }));
            }

            warn!(sector = sector.sector_num, "finalize sector: {:?}", e);
        }

        if let Err(e) = self.sb.drop_staged(sector.sector_num) {
            return Ok(Some(Event::SectorFinalizeFailed {
                error: e.context("drop staged"),
            }));
        }

        Ok(Some(Event::SectorFinalized))
    }

    pub(crate) fn handle_faulty(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        let message = self
            .chain
            .send_report_faults(&[sector.sector_num])
            .context("failed to push declare faults message to network")
            .temp()?;

        Ok(Some(Event::SectorFaultReported { message }))
    }

    pub(crate) fn handle_fault_reported(&self, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        field_required!(report_msg, sector.fault_report_msg.as_ref());

        let exit_code = self
            .chain
            .wait_for_report_faults(report_msg)
            .context("failed to wait for fault declaration")
            .temp()?;

        if exit_code != 0 {
            return Err(anyhow!("submitting fault declaration failed (exit {})", exit_code).perm());
        }

        Ok(Some(Event::SectorFaultedFinal))
    }
}
