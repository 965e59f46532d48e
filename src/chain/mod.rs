//! the chain client contract consumed by the sealing control plane

use anyhow::Result;
use cid::Cid;
use crossbeam_channel::{select, Receiver};
use thiserror::Error;

use crate::types::{
    ActorID, ChainEpoch, Commitment, DealID, PieceInfo, PieceWithDealInfo, SealProof, SealSeed,
    SealTicket, SectorNumber, TipSetToken,
};

pub mod mock;

/// Marker delivered when a reorg set the chain back to before the seed
/// height; the subscriber must keep waiting.
#[derive(Clone, Copy, Debug)]
pub struct SeedInvalidated;

/// Marker delivered once the seed can no longer be invalidated.
#[derive(Clone, Copy, Debug)]
pub struct FinalityReached;

#[derive(Debug, Error)]
pub enum SeedError {
    /// Transient failure; the sector should fall back to `PreCommitFailed`
    /// and retry.
    #[error("seed fetch failed: {0}")]
    Failed(#[source] anyhow::Error),

    /// Unrecoverable failure; the sector is moved to `FailedUnrecoverable`.
    #[error("fatal seed error: {0}")]
    Fatal(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CheckPiecesError {
    #[error("piece check api error: {0}")]
    Api(#[source] anyhow::Error),

    #[error("piece deals invalid: {0}")]
    InvalidDeals(String),

    #[error("piece deals expired: {0}")]
    ExpiredDeals(String),
}

#[derive(Debug, Error)]
pub enum CheckSealingError {
    #[error("sealing check api error: {0}")]
    Api(#[source] anyhow::Error),

    #[error("bad CommD: {0}")]
    BadCommD(String),

    #[error("ticket expired: {0}")]
    ExpiredTicket(String),
}

/// The channel quadruple produced by [`Chain::get_seal_seed`].
pub struct SeedStream {
    pub seed: Receiver<SealSeed>,
    pub invalidated: Receiver<SeedInvalidated>,
    pub finality: Receiver<FinalityReached>,
    pub error: Receiver<SeedError>,
}

/// One observation from a [`SeedStream`], folded into a sum so the WaitSeed
/// handler is a straight-line match.
pub enum SeedOutcome {
    Seed(SealSeed),
    Invalidated,
    Finality,
    Error(SeedError),
    Interrupted,
}

impl SeedStream {
    /// Blocks until any of the four channels fires, or the done channel
    /// signals teardown.
    pub fn next(&self, done: &Receiver<()>) -> SeedOutcome {
        select! {
            recv(self.seed) -> res => match res {
                Ok(seed) => SeedOutcome::Seed(seed),
                Err(_) => SeedOutcome::Interrupted,
            },

            recv(self.invalidated) -> res => match res {
                Ok(_) => SeedOutcome::Invalidated,
                Err(_) => SeedOutcome::Interrupted,
            },

            recv(self.finality) -> res => match res {
                Ok(_) => SeedOutcome::Finality,
                Err(_) => SeedOutcome::Interrupted,
            },

            recv(self.error) -> res => match res {
                Ok(err) => SeedOutcome::Error(err),
                Err(_) => SeedOutcome::Interrupted,
            },

            recv(done) -> _ => SeedOutcome::Interrupted,
        }
    }
}

/// Everything the sealing control plane needs from a chain node.
///
/// Send methods return the identity of the published message; wait methods
/// block until the referenced message is mined into a block.
pub trait Chain: Send + Sync {
    fn chain_head(&self) -> Result<(TipSetToken, ChainEpoch)>;

    /// Produces the worker address associated with the miner, as of the
    /// given tipset.
    fn get_miner_worker_address(&self, miner: ActorID, tok: &TipSetToken) -> Result<ActorID>;

    /// Produces a ticket from the chain to which the miner commits when it
    /// starts encoding a sector.
    fn get_seal_ticket(&self, tok: &TipSetToken) -> Result<SealTicket>;

    fn send_pre_commit_sector(
        &self,
        proof_type: SealProof,
        sector_num: SectorNumber,
        sealed_cid: Cid,
        seal_epoch: ChainEpoch,
        expiration: ChainEpoch,
        pieces: &[PieceWithDealInfo],
    ) -> Result<Cid>;

    fn send_prove_commit_sector(
        &self,
        proof_type: SealProof,
        sector_num: SectorNumber,
        proof: &[u8],
        deal_ids: &[DealID],
    ) -> Result<Cid>;

    /// Publishes self-deals covering the given pieces with one schedule.
    fn send_self_deals(
        &self,
        start_epoch: ChainEpoch,
        end_epoch: ChainEpoch,
        pieces: &[PieceInfo],
    ) -> Result<Cid>;

    fn send_report_faults(&self, sector_nums: &[SectorNumber]) -> Result<Cid>;

    /// Returns the deal IDs assigned to the published self-deals plus the
    /// receipt exit code.
    fn wait_for_self_deals(&self, msg: &Cid) -> Result<(Vec<DealID>, u8)>;

    fn wait_for_prove_commit_sector(&self, msg: &Cid) -> Result<u8>;

    fn wait_for_report_faults(&self, msg: &Cid) -> Result<u8>;

    /// Requests that a seal seed be provided through the returned channels
    /// `interval` epochs after the pre-commit message lands on chain.
    fn get_seal_seed(&self, pre_commit_msg: &Cid, interval: ChainEpoch) -> SeedStream;

    /// Produces the sealed CID (CommR) of the sector as it appears in a
    /// pre-commit message, if the sector has been pre-committed.
    fn get_sealed_cid(&self, tok: &TipSetToken, sector_num: SectorNumber) -> Result<Option<Cid>>;

    /// Ensures the provided pieces' metadata exist in not-yet-expired
    /// on-chain storage deals.
    fn check_pieces(
        &self,
        sector_num: SectorNumber,
        pieces: &[PieceWithDealInfo],
    ) -> Result<(), CheckPiecesError>;

    /// Ensures the given data commitment matches the commitment of the given
    /// pieces associated with the given deals.
    fn check_sealing(
        &self,
        comm_d: &Commitment,
        deal_ids: &[DealID],
        ticket: &SealTicket,
    ) -> Result<(), CheckSealingError>;

    /// Checks the wallet for the key associated with the provided address.
    fn wallet_has(&self, addr: ActorID) -> Result<bool>;
}
