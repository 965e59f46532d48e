//! the proof backend contract consumed by the sealing control plane

use std::io::Read;

use anyhow::Result;
use cid::Cid;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::types::{
    PieceInfo, SealProof, SealSeed, SealTicket, SectorNumber, UnpaddedPieceSize,
};

pub mod mock;

/// Returned by the backend when a sector has no long-term storage path to be
/// finalized into. The finalize handler warns and carries on.
#[derive(Debug, Clone, Copy)]
pub struct NoSuitablePath;

impl std::fmt::Display for NoSuitablePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("no suitable path")
    }
}

impl std::error::Error for NoSuitablePath {}

/// Represents one unit of the backend's CPU budget. Dropping it releases the
/// unit.
pub struct LimitToken(Receiver<()>);

impl Drop for LimitToken {
    fn drop(&mut self) {
        let _ = self.0.recv();
    }
}

/// Bounded-channel rate limiter handed out by the backend around CPU-heavy
/// commitment work.
pub struct RateLimiter {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl RateLimiter {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = bounded(size);
        RateLimiter { tx, rx }
    }

    /// Blocks until a unit is available. Both channel ends live in this
    /// struct, so the send only returns once a slot frees up.
    pub fn acquire(&self) -> LimitToken {
        let _ = self.tx.send(());
        LimitToken(self.rx.clone())
    }
}

/// Everything the sealing control plane needs from the proof backend. The
/// inner cryptographic seal is a black box behind this trait.
pub trait SectorBuilder: Send + Sync {
    /// Allocates a fresh sector number. Monotonic, never reused.
    fn acquire_sector_number(&self) -> Result<SectorNumber>;

    /// Writes one piece into the staged sector, aligned after the existing
    /// pieces.
    fn add_piece(
        &self,
        size: UnpaddedPieceSize,
        sector_num: SectorNumber,
        reader: &mut dyn Read,
        existing_piece_sizes: &[UnpaddedPieceSize],
    ) -> Result<PieceInfo>;

    /// Replicates the staged sector; returns `(sealed_cid, unsealed_cid)`.
    fn seal_pre_commit(
        &self,
        sector_num: SectorNumber,
        ticket: &SealTicket,
        pieces: &[PieceInfo],
    ) -> Result<(Cid, Cid)>;

    /// Computes the interactive seal proof.
    #[allow(clippy::too_many_arguments)]
    fn seal_commit(
        &self,
        sector_num: SectorNumber,
        ticket: &SealTicket,
        seed: &SealSeed,
        pieces: &[PieceInfo],
        sealed_cid: &Cid,
        unsealed_cid: &Cid,
    ) -> Result<Vec<u8>>;

    /// Moves the sealed sector into long-term storage. May fail with
    /// [`NoSuitablePath`] (detected by downcast).
    fn finalize_sector(&self, sector_num: SectorNumber) -> Result<()>;

    /// Drops the staged (unsealed) copy of the sector.
    fn drop_staged(&self, sector_num: SectorNumber) -> Result<()>;

    /// Computes the piece commitment CID of a byte stream.
    fn generate_piece_cid(&self, size: UnpaddedPieceSize, reader: &mut dyn Read) -> Result<Cid>;

    /// Combines piece commitments into the unsealed sector CID.
    fn generate_unsealed_cid(&self, pieces: &[PieceInfo]) -> Result<Cid>;

    fn sector_size(&self) -> u64;

    fn seal_proof_type(&self) -> SealProof;

    /// Acquires a unit of the backend's commitment-computation budget.
    fn rate_limit(&self) -> LimitToken;
}
