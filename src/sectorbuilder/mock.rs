//! deterministic in-memory proof backend for tests and dry runs

use std::collections::HashMap;
use std::io::Read;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    RwLock,
};

use anyhow::{anyhow, Context, Error, Result};
use cid::Cid;
use sha2::{Digest, Sha256};

use super::{LimitToken, NoSuitablePath, RateLimiter, SectorBuilder};
use crate::commcid;
use crate::types::{
    Commitment, PieceInfo, SealProof, SealSeed, SealTicket, SectorNumber, UnpaddedPieceSize,
};

/// Truncates a sha256 digest to the 254-bit form used for commitment
/// multihashes.
fn trunc254(digest: [u8; 32]) -> Commitment {
    let mut out = digest;
    out[31] &= 0b0011_1111;
    out
}

/// Fake backend: commitments are sha256 digests over the actual bytes, so
/// identical inputs yield identical CIDs without touching a prover.
pub struct MockSectorBuilder {
    sector_size: u64,
    proof_type: SealProof,
    next_sector_num: AtomicU64,
    limiter: RateLimiter,
    staged: RwLock<HashMap<SectorNumber, Vec<UnpaddedPieceSize>>>,

    pub fail_seal_pre_commit: AtomicBool,
    pub fail_finalize_no_path: AtomicBool,
}

impl MockSectorBuilder {
    pub fn new(sector_size: u64, proof_type: SealProof) -> Self {
        MockSectorBuilder {
            sector_size,
            proof_type,
            next_sector_num: AtomicU64::new(42),
            limiter: RateLimiter::new(rayon::current_num_threads().max(1)),
            staged: RwLock::new(Default::default()),
            fail_seal_pre_commit: Default::default(),
            fail_finalize_no_path: Default::default(),
        }
    }

    fn digest_reader(size: UnpaddedPieceSize, reader: &mut dyn Read) -> Result<Commitment> {
        let mut hasher = Sha256::new();
        let mut remaining = size.0;
        let mut buf = [0u8; 8 << 10];

        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let got = reader.read(&mut buf[..want]).context("read piece bytes")?;
            if got == 0 {
                return Err(anyhow!("piece reader ended {} bytes short", remaining));
            }

            hasher.update(&buf[..got]);
            remaining -= got as u64;
        }

        Ok(trunc254(hasher.finalize().into()))
    }
}

impl SectorBuilder for MockSectorBuilder {
    fn acquire_sector_number(&self) -> Result<SectorNumber> {
        Ok(self.next_sector_num.fetch_add(1, Ordering::SeqCst))
    }

    fn add_piece(
        &self,
        size: UnpaddedPieceSize,
        sector_num: SectorNumber,
        reader: &mut dyn Read,
        existing_piece_sizes: &[UnpaddedPieceSize],
    ) -> Result<PieceInfo> {
        size.validate()?;

        let mut staged = self.staged.write().map_err(|e| anyhow!("lock poisoned: {}", e))?;
        let pieces = staged.entry(sector_num).or_default();

        let occupied: u64 = pieces.iter().map(|s| s.padded().0).sum();
        if occupied + size.padded().0 > self.sector_size {
            return Err(anyhow!(
                "piece of padded size {} does not fit in sector {} ({} of {} occupied)",
                size.padded(),
                sector_num,
                occupied,
                self.sector_size,
            ));
        }

        if pieces.len() != existing_piece_sizes.len() {
            return Err(anyhow!(
                "alignment mismatch for sector {}: {} staged pieces, {} reported",
                sector_num,
                pieces.len(),
                existing_piece_sizes.len(),
            ));
        }

        let comm_p = Self::digest_reader(size, reader)?;
        pieces.push(size);

        Ok(PieceInfo {
            size: size.padded(),
            piece_cid: commcid::piece_commitment_to_cid(&comm_p)?,
        })
    }

    fn seal_pre_commit(
        &self,
        _sector_num: SectorNumber,
        ticket: &SealTicket,
        pieces: &[PieceInfo],
    ) -> Result<(Cid, Cid)> {
        if self.fail_seal_pre_commit.load(Ordering::SeqCst) {
            return Err(anyhow!("replication failed"));
        }

        let unsealed = self.generate_unsealed_cid(pieces)?;
        let comm_d = commcid::cid_to_data_commitment(&unsealed)?;

        let mut hasher = Sha256::new();
        hasher.update(b"replica");
        hasher.update(comm_d);
        hasher.update(&ticket.ticket);
        let comm_r = trunc254(hasher.finalize().into());

        Ok((commcid::replica_commitment_to_cid(&comm_r)?, unsealed))
    }

    fn seal_commit(
        &self,
        _sector_num: SectorNumber,
        ticket: &SealTicket,
        seed: &SealSeed,
        _pieces: &[PieceInfo],
        sealed_cid: &Cid,
        _unsealed_cid: &Cid,
    ) -> Result<Vec<u8>> {
        let _token = self.rate_limit();

        let mut hasher = Sha256::new();
        hasher.update(&ticket.ticket);
        hasher.update(&seed.seed);
        hasher.update(sealed_cid.to_bytes());

        Ok(hasher.finalize().to_vec())
    }

    fn finalize_sector(&self, _sector_num: SectorNumber) -> Result<()> {
        if self.fail_finalize_no_path.load(Ordering::SeqCst) {
            return Err(Error::new(NoSuitablePath));
        }

        Ok(())
    }

    fn drop_staged(&self, sector_num: SectorNumber) -> Result<()> {
        self.staged
            .write()
            .map_err(|e| anyhow!("lock poisoned: {}", e))?
            .remove(&sector_num);
        Ok(())
    }

    fn generate_piece_cid(&self, size: UnpaddedPieceSize, reader: &mut dyn Read) -> Result<Cid> {
        let comm_p = Self::digest_reader(size, reader)?;
        commcid::piece_commitment_to_cid(&comm_p)
    }

    fn generate_unsealed_cid(&self, pieces: &[PieceInfo]) -> Result<Cid> {
        let mut hasher = Sha256::new();
        for piece in pieces {
            hasher.update(piece.size.0.to_be_bytes());
            hasher.update(piece.piece_cid.to_bytes());
        }

        commcid::data_commitment_to_cid(&trunc254(hasher.finalize().into()))
    }

    fn sector_size(&self) -> u64 {
        self.sector_size
    }

    fn seal_proof_type(&self) -> SealProof {
        self.proof_type
    }

    fn rate_limit(&self) -> LimitToken {
        self.limiter.acquire()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::SIZE_1K;

    #[test]
    fn test_add_piece_is_deterministic() {
        let sb = MockSectorBuilder::new(SIZE_1K, SealProof::StackedDrg2KiBV1);

        let data = vec![9u8; 1016];
        let a = sb
            .add_piece(UnpaddedPieceSize(1016), 1, &mut &data[..], &[])
            .unwrap();
        let b = sb
            .add_piece(UnpaddedPieceSize(1016), 2, &mut &data[..], &[])
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.size.0, 1024);
    }

    #[test]
    fn test_add_piece_rejects_overflow() {
        let sb = MockSectorBuilder::new(SIZE_1K, SealProof::StackedDrg2KiBV1);

        let data = vec![0u8; 1016];
        sb.add_piece(UnpaddedPieceSize(508), 1, &mut &data[..508], &[])
            .unwrap();
        sb.add_piece(UnpaddedPieceSize(508), 1, &mut &data[..508], &[UnpaddedPieceSize(508)])
            .unwrap();

        let err = sb
            .add_piece(
                UnpaddedPieceSize(127),
                1,
                &mut &data[..127],
                &[UnpaddedPieceSize(508), UnpaddedPieceSize(508)],
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }

    #[test]
    fn test_finalize_no_suitable_path_is_downcastable() {
        let sb = MockSectorBuilder::new(SIZE_1K, SealProof::StackedDrg2KiBV1);
        sb.fail_finalize_no_path.store(true, Ordering::SeqCst);

        let err = sb.finalize_sector(1).unwrap_err();
        assert!(err.is::<NoSuitablePath>());
    }
}
