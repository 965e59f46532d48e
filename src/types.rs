//! shared data types

use anyhow::{anyhow, Error};
use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Identifier of a sector within one miner. Allocated by the proof backend,
/// never reused.
pub type SectorNumber = u64;

/// Height of the chain at some tipset.
pub type ChainEpoch = i64;

/// On-chain identity of a published storage deal.
pub type DealID = u64;

/// ID-address of an on-chain actor (miner, worker, ...).
pub type ActorID = u64;

/// A 32-byte sealing commitment (CommP / CommD / CommR).
pub type Commitment = [u8; 32];

/// Implementation-nonspecific identity for a tipset, used to make chain
/// queries reorg-stable.
pub type TipSetToken = Vec<u8>;

pub const SIZE_1K: u64 = 1 << 10;
pub const SIZE_2K: u64 = 2 << 10;
pub const SIZE_8M: u64 = 8 << 20;
pub const SIZE_512M: u64 = 512 << 20;
pub const SIZE_32G: u64 = 32 << 30;
pub const SIZE_64G: u64 = 64 << 30;

/// seal proof types with repr i64
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize_repr, Serialize_repr)]
#[repr(i64)]
pub enum SealProof {
    StackedDrg2KiBV1,
    StackedDrg8MiBV1,
    StackedDrg512MiBV1,
    StackedDrg32GiBV1,
    StackedDrg64GiBV1,
}

impl SealProof {
    /// returns sector size for the seal proof type
    pub fn sector_size(&self) -> u64 {
        match self {
            SealProof::StackedDrg2KiBV1 => SIZE_2K,
            SealProof::StackedDrg8MiBV1 => SIZE_8M,
            SealProof::StackedDrg512MiBV1 => SIZE_512M,
            SealProof::StackedDrg32GiBV1 => SIZE_32G,
            SealProof::StackedDrg64GiBV1 => SIZE_64G,
        }
    }
}

/// Size of a piece in sector (padded) bytes. Must be a power of two >= 128.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PaddedPieceSize(pub u64);

impl PaddedPieceSize {
    /// Converts to the user-bytes view (127 of every 128 bytes).
    pub fn unpadded(self) -> UnpaddedPieceSize {
        UnpaddedPieceSize(self.0 - self.0 / 128)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.0 < 128 {
            return Err(anyhow!("minimum piece size is 128 bytes"));
        }

        if self.0.count_ones() != 1 {
            return Err(anyhow!("padded piece size must be a power of 2"));
        }

        Ok(())
    }
}

impl std::fmt::Display for PaddedPieceSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size of a piece in user (unpadded) bytes. Must be 127 * 2^n.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UnpaddedPieceSize(pub u64);

impl UnpaddedPieceSize {
    /// The minimum piece size.
    pub const MIN: UnpaddedPieceSize = UnpaddedPieceSize(127);

    /// Converts to the in-sector byte view.
    pub fn padded(self) -> PaddedPieceSize {
        PaddedPieceSize(self.0 + self.0 / 127)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.0 < 127 {
            return Err(anyhow!("minimum piece size is 127 bytes"));
        }

        // is 127 * 2^n
        if self.0 >> self.0.trailing_zeros() != 127 {
            return Err(anyhow!("unpadded piece size must be a power of 2 multiple of 127"));
        }

        Ok(())
    }
}

impl std::fmt::Display for UnpaddedPieceSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain randomness the miner committed to when it started encoding a sector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealTicket {
    pub block_height: ChainEpoch,
    pub ticket: Vec<u8>,
}

/// Interactive randomness drawn from chain after the pre-commit message
/// gained enough finality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealSeed {
    pub block_height: ChainEpoch,
    pub seed: Vec<u8>,
}

/// Piece metadata as known to the proof backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    pub size: PaddedPieceSize,
    pub piece_cid: Cid,
}

/// The time interval of a storage deal. The deal must appear in a sealed
/// (proven) sector no later than `start_epoch`, otherwise it is invalid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSchedule {
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

/// Deal identity and its schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub deal_id: DealID,
    pub deal_schedule: DealSchedule,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceWithDealInfo {
    pub piece: PieceInfo,
    pub deal_info: DealInfo,
}

/// Piece paired with an optional deal; `None` for pieces which do not yet
/// appear in self-deals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PieceWithOptionalDealInfo {
    pub piece: PieceInfo,
    pub deal_info: Option<DealInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub exit_code: u8,
    pub ret: Vec<u8>,
    pub gas_used: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgWait {
    pub receipt: MessageReceipt,
    pub height: ChainEpoch,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{PaddedPieceSize, UnpaddedPieceSize};

    #[test]
    fn test_padded_unpadded_round_trip() {
        for exp in 7..20u64 {
            let padded = PaddedPieceSize(1 << exp);
            padded.validate().expect("valid padded size");

            let unpadded = padded.unpadded();
            unpadded.validate().expect("valid unpadded size");

            assert_eq!(padded, unpadded.padded());
        }
    }

    #[test]
    fn test_one_kib_sector_user_bytes() {
        assert_eq!(UnpaddedPieceSize(1016), PaddedPieceSize(1024).unpadded());
        assert_eq!(PaddedPieceSize(1024), UnpaddedPieceSize(1016).padded());
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(PaddedPieceSize(64).validate().is_err());
        assert!(PaddedPieceSize(1000).validate().is_err());
        assert!(UnpaddedPieceSize(126).validate().is_err());
        assert!(UnpaddedPieceSize(1024).validate().is_err());
        assert!(UnpaddedPieceSize(254).validate().is_ok());
    }
}
