//! mapping between 32-byte sealing commitments and their CID form

use anyhow::{anyhow, Result};
use cid::{multihash::Multihash, Cid};

use crate::types::Commitment;

/// Filecoin piece or sector data commitment merkle node/root (CommP & CommD)
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;

/// Filecoin sector data commitment merkle node/root - sealed and replicated
/// (CommR)
pub const FIL_COMMITMENT_SEALED: u64 = 0xf102;

/// SHA2-256 with the two most significant bits from the last byte zeroed (as
/// via a mask with 0b00111111) - used for proving trees as in Filecoin.
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// Poseidon using BLS12-381 and arity of 2 with Filecoin parameters
pub const POSEIDON_BLS12_381_A1_FC1: u64 = 0xb401;

/// Converts a commitment to a CID.
pub fn commitment_to_cid(multicodec: u64, multihash: u64, commitment: &Commitment) -> Result<Cid> {
    validate_cid_segments(multicodec, multihash, commitment)?;

    let hash = Multihash::wrap(multihash, commitment)
        .map_err(|_| anyhow!("failed to wrap commitment cid"))?;

    Ok(Cid::new_v1(multicodec, hash))
}

/// Destructures a CID into a commitment, validating codec and hash.
pub fn cid_to_commitment(c: &Cid) -> Result<(u64, u64, Commitment)> {
    validate_cid_segments(c.codec(), c.hash().code(), c.hash().digest())?;

    let mut comm = Commitment::default();
    comm.copy_from_slice(c.hash().digest());

    Ok((c.codec(), c.hash().code(), comm))
}

/// Converts a piece commitment (CommP) to a CID.
pub fn piece_commitment_to_cid(comm_p: &Commitment) -> Result<Cid> {
    commitment_to_cid(FIL_COMMITMENT_UNSEALED, SHA2_256_TRUNC254_PADDED, comm_p)
}

/// Converts an unsealed data commitment (CommD) to a CID.
pub fn data_commitment_to_cid(comm_d: &Commitment) -> Result<Cid> {
    commitment_to_cid(FIL_COMMITMENT_UNSEALED, SHA2_256_TRUNC254_PADDED, comm_d)
}

/// Converts a replica commitment (CommR) to a CID.
pub fn replica_commitment_to_cid(comm_r: &Commitment) -> Result<Cid> {
    commitment_to_cid(FIL_COMMITMENT_SEALED, POSEIDON_BLS12_381_A1_FC1, comm_r)
}

/// Extracts the piece commitment from a CID.
pub fn cid_to_piece_commitment(c: &Cid) -> Result<Commitment> {
    let (codec, hash, comm) = cid_to_commitment(c)?;

    if codec != FIL_COMMITMENT_UNSEALED || hash != SHA2_256_TRUNC254_PADDED {
        return Err(anyhow!("not a piece commitment: {}", c));
    }

    Ok(comm)
}

/// Extracts the unsealed data commitment from a CID.
pub fn cid_to_data_commitment(c: &Cid) -> Result<Commitment> {
    let (codec, hash, comm) = cid_to_commitment(c)?;

    if codec != FIL_COMMITMENT_UNSEALED || hash != SHA2_256_TRUNC254_PADDED {
        return Err(anyhow!("not a data commitment: {}", c));
    }

    Ok(comm)
}

/// Extracts the replica commitment from a CID.
pub fn cid_to_replica_commitment(c: &Cid) -> Result<Commitment> {
    let (codec, hash, comm) = cid_to_commitment(c)?;

    if codec != FIL_COMMITMENT_SEALED || hash != POSEIDON_BLS12_381_A1_FC1 {
        return Err(anyhow!("not a replica commitment: {}", c));
    }

    Ok(comm)
}

fn validate_cid_segments(multicodec: u64, multihash: u64, commitment: &[u8]) -> Result<()> {
    match multicodec {
        FIL_COMMITMENT_UNSEALED => {
            if multihash != SHA2_256_TRUNC254_PADDED {
                return Err(anyhow!("incorrect hash function for unsealed commitment"));
            }
        }

        FIL_COMMITMENT_SEALED => {
            if multihash != POSEIDON_BLS12_381_A1_FC1 {
                return Err(anyhow!("incorrect hash function for sealed commitment"));
            }
        }

        _ => return Err(anyhow!("unexpected commitment codec {:#x}", multicodec)),
    }

    if commitment.len() != 32 {
        return Err(anyhow!("commitments must be 32 bytes long"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_comm_round_trips() {
        let comm: Commitment = [7u8; 32];

        let piece = piece_commitment_to_cid(&comm).unwrap();
        assert_eq!(cid_to_piece_commitment(&piece).unwrap(), comm);

        let data = data_commitment_to_cid(&comm).unwrap();
        assert_eq!(cid_to_data_commitment(&data).unwrap(), comm);

        let replica = replica_commitment_to_cid(&comm).unwrap();
        assert_eq!(cid_to_replica_commitment(&replica).unwrap(), comm);
    }

    #[test]
    fn test_commitment_kinds_do_not_mix() {
        let comm: Commitment = [7u8; 32];

        let replica = replica_commitment_to_cid(&comm).unwrap();
        assert!(cid_to_piece_commitment(&replica).is_err());

        let piece = piece_commitment_to_cid(&comm).unwrap();
        assert!(cid_to_replica_commitment(&piece).is_err());
    }
}
