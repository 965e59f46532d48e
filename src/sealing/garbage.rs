//! self-deal filler generation and the sector packer

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cid::Cid;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use rayon::prelude::*;

use super::event::Event;
use super::util::user_bytes_for_sector_size;
use super::Inner;
use crate::logging::info;
use crate::sectorbuilder::SectorBuilder;
use crate::types::{
    DealInfo, PaddedPieceSize, PieceInfo, PieceWithDealInfo, PieceWithOptionalDealInfo,
    SectorNumber, UnpaddedPieceSize,
};

/// A reproducible pseudorandom byte stream; the same seed always produces
/// the same bytes, which keeps filler commitments stable.
struct PledgeReader {
    rng: StdRng,
    remaining: u64,
}

impl PledgeReader {
    fn new(seed: u64, len: u64) -> Self {
        PledgeReader {
            rng: StdRng::seed_from_u64(seed),
            remaining: len,
        }
    }
}

impl Read for PledgeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        let n = buf.len().min(self.remaining as usize);
        self.rng.fill_bytes(&mut buf[..n]);
        self.remaining -= n as u64;

        Ok(n)
    }
}

/// The largest power of two not above `want` whose shards still hold at
/// least one quantum (127 bytes) of the `n` unpadded bytes.
fn pledge_parts(n: u64, want: u64) -> u64 {
    let mut parts = if want == 0 {
        1
    } else {
        1u64 << (63 - want.leading_zeros())
    };

    while parts > 1 && n / parts < 127 {
        parts >>= 1;
    }

    parts
}

fn shard_size(n: u64, parts: u64) -> UnpaddedPieceSize {
    PaddedPieceSize((n + n / 127) / parts).unpadded()
}

/// The byte stream backing one filler piece: `parts` reproducible shards
/// seeded `42 + shard_index`, chained.
fn pledge_reader(size: UnpaddedPieceSize, want_parts: u64) -> Box<dyn Read + Send> {
    let parts = pledge_parts(size.0, want_parts);
    let shard = shard_size(size.0, parts);

    let mut reader: Box<dyn Read + Send> = Box::new(io::empty());
    for i in 0..parts {
        reader = Box::new(reader.chain(PledgeReader::new(42 + i, shard.0)));
    }

    reader
}

/// Computes the unsealed CID of a filler piece by hashing its shards in
/// parallel, each shard under the backend's rate limit.
fn fast_pledge_commitment(
    sb: &Arc<dyn SectorBuilder>,
    size: UnpaddedPieceSize,
    want_parts: u64,
) -> Result<Cid> {
    let parts = pledge_parts(size.0, want_parts);
    let shard = shard_size(size.0, parts);

    let pieces = (0..parts)
        .into_par_iter()
        .map(|i| {
            let _token = sb.rate_limit();

            let mut reader = PledgeReader::new(42 + i, shard.0);
            let piece_cid = sb
                .generate_piece_cid(shard, &mut reader)
                .context("generate shard piece cid")?;

            Ok(PieceInfo {
                size: shard.padded(),
                piece_cid,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    sb.generate_unsealed_cid(&pieces)
}

impl Inner {
    /// Packs filler pieces of the given sizes behind the existing pieces:
    /// publishes one self-deal batch for them, then streams each filler into
    /// the backend. Returns the new pieces with their deal assignments.
    pub(crate) fn pledge_sector(
        &self,
        sector_num: SectorNumber,
        existing: &[PieceWithDealInfo],
        sizes: &[UnpaddedPieceSize],
    ) -> Result<Vec<PieceWithDealInfo>> {
        if sizes.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            sector = sector_num,
            fillers = sizes.len(),
            existing = existing.len(),
            "pledging filler pieces",
        );

        let (tok, _) = self.chain.chain_head().context("failed to get chain head")?;
        self.chain
            .get_miner_worker_address(self.maddr, &tok)
            .context("failed to get worker address")?;

        let parts = rayon::current_num_threads() as u64;

        let mut filler_infos = Vec::with_capacity(sizes.len());
        for size in sizes {
            let piece_cid = fast_pledge_commitment(&self.sb, *size, parts)
                .context("failed to generate pledge commitment")?;

            filler_infos.push(PieceInfo {
                size: size.padded(),
                piece_cid,
            });
        }

        let planned: Vec<PieceWithOptionalDealInfo> = filler_infos
            .iter()
            .map(|piece| PieceWithOptionalDealInfo {
                piece: piece.clone(),
                deal_info: None,
            })
            .chain(existing.iter().map(|p| PieceWithOptionalDealInfo {
                piece: p.piece.clone(),
                deal_info: Some(p.deal_info.clone()),
            }))
            .collect();

        let schedule = self
            .self_deal_policy
            .schedule(&planned)
            .context("failed to compute self-deal schedule")?;

        info!(sector = sector_num, "publishing self deals");

        let msg = self
            .chain
            .send_self_deals(schedule.start_epoch, schedule.end_epoch, &filler_infos)
            .context("failed to send self-deal message")?;

        let (deal_ids, exit_code) = self
            .chain
            .wait_for_self_deals(&msg)
            .context("failed to wait for self-deal message")?;

        if exit_code != 0 {
            return Err(anyhow!("publishing deal failed: exit {}", exit_code));
        }

        // a mismatch here is a consistency violation, not a retryable error
        if deal_ids.len() != sizes.len() {
            return Err(anyhow!(
                "got unexpected number of deal ids from self-deal publish: {} != {}",
                deal_ids.len(),
                sizes.len(),
            ));
        }

        let mut existing_sizes: Vec<UnpaddedPieceSize> =
            existing.iter().map(|p| p.piece.size.unpadded()).collect();

        let mut out = Vec::with_capacity(sizes.len());
        for (i, size) in sizes.iter().enumerate() {
            let mut reader = pledge_reader(*size, parts);
            let ppi = self
                .sb
                .add_piece(*size, sector_num, &mut reader, &existing_sizes)
                .context("add piece")?;

            existing_sizes.push(*size);

            out.push(PieceWithDealInfo {
                piece: ppi,
                deal_info: DealInfo {
                    deal_id: deal_ids[i],
                    deal_schedule: schedule,
                },
            });
        }

        Ok(out)
    }

    /// Fills a brand-new sector entirely with self-deal data and starts its
    /// state machine.
    pub(crate) fn pledge_new_sector(self: &Arc<Self>) -> Result<()> {
        self.wait_ready();

        let size = user_bytes_for_sector_size(self.sb.sector_size());

        let sector_num = self
            .sb
            .acquire_sector_number()
            .context("acquiring sector number")?;

        let pieces = self.pledge_sector(sector_num, &[], &[size])?;
        let piece = pieces
            .into_iter()
            .next()
            .context("pledge produced no pieces")?;

        info!(sector = sector_num, "start sealing pledged sector");

        self.send(
            sector_num,
            Event::SectorStart {
                num: sector_num,
                pieces: vec![piece],
            },
        )
    }
}
