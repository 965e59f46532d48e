//! scripted in-memory chain for tests and dry runs

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    Mutex, RwLock,
};

use anyhow::{anyhow, Result};
use cid::{multihash::Multihash, Cid};
use crossbeam_channel::{unbounded, Sender};

use super::{
    Chain, CheckPiecesError, CheckSealingError, FinalityReached, SeedError, SeedInvalidated,
    SeedStream,
};
use crate::types::{
    ActorID, ChainEpoch, Commitment, DealID, PieceInfo, PieceWithDealInfo, SealProof, SealSeed,
    SealTicket, SectorNumber, TipSetToken,
};

const RAW_CODEC: u64 = 0x55;
const IDENTITY_HASH: u64 = 0x0;

/// Produces a deterministic CID for test plumbing.
pub fn make_cid(data: &[u8]) -> Cid {
    let mh = Multihash::wrap(IDENTITY_HASH, data).expect("identity multihash");
    Cid::new_v1(RAW_CODEC, mh)
}

/// What a scripted check call should report.
#[derive(Clone, Copy, Debug)]
pub enum ScriptedCheck {
    Api,
    InvalidDeals,
    ExpiredDeals,
    BadCommD,
    ExpiredTicket,
}

/// Live handles to one `get_seal_seed` subscription.
pub struct SeedFeed {
    pub seed: Sender<SealSeed>,
    pub invalidated: Sender<SeedInvalidated>,
    pub finality: Sender<FinalityReached>,
    pub error: Sender<SeedError>,
}

/// Simplest scripted chain implementation. Messages land instantly; wait
/// calls return exit code 0 unless a failure toggle is set.
pub struct MockChain {
    worker: ActorID,
    epoch: AtomicI64,
    seed: Mutex<SealSeed>,

    msg_counter: AtomicU64,
    next_deal_id: AtomicU64,

    pre_commits: RwLock<HashMap<SectorNumber, Cid>>,
    self_deal_counts: Mutex<HashMap<Cid, usize>>,
    seed_feeds: Mutex<Vec<SeedFeed>>,

    /// self-deal batches observed via `send_self_deals`, for assertions
    pub self_deals: Mutex<Vec<(ChainEpoch, ChainEpoch, Vec<PieceInfo>)>>,

    pub pre_commit_sends: AtomicU64,
    pub prove_commit_sends: AtomicU64,

    pub has_worker_key: AtomicBool,
    pub fail_send_self_deals: AtomicBool,
    pub fail_send_pre_commit: AtomicBool,
    pub fail_send_prove_commit: AtomicBool,
    pub fail_wait_prove_commit: AtomicBool,
    pub hold_seed: AtomicBool,

    pub scripted_check_pieces: Mutex<Option<ScriptedCheck>>,
    pub scripted_check_sealing: Mutex<Option<ScriptedCheck>>,
    pub scripted_seed_error: Mutex<Option<SeedError>>,
}

impl MockChain {
    pub fn new(worker: ActorID) -> Self {
        MockChain {
            worker,
            epoch: AtomicI64::new(10),
            seed: Mutex::new(SealSeed {
                block_height: 42,
                seed: vec![5, 6, 7],
            }),
            msg_counter: Default::default(),
            next_deal_id: AtomicU64::new(42),
            pre_commits: RwLock::new(Default::default()),
            self_deal_counts: Mutex::new(Default::default()),
            seed_feeds: Mutex::new(Vec::new()),
            self_deals: Mutex::new(Vec::new()),
            pre_commit_sends: Default::default(),
            prove_commit_sends: Default::default(),
            has_worker_key: AtomicBool::new(true),
            fail_send_self_deals: Default::default(),
            fail_send_pre_commit: Default::default(),
            fail_send_prove_commit: Default::default(),
            fail_wait_prove_commit: Default::default(),
            hold_seed: Default::default(),
            scripted_check_pieces: Mutex::new(None),
            scripted_check_sealing: Mutex::new(None),
            scripted_seed_error: Mutex::new(None),
        }
    }

    pub fn set_epoch(&self, epoch: ChainEpoch) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    fn next_msg_cid(&self) -> Cid {
        let n = self.msg_counter.fetch_add(1, Ordering::SeqCst);
        make_cid(&n.to_be_bytes())
    }

    /// Delivers a (possibly different) seed on every live subscription,
    /// as a reorg followed by re-selection would.
    pub fn deliver_seed(&self, seed: SealSeed) {
        let feeds = self.seed_feeds.lock().expect("seed feeds lock");
        for feed in feeds.iter() {
            let _ = feed.seed.send(seed.clone());
        }
    }

    /// Fires the invalidated channel on every live subscription.
    pub fn invalidate_seeds(&self) {
        let feeds = self.seed_feeds.lock().expect("seed feeds lock");
        for feed in feeds.iter() {
            let _ = feed.invalidated.send(SeedInvalidated);
        }
    }

    /// How many `get_seal_seed` subscriptions have been handed out.
    pub fn seed_subscriptions(&self) -> usize {
        self.seed_feeds.lock().expect("seed feeds lock").len()
    }
}

impl Chain for MockChain {
    fn chain_head(&self) -> Result<(TipSetToken, ChainEpoch)> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        Ok((epoch.to_be_bytes().to_vec(), epoch))
    }

    fn get_miner_worker_address(&self, _miner: ActorID, _tok: &TipSetToken) -> Result<ActorID> {
        Ok(self.worker)
    }

    fn get_seal_ticket(&self, _tok: &TipSetToken) -> Result<SealTicket> {
        Ok(SealTicket {
            block_height: self.epoch.load(Ordering::SeqCst),
            ticket: vec![1, 2, 3],
        })
    }

    fn send_pre_commit_sector(
        &self,
        _proof_type: SealProof,
        sector_num: SectorNumber,
        sealed_cid: Cid,
        _seal_epoch: ChainEpoch,
        _expiration: ChainEpoch,
        _pieces: &[PieceWithDealInfo],
    ) -> Result<Cid> {
        if self.fail_send_pre_commit.load(Ordering::SeqCst) {
            return Err(anyhow!("pre-commit send rejected"));
        }

        self.pre_commit_sends.fetch_add(1, Ordering::SeqCst);
        self.pre_commits
            .write()
            .expect("pre commits lock")
            .insert(sector_num, sealed_cid);

        Ok(self.next_msg_cid())
    }

    fn send_prove_commit_sector(
        &self,
        _proof_type: SealProof,
        _sector_num: SectorNumber,
        _proof: &[u8],
        _deal_ids: &[DealID],
    ) -> Result<Cid> {
        if self.fail_send_prove_commit.load(Ordering::SeqCst) {
            return Err(anyhow!("prove-commit send rejected"));
        }

        self.prove_commit_sends.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_msg_cid())
    }

    fn send_self_deals(
        &self,
        start_epoch: ChainEpoch,
        end_epoch: ChainEpoch,
        pieces: &[PieceInfo],
    ) -> Result<Cid> {
        if self.fail_send_self_deals.load(Ordering::SeqCst) {
            return Err(anyhow!("self-deal publish rejected"));
        }

        let msg = self.next_msg_cid();

        self.self_deals
            .lock()
            .expect("self deals lock")
            .push((start_epoch, end_epoch, pieces.to_vec()));
        self.self_deal_counts
            .lock()
            .expect("self deal counts lock")
            .insert(msg, pieces.len());

        Ok(msg)
    }

    fn send_report_faults(&self, _sector_nums: &[SectorNumber]) -> Result<Cid> {
        Ok(self.next_msg_cid())
    }

    fn wait_for_self_deals(&self, msg: &Cid) -> Result<(Vec<DealID>, u8)> {
        let counts = self.self_deal_counts.lock().expect("self deal counts lock");
        let count = counts
            .get(msg)
            .copied()
            .ok_or_else(|| anyhow!("unknown self-deal message: {}", msg))?;

        let ids = (0..count)
            .map(|_| self.next_deal_id.fetch_add(1, Ordering::SeqCst))
            .collect();

        Ok((ids, 0))
    }

    fn wait_for_prove_commit_sector(&self, _msg: &Cid) -> Result<u8> {
        if self.fail_wait_prove_commit.load(Ordering::SeqCst) {
            return Err(anyhow!("prove-commit wait failed"));
        }

        Ok(0)
    }

    fn wait_for_report_faults(&self, _msg: &Cid) -> Result<u8> {
        Ok(0)
    }

    fn get_seal_seed(&self, _pre_commit_msg: &Cid, _interval: ChainEpoch) -> SeedStream {
        let (seed_tx, seed_rx) = unbounded();
        let (invalidated_tx, invalidated_rx) = unbounded();
        let (finality_tx, finality_rx) = unbounded();
        let (error_tx, error_rx) = unbounded();

        if let Some(err) = self.scripted_seed_error.lock().expect("seed error lock").take() {
            let _ = error_tx.send(err);
        } else if !self.hold_seed.load(Ordering::SeqCst) {
            let seed = self.seed.lock().expect("seed lock").clone();
            let _ = seed_tx.send(seed);
        }

        self.seed_feeds.lock().expect("seed feeds lock").push(SeedFeed {
            seed: seed_tx,
            invalidated: invalidated_tx,
            finality: finality_tx,
            error: error_tx,
        });

        SeedStream {
            seed: seed_rx,
            invalidated: invalidated_rx,
            finality: finality_rx,
            error: error_rx,
        }
    }

    fn get_sealed_cid(&self, _tok: &TipSetToken, sector_num: SectorNumber) -> Result<Option<Cid>> {
        Ok(self
            .pre_commits
            .read()
            .expect("pre commits lock")
            .get(&sector_num)
            .cloned())
    }

    fn check_pieces(
        &self,
        sector_num: SectorNumber,
        _pieces: &[PieceWithDealInfo],
    ) -> Result<(), CheckPiecesError> {
        match self.scripted_check_pieces.lock().expect("check pieces lock").take() {
            None => Ok(()),
            Some(ScriptedCheck::Api) => Err(CheckPiecesError::Api(anyhow!("scripted api error"))),
            Some(ScriptedCheck::InvalidDeals) => Err(CheckPiecesError::InvalidDeals(format!(
                "scripted invalid deals for sector {}",
                sector_num
            ))),
            Some(ScriptedCheck::ExpiredDeals) => Err(CheckPiecesError::ExpiredDeals(format!(
                "scripted expired deals for sector {}",
                sector_num
            ))),
            Some(other) => Err(CheckPiecesError::Api(anyhow!(
                "scripted check {:?} does not apply to check_pieces",
                other
            ))),
        }
    }

    fn check_sealing(
        &self,
        _comm_d: &Commitment,
        _deal_ids: &[DealID],
        _ticket: &SealTicket,
    ) -> Result<(), CheckSealingError> {
        match self.scripted_check_sealing.lock().expect("check sealing lock").take() {
            None => Ok(()),
            Some(ScriptedCheck::Api) => Err(CheckSealingError::Api(anyhow!("scripted api error"))),
            Some(ScriptedCheck::BadCommD) => {
                Err(CheckSealingError::BadCommD("scripted bad CommD".to_string()))
            }
            Some(ScriptedCheck::ExpiredTicket) => Err(CheckSealingError::ExpiredTicket(
                "scripted expired ticket".to_string(),
            )),
            Some(other) => Err(CheckSealingError::Api(anyhow!(
                "scripted check {:?} does not apply to check_sealing",
                other
            ))),
        }
    }

    fn wallet_has(&self, _addr: ActorID) -> Result<bool> {
        Ok(self.has_worker_key.load(Ordering::SeqCst))
    }
}
