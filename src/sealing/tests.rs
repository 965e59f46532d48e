//! end-to-end sealing scenarios against the scripted chain and backend

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use pretty_assertions::assert_eq;

use super::{event::Event, Sealing, State};
use crate::chain::mock::{make_cid, MockChain, ScriptedCheck};
use crate::chain::SeedError;
use crate::config::SealingConfig;
use crate::metadb::{mem::MemMeta, MetaDB, MetaDocumentDB, PrefixedMetaDB};
use crate::miner::Miner;
use crate::policies::{precommit, selfdeal};
use crate::sealing::sector::SectorInfo;
use crate::sectorbuilder::mock::MockSectorBuilder;
use crate::types::{
    DealInfo, DealSchedule, SealProof, SealSeed, SealTicket, SectorNumber, UnpaddedPieceSize,
    SIZE_1K,
};

const MINER_ADDR: u64 = 55;
const WORKER_ADDR: u64 = 66;
const DEFAULT_DEAL_ID: u64 = 42;
const USER_BYTES_ONE_KIB_SECTOR: u64 = 1016;

const HAPPY_PATH: &[State] = &[
    State::Packing,
    State::Unsealed,
    State::PreCommitting,
    State::WaitSeed,
    State::Committing,
    State::CommitWait,
    State::FinalizeSector,
    State::Proving,
];

struct Harness {
    chain: Arc<MockChain>,
    sb: Arc<MockSectorBuilder>,
    sealing: Sealing,
    rx: Receiver<(SectorNumber, State)>,
}

fn harness() -> Harness {
    harness_with(Arc::new(MemMeta::default()), SealingConfig::default())
}

fn harness_with_db(db: Arc<dyn MetaDB>) -> Harness {
    harness_with(db, SealingConfig::default())
}

/// Failure/retry scenarios shrink the cooldown so retries fire within the
/// test timeout.
fn fast_retry() -> SealingConfig {
    SealingConfig {
        min_retry_time: Duration::from_millis(50),
        ..SealingConfig::default()
    }
}

fn harness_with(db: Arc<dyn MetaDB>, cfg: SealingConfig) -> Harness {
    let chain = Arc::new(MockChain::new(WORKER_ADDR));
    let sb = Arc::new(MockSectorBuilder::new(SIZE_1K, SealProof::StackedDrg2KiBV1));

    let (tx, rx) = unbounded();

    let sealing = Sealing::new(
        chain.clone(),
        sb.clone(),
        db,
        MINER_ADDR,
        cfg,
        Box::new(selfdeal::BasicPolicy::new(chain.clone(), 10, 100)),
        Box::new(precommit::BasicPolicy::new(chain.clone(), 100)),
        Some(Box::new(move |num, state| {
            let _ = tx.send((num, state));
        })),
    );

    Harness {
        chain,
        sb,
        sealing,
        rx,
    }
}

fn default_deal() -> DealInfo {
    DealInfo {
        deal_id: DEFAULT_DEAL_ID,
        deal_schedule: DealSchedule {
            start_epoch: 100,
            end_epoch: 200,
        },
    }
}

fn wait_for_state(rx: &Receiver<(SectorNumber, State)>, sector: SectorNumber, want: State) {
    loop {
        match rx.recv_timeout(Duration::from_secs(10)) {
            Ok((num, state)) if num == sector && state == want => return,
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for sector {} to reach {:?}", sector, want),
        }
    }
}

fn expect_transitions(rx: &Receiver<(SectorNumber, State)>, sector: SectorNumber, want: &[State]) {
    let mut got = Vec::with_capacity(want.len());

    while got.len() < want.len() {
        match rx.recv_timeout(Duration::from_secs(10)) {
            Ok((num, state)) if num == sector => got.push(state),
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    assert_eq!(got, want, "sector {} transitions", sector);
}

#[test]
fn test_successful_piece_sealing_flow() {
    let h = harness();
    h.sealing.run().unwrap();

    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            42,
            default_deal(),
        )
        .unwrap();

    expect_transitions(&h.rx, 42, HAPPY_PATH);

    let info = h.sealing.get_sector_info(42).unwrap();
    assert_eq!(info.state, State::Proving);
    assert_eq!(info.pieces.len(), 1);
    assert!(info.comm_d.is_some());
    assert!(info.comm_r.is_some());
    assert!(info.proof.is_some());
    assert!(info.commit_message.is_some());

    // the proof was built from the seed delivered before Committing
    assert_eq!(
        info.seed,
        Some(SealSeed {
            block_height: 42,
            seed: vec![5, 6, 7],
        }),
    );

    assert_eq!(h.chain.pre_commit_sends.load(Ordering::SeqCst), 1);
    assert_eq!(h.chain.prove_commit_sends.load(Ordering::SeqCst), 1);

    h.sealing.stop().unwrap();
}

#[test]
fn test_seal_piece_creates_self_deals_to_fill_sector() {
    let h = harness();
    h.sealing.run().unwrap();

    // a quarter-full client piece in a 1KiB sector
    let data = vec![3u8; 254];
    h.sealing
        .seal_piece(UnpaddedPieceSize(254), &mut &data[..], 42, default_deal())
        .unwrap();

    expect_transitions(&h.rx, 42, HAPPY_PATH);

    let batches = h.chain.self_deals.lock().unwrap();
    assert_eq!(batches.len(), 1);

    let (start, end, pieces) = &batches[0];
    assert!(*start > 0);
    assert!(*end > 0);

    let filler_sizes: Vec<u64> = pieces.iter().map(|p| p.size.unpadded().0).collect();
    assert_eq!(filler_sizes, vec![254, 508]);
    drop(batches);

    // client piece plus the two fillers went into pre-commit
    let info = h.sealing.get_sector_info(42).unwrap();
    assert_eq!(info.pieces.len(), 3);
    assert_eq!(info.pieces[0].deal_info.deal_id, DEFAULT_DEAL_ID);
    assert_eq!(info.pieces[1].piece.size.0, 256);
    assert_eq!(info.pieces[2].piece.size.0, 512);

    h.sealing.stop().unwrap();
}

#[test]
fn test_pledge_sector_fills_whole_sector() {
    let h = harness();
    h.sealing.run().unwrap();

    h.sealing.pledge_sector().unwrap();

    // the mock backend allocates sector numbers starting at 42
    expect_transitions(&h.rx, 42, HAPPY_PATH);

    let info = h.sealing.get_sector_info(42).unwrap();
    assert_eq!(info.pieces.len(), 1);
    assert_eq!(info.pieces[0].piece.size.0, 1024);

    h.sealing.stop().unwrap();
}

#[test]
fn test_pre_commit_send_error() {
    let h = harness();
    h.chain.fail_send_pre_commit.store(true, Ordering::SeqCst);
    h.sealing.run().unwrap();

    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            42,
            default_deal(),
        )
        .unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::PreCommitFailed,
        ],
    );

    h.sealing.stop().unwrap();
}

#[test]
fn test_prove_commit_send_error() {
    let h = harness();
    h.chain.fail_send_prove_commit.store(true, Ordering::SeqCst);
    h.sealing.run().unwrap();

    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            42,
            default_deal(),
        )
        .unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::WaitSeed,
            State::Committing,
            State::CommitFailed,
        ],
    );

    h.sealing.stop().unwrap();
}

#[test]
fn test_prove_commit_wait_error() {
    let h = harness();
    h.chain.fail_wait_prove_commit.store(true, Ordering::SeqCst);
    h.sealing.run().unwrap();

    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            42,
            default_deal(),
        )
        .unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::WaitSeed,
            State::Committing,
            State::CommitWait,
            State::CommitFailed,
        ],
    );

    h.sealing.stop().unwrap();
}

#[test]
fn test_seed_invalidation_then_redelivery() {
    let h = harness();
    h.chain.hold_seed.store(true, Ordering::SeqCst);
    h.sealing.run().unwrap();

    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            42,
            default_deal(),
        )
        .unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::WaitSeed,
        ],
    );

    // the WaitSeed handler runs after the transition callback fires; wait
    // for its subscription before rolling the chain back
    while h.chain.seed_subscriptions() == 0 {
        thread::sleep(Duration::from_millis(10));
    }

    // a reorg rolls the seed back; the sector must hold its position
    h.chain.invalidate_seeds();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.sealing.get_sector_info(42).unwrap().state, State::WaitSeed);

    // the re-selected seed restarts the commit
    let reseed = SealSeed {
        block_height: 50,
        seed: vec![9, 9, 9],
    };
    h.sealing
        .send(
            42,
            Event::SectorSeedReady {
                seed: reseed.clone(),
            },
        )
        .unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Committing,
            State::CommitWait,
            State::FinalizeSector,
            State::Proving,
        ],
    );

    let info = h.sealing.get_sector_info(42).unwrap();
    assert_eq!(info.seed, Some(reseed));
    assert_eq!(h.chain.prove_commit_sends.load(Ordering::SeqCst), 1);

    h.sealing.stop().unwrap();
}

#[test]
fn test_fault_reporting_path() {
    let h = harness();
    h.sealing.run().unwrap();

    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            42,
            default_deal(),
        )
        .unwrap();

    expect_transitions(&h.rx, 42, HAPPY_PATH);

    h.sealing.force_sector_state(42, State::Faulty).unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[State::Faulty, State::FaultReported, State::FaultedFinal],
    );

    let info = h.sealing.get_sector_info(42).unwrap();
    assert!(info.fault_report_msg.is_some());

    h.sealing.stop().unwrap();
}

fn persist_sector(db: &Arc<MemMeta>, info: &SectorInfo) {
    let docs = MetaDocumentDB::wrap(PrefixedMetaDB::wrap(
        super::SECTOR_STORE_PREFIX,
        db.clone() as Arc<dyn MetaDB>,
    ));
    docs.set(&info.sector_num.to_string(), info).unwrap();
}

#[test]
fn test_restart_leaves_proving_sector_alone() {
    let db = Arc::new(MemMeta::default());

    let mut info = SectorInfo::new(7);
    info.state = State::Proving;
    persist_sector(&db, &info);

    let h = harness_with_db(db);
    h.sealing.run().unwrap();

    expect_transitions(&h.rx, 7, &[State::Proving]);

    assert_eq!(h.sealing.get_sector_info(7).unwrap().state, State::Proving);
    assert_eq!(h.chain.pre_commit_sends.load(Ordering::SeqCst), 0);
    assert_eq!(h.chain.prove_commit_sends.load(Ordering::SeqCst), 0);

    h.sealing.stop().unwrap();
}

#[test]
fn test_restart_wait_seed_does_not_resend_pre_commit() {
    let db = Arc::new(MemMeta::default());

    let mut info = SectorInfo::new(7);
    info.state = State::WaitSeed;
    info.pieces = vec![crate::types::PieceWithDealInfo {
        piece: crate::types::PieceInfo {
            size: crate::types::PaddedPieceSize(1024),
            piece_cid: make_cid(b"persisted-piece"),
        },
        deal_info: default_deal(),
    }];
    info.comm_d = Some([1u8; 32]);
    info.comm_r = Some([2u8; 32]);
    info.ticket = Some(SealTicket {
        block_height: 5,
        ticket: vec![1, 2, 3],
    });
    info.pre_commit_message = Some(make_cid(b"persisted-pre-commit"));
    persist_sector(&db, &info);

    let h = harness_with_db(db);
    h.sealing.run().unwrap();

    // resumes from its persisted position and finishes the pipeline
    // without re-sending the already acknowledged pre-commit message
    expect_transitions(
        &h.rx,
        7,
        &[
            State::WaitSeed,
            State::Committing,
            State::CommitWait,
            State::FinalizeSector,
            State::Proving,
        ],
    );

    assert_eq!(h.chain.pre_commit_sends.load(Ordering::SeqCst), 0);
    assert_eq!(h.chain.prove_commit_sends.load(Ordering::SeqCst), 1);

    h.sealing.stop().unwrap();
}

#[test]
fn test_allocate_piece() {
    let h = harness();
    h.sealing.run().unwrap();

    assert!(h.sealing.allocate_piece(UnpaddedPieceSize(1000)).is_err());

    let (first, offset) = h.sealing.allocate_piece(UnpaddedPieceSize(1016)).unwrap();
    assert_eq!(offset, 0);

    let (second, _) = h.sealing.allocate_piece(UnpaddedPieceSize(1016)).unwrap();
    assert!(second > first, "sector numbers are never reused");

    h.sealing.stop().unwrap();
}

#[test]
fn test_stop_blocks_new_work() {
    let h = harness();
    h.sealing.run().unwrap();
    h.sealing.stop().unwrap();

    let data = vec![7u8; 254];
    let err = h
        .sealing
        .seal_piece(UnpaddedPieceSize(254), &mut &data[..], 42, default_deal())
        .unwrap_err();

    assert!(format!("{:?}", err).contains("stopped"));
}

fn seal_full_piece(h: &Harness, sector: SectorNumber) {
    let data = vec![7u8; USER_BYTES_ONE_KIB_SECTOR as usize];
    h.sealing
        .seal_piece(
            UnpaddedPieceSize(USER_BYTES_ONE_KIB_SECTOR),
            &mut &data[..],
            sector,
            default_deal(),
        )
        .unwrap();
}

#[test]
fn test_invalid_deals_route_to_packing_failed() {
    let h = harness();
    *h.chain.scripted_check_pieces.lock().unwrap() = Some(ScriptedCheck::InvalidDeals);
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    expect_transitions(
        &h.rx,
        42,
        &[State::Packing, State::Unsealed, State::PackingFailed],
    );

    let info = h.sealing.get_sector_info(42).unwrap();
    assert!(info.last_err.contains("invalid deals"));

    h.sealing.stop().unwrap();
}

#[test]
fn test_check_api_error_parks_sector_until_rearmed() {
    let h = harness();
    *h.chain.scripted_check_pieces.lock().unwrap() = Some(ScriptedCheck::Api);
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    // the api error does not consume an event or advance the state
    expect_transitions(&h.rx, 42, &[State::Packing, State::Unsealed]);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.sealing.get_sector_info(42).unwrap().state, State::Unsealed);

    // re-arming the handler retries the check, which now passes
    h.sealing.send(42, Event::SectorRestart).unwrap();

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Unsealed,
            State::PreCommitting,
            State::WaitSeed,
            State::Committing,
            State::CommitWait,
            State::FinalizeSector,
            State::Proving,
        ],
    );

    h.sealing.stop().unwrap();
}

#[test]
fn test_bad_comm_d_routes_to_seal_failed() {
    let h = harness();
    *h.chain.scripted_check_sealing.lock().unwrap() = Some(ScriptedCheck::BadCommD);
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::SealFailed,
        ],
    );

    h.sealing.stop().unwrap();
}

#[test]
fn test_pre_commit_failure_retries_after_cooldown() {
    let h = harness_with(Arc::new(MemMeta::default()), fast_retry());
    h.chain.fail_send_pre_commit.store(true, Ordering::SeqCst);
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::PreCommitFailed,
        ],
    );

    // the chain accepts the message on the next attempt; the retry loop may
    // spin a few times before it observes the toggle
    h.chain.fail_send_pre_commit.store(false, Ordering::SeqCst);

    wait_for_state(&h.rx, 42, State::Proving);

    assert_eq!(h.chain.pre_commit_sends.load(Ordering::SeqCst), 1);

    h.sealing.stop().unwrap();
}

#[test]
fn test_seal_failure_retries_after_cooldown() {
    let h = harness_with(Arc::new(MemMeta::default()), fast_retry());
    h.sb.fail_seal_pre_commit.store(true, Ordering::SeqCst);
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    expect_transitions(
        &h.rx,
        42,
        &[State::Packing, State::Unsealed, State::SealFailed],
    );

    h.sb.fail_seal_pre_commit.store(false, Ordering::SeqCst);

    wait_for_state(&h.rx, 42, State::Proving);

    assert_eq!(h.chain.pre_commit_sends.load(Ordering::SeqCst), 1);

    h.sealing.stop().unwrap();
}

#[test]
fn test_transient_seed_error_downgrades_to_pre_commit_failed() {
    let h = harness();
    *h.chain.scripted_seed_error.lock().unwrap() =
        Some(SeedError::Failed(anyhow::anyhow!("seed fetch timed out")));
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::WaitSeed,
            State::PreCommitFailed,
        ],
    );

    h.sealing.stop().unwrap();
}

#[test]
fn test_fatal_seed_error_is_unrecoverable() {
    let h = harness();
    *h.chain.scripted_seed_error.lock().unwrap() =
        Some(SeedError::Fatal(anyhow::anyhow!("seed registry corrupt")));
    h.sealing.run().unwrap();

    seal_full_piece(&h, 42);

    expect_transitions(
        &h.rx,
        42,
        &[
            State::Packing,
            State::Unsealed,
            State::PreCommitting,
            State::WaitSeed,
            State::FailedUnrecoverable,
        ],
    );

    let info = h.sealing.get_sector_info(42).unwrap();
    assert!(info.last_err.contains("seed registry corrupt"));

    h.sealing.stop().unwrap();
}

#[test]
fn test_distinct_sectors_seal_concurrently() {
    let h = harness();
    h.sealing.run().unwrap();

    seal_full_piece(&h, 1);
    seal_full_piece(&h, 2);

    let mut proving = std::collections::HashSet::new();
    while proving.len() < 2 {
        match h.rx.recv_timeout(Duration::from_secs(10)) {
            Ok((num, State::Proving)) => {
                proving.insert(num);
            }
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for both sectors to prove"),
        }
    }

    assert_eq!(h.sealing.get_sector_info(1).unwrap().state, State::Proving);
    assert_eq!(h.sealing.get_sector_info(2).unwrap().state, State::Proving);

    let mut listed = h.sealing.list_sectors().unwrap();
    listed.sort_by_key(|s| s.sector_num);
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].sector_num, 1);
    assert_eq!(listed[1].sector_num, 2);

    h.sealing.stop().unwrap();
}

#[test]
fn test_preflight_refuses_missing_worker_key() {
    let chain = Arc::new(MockChain::new(WORKER_ADDR));
    chain.has_worker_key.store(false, Ordering::SeqCst);

    let sb = Arc::new(MockSectorBuilder::new(SIZE_1K, SealProof::StackedDrg2KiBV1));

    let miner = Miner::new(
        chain,
        Arc::new(MemMeta::default()),
        sb,
        MINER_ADDR,
        SealingConfig::default(),
    );

    let err = miner.run().unwrap_err();
    assert!(format!("{:?}", err).contains("preflight"));
}
