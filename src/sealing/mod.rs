//! the sealing finite-state machine and its surrounding policies

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{select, unbounded, Receiver, Sender};

use crate::chain::Chain;
use crate::config::SealingConfig;
use crate::logging::{error, info};
use crate::metadb::{MetaDB, MetaDocumentDB, PrefixedMetaDB};
use crate::policies::{precommit, selfdeal};
use crate::sectorbuilder::SectorBuilder;
use crate::types::{ActorID, ChainEpoch, DealInfo, PieceWithDealInfo, SectorNumber, UnpaddedPieceSize};

pub(crate) mod event;
pub(crate) mod fsm;

mod garbage;
mod sector;
mod states;
mod states_failed;
mod statestore;

pub mod failure;

mod util;

#[cfg(test)]
mod tests;

use event::Event;
use failure::{Failure, Interrupt};
use fsm::Handler;
use statestore::SectorWorker;

pub use sector::{Log, SectorInfo, State};

/// Epochs between pre-commit inclusion and seed availability.
pub const INTERACTIVE_POREP_DELAY: ChainEpoch = 8;

const SECTOR_STORE_PREFIX: &str = "sectors";

/// Called after every applied event batch with the sector's new state.
pub type OnSectorUpdated = Box<dyn Fn(SectorNumber, State) + Send + Sync>;

/// Drives sectors through packing, sealing, the two on-chain commit phases
/// and into proving. One worker thread per sector serializes that sector's
/// events; distinct sectors run concurrently.
pub struct Sealing {
    inner: Arc<Inner>,
    done_tx: Mutex<Option<Sender<()>>>,
}

pub(crate) struct Inner {
    pub(crate) chain: Arc<dyn Chain>,
    pub(crate) sb: Arc<dyn SectorBuilder>,
    pub(crate) maddr: ActorID,
    pub(crate) cfg: SealingConfig,
    pub(crate) self_deal_policy: Box<dyn selfdeal::Policy>,
    pub(crate) pre_commit_policy: Box<dyn precommit::Policy>,
    pub(crate) meta: MetaDocumentDB<PrefixedMetaDB>,
    pub(crate) done: Receiver<()>,
    pub(crate) on_sector_updated: Option<OnSectorUpdated>,

    workers: Mutex<HashMap<SectorNumber, SectorWorker>>,
    stopped: AtomicBool,

    // new sectors wait here until the restart replay has been enqueued
    ready: Mutex<bool>,
    ready_cond: Condvar,
}

impl Sealing {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn Chain>,
        sb: Arc<dyn SectorBuilder>,
        db: Arc<dyn MetaDB>,
        maddr: ActorID,
        cfg: SealingConfig,
        self_deal_policy: Box<dyn selfdeal::Policy>,
        pre_commit_policy: Box<dyn precommit::Policy>,
        on_sector_updated: Option<OnSectorUpdated>,
    ) -> Self {
        let (done_tx, done) = unbounded();

        let meta = MetaDocumentDB::wrap(PrefixedMetaDB::wrap(SECTOR_STORE_PREFIX, db));

        Sealing {
            inner: Arc::new(Inner {
                chain,
                sb,
                maddr,
                cfg,
                self_deal_policy,
                pre_commit_policy,
                meta,
                done,
                on_sector_updated,
                workers: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
                ready: Mutex::new(false),
                ready_cond: Condvar::new(),
            }),
            done_tx: Mutex::new(Some(done_tx)),
        }
    }

    /// Replays every persisted sector through a restart event. Blocks calls
    /// that add sectors until the replay has been enqueued.
    pub fn run(&self) -> Result<()> {
        self.inner
            .restart_sectors()
            .context("failed to load sector states")?;
        self.inner.mark_ready();

        Ok(())
    }

    /// Quiesces the store: no new events are accepted and every sector
    /// worker is joined.
    pub fn stop(&self) -> Result<()> {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.mark_ready();

        // dropping the sender fires every select on the done channel
        drop(
            self.done_tx
                .lock()
                .map_err(|e| anyhow!("lock poisoned: {}", e))?
                .take(),
        );

        self.inner.join_workers()
    }

    /// Writes the provided piece to the given sector and starts sealing it.
    pub fn seal_piece(
        &self,
        size: UnpaddedPieceSize,
        reader: &mut dyn Read,
        sector_num: SectorNumber,
        deal: DealInfo,
    ) -> Result<()> {
        self.inner.wait_ready();

        info!(deal = deal.deal_id, sector = sector_num, "seal piece for deal");

        let ppi = self
            .inner
            .sb
            .add_piece(size, sector_num, reader, &[])
            .context("adding piece to sector")?;

        info!(sector = sector_num, "start sealing");

        self.inner.send(
            sector_num,
            Event::SectorStart {
                num: sector_num,
                pieces: vec![PieceWithDealInfo {
                    piece: ppi,
                    deal_info: deal,
                }],
            },
        )
    }

    /// Creates a sector filled entirely with self-deal data and starts
    /// sealing it. Runs detached; failures surface in the log.
    pub fn pledge_sector(&self) -> Result<()> {
        let inner = self.inner.clone();

        thread::Builder::new()
            .name("pledge-sector".to_string())
            .spawn(move || {
                if let Err(e) = inner.pledge_new_sector() {
                    error!("pledge sector: {:?}", e);
                }
            })
            .context("spawn pledge thread")?;

        Ok(())
    }

    /// Reserves a sector for a piece of the given size. The piece lands at
    /// offset 0; one piece per sector for now.
    pub fn allocate_piece(&self, size: UnpaddedPieceSize) -> Result<(SectorNumber, u64)> {
        size.validate().context("cannot allocate unaligned piece")?;

        let sector_num = self
            .inner
            .sb
            .acquire_sector_number()
            .context("acquiring sector number")?;

        Ok((sector_num, 0))
    }

    /// Administrative override: puts the sector into the given state,
    /// bypassing the planner tables.
    pub fn force_sector_state(&self, sector_num: SectorNumber, state: State) -> Result<()> {
        self.inner
            .send(sector_num, Event::SectorForceState { state })
    }

    pub fn list_sectors(&self) -> Result<Vec<SectorInfo>> {
        self.inner.list_sectors()
    }

    pub fn get_sector_info(&self, sector_num: SectorNumber) -> Result<SectorInfo> {
        self.inner.get_sector_info(sector_num)
    }

    #[cfg(test)]
    pub(crate) fn send(&self, sector_num: SectorNumber, evt: Event) -> Result<()> {
        self.inner.send(sector_num, evt)
    }
}

impl Inner {
    pub(crate) fn exec(&self, handler: Handler, sector: SectorInfo) -> Result<Option<Event>, Failure> {
        match handler {
            Handler::Packing => self.handle_packing(sector),

            Handler::Unsealed => self.handle_unsealed(sector),

            Handler::PreCommitting => self.handle_pre_committing(sector),

            Handler::WaitSeed => self.handle_wait_seed(sector),

            Handler::Committing => self.handle_committing(sector),

            Handler::CommitWait => self.handle_commit_wait(sector),

            Handler::FinalizeSector => self.handle_finalize_sector(sector),

            Handler::SealFailed => self.handle_seal_failed(sector),

            Handler::PreCommitFailed => self.handle_pre_commit_failed(sector),

            Handler::Faulty => self.handle_faulty(sector),

            Handler::FaultReported => self.handle_fault_reported(sector),
        }
    }

    pub(crate) fn wait_or_interrupted(&self, duration: Duration) -> Result<(), Failure> {
        select! {
            recv(self.done) -> _done_res => {
                Err(Interrupt.into())
            }

            default(duration) => {
                Ok(())
            }
        }
    }

    fn wait_ready(&self) {
        let mut ready = match self.ready.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while !*ready {
            ready = match self.ready_cond.wait(ready) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn mark_ready(&self) {
        if let Ok(mut ready) = self.ready.lock() {
            *ready = true;
        }
        self.ready_cond.notify_all();
    }
}
