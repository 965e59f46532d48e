//! the miner façade wiring the sealing core to its collaborators

use std::io::Read;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::chain::Chain;
use crate::config::SealingConfig;
use crate::logging::info;
use crate::metadb::MetaDB;
use crate::policies::{precommit, selfdeal};
use crate::sealing::{OnSectorUpdated, Sealing, SectorInfo, State};
use crate::sectorbuilder::SectorBuilder;
use crate::types::{ActorID, DealInfo, SectorNumber, UnpaddedPieceSize};

pub struct Miner {
    chain: Arc<dyn Chain>,
    maddr: ActorID,
    sealing: Sealing,
}

impl Miner {
    pub fn new(
        chain: Arc<dyn Chain>,
        db: Arc<dyn MetaDB>,
        sb: Arc<dyn SectorBuilder>,
        maddr: ActorID,
        cfg: SealingConfig,
    ) -> Miner {
        Self::with_on_sector_updated(chain, db, sb, maddr, cfg, None)
    }

    /// Like [`Miner::new`], with a callback fired on every sector state
    /// transition. Used heavily by tests.
    pub fn with_on_sector_updated(
        chain: Arc<dyn Chain>,
        db: Arc<dyn MetaDB>,
        sb: Arc<dyn SectorBuilder>,
        maddr: ActorID,
        cfg: SealingConfig,
        on_sector_updated: Option<OnSectorUpdated>,
    ) -> Miner {
        let self_deal_policy = Box::new(selfdeal::BasicPolicy::new(
            chain.clone(),
            cfg.self_deal_proving_delay,
            cfg.self_deal_duration,
        ));

        let pre_commit_policy = Box::new(precommit::BasicPolicy::new(
            chain.clone(),
            cfg.pre_commit_duration,
        ));

        let sealing = Sealing::new(
            chain.clone(),
            sb,
            db,
            maddr,
            cfg,
            self_deal_policy,
            pre_commit_policy,
            on_sector_updated,
        );

        Miner {
            chain,
            maddr,
            sealing,
        }
    }

    /// Starts the miner: preflight checks, then the restart replay of every
    /// persisted sector. Call once, before anything else.
    pub fn run(&self) -> Result<()> {
        self.run_preflight_checks()
            .context("miner preflight checks failed")?;

        self.sealing.run()
    }

    /// Stops listening for sector state transitions and quiesces the store.
    pub fn stop(&self) -> Result<()> {
        self.sealing.stop()
    }

    /// Writes the provided piece to the given sector and seals it.
    pub fn seal_piece(
        &self,
        size: UnpaddedPieceSize,
        reader: &mut dyn Read,
        sector_num: SectorNumber,
        deal: DealInfo,
    ) -> Result<()> {
        self.sealing.seal_piece(size, reader, sector_num, deal)
    }

    /// Creates and seals a sector holding only self-deal filler data.
    pub fn pledge_sector(&self) -> Result<()> {
        self.sealing.pledge_sector()
    }

    /// Reserves a sector number for a piece of the given size.
    pub fn allocate_piece(&self, size: UnpaddedPieceSize) -> Result<(SectorNumber, u64)> {
        self.sealing.allocate_piece(size)
    }

    /// Administrative override: moves the sector into the given state.
    pub fn force_sector_state(&self, sector_num: SectorNumber, state: State) -> Result<()> {
        self.sealing.force_sector_state(sector_num, state)
    }

    pub fn list_sectors(&self) -> Result<Vec<SectorInfo>> {
        self.sealing.list_sectors()
    }

    pub fn get_sector_info(&self, sector_num: SectorNumber) -> Result<SectorInfo> {
        self.sealing.get_sector_info(sector_num)
    }

    fn run_preflight_checks(&self) -> Result<()> {
        let (tok, _) = self.chain.chain_head().context("failed to get chain head")?;

        let waddr = self
            .chain
            .get_miner_worker_address(self.maddr, &tok)
            .context("error acquiring worker address")?;

        let has = self
            .chain
            .wallet_has(waddr)
            .context("failed to check wallet for worker key")?;

        if !has {
            return Err(anyhow!("key for worker not found in local wallet"));
        }

        info!(miner = self.maddr, worker = waddr, "starting up miner");

        Ok(())
    }
}
