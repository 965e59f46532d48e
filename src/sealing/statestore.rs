//! the durable per-sector store and the worker loop applying its events

use std::collections::hash_map::Entry;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{select, unbounded, Receiver, Sender};

use super::event::Event;
use super::failure::Interrupt;
use super::fsm;
use super::sector::SectorInfo;
use super::Inner;
use crate::logging::{error, info, warn, warn_span};
use crate::metadb::MetaError;
use crate::types::SectorNumber;

pub(crate) struct SectorWorker {
    pub tx: Sender<Event>,
    pub join: thread::JoinHandle<()>,
}

fn sector_key(num: SectorNumber) -> String {
    num.to_string()
}

impl Inner {
    /// Enqueues one event for the sector, spawning its worker on first use.
    /// Events for the same sector apply serially and in submission order.
    pub(crate) fn send(self: &Arc<Self>, num: SectorNumber, evt: Event) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(anyhow!("sealing is stopped"));
        }

        let mut workers = self
            .workers
            .lock()
            .map_err(|e| anyhow!("lock poisoned: {}", e))?;

        let worker = match workers.entry(num) {
            Entry::Occupied(occupied) => occupied.into_mut(),

            Entry::Vacant(vacant) => {
                let (tx, rx) = unbounded();
                let inner = self.clone();

                let join = thread::Builder::new()
                    .name(format!("sector-{}", num))
                    .spawn(move || worker_loop(inner, num, rx))
                    .context("spawn sector worker")?;

                vacant.insert(SectorWorker { tx, join })
            }
        };

        worker
            .tx
            .send(evt)
            .map_err(|_| anyhow!("worker for sector {} is gone", num))
    }

    pub(crate) fn restart_sectors(self: &Arc<Self>) -> Result<()> {
        let tracked = self.list_sectors().context("loading sector list")?;

        for sector in tracked {
            info!(
                sector = sector.sector_num,
                state = ?sector.state,
                "restarting sector",
            );

            if let Err(e) = self.send(sector.sector_num, Event::SectorRestart) {
                error!(sector = sector.sector_num, "restarting sector: {:?}", e);
            }
        }

        Ok(())
    }

    pub(crate) fn list_sectors(&self) -> Result<Vec<SectorInfo>> {
        self.meta.scan::<SectorInfo>("")
    }

    pub(crate) fn get_sector_info(&self, num: SectorNumber) -> Result<SectorInfo> {
        self.meta.get(&sector_key(num)).map_err(|e| match e {
            MetaError::NotFound => anyhow!("sector {} not found", num),
            MetaError::Failure(inner) => inner.context("load sector record"),
        })
    }

    pub(crate) fn join_workers(&self) -> Result<()> {
        let drained: Vec<SectorWorker> = {
            let mut workers = self
                .workers
                .lock()
                .map_err(|e| anyhow!("lock poisoned: {}", e))?;

            workers.drain().map(|(_, w)| w).collect()
        };

        for worker in drained {
            // the done channel is already closed, the loop exits on its own
            drop(worker.tx);
            let _ = worker.join.join();
        }

        Ok(())
    }

    fn load_or_init(&self, num: SectorNumber) -> Result<SectorInfo> {
        match self.meta.get::<SectorInfo>(&sector_key(num)) {
            Ok(info) => Ok(info),
            Err(MetaError::NotFound) => Ok(SectorInfo::new(num)),
            Err(MetaError::Failure(e)) => Err(e.context("load sector record")),
        }
    }

    fn persist(&self, info: &SectorInfo) -> Result<()> {
        self.meta.set(&sector_key(info.sector_num), info)
    }
}

/// One logical actor per sector. Each round: gather a batch, plan it, persist
/// the mutated record, announce the transition, then drive the handler whose
/// follow-up event seeds the next round.
fn worker_loop(inner: Arc<Inner>, num: SectorNumber, rx: Receiver<Event>) {
    let mut pending: Vec<Event> = Vec::new();

    loop {
        if pending.is_empty() {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(evt) => pending.push(evt),
                    Err(_) => return,
                },

                recv(inner.done) -> _done_res => {
                    return;
                }
            }
        }

        // coalesce whatever else has queued up behind the first event
        while let Ok(evt) = rx.try_recv() {
            pending.push(evt);
        }

        let batch = mem::take(&mut pending);

        let span = warn_span!("sector", num, batch = batch.len());
        let _enter = span.enter();

        let mut info = match inner.load_or_init(num) {
            Ok(info) => info,
            Err(e) => {
                error!("loading sector record: {:?}", e);
                return;
            }
        };

        let planned = fsm::plan(batch, &mut info);

        // the applied batch must be durable before the handler runs
        if let Err(e) = inner.persist(&info) {
            error!("persisting sector record: {:?}", e);
            continue;
        }

        if let Some(on_updated) = inner.on_sector_updated.as_ref() {
            on_updated(num, info.state);
        }

        let handler = match planned {
            Ok(handler) => handler,
            Err(e) => {
                warn!("planner: {:?}", e);
                continue;
            }
        };

        if let Some(handler) = handler {
            match inner.exec(handler, info) {
                Ok(Some(evt)) => pending.push(evt),

                // suspended on a channel or nothing to do; wait for the
                // next externally submitted event
                Ok(None) => {}

                Err(failure) => {
                    if failure.1.is::<Interrupt>() {
                        return;
                    }

                    error!("unhandled sector error: {:?}", failure);
                }
            }
        }
    }
}
