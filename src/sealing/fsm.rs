//! the per-sector event planner: (state, events) -> (new state, handler tag)

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use super::event::Event;
use super::sector::{Log, SectorInfo, State};
use crate::logging::{error, info, warn};

/// Tag of the side-effect routine to drive from the new state. Dispatched by
/// the sector worker which owns the chain/backend handles, so the planner
/// itself stays pure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Handler {
    Packing,
    Unsealed,
    PreCommitting,
    WaitSeed,
    Committing,
    CommitWait,
    FinalizeSector,
    SealFailed,
    PreCommitFailed,
    Faulty,
    FaultReported,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

macro_rules! plan {
    ($e:expr, $st:expr, $($prev:pat => {$($evt:pat => $next:expr,)+},)*) => {
        match $st {
            $(
                $prev => {
                    match $e {
                        $(
                            $evt => $next,
                        )+
                        _ => return Err(anyhow!("unexpected event {:?} for state {:?}", $e, $st)),
                    }
                }
            )*

            other => return Err(anyhow!("unexpected state {:?}", other)),
        }
    };
}

/// Applies one batch of events to the sector record and picks the handler to
/// run next. Every event lands in the journal first; mutations and the state
/// switch happen before the caller persists the record.
pub(crate) fn plan(events: Vec<Event>, state: &mut SectorInfo) -> Result<Option<Handler>> {
    for evt in events.iter() {
        state.log.push(Log {
            timestamp: unix_now(),
            message: format!("{:?}", evt),
            trace: evt.error_trace().unwrap_or_default(),
            kind: format!("event;{}", evt.kind()),
        });
    }

    match state.state {
        State::Committing => plan_committing(events, state)?,
        State::FaultedFinal | State::FailedUnrecoverable => final_state(events, state)?,
        _ => plan_one(events, state)?,
    }

    Ok(next_handler(state))
}

fn plan_one(mut events: Vec<Event>, state: &mut SectorInfo) -> Result<()> {
    if events.len() != 1 {
        for evt in events.into_iter() {
            if evt.is_global() {
                evt.apply_global(state);
                return Ok(());
            }
        }

        return Err(anyhow!(
            "planner for state {:?} only has a plan for a single event",
            state.state,
        ));
    }

    let evt = events.remove(0);

    if evt.is_global() {
        evt.apply_global(state);
        return Ok(());
    }

    if let Some(trace) = evt.error_trace() {
        warn!(
            sector = state.sector_num,
            event = evt.kind(),
            "got error event: {}",
            trace,
        );
    }

    let next = plan! {
        &evt,
        state.state,

        State::Undefined => {
            Event::SectorStart { .. } => State::Packing,
        },

        State::Packing => {
            Event::SectorPacked { .. } => State::Unsealed,
        },

        State::Unsealed => {
            Event::SectorSealed { .. } => State::PreCommitting,
            Event::SectorSealFailed { .. } => State::SealFailed,
            Event::SectorPackingFailed { .. } => State::PackingFailed,
        },

        State::PreCommitting => {
            Event::SectorSealFailed { .. } => State::SealFailed,
            Event::SectorPreCommitted { .. } => State::WaitSeed,
            Event::SectorPreCommitFailed { .. } => State::PreCommitFailed,
        },

        State::WaitSeed => {
            Event::SectorSeedReady { .. } => State::Committing,
            Event::SectorPreCommitFailed { .. } => State::PreCommitFailed,
        },

        State::CommitWait => {
            Event::SectorProving => State::FinalizeSector,
            Event::SectorCommitFailed { .. } => State::CommitFailed,
        },

        State::FinalizeSector => {
            Event::SectorFinalized => State::Proving,
        },

        State::Proving => {
            Event::SectorFaultReported { .. } => State::FaultReported,
            Event::SectorFaulty => State::Faulty,
        },

        State::SealFailed => {
            Event::SectorRetrySeal => State::Unsealed,
        },

        State::PreCommitFailed => {
            Event::SectorRetryPreCommit => State::PreCommitting,
            Event::SectorRetryWaitSeed => State::WaitSeed,
            Event::SectorSealFailed { .. } => State::SealFailed,
        },

        State::Faulty => {
            Event::SectorFaultReported { .. } => State::FaultReported,
        },

        State::FaultReported => {
            Event::SectorFaultedFinal => State::FaultedFinal,
        },
    };

    evt.apply(state);
    state.state = next;

    Ok(())
}

/// Committing coalesces batches: a changed seed discards the in-flight proof
/// and re-enters Committing; a matching seed is logged and ignored.
fn plan_committing(events: Vec<Event>, state: &mut SectorInfo) -> Result<()> {
    for evt in events {
        if evt.is_global() {
            if evt.apply_global(state) {
                return Ok(());
            }
            continue;
        }

        let next = match &evt {
            // the normal case
            Event::SectorCommitted { .. } => Some(State::CommitWait),

            // seed changed :/
            Event::SectorSeedReady { seed } => {
                if state.seed.as_ref() == Some(seed) {
                    warn!("planCommitting: got SectorSeedReady, but the seed didn't change");
                    None
                } else {
                    warn!("planCommitting: commit seed changed");
                    Some(State::Committing)
                }
            }

            Event::SectorComputeProofFailed { .. } => Some(State::SealCommitFailed),

            Event::SectorSealFailed { .. } => Some(State::CommitFailed),

            Event::SectorCommitFailed { .. } => Some(State::CommitFailed),

            other => {
                return Err(anyhow!(
                    "planner in Committing got event of unknown type {:?}",
                    other,
                ))
            }
        };

        let Some(next) = next else {
            continue;
        };

        let reseed = matches!(&evt, Event::SectorSeedReady { .. });
        evt.apply(state);
        state.state = next;

        if reseed {
            return Ok(());
        }
    }

    Ok(())
}

fn final_state(events: Vec<Event>, state: &mut SectorInfo) -> Result<()> {
    Err(anyhow!(
        "didn't expect any events in state {:?}, got {:?}",
        state.state,
        events,
    ))
}

fn next_handler(state: &SectorInfo) -> Option<Handler> {
    match state.state {
        // happy path
        State::Packing => Some(Handler::Packing),
        State::Unsealed => Some(Handler::Unsealed),
        State::PreCommitting => Some(Handler::PreCommitting),
        State::WaitSeed => Some(Handler::WaitSeed),
        State::Committing => Some(Handler::Committing),
        State::CommitWait => Some(Handler::CommitWait),
        State::FinalizeSector => Some(Handler::FinalizeSector),
        State::Proving => {
            info!(sector = state.sector_num, "proving sector");
            None
        }

        // handled failure modes
        State::SealFailed => Some(Handler::SealFailed),
        State::PreCommitFailed => Some(Handler::PreCommitFailed),
        State::SealCommitFailed => {
            warn!(
                sector = state.sector_num,
                "sector entered unimplemented state SealCommitFailed",
            );
            None
        }
        State::CommitFailed => {
            warn!(
                sector = state.sector_num,
                "sector entered unimplemented state CommitFailed",
            );
            None
        }
        State::PackingFailed => {
            warn!(sector = state.sector_num, "sector failed packing");
            None
        }

        // faults
        State::Faulty => Some(Handler::Faulty),
        State::FaultReported => Some(Handler::FaultReported),

        // fatal
        State::Undefined => {
            error!("sector update with undefined state");
            None
        }
        State::FaultedFinal => None,
        State::FailedUnrecoverable => {
            error!(sector = state.sector_num, "sector failed unrecoverably");
            None
        }
    }
}
