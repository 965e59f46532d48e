use std::fmt::{self, Debug};

use anyhow::Error;
use cid::Cid;

use super::sector::{SectorInfo, State};
use crate::logging::{error, trace};
use crate::types::{Commitment, PieceWithDealInfo, SealSeed, SealTicket, SectorNumber};

/// Everything the planner can be fed with. Error payloads ride along so the
/// journal can record them.
pub(crate) enum Event {
    // ingress
    SectorStart {
        num: SectorNumber,
        pieces: Vec<PieceWithDealInfo>,
    },

    // happy path
    SectorPacked {
        pieces: Vec<PieceWithDealInfo>,
    },

    SectorSealed {
        comm_d: Commitment,
        comm_r: Commitment,
        ticket: SealTicket,
    },

    SectorPreCommitted {
        message: Cid,
    },

    SectorSeedReady {
        seed: SealSeed,
    },

    SectorCommitted {
        proof: Vec<u8>,
        message: Cid,
    },

    SectorProving,

    SectorFinalized,

    // errors
    SectorPackingFailed {
        error: Error,
    },

    SectorSealFailed {
        error: Error,
    },

    SectorPreCommitFailed {
        error: Error,
    },

    SectorComputeProofFailed {
        error: Error,
    },

    SectorCommitFailed {
        error: Error,
    },

    SectorFinalizeFailed {
        error: Error,
    },

    // retries
    SectorRetrySeal,

    SectorRetryPreCommit,

    SectorRetryWaitSeed,

    // faults
    SectorFaulty,

    SectorFaultReported {
        message: Cid,
    },

    SectorFaultedFinal,

    // global
    SectorRestart,

    SectorFatalError {
        error: Error,
    },

    SectorForceState {
        state: State,
    },
}

impl Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

macro_rules! replace {
    ($target:expr, $val:expr) => {
        trace!("replacing {}", stringify!($target));
        $target.replace($val);
    };
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SectorStart { .. } => "SectorStart",

            Self::SectorPacked { .. } => "SectorPacked",

            Self::SectorSealed { .. } => "SectorSealed",

            Self::SectorPreCommitted { .. } => "SectorPreCommitted",

            Self::SectorSeedReady { .. } => "SectorSeedReady",

            Self::SectorCommitted { .. } => "SectorCommitted",

            Self::SectorProving => "SectorProving",

            Self::SectorFinalized => "SectorFinalized",

            Self::SectorPackingFailed { .. } => "SectorPackingFailed",

            Self::SectorSealFailed { .. } => "SectorSealFailed",

            Self::SectorPreCommitFailed { .. } => "SectorPreCommitFailed",

            Self::SectorComputeProofFailed { .. } => "SectorComputeProofFailed",

            Self::SectorCommitFailed { .. } => "SectorCommitFailed",

            Self::SectorFinalizeFailed { .. } => "SectorFinalizeFailed",

            Self::SectorRetrySeal => "SectorRetrySeal",

            Self::SectorRetryPreCommit => "SectorRetryPreCommit",

            Self::SectorRetryWaitSeed => "SectorRetryWaitSeed",

            Self::SectorFaulty => "SectorFaulty",

            Self::SectorFaultReported { .. } => "SectorFaultReported",

            Self::SectorFaultedFinal => "SectorFaultedFinal",

            Self::SectorRestart => "SectorRestart",

            Self::SectorFatalError { .. } => "SectorFatalError",

            Self::SectorForceState { .. } => "SectorForceState",
        }
    }

    /// The error payload carried by failure events, for the journal.
    pub fn error_trace(&self) -> Option<String> {
        match self {
            Self::SectorPackingFailed { error }
            | Self::SectorSealFailed { error }
            | Self::SectorPreCommitFailed { error }
            | Self::SectorComputeProofFailed { error }
            | Self::SectorCommitFailed { error }
            | Self::SectorFinalizeFailed { error }
            | Self::SectorFatalError { error } => Some(format!("{:?}", error)),

            _ => None,
        }
    }

    /// Global events short-circuit the per-state planner tables.
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Self::SectorRestart | Self::SectorFatalError { .. } | Self::SectorForceState { .. }
        )
    }

    /// Applies a global event. Returns true when the event fully handled the
    /// batch (no handler re-dispatch wanted beyond the new state).
    pub fn apply_global(&self, state: &mut SectorInfo) -> bool {
        match self {
            Self::SectorRestart => false,

            Self::SectorFatalError { error } => {
                error!(sector = state.sector_num, "fatal sector error: {:?}", error);
                state.last_err = format!("{:?}", error);
                state.state = State::FailedUnrecoverable;
                true
            }

            Self::SectorForceState { state: target } => {
                state.state = *target;
                true
            }

            _ => false,
        }
    }

    /// Applies the event's payload to the sector record. State selection is
    /// the planner's job, not this function's.
    pub fn apply(self, s: &mut SectorInfo) {
        match self {
            Self::SectorStart { num, pieces } => {
                s.sector_num = num;
                s.pieces = pieces;
            }

            Self::SectorPacked { pieces } => {
                s.pieces.extend(pieces);
            }

            Self::SectorSealed {
                comm_d,
                comm_r,
                ticket,
            } => {
                replace!(s.comm_d, comm_d);
                replace!(s.comm_r, comm_r);
                replace!(s.ticket, ticket);
            }

            Self::SectorPreCommitted { message } => {
                replace!(s.pre_commit_message, message);
            }

            Self::SectorSeedReady { seed } => {
                replace!(s.seed, seed);
            }

            Self::SectorCommitted { proof, message } => {
                replace!(s.proof, proof);
                replace!(s.commit_message, message);
            }

            Self::SectorFaultReported { message } => {
                replace!(s.fault_report_msg, message);
            }

            Self::SectorPackingFailed { error }
            | Self::SectorSealFailed { error }
            | Self::SectorPreCommitFailed { error }
            | Self::SectorComputeProofFailed { error }
            | Self::SectorCommitFailed { error }
            | Self::SectorFinalizeFailed { error } => {
                s.last_err = format!("{:?}", error);
            }

            _ => {}
        }
    }
}
