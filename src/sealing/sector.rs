use anyhow::{anyhow, Error};
use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::types::{
    Commitment, DealID, PaddedPieceSize, PieceInfo, PieceWithDealInfo, SealSeed, SealTicket,
    SectorNumber,
};

macro_rules! def_state {
    ($($name:ident,)+) => {
        /// The position of a sector within the sealing pipeline.
        #[derive(Clone, Copy, Deserialize_repr, Serialize_repr, PartialEq, Eq, Hash)]
        #[repr(u64)]
        pub enum State {
            $(
                $name,
            )+
        }

        impl State {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(
                        Self::$name => stringify!($name),
                    )+
                }
            }
        }

        impl From<State> for &str {
            fn from(s: State) -> &'static str {
                s.as_str()
            }
        }

        impl std::str::FromStr for State {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(
                        stringify!($name) => Ok(Self::$name),
                    )+

                    other => Err(anyhow!("invalid state {}", other)),
                }
            }
        }
    };
}

def_state! {
    Undefined,
    Packing,
    Unsealed,
    PreCommitting,
    WaitSeed,
    Committing,
    CommitWait,
    FinalizeSector,
    Proving,
    SealFailed,
    PreCommitFailed,
    SealCommitFailed,
    CommitFailed,
    PackingFailed,
    Faulty,
    FaultReported,
    FaultedFinal,
    FailedUnrecoverable,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str((*self).into())
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str((*self).into())
    }
}

impl Default for State {
    fn default() -> Self {
        State::Undefined
    }
}

/// One entry of the append-only per-sector journal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Log {
    pub timestamp: u64,

    /// set for error events
    pub trace: String,

    pub message: String,

    /// additional data (event info)
    pub kind: String,
}

/// The durable record of one sector, owned by the state store and mutated
/// only through the planner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectorInfo {
    pub state: State,
    pub sector_num: SectorNumber,

    // packing
    pub pieces: Vec<PieceWithDealInfo>,

    // pre-commit
    pub comm_d: Option<Commitment>,
    pub comm_r: Option<Commitment>,
    pub proof: Option<Vec<u8>>,
    pub ticket: Option<SealTicket>,

    pub pre_commit_message: Option<Cid>,

    // wait-seed
    pub seed: Option<SealSeed>,

    // committing
    pub commit_message: Option<Cid>,

    // faults
    pub fault_report_msg: Option<Cid>,

    // debug
    pub last_err: String,

    pub log: Vec<Log>,
}

impl SectorInfo {
    pub fn new(sector_num: SectorNumber) -> Self {
        SectorInfo {
            state: State::default(),
            sector_num,
            pieces: Vec::new(),
            comm_d: None,
            comm_r: None,
            proof: None,
            ticket: None,
            pre_commit_message: None,
            seed: None,
            commit_message: None,
            fault_report_msg: None,
            last_err: String::new(),
            log: Vec::new(),
        }
    }

    pub fn deal_ids(&self) -> Vec<DealID> {
        self.pieces.iter().map(|p| p.deal_info.deal_id).collect()
    }

    pub fn existing_pieces(&self) -> Vec<PaddedPieceSize> {
        self.pieces.iter().map(|p| p.piece.size).collect()
    }

    pub fn piece_infos(&self) -> Vec<PieceInfo> {
        self.pieces.iter().map(|p| p.piece.clone()).collect()
    }
}
