//! Sector sealing control plane for a decentralized storage miner.
//!
//! The crate drives a sector from "empty" through packing, replication,
//! two-phase on-chain commitment and into the proving set. The chain client
//! and the proof backend are consumed through the [`chain::Chain`] and
//! [`sectorbuilder::SectorBuilder`] contracts; everything in between — the
//! per-sector state machine, the durable state store, the self-deal packer
//! and the recovery policies — lives here.

pub mod chain;
pub mod commcid;
pub mod config;
pub mod logging;
pub mod metadb;
pub mod policies;
pub mod sealing;
pub mod sectorbuilder;
pub mod types;

mod miner;

pub use miner::Miner;
pub use sealing::{Log, SectorInfo, State};
