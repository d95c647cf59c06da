//! # Safe Relay
//!
//! Library for the implementation of the Safe relay: counterfactual Safe deployment and
//! multisig transaction relaying.

pub mod address;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod estimation;
pub mod lease;
pub mod metrics;
pub mod node;
pub mod nonce;
pub mod price;
pub mod reconcile;
pub mod relay;
pub mod rpc;
pub mod scheduler;
pub mod sequencer;
pub mod serde;
pub mod signers;
pub mod spawn;
pub mod storage;
pub mod submission;
pub mod transactions;
pub mod types;
pub mod version;
