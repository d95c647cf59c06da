//! Shared primitive types.
mod chain;
pub use chain::*;

mod erc20;
pub use erc20::*;

mod intent;
pub use intent::*;

mod multisig;
pub use multisig::*;

pub mod rpc;

mod safe;
pub use safe::*;

pub mod status;
pub use status::{FundingFacts, FundingStatus, PendingSubmission, SubmissionKind};

mod token;
pub use token::*;
