//! Funding and deployment lifecycle of a Safe.
//!
//! The relay never stores a status directly. It stores [`FundingFacts`], an ordered set of
//! facts observed on chain or recorded on submission, and derives the [`FundingStatus`] from
//! them. Every fact requires the fact before it, so the status is simply the length of the
//! satisfied prefix.

use super::EthereumTx;
use alloy::primitives::{Address, B256, BlockNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a counterfactual Safe.
///
/// Variants are ordered: a status only moves forward, except for a single-step rollback when a
/// mined transaction is reorganized out of the canonical chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingStatus {
    /// The Safe address does not hold enough to pay for its creation.
    NotFunded,
    /// The Safe is funded, the deployer has not been topped up yet.
    FundedAwaitingDeployer,
    /// The deployer funding transaction was sent but is not confirmed.
    DeployerFundedUnconfirmed,
    /// The deployer funding transaction is confirmed.
    DeployerFunded,
    /// The deployment transaction was sent but is not confirmed.
    DeployedUnconfirmed,
    /// The Safe is deployed and confirmed.
    Deployed,
}

impl FundingStatus {
    const LADDER: [Self; 6] = [
        Self::NotFunded,
        Self::FundedAwaitingDeployer,
        Self::DeployerFundedUnconfirmed,
        Self::DeployerFunded,
        Self::DeployedUnconfirmed,
        Self::Deployed,
    ];

    /// Derives the status from a set of facts.
    ///
    /// A fact set where a later fact holds without its predecessor is rejected, e.g. a
    /// deployment block without a deployment hash.
    pub fn evaluate(facts: &FundingFacts) -> Result<Self, InconsistentFacts> {
        let ladder = facts.ladder();
        let satisfied = ladder.iter().take_while(|fact| **fact).count();

        if let Some(position) = ladder[satisfied..].iter().position(|fact| *fact) {
            return Err(InconsistentFacts {
                safe: facts.safe,
                missing: Self::LADDER[satisfied + 1],
                present: Self::LADDER[satisfied + position + 1],
            });
        }

        Ok(Self::LADDER[satisfied])
    }

    /// Whether a transaction was sent but is not yet confirmed.
    pub const fn is_unconfirmed(&self) -> bool {
        matches!(self, Self::DeployerFundedUnconfirmed | Self::DeployedUnconfirmed)
    }

    /// Whether the Safe is deployed and confirmed.
    pub const fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed)
    }
}

impl fmt::Display for FundingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFunded => "NOT_FUNDED",
            Self::FundedAwaitingDeployer => "FUNDED_AWAITING_DEPLOYER",
            Self::DeployerFundedUnconfirmed => "DEPLOYER_FUNDED_UNCONFIRMED",
            Self::DeployerFunded => "DEPLOYER_FUNDED",
            Self::DeployedUnconfirmed => "DEPLOYED_UNCONFIRMED",
            Self::Deployed => "DEPLOYED",
        };
        f.write_str(s)
    }
}

/// A transaction the relay submits on behalf of a Safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionKind {
    /// Funder to deployer top-up.
    DeployerFunding,
    /// `createProxyWithNonce` sent by the deployer.
    Deployment,
}

impl SubmissionKind {
    /// Status the Safe must be in for this submission to be built.
    pub const fn required_status(&self) -> FundingStatus {
        match self {
            Self::DeployerFunding => FundingStatus::FundedAwaitingDeployer,
            Self::Deployment => FundingStatus::DeployerFunded,
        }
    }

    /// Status the Safe is in once this submission is recorded.
    pub const fn pending_status(&self) -> FundingStatus {
        match self {
            Self::DeployerFunding => FundingStatus::DeployerFundedUnconfirmed,
            Self::Deployment => FundingStatus::DeployedUnconfirmed,
        }
    }

    /// The submission that is outstanding or last mined in `status`, if any.
    pub const fn for_status(status: FundingStatus) -> Option<Self> {
        match status {
            FundingStatus::DeployerFundedUnconfirmed | FundingStatus::DeployerFunded => {
                Some(Self::DeployerFunding)
            }
            FundingStatus::DeployedUnconfirmed | FundingStatus::Deployed => {
                Some(Self::Deployment)
            }
            FundingStatus::NotFunded | FundingStatus::FundedAwaitingDeployer => None,
        }
    }
}

impl SubmissionKind {
    /// Stable name used in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeployerFunding => "deployer_funding",
            Self::Deployment => "deployment",
        }
    }
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeployerFunding => f.write_str("deployer funding"),
            Self::Deployment => f.write_str("deployment"),
        }
    }
}

/// A signed submission stored before its broadcast.
///
/// It holds the sender nonce slot of its Safe and step: no other transaction is built for the
/// step while it exists, and a mined transaction only counts as this submission if it uses
/// the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    /// The Safe.
    pub safe: Address,
    /// The step the transaction performs.
    pub kind: SubmissionKind,
    /// Hash of the signed transaction.
    pub tx_hash: B256,
    /// Relay account that signed it.
    pub from: Address,
    /// Sender nonce.
    pub nonce: u64,
}

impl PendingSubmission {
    /// Reservation of `tx` for `kind` of `safe`.
    pub fn new(safe: Address, kind: SubmissionKind, tx: &EthereumTx) -> Self {
        Self { safe, kind, tx_hash: tx.tx_hash, from: tx.from, nonce: tx.nonce }
    }

    /// Whether `tx` is sent from the reserved account with the reserved nonce.
    pub fn same_slot(&self, tx: &EthereumTx) -> bool {
        tx.from == self.from && tx.nonce == self.nonce
    }
}

/// A fact set where a later fact holds without the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("inconsistent funding facts for {safe}: {present} recorded without {missing}")]
pub struct InconsistentFacts {
    /// The Safe.
    pub safe: Address,
    /// First status whose fact is missing.
    pub missing: FundingStatus,
    /// Status whose fact is present despite the gap.
    pub present: FundingStatus,
}

/// Errors returned by [`FundingFacts`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The stored facts do not describe a valid status.
    #[error(transparent)]
    Inconsistent(#[from] InconsistentFacts),
    /// The transition is not legal from the current status.
    #[error("cannot move from {from} to {to}")]
    Illegal {
        /// Current status.
        from: FundingStatus,
        /// Requested status.
        to: FundingStatus,
    },
    /// A transaction of this kind already has a hash recorded.
    #[error("a {0} transaction was already submitted")]
    AlreadySubmitted(SubmissionKind),
    /// The Safe is already deployed.
    #[error("safe is already deployed")]
    AlreadyDeployed,
    /// There is no mined fact to roll back.
    #[error("no mined transaction to roll back in status {0}")]
    NothingToRollBack(FundingStatus),
}

/// Facts recorded about a Safe's funding and deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingFacts {
    /// The Safe.
    pub safe: Address,
    /// The Safe address holds at least the creation payment.
    pub safe_funded: bool,
    /// Hash of the funder to deployer transfer.
    pub deployer_funded_tx_hash: Option<B256>,
    /// The deployer funding transaction is mined and confirmed.
    pub deployer_funded: bool,
    /// Hash of the deployment transaction.
    pub safe_deployed_tx_hash: Option<B256>,
    /// Block the deployment was confirmed in.
    pub deployed_block_number: Option<BlockNumber>,
}

impl FundingFacts {
    /// Facts of a freshly registered Safe.
    pub fn new(safe: Address) -> Self {
        Self { safe, ..Default::default() }
    }

    /// The facts in lifecycle order. Entry `i` holds iff status `i + 1` is reached.
    const fn ladder(&self) -> [bool; 5] {
        [
            self.safe_funded,
            self.deployer_funded_tx_hash.is_some(),
            self.deployer_funded,
            self.safe_deployed_tx_hash.is_some(),
            self.deployed_block_number.is_some(),
        ]
    }

    /// Derived status, see [`FundingStatus::evaluate`].
    pub fn status(&self) -> Result<FundingStatus, InconsistentFacts> {
        FundingStatus::evaluate(self)
    }

    /// The recorded hash for a submission kind.
    pub const fn tx_hash(&self, kind: SubmissionKind) -> Option<B256> {
        match kind {
            SubmissionKind::DeployerFunding => self.deployer_funded_tx_hash,
            SubmissionKind::Deployment => self.safe_deployed_tx_hash,
        }
    }

    /// Requires the current status to be exactly `from`.
    fn expect(&self, from: FundingStatus, to: FundingStatus) -> Result<(), TransitionError> {
        let current = self.status()?;
        if current != from {
            return Err(TransitionError::Illegal { from: current, to });
        }
        Ok(())
    }

    /// `NotFunded` to `FundedAwaitingDeployer`.
    pub fn mark_safe_funded(&self) -> Result<Self, TransitionError> {
        self.expect(FundingStatus::NotFunded, FundingStatus::FundedAwaitingDeployer)?;
        Ok(Self { safe_funded: true, ..self.clone() })
    }

    /// `FundedAwaitingDeployer` to `DeployerFundedUnconfirmed`.
    pub fn record_deployer_funding(&self, tx_hash: B256) -> Result<Self, TransitionError> {
        self.record_submission(SubmissionKind::DeployerFunding, tx_hash)
    }

    /// `DeployerFundedUnconfirmed` to `DeployerFunded`.
    pub fn mark_deployer_funded(&self) -> Result<Self, TransitionError> {
        self.expect(FundingStatus::DeployerFundedUnconfirmed, FundingStatus::DeployerFunded)?;
        Ok(Self { deployer_funded: true, ..self.clone() })
    }

    /// `DeployerFunded` to `DeployedUnconfirmed`.
    pub fn record_deployment(&self, tx_hash: B256) -> Result<Self, TransitionError> {
        self.record_submission(SubmissionKind::Deployment, tx_hash)
    }

    /// `DeployedUnconfirmed` to `Deployed`.
    pub fn mark_deployed(&self, block: BlockNumber) -> Result<Self, TransitionError> {
        self.expect(FundingStatus::DeployedUnconfirmed, FundingStatus::Deployed)?;
        Ok(Self { deployed_block_number: Some(block), ..self.clone() })
    }

    /// Records the hash of a submission. Each hash is set at most once.
    pub fn record_submission(
        &self,
        kind: SubmissionKind,
        tx_hash: B256,
    ) -> Result<Self, TransitionError> {
        let current = self.status()?;
        if current.is_deployed() {
            return Err(TransitionError::AlreadyDeployed);
        }
        if self.tx_hash(kind).is_some() {
            return Err(TransitionError::AlreadySubmitted(kind));
        }
        self.expect(kind.required_status(), kind.pending_status())?;

        let mut next = self.clone();
        match kind {
            SubmissionKind::DeployerFunding => next.deployer_funded_tx_hash = Some(tx_hash),
            SubmissionKind::Deployment => next.safe_deployed_tx_hash = Some(tx_hash),
        }
        Ok(next)
    }

    /// Confirms the outstanding submission of `kind`.
    pub fn mark_mined(
        &self,
        kind: SubmissionKind,
        block: BlockNumber,
    ) -> Result<Self, TransitionError> {
        match kind {
            SubmissionKind::DeployerFunding => self.mark_deployer_funded(),
            SubmissionKind::Deployment => self.mark_deployed(block),
        }
    }

    /// Steps back from a confirmed status after its transaction was reorganized out.
    ///
    /// Hashes are kept: the same signed transaction is rebroadcast, never a new one.
    pub fn rollback(&self) -> Result<Self, TransitionError> {
        match self.status()? {
            FundingStatus::Deployed => Ok(Self { deployed_block_number: None, ..self.clone() }),
            FundingStatus::DeployerFunded => Ok(Self { deployer_funded: false, ..self.clone() }),
            status => Err(TransitionError::NothingToRollBack(status)),
        }
    }
}
