//! Multisig transaction sequencing.
//!
//! Owners sign a Safe transaction off-chain and the relay executes it, paying the gas. Every
//! accepted transaction gets the next nonce of its Safe, allocated in the same storage step
//! that persists it, so nonces are gap-free even under concurrent requests.
//!
//! The signed execution is stored with the multisig transaction before it is broadcast. An
//! execution the node does not know is sent again by the next relay request or reconciliation
//! pass of the Safe, so a failed broadcast never leaves a nonce gap behind.

use crate::{
    constants::EXEC_TX_GAS_OVERHEAD,
    error::{LeaseError, RelayError, StorageError, ValidationError},
    estimation::Estimator,
    lease::{Leases, wallet_key},
    node::{NodeClient, safe_state},
    signers::DynSigner,
    storage::{RelayStorage, StorageApi},
    transactions::{TxRequest, TxSender},
    types::{
        EthereumTx, MultisigTransaction,
        rpc::{RelayRequest, RelayResponse},
    },
};
use alloy::primitives::{Address, B256, Signature, U256};
use metrics::Counter;
use metrics_derive::Metrics;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Length of an `r ‖ s ‖ v` signature.
const SIGNATURE_LENGTH: usize = 65;

/// Metrics of the [`Sequencer`].
#[derive(Metrics)]
#[metrics(scope = "sequencer")]
pub struct SequencerMetrics {
    /// Number of relayed multisig transactions.
    pub relayed: Counter,
    /// Number of requests rejected for missing signatures.
    pub insufficient_signatures: Counter,
    /// Number of requests rejected for their nonce.
    pub invalid_nonce: Counter,
    /// Number of executions sent again.
    pub resent: Counter,
}

/// Recovers the signers of `safe_tx_hash` from concatenated Safe signatures.
///
/// `v` of 27 or 28 is a signature of the hash itself, `v` above 30 is an `eth_sign` signature
/// with `v` shifted by 4. Contract signatures and approved hashes are not accepted.
pub fn recover_signers(
    safe_tx_hash: B256,
    signatures: &[u8],
) -> Result<Vec<Address>, ValidationError> {
    if signatures.len() % SIGNATURE_LENGTH != 0 {
        return Err(ValidationError::MalformedSignatures(format!(
            "length {} is not a multiple of {SIGNATURE_LENGTH}",
            signatures.len()
        )));
    }

    signatures
        .chunks_exact(SIGNATURE_LENGTH)
        .enumerate()
        .map(|(position, chunk)| {
            let r = U256::from_be_slice(&chunk[..32]);
            let s = U256::from_be_slice(&chunk[32..64]);
            let v = chunk[64];

            let recovered = match v {
                27 | 28 => Signature::new(r, s, v == 28).recover_address_from_prehash(&safe_tx_hash),
                31 | 32 => Signature::new(r, s, v == 32).recover_address_from_msg(safe_tx_hash),
                other => {
                    return Err(ValidationError::MalformedSignatures(format!(
                        "signature {position} has unsupported v {other}"
                    )));
                }
            };

            recovered.map_err(|err| {
                ValidationError::MalformedSignatures(format!("signature {position}: {err}"))
            })
        })
        .collect()
}

/// Number of valid signatures: the leading signers that are owners in strictly ascending
/// order.
pub fn count_valid_signers(signers: &[Address], owners: &[Address]) -> usize {
    let mut last = Address::ZERO;
    signers
        .iter()
        .take_while(|signer| {
            let valid = **signer > last && owners.contains(signer);
            last = **signer;
            valid
        })
        .count()
}

/// Accepts, sequences and executes owner-signed Safe transactions.
#[derive(Debug, Clone)]
pub struct Sequencer {
    node: Arc<dyn NodeClient>,
    storage: RelayStorage,
    leases: Leases,
    sender: TxSender,
    estimator: Estimator,
    deployer: DynSigner,
    metrics: Arc<SequencerMetrics>,
}

impl Sequencer {
    /// Creates a new [`Sequencer`].
    pub fn new(
        node: Arc<dyn NodeClient>,
        storage: RelayStorage,
        leases: Leases,
        sender: TxSender,
        estimator: Estimator,
        deployer: DynSigner,
    ) -> Self {
        Self {
            node,
            storage,
            leases,
            sender,
            estimator,
            deployer,
            metrics: Arc::new(SequencerMetrics::default()),
        }
    }

    async fn ensure_deployed(&self, safe: Address) -> Result<(), RelayError> {
        let facts = self.storage.read_funding(safe).await?.ok_or(RelayError::NotFound(safe))?;
        let status =
            facts.status().map_err(|err| RelayError::from_transition(safe, err.into()))?;
        if !status.is_deployed() {
            return Err(RelayError::WalletNotDeployed(safe));
        }
        Ok(())
    }

    /// The nonce the next relayed transaction of `safe` gets.
    pub async fn next_nonce(&self, safe: Address) -> Result<u64, RelayError> {
        self.ensure_deployed(safe).await?;
        match self.storage.next_multisig_nonce(safe).await? {
            Some(nonce) => Ok(nonce),
            None => Ok(safe_state(self.node.as_ref(), safe).await?.nonce),
        }
    }

    /// Verifies and executes a multisig transaction.
    ///
    /// The transaction is persisted with its nonce and signed execution before it is broadcast,
    /// and nothing is persisted when verification fails. The call returns once the execution is
    /// broadcast. Repeating a relayed request returns the stored result.
    #[instrument(skip_all, fields(safe = %request.safe))]
    pub async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let safe = request.safe;
        self.ensure_deployed(safe).await?;

        let refund_receiver = request.params.refund_receiver;
        if !refund_receiver.is_zero() && refund_receiver != self.deployer.address() {
            return Err(ValidationError::InvalidRefundReceiver(refund_receiver).into());
        }

        self.leases
            .with_wallet(safe, || self.relay_locked(request))
            .await?
            .unwrap_or_else(|| Err(LeaseError::Busy(wallet_key(safe)).into()))
    }

    /// Sends the executions of stored multisig transactions that the node does not know,
    /// starting at the Safe's on-chain nonce. Returns how many were sent.
    #[instrument(skip(self))]
    pub async fn resend_unexecuted(&self, safe: Address) -> Result<usize, RelayError> {
        self.leases
            .with_wallet(safe, || async move {
                let state = safe_state(self.node.as_ref(), safe).await?;
                self.resend_locked(safe, state.nonce).await
            })
            .await?
            .unwrap_or_else(|| Err(LeaseError::Busy(wallet_key(safe)).into()))
    }

    async fn resend_locked(&self, safe: Address, from_nonce: u64) -> Result<usize, RelayError> {
        let mut sent = 0;
        for multisig in self.storage.read_multisig_transactions_from(safe, from_nonce).await? {
            let stored = match multisig.ethereum_tx {
                Some(tx_hash) => self.storage.read_transaction(tx_hash).await?,
                None => None,
            };

            match stored {
                Some(tx) if tx.raw.is_some() => {
                    if self.node.get_transaction_by_hash(tx.tx_hash).await?.is_some() {
                        continue;
                    }
                    if let Err(err) = self.sender.rebroadcast(&tx).await {
                        if !self.sender.is_superseded(&tx).await? {
                            return Err(err.into());
                        }
                        warn!(nonce = multisig.nonce, tx_hash = %tx.tx_hash, %err, "Execution nonce was taken by another transaction.");
                        self.execute(&multisig).await?;
                    } else {
                        info!(nonce = multisig.nonce, tx_hash = %tx.tx_hash, "Rebroadcast multisig execution.");
                    }
                }
                _ => {
                    self.execute(&multisig).await?;
                }
            }

            sent += 1;
            self.metrics.resent.increment(1);
        }
        Ok(sent)
    }

    /// Signs the execution of `multisig`, stores it with the multisig transaction and
    /// broadcasts it.
    async fn execute(&self, multisig: &MultisigTransaction) -> Result<EthereumTx, RelayError> {
        let gas_limit = multisig
            .params
            .safe_tx_gas
            .saturating_add(multisig.params.base_gas)
            .saturating_add(U256::from(EXEC_TX_GAS_OVERHEAD))
            .saturating_to::<u64>();
        let gas_price = self.estimator.gas_price().await?;

        let tx = self
            .sender
            .sign(
                &self.deployer,
                TxRequest::call(multisig.safe, multisig.exec_calldata(), gas_limit, gas_price),
            )
            .await?;
        if let Err(err) =
            self.storage.attach_multisig_ethereum_tx(multisig.safe, multisig.nonce, &tx).await
        {
            self.sender.release_nonce(tx.from).await;
            return Err(err.into());
        }

        self.sender.broadcast(&tx).await.inspect_err(|err| {
            error!(nonce = multisig.nonce, safe_tx_hash = %multisig.safe_tx_hash, tx_hash = %tx.tx_hash, %err, "Failed to send multisig transaction, it is sent again on the next attempt.")
        })?;
        Ok(tx)
    }

    /// The stored result of `request`, if it was relayed with `nonce` before.
    async fn relayed(
        &self,
        request: &RelayRequest,
        nonce: u64,
    ) -> Result<Option<RelayResponse>, RelayError> {
        let Some(stored) = self.storage.read_multisig_transaction(request.safe, nonce).await?
        else {
            return Ok(None);
        };
        if stored.safe_tx_hash != request.params.safe_tx_hash(request.safe, nonce) {
            return Ok(None);
        }

        Ok(stored.ethereum_tx.map(|tx_hash| RelayResponse {
            tx_hash,
            safe_tx_hash: stored.safe_tx_hash,
            nonce,
        }))
    }

    async fn relay_locked(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let safe = request.safe;
        let state = safe_state(self.node.as_ref(), safe).await?;
        self.resend_locked(safe, state.nonce).await?;

        let expected = self.storage.next_multisig_nonce(safe).await?.unwrap_or(state.nonce);
        if let Some(got) = request.nonce.filter(|got| *got != expected) {
            if let Some(response) = self.relayed(&request, got).await? {
                debug!(nonce = got, tx_hash = %response.tx_hash, "Request was relayed before.");
                return Ok(response);
            }
            self.metrics.invalid_nonce.increment(1);
            return Err(RelayError::InvalidNonce { expected, got });
        }

        let tx = MultisigTransaction::new(safe, expected, request.params, request.signatures);
        let signers = recover_signers(tx.safe_tx_hash, &tx.signatures)?;
        let valid = count_valid_signers(&signers, &state.owners);
        if (valid as u64) < state.threshold {
            self.metrics.insufficient_signatures.increment(1);
            return Err(RelayError::InsufficientSignatures { valid, threshold: state.threshold });
        }

        let tx = match self.storage.insert_multisig_transaction(tx, Some(expected)).await {
            Ok(tx) => tx,
            Err(StorageError::NonceMismatch { allocated, .. }) => {
                self.metrics.invalid_nonce.increment(1);
                return Err(RelayError::InvalidNonce { expected: allocated, got: expected });
            }
            Err(StorageError::Conflict(_)) => {
                self.metrics.invalid_nonce.increment(1);
                return Err(RelayError::InvalidNonce { expected: expected + 1, got: expected });
            }
            Err(err) => return Err(err.into()),
        };

        let ethereum_tx = self.execute(&tx).await?;

        self.metrics.relayed.increment(1);
        info!(nonce = tx.nonce, tx_hash = %ethereum_tx.tx_hash, "Relayed multisig transaction.");

        Ok(RelayResponse {
            tx_hash: ethereum_tx.tx_hash,
            safe_tx_hash: tx.safe_tx_hash,
            nonce: tx.nonce,
        })
    }
}
