use super::metrics::TransactionMetrics;
use crate::{
    error::NodeError,
    node::NodeClient,
    nonce::NonceManager,
    signers::DynSigner,
    types::EthereumTx,
};
use alloy::{
    consensus::{TxEnvelope, TxLegacy, TypedTransaction},
    network::{Ethereum, EthereumWallet, NetworkWallet},
    primitives::{Address, B256, Bytes, ChainId, TxKind, U256},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Errors that may occur while sending a transaction.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// Error occurred while signing transaction.
    #[error(transparent)]
    Sign(#[from] alloy::signers::Error),
    /// The node refused or did not answer.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// The signed envelope of the transaction is not stored.
    #[error("no signed envelope stored for transaction {0}")]
    MissingEnvelope(B256),
}

impl SignerError {
    /// Whether sending may succeed when retried later.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

/// A transaction to be signed and sent by a relay account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// Recipient.
    pub to: Address,
    /// Value in wei.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price.
    pub gas_price: u128,
}

impl TxRequest {
    /// A plain value transfer.
    pub fn transfer(to: Address, value: U256, gas_limit: u64, gas_price: u128) -> Self {
        Self { to, value, input: Bytes::new(), gas_limit, gas_price }
    }

    /// A contract call without value.
    pub fn call(to: Address, input: Bytes, gas_limit: u64, gas_price: u128) -> Self {
        Self { to, value: U256::ZERO, input, gas_limit, gas_price }
    }
}

/// Signs and broadcasts legacy EIP-155 transactions for the relay accounts.
///
/// Signing and broadcasting are separate steps, so a caller can store the signed envelope
/// before the node sees it and send the very same transaction again later.
#[derive(Debug, Clone)]
pub struct TxSender {
    node: Arc<dyn NodeClient>,
    nonces: NonceManager,
    chain_id: ChainId,
    metrics: Arc<TransactionMetrics>,
}

impl TxSender {
    /// Creates a sender for `chain_id`.
    pub fn new(node: Arc<dyn NodeClient>, chain_id: ChainId) -> Self {
        Self {
            node,
            nonces: NonceManager::default(),
            chain_id,
            metrics: Arc::new(TransactionMetrics::default()),
        }
    }

    /// Chain id transactions are signed for.
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Signs `request` with the next nonce of `signer`. Nothing is broadcast.
    ///
    /// A caller that drops the transaction unsent must [`release_nonce`](Self::release_nonce).
    #[instrument(skip_all, fields(from = %signer.address(), to = %request.to))]
    pub async fn sign(
        &self,
        signer: &DynSigner,
        request: TxRequest,
    ) -> Result<EthereumTx, SignerError> {
        let from = signer.address();
        let nonce = self.nonces.next_nonce(self.node.as_ref(), from).await?;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: request.gas_price,
            gas_limit: request.gas_limit,
            to: TxKind::Call(request.to),
            value: request.value,
            input: request.input,
        };

        let wallet = EthereumWallet::new(signer.0.clone());
        let signed: Result<TxEnvelope, _> = NetworkWallet::<Ethereum>::sign_transaction_from(
            &wallet,
            from,
            TypedTransaction::Legacy(tx),
        )
        .await;

        match signed {
            Ok(envelope) => {
                let tx = EthereumTx::from_envelope(&envelope, from);
                debug!(tx_hash = %tx.tx_hash, nonce, "Signed transaction.");
                Ok(tx)
            }
            Err(err) => {
                self.nonces.reset(from).await;
                Err(err.into())
            }
        }
    }

    /// Broadcasts a transaction returned by [`sign`](Self::sign).
    ///
    /// On failure the cached nonce of the sender is dropped, so the next transaction re-reads
    /// it from the node.
    #[instrument(skip_all, fields(tx_hash = %tx.tx_hash, nonce = tx.nonce))]
    pub async fn broadcast(&self, tx: &EthereumTx) -> Result<(), SignerError> {
        if let Err(err) = self.send_raw(tx).await {
            self.metrics.failed.increment(1);
            self.nonces.reset(tx.from).await;
            return Err(err);
        }

        self.metrics.sent.increment(1);
        debug!("Sent transaction.");
        Ok(())
    }

    /// Forgets the cached nonce of `address` after a signed transaction was dropped unsent.
    pub async fn release_nonce(&self, address: Address) {
        self.nonces.reset(address).await;
    }

    /// Whether the nonce of `tx` was taken by another transaction of its sender, so `tx` can
    /// never be mined.
    pub async fn is_superseded(&self, tx: &EthereumTx) -> Result<bool, SignerError> {
        if self.node.get_transaction_by_hash(tx.tx_hash).await?.is_some() {
            return Ok(false);
        }
        Ok(self.node.get_transaction_count(tx.from).await? > tx.nonce)
    }

    /// Broadcasts the stored envelope of a transaction again. The hash does not change.
    #[instrument(skip_all, fields(tx_hash = %tx.tx_hash))]
    pub async fn rebroadcast(&self, tx: &EthereumTx) -> Result<(), SignerError> {
        self.send_raw(tx).await?;
        self.metrics.rebroadcast.increment(1);
        debug!("Rebroadcast transaction.");
        Ok(())
    }

    async fn send_raw(&self, tx: &EthereumTx) -> Result<(), SignerError> {
        let raw = tx.raw.clone().ok_or(SignerError::MissingEnvelope(tx.tx_hash))?;
        let tx_hash = self.node.send_raw_transaction(raw).await?;
        if tx_hash != tx.tx_hash {
            warn!(expected = %tx.tx_hash, reported = %tx_hash, "Node reported another hash.");
        }
        Ok(())
    }
}
