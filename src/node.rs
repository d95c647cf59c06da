//! Access to the Ethereum node.
//!
//! The relay only talks to the node through [`NodeClient`], so that the engines can be driven
//! by a scripted node in tests. [`ProviderNode`] implements it over an alloy provider and bounds
//! every request with a timeout.

use crate::{
    error::NodeError,
    types::{
        CallType, ChainBlock, EthereumTx, IERC20, IProxyFactory, ISafe, InternalCall,
        TokenTransfer, TxReceipt,
    },
};
use alloy::{
    consensus::Transaction as ConsensusTransaction,
    eips::BlockNumberOrTag,
    network::TransactionResponse,
    primitives::{Address, B256, BlockNumber, Bytes, ChainId, U256},
    providers::{DynProvider, Provider},
    rpc::types::{
        Filter, Transaction as RpcTransaction, TransactionRequest,
        trace::parity::{
            Action, CallType as TraceCallType, LocalizedTransactionTrace, TraceOutput,
        },
    },
    sol_types::{SolCall, SolEvent},
};
use async_trait::async_trait;
use std::{fmt::Debug, future::Future, time::Duration};
use tracing::{trace, warn};

/// Type alias for `Result<T, NodeError>`
pub type NodeResult<T> = Result<T, NodeError>;

/// The node operations the relay depends on.
#[async_trait]
pub trait NodeClient: Debug + Send + Sync {
    /// Chain id.
    async fn chain_id(&self) -> NodeResult<ChainId>;

    /// Latest block number.
    async fn block_number(&self) -> NodeResult<BlockNumber>;

    /// Native balance at the latest block.
    async fn get_balance(&self, address: Address) -> NodeResult<U256>;

    /// Code at the latest block.
    async fn get_code(&self, address: Address) -> NodeResult<Bytes>;

    /// Transaction count including pending transactions.
    async fn get_transaction_count(&self, address: Address) -> NodeResult<u64>;

    /// Current gas price.
    async fn gas_price(&self) -> NodeResult<u128>;

    /// `eth_call` at the latest block.
    async fn call(&self, to: Address, input: Bytes) -> NodeResult<Bytes>;

    /// Broadcasts a signed EIP-2718 envelope and returns its hash.
    async fn send_raw_transaction(&self, encoded: Bytes) -> NodeResult<B256>;

    /// A transaction known to the node, pending or mined.
    async fn get_transaction_by_hash(&self, tx_hash: B256) -> NodeResult<Option<EthereumTx>>;

    /// The receipt of a mined transaction.
    async fn get_transaction_receipt(&self, tx_hash: B256) -> NodeResult<Option<TxReceipt>>;

    /// A block with its transactions and internal calls.
    async fn get_block(&self, number: BlockNumber) -> NodeResult<Option<ChainBlock>>;

    /// ERC20 `Transfer` events into `to` within `from_block..=to_block`.
    async fn get_transfer_logs(
        &self,
        to: Address,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> NodeResult<Vec<TokenTransfer>>;
}

/// ERC20 balance of `owner`.
pub async fn token_balance(
    node: &dyn NodeClient,
    token: Address,
    owner: Address,
) -> NodeResult<U256> {
    let output = node.call(token, IERC20::balanceOfCall { owner }.abi_encode().into()).await?;
    Ok(IERC20::balanceOfCall::abi_decode_returns(&output)?)
}

/// Owners, threshold and nonce of a deployed Safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeState {
    /// Owners.
    pub owners: Vec<Address>,
    /// Signature threshold.
    pub threshold: u64,
    /// Next Safe nonce.
    pub nonce: u64,
}

/// Reads owners, threshold and nonce of `safe`.
pub async fn safe_state(node: &dyn NodeClient, safe: Address) -> NodeResult<SafeState> {
    let (owners, threshold, nonce) = tokio::try_join!(
        node.call(safe, ISafe::getOwnersCall {}.abi_encode().into()),
        node.call(safe, ISafe::getThresholdCall {}.abi_encode().into()),
        node.call(safe, ISafe::nonceCall {}.abi_encode().into()),
    )?;

    Ok(SafeState {
        owners: ISafe::getOwnersCall::abi_decode_returns(&owners)?,
        threshold: ISafe::getThresholdCall::abi_decode_returns(&threshold)?.saturating_to(),
        nonce: ISafe::nonceCall::abi_decode_returns(&nonce)?.saturating_to(),
    })
}

/// Reads the proxy creation code of a proxy factory.
pub async fn proxy_creation_code(node: &dyn NodeClient, factory: Address) -> NodeResult<Bytes> {
    let output =
        node.call(factory, IProxyFactory::proxyCreationCodeCall {}.abi_encode().into()).await?;
    Ok(IProxyFactory::proxyCreationCodeCall::abi_decode_returns(&output)?)
}

/// [`NodeClient`] over an alloy provider.
#[derive(Debug, Clone)]
pub struct ProviderNode {
    provider: DynProvider,
    timeout: Duration,
}

impl ProviderNode {
    /// Creates a node client where every request is bounded by `timeout`.
    pub fn new(provider: DynProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T, E>(&self, request: impl Future<Output = Result<T, E>>) -> NodeResult<T>
    where
        E: Into<NodeError>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| NodeError::Timeout(self.timeout))?
            .map_err(Into::into)
    }

    async fn trace_block(&self, number: BlockNumber) -> NodeResult<Vec<InternalCall>> {
        let traces: Vec<LocalizedTransactionTrace> = self
            .bounded(
                self.provider
                    .raw_request("trace_block".into(), (BlockNumberOrTag::Number(number),)),
            )
            .await?;

        Ok(internal_calls(traces))
    }
}

/// Converts a mined or pending RPC transaction.
fn to_ethereum_tx(tx: &RpcTransaction) -> EthereumTx {
    EthereumTx {
        tx_hash: TransactionResponse::tx_hash(tx),
        from: TransactionResponse::from(tx),
        to: ConsensusTransaction::to(tx),
        value: ConsensusTransaction::value(tx),
        gas: ConsensusTransaction::gas_limit(tx),
        gas_price: ConsensusTransaction::gas_price(tx)
            .unwrap_or_else(|| ConsensusTransaction::max_fee_per_gas(tx)),
        data: ConsensusTransaction::input(tx).clone(),
        nonce: ConsensusTransaction::nonce(tx),
        raw: None,
        block_number: TransactionResponse::block_number(tx),
        gas_used: None,
        status: None,
    }
}

/// Extracts the internal calls of a block trace. Top-level calls are the transactions
/// themselves and are skipped.
fn internal_calls(traces: Vec<LocalizedTransactionTrace>) -> Vec<InternalCall> {
    let mut calls = Vec::new();
    let mut current: Option<B256> = None;
    let mut index = 0u32;

    for localized in traces {
        let Some(tx_hash) = localized.transaction_hash else { continue };
        if current != Some(tx_hash) {
            current = Some(tx_hash);
            index = 0;
        }
        let position = index;
        index += 1;

        let trace = localized.trace;
        if trace.trace_address.is_empty() {
            continue;
        }

        let call = match trace.action {
            Action::Call(action) => InternalCall {
                tx_hash,
                index: position,
                from: action.from,
                to: Some(action.to),
                value: action.value,
                call_type: Some(match action.call_type {
                    TraceCallType::DelegateCall => CallType::DelegateCall,
                    _ => CallType::Call,
                }),
                contract_address: None,
                error: trace.error,
            },
            Action::Create(action) => InternalCall {
                tx_hash,
                index: position,
                from: action.from,
                to: None,
                value: action.value,
                call_type: None,
                contract_address: match trace.result {
                    Some(TraceOutput::Create(output)) => Some(output.address),
                    _ => None,
                },
                error: trace.error,
            },
            _ => continue,
        };
        calls.push(call);
    }

    calls
}

#[async_trait]
impl NodeClient for ProviderNode {
    async fn chain_id(&self) -> NodeResult<ChainId> {
        self.bounded(self.provider.get_chain_id()).await
    }

    async fn block_number(&self) -> NodeResult<BlockNumber> {
        self.bounded(self.provider.get_block_number()).await
    }

    async fn get_balance(&self, address: Address) -> NodeResult<U256> {
        self.bounded(self.provider.get_balance(address).into_future()).await
    }

    async fn get_code(&self, address: Address) -> NodeResult<Bytes> {
        self.bounded(self.provider.get_code_at(address).into_future()).await
    }

    async fn get_transaction_count(&self, address: Address) -> NodeResult<u64> {
        self.bounded(self.provider.get_transaction_count(address).pending().into_future()).await
    }

    async fn gas_price(&self) -> NodeResult<u128> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn call(&self, to: Address, input: Bytes) -> NodeResult<Bytes> {
        let request =
            TransactionRequest { to: Some(to.into()), input: input.into(), ..Default::default() };
        self.bounded(self.provider.call(request).into_future()).await
    }

    async fn send_raw_transaction(&self, encoded: Bytes) -> NodeResult<B256> {
        let pending = self.bounded(self.provider.send_raw_transaction(&encoded)).await?;
        trace!(tx_hash = %pending.tx_hash(), "Broadcast transaction.");
        Ok(*pending.tx_hash())
    }

    async fn get_transaction_by_hash(&self, tx_hash: B256) -> NodeResult<Option<EthereumTx>> {
        let tx = self.bounded(self.provider.get_transaction_by_hash(tx_hash).into_future()).await?;
        Ok(tx.as_ref().map(to_ethereum_tx))
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> NodeResult<Option<TxReceipt>> {
        let receipt =
            self.bounded(self.provider.get_transaction_receipt(tx_hash).into_future()).await?;

        Ok(receipt.and_then(|receipt| {
            Some(TxReceipt {
                tx_hash: receipt.transaction_hash,
                block_number: receipt.block_number?,
                block_hash: receipt.block_hash?,
                gas_used: receipt.gas_used,
                success: receipt.status(),
            })
        }))
    }

    async fn get_block(&self, number: BlockNumber) -> NodeResult<Option<ChainBlock>> {
        let Some(block) = self
            .bounded(
                self.provider.get_block_by_number(BlockNumberOrTag::Number(number)).full().into_future(),
            )
            .await?
        else {
            return Ok(None);
        };

        let internal_calls = match self.trace_block(number).await {
            Ok(calls) => calls,
            Err(err) => {
                warn!(block = number, %err, "Failed to trace block, skipping internal calls.");
                Vec::new()
            }
        };

        Ok(Some(ChainBlock {
            number: block.header.number,
            hash: block.header.hash,
            transactions: block.transactions.txns().map(to_ethereum_tx).collect(),
            internal_calls,
        }))
    }

    async fn get_transfer_logs(
        &self,
        to: Address,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> NodeResult<Vec<TokenTransfer>> {
        let filter = Filter::new()
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
            .topic2(to.into_word())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.bounded(self.provider.get_logs(&filter)).await?;

        Ok(logs
            .into_iter()
            .filter_map(|log| {
                let decoded = log.log_decode::<IERC20::Transfer>().ok()?;
                Some(TokenTransfer {
                    tx_hash: decoded.transaction_hash?,
                    log_index: decoded.log_index?,
                    token: decoded.inner.address,
                    from: decoded.inner.data.from,
                    to: decoded.inner.data.to,
                    value: decoded.inner.data.amount,
                    block_number: decoded.block_number?,
                })
            })
            .collect())
    }
}
