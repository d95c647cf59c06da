//! Records of on-chain activity tracked by the relay.

use alloy::{
    consensus::{Transaction, TxEnvelope},
    eips::Encodable2718,
    primitives::{Address, B256, BlockNumber, Bytes, U256},
};
use serde::{Deserialize, Serialize};

/// A transaction sent by the relay or observed touching a tracked Safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumTx {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creations.
    pub to: Option<Address>,
    /// Value transferred.
    pub value: U256,
    /// Gas limit.
    pub gas: u64,
    /// Gas price, or max fee for dynamic fee transactions.
    pub gas_price: u128,
    /// Calldata.
    pub data: Bytes,
    /// Sender nonce.
    pub nonce: u64,
    /// The signed EIP-2718 envelope, kept for relay-originated transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Bytes>,
    /// Block the transaction was mined in.
    #[serde(default)]
    pub block_number: Option<BlockNumber>,
    /// Gas used once mined.
    #[serde(default)]
    pub gas_used: Option<u64>,
    /// Execution status once mined.
    #[serde(default)]
    pub status: Option<bool>,
}

impl EthereumTx {
    /// Record for a transaction signed by the relay.
    pub fn from_envelope(envelope: &TxEnvelope, from: Address) -> Self {
        Self {
            tx_hash: *envelope.tx_hash(),
            from,
            to: envelope.to(),
            value: envelope.value(),
            gas: envelope.gas_limit(),
            gas_price: envelope.gas_price().unwrap_or_else(|| envelope.max_fee_per_gas()),
            data: envelope.input().clone(),
            nonce: envelope.nonce(),
            raw: Some(envelope.encoded_2718().into()),
            block_number: None,
            gas_used: None,
            status: None,
        }
    }

    /// Applies a receipt to the record.
    pub fn with_receipt(mut self, receipt: &TxReceipt) -> Self {
        self.block_number = Some(receipt.block_number);
        self.gas_used = Some(receipt.gas_used);
        self.status = Some(receipt.success);
        self
    }

    /// Whether the transaction is known to be mined.
    pub const fn is_mined(&self) -> bool {
        self.block_number.is_some()
    }
}

/// The subset of a receipt the relay relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block number.
    pub block_number: BlockNumber,
    /// Block hash.
    pub block_hash: B256,
    /// Gas used.
    pub gas_used: u64,
    /// Whether execution succeeded.
    pub success: bool,
}

/// Kind of an internal message call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    /// `CALL`, `STATICCALL` or `CALLCODE`.
    Call,
    /// `DELEGATECALL`.
    DelegateCall,
}

/// An internal message call of a transaction, as reported by a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalCall {
    /// Parent transaction.
    pub tx_hash: B256,
    /// Position of the call inside the transaction trace.
    pub index: u32,
    /// Caller.
    pub from: Address,
    /// Callee, `None` for creations.
    pub to: Option<Address>,
    /// Value transferred.
    pub value: U256,
    /// Call type, `None` for creations.
    pub call_type: Option<CallType>,
    /// Address of the contract created by this call.
    pub contract_address: Option<Address>,
    /// Error reported for this call.
    pub error: Option<String>,
}

impl InternalCall {
    /// Whether this call touches `address`.
    pub fn touches(&self, address: Address) -> bool {
        self.from == address || self.to == Some(address) || self.contract_address == Some(address)
    }
}

/// A mined block with its transactions and internal calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainBlock {
    /// Block number.
    pub number: BlockNumber,
    /// Block hash.
    pub hash: B256,
    /// Transactions, each already carrying `block_number`.
    pub transactions: Vec<EthereumTx>,
    /// Internal calls from the block trace.
    pub internal_calls: Vec<InternalCall>,
}

/// An ERC20 `Transfer` event into a tracked Safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    /// Transaction that emitted the event.
    pub tx_hash: B256,
    /// Log index within the block.
    pub log_index: u64,
    /// Token contract.
    pub token: Address,
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount.
    pub value: U256,
    /// Block of the event.
    pub block_number: BlockNumber,
}

/// Block cursors of the reconciliation scanner for one Safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCursor {
    /// The Safe.
    pub safe: Address,
    /// Chain head when the Safe was registered.
    pub initial_block_number: BlockNumber,
    /// Last block scanned for transactions and traces.
    pub tx_block_number: BlockNumber,
    /// Last block scanned for ERC20 transfers.
    pub erc20_block_number: BlockNumber,
}

impl ScanCursor {
    /// Cursor starting at `initial_block_number`.
    pub const fn new(safe: Address, initial_block_number: BlockNumber) -> Self {
        Self {
            safe,
            initial_block_number,
            tx_block_number: initial_block_number,
            erc20_block_number: initial_block_number,
        }
    }

    /// Moves both cursors back so that `block` is scanned again. Never goes below the
    /// initial block.
    pub fn rewind_before(&mut self, block: BlockNumber) {
        let target = block.saturating_sub(1).max(self.initial_block_number);
        self.tx_block_number = self.tx_block_number.min(target);
        self.erc20_block_number = self.erc20_block_number.min(target);
    }
}
