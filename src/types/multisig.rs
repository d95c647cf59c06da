use super::{ISafe, SafeTx};
use alloy::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::{Eip712Domain, SolCall, SolStruct},
};
use serde::{Deserialize, Serialize};

/// Safe operation type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Operation {
    /// Regular call.
    #[default]
    Call = 0,
    /// Delegate call.
    DelegateCall = 1,
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Call),
            1 => Ok(Self::DelegateCall),
            other => Err(format!("unsupported operation {other}")),
        }
    }
}

impl From<Operation> for u8 {
    fn from(value: Operation) -> Self {
        value as Self
    }
}

/// The owner-signed parameters of a Safe transaction, without the nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTxParams {
    /// Target.
    pub to: Address,
    /// Value sent from the Safe.
    pub value: U256,
    /// Calldata.
    #[serde(default)]
    pub data: Bytes,
    /// Operation.
    #[serde(default)]
    pub operation: Operation,
    /// Gas forwarded to the inner call.
    #[serde(default)]
    pub safe_tx_gas: U256,
    /// Gas accounted independently of the inner call.
    #[serde(default)]
    pub base_gas: U256,
    /// Gas price used for the refund.
    #[serde(default)]
    pub gas_price: U256,
    /// Refund token, zero for the native token.
    #[serde(default)]
    pub gas_token: Address,
    /// Refund receiver, zero for `tx.origin`.
    #[serde(default)]
    pub refund_receiver: Address,
}

impl SafeTxParams {
    /// The EIP-712 struct for `nonce`.
    pub fn eip712(&self, nonce: u64) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.into(),
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce: U256::from(nonce),
        }
    }

    /// The hash owners sign for `safe` at `nonce`.
    pub fn safe_tx_hash(&self, safe: Address, nonce: u64) -> B256 {
        self.eip712(nonce).eip712_signing_hash(&safe_domain(safe))
    }
}

/// EIP-712 domain of a Safe: only the verifying contract is set.
pub fn safe_domain(safe: Address) -> Eip712Domain {
    Eip712Domain { verifying_contract: Some(safe), ..Default::default() }
}

/// A multisig transaction accepted for relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigTransaction {
    /// The Safe.
    pub safe: Address,
    /// Safe nonce.
    pub nonce: u64,
    /// Signed parameters.
    #[serde(flatten)]
    pub params: SafeTxParams,
    /// Concatenated owner signatures.
    pub signatures: Bytes,
    /// EIP-712 hash of the transaction.
    pub safe_tx_hash: B256,
    /// Hash of the relayed `execTransaction`.
    #[serde(default)]
    pub ethereum_tx: Option<B256>,
}

impl MultisigTransaction {
    /// Creates the record, computing the Safe transaction hash.
    pub fn new(safe: Address, nonce: u64, params: SafeTxParams, signatures: Bytes) -> Self {
        let safe_tx_hash = params.safe_tx_hash(safe, nonce);
        Self { safe, nonce, params, signatures, safe_tx_hash, ethereum_tx: None }
    }

    /// The same transaction at another nonce. The hash is recomputed.
    pub fn with_nonce(self, nonce: u64) -> Self {
        if nonce == self.nonce {
            return self;
        }
        Self::new(self.safe, nonce, self.params, self.signatures)
    }

    /// Calldata of the `execTransaction` call on the Safe.
    pub fn exec_calldata(&self) -> Bytes {
        ISafe::execTransactionCall {
            to: self.params.to,
            value: self.params.value,
            data: self.params.data.clone(),
            operation: self.params.operation.into(),
            safeTxGas: self.params.safe_tx_gas,
            baseGas: self.params.base_gas,
            gasPrice: self.params.gas_price,
            gasToken: self.params.gas_token,
            refundReceiver: self.params.refund_receiver,
            signatures: self.signatures.clone(),
        }
        .abi_encode()
        .into()
    }
}
