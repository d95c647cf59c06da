use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An ERC20 token accepted as payment for Safe creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentToken {
    /// Token address.
    pub address: Address,
    /// Token symbol.
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
    /// Fixed price of one whole token in ETH. When set, no price feed is consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_eth_price: Option<f64>,
}

impl PaymentToken {
    /// Create a new instance of [`Self`].
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self { address, symbol: symbol.into(), decimals, fixed_eth_price: None }
    }

    /// Returns [`Self`] with a fixed ETH price.
    pub fn with_fixed_eth_price(mut self, price: f64) -> Self {
        self.fixed_eth_price = Some(price);
        self
    }
}

/// Payment tokens accepted by the relay, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<Address, PaymentToken>,
}

impl TokenRegistry {
    /// Looks up a payment token.
    pub fn get(&self, address: &Address) -> Option<&PaymentToken> {
        self.tokens.get(address)
    }

    /// All payment tokens, in address order.
    pub fn tokens(&self) -> Vec<&PaymentToken> {
        let mut tokens: Vec<_> = self.tokens.values().collect();
        tokens.sort_by_key(|token| token.address);
        tokens
    }

    /// Whether no payment token is configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<PaymentToken> for TokenRegistry {
    fn from_iter<T: IntoIterator<Item = PaymentToken>>(iter: T) -> Self {
        Self { tokens: iter.into_iter().map(|token| (token.address, token)).collect() }
    }
}
