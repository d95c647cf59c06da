//! Relay constants.

use alloy::primitives::{Address, address};
use std::time::Duration;

/// Sentinel of the Safe owner linked list. Never a valid owner.
pub const SENTINEL_OWNERS: Address = address!("0x0000000000000000000000000000000000000001");

/// Base gas of `createProxyWithNonce` including `setup`, without owners.
pub const SAFE_CREATION_BASE_GAS: u64 = 205_000;

/// Additional creation gas per owner.
pub const SAFE_CREATION_GAS_PER_OWNER: u64 = 25_000;

/// Additional creation gas when the payment is an ERC20 transfer.
pub const SAFE_CREATION_TOKEN_PAYMENT_GAS: u64 = 55_000;

/// Gas of the plain funder to deployer transfer.
pub const FUNDING_TX_GAS: u64 = 21_000;

/// Gas added on top of `safeTxGas + baseGas` for `execTransaction` itself.
pub const EXEC_TX_GAS_OVERHEAD: u64 = 75_000;

/// Key prefix of wallet leases.
pub const WALLET_LEASE_PREFIX: &str = "safe-relay:lease:wallet";

/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// Default wait for a busy lease before giving up.
pub const DEFAULT_LEASE_WAIT: Duration = Duration::from_secs(5);

/// Default poll interval while waiting for a lease.
pub const DEFAULT_LEASE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound on a single node request.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of blocks a transaction must be buried under to be confirmed.
pub const DEFAULT_CONFIRMATION_MARGIN: u64 = 6;

/// Default depth below head at which mined facts are re-verified for reorgs.
pub const DEFAULT_REORG_CHECK_DEPTH: u64 = 64;

/// Default maximum number of blocks walked per wallet in one reconciliation pass.
pub const DEFAULT_MAX_BLOCKS_PER_PASS: u64 = 500;

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(15);

/// Default gas price multiplier, in percent.
pub const DEFAULT_GAS_PRICE_MULTIPLIER: u64 = 110;
