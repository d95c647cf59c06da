//! The relay service.
//!
//! [`SafeRelay`] is the entry point of every operation the relay exposes. The RPC server is a
//! thin transport over it.

use crate::{
    address::{SafeSetup, derive, parse_checksummed},
    error::{RelayError, StorageError},
    estimation::Estimator,
    node::NodeClient,
    scheduler::WorkQueueHandle,
    sequencer::Sequencer,
    storage::{RelayStorage, StorageApi},
    types::{
        DeploymentIntent, request_key,
        rpc::{
            CreateSafeParameters, Health, RelayRequest, RelayResponse, SafeCreationEstimate,
            SafeStatusResponse,
        },
    },
    version::RELAY_SHORT_VERSION,
};
use alloy::primitives::{Address, Bytes};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The Safe contracts the relay deploys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeContracts {
    /// Proxy factory.
    pub proxy_factory: Address,
    /// Singleton the proxies delegate to.
    pub master_copy: Address,
    /// Fallback handler set up in new Safes.
    pub fallback_handler: Address,
    /// Creation code of the factory's proxies.
    pub proxy_creation_code: Bytes,
}

/// Relay accounts as seen by new intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentAccounts {
    /// Sends deployments.
    pub deployer: Address,
    /// Tops up the deployer.
    pub funder: Address,
    /// Receives the creation payments.
    pub payment_receiver: Address,
}

/// Implementation of the Safe relay.
#[derive(Debug, Clone)]
pub struct SafeRelay {
    inner: Arc<SafeRelayInner>,
}

#[derive(Debug)]
struct SafeRelayInner {
    contracts: SafeContracts,
    accounts: IntentAccounts,
    node: Arc<dyn NodeClient>,
    storage: RelayStorage,
    estimator: Estimator,
    sequencer: Sequencer,
    queue: WorkQueueHandle,
}

impl SafeRelay {
    /// Create a new Safe relay.
    pub fn new(
        contracts: SafeContracts,
        accounts: IntentAccounts,
        node: Arc<dyn NodeClient>,
        storage: RelayStorage,
        estimator: Estimator,
        sequencer: Sequencer,
        queue: WorkQueueHandle,
    ) -> Self {
        Self {
            inner: Arc::new(SafeRelayInner {
                contracts,
                accounts,
                node,
                storage,
                estimator,
                sequencer,
                queue,
            }),
        }
    }

    /// Cost of creating a Safe with `owner_count` owners paid in `payment_token`.
    pub async fn estimate(
        &self,
        owner_count: u64,
        payment_token: Option<Address>,
    ) -> Result<SafeCreationEstimate, RelayError> {
        self.inner.estimator.estimate(owner_count, payment_token).await
    }

    /// Cost of creating a Safe in every accepted payment token.
    pub async fn estimate_all(
        &self,
        owner_count: u64,
    ) -> Result<Vec<SafeCreationEstimate>, RelayError> {
        self.inner.estimator.estimate_all(owner_count).await
    }

    /// Registers a counterfactual Safe and returns its deployment intent.
    ///
    /// The same owners, threshold, salt nonce and payment token always return the intent
    /// created first, whatever the current price.
    #[instrument(skip_all, fields(owners = params.owners.len(), threshold = params.threshold))]
    pub async fn create_intent(
        &self,
        params: CreateSafeParameters,
    ) -> Result<DeploymentIntent, RelayError> {
        let CreateSafeParameters { owners, threshold, salt_nonce, payment_token } = params;
        let payment_token = payment_token.filter(|token| !token.is_zero());

        let mut setup = SafeSetup {
            owners,
            threshold,
            fallback_handler: self.inner.contracts.fallback_handler,
            payment_token: payment_token.unwrap_or_default(),
            payment: Default::default(),
            payment_receiver: self.inner.accounts.payment_receiver,
        };
        setup.validate()?;

        let key = request_key(&setup.owners, threshold, salt_nonce, payment_token);
        if let Some(intent) = self.inner.storage.read_intent_by_request(key).await? {
            debug!(safe = %intent.safe, "Returning existing intent.");
            return Ok(intent);
        }

        let estimate =
            self.inner.estimator.estimate(setup.owners.len() as u64, payment_token).await?;
        setup.payment = estimate.payment;

        let contracts = &self.inner.contracts;
        let derived = derive(
            contracts.proxy_factory,
            contracts.master_copy,
            &contracts.proxy_creation_code,
            &setup,
            salt_nonce,
        )?;

        let intent = DeploymentIntent {
            safe: derived.address,
            deployer: self.inner.accounts.deployer,
            funder: self.inner.accounts.funder,
            proxy_factory: contracts.proxy_factory,
            master_copy: contracts.master_copy,
            salt_nonce,
            owners: setup.owners,
            threshold,
            payment_token,
            payment: setup.payment,
            payment_receiver: setup.payment_receiver,
            setup_data: derived.setup_data,
            gas_estimated: estimate.gas,
            gas_price_estimated: estimate.gas_price,
            created_at: Utc::now(),
        };

        let head = self.inner.node.block_number().await?;
        match self.inner.storage.insert_intent(&intent, head).await {
            Ok(()) => {
                info!(safe = %intent.safe, payment = %intent.payment, "Created intent.");
                Ok(intent)
            }
            Err(StorageError::Conflict(reason)) => {
                warn!(safe = %intent.safe, %reason, "Intent was created concurrently.");
                if let Some(stored) = self.inner.storage.read_intent_by_request(key).await? {
                    return Ok(stored);
                }
                self.inner
                    .storage
                    .read_intent(intent.safe)
                    .await?
                    .ok_or(RelayError::NotFound(intent.safe))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The deployment intent of `safe`.
    pub async fn get_intent(&self, safe: Address) -> Result<DeploymentIntent, RelayError> {
        self.inner.storage.read_intent(safe).await?.ok_or(RelayError::NotFound(safe))
    }

    /// Lifecycle status of the Safe at the checksummed `address`.
    pub async fn get_status(&self, address: &str) -> Result<SafeStatusResponse, RelayError> {
        let safe = parse_checksummed(address)?;
        let facts = self.inner.storage.read_funding(safe).await?.ok_or(RelayError::NotFound(safe))?;
        let status =
            facts.status().map_err(|err| RelayError::from_transition(safe, err.into()))?;
        Ok(SafeStatusResponse::new(&facts, status))
    }

    /// Enqueues an out-of-band check of the Safe at the checksummed `address`.
    pub async fn force_check(&self, address: &str) -> Result<bool, RelayError> {
        let safe = parse_checksummed(address)?;
        if self.inner.storage.read_intent(safe).await?.is_none() {
            return Err(RelayError::NotFound(safe));
        }
        Ok(self.inner.queue.enqueue(safe))
    }

    /// Verifies and executes an owner-signed Safe transaction.
    pub async fn relay_transaction(
        &self,
        request: RelayRequest,
    ) -> Result<RelayResponse, RelayError> {
        self.inner.sequencer.relay(request).await
    }

    /// The nonce the next relayed transaction of `safe` gets.
    pub async fn next_nonce(&self, safe: Address) -> Result<u64, RelayError> {
        self.inner.sequencer.next_nonce(safe).await
    }

    /// Checks the node and the database.
    pub async fn health(&self) -> Result<Health, RelayError> {
        let (head, db) =
            tokio::join!(self.inner.node.block_number(), self.inner.storage.ping());
        if let Err(err) = &head {
            warn!(%err, "Node is unreachable.");
        }
        if let Err(err) = &db {
            warn!(%err, "Database is unreachable.");
        }
        if head.is_err() || db.is_err() {
            return Err(RelayError::Unhealthy);
        }

        Ok(Health { status: "healthy".into(), version: RELAY_SHORT_VERSION.into() })
    }
}
