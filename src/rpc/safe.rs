//! The `safe_` namespace.
//!
//! - `safe_estimate` and `safe_estimateAll` quote the creation of a Safe.
//! - `safe_createIntent` registers a counterfactual Safe.
//! - `safe_getStatus` and `safe_forceCheck` follow its funding and deployment.
//! - `safe_relayTransaction` executes owner-signed transactions of a deployed Safe.

use crate::{
    error::ToRpcResult,
    relay::SafeRelay,
    types::{
        DeploymentIntent,
        rpc::{
            CreateSafeParameters, EstimateParameters, Health, RelayRequest, RelayResponse,
            SafeCreationEstimate, SafeStatusResponse,
        },
    },
};
use alloy::primitives::Address;
use jsonrpsee::{
    core::{RpcResult, async_trait},
    proc_macros::rpc,
};

/// Safe relay `safe_` RPC namespace.
#[rpc(server, client, namespace = "safe")]
pub trait SafeApi {
    /// Checks the health of the relay and returns its version.
    #[method(name = "health", aliases = ["health"])]
    async fn health(&self) -> RpcResult<Health>;

    /// Estimates the cost of creating a Safe.
    #[method(name = "estimate")]
    async fn estimate(&self, parameters: EstimateParameters) -> RpcResult<SafeCreationEstimate>;

    /// Estimates the cost of creating a Safe in every accepted payment token.
    #[method(name = "estimateAll")]
    async fn estimate_all(&self, number_owners: u64) -> RpcResult<Vec<SafeCreationEstimate>>;

    /// Registers a counterfactual Safe.
    #[method(name = "createIntent")]
    async fn create_intent(
        &self,
        parameters: CreateSafeParameters,
    ) -> RpcResult<DeploymentIntent>;

    /// Returns the deployment intent of a Safe.
    #[method(name = "getIntent")]
    async fn get_intent(&self, safe: Address) -> RpcResult<DeploymentIntent>;

    /// Returns the lifecycle status of a Safe. The address must be checksummed.
    #[method(name = "getStatus")]
    async fn get_status(&self, safe: String) -> RpcResult<SafeStatusResponse>;

    /// Schedules an immediate check of a Safe. The address must be checksummed.
    #[method(name = "forceCheck")]
    async fn force_check(&self, safe: String) -> RpcResult<bool>;

    /// Verifies and executes an owner-signed Safe transaction.
    #[method(name = "relayTransaction")]
    async fn relay_transaction(&self, request: RelayRequest) -> RpcResult<RelayResponse>;

    /// Returns the nonce the next relayed transaction of a Safe must be signed with.
    #[method(name = "getNonce")]
    async fn get_nonce(&self, safe: Address) -> RpcResult<u64>;
}

#[async_trait]
impl SafeApiServer for SafeRelay {
    async fn health(&self) -> RpcResult<Health> {
        SafeRelay::health(self).await.to_rpc_result()
    }

    async fn estimate(&self, parameters: EstimateParameters) -> RpcResult<SafeCreationEstimate> {
        SafeRelay::estimate(self, parameters.number_owners, parameters.payment_token)
            .await
            .to_rpc_result()
    }

    async fn estimate_all(&self, number_owners: u64) -> RpcResult<Vec<SafeCreationEstimate>> {
        SafeRelay::estimate_all(self, number_owners).await.to_rpc_result()
    }

    async fn create_intent(
        &self,
        parameters: CreateSafeParameters,
    ) -> RpcResult<DeploymentIntent> {
        SafeRelay::create_intent(self, parameters).await.to_rpc_result()
    }

    async fn get_intent(&self, safe: Address) -> RpcResult<DeploymentIntent> {
        SafeRelay::get_intent(self, safe).await.to_rpc_result()
    }

    async fn get_status(&self, safe: String) -> RpcResult<SafeStatusResponse> {
        SafeRelay::get_status(self, &safe).await.to_rpc_result()
    }

    async fn force_check(&self, safe: String) -> RpcResult<bool> {
        SafeRelay::force_check(self, &safe).await.to_rpc_result()
    }

    async fn relay_transaction(&self, request: RelayRequest) -> RpcResult<RelayResponse> {
        SafeRelay::relay_transaction(self, request).await.to_rpc_result()
    }

    async fn get_nonce(&self, safe: Address) -> RpcResult<u64> {
        SafeRelay::next_nonce(self, safe).await.to_rpc_result()
    }
}
