//! Chain resolution and local dev-node probing.
//!
//! Classifies a target network as mock/local or production. Mock detection
//! is deliberately two-stage: a node whose client version looks like a local
//! dev node must additionally expose coprocessor deployment metadata before
//! the mock path is taken; anything less falls through to the production
//! path so a loose heuristic match degrades gracefully.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::provider::{ProviderInput, RpcClient};
use crate::types::{ChainResolution, CoprocessorMetadata};

/// Default mock-chain table: the stock local dev-node deployment.
pub fn default_mock_chains() -> HashMap<u64, String> {
    HashMap::from([(31337, "http://localhost:8545".to_string())])
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve the target chain for one bootstrap attempt.
///
/// The chain id comes either from querying a literal RPC URL or from a
/// request through the wallet handle. A chain id present in `mock_chains`
/// is classified as mock; its RPC URL is the table entry unless the caller
/// already supplied a literal URL. Network failure here is fatal — retries
/// happen by re-invoking bootstrap.
pub async fn resolve(
    provider: &ProviderInput,
    mock_chains: &HashMap<u64, String>,
) -> Result<ChainResolution, SessionError> {
    let chain_id = provider.chain_id().await?;
    let is_mock = mock_chains.contains_key(&chain_id);

    let rpc_url = match provider {
        ProviderInput::Url(url) => Some(url.clone()),
        ProviderInput::Handle(_) if is_mock => mock_chains.get(&chain_id).cloned(),
        ProviderInput::Handle(_) => None,
    };

    debug!(chain_id, is_mock, "resolved chain");
    Ok(ChainResolution {
        is_mock,
        chain_id,
        rpc_url,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEV-NODE PROBING
// ═══════════════════════════════════════════════════════════════════════════════

/// Probe an RPC endpoint for the coprocessor test harness.
///
/// Returns metadata only when the endpoint identifies itself as a local dev
/// node AND exposes well-formed coprocessor deployment metadata. Every
/// failure downgrades to `None` so the caller falls through to the
/// production path.
pub async fn probe_mock_node(rpc_url: &str) -> Option<CoprocessorMetadata> {
    let rpc = RpcClient::new(rpc_url);

    let version = match rpc.client_version().await {
        Ok(v) => v,
        Err(e) => {
            debug!(rpc_url, error = %e, "client version probe failed");
            return None;
        }
    };
    if !version.to_lowercase().contains("hardhat") {
        debug!(rpc_url, version, "endpoint is not a recognized dev node");
        return None;
    }

    let metadata = match rpc.coprocessor_metadata().await {
        Ok(m) => m,
        Err(e) => {
            debug!(rpc_url, error = %e, "coprocessor metadata probe failed");
            return None;
        }
    };
    if !metadata.is_well_formed() {
        warn!(rpc_url, "dev node returned malformed coprocessor metadata");
        return None;
    }

    debug!(rpc_url, "mock coprocessor deployment detected");
    Some(metadata)
}
