//! Wallet-provider and JSON-RPC plumbing.
//!
//! The session manager consumes two host capabilities: a wallet-provider
//! handle (`request({method, params})` in the EIP-1193 style) and a signer
//! that can produce EIP-712 signatures. A literal RPC URL can stand in for a
//! provider handle; it is wrapped in an [`RpcClient`] that speaks the raw
//! `{jsonrpc, id, method, params}` envelope over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::eip712::TypedDataDocument;
use crate::error::SessionError;
use crate::types::CoprocessorMetadata;

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// EIP-1193-style wallet-provider handle supplied by the host application.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Issue a JSON-RPC request through the wallet. At minimum
    /// `eth_chainId` must be supported.
    async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError>;
}

/// Wallet signer for typed-data authorization requests.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The signer's account address (`0x`-prefixed).
    async fn address(&self) -> Result<String, SessionError>;

    /// Sign an EIP-712 document. A user declining the prompt surfaces as
    /// [`SessionError::SigningRejected`].
    async fn sign_typed_data(&self, document: &TypedDataDocument) -> Result<String, SessionError>;
}

/// The provider input accepted by the bootstrap machine: either a live
/// wallet handle or a literal RPC URL.
#[derive(Clone)]
pub enum ProviderInput {
    Url(String),
    Handle(Arc<dyn WalletProvider>),
}

impl ProviderInput {
    /// Query the chain id through whichever transport this input carries.
    pub async fn chain_id(&self) -> Result<u64, SessionError> {
        match self {
            ProviderInput::Url(url) => RpcClient::new(url.clone()).chain_id().await,
            ProviderInput::Handle(handle) => {
                let value = handle.request("eth_chainId", Value::Array(vec![])).await?;
                parse_quantity(&value)
            }
        }
    }
}

impl std::fmt::Debug for ProviderInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderInput::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ProviderInput::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON-RPC CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Method exposed by local dev nodes running the coprocessor test harness.
pub const COPROCESSOR_METADATA_METHOD: &str = "fhevm_relayer_metadata";

/// Minimal JSON-RPC-over-HTTP client for dev-node introspection.
pub struct RpcClient {
    url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    message: String,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue a raw JSON-RPC call. Transport failures and error responses
    /// both map to [`SessionError::ChainProbe`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::ChainProbe(e.to_string()))?;

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| SessionError::ChainProbe(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(SessionError::ChainProbe(error.message));
        }

        body.result
            .ok_or_else(|| SessionError::ChainProbe("missing result in response".into()))
    }

    /// `eth_chainId`, decoded from its hex quantity encoding.
    pub async fn chain_id(&self) -> Result<u64, SessionError> {
        let value = self.call("eth_chainId", Value::Array(vec![])).await?;
        parse_quantity(&value)
    }

    /// `web3_clientVersion`.
    pub async fn client_version(&self) -> Result<String, SessionError> {
        let value = self.call("web3_clientVersion", Value::Array(vec![])).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SessionError::ChainProbe("client version is not a string".into()))
    }

    /// Coprocessor deployment metadata exposed by the dev-node harness.
    pub async fn coprocessor_metadata(&self) -> Result<CoprocessorMetadata, SessionError> {
        let value = self
            .call(COPROCESSOR_METADATA_METHOD, Value::Array(vec![]))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| SessionError::ChainProbe(format!("malformed metadata: {e}")))
    }
}

#[async_trait]
impl WalletProvider for RpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        self.call(method, params).await
    }
}

/// Decode an Ethereum JSON-RPC quantity (`"0x..."` string or bare number).
pub(crate) fn parse_quantity(value: &Value) -> Result<u64, SessionError> {
    match value {
        Value::String(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            u64::from_str_radix(digits, 16)
                .map_err(|e| SessionError::ChainProbe(format!("bad chain id {s:?}: {e}")))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| SessionError::ChainProbe(format!("bad chain id {n}"))),
        other => Err(SessionError::ChainProbe(format!(
            "unexpected chain id value: {other}"
        ))),
    }
}
