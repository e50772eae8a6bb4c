//! Core data model for the session manager.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of classifying the target network. Derived once per bootstrap
/// attempt; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainResolution {
    /// Whether the chain id belongs to the mock/local table.
    pub is_mock: bool,
    /// The resolved chain id.
    pub chain_id: u64,
    /// RPC endpoint to use, when one is known. Production chains carry no
    /// RPC URL obligation (the SDK uses its own endpoints).
    pub rpc_url: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BOOTSTRAP STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Observable phase of one instance bootstrap run. Exactly one run owns the
/// transition sequence at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapStatus {
    Idle,
    SdkLoading,
    SdkLoaded,
    SdkInitializing,
    SdkInitialized,
    Creating,
    Ready,
    Error,
}

impl BootstrapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapStatus::Idle => "idle",
            BootstrapStatus::SdkLoading => "sdk-loading",
            BootstrapStatus::SdkLoaded => "sdk-loaded",
            BootstrapStatus::SdkInitializing => "sdk-initializing",
            BootstrapStatus::SdkInitialized => "sdk-initialized",
            BootstrapStatus::Creating => "creating",
            BootstrapStatus::Ready => "ready",
            BootstrapStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for BootstrapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEY MATERIAL
// ═══════════════════════════════════════════════════════════════════════════════

/// A cached coprocessor public key blob. Immutable once written; keyed
/// externally by the ACL contract address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPublicKey {
    /// Identifier assigned by the coprocessor to this key generation.
    pub public_key_id: String,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
}

/// A cached coprocessor public-parameters blob (one fixed bit size).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPublicParams {
    /// Identifier assigned by the coprocessor to this parameter set.
    pub public_params_id: String,
    /// Raw parameter bytes.
    pub public_params: Vec<u8>,
}

/// An asymmetric keypair used for user decryption, hex encoded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Keypair {
    pub public_key: String,
    pub private_key: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COPROCESSOR METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Deployment metadata exposed by a local dev node running the coprocessor
/// test harness. All three addresses are required for the mock path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoprocessorMetadata {
    #[serde(rename = "ACLAddress")]
    pub acl_address: String,
    #[serde(rename = "InputVerifierAddress")]
    pub input_verifier_address: String,
    #[serde(rename = "KMSVerifierAddress")]
    pub kms_verifier_address: String,
}

impl CoprocessorMetadata {
    /// Whether every address in the metadata is a well-formed hex address.
    pub fn is_well_formed(&self) -> bool {
        is_valid_address(&self.acl_address)
            && is_valid_address(&self.input_verifier_address)
            && is_valid_address(&self.kms_verifier_address)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Syntactic validation of a `0x`-prefixed 20-byte hex address.
pub fn is_valid_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
