//! The FHE instance capability and the mock-chain implementation.
//!
//! An instance is the opaque capability object callers use to build
//! encrypted inputs and perform authorized decryptions. Production instances
//! come from the external coprocessor SDK; mock instances are built directly
//! from a local dev node's deployment metadata and never touch the SDK or
//! the key-material cache.

use async_trait::async_trait;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::eip712::{user_decrypt_document, Eip712Domain, TypedDataDocument};
use crate::error::SessionError;
use crate::types::{is_valid_address, CoprocessorMetadata, Keypair, StoredPublicKey, StoredPublicParams};

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITY TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// A ciphertext handle bound to the contract that owns it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HandleContractPair {
    pub handle: String,
    pub contract_address: String,
}

/// Result of registering plaintext values as an encrypted input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedInput {
    /// One handle per registered value.
    pub handles: Vec<String>,
    /// Proof binding the handles to the input verifier.
    pub input_proof: String,
}

/// Everything a decrypt call needs: the authorization artifacts plus the
/// handles to resolve.
#[derive(Clone, Debug)]
pub struct UserDecryptCall {
    pub pairs: Vec<HandleContractPair>,
    pub private_key: String,
    pub public_key: String,
    pub signature: String,
    pub contract_addresses: Vec<String>,
    pub user_address: String,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

/// Opaque coprocessor instance capability.
#[async_trait]
pub trait FheInstance: Send + Sync {
    /// Chain id this instance is bound to.
    fn chain_id(&self) -> u64;

    /// ACL contract address governing decryption rights.
    fn acl_address(&self) -> &str;

    /// Build the EIP-712 decryption-authorization document for this chain.
    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> TypedDataDocument;

    /// Generate a fresh user-decryption keypair.
    fn generate_keypair(&self) -> Keypair;

    /// The instance's own public key material, when it carries any.
    fn public_key(&self) -> Option<StoredPublicKey>;

    /// The instance's own public parameters, when it carries any.
    fn public_params(&self) -> Option<StoredPublicParams>;

    /// Register plaintext values as an encrypted input for a contract call.
    async fn create_encrypted_input(
        &self,
        contract_address: &str,
        user_address: &str,
        values: &[u128],
    ) -> Result<EncryptedInput, SessionError>;

    /// Decrypt ciphertext handles under a signed authorization.
    async fn user_decrypt(
        &self,
        call: UserDecryptCall,
    ) -> Result<Vec<(String, serde_json::Value)>, SessionError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYPAIR GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Generate an x25519 user-decryption keypair, hex encoded.
pub fn generate_keypair() -> Keypair {
    let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    Keypair {
        public_key: format!("0x{}", hex::encode(public.as_bytes())),
        private_key: format!("0x{}", hex::encode(secret.to_bytes())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Instance backed directly by a local dev node's coprocessor deployment.
pub struct MockFheInstance {
    rpc_url: String,
    chain_id: u64,
    metadata: CoprocessorMetadata,
}

impl MockFheInstance {
    /// Build a mock instance from probed deployment metadata.
    pub fn create(
        rpc_url: impl Into<String>,
        chain_id: u64,
        metadata: CoprocessorMetadata,
    ) -> Result<Self, SessionError> {
        if !metadata.is_well_formed() {
            return Err(SessionError::InvalidConfig(
                "mock coprocessor metadata carries a malformed address".into(),
            ));
        }
        Ok(Self {
            rpc_url: rpc_url.into(),
            chain_id,
            metadata,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }
}

#[async_trait]
impl FheInstance for MockFheInstance {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn acl_address(&self) -> &str {
        &self.metadata.acl_address
    }

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> TypedDataDocument {
        let domain = Eip712Domain {
            name: "Decryption".into(),
            version: "1".into(),
            chain_id: self.chain_id,
            verifying_contract: self.metadata.kms_verifier_address.clone(),
        };
        user_decrypt_document(
            domain,
            public_key,
            contract_addresses,
            start_timestamp,
            duration_days,
        )
    }

    fn generate_keypair(&self) -> Keypair {
        generate_keypair()
    }

    fn public_key(&self) -> Option<StoredPublicKey> {
        // The mock path never populates the key-material cache.
        None
    }

    fn public_params(&self) -> Option<StoredPublicParams> {
        None
    }

    async fn create_encrypted_input(
        &self,
        contract_address: &str,
        user_address: &str,
        values: &[u128],
    ) -> Result<EncryptedInput, SessionError> {
        if !is_valid_address(contract_address) || !is_valid_address(user_address) {
            return Err(SessionError::Instance(
                "encrypted input requires well-formed contract and user addresses".into(),
            ));
        }

        // Deterministic handles so repeated registrations of the same values
        // resolve to the same ciphertexts on the dev node.
        let handles = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let mut hasher = Sha256::new();
                hasher.update(contract_address.as_bytes());
                hasher.update(user_address.as_bytes());
                hasher.update(index.to_be_bytes());
                hasher.update(value.to_be_bytes());
                format!("0x{}", hex::encode(hasher.finalize()))
            })
            .collect::<Vec<_>>();

        let mut proof_hasher = Sha256::new();
        proof_hasher.update(self.metadata.input_verifier_address.as_bytes());
        for handle in &handles {
            proof_hasher.update(handle.as_bytes());
        }
        let input_proof = format!("0x{}", hex::encode(proof_hasher.finalize()));

        Ok(EncryptedInput {
            handles,
            input_proof,
        })
    }

    async fn user_decrypt(
        &self,
        call: UserDecryptCall,
    ) -> Result<Vec<(String, serde_json::Value)>, SessionError> {
        let now = crate::types::unix_now();
        // Saturating so an oversized caller-supplied window cannot overflow.
        let expires = call
            .duration_days
            .saturating_mul(86_400)
            .saturating_add(call.start_timestamp);
        if now >= expires {
            return Err(SessionError::Instance(
                "decryption authorization has expired".into(),
            ));
        }
        for pair in &call.pairs {
            if !call.contract_addresses.contains(&pair.contract_address) {
                return Err(SessionError::Instance(format!(
                    "handle {} belongs to a contract outside the authorized set",
                    pair.handle
                )));
            }
        }

        // Dev-node plaintexts default to zero.
        debug!(
            rpc_url = %self.rpc_url,
            handles = call.pairs.len(),
            "mock user decrypt"
        );
        Ok(call
            .pairs
            .into_iter()
            .map(|pair| (pair.handle, serde_json::json!(0)))
            .collect())
    }
}
