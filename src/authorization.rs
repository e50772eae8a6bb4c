//! Decryption-authorization lifecycle.
//!
//! An authorization is a time-bounded, wallet-signed EIP-712 artifact that
//! grants the caller the right to decrypt values under a specific contract
//! set. Signing interrupts the user, so authorizations are cached in
//! persistent storage and re-loaded on later sessions; only an absent,
//! malformed or expired record triggers a fresh signature prompt.
//!
//! Cache keys depend on signer identity, the (sorted) contract set and
//! optionally a fixed public key — never on timestamps — so a lookup before
//! a signature exists and the record stored after signing share one key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::eip712::{cache_digest, TypedDataDocument};
use crate::error::SessionError;
use crate::instance::FheInstance;
use crate::provider::WalletSigner;
use crate::storage::KeyValueStore;
use crate::types::{unix_now, Keypair};

/// Validity window granted to a freshly signed authorization.
pub const AUTHORIZATION_DURATION_DAYS: u64 = 365;

/// Zero-value public key used for cache-key derivation when the caller does
/// not pin a specific keypair.
const ZERO_PUBLIC_KEY: &str = "0x";

// ═══════════════════════════════════════════════════════════════════════════════
// AUTHORIZATION RECORD
// ═══════════════════════════════════════════════════════════════════════════════

/// A signed, time-bounded decryption authorization.
///
/// `contract_addresses` is always stored sorted so cache-key derivation is
/// independent of the order the caller supplied.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptionAuthorization {
    pub public_key: String,
    pub private_key: String,
    pub signature: String,
    pub start_timestamp: u64,
    pub duration_days: u64,
    pub user_address: String,
    pub contract_addresses: Vec<String>,
    pub eip712: TypedDataDocument,
}

impl DecryptionAuthorization {
    /// Whether the authorization is still inside its validity window.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(unix_now())
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        // Saturating: cached records are untrusted, and an oversized window
        // simply never expires instead of overflowing.
        let expires = self
            .duration_days
            .saturating_mul(86_400)
            .saturating_add(self.start_timestamp);
        now < expires
    }
}

/// Two authorizations are the same artifact iff they carry the same
/// signature.
impl PartialEq for DecryptionAuthorization {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for DecryptionAuthorization {}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// Derive the storage key for a (user, contract-set, key) tuple.
///
/// The key digests the EIP-712 document built with zeroed timestamps, so it
/// is shared between lookups that precede a signature and records stored
/// after one.
pub fn authorization_cache_key(
    instance: &dyn FheInstance,
    user_address: &str,
    contract_addresses: &[String],
    public_key: Option<&str>,
) -> Result<String, SessionError> {
    let sorted = sorted_addresses(contract_addresses);
    let document = instance.create_eip712(
        public_key.unwrap_or(ZERO_PUBLIC_KEY),
        &sorted,
        0,
        0,
    );
    Ok(format!("{user_address}:{}", cache_digest(&document)?))
}

fn sorted_addresses(contract_addresses: &[String]) -> Vec<String> {
    let mut sorted = contract_addresses.to_vec();
    sorted.sort();
    sorted
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHAPE VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse an untrusted stored record. Any shape mismatch is a cache miss,
/// never an error: the cache is advisory and a bad entry only costs a
/// re-sign.
pub fn deserialize_authorization(raw: &str) -> Option<DecryptionAuthorization> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;

    for key in ["publicKey", "privateKey", "signature", "userAddress"] {
        if !object.get(key)?.is_string() {
            return None;
        }
    }
    for key in ["startTimestamp", "durationDays"] {
        if object.get(key)?.as_u64().is_none() {
            return None;
        }
    }

    let contracts = object.get("contractAddresses")?.as_array()?;
    let all_prefixed = contracts
        .iter()
        .all(|entry| entry.as_str().is_some_and(|s| s.starts_with("0x")));
    if !all_prefixed {
        return None;
    }

    let eip712 = object.get("eip712")?.as_object()?;
    for key in ["domain", "primaryType", "message", "types"] {
        if !eip712.contains_key(key) {
            return None;
        }
    }

    serde_json::from_value(value).ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOAD OR SIGN
// ═══════════════════════════════════════════════════════════════════════════════

/// Obtain a valid authorization for the contract set, loading a cached one
/// when possible and prompting the wallet to sign otherwise.
///
/// Returns `Ok(None)` when the wallet declines to sign, so callers can
/// present a retry affordance without exception handling. Storage write
/// failures are logged and swallowed: losing the cache only costs a future
/// re-sign.
pub async fn load_or_sign(
    instance: &dyn FheInstance,
    contract_addresses: &[String],
    signer: &dyn WalletSigner,
    storage: &dyn KeyValueStore,
    keypair: Option<Keypair>,
) -> Result<Option<DecryptionAuthorization>, SessionError> {
    let user_address = signer.address().await?;
    let sorted = sorted_addresses(contract_addresses);
    let key = authorization_cache_key(
        instance,
        &user_address,
        &sorted,
        keypair.as_ref().map(|kp| kp.public_key.as_str()),
    )?;

    match storage.get_item(&key).await {
        Ok(Some(raw)) => match deserialize_authorization(&raw) {
            Some(authorization) if authorization.is_valid() => {
                debug!(user = %user_address, "loaded cached decryption authorization");
                return Ok(Some(authorization));
            }
            Some(_) => debug!(user = %user_address, "cached authorization expired"),
            None => warn!(user = %user_address, "malformed cached authorization ignored"),
        },
        Ok(None) => {}
        Err(e) => warn!(user = %user_address, error = %e, "authorization cache read failed"),
    }

    let keypair = keypair.unwrap_or_else(|| instance.generate_keypair());
    let start_timestamp = unix_now();
    let document = instance.create_eip712(
        &keypair.public_key,
        &sorted,
        start_timestamp,
        AUTHORIZATION_DURATION_DAYS,
    );

    let signature = match signer.sign_typed_data(&document).await {
        Ok(signature) => signature,
        Err(e) => {
            warn!(user = %user_address, error = %e, "wallet declined decryption authorization");
            return Ok(None);
        }
    };

    let authorization = DecryptionAuthorization {
        public_key: keypair.public_key,
        private_key: keypair.private_key,
        signature,
        start_timestamp,
        duration_days: AUTHORIZATION_DURATION_DAYS,
        user_address,
        contract_addresses: sorted,
        eip712: document,
    };

    match serde_json::to_string(&authorization) {
        Ok(serialized) => {
            if let Err(e) = storage.set_item(&key, &serialized).await {
                warn!(error = %e, "failed to persist decryption authorization");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize decryption authorization"),
    }

    Ok(Some(authorization))
}
