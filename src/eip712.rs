//! EIP-712 typed-data documents for decryption authorization.
//!
//! The coprocessor instance builds a `UserDecryptRequestVerification`
//! document that the wallet signs. The same document shape, built with a
//! zero-value public key and zeroed timestamps, also drives cache-key
//! derivation: the digest covers only the domain, the verification type and
//! the message, so a lookup before any signature exists produces the same
//! key as the record stored after signing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SessionError;

/// Primary type of the decryption-authorization request.
pub const USER_DECRYPT_TYPE: &str = "UserDecryptRequestVerification";

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT MODEL
// ═══════════════════════════════════════════════════════════════════════════════

/// EIP-712 domain separator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

/// One field of an EIP-712 struct type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Eip712Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// A complete EIP-712 typed-data document.
///
/// `types` is ordered so that serialization, and therefore the cache digest,
/// is deterministic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDocument {
    pub domain: Eip712Domain,
    pub primary_type: String,
    pub message: serde_json::Value,
    pub types: BTreeMap<String, Vec<Eip712Field>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

fn field(name: &str, field_type: &str) -> Eip712Field {
    Eip712Field {
        name: name.to_string(),
        field_type: field_type.to_string(),
    }
}

/// Build the `UserDecryptRequestVerification` document.
///
/// `contract_addresses` must already be sorted by the caller; the sorting
/// invariant lives with authorization cache-key derivation.
pub fn user_decrypt_document(
    domain: Eip712Domain,
    public_key: &str,
    contract_addresses: &[String],
    start_timestamp: u64,
    duration_days: u64,
) -> TypedDataDocument {
    let mut types = BTreeMap::new();
    types.insert(
        USER_DECRYPT_TYPE.to_string(),
        vec![
            field("publicKey", "bytes"),
            field("contractAddresses", "address[]"),
            field("startTimestamp", "uint256"),
            field("durationDays", "uint256"),
        ],
    );

    TypedDataDocument {
        domain,
        primary_type: USER_DECRYPT_TYPE.to_string(),
        message: serde_json::json!({
            "publicKey": public_key,
            "contractAddresses": contract_addresses,
            "startTimestamp": start_timestamp.to_string(),
            "durationDays": duration_days.to_string(),
        }),
        types,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE DIGEST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct DigestView<'a> {
    domain: &'a Eip712Domain,
    types: Option<&'a Vec<Eip712Field>>,
    message: &'a serde_json::Value,
}

/// Canonical digest over the document's domain, verification type and
/// message. Field order is fixed by the struct definitions, so the digest is
/// deterministic for equal documents.
pub fn cache_digest(document: &TypedDataDocument) -> Result<String, SessionError> {
    let view = DigestView {
        domain: &document.domain,
        types: document.types.get(USER_DECRYPT_TYPE),
        message: &document.message,
    };
    let bytes = serde_json::to_vec(&view)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}
