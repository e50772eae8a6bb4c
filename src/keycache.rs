//! Public key and public-parameters cache.
//!
//! Two independent logical tables in the persistent key-value store, each
//! keyed by the ACL contract address. The cache is advisory: reads tolerate
//! corrupt or missing entries and fail closed to "absent", while writes
//! validate shape first so a malformed value is never persisted. Parameter
//! sets are versioned by the remote SDK under a logical bit-size tag, so the
//! params table nests its record under that tag.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::storage::KeyValueStore;
use crate::types::{StoredPublicKey, StoredPublicParams};

/// Bit-size tag the remote SDK versions its parameter sets under.
pub const PARAMS_BIT_SIZE: &str = "2048";

const PUBLIC_KEY_PREFIX: &str = "fhevm.publicKey.";
const PUBLIC_PARAMS_PREFIX: &str = "fhevm.publicParams.";

// ═══════════════════════════════════════════════════════════════════════════════
// STORED RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyRecord {
    public_key_id: String,
    /// Base64-encoded key bytes.
    public_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicParamsRecord {
    public_params_id: String,
    /// Base64-encoded parameter bytes.
    public_params: String,
}

/// What the cache knows about one ACL address. Either half may be absent.
#[derive(Clone, Debug, Default)]
pub struct CachedKeyMaterial {
    pub public_key: Option<StoredPublicKey>,
    pub public_params: Option<StoredPublicParams>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Advisory cache of coprocessor key material, partitioned by ACL address.
pub struct PublicKeyCache {
    store: Arc<dyn KeyValueStore>,
}

impl PublicKeyCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read cached key material. Never fails: corrupt or missing entries
    /// are reported as absent.
    pub async fn get(&self, acl_address: &str) -> CachedKeyMaterial {
        CachedKeyMaterial {
            public_key: self.read_public_key(acl_address).await,
            public_params: self.read_public_params(acl_address).await,
        }
    }

    /// Persist key material. Shape is validated before anything is written;
    /// a malformed value raises [`SessionError::InvalidKeyMaterial`].
    pub async fn set(
        &self,
        acl_address: &str,
        public_key: Option<&StoredPublicKey>,
        public_params: Option<&StoredPublicParams>,
    ) -> Result<(), SessionError> {
        if let Some(key) = public_key {
            validate_public_key(key)?;
        }
        if let Some(params) = public_params {
            validate_public_params(params)?;
        }

        if let Some(key) = public_key {
            let record = PublicKeyRecord {
                public_key_id: key.public_key_id.clone(),
                public_key: BASE64.encode(&key.public_key),
            };
            let value = serde_json::to_string(&record)?;
            self.store
                .set_item(&format!("{PUBLIC_KEY_PREFIX}{acl_address}"), &value)
                .await?;
        }

        if let Some(params) = public_params {
            let record = PublicParamsRecord {
                public_params_id: params.public_params_id.clone(),
                public_params: BASE64.encode(&params.public_params),
            };
            let table: HashMap<&str, &PublicParamsRecord> =
                HashMap::from([(PARAMS_BIT_SIZE, &record)]);
            let value = serde_json::to_string(&table)?;
            self.store
                .set_item(&format!("{PUBLIC_PARAMS_PREFIX}{acl_address}"), &value)
                .await?;
        }

        Ok(())
    }

    async fn read_public_key(&self, acl_address: &str) -> Option<StoredPublicKey> {
        let key = format!("{PUBLIC_KEY_PREFIX}{acl_address}");
        let raw = match self.store.get_item(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(acl_address, error = %e, "public key cache read failed");
                return None;
            }
        };

        let record: PublicKeyRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(acl_address, error = %e, "corrupt public key cache entry ignored");
                return None;
            }
        };
        let bytes = match BASE64.decode(&record.public_key) {
            Ok(b) => b,
            Err(e) => {
                warn!(acl_address, error = %e, "corrupt public key payload ignored");
                return None;
            }
        };
        if record.public_key_id.is_empty() || bytes.is_empty() {
            warn!(acl_address, "empty public key cache entry ignored");
            return None;
        }

        debug!(acl_address, "public key cache hit");
        Some(StoredPublicKey {
            public_key_id: record.public_key_id,
            public_key: bytes,
        })
    }

    async fn read_public_params(&self, acl_address: &str) -> Option<StoredPublicParams> {
        let key = format!("{PUBLIC_PARAMS_PREFIX}{acl_address}");
        let raw = match self.store.get_item(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(acl_address, error = %e, "params cache read failed");
                return None;
            }
        };

        let table: HashMap<String, PublicParamsRecord> = match serde_json::from_str(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!(acl_address, error = %e, "corrupt params cache entry ignored");
                return None;
            }
        };
        let record = table.get(PARAMS_BIT_SIZE)?;
        let bytes = match BASE64.decode(&record.public_params) {
            Ok(b) => b,
            Err(e) => {
                warn!(acl_address, error = %e, "corrupt params payload ignored");
                return None;
            }
        };
        if record.public_params_id.is_empty() || bytes.is_empty() {
            warn!(acl_address, "empty params cache entry ignored");
            return None;
        }

        debug!(acl_address, "params cache hit");
        Some(StoredPublicParams {
            public_params_id: record.public_params_id.clone(),
            public_params: bytes,
        })
    }
}

fn validate_public_key(key: &StoredPublicKey) -> Result<(), SessionError> {
    if key.public_key_id.is_empty() {
        return Err(SessionError::InvalidKeyMaterial(
            "public key id must be a non-empty string".into(),
        ));
    }
    if key.public_key.is_empty() {
        return Err(SessionError::InvalidKeyMaterial(
            "public key blob must be non-empty".into(),
        ));
    }
    Ok(())
}

fn validate_public_params(params: &StoredPublicParams) -> Result<(), SessionError> {
    if params.public_params_id.is_empty() {
        return Err(SessionError::InvalidKeyMaterial(
            "public params id must be a non-empty string".into(),
        ));
    }
    if params.public_params.is_empty() {
        return Err(SessionError::InvalidKeyMaterial(
            "public params blob must be non-empty".into(),
        ));
    }
    Ok(())
}
