//! External coprocessor SDK abstraction.
//!
//! On the production path the instance constructor lives in an external SDK
//! distributed from a fixed, versioned CDN location. The session manager
//! only depends on two host-supplied capabilities: an [`SdkFetcher`] that
//! materializes the SDK (the dynamic script load in the original deployment
//! target) and the [`CoprocessorSdk`] surface itself. The [`SdkLoader`]
//! wraps them with the two process-wide guarantees bootstrap needs:
//! single-flight loading and one-time initialization.
//!
//! Hosts construct their fetcher around [`SDK_CDN_URL`]; the loader itself
//! is transport-agnostic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::SessionError;
use crate::instance::FheInstance;
use crate::provider::ProviderInput;
use crate::types::{StoredPublicKey, StoredPublicParams};

/// Versioned CDN location of the relayer SDK bundle.
pub const SDK_CDN_URL: &str =
    "https://cdn.zama.ai/relayer-sdk-js/0.1.2/relayer-sdk-js.umd.cjs";

// ═══════════════════════════════════════════════════════════════════════════════
// NETWORK DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default network configuration shipped with the SDK.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub acl_contract_address: String,
    pub kms_contract_address: String,
    pub input_verifier_contract_address: String,
    pub relayer_url: String,
}

impl NetworkConfig {
    /// The Sepolia testnet deployment descriptor.
    pub fn sepolia() -> Self {
        Self {
            chain_id: 11_155_111,
            acl_contract_address: "0x687820221192C5B662b25367F70076A37bc79b6c".into(),
            kms_contract_address: "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC".into(),
            input_verifier_contract_address: "0xbc91f3daD1A5F19F8390c400196e58073B6a0BC4".into(),
            relayer_url: "https://relayer.testnet.zama.cloud".into(),
        }
    }
}

/// Configuration handed to the SDK's instance constructor: the network
/// descriptor merged with the caller's provider handle and any cached key
/// material.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub network: ProviderInput,
    pub network_config: NetworkConfig,
    pub public_key: Option<StoredPublicKey>,
    pub public_params: Option<StoredPublicParams>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SDK SURFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The loaded coprocessor SDK.
#[async_trait]
pub trait CoprocessorSdk: Send + Sync {
    /// One-time initialization routine. Callers go through
    /// [`SdkLoader::ensure_initialized`], which guarantees this runs at most
    /// once per process.
    async fn init(&self) -> Result<(), SessionError>;

    /// The SDK's default production network descriptor.
    fn default_network(&self) -> NetworkConfig;

    /// Construct an instance bound to the given configuration.
    async fn create_instance(
        &self,
        config: InstanceConfig,
    ) -> Result<Arc<dyn FheInstance>, SessionError>;
}

/// Materializes the SDK. In the original deployment target this is a
/// dynamic script load from [`SDK_CDN_URL`]; hosts supply the equivalent.
/// A fetch that yields a malformed handle should surface as
/// [`SessionError::SdkUnavailable`].
#[async_trait]
pub trait SdkFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Arc<dyn CoprocessorSdk>, SessionError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-wide SDK handle with single-flight loading and one-time init.
///
/// Concurrent `load` calls share one fetch; a failed fetch leaves the cell
/// empty so the next bootstrap attempt retries. Initialization is guarded by
/// a flag checked before the init lock is taken, mirroring the
/// check-before-init pattern the SDK global uses.
pub struct SdkLoader {
    fetcher: Arc<dyn SdkFetcher>,
    cell: OnceCell<Arc<dyn CoprocessorSdk>>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl SdkLoader {
    pub fn new(fetcher: Arc<dyn SdkFetcher>) -> Self {
        Self {
            fetcher,
            cell: OnceCell::new(),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Load the SDK, sharing any in-flight fetch. Resolves immediately when
    /// the SDK is already present.
    pub async fn load(&self) -> Result<Arc<dyn CoprocessorSdk>, SessionError> {
        let sdk = self
            .cell
            .get_or_try_init(|| async {
                debug!("fetching coprocessor SDK");
                self.fetcher.fetch().await
            })
            .await?;
        Ok(sdk.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run the SDK's init routine at most once per process. Init failure is
    /// fatal and leaves the flag unset; the caller decides whether to
    /// re-invoke.
    pub async fn ensure_initialized(
        &self,
        sdk: &Arc<dyn CoprocessorSdk>,
    ) -> Result<(), SessionError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        sdk.init().await?;
        self.initialized.store(true, Ordering::Release);
        debug!("coprocessor SDK initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::eip712::TypedDataDocument;
    use crate::instance::{EncryptedInput, UserDecryptCall};
    use crate::types::Keypair;

    struct NullInstance;

    #[async_trait]
    impl FheInstance for NullInstance {
        fn chain_id(&self) -> u64 {
            0
        }
        fn acl_address(&self) -> &str {
            "0x0000000000000000000000000000000000000000"
        }
        fn create_eip712(
            &self,
            public_key: &str,
            contract_addresses: &[String],
            start_timestamp: u64,
            duration_days: u64,
        ) -> TypedDataDocument {
            crate::eip712::user_decrypt_document(
                crate::eip712::Eip712Domain {
                    name: "Decryption".into(),
                    version: "1".into(),
                    chain_id: 0,
                    verifying_contract: "0x0000000000000000000000000000000000000000".into(),
                },
                public_key,
                contract_addresses,
                start_timestamp,
                duration_days,
            )
        }
        fn generate_keypair(&self) -> Keypair {
            crate::instance::generate_keypair()
        }
        fn public_key(&self) -> Option<StoredPublicKey> {
            None
        }
        fn public_params(&self) -> Option<StoredPublicParams> {
            None
        }
        async fn create_encrypted_input(
            &self,
            _contract_address: &str,
            _user_address: &str,
            _values: &[u128],
        ) -> Result<EncryptedInput, SessionError> {
            Err(SessionError::Instance("not implemented".into()))
        }
        async fn user_decrypt(
            &self,
            _call: UserDecryptCall,
        ) -> Result<Vec<(String, serde_json::Value)>, SessionError> {
            Err(SessionError::Instance("not implemented".into()))
        }
    }

    struct CountingSdk {
        inits: AtomicUsize,
    }

    #[async_trait]
    impl CoprocessorSdk for CountingSdk {
        async fn init(&self) -> Result<(), SessionError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn default_network(&self) -> NetworkConfig {
            NetworkConfig::sepolia()
        }
        async fn create_instance(
            &self,
            _config: InstanceConfig,
        ) -> Result<Arc<dyn FheInstance>, SessionError> {
            Ok(Arc::new(NullInstance))
        }
    }

    struct CountingFetcher {
        fetches: AtomicUsize,
        sdk: Arc<CountingSdk>,
    }

    impl CountingFetcher {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                sdk: Arc::new(CountingSdk {
                    inits: AtomicUsize::new(0),
                }),
            }
        }
    }

    #[async_trait]
    impl SdkFetcher for CountingFetcher {
        async fn fetch(&self) -> Result<Arc<dyn CoprocessorSdk>, SessionError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.sdk.clone() as Arc<dyn CoprocessorSdk>)
        }
    }

    #[test]
    fn test_cdn_url_is_pinned_and_versioned() {
        assert!(SDK_CDN_URL.starts_with("https://"));
        assert!(SDK_CDN_URL.contains("/relayer-sdk-js/0.1.2/"));
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(CountingFetcher::new());
        let loader = Arc::new(SdkLoader::new(fetcher.clone()));

        let a = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load().await })
        };
        let b = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load().await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
        assert!(loader.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_next_time() {
        struct FlakyFetcher {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl SdkFetcher for FlakyFetcher {
            async fn fetch(&self) -> Result<Arc<dyn CoprocessorSdk>, SessionError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SessionError::SdkUnavailable("script load failed".into()))
                } else {
                    Ok(Arc::new(CountingSdk {
                        inits: AtomicUsize::new(0),
                    }) as Arc<dyn CoprocessorSdk>)
                }
            }
        }

        let loader = SdkLoader::new(Arc::new(FlakyFetcher {
            calls: AtomicUsize::new(0),
        }));
        assert!(matches!(
            loader.load().await,
            Err(SessionError::SdkUnavailable(_))
        ));
        assert!(!loader.is_loaded());
        assert!(loader.load().await.is_ok());
    }

    #[tokio::test]
    async fn test_init_runs_once_under_concurrency() {
        let fetcher = Arc::new(CountingFetcher::new());
        let loader = Arc::new(SdkLoader::new(fetcher.clone()));
        let sdk = loader.load().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let loader = loader.clone();
            let sdk = sdk.clone();
            handles.push(tokio::spawn(async move {
                loader.ensure_initialized(&sdk).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fetcher.sdk.inits.load(Ordering::SeqCst), 1);
        assert!(loader.is_initialized());
    }
}
