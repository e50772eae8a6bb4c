//! End-to-end session tests: mock-path short-circuit, production bootstrap,
//! re-entrancy and cancellation discard, running against a stub JSON-RPC
//! dev node.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use fhevm_session::{
    eip712, generate_keypair, BootstrapStatus, CoprocessorSdk, EncryptedInput, FheInstance,
    FhevmSession, InstanceConfig, Keypair, MemoryStore, NetworkConfig, ProviderInput, SdkFetcher,
    SessionError, SessionOptions, StoredPublicKey, StoredPublicParams, TypedDataDocument,
    UserDecryptCall, WalletProvider,
};

// ═══════════════════════════════════════════════════════════════════════════════
// STUB DEV NODE
// ═══════════════════════════════════════════════════════════════════════════════

const HARDHAT_VERSION: &str = "HardhatNetwork/2.22.0/@nomicfoundation/ethereumjs-vm/7.0.0";
const GETH_VERSION: &str = "Geth/v1.13.0-stable/linux-amd64/go1.21.0";

fn valid_metadata() -> Value {
    serde_json::json!({
        "ACLAddress": "0x0000000000000000000000000000000000000051",
        "InputVerifierAddress": "0x0000000000000000000000000000000000000052",
        "KMSVerifierAddress": "0x0000000000000000000000000000000000000053",
    })
}

/// Spawn a one-shot JSON-RPC-over-HTTP node answering `eth_chainId`,
/// `web3_clientVersion` and the coprocessor metadata method. Returns its URL.
async fn spawn_dev_node(
    chain_id: u64,
    client_version: &'static str,
    metadata: Option<Value>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let metadata = metadata.clone();
            tokio::spawn(async move {
                let Some(request) = read_http_request(&mut socket).await else {
                    return;
                };
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let body = match method.as_str() {
                    "eth_chainId" => {
                        serde_json::json!({
                            "jsonrpc": "2.0", "id": 1,
                            "result": format!("0x{chain_id:x}"),
                        })
                    }
                    "web3_clientVersion" => {
                        serde_json::json!({
                            "jsonrpc": "2.0", "id": 1,
                            "result": client_version,
                        })
                    }
                    "fhevm_relayer_metadata" => match &metadata {
                        Some(meta) => serde_json::json!({
                            "jsonrpc": "2.0", "id": 1,
                            "result": meta,
                        }),
                        None => serde_json::json!({
                            "jsonrpc": "2.0", "id": 1,
                            "error": {"code": -32601, "message": "method not found"},
                        }),
                    },
                    _ => serde_json::json!({
                        "jsonrpc": "2.0", "id": 1,
                        "error": {"code": -32601, "message": "method not found"},
                    }),
                };
                let payload = body.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                    payload.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}/")
}

/// Read one HTTP request and parse its JSON body.
async fn read_http_request(socket: &mut tokio::net::TcpStream) -> Option<Value> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n");
        if let Some(end) = header_end {
            let headers = String::from_utf8_lossy(&buffer[..end]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())?;
            let body_start = end + 4;
            while buffer.len() < body_start + content_length {
                let n = socket.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            return serde_json::from_slice(&buffer[body_start..body_start + content_length]).ok();
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAKE SDK
// ═══════════════════════════════════════════════════════════════════════════════

struct FakeInstance {
    chain_id: u64,
    acl_address: String,
}

#[async_trait]
impl FheInstance for FakeInstance {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn acl_address(&self) -> &str {
        &self.acl_address
    }

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> TypedDataDocument {
        eip712::user_decrypt_document(
            eip712::Eip712Domain {
                name: "Decryption".into(),
                version: "1".into(),
                chain_id: self.chain_id,
                verifying_contract: self.acl_address.clone(),
            },
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
        Some(StoredPublicKey {
            public_key_id: "pk-1".into(),
            public_key: vec![0xAB; 8],
        })
    }

    fn public_params(&self) -> Option<StoredPublicParams> {
        Some(StoredPublicParams {
            public_params_id: "pp-1".into(),
            public_params: vec![0xCD; 8],
        })
    }

    async fn create_encrypted_input(
        &self,
        _contract_address: &str,
        _user_address: &str,
        values: &[u128],
    ) -> Result<EncryptedInput, SessionError> {
        Ok(EncryptedInput {
            handles: values.iter().map(|v| format!("0x{v:064x}")).collect(),
            input_proof: "0x00".into(),
        })
    }

    async fn user_decrypt(
        &self,
        call: UserDecryptCall,
    ) -> Result<Vec<(String, Value)>, SessionError> {
        Ok(call
            .pairs
            .into_iter()
            .map(|pair| (pair.handle, serde_json::json!(0)))
            .collect())
    }
}

struct FakeSdk {
    saw_cached_key: AtomicUsize,
}

#[async_trait]
impl CoprocessorSdk for FakeSdk {
    async fn init(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn default_network(&self) -> NetworkConfig {
        NetworkConfig::sepolia()
    }

    async fn create_instance(
        &self,
        config: InstanceConfig,
    ) -> Result<Arc<dyn FheInstance>, SessionError> {
        if config.public_key.is_some() {
            self.saw_cached_key.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Arc::new(FakeInstance {
            chain_id: config.network_config.chain_id,
            acl_address: config.network_config.acl_contract_address,
        }))
    }
}

struct FakeFetcher {
    fetches: AtomicUsize,
    delay: Duration,
    sdk: Arc<FakeSdk>,
}

impl FakeFetcher {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            delay,
            sdk: Arc::new(FakeSdk {
                saw_cached_key: AtomicUsize::new(0),
            }),
        })
    }
}

#[async_trait]
impl SdkFetcher for FakeFetcher {
    async fn fetch(&self) -> Result<Arc<dyn CoprocessorSdk>, SessionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.sdk.clone() as Arc<dyn CoprocessorSdk>)
    }
}

struct FixedChainProvider(u64);

#[async_trait]
impl WalletProvider for FixedChainProvider {
    async fn request(&self, method: &str, _params: Value) -> Result<Value, SessionError> {
        match method {
            "eth_chainId" => Ok(Value::String(format!("0x{:x}", self.0))),
            other => Err(SessionError::ChainProbe(format!("unexpected method {other}"))),
        }
    }
}

async fn wait_for_status(session: &FhevmSession, expected: BootstrapStatus) {
    for _ in 0..400 {
        if session.status() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for status {expected}, last seen {}",
        session.status()
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn mock_path_short_circuits_the_sdk() {
    let url = spawn_dev_node(31337, HARDHAT_VERSION, Some(valid_metadata())).await;
    let fetcher = FakeFetcher::new();
    let mut mock_chains = fhevm_session::default_mock_chains();
    mock_chains.insert(31337, url.clone());
    let session = FhevmSession::new(
        fetcher.clone(),
        MemoryStore::shared(),
        SessionOptions {
            mock_chains: Some(mock_chains),
            on_status_change: None,
        },
    );

    session.set_provider(Some(ProviderInput::Url(url)));
    wait_for_status(&session, BootstrapStatus::Ready).await;

    let instance = session.instance().unwrap();
    assert_eq!(instance.chain_id(), 31337);
    assert_eq!(
        instance.acl_address(),
        "0x0000000000000000000000000000000000000051"
    );
    // The SDK loader must never have been invoked.
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn hardhat_node_without_metadata_falls_through_to_production() {
    let url = spawn_dev_node(31337, HARDHAT_VERSION, None).await;
    let fetcher = FakeFetcher::new();
    let session = FhevmSession::new(
        fetcher.clone(),
        MemoryStore::shared(),
        SessionOptions {
            mock_chains: Some([(31337, url.clone())].into()),
            on_status_change: None,
        },
    );

    session.set_provider(Some(ProviderInput::Url(url)));
    wait_for_status(&session, BootstrapStatus::Ready).await;

    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    let instance = session.instance().unwrap();
    assert_eq!(instance.chain_id(), NetworkConfig::sepolia().chain_id);
}

#[tokio::test]
async fn non_dev_node_on_mock_chain_falls_through_to_production() {
    let url = spawn_dev_node(31337, GETH_VERSION, Some(valid_metadata())).await;
    let fetcher = FakeFetcher::new();
    let session = FhevmSession::new(
        fetcher.clone(),
        MemoryStore::shared(),
        SessionOptions {
            mock_chains: Some([(31337, url.clone())].into()),
            on_status_change: None,
        },
    );

    session.set_provider(Some(ProviderInput::Url(url)));
    wait_for_status(&session, BootstrapStatus::Ready).await;
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn production_bootstrap_emits_ordered_statuses_and_persists_keys() {
    let fetcher = FakeFetcher::new();
    let storage = MemoryStore::shared();
    let statuses: Arc<Mutex<Vec<BootstrapStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = statuses.clone();

    let session = FhevmSession::new(
        fetcher.clone(),
        storage.clone(),
        SessionOptions {
            mock_chains: None,
            on_status_change: Some(Arc::new(move |status| {
                recorder.lock().unwrap().push(status);
            })),
        },
    );

    session.set_provider(Some(ProviderInput::Handle(Arc::new(FixedChainProvider(
        11_155_111,
    )))));
    wait_for_status(&session, BootstrapStatus::Ready).await;
    // The Ready callback fires just after the status flips; let it land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let observed = statuses.lock().unwrap().clone();
    assert_eq!(
        observed,
        vec![
            BootstrapStatus::Idle,
            BootstrapStatus::SdkLoading,
            BootstrapStatus::SdkLoaded,
            BootstrapStatus::SdkInitializing,
            BootstrapStatus::SdkInitialized,
            BootstrapStatus::Creating,
            BootstrapStatus::Ready,
        ]
    );

    // The instance's key material landed in the cache tables.
    use fhevm_session::KeyValueStore;
    let acl = NetworkConfig::sepolia().acl_contract_address;
    let stored = storage
        .get_item(&format!("fhevm.publicKey.{acl}"))
        .await
        .unwrap();
    assert!(stored.is_some());
    let params = storage
        .get_item(&format!("fhevm.publicParams.{acl}"))
        .await
        .unwrap()
        .unwrap();
    assert!(params.contains("2048"));
}

#[tokio::test]
async fn second_bootstrap_receives_cached_key_material() {
    let fetcher = FakeFetcher::new();
    let storage = MemoryStore::shared();
    let session = FhevmSession::new(fetcher.clone(), storage, SessionOptions::default());

    session.set_provider(Some(ProviderInput::Handle(Arc::new(FixedChainProvider(
        11_155_111,
    )))));
    wait_for_status(&session, BootstrapStatus::Ready).await;
    assert_eq!(fetcher.sdk.saw_cached_key.load(Ordering::SeqCst), 0);

    session.refresh();
    wait_for_status(&session, BootstrapStatus::Ready).await;
    assert_eq!(fetcher.sdk.saw_cached_key.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn superseding_bootstrap_discards_the_first_attempt() {
    // Attempt A goes down the production path and stalls in the SDK fetch;
    // attempt B takes the fast mock path. Only B's outcome may be observed.
    let url = spawn_dev_node(31337, HARDHAT_VERSION, Some(valid_metadata())).await;
    let fetcher = FakeFetcher::with_delay(Duration::from_millis(200));
    let session = FhevmSession::new(
        fetcher.clone(),
        MemoryStore::shared(),
        SessionOptions {
            mock_chains: Some([(31337, url.clone())].into()),
            on_status_change: None,
        },
    );

    session.set_provider(Some(ProviderInput::Handle(Arc::new(FixedChainProvider(
        11_155_111,
    )))));
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.set_provider(Some(ProviderInput::Url(url)));
    wait_for_status(&session, BootstrapStatus::Ready).await;

    let instance = session.instance().unwrap();
    assert_eq!(instance.chain_id(), 31337);

    // Let attempt A finish its stalled fetch; it must not overwrite B.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(session.status(), BootstrapStatus::Ready);
    assert_eq!(session.instance().unwrap().chain_id(), 31337);
    assert!(session.error().is_none());
}

#[tokio::test]
async fn failed_sdk_load_surfaces_error_status() {
    struct BrokenFetcher;

    #[async_trait]
    impl SdkFetcher for BrokenFetcher {
        async fn fetch(&self) -> Result<Arc<dyn CoprocessorSdk>, SessionError> {
            Err(SessionError::SdkUnavailable("script load failed".into()))
        }
    }

    let session = FhevmSession::new(
        Arc::new(BrokenFetcher),
        MemoryStore::shared(),
        SessionOptions::default(),
    );
    session.set_provider(Some(ProviderInput::Handle(Arc::new(FixedChainProvider(
        11_155_111,
    )))));
    wait_for_status(&session, BootstrapStatus::Error).await;

    assert!(session.instance().is_none());
    let error = session.error().unwrap();
    assert!(matches!(*error, SessionError::SdkUnavailable(_)));
}
