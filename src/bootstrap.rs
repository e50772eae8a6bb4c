//! Instance bootstrap state machine.
//!
//! The session object owns one bootstrap attempt at a time. Changing the
//! provider cancels any in-flight attempt and synchronously clears the
//! published instance, error and status before the new attempt starts, so
//! observers never see a stale instance attributed to new parameters. A
//! superseded attempt that completes anyway discards its result instead of
//! mutating shared state; commits are guarded by a generation counter.
//!
//! One attempt runs the sequence: resolve chain → (mock path: probe the dev
//! node and build a mock instance, skipping the SDK and the key cache
//! entirely) → load SDK → initialize SDK → validate network config → merge
//! cached key material → create instance → persist the instance's key
//! material back into the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::cancel::CancelToken;
use crate::chain;
use crate::error::SessionError;
use crate::instance::{FheInstance, MockFheInstance};
use crate::keycache::PublicKeyCache;
use crate::provider::ProviderInput;
use crate::sdk::{InstanceConfig, SdkFetcher, SdkLoader};
use crate::storage::KeyValueStore;
use crate::types::{is_valid_address, BootstrapStatus};

/// Observer notified on every status transition.
pub type StatusCallback = Arc<dyn Fn(BootstrapStatus) + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Construction options for a session.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Chain ids classified as mock/local, mapped to their RPC endpoints.
    /// `None` selects the default table.
    pub mock_chains: Option<HashMap<u64, String>>,
    /// Optional status observer.
    pub on_status_change: Option<StatusCallback>,
}

/// Client-side FHE session: the stateful bootstrap surface exposed to the
/// application.
pub struct FhevmSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    loader: Arc<SdkLoader>,
    cache: PublicKeyCache,
    mock_chains: HashMap<u64, String>,
    on_status_change: Option<StatusCallback>,
    state: Mutex<SessionState>,
}

struct SessionState {
    /// Bumped on every provider change; commits from older attempts are
    /// rejected by comparing against it.
    generation: u64,
    provider: Option<ProviderInput>,
    status: BootstrapStatus,
    instance: Option<Arc<dyn FheInstance>>,
    error: Option<Arc<SessionError>>,
    cancel: Option<CancelToken>,
}

impl FhevmSession {
    /// Create a session. No bootstrap runs until a provider is supplied via
    /// [`FhevmSession::set_provider`].
    pub fn new(
        fetcher: Arc<dyn SdkFetcher>,
        storage: Arc<dyn KeyValueStore>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                loader: Arc::new(SdkLoader::new(fetcher)),
                cache: PublicKeyCache::new(storage),
                mock_chains: options
                    .mock_chains
                    .unwrap_or_else(chain::default_mock_chains),
                on_status_change: options.on_status_change,
                state: Mutex::new(SessionState {
                    generation: 0,
                    provider: None,
                    status: BootstrapStatus::Idle,
                    instance: None,
                    error: None,
                    cancel: None,
                }),
            }),
        }
    }

    /// Change the provider input.
    ///
    /// Cancels any in-flight attempt and clears the published
    /// instance/error/status synchronously, then starts a fresh attempt if a
    /// provider is present. `None` resets to idle without starting one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_provider(&self, provider: Option<ProviderInput>) {
        let (generation, token) = {
            let mut state = self.inner.state_guard();
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.generation += 1;
            state.instance = None;
            state.error = None;
            state.status = BootstrapStatus::Idle;
            state.provider = provider.clone();

            let token = provider.as_ref().map(|_| CancelToken::new());
            state.cancel = token.clone();
            (state.generation, token)
        };

        // Observers see the reset before any status from the new attempt.
        self.inner.fire(BootstrapStatus::Idle);

        match (provider, token) {
            (Some(provider), Some(token)) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    run_attempt(inner, generation, provider, token).await;
                });
            }
            _ => debug!("session disabled; bootstrap idle"),
        }
    }

    /// Re-run bootstrap with the current provider.
    pub fn refresh(&self) {
        let provider = self.inner.state_guard().provider.clone();
        self.set_provider(provider);
    }

    /// The current instance, once a bootstrap has completed.
    pub fn instance(&self) -> Option<Arc<dyn FheInstance>> {
        self.inner.state_guard().instance.clone()
    }

    pub fn status(&self) -> BootstrapStatus {
        self.inner.state_guard().status
    }

    pub fn error(&self) -> Option<Arc<SessionError>> {
        self.inner.state_guard().error.clone()
    }
}

impl SessionInner {
    fn state_guard(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding this short-lived lock leaves no partial
        // state worth rejecting.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire(&self, status: BootstrapStatus) {
        if let Some(callback) = &self.on_status_change {
            callback(status);
        }
    }

    /// Publish a mid-attempt status transition, unless the attempt has been
    /// superseded.
    fn publish(&self, generation: u64, status: BootstrapStatus) {
        {
            let mut state = self.state_guard();
            if state.generation != generation {
                return;
            }
            state.status = status;
        }
        self.fire(status);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTEMPT EXECUTION
// ═══════════════════════════════════════════════════════════════════════════════

async fn run_attempt(
    inner: Arc<SessionInner>,
    generation: u64,
    provider: ProviderInput,
    cancel: CancelToken,
) {
    let emit = |status: BootstrapStatus| inner.publish(generation, status);

    let result = create_instance(
        &provider,
        &inner.mock_chains,
        &inner.loader,
        &inner.cache,
        &cancel,
        &emit,
    )
    .await;

    let committed = {
        let mut state = inner.state_guard();
        if state.generation != generation {
            debug!(generation, "superseded bootstrap attempt discarded");
            None
        } else {
            match result {
                Ok(instance) => {
                    state.instance = Some(instance);
                    state.error = None;
                    state.status = BootstrapStatus::Ready;
                    Some(BootstrapStatus::Ready)
                }
                Err(e) if e.is_cancellation() => {
                    // Cancelled but not superseded: nothing to publish.
                    state.status = BootstrapStatus::Idle;
                    Some(BootstrapStatus::Idle)
                }
                Err(e) => {
                    error!(error = %e, "instance bootstrap failed");
                    state.error = Some(Arc::new(e));
                    state.status = BootstrapStatus::Error;
                    Some(BootstrapStatus::Error)
                }
            }
        }
    };

    if let Some(status) = committed {
        inner.fire(status);
    }
}

/// One full bootstrap attempt.
pub(crate) async fn create_instance(
    provider: &ProviderInput,
    mock_chains: &HashMap<u64, String>,
    loader: &SdkLoader,
    cache: &PublicKeyCache,
    cancel: &CancelToken,
    emit: &(dyn Fn(BootstrapStatus) + Sync),
) -> Result<Arc<dyn FheInstance>, SessionError> {
    let resolution = chain::resolve(provider, mock_chains).await?;
    cancel.check()?;

    // Mock path: a recognized dev node with coprocessor metadata yields an
    // instance without touching the SDK or the key cache. A node that fails
    // either stage falls through to the production path.
    if resolution.is_mock {
        if let Some(rpc_url) = resolution.rpc_url.as_deref() {
            if let Some(metadata) = chain::probe_mock_node(rpc_url).await {
                cancel.check()?;
                let instance =
                    MockFheInstance::create(rpc_url, resolution.chain_id, metadata)?;
                debug!(chain_id = resolution.chain_id, "mock instance created");
                return Ok(Arc::new(instance));
            }
        }
    }

    emit(BootstrapStatus::SdkLoading);
    let sdk = loader.load().await?;
    cancel.check()?;
    emit(BootstrapStatus::SdkLoaded);

    emit(BootstrapStatus::SdkInitializing);
    loader.ensure_initialized(&sdk).await?;
    cancel.check()?;
    emit(BootstrapStatus::SdkInitialized);

    let network = sdk.default_network();
    if !is_valid_address(&network.acl_contract_address) {
        return Err(SessionError::InvalidConfig(format!(
            "ACL contract address {:?} is not a valid address",
            network.acl_contract_address
        )));
    }

    let cached = cache.get(&network.acl_contract_address).await;
    cancel.check()?;

    emit(BootstrapStatus::Creating);
    let config = InstanceConfig {
        network: provider.clone(),
        network_config: network.clone(),
        public_key: cached.public_key,
        public_params: cached.public_params,
    };
    let instance = sdk.create_instance(config).await?;

    // Best-effort persistence of the instance's own key material. This is
    // deliberately not skipped when the caller stopped waiting.
    if let Err(e) = cache
        .set(
            &network.acl_contract_address,
            instance.public_key().as_ref(),
            instance.public_params().as_ref(),
        )
        .await
    {
        warn!(error = %e, "failed to persist instance key material");
    }

    cancel.check()?;
    Ok(instance)
}
