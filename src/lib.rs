//! Client-side session manager for an FHE coprocessor.
//!
//! Applications that encrypt and decrypt values against a remote
//! homomorphic-encryption coprocessor need three coupled things handled for
//! them:
//!
//! 1. **Instance bootstrap** — building the cryptographic instance object
//!    bound to a chain, without redundant network calls, restartable when
//!    the wallet or chain changes ([`bootstrap::FhevmSession`]).
//! 2. **Key-material caching** — the coprocessor's public key and public
//!    parameters, cached per ACL contract address
//!    ([`keycache::PublicKeyCache`]).
//! 3. **Decryption authorizations** — time-bounded, wallet-signed EIP-712
//!    artifacts, cached so a user is not re-prompted on every decrypt
//!    ([`authorization::load_or_sign`]).
//!
//! Local dev nodes exposing coprocessor test metadata are detected and
//! served by a mock instance that bypasses the external SDK entirely.

pub mod authorization;
pub mod bootstrap;
pub mod cancel;
pub mod chain;
pub mod eip712;
pub mod error;
pub mod instance;
pub mod keycache;
pub mod provider;
pub mod sdk;
pub mod storage;
pub mod types;

pub use authorization::{
    authorization_cache_key, load_or_sign, DecryptionAuthorization, AUTHORIZATION_DURATION_DAYS,
};
pub use bootstrap::{FhevmSession, SessionOptions, StatusCallback};
pub use cancel::CancelToken;
pub use chain::default_mock_chains;
pub use eip712::{Eip712Domain, TypedDataDocument};
pub use error::SessionError;
pub use instance::{
    generate_keypair, EncryptedInput, FheInstance, HandleContractPair, MockFheInstance,
    UserDecryptCall,
};
pub use keycache::{CachedKeyMaterial, PublicKeyCache};
pub use provider::{ProviderInput, RpcClient, WalletProvider, WalletSigner};
pub use sdk::{CoprocessorSdk, InstanceConfig, NetworkConfig, SdkFetcher, SdkLoader, SDK_CDN_URL};
pub use storage::{KeyValueStore, MemoryStore};
pub use types::{
    BootstrapStatus, ChainResolution, CoprocessorMetadata, Keypair, StoredPublicKey,
    StoredPublicParams,
};
