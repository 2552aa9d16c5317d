//! Greenpass holder library.
//!
//! Ties the workspace together: configuration, the shared holder state, and
//! the four flows built on it.
//!
//! - [`redeemer`]: exchange a test provider's unique code for cards
//! - [`syncer`]: fetch remote events and (re-)issue every stored event group
//! - [`dashboard`]: banner and affordance decisions over a store snapshot
//! - [`issuer_config`] / [`clock`]: the cached issuer config and the clock
//!   deviation it reports
//!
//! # Architecture
//!
//! [`HolderState`] owns the process-wide pieces (secret key, issuer config,
//! clock deviation, store) behind `Arc`s. Flows take what they need from it
//! at construction and receive their remote collaborators as trait objects.

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod issuer_config;
pub mod redeemer;
pub mod syncer;
pub mod transport;

pub use clock::ClockDeviationDetector;
pub use config::{ClockConfig, HolderConfig, IssuerSettings};
pub use dashboard::{DashboardCard, DashboardItem, DashboardPolicy};
pub use error::{RootError, RootResult};
pub use issuer_config::IssuerConfigStore;
pub use redeemer::{TestResult, TestResultRedeemer};
pub use syncer::{DatabaseSyncer, DatabaseSyncerResult, SyncerState};

use std::sync::{Arc, Mutex};

use greenpass_core::{GreenCardStore, Timestamp};
use greenpass_vault::{
    InMemoryBackend, InMemoryGreenCardStore, SecretKeyStore, SqliteBackend, SqliteGreenCardStore,
};
use tracing::info;

// ---------------------------------------------------------------------------
// Holder state
// ---------------------------------------------------------------------------

/// Process-wide holder state.
///
/// The secret key is created lazily on first use and never changes after;
/// the issuer config is swapped as a whole value. Both are safe to share
/// between flows running on different threads.
pub struct HolderState {
    pub config: HolderConfig,
    pub clock: Arc<ClockDeviationDetector>,
    pub issuer_config: Arc<IssuerConfigStore>,
    pub secret_keys: Arc<SecretKeyStore>,
    pub store: Arc<dyn GreenCardStore>,
    /// Serializes sync attempts for this holder across all syncers.
    pub sync_lock: Arc<Mutex<()>>,
}

impl HolderState {
    /// Open the on-disk state under `config.data_dir`, creating it if needed.
    pub fn open(config: HolderConfig) -> RootResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            RootError::Internal(format!(
                "failed to create data directory {}: {}",
                config.data_dir.display(),
                e
            ))
        })?;

        let db_path = config.database_path();
        let backend = Arc::new(SqliteBackend::open(&db_path)?);
        let store = Arc::new(SqliteGreenCardStore::open(&db_path)?);
        let issuer_config = IssuerConfigStore::with_cache_file(
            config.issuer_config_path(),
            config.issuer.config_ttl_seconds,
        );

        info!(
            data_dir = %config.data_dir.display(),
            cached_issuer_config = issuer_config.current().is_some(),
            "holder state opened"
        );

        Ok(Self {
            clock: Arc::new(ClockDeviationDetector::from_config(&config.clock)),
            issuer_config: Arc::new(issuer_config),
            secret_keys: Arc::new(SecretKeyStore::new(backend)),
            store,
            sync_lock: Arc::new(Mutex::new(())),
            config,
        })
    }

    /// State held entirely in memory. Nothing touches `config.data_dir`.
    pub fn in_memory(config: HolderConfig) -> Self {
        Self {
            clock: Arc::new(ClockDeviationDetector::from_config(&config.clock)),
            issuer_config: Arc::new(IssuerConfigStore::new(config.issuer.config_ttl_seconds)),
            secret_keys: Arc::new(SecretKeyStore::new(Arc::new(InMemoryBackend::new()))),
            store: Arc::new(InMemoryGreenCardStore::new()),
            sync_lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Local time shifted by the known server offset when correction is on.
    pub fn now(&self) -> Timestamp {
        self.clock.validity_now(Timestamp::now())
    }

    /// Snapshot the store into a [`DashboardPolicy`].
    pub fn dashboard(&self) -> RootResult<DashboardPolicy> {
        Ok(DashboardPolicy::new(
            self.store.all_green_cards()?,
            self.store.all_event_groups()?,
            self.clock.has_deviation(),
            self.store.has_dismissed_synced_banner()?,
        ))
    }

    pub fn dismiss_synced_banner(&self) -> RootResult<()> {
        self.store.set_dismissed_synced_banner(true)?;
        Ok(())
    }
}
