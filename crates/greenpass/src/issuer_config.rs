//! Cached issuer configuration: public keys and the provider directory.
//!
//! The config is one immutable value behind an `Arc`. A refresh builds a
//! complete new value and swaps it in; readers holding the old `Arc` keep a
//! consistent view. When a refresh fails the stale value stays in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use greenpass_core::{IssuerConfig, Provider, Timestamp};
use tracing::{debug, info, warn};

use crate::clock::ClockDeviationDetector;
use crate::error::{RootError, RootResult};
use crate::transport::ConfigSource;

pub struct IssuerConfigStore {
    current: RwLock<Option<Arc<IssuerConfig>>>,
    cache_path: Option<PathBuf>,
    ttl_seconds: u64,
}

impl IssuerConfigStore {
    /// Store without a cache file.
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            current: RwLock::new(None),
            cache_path: None,
            ttl_seconds,
        }
    }

    /// Store backed by a JSON cache file. An unreadable cache is ignored.
    pub fn with_cache_file(path: impl Into<PathBuf>, ttl_seconds: u64) -> Self {
        let path = path.into();
        let cached = match read_cache(&path) {
            Ok(config) => config.map(Arc::new),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable issuer config cache");
                None
            }
        };
        Self {
            current: RwLock::new(cached),
            cache_path: Some(path),
            ttl_seconds,
        }
    }

    pub fn current(&self) -> Option<Arc<IssuerConfig>> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Swap in a complete new config, persisting it first when a cache file
    /// is configured. On error the previous value stays current.
    pub fn replace(&self, config: IssuerConfig) -> RootResult<Arc<IssuerConfig>> {
        if let Some(path) = &self.cache_path {
            write_cache(path, &config)?;
        }
        let config = Arc::new(config);
        let mut guard = self
            .current
            .write()
            .map_err(|e| RootError::Internal(format!("lock poisoned: {}", e)))?;
        *guard = Some(config.clone());
        Ok(config)
    }

    /// A config exists and is younger than the configured TTL at `now`.
    pub fn is_valid(&self, now: Timestamp) -> bool {
        match self.current() {
            Some(config) => now < config.fetched_at.plus_seconds(self.ttl_seconds as i64),
            None => false,
        }
    }

    pub fn provider(&self, identifier: &str) -> Option<Provider> {
        self.current()?.provider(identifier).cloned()
    }

    /// Display name of a provider, `None` if the identifier is unknown.
    pub fn provider_name(&self, identifier: &str) -> Option<String> {
        self.provider(identifier).map(|p| p.name)
    }

    /// Fetch a fresh config and swap it in. The server time in the response
    /// is fed to `clock`.
    pub fn refresh(
        &self,
        source: &dyn ConfigSource,
        clock: &ClockDeviationDetector,
        now: Timestamp,
    ) -> RootResult<Arc<IssuerConfig>> {
        let remote = match source.fetch_config() {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, stale = self.current().is_some(), "issuer config refresh failed");
                return Err(e.into());
            }
        };
        clock.observe(remote.server_time, now);

        let config = self.replace(IssuerConfig {
            public_keys: remote.public_keys,
            providers: remote.providers,
            fetched_at: now,
        })?;
        info!(
            keys = config.public_keys.len(),
            providers = config.providers.len(),
            "issuer config refreshed"
        );
        Ok(config)
    }

    /// Refresh only when the cached config is missing or stale.
    pub fn ensure_fresh(
        &self,
        source: &dyn ConfigSource,
        clock: &ClockDeviationDetector,
        now: Timestamp,
    ) -> RootResult<Arc<IssuerConfig>> {
        match self.current() {
            Some(config) if self.is_valid(now) => {
                debug!("issuer config still fresh");
                Ok(config)
            }
            _ => self.refresh(source, clock, now),
        }
    }
}

fn read_cache(path: &Path) -> RootResult<Option<IssuerConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Write to a sibling temp file, then rename over the target.
fn write_cache(path: &Path, config: &IssuerConfig) -> RootResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
