//! Reconciliation of the local store with remote events and the issuer.
//!
//! One sync fetches pending events, stores each as an [`EventGroup`], then
//! (re-)issues every stored group. Each group's cards are written in one
//! store call, so a failure in one group never rolls back a sibling that
//! already persisted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use greenpass_core::{
    EventGroup, GreenCardStore, IssuerConfig, OriginType, Timestamp, TransportError,
};
use greenpass_cred::{IssuanceError, IssuanceProtocol};
use greenpass_vault::SecretKeyStore;
use tracing::{debug, info, warn};

use crate::clock::ClockDeviationDetector;
use crate::issuer_config::IssuerConfigStore;
use crate::transport::EventProviderClient;
use crate::HolderState;

/// Coarse outcome of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSyncerResult {
    Success,
    /// The sync went through but produced no origin of the expected type.
    MissingOrigin,
    NetworkError,
    ServerError {
        http_code: u16,
    },
    /// Malformed issuer response, missing issuer config or a local storage failure.
    IssuanceFailed(String),
}

impl From<TransportError> for DatabaseSyncerResult {
    fn from(err: TransportError) -> Self {
        match err.http_code() {
            Some(code) => DatabaseSyncerResult::ServerError { http_code: code },
            None => DatabaseSyncerResult::NetworkError,
        }
    }
}

impl From<IssuanceError> for DatabaseSyncerResult {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::Protocol(msg) => DatabaseSyncerResult::IssuanceFailed(msg),
            IssuanceError::Transport(t) => t.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncerState {
    Idle,
    Syncing,
    Finished(DatabaseSyncerResult),
}

pub struct DatabaseSyncer {
    issuer_config: Arc<IssuerConfigStore>,
    clock: Arc<ClockDeviationDetector>,
    secret_keys: Arc<SecretKeyStore>,
    store: Arc<dyn GreenCardStore>,
    events: Option<Arc<dyn EventProviderClient>>,
    issuance: Arc<IssuanceProtocol>,
    state: Mutex<SyncerState>,
    /// The holder's sync lock, shared by every syncer built on the same
    /// [`HolderState`]. A second trigger waits for the first.
    sync_lock: Arc<Mutex<()>>,
}

impl DatabaseSyncer {
    /// `events` is `None` when there is nothing pending remotely; the sync
    /// then only re-issues the stored event groups.
    pub fn new(
        state: &HolderState,
        events: Option<Arc<dyn EventProviderClient>>,
        issuance: Arc<IssuanceProtocol>,
    ) -> Self {
        Self {
            issuer_config: state.issuer_config.clone(),
            clock: state.clock.clone(),
            secret_keys: state.secret_keys.clone(),
            store: state.store.clone(),
            events,
            issuance,
            state: Mutex::new(SyncerState::Idle),
            sync_lock: state.sync_lock.clone(),
        }
    }

    pub fn state(&self) -> SyncerState {
        self.state_guard().clone()
    }

    fn state_guard(&self) -> MutexGuard<'_, SyncerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SyncerState) {
        *self.state_guard() = next;
    }

    /// Run one sync. `expected` names the origin type the caller is waiting
    /// for; `None` accepts any successful sync.
    pub fn sync(&self, expected: Option<OriginType>) -> DatabaseSyncerResult {
        let _running = self.sync_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.set_state(SyncerState::Syncing);
        let started = Timestamp::now();

        let result = self.run(expected);

        info!(
            result = ?result,
            expected = ?expected,
            elapsed_seconds = started.seconds_until(&Timestamp::now()),
            "sync finished"
        );
        self.set_state(SyncerState::Finished(result.clone()));
        result
    }

    fn run(&self, expected: Option<OriginType>) -> DatabaseSyncerResult {
        let Some(config) = self.issuer_config.current() else {
            return DatabaseSyncerResult::IssuanceFailed("no issuer configuration".into());
        };
        let secret = match self.secret_keys.get_or_create() {
            Ok(secret) => secret,
            Err(e) => return DatabaseSyncerResult::IssuanceFailed(e.to_string()),
        };

        if let Err(result) = self.fetch_pending(&config) {
            return result;
        }

        let groups = match self.store.all_event_groups() {
            Ok(groups) => groups,
            Err(e) => return DatabaseSyncerResult::IssuanceFailed(e.to_string()),
        };

        let mut produced: HashSet<OriginType> = HashSet::new();
        let mut first_failure: Option<DatabaseSyncerResult> = None;

        for group in &groups {
            match self.issue_group(secret.as_bytes(), &config, group) {
                Ok(types) => produced.extend(types),
                Err(failure) => {
                    first_failure.get_or_insert(failure);
                }
            }
        }

        if let Some(failure) = first_failure {
            return failure;
        }
        match expected {
            Some(origin_type) if !produced.contains(&origin_type) => {
                debug!(expected = %origin_type, groups = groups.len(), "expected origin not produced");
                DatabaseSyncerResult::MissingOrigin
            }
            _ => DatabaseSyncerResult::Success,
        }
    }

    /// Store every remotely pending event bundle as an event group.
    fn fetch_pending(&self, config: &IssuerConfig) -> Result<(), DatabaseSyncerResult> {
        let Some(events) = &self.events else {
            return Ok(());
        };
        let remote = events.fetch_events(config).map_err(|e| {
            warn!(error = %e, "event fetch failed");
            DatabaseSyncerResult::from(e)
        })?;

        for bundle in remote {
            let group = EventGroup::new(
                bundle.provider_identifier,
                bundle.event_type,
                bundle.max_issued_at,
                bundle.signed_payload,
            );
            let inserted = self
                .store
                .save_event_group(&group)
                .map_err(|e| DatabaseSyncerResult::IssuanceFailed(e.to_string()))?;
            if inserted {
                debug!(event_group = %group.id, provider = %group.provider_identifier, "stored event group");
            }
        }
        Ok(())
    }

    /// Issue one group and replace its cards in a single store call.
    fn issue_group(
        &self,
        secret: &[u8; 32],
        config: &IssuerConfig,
        group: &EventGroup,
    ) -> Result<Vec<OriginType>, DatabaseSyncerResult> {
        let issued = self.issuance.issue(secret, config, group).map_err(|e| {
            warn!(event_group = %group.id, error = %e, "issuance failed");
            DatabaseSyncerResult::from(e)
        })?;
        if let Some(server_time) = issued.server_time {
            self.clock.observe(server_time, Timestamp::now());
        }

        let cards = issued.cards;
        self.store
            .replace_issued_cards(&group.id, &cards)
            .map_err(|e| DatabaseSyncerResult::IssuanceFailed(e.to_string()))?;

        Ok(cards
            .iter()
            .flat_map(|card| card.origins.iter().map(|o| o.origin_type))
            .collect())
    }
}
