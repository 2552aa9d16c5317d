//! End-to-end holder flows against in-process fakes.
//!
//! Flow 1: redeem a test provider's unique code
//! Flow 2: sync remote events into cards
//! Flow 3: dashboard decisions over the synced store
//! Flow 4: shared process state (secret key, issuer config)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use greenpass::transport::{
    EventProviderClient, RemoteEventGroup, RemoteTestEvent, RemoteTestResult, RemoteTestStatus,
    SignedResponse, TestProviderClient,
};
use greenpass::{
    DashboardItem, DatabaseSyncer, DatabaseSyncerResult, HolderConfig, HolderState, SyncerState,
    TestResult, TestResultRedeemer,
};
use greenpass_core::{
    EventType, GreenCardType, IssuerConfig, OriginType, Provider, ServerErrorBody, Timestamp,
    TransportError,
};
use greenpass_cred::{
    is_expired, select_credential, CommitmentAttributes, IssuanceProtocol, IssueRequest,
    IssuerClient, IssuerKey, LuhnModNValidator, PrepareIssue, RemoteBlindCredential,
    RemoteDomesticGreenCard, RemoteEuGreenCard, RemoteGreenCards, RemoteOrigin, RistrettoScheme,
    ValidityAttributes,
};

const NOW: u64 = 1_700_000_000;
const HOUR: u64 = 3_600;
const TOKEN: &str = "BCFGJLQRSTUV";

static FLOW_COUNTER: AtomicU64 = AtomicU64::new(0);

fn ts(secs: u64) -> Timestamp {
    Timestamp::from_seconds(secs)
}

fn flow_config() -> HolderConfig {
    let id = FLOW_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "greenpass-flow-{}-{}",
        std::process::id(),
        id
    ));
    HolderConfig {
        data_dir: dir,
        ..HolderConfig::default()
    }
}

fn valid_code(provider: &str) -> String {
    let check = LuhnModNValidator::check_character(TOKEN).unwrap();
    format!("{}-{}-{}2", provider, TOKEN, check)
}

// ============================================================================
// Fakes
// ============================================================================

/// Issuer that signs with real keys. The origin type it issues follows the
/// payload prefix (`vac:`, `test:`, anything else is recovery).
struct FakeIssuer {
    keys: Vec<IssuerKey>,
    nonce: Vec<u8>,
    failures: Mutex<HashMap<Vec<u8>, TransportError>>,
    server_time: Mutex<Option<Timestamp>>,
    issued: AtomicUsize,
}

impl FakeIssuer {
    fn new() -> Self {
        Self {
            keys: vec![IssuerKey::generate("key-a"), IssuerKey::generate("key-b")],
            nonce: b"issuer-nonce".to_vec(),
            failures: Mutex::new(HashMap::new()),
            server_time: Mutex::new(None),
            issued: AtomicUsize::new(0),
        }
    }

    fn fail_on(&self, payload: &[u8], err: TransportError) {
        self.failures.lock().unwrap().insert(payload.to_vec(), err);
    }

    fn report_server_time(&self, time: Timestamp) {
        *self.server_time.lock().unwrap() = Some(time);
    }

    fn config(&self) -> IssuerConfig {
        IssuerConfig {
            public_keys: self.keys.iter().map(|k| k.public_key()).collect(),
            providers: vec![Provider {
                identifier: "XXX".into(),
                name: "Test Lab".into(),
                result_url: "https://lab.example/result".into(),
                public_key: Vec::new(),
            }],
            fetched_at: ts(NOW),
        }
    }
}

fn origin_for(payload: &[u8]) -> (OriginType, EventType) {
    if payload.starts_with(b"vac:") {
        (OriginType::Vaccination, EventType::Vaccination)
    } else if payload.starts_with(b"test:") {
        (OriginType::Test, EventType::NegativeTest)
    } else {
        (OriginType::Recovery, EventType::Recovery)
    }
}

impl IssuerClient for FakeIssuer {
    fn prepare_issue(&self) -> Result<PrepareIssue, TransportError> {
        Ok(PrepareIssue {
            stoken: "stoken".into(),
            nonce: self.nonce.clone(),
        })
    }

    fn issue(&self, request: &IssueRequest) -> Result<RemoteGreenCards, TransportError> {
        let payload = &request.events[0].payload;
        if let Some(err) = self.failures.lock().unwrap().get(payload) {
            return Err(err.clone());
        }
        self.issued.fetch_add(1, Ordering::SeqCst);

        let (origin_type, event_type) = origin_for(payload);
        let origin = RemoteOrigin {
            origin_type,
            event_type,
            event_time: ts(NOW - HOUR),
            valid_from: ts(NOW - HOUR),
            expiration_time: ts(NOW + 100 * HOUR),
        };
        let messages = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let validity = ValidityAttributes::new(
                    vec![origin_type],
                    ts(NOW - HOUR + 24 * HOUR * i as u64),
                    ts(NOW + 24 * HOUR * (i as u64 + 1)),
                );
                RemoteBlindCredential {
                    key_id: key.id().to_string(),
                    valid_from: validity.valid_from,
                    expiration_time: validity.expiration_time,
                    blinded: key
                        .sign_commitment(
                            &request.commitment,
                            &request.attributes,
                            &self.nonce,
                            &validity,
                        )
                        .unwrap(),
                }
            })
            .collect();

        let mut eu_certificate = b"HC1:".to_vec();
        eu_certificate.extend_from_slice(payload);
        Ok(RemoteGreenCards {
            domestic_green_card: Some(RemoteDomesticGreenCard {
                origins: vec![origin.clone()],
                create_credential_messages: messages,
            }),
            eu_green_cards: vec![RemoteEuGreenCard {
                origins: vec![origin],
                credential: eu_certificate,
            }],
            server_time: *self.server_time.lock().unwrap(),
        })
    }
}

struct FakeTestProvider {
    response: Mutex<Result<SignedResponse<RemoteTestResult>, TransportError>>,
    calls: AtomicUsize,
}

impl FakeTestProvider {
    fn returning(response: Result<SignedResponse<RemoteTestResult>, TransportError>) -> Self {
        Self {
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
        }
    }

    fn with_status(status: RemoteTestStatus) -> Self {
        Self::with_result(status, None)
    }

    fn with_result(status: RemoteTestStatus, result: Option<RemoteTestEvent>) -> Self {
        Self::returning(Ok(SignedResponse {
            raw: b"test:signed-result".to_vec(),
            model: RemoteTestResult {
                status,
                result,
                protocol_version: "2.0".into(),
            },
        }))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TestProviderClient for FakeTestProvider {
    fn fetch_test_result(
        &self,
        provider: &Provider,
        token: &str,
        _verification_code: Option<&str>,
    ) -> Result<SignedResponse<RemoteTestResult>, TransportError> {
        assert_eq!(provider.identifier, "XXX");
        assert_eq!(token, TOKEN);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

struct FakeEventProvider {
    events: Mutex<Result<Vec<RemoteEventGroup>, TransportError>>,
}

impl FakeEventProvider {
    fn new(payloads: &[&str]) -> Self {
        let events = payloads
            .iter()
            .map(|p| RemoteEventGroup {
                provider_identifier: "ggd".into(),
                event_type: origin_for(p.as_bytes()).1,
                max_issued_at: ts(NOW - HOUR),
                signed_payload: p.as_bytes().to_vec(),
            })
            .collect();
        Self {
            events: Mutex::new(Ok(events)),
        }
    }

    fn fail_with(&self, err: TransportError) {
        *self.events.lock().unwrap() = Err(err);
    }
}

impl EventProviderClient for FakeEventProvider {
    fn fetch_events(
        &self,
        _config: &IssuerConfig,
    ) -> Result<Vec<RemoteEventGroup>, TransportError> {
        self.events.lock().unwrap().clone()
    }
}

/// Event provider that takes a while to answer and records how many fetches
/// overlap.
struct SlowEventProvider {
    inner: FakeEventProvider,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowEventProvider {
    fn new(payloads: &[&str]) -> Self {
        Self {
            inner: FakeEventProvider::new(payloads),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
}

impl EventProviderClient for SlowEventProvider {
    fn fetch_events(&self, config: &IssuerConfig) -> Result<Vec<RemoteEventGroup>, TransportError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(100));
        let events = self.inner.fetch_events(config);
        self.active.fetch_sub(1, Ordering::SeqCst);
        events
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Holder {
    state: HolderState,
    issuer: Arc<FakeIssuer>,
    issuance: Arc<IssuanceProtocol>,
}

fn holder() -> Holder {
    let state = HolderState::in_memory(flow_config());
    let issuer = Arc::new(FakeIssuer::new());
    state.issuer_config.replace(issuer.config()).unwrap();
    let issuance = Arc::new(IssuanceProtocol::new(
        Arc::new(RistrettoScheme),
        issuer.clone(),
    ));
    Holder {
        state,
        issuer,
        issuance,
    }
}

impl Holder {
    fn redeemer(&self, provider: Arc<FakeTestProvider>) -> TestResultRedeemer {
        TestResultRedeemer::new(
            &self.state,
            provider,
            Arc::new(LuhnModNValidator),
            self.issuance.clone(),
        )
    }

    fn syncer(&self, events: Arc<FakeEventProvider>) -> DatabaseSyncer {
        DatabaseSyncer::new(&self.state, Some(events), self.issuance.clone())
    }
}

fn negative_test(sample: u64) -> RemoteTestEvent {
    RemoteTestEvent {
        unique: "unique-1".into(),
        sample_date: ts(sample),
        negative_result: true,
        test_type: "pcr".into(),
    }
}

// ============================================================================
// Flow 1: redeem
// ============================================================================

#[test]
fn test_malformed_codes_never_reach_network() {
    let h = holder();
    let provider = Arc::new(FakeTestProvider::with_status(RemoteTestStatus::Pending));
    let redeemer = h.redeemer(provider.clone());

    for code in [
        "",
        "XXX",
        "XXX-BCFG",
        "XXX-BCFG-B-2",
        "-BCFG-B",
        "XXX--B",
        "XXX-BCFG-",
    ] {
        assert_eq!(
            redeemer.redeem_at(code, None, ts(NOW)),
            TestResult::InvalidToken,
            "{:?}",
            code
        );
    }
    assert_eq!(provider.calls(), 0);
}

#[test]
fn test_unknown_provider_is_invalid_token() {
    let h = holder();
    let provider = Arc::new(FakeTestProvider::with_status(RemoteTestStatus::Pending));
    let redeemer = h.redeemer(provider.clone());
    assert_eq!(
        redeemer.redeem_at(&valid_code("ZZZ"), None, ts(NOW)),
        TestResult::InvalidToken
    );
    assert_eq!(provider.calls(), 0);
}

#[test]
fn test_checksum_failure_is_invalid_token() {
    let h = holder();
    let provider = Arc::new(FakeTestProvider::with_status(RemoteTestStatus::Pending));
    let redeemer = h.redeemer(provider.clone());

    let check = LuhnModNValidator::check_character(TOKEN).unwrap();
    let wrong = if check == 'B' { 'C' } else { 'B' };
    let code = format!("XXX-{}-{}2", TOKEN, wrong);
    assert_eq!(
        redeemer.redeem_at(&code, None, ts(NOW)),
        TestResult::InvalidToken
    );
    assert_eq!(provider.calls(), 0);
}

#[test]
fn test_status_classification() {
    let h = holder();
    let cases = [
        (RemoteTestStatus::Pending, TestResult::Pending),
        (
            RemoteTestStatus::VerificationRequired,
            TestResult::VerificationRequired,
        ),
        (RemoteTestStatus::InvalidToken, TestResult::InvalidToken),
        (RemoteTestStatus::Unknown, TestResult::InvalidToken),
        (RemoteTestStatus::Complete, TestResult::NoNegativeTestResult),
    ];
    for (status, expected) in cases {
        let provider = Arc::new(FakeTestProvider::with_status(status));
        let redeemer = h.redeemer(provider.clone());
        assert_eq!(
            redeemer.redeem_at(&valid_code("XXX"), Some("123456"), ts(NOW)),
            expected
        );
        assert_eq!(provider.calls(), 1);
    }
}

#[test]
fn test_positive_result_is_not_negative() {
    let h = holder();
    let mut event = negative_test(NOW - HOUR);
    event.negative_result = false;
    let provider = Arc::new(FakeTestProvider::with_result(
        RemoteTestStatus::Complete,
        Some(event),
    ));
    assert_eq!(
        h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW)),
        TestResult::NoNegativeTestResult
    );
    assert!(h.state.store.all_green_cards().unwrap().is_empty());
}

#[test]
fn test_stale_or_future_sample_is_not_negative() {
    let h = holder();
    let hours = h.state.config.issuer.test_validity_hours;
    for sample in [NOW - hours * HOUR, NOW + HOUR] {
        let provider = Arc::new(FakeTestProvider::with_result(
            RemoteTestStatus::Complete,
            Some(negative_test(sample)),
        ));
        assert_eq!(
            h.redeemer(provider)
                .redeem_at(&valid_code("XXX"), None, ts(NOW)),
            TestResult::NoNegativeTestResult,
            "sample {}",
            sample
        );
    }
}

#[test]
fn test_transport_failures_classified() {
    let h = holder();

    let provider = Arc::new(FakeTestProvider::returning(Err(TransportError::Network(
        "connection refused".into(),
    ))));
    assert_eq!(
        h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW)),
        TestResult::NetworkError
    );

    let provider = Arc::new(FakeTestProvider::returning(Err(TransportError::Http(502))));
    assert_eq!(
        h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW)),
        TestResult::ServerError {
            http_code: 502,
            error: None
        }
    );

    let body = ServerErrorBody {
        status: "error".into(),
        code: 99_857,
    };
    let provider = Arc::new(FakeTestProvider::returning(Err(TransportError::Server {
        code: 400,
        body: body.clone(),
    })));
    assert_eq!(
        h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW)),
        TestResult::ServerError {
            http_code: 400,
            error: Some(body)
        }
    );
}

#[test]
fn test_negative_result_issues_and_persists_cards() {
    let h = holder();
    let provider = Arc::new(FakeTestProvider::with_result(
        RemoteTestStatus::Complete,
        Some(negative_test(NOW - HOUR)),
    ));

    let outcome = h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW));
    let (result, cards) = match outcome {
        TestResult::NegativeTestResult { result, cards } => (result, cards),
        other => panic!("expected a negative test result, got {:?}", other),
    };
    assert_eq!(result.sample_date, ts(NOW - HOUR));
    assert_eq!(cards.len(), 2);

    let groups = h.state.store.all_event_groups().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].event_type, EventType::NegativeTest);
    assert_eq!(groups[0].provider_identifier, "XXX");
    assert_eq!(groups[0].signed_payload, b"test:signed-result".to_vec());

    let stored = h.state.store.all_green_cards().unwrap();
    assert_eq!(stored.len(), 2);
    let domestic = stored
        .iter()
        .find(|c| c.card_type == GreenCardType::Domestic)
        .unwrap();
    assert!(domestic.has_origin_type(OriginType::Test));
    let selected = select_credential(domestic, ts(NOW)).unwrap();
    assert!(h.issuer.keys[0].verify_credential(
        &selected.data,
        &CommitmentAttributes::for_group(&groups[0]),
        &ValidityAttributes::new(
            vec![OriginType::Test],
            selected.valid_from,
            selected.expiration_time
        )
    ));
    assert!(!is_expired(domestic, ts(NOW)));
}

#[test]
fn test_failed_issuance_leaves_store_untouched() {
    let h = holder();
    h.issuer.fail_on(
        b"test:signed-result",
        TransportError::Network("reset".into()),
    );
    let provider = Arc::new(FakeTestProvider::with_result(
        RemoteTestStatus::Complete,
        Some(negative_test(NOW - HOUR)),
    ));
    assert_eq!(
        h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW)),
        TestResult::NetworkError
    );
    assert!(h.state.store.all_event_groups().unwrap().is_empty());
    assert!(h.state.store.all_green_cards().unwrap().is_empty());
}

// ============================================================================
// Flow 2: sync
// ============================================================================

#[test]
fn test_sync_is_idempotent() {
    let h = holder();
    let events = Arc::new(FakeEventProvider::new(&["vac:dose-1", "vac:dose-2"]));
    let syncer = h.syncer(events);
    assert_eq!(syncer.state(), SyncerState::Idle);

    assert_eq!(
        syncer.sync(Some(OriginType::Vaccination)),
        DatabaseSyncerResult::Success
    );
    let first = h.state.store.all_green_cards().unwrap();

    assert_eq!(
        syncer.sync(Some(OriginType::Vaccination)),
        DatabaseSyncerResult::Success
    );
    let second = h.state.store.all_green_cards().unwrap();

    assert_eq!(first, second);
    assert_eq!(h.state.store.all_event_groups().unwrap().len(), 2);
    // One domestic vaccination card plus one EU card per dose.
    assert_eq!(second.len(), 3);
    let domestic = second
        .iter()
        .find(|c| c.card_type == GreenCardType::Domestic)
        .unwrap();
    assert_eq!(domestic.origins.len(), 2);
    assert_eq!(domestic.credentials.len(), 4);
    assert_eq!(
        syncer.state(),
        SyncerState::Finished(DatabaseSyncerResult::Success)
    );
}

#[test]
fn test_sync_credentials_bound_to_origin_type() {
    let h = holder();
    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1", "test:pcr-1"])))
        .sync(None);

    let cards = h.state.store.all_green_cards().unwrap();
    let mut domestic = cards
        .iter()
        .filter(|c| c.card_type == GreenCardType::Domestic);
    let vaccination = domestic
        .clone()
        .find(|c| c.has_origin_type(OriginType::Vaccination))
        .unwrap();
    let test = domestic
        .find(|c| c.has_origin_type(OriginType::Test))
        .unwrap();
    assert_ne!(vaccination.credentials[0].data, test.credentials[0].data);

    let groups = h.state.store.all_event_groups().unwrap();
    let test_group = groups
        .iter()
        .find(|g| g.event_type == EventType::NegativeTest)
        .unwrap();
    let credential = &test.credentials[0];
    let as_test = ValidityAttributes::new(
        vec![OriginType::Test],
        credential.valid_from,
        credential.expiration_time,
    );
    let as_vaccination = ValidityAttributes::new(
        vec![OriginType::Vaccination],
        credential.valid_from,
        credential.expiration_time,
    );
    let attrs = CommitmentAttributes::for_group(test_group);
    assert!(h.issuer.keys[0].verify_credential(&credential.data, &attrs, &as_test));
    assert!(!h.issuer.keys[0].verify_credential(&credential.data, &attrs, &as_vaccination));
}

#[test]
fn test_syncers_for_one_holder_never_overlap() {
    let h = holder();
    let events = Arc::new(SlowEventProvider::new(&["vac:dose-1"]));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let syncer = DatabaseSyncer::new(&h.state, Some(events.clone()), h.issuance.clone());
            std::thread::spawn(move || syncer.sync(None))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), DatabaseSyncerResult::Success);
    }

    assert_eq!(events.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.store.all_event_groups().unwrap().len(), 1);
}

#[test]
fn test_sync_observes_issuer_server_time() {
    let h = holder();
    assert!(!h.state.clock.has_deviation());
    let local = Timestamp::now();
    h.issuer.report_server_time(local.plus_hours(2));

    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1"])))
        .sync(None);
    assert!(h.state.clock.has_deviation());
    assert!(h.state.clock.server_offset_seconds() > HOUR as i64);
}

#[test]
fn test_redeem_observes_issuer_server_time() {
    let h = holder();
    h.issuer.report_server_time(Timestamp::now().plus_hours(-3));
    let provider = Arc::new(FakeTestProvider::with_result(
        RemoteTestStatus::Complete,
        Some(negative_test(NOW - HOUR)),
    ));
    let outcome = h.redeemer(provider).redeem_at(&valid_code("XXX"), None, ts(NOW));
    assert!(matches!(outcome, TestResult::NegativeTestResult { .. }));
    assert!(h.state.clock.has_deviation());
    assert!(h.state.clock.server_offset_seconds() < -(2 * HOUR as i64));
}

#[test]
fn test_sync_reports_missing_origin() {
    let h = holder();
    let syncer = h.syncer(Arc::new(FakeEventProvider::new(&["rec:positive"])));
    assert_eq!(
        syncer.sync(Some(OriginType::Vaccination)),
        DatabaseSyncerResult::MissingOrigin
    );
    assert_eq!(h.state.store.all_green_cards().unwrap().len(), 2);
    assert_eq!(syncer.sync(None), DatabaseSyncerResult::Success);
}

#[test]
fn test_sync_fetch_failure_is_terminal() {
    let h = holder();
    let events = Arc::new(FakeEventProvider::new(&["vac:dose-1"]));
    events.fail_with(TransportError::Http(503));
    let syncer = h.syncer(events);
    assert_eq!(
        syncer.sync(Some(OriginType::Vaccination)),
        DatabaseSyncerResult::ServerError { http_code: 503 }
    );
    assert_eq!(h.issuer.issued.load(Ordering::SeqCst), 0);
    assert!(h.state.store.all_event_groups().unwrap().is_empty());
}

#[test]
fn test_sync_failure_keeps_sibling_groups() {
    let h = holder();
    h.issuer
        .fail_on(b"vac:dose-2", TransportError::Network("timeout".into()));
    let syncer = h.syncer(Arc::new(FakeEventProvider::new(&[
        "vac:dose-1",
        "vac:dose-2",
        "test:pcr",
    ])));

    assert_eq!(
        syncer.sync(Some(OriginType::Vaccination)),
        DatabaseSyncerResult::NetworkError
    );

    let cards = h.state.store.all_green_cards().unwrap();
    let eu: Vec<_> = cards
        .iter()
        .filter(|c| c.card_type == GreenCardType::Eu)
        .collect();
    assert_eq!(eu.len(), 2);
    assert!(cards
        .iter()
        .any(|c| c.card_type == GreenCardType::Domestic && c.has_origin_type(OriginType::Test)));
    assert_eq!(h.state.store.all_event_groups().unwrap().len(), 3);
}

#[test]
fn test_sync_without_event_provider_reissues_stored_groups() {
    let h = holder();
    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1"])))
        .sync(None);
    let before = h.state.store.all_green_cards().unwrap();

    let reissue = DatabaseSyncer::new(&h.state, None, h.issuance.clone());
    assert_eq!(
        reissue.sync(Some(OriginType::Vaccination)),
        DatabaseSyncerResult::Success
    );
    assert_eq!(h.state.store.all_green_cards().unwrap(), before);
}

#[test]
fn test_removed_event_group_takes_its_cards() {
    let h = holder();
    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1", "test:pcr"])))
        .sync(None);
    let test_group = h
        .state
        .store
        .all_event_groups()
        .unwrap()
        .into_iter()
        .find(|g| g.event_type == EventType::NegativeTest)
        .unwrap();

    assert!(h.state.store.remove_event_group(&test_group.id).unwrap());
    let cards = h.state.store.all_green_cards().unwrap();
    assert_eq!(cards.len(), 2);
    assert!(cards.iter().all(|c| !c.has_origin_type(OriginType::Test)));
}

// ============================================================================
// Flow 3: dashboard
// ============================================================================

#[test]
fn test_dashboard_after_sync() {
    let h = holder();
    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1", "vac:dose-2"])))
        .sync(None);

    let items = h.state.dashboard().unwrap().items(ts(NOW));
    assert_eq!(items[0], DashboardItem::Header);
    assert!(items.contains(&DashboardItem::SyncedBanner));
    assert!(!items.contains(&DashboardItem::SyncUpgradeBanner));
    assert!(!items.contains(&DashboardItem::Placeholder));
    let tiles: Vec<usize> = items
        .iter()
        .filter_map(|item| match item {
            DashboardItem::Cards(tile) => Some(tile.cards.len()),
            _ => None,
        })
        .collect();
    assert_eq!(tiles, vec![1, 2]);

    h.state.dismiss_synced_banner().unwrap();
    let items = h.state.dashboard().unwrap().items(ts(NOW));
    assert!(!items.contains(&DashboardItem::SyncedBanner));
}

#[test]
fn test_dashboard_clock_deviation_banner() {
    let h = holder();
    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1"])))
        .sync(None);
    h.state.clock.observe(ts(NOW + 600), ts(NOW));

    let items = h.state.dashboard().unwrap().items(ts(NOW));
    assert_eq!(
        &items[..2],
        &[DashboardItem::Header, DashboardItem::ClockDeviationBanner]
    );
}

#[test]
fn test_dashboard_all_expired() {
    let h = holder();
    h.syncer(Arc::new(FakeEventProvider::new(&["vac:dose-1"])))
        .sync(None);

    let later = ts(NOW + 1_000 * HOUR);
    let items = h.state.dashboard().unwrap().items(later);
    assert_eq!(items[0], DashboardItem::Placeholder);
    assert!(!items.contains(&DashboardItem::Header));
    assert!(!items.contains(&DashboardItem::AddQrButton));
}

// ============================================================================
// Flow 4: shared state
// ============================================================================

#[test]
fn test_concurrent_secret_key_creation() {
    let config = flow_config();
    let dir = config.data_dir.clone();
    let state = Arc::new(HolderState::open(config).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = state.clone();
            std::thread::spawn(move || state.secret_keys.get_or_create().unwrap().fingerprint())
        })
        .collect();
    let fingerprints: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(fingerprints.windows(2).all(|w| w[0] == w[1]));

    let reopened = HolderState::open(HolderConfig {
        data_dir: dir.clone(),
        ..HolderConfig::default()
    })
    .unwrap();
    assert_eq!(
        reopened.secret_keys.get_or_create().unwrap().fingerprint(),
        fingerprints[0]
    );
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_sync_persists_across_reopen() {
    let config = flow_config();
    let dir = config.data_dir.clone();
    let issuer = Arc::new(FakeIssuer::new());
    let issuance = Arc::new(IssuanceProtocol::new(
        Arc::new(RistrettoScheme),
        issuer.clone(),
    ));

    let first = {
        let state = HolderState::open(config.clone()).unwrap();
        state.issuer_config.replace(issuer.config()).unwrap();
        let syncer = DatabaseSyncer::new(
            &state,
            Some(Arc::new(FakeEventProvider::new(&["vac:dose-1"]))),
            issuance.clone(),
        );
        assert_eq!(syncer.sync(None), DatabaseSyncerResult::Success);
        state.store.all_green_cards().unwrap()
    };

    let state = HolderState::open(config).unwrap();
    assert!(state.issuer_config.current().is_some());
    let syncer = DatabaseSyncer::new(&state, None, issuance);
    assert_eq!(syncer.sync(None), DatabaseSyncerResult::Success);
    assert_eq!(state.store.all_green_cards().unwrap(), first);
    let _ = std::fs::remove_dir_all(&dir);
}
