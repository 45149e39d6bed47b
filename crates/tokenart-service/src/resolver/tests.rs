use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokenart_sources::{GatewayConfig, Identifier};
use url::Url;

use crate::caching::{
    InMemorySessionStorage, NegativeCache, SessionCache, SessionEntry, SessionStorage,
};
use crate::config::Config;
use crate::metadata::MetadataResolver;

use super::*;

/// Serves metadata lookups from a fixed map after a fixed delay.
#[derive(Debug, Default)]
struct StaticMetadata {
    images: HashMap<String, Identifier>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticMetadata {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn image(mut self, url: &str, image: &str) -> Self {
        self.images
            .insert(self::url(url).to_string(), Identifier::new(image));
        self
    }
}

#[async_trait]
impl MetadataResolver for StaticMetadata {
    async fn resolve_image(&self, url: &Url) -> Option<Identifier> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.images.get(url.as_str()).cloned()
    }
}

/// Counts the writes to an in-memory storage.
#[derive(Debug, Default)]
struct CountingStorage {
    inner: InMemorySessionStorage,
    writes: AtomicUsize,
}

impl SessionStorage for CountingStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value);
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

struct Fixture {
    service: Arc<ImageService>,
    metadata: Arc<StaticMetadata>,
    storage: Arc<CountingStorage>,
}

impl Fixture {
    fn new(metadata: StaticMetadata) -> Self {
        let config = Config {
            gateways: GatewayConfig {
                ipfs: vec!["https://gatewayA/".into(), "https://gatewayB/".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let metadata = Arc::new(metadata);
        let storage = Arc::new(CountingStorage::default());
        let service = ImageService::from_parts(
            &config,
            tokio::runtime::Handle::current(),
            metadata.clone(),
            SessionCache::new(storage.clone()),
            NegativeCache::new(),
        );

        Self {
            service,
            metadata,
            storage,
        }
    }

    fn calls(&self) -> usize {
        self.metadata.calls.load(Ordering::SeqCst)
    }

    fn writes(&self) -> usize {
        self.storage.writes.load(Ordering::SeqCst)
    }

    fn session(&self, identifier: &str) -> Option<SessionEntry> {
        self.service
            .session_cache()
            .get(&Identifier::new(identifier))
    }
}

fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

async fn wait_until_settled(controller: &ResolutionController) -> ResolutionState {
    let mut rx = controller.subscribe();
    rx.wait_for(|state| !matches!(state, ResolutionState::Resolving(_)))
        .await
        .unwrap()
        .clone()
}

#[tokio::test(start_paused = true)]
async fn test_gateway_fallback() {
    let fixture = Fixture::new(StaticMetadata::default());
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://Qm123");
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolving(Some(url("https://gatewayA/Qm123")))
    );

    let state = wait_until_settled(&controller).await;
    assert_eq!(state, ResolutionState::Resolved(url("https://gatewayA/Qm123")));
    assert_eq!(fixture.calls(), 2);

    controller.report_load_failure(&url("https://gatewayA/Qm123"));
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayB/Qm123"))
    );

    controller.report_load_success(&url("https://gatewayB/Qm123"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayB/Qm123"))
    );
    assert!(
        fixture
            .service
            .negative_cache()
            .has(&url("https://gatewayA/Qm123"))
    );
    assert_eq!(
        fixture.session("ipfs://Qm123"),
        Some(SessionEntry::Resolved(url("https://gatewayB/Qm123")))
    );
    assert_eq!(fixture.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_replaces_tentative_candidates() {
    let metadata = StaticMetadata::default()
        .image("https://gatewayA/QmMeta", "ipfs://QmImage")
        .image("https://gatewayB/QmMeta", "https://cdn.example.com/art.png");
    let fixture = Fixture::new(metadata);
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://QmMeta");
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolving(Some(url("https://gatewayA/QmMeta")))
    );

    let state = wait_until_settled(&controller).await;
    assert_eq!(state, ResolutionState::Resolved(url("https://gatewayA/QmImage")));

    // the expanded list is used going forward, in concatenation order
    controller.report_load_failure(&url("https://gatewayA/QmImage"));
    controller.report_load_failure(&url("https://gatewayB/QmImage"));
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://cdn.example.com/art.png"))
    );

    controller.report_load_success(&url("https://cdn.example.com/art.png"));
    assert_eq!(
        fixture.session("ipfs://QmMeta"),
        Some(SessionEntry::Resolved(url("https://cdn.example.com/art.png")))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_identifier() {
    let fixture = Fixture::new(StaticMetadata::default());
    let controller = fixture.service.controller();

    controller.set_identifier("QmNoScheme");
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);
    assert_eq!(fixture.calls(), 0);
    assert_eq!(fixture.session("QmNoScheme"), None);
    assert_eq!(fixture.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_sentinel() {
    let fixture = Fixture::new(StaticMetadata::default());
    fixture
        .service
        .session_cache()
        .set(&Identifier::new("ipfs://Qm123"), &SessionEntry::TimedOut);

    let controller = fixture.service.controller();
    controller.set_identifier("ipfs://Qm123");
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);
    assert_eq!(fixture.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_cache_remount() {
    let fixture = Fixture::new(StaticMetadata::default());

    {
        let controller = fixture.service.controller();
        controller.set_identifier("ipfs://Qm123");
        wait_until_settled(&controller).await;
        controller.report_load_success(&url("https://gatewayA/Qm123"));
    }
    assert_eq!(fixture.calls(), 2);

    let controller = fixture.service.controller();
    controller.set_identifier("ipfs://Qm123");
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );
    assert_eq!(fixture.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_entry_known_bad() {
    let fixture = Fixture::new(StaticMetadata::default());
    let identifier = Identifier::new("ipfs://Qm123");
    let cached = url("https://gatewayA/Qm123");
    fixture
        .service
        .session_cache()
        .set(&identifier, &SessionEntry::Resolved(cached.clone()));
    fixture.service.negative_cache().mark_bad(&cached);

    let controller = fixture.service.controller();
    controller.set_identifier(identifier);
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolving(Some(url("https://gatewayB/Qm123")))
    );
    assert_eq!(
        wait_until_settled(&controller).await,
        ResolutionState::Resolved(url("https://gatewayB/Qm123"))
    );
    assert_eq!(fixture.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_writes_sentinel_once() {
    let metadata = StaticMetadata::with_delay(Duration::from_secs(60))
        .image("https://gatewayA/QmSlow", "ipfs://QmImage");
    let fixture = Fixture::new(metadata);
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://QmSlow");
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolving(Some(url("https://gatewayA/QmSlow")))
    );

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(matches!(
        controller.current_display_state(),
        ResolutionState::Resolving(_)
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);
    assert_eq!(fixture.session("ipfs://QmSlow"), Some(SessionEntry::TimedOut));
    assert_eq!(fixture.writes(), 1);

    // the abandoned lookups complete without effect
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);
    assert_eq!(fixture.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_resolution_times_out() {
    let fixture = Fixture::new(StaticMetadata::default());
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://Qm123");
    assert_eq!(
        wait_until_settled(&controller).await,
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);
    assert_eq!(fixture.session("ipfs://Qm123"), Some(SessionEntry::TimedOut));
    assert_eq!(fixture.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tentative_load_disarms_timeout() {
    let fixture = Fixture::new(StaticMetadata::with_delay(Duration::from_secs(60)));
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://Qm123");
    controller.report_load_success(&url("https://gatewayA/Qm123"));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );
    assert_eq!(
        fixture.session("ipfs://Qm123"),
        Some(SessionEntry::Resolved(url("https://gatewayA/Qm123")))
    );
}

#[tokio::test(start_paused = true)]
async fn test_load_success_is_idempotent() {
    let fixture = Fixture::new(StaticMetadata::default());
    let controller = fixture.service.controller();

    controller.set_identifier("https://example.com/art.png");
    wait_until_settled(&controller).await;

    let art = url("https://example.com/art.png");
    controller.report_load_success(&art);
    let first = fixture.session("https://example.com/art.png");
    controller.report_load_success(&art);
    let second = fixture.session("https://example.com/art.png");

    assert_eq!(first, Some(SessionEntry::Resolved(art.clone())));
    assert_eq!(first, second);
    assert_eq!(fixture.writes(), 2);

    // reports for URLs which are not displayed are ignored
    controller.report_load_success(&url("https://example.com/other.png"));
    assert_eq!(fixture.writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_identifier_change_discards_stale_results() {
    let metadata = StaticMetadata::with_delay(Duration::from_secs(2))
        .image("https://gatewayA/QmOld", "https://example.com/old.png");
    let fixture = Fixture::new(metadata);
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://QmOld");
    controller.set_identifier("https://example.com/new.png");
    assert_eq!(
        controller.identifier(),
        Some(Identifier::new("https://example.com/new.png"))
    );

    let state = wait_until_settled(&controller).await;
    assert_eq!(state, ResolutionState::Resolved(url("https://example.com/new.png")));
    controller.report_load_success(&url("https://example.com/new.png"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolved(url("https://example.com/new.png"))
    );
    assert_eq!(fixture.session("ipfs://QmOld"), None);
    assert_eq!(fixture.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_identifier_keeps_resolution() {
    let fixture = Fixture::new(StaticMetadata::default());
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://Qm123");
    controller.set_identifier("ipfs://Qm123");
    wait_until_settled(&controller).await;
    assert_eq!(fixture.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_clears_timeout() {
    let fixture = Fixture::new(StaticMetadata::with_delay(Duration::from_secs(60)));
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://Qm123");
    drop(controller);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fixture.session("ipfs://Qm123"), None);
    assert_eq!(fixture.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_shared_between_controllers() {
    let fixture = Fixture::new(StaticMetadata::default());
    let first = fixture.service.controller();
    let second = fixture.service.controller();

    first.set_identifier("ipfs://Qm123");
    second.set_identifier("ipfs://Qm123");
    wait_until_settled(&first).await;
    wait_until_settled(&second).await;

    first.report_load_failure(&url("https://gatewayA/Qm123"));
    assert_eq!(
        second.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayB/Qm123"))
    );

    // a different identifier sharing the bad URL never shows it either
    let third = fixture.service.controller();
    third.set_identifier("https://gatewayA/Qm123");
    assert_eq!(
        third.current_display_state(),
        ResolutionState::Resolving(None)
    );
    assert_eq!(wait_until_settled(&third).await, ResolutionState::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_all_candidates_fail() {
    let fixture = Fixture::new(StaticMetadata::default());
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://Qm123");
    wait_until_settled(&controller).await;

    controller.report_load_failure(&url("https://gatewayA/Qm123"));
    controller.report_load_failure(&url("https://gatewayB/Qm123"));
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);

    // exhausted is terminal for the identifier
    controller.set_identifier("ipfs://Qm123");
    assert_eq!(controller.current_display_state(), ResolutionState::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_failed_tentative_waits_for_metadata() {
    let metadata = StaticMetadata::with_delay(Duration::from_secs(1))
        .image("https://gatewayB/QmMeta", "https://cdn.example.com/art.png");
    let fixture = Fixture::new(metadata);
    let controller = fixture.service.controller();

    controller.set_identifier("ipfs://QmMeta");
    controller.report_load_failure(&url("https://gatewayA/QmMeta"));
    controller.report_load_failure(&url("https://gatewayB/QmMeta"));
    assert_eq!(
        controller.current_display_state(),
        ResolutionState::Resolving(None)
    );

    assert_eq!(
        wait_until_settled(&controller).await,
        ResolutionState::Resolved(url("https://cdn.example.com/art.png"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_observe_transitions() {
    let fixture = Fixture::new(StaticMetadata::with_delay(Duration::from_secs(1)));
    let controller = fixture.service.controller();
    let mut rx = controller.subscribe();
    assert_eq!(*rx.borrow_and_update(), ResolutionState::Idle);

    controller.set_identifier("ipfs://Qm123");
    assert!(rx.has_changed().unwrap());
    assert_eq!(
        *rx.borrow_and_update(),
        ResolutionState::Resolving(Some(url("https://gatewayA/Qm123")))
    );

    rx.changed().await.unwrap();
    assert_eq!(
        *rx.borrow_and_update(),
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_keeps_url_confirmed_elsewhere() {
    let fixture = Fixture::new(StaticMetadata::default());
    let first = fixture.service.controller();
    let second = fixture.service.controller();

    first.set_identifier("ipfs://Qm123");
    second.set_identifier("ipfs://Qm123");
    wait_until_settled(&first).await;
    wait_until_settled(&second).await;

    first.report_load_success(&url("https://gatewayA/Qm123"));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        fixture.session("ipfs://Qm123"),
        Some(SessionEntry::Resolved(url("https://gatewayA/Qm123")))
    );
    assert_eq!(
        second.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );
    assert_eq!(fixture.writes(), 1);

    let remount = fixture.service.controller();
    remount.set_identifier("ipfs://Qm123");
    assert_eq!(
        remount.current_display_state(),
        ResolutionState::Resolved(url("https://gatewayA/Qm123"))
    );
}
