//! Fully in-memory [`Core`] wiring for unit and integration tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use amora_shared::AdminRole;

use crate::adapters::*;
use crate::config::CoreConfig;
use crate::context::Core;
use crate::identity;
use crate::store::MemoryStore;

pub struct Harness {
    pub core: Core,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub events: Arc<RecordingEventSink>,
    pub notifier: Arc<RecordingNotifier>,
    pub classifier: Arc<StaticClassifier>,
    pub signer: Arc<FakeSigner>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(CoreConfig::default())
}

pub fn harness_with(config: CoreConfig) -> Harness {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let events = Arc::new(RecordingEventSink::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let classifier = Arc::new(StaticClassifier::new());
    let signer = Arc::new(FakeSigner::new());

    let core = Core {
        store: store.clone(),
        cache: cache.clone(),
        limiter: Arc::new(MemoryRateLimiter::new(clock.clone())),
        notifier: notifier.clone(),
        events: events.clone(),
        signer: signer.clone(),
        classifier: classifier.clone(),
        clock: clock.clone(),
        config: Arc::new(config),
    };

    Harness { core, store, cache, events, notifier, classifier, signer, clock }
}

impl Harness {
    /// Register `Uuid::from_u128(n)` and return it.
    pub async fn user(&self, n: u128) -> Uuid {
        let id = Uuid::from_u128(n);
        identity::upsert_user(&self.core, id).await.unwrap_or_else(|e| panic!("seed user {n}: {e}"));
        id
    }

    pub async fn admin(&self, n: u128, role: AdminRole) -> Uuid {
        let id = self.user(n).await;
        identity::grant_admin_role(&self.core, id, role, None)
            .await
            .unwrap_or_else(|e| panic!("seed admin {n}: {e}"));
        id
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }
}
