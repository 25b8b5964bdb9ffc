//! In-process port implementations for tests and single-node development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use amora_shared::clients::classifier::ClassifierVerdict;

use crate::events::EventEnvelope;
use crate::ports::*;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct MemoryCache {
    entries: DashMap<String, (String, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries.get(key).is_some_and(|e| e.1 > now)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    fn expiry(&self, ttl_secs: u64) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::seconds(ttl_secs as i64)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        let now = self.clock.now();
        let hit = self.entries.get(key).filter(|e| e.1 > now).map(|e| e.0.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, e| e.1 <= now);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PortError> {
        self.entries.insert(key.to_string(), (value.to_string(), self.expiry(ttl_secs)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PortError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, PortError> {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, PortError> {
        let now = self.clock.now();
        let expires = self.expiry(ttl_secs);
        let mut inserted = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|e| {
                if e.1 <= now {
                    *e = (value.to_string(), expires);
                    inserted = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                (value.to_string(), expires)
            });
        Ok(inserted)
    }
}

/// Sliding-window limiter over per-key hit timestamps.
pub struct MemoryRateLimiter {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { windows: DashMap::new(), clock }
    }

    pub fn hit(&self, key: String, budget: u64, window: Duration) -> RateDecision {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let mut hits = self.windows.entry(key).or_default();

        while hits.front().is_some_and(|t| *t <= now - window) {
            hits.pop_front();
        }

        if (hits.len() as u64) < budget {
            hits.push_back(now);
            return RateDecision::Allowed;
        }

        let retry_after = hits
            .front()
            .map(|oldest| (*oldest + window - now).num_seconds().max(1) as u64)
            .unwrap_or(1);
        RateDecision::Denied { retry_after_secs: retry_after }
    }
}

pub fn limiter_key(bucket: &str, subject: &str, window: Duration) -> String {
    format!("ratelimit:{bucket}:{subject}:{}", window.as_secs())
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(
        &self,
        bucket: &str,
        subject: &str,
        budget: u64,
        window: Duration,
    ) -> Result<RateDecision, PortError> {
        Ok(self.hit(limiter_key(bucket, subject, window), budget, window))
    }
}

/// Captures published events; can be told to fail.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EventEnvelope>>,
    failing: AtomicBool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    pub fn of(&self, routing_key: &str) -> Vec<EventEnvelope> {
        self.events.lock().iter().filter(|e| e.routing_key == routing_key).cloned().collect()
    }

    pub fn count(&self, routing_key: &str) -> usize {
        self.events.lock().iter().filter(|e| e.routing_key == routing_key).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("broker down".into()));
        }
        self.events.lock().push(envelope.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub user_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent_to(&self, user_id: Uuid) -> Vec<SentNotification> {
        self.sent.lock().iter().filter(|n| n.user_id == user_id).cloned().collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("notification service down".into()));
        }
        self.sent.lock().push(SentNotification { user_id, kind: kind.to_string(), payload });
        Ok(())
    }
}

/// Classifier returning a configured score, or failing on demand.
pub struct StaticClassifier {
    score: Mutex<f64>,
    failing: AtomicBool,
}

impl Default for StaticClassifier {
    fn default() -> Self {
        Self { score: Mutex::new(0.0), failing: AtomicBool::new(false) }
    }
}

impl StaticClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(&self, score: f64) {
        *self.score.lock() = score;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn verdict(&self) -> Result<ClassifierVerdict, PortError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("classifier down".into()));
        }
        Ok(ClassifierVerdict { score: *self.score.lock(), labels: Vec::new() })
    }
}

#[async_trait]
impl ContentClassifier for StaticClassifier {
    async fn classify_text(&self, _text: &str) -> Result<ClassifierVerdict, PortError> {
        self.verdict()
    }

    async fn classify_image(&self, _object_key: &str) -> Result<ClassifierVerdict, PortError> {
        self.verdict()
    }
}

/// Signer producing deterministic fake URLs and recording deletions.
#[derive(Default)]
pub struct FakeSigner {
    deleted: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    fn check(&self) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PortError::Unavailable("object store down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageSigner for FakeSigner {
    async fn sign_upload(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        expiry: Duration,
    ) -> Result<String, PortError> {
        self.check()?;
        Ok(format!(
            "https://objects.local/{key}?op=put&type={content_type}&len={content_length}&ttl={}",
            expiry.as_secs()
        ))
    }

    async fn sign_download(&self, key: &str, expiry: Duration) -> Result<String, PortError> {
        self.check()?;
        Ok(format!("https://objects.local/{key}?op=get&ttl={}", expiry.as_secs()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), PortError> {
        self.check()?;
        self.deleted.lock().push(key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[tokio::test]
    async fn cache_entries_expire_with_the_clock() {
        let clock = clock();
        let cache = MemoryCache::new(clock.clone());
        cache.set("k", "v", 10).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_only_wins_once() {
        let cache = MemoryCache::new(clock());
        assert!(cache.set_if_absent("lease", "a", 60).await.unwrap());
        assert!(!cache.set_if_absent("lease", "b", 60).await.unwrap());
        assert_eq!(cache.get("lease").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn prefix_invalidation_removes_only_matching_keys() {
        let cache = MemoryCache::new(clock());
        cache.set("blocking:1", "[]", 60).await.unwrap();
        cache.set("blocking:2", "[]", 60).await.unwrap();
        cache.set("unread:1", "3", 60).await.unwrap();
        assert_eq!(cache.invalidate_prefix("blocking:").await.unwrap(), 2);
        assert!(cache.contains("unread:1"));
    }

    #[test]
    fn sliding_window_reports_retry_after() {
        let clock = clock();
        let limiter = MemoryRateLimiter::new(clock.clone());
        let window = Duration::from_secs(60);
        for _ in 0..3 {
            assert_eq!(limiter.hit("k".into(), 3, window), RateDecision::Allowed);
        }
        clock.advance(chrono::Duration::seconds(20));
        match limiter.hit("k".into(), 3, window) {
            RateDecision::Denied { retry_after_secs } => assert_eq!(retry_after_secs, 40),
            other => panic!("expected denial, got {other:?}"),
        }
        clock.advance(chrono::Duration::seconds(41));
        assert_eq!(limiter.hit("k".into(), 3, window), RateDecision::Allowed);
    }
}
