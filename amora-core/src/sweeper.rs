//! Periodic background passes that advance records to terminal states.
//!
//! One long-lived task runs per [`SweepRole`]. Before each batch a replica
//! takes a cache lease for the role; replicas that lose the race skip the
//! tick. Failures back off exponentially up to [`MAX_BACKOFF`].

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use amora_shared::AppResult;

use crate::context::Core;
use crate::{ephemeral, moderation, swipes};

/// Batch size for moderation passes.
const MODERATION_BATCH: i64 = 100;
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRole {
    PhotoExpiry,
    PhotoDeletion,
    SanctionExpiry,
    AppealCleanup,
    MatchReconcile,
}

impl SweepRole {
    pub const ALL: [SweepRole; 5] = [
        Self::PhotoExpiry,
        Self::PhotoDeletion,
        Self::SanctionExpiry,
        Self::AppealCleanup,
        Self::MatchReconcile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhotoExpiry => "photo_expiry",
            Self::PhotoDeletion => "photo_deletion",
            Self::SanctionExpiry => "sanction_expiry",
            Self::AppealCleanup => "appeal_cleanup",
            Self::MatchReconcile => "match_reconcile",
        }
    }

    pub fn interval(&self, core: &Core) -> Duration {
        let secs = match self {
            Self::PhotoExpiry | Self::PhotoDeletion => core.config.ephemeral.cleanup_interval,
            Self::SanctionExpiry | Self::AppealCleanup => core.config.moderation.sweep_interval,
            Self::MatchReconcile => core.config.matching.reconcile_interval,
        };
        Duration::from_secs(secs.max(1))
    }

    async fn run(&self, core: &Core) -> AppResult<usize> {
        match self {
            Self::PhotoExpiry => ephemeral::sweep_expired(core).await,
            Self::PhotoDeletion => ephemeral::sweep_deleted(core).await,
            Self::SanctionExpiry => moderation::sanctions::sweep_expired_sanctions(core, MODERATION_BATCH).await,
            Self::AppealCleanup => moderation::appeals::sweep_stale_appeals(core, MODERATION_BATCH).await,
            Self::MatchReconcile => swipes::reconcile_matches(core, core.config.matching.reconcile_batch_size).await,
        }
    }
}

fn lease_key(role: SweepRole) -> String {
    format!("sweeper:lease:{}", role.as_str())
}

/// Delay before the next attempt after `failures` consecutive failures.
pub fn backoff(interval: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 2u32.saturating_pow(failures.min(16));
    interval.saturating_mul(factor).min(MAX_BACKOFF.max(interval))
}

/// Run one batch for `role` if this replica wins the lease.
/// `Ok(None)` means another replica holds it.
pub async fn tick(core: &Core, role: SweepRole, instance_id: &str) -> AppResult<Option<usize>> {
    let ttl = role.interval(core).as_secs();
    match core.cache_set_if_absent(&lease_key(role), instance_id, ttl).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(role = role.as_str(), "sweep lease held elsewhere");
            return Ok(None);
        }
        // Transitions are idempotent.
        Err(e) => tracing::warn!(error = %e, role = role.as_str(), "sweep lease unavailable; running anyway"),
    }

    let processed = role.run(core).await?;
    if processed > 0 {
        metrics::counter!("amora_sweeper_processed_total", "role" => role.as_str()).increment(processed as u64);
        tracing::info!(role = role.as_str(), processed, "sweep batch done");
    }
    Ok(Some(processed))
}

/// Drive `role` until `cancel` fires.
pub async fn run_role(core: Core, role: SweepRole, instance_id: String, cancel: CancellationToken) {
    let interval = role.interval(&core);
    let mut failures = 0u32;
    tracing::info!(role = role.as_str(), interval_secs = interval.as_secs(), "sweeper started");

    loop {
        let delay = backoff(interval, failures);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        match tick(&core, role, &instance_id).await {
            Ok(_) => failures = 0,
            Err(e) => {
                failures = failures.saturating_add(1);
                tracing::error!(error = %e, role = role.as_str(), failures, "sweep failed");
            }
        }
    }
    tracing::info!(role = role.as_str(), "sweeper stopped");
}

pub fn spawn_all(core: &Core, instance_id: &str, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    SweepRole::ALL
        .iter()
        .map(|role| tokio::spawn(run_role(core.clone(), *role, instance_id.to_string(), cancel.child_token())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OpContext;
    use crate::ephemeral::UploadPhoto;
    use crate::testing::harness;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(60);
        assert_eq!(backoff(base, 0), base);
        assert_eq!(backoff(base, 1), Duration::from_secs(120));
        assert_eq!(backoff(base, 3), Duration::from_secs(480));
        assert_eq!(backoff(base, 30), MAX_BACKOFF);
    }

    #[test]
    fn backoff_never_shorter_than_interval() {
        let base = Duration::from_secs(900);
        assert_eq!(backoff(base, 4), base);
    }

    #[tokio::test]
    async fn only_one_replica_sweeps_per_interval() {
        let h = harness();
        let owner = h.user(1).await;
        let req = UploadPhoto {
            content_type: "image/jpeg".into(),
            size_bytes: 1024,
            max_views: 1,
            duration_secs: Some(60),
            with_thumbnail: false,
        };
        ephemeral::upload_photo(&h.core, &OpContext::new(), owner, req).await.unwrap();
        h.advance(chrono::Duration::minutes(2));

        assert_eq!(tick(&h.core, SweepRole::PhotoExpiry, "replica-a").await.unwrap(), Some(1));
        assert_eq!(tick(&h.core, SweepRole::PhotoExpiry, "replica-b").await.unwrap(), None);

        h.advance(chrono::Duration::minutes(2));
        assert_eq!(tick(&h.core, SweepRole::PhotoExpiry, "replica-b").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn roles_hold_independent_leases() {
        let h = harness();
        assert_eq!(tick(&h.core, SweepRole::SanctionExpiry, "a").await.unwrap(), Some(0));
        assert_eq!(tick(&h.core, SweepRole::AppealCleanup, "a").await.unwrap(), Some(0));
        assert_eq!(tick(&h.core, SweepRole::SanctionExpiry, "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancelled_sweeper_exits() {
        let h = harness();
        let cancel = CancellationToken::new();
        let handles = spawn_all(&h.core, "a", &cancel);
        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
    }
}
