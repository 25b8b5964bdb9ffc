//! Directed block edges and the cached per-user block sets.
//!
//! Cache keys: `blocking:U:G` holds the ids U has blocked, `blocked:U:G` the
//! ids that have blocked U. `G` is U's generation at `blocks:gen:U`. Every
//! mutation rotates the generation of both users, so a set loaded before the
//! mutation lands under a key no later reader asks for.

use std::collections::HashSet;

use uuid::Uuid;

use amora_shared::types::event::routing_keys;
use amora_shared::{AppError, AppResult, ErrorCode};

use crate::context::{Core, OpContext, DAY, HOUR, MINUTE};
use crate::events;
use crate::model::Block;

fn generation_key(user: Uuid) -> String {
    format!("blocks:gen:{user}")
}

fn blocking_key(user: Uuid, generation: &str) -> String {
    format!("blocking:{user}:{generation}")
}

fn blocked_key(user: Uuid, generation: &str) -> String {
    format!("blocked:{user}:{generation}")
}

fn fresh_generation() -> String {
    Uuid::now_v7().simple().to_string()
}

/// `None` when the cache cannot hand out a generation; callers then read
/// storage directly.
async fn generation(core: &Core, user: Uuid) -> Option<String> {
    let key = generation_key(user);
    if let Some(current) = core.cache_get(&key).await {
        return Some(current);
    }
    let fresh = fresh_generation();
    match core.cache_set_if_absent(&key, &fresh, core.config.blocks.cache_ttl).await {
        Ok(true) => Some(fresh),
        Ok(false) => core.cache_get(&key).await,
        Err(e) => {
            tracing::warn!(error = %e, user_id = %user, "block cache generation unavailable");
            None
        }
    }
}

/// Must run after the mutation is durable.
async fn rotate_pair(core: &Core, a: Uuid, b: Uuid) {
    for user in [a, b] {
        core.cache_set(&generation_key(user), &fresh_generation(), core.config.blocks.cache_ttl).await;
    }
}

pub async fn block(
    core: &Core,
    cx: &OpContext,
    blocker: Uuid,
    blocked: Uuid,
    reason: Option<String>,
) -> AppResult<Block> {
    if blocker == blocked {
        return Err(AppError::new(ErrorCode::CannotBlockSelf, "cannot block yourself"));
    }
    core.require_actor(blocker).await?;
    core.require_user(blocked).await?;

    let limits = &core.config.moderation.rate_limit;
    core.enforce_rate_limit(
        "blocks",
        &blocker.to_string(),
        &[(limits.blocks_per_minute, MINUTE), (limits.blocks_per_hour, HOUR), (limits.blocks_per_day, DAY)],
    )
    .await?;

    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    cx.checkpoint()?;
    let block = core
        .store
        .insert_block(Block {
            id: Uuid::now_v7(),
            blocker_id: blocker,
            blocked_id: blocked,
            reason,
            created_at: core.now(),
        })
        .await?;

    rotate_pair(core, blocker, blocked).await;
    tracing::info!(blocker_id = %blocker, blocked_id = %blocked, "user blocked");
    core.emit(events::block_changed(routing_keys::BLOCKS_BLOCK_CREATED, blocker, blocked)).await;

    Ok(block)
}

pub async fn unblock(core: &Core, cx: &OpContext, blocker: Uuid, blocked: Uuid) -> AppResult<()> {
    cx.checkpoint()?;
    if !core.store.delete_block(blocker, blocked).await? {
        return Err(AppError::new(ErrorCode::BlockNotFound, "block not found"));
    }

    rotate_pair(core, blocker, blocked).await;
    tracing::info!(blocker_id = %blocker, blocked_id = %blocked, "user unblocked");
    core.emit(events::block_changed(routing_keys::BLOCKS_BLOCK_REMOVED, blocker, blocked)).await;
    Ok(())
}

async fn cached_set<K, F, Fut>(core: &Core, user: Uuid, key_for: K, load: F) -> AppResult<HashSet<Uuid>>
where
    K: FnOnce(Uuid, &str) -> String,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = AppResult<Vec<Uuid>>>,
{
    let Some(generation) = generation(core, user).await else {
        return Ok(load().await?.into_iter().collect());
    };
    let key = key_for(user, &generation);
    if let Some(raw) = core.cache_get(&key).await {
        match serde_json::from_str::<Vec<Uuid>>(&raw) {
            Ok(ids) => return Ok(ids.into_iter().collect()),
            Err(e) => tracing::warn!(error = %e, key = %key, "discarding corrupt block cache entry"),
        }
    }

    let ids = load().await?;
    if let Ok(raw) = serde_json::to_string(&ids) {
        core.cache_set(&key, &raw, core.config.blocks.cache_ttl).await;
    }
    Ok(ids.into_iter().collect())
}

/// Ids `user` has blocked.
pub async fn blocking(core: &Core, user: Uuid) -> AppResult<HashSet<Uuid>> {
    cached_set(core, user, blocking_key, || core.store.blocking_ids(user)).await
}

/// Ids that have blocked `user`.
pub async fn blocked_by(core: &Core, user: Uuid) -> AppResult<HashSet<Uuid>> {
    cached_set(core, user, blocked_key, || core.store.blocked_by_ids(user)).await
}

/// Whether `a` has blocked `b`.
pub async fn is_blocked(core: &Core, a: Uuid, b: Uuid) -> AppResult<bool> {
    Ok(blocking(core, a).await?.contains(&b))
}

pub async fn is_mutual(core: &Core, a: Uuid, b: Uuid) -> AppResult<bool> {
    Ok(is_blocked(core, a, b).await? && is_blocked(core, b, a).await?)
}

/// Either direction. This is the check writes between two users apply.
pub async fn is_blocked_either(core: &Core, a: Uuid, b: Uuid) -> AppResult<bool> {
    Ok(is_blocked(core, a, b).await? || is_blocked(core, b, a).await?)
}

pub async fn list_blocked(core: &Core, user: Uuid) -> AppResult<Vec<Block>> {
    core.store.list_blocks_by(user).await
}

/// Drop candidates related to `user` by a block in either direction.
pub async fn exclude_blocked(core: &Core, user: Uuid, candidates: Vec<Uuid>) -> AppResult<Vec<Uuid>> {
    let blocking = blocking(core, user).await?;
    let blocked_by = blocked_by(core, user).await?;
    Ok(candidates
        .into_iter()
        .filter(|c| *c != user && !blocking.contains(c) && !blocked_by.contains(c))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;

    #[tokio::test]
    async fn self_block_is_invalid() {
        let h = harness();
        let a = h.user(1).await;
        let err = block(&h.core, &OpContext::new(), a, a, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotBlockSelf);
        assert_eq!(err.kind(), amora_shared::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn duplicate_block_conflicts() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        block(&h.core, &OpContext::new(), a, b, Some("spam".into())).await.unwrap();
        let err = block(&h.core, &OpContext::new(), a, b, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyBlocked);
    }

    #[tokio::test]
    async fn unblock_without_edge_is_not_found() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let err = unblock(&h.core, &OpContext::new(), a, b).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BlockNotFound);
    }

    #[tokio::test]
    async fn block_is_directed_and_mutual_needs_both() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        block(&h.core, &OpContext::new(), a, b, None).await.unwrap();

        assert!(is_blocked(&h.core, a, b).await.unwrap());
        assert!(!is_blocked(&h.core, b, a).await.unwrap());
        assert!(is_blocked_either(&h.core, b, a).await.unwrap());
        assert!(!is_mutual(&h.core, a, b).await.unwrap());

        block(&h.core, &OpContext::new(), b, a, None).await.unwrap();
        assert!(is_mutual(&h.core, a, b).await.unwrap());
    }

    #[tokio::test]
    async fn block_unblock_block_leaves_no_stale_cache() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let cx = OpContext::new();

        block(&h.core, &cx, a, b, None).await.unwrap();
        assert!(is_blocked(&h.core, a, b).await.unwrap());
        let before = generation(&h.core, a).await.unwrap();
        assert!(h.cache.contains(&blocking_key(a, &before)));

        unblock(&h.core, &cx, a, b).await.unwrap();
        let after = generation(&h.core, a).await.unwrap();
        assert_ne!(before, after);
        assert!(!h.cache.contains(&blocking_key(a, &after)));
        assert!(!is_blocked(&h.core, a, b).await.unwrap());

        block(&h.core, &cx, a, b, None).await.unwrap();
        assert!(is_blocked(&h.core, a, b).await.unwrap());
        assert_eq!(list_blocked(&h.core, a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_cached_by_a_slow_reader_cannot_hide_a_new_block() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);

        // The reader picks its generation and loads the set before the block commits...
        let seen = generation(&h.core, a).await.unwrap();
        let stale = h.core.store.blocking_ids(a).await.unwrap();
        block(&h.core, &OpContext::new(), a, b, None).await.unwrap();
        // ...and writes it back afterwards.
        let raw = serde_json::to_string(&stale).unwrap();
        h.core.cache_set(&blocking_key(a, &seen), &raw, h.core.config.blocks.cache_ttl).await;

        assert!(is_blocked_either(&h.core, a, b).await.unwrap());
        assert!(is_blocked_either(&h.core, b, a).await.unwrap());
    }

    #[tokio::test]
    async fn candidate_feed_drops_both_directions() {
        let h = harness();
        let (a, b, c, d) = (h.user(1).await, h.user(2).await, h.user(3).await, h.user(4).await);
        block(&h.core, &OpContext::new(), a, b, None).await.unwrap();
        block(&h.core, &OpContext::new(), c, a, None).await.unwrap();

        let feed = exclude_blocked(&h.core, a, vec![b, c, d, a]).await.unwrap();
        assert_eq!(feed, vec![d]);
    }

    #[tokio::test]
    async fn banned_user_cannot_block_but_can_be_blocked() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        crate::identity::apply_ban(&h.core, b).await.unwrap();

        let err = block(&h.core, &OpContext::new(), b, a, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserBanned);
        block(&h.core, &OpContext::new(), a, b, None).await.unwrap();
    }
}
