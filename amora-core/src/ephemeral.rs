//! View-limited, time-limited photos.
//!
//! Access keys are random hex strings handed to the owner at upload. View
//! accounting happens in one store unit per photo so that exactly
//! `min(requests, max_views)` concurrent views succeed.

use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amora_shared::{AppError, AppResult, ErrorCode};

use crate::blocks;
use crate::context::{Core, OpContext, DAY};
use crate::events;
use crate::model::{EphemeralPhoto, PhotoView, ViewOutcome};
use crate::ports::with_timeout;

fn access_key_cache_key(access_key: &str) -> String {
    format!("ephemeral:key:{access_key}")
}

fn generate_access_key(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn extension(content_type: &str) -> &str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        _ => "bin",
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadPhoto {
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(default = "default_max_views")]
    pub max_views: i32,
    /// Lifetime in seconds; the configured default when absent.
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub with_thumbnail: bool,
}

fn default_max_views() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedPhoto {
    pub photo: EphemeralPhoto,
    pub access_key: String,
    pub upload_url: String,
    pub thumbnail_upload_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoAccess {
    pub photo_id: Uuid,
    pub view_id: Uuid,
    pub url: String,
    pub url_expires_in_secs: u64,
    pub view_count: i32,
    pub max_views: i32,
    pub is_viewed: bool,
}

fn photo_not_found() -> AppError {
    AppError::new(ErrorCode::PhotoNotFound, "photo not found")
}

fn photo_expired() -> AppError {
    AppError::new(ErrorCode::PhotoExpired, "photo has expired")
}

fn validate_upload(core: &Core, req: &UploadPhoto) -> AppResult<u64> {
    let cfg = &core.config.ephemeral;
    if !cfg.allowed_types.iter().any(|t| t == &req.content_type) {
        return Err(AppError::with_details(
            ErrorCode::UnsupportedMediaType,
            format!("unsupported content type {}", req.content_type),
            serde_json::json!({ "allowed": cfg.allowed_types }),
        ));
    }
    if req.size_bytes <= 0 {
        return Err(AppError::invalid_argument("size_bytes must be positive"));
    }
    if req.size_bytes as u64 > cfg.max_file_size {
        return Err(AppError::with_details(
            ErrorCode::PayloadTooLarge,
            "photo exceeds the maximum file size",
            serde_json::json!({ "max_file_size": cfg.max_file_size }),
        ));
    }
    if req.max_views < 1 {
        return Err(AppError::invalid_argument("max_views must be at least 1"));
    }
    let duration = req.duration_secs.unwrap_or(cfg.default_duration);
    if duration == 0 || duration > cfg.max_duration {
        return Err(AppError::with_details(
            ErrorCode::InvalidPhotoDuration,
            format!("duration must be between 1 and {} seconds", cfg.max_duration),
            serde_json::json!({ "max_duration": cfg.max_duration }),
        ));
    }
    Ok(duration)
}

pub async fn upload_photo(core: &Core, cx: &OpContext, owner: Uuid, req: UploadPhoto) -> AppResult<UploadedPhoto> {
    core.require_actor(owner).await?;
    let duration = validate_upload(core, &req)?;
    core.enforce_rate_limit(
        "photos",
        &owner.to_string(),
        &[(core.config.chat.rate_limit.photos_per_day, DAY)],
    )
    .await?;

    let id = Uuid::now_v7();
    let ext = extension(&req.content_type);
    let file_key = format!("ephemeral/{owner}/{id}.{ext}");
    let thumbnail_key = req.with_thumbnail.then(|| format!("ephemeral/{owner}/{id}_thumb.{ext}"));

    let url_ttl = Duration::from_secs(core.config.ephemeral.upload_url_ttl);
    let upload_url = cx
        .guard(async {
            with_timeout(
                core.storage_budget(),
                core.signer.sign_upload(&file_key, &req.content_type, req.size_bytes, url_ttl),
            )
            .await
            .map_err(AppError::from)
        })
        .await?;
    let thumbnail_upload_url = match &thumbnail_key {
        Some(key) => {
            let signing = core.signer.sign_upload(key, &req.content_type, req.size_bytes, url_ttl);
            Some(with_timeout(core.storage_budget(), signing).await?)
        }
        None => None,
    };

    let now = core.now();
    let access_key = generate_access_key(core.config.access_key_bytes());
    let photo = EphemeralPhoto {
        id,
        owner_id: owner,
        file_key,
        thumbnail_key,
        access_key: access_key.clone(),
        content_type: req.content_type,
        size_bytes: req.size_bytes,
        expires_at: now + chrono::Duration::seconds(duration as i64),
        max_views: req.max_views,
        view_count: 0,
        is_viewed: false,
        is_expired: false,
        viewed_at: None,
        expired_at: None,
        is_deleted: false,
        deleted_at: None,
        created_at: now,
    };

    cx.checkpoint()?;
    let photo = core.store.insert_photo(photo).await?;
    tracing::info!(photo_id = %photo.id, owner_id = %owner, max_views = photo.max_views, "ephemeral photo created");

    Ok(UploadedPhoto { photo, access_key, upload_url, thumbnail_upload_url })
}

async fn resolve_access_key(core: &Core, access_key: &str) -> AppResult<EphemeralPhoto> {
    let key = access_key_cache_key(access_key);
    if let Some(id) = core.cache_get(&key).await.and_then(|raw| raw.parse::<Uuid>().ok()) {
        if let Some(photo) = core.store.get_photo(id).await?.filter(|p| p.access_key == access_key) {
            return Ok(photo);
        }
    }

    let photo = core.store.find_by_access_key(access_key).await?.ok_or_else(photo_not_found)?;
    let ttl = (photo.expires_at - core.now()).num_seconds();
    if ttl > 0 {
        core.cache_set(&key, &photo.id.to_string(), ttl as u64).await;
    }
    Ok(photo)
}

async fn announce_expiry(core: &Core, photo: &EphemeralPhoto) {
    core.cache_delete(&access_key_cache_key(&photo.access_key)).await;
    tracing::info!(photo_id = %photo.id, view_count = photo.view_count, "ephemeral photo expired");
    core.emit(events::photo_expired(photo.id, photo.owner_id)).await;
}

/// Consume one view and return a short-lived download URL.
pub async fn view_photo(
    core: &Core,
    cx: &OpContext,
    access_key: &str,
    viewer: Uuid,
    ip: Option<String>,
    user_agent: Option<String>,
) -> AppResult<PhotoAccess> {
    let photo = resolve_access_key(core, access_key).await?;

    if photo.is_spent(core.now()) {
        if let Some((expired, true)) = core.store.mark_expired(photo.id, core.now()).await? {
            announce_expiry(core, &expired).await;
        }
        return Err(photo_expired());
    }
    if viewer == photo.owner_id {
        return Err(AppError::new(ErrorCode::OwnerCannotView, "owners cannot consume views of their own photo"));
    }
    core.require_actor(viewer).await?;
    if blocks::is_blocked_either(core, viewer, photo.owner_id).await? {
        return Err(AppError::new(ErrorCode::Blocked, "a block exists between these users"));
    }

    // A signing failure must not burn a view.
    let ttl = Duration::from_secs(core.config.ephemeral.view_duration);
    let url = cx
        .guard(async {
            with_timeout(core.storage_budget(), core.signer.sign_download(&photo.file_key, ttl))
                .await
                .map_err(AppError::from)
        })
        .await?;

    cx.checkpoint()?;
    let outcome = core.store.record_view_atomic(photo.id, Some(viewer), ip, user_agent, core.now()).await?;
    let (photo, view) = match outcome {
        ViewOutcome::Viewed { photo, view } => (photo, view),
        ViewOutcome::Expired { photo } => {
            announce_expiry(core, &photo).await;
            return Err(photo_expired());
        }
    };

    metrics::counter!("amora_ephemeral_views_total").increment(1);
    tracing::debug!(photo_id = %photo.id, viewer_id = %viewer, view_count = photo.view_count, "ephemeral photo viewed");
    core.emit(events::photo_viewed(photo.id, photo.owner_id, Some(viewer), photo.view_count, photo.max_views)).await;
    core.notify(
        photo.owner_id,
        "ephemeral_photo_viewed",
        serde_json::json!({ "photo_id": photo.id, "viewer_id": viewer }),
    )
    .await;
    if photo.is_expired {
        announce_expiry(core, &photo).await;
    }

    Ok(PhotoAccess {
        photo_id: photo.id,
        view_id: view.id,
        url,
        url_expires_in_secs: ttl.as_secs(),
        view_count: photo.view_count,
        max_views: photo.max_views,
        is_viewed: photo.is_viewed,
    })
}

/// Record how long the viewer kept the photo open.
pub async fn complete_view(core: &Core, viewer: Uuid, view_id: Uuid, duration_ms: i64) -> AppResult<PhotoView> {
    if duration_ms < 0 {
        return Err(AppError::invalid_argument("duration_ms must not be negative"));
    }
    core.store
        .complete_view(view_id, viewer, duration_ms)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::PhotoViewNotFound, "view not found"))
}

async fn owned_photo(core: &Core, owner: Uuid, photo_id: Uuid) -> AppResult<EphemeralPhoto> {
    core.store
        .get_photo(photo_id)
        .await?
        .filter(|p| p.owner_id == owner)
        .ok_or_else(photo_not_found)
}

pub async fn photo_status(core: &Core, owner: Uuid, photo_id: Uuid) -> AppResult<EphemeralPhoto> {
    owned_photo(core, owner, photo_id).await
}

/// Owner-initiated early expiry. Idempotent.
pub async fn expire_photo(core: &Core, cx: &OpContext, owner: Uuid, photo_id: Uuid) -> AppResult<EphemeralPhoto> {
    owned_photo(core, owner, photo_id).await?;
    cx.checkpoint()?;
    let (photo, transitioned) = core.store.mark_expired(photo_id, core.now()).await?.ok_or_else(photo_not_found)?;
    if transitioned {
        announce_expiry(core, &photo).await;
    }
    Ok(photo)
}

pub async fn list_photo_views(core: &Core, owner: Uuid, photo_id: Uuid) -> AppResult<Vec<PhotoView>> {
    owned_photo(core, owner, photo_id).await?;
    core.store.list_views(photo_id).await
}

/// Expire one batch of photos past their deadline.
pub async fn sweep_expired(core: &Core) -> AppResult<usize> {
    let expired = core.store.expire_due(core.now(), core.config.ephemeral.job_batch_size).await?;
    for photo in &expired {
        announce_expiry(core, photo).await;
    }
    Ok(expired.len())
}

/// Delete storage objects of one batch of photos expired longer than the
/// retention period. Objects that fail to delete are retried next pass.
pub async fn sweep_deleted(core: &Core) -> AppResult<usize> {
    let retention = chrono::Duration::seconds(core.config.ephemeral.retention_period as i64);
    let due = core
        .store
        .due_for_deletion(core.now() - retention, core.config.ephemeral.job_batch_size)
        .await?;

    let mut deleted = 0;
    'photos: for photo in due {
        for key in std::iter::once(&photo.file_key).chain(photo.thumbnail_key.as_ref()) {
            if let Err(e) = with_timeout(core.storage_budget(), core.signer.delete_object(key)).await {
                tracing::warn!(error = %e, photo_id = %photo.id, key = %key, "failed to delete photo object");
                continue 'photos;
            }
        }
        if core.store.mark_deleted(photo.id, core.now()).await? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use amora_shared::types::event::routing_keys;
    use amora_shared::ErrorKind;

    fn jpeg(max_views: i32, duration_secs: u64) -> UploadPhoto {
        UploadPhoto {
            content_type: "image/jpeg".into(),
            size_bytes: 2048,
            max_views,
            duration_secs: Some(duration_secs),
            with_thumbnail: false,
        }
    }

    #[tokio::test]
    async fn upload_validates_type_size_and_duration() {
        let h = harness();
        let owner = h.user(1).await;
        let cx = OpContext::new();

        let mut req = jpeg(1, 60);
        req.content_type = "image/gif".into();
        assert_eq!(upload_photo(&h.core, &cx, owner, req).await.unwrap_err().code(), ErrorCode::UnsupportedMediaType);

        let mut req = jpeg(1, 60);
        req.size_bytes = 11 * 1024 * 1024;
        assert_eq!(upload_photo(&h.core, &cx, owner, req).await.unwrap_err().code(), ErrorCode::PayloadTooLarge);

        let req = jpeg(1, 8 * 86_400);
        assert_eq!(upload_photo(&h.core, &cx, owner, req).await.unwrap_err().code(), ErrorCode::InvalidPhotoDuration);

        let req = jpeg(0, 60);
        assert_eq!(upload_photo(&h.core, &cx, owner, req).await.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn upload_issues_long_random_key_and_signed_url() {
        let h = harness();
        let owner = h.user(1).await;
        let mut req = jpeg(2, 60);
        req.with_thumbnail = true;
        let up = upload_photo(&h.core, &OpContext::new(), owner, req).await.unwrap();

        assert!(up.access_key.len() >= 64);
        assert!(up.upload_url.contains("op=put"));
        assert!(up.thumbnail_upload_url.is_some());
        assert_eq!(up.photo.expires_at, h.core.now() + chrono::Duration::seconds(60));

        let other = upload_photo(&h.core, &OpContext::new(), owner, jpeg(1, 60)).await.unwrap();
        assert_ne!(up.access_key, other.access_key);
    }

    #[tokio::test]
    async fn owner_cannot_consume_views() {
        let h = harness();
        let owner = h.user(1).await;
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(1, 60)).await.unwrap();
        let err = view_photo(&h.core, &OpContext::new(), &up.access_key, owner, None, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::OwnerCannotView);
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let h = harness();
        let viewer = h.user(2).await;
        let err = view_photo(&h.core, &OpContext::new(), "nope", viewer, None, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PhotoNotFound);
    }

    #[tokio::test]
    async fn views_stop_at_max_views() {
        let h = harness();
        let (owner, v1, v2, v3) = (h.user(1).await, h.user(2).await, h.user(3).await, h.user(4).await);
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(2, 60)).await.unwrap();
        let cx = OpContext::new();

        let first = view_photo(&h.core, &cx, &up.access_key, v1, Some("10.0.0.1".into()), None).await.unwrap();
        assert!(!first.is_viewed);
        let second = view_photo(&h.core, &cx, &up.access_key, v2, None, None).await.unwrap();
        assert!(second.is_viewed);
        assert_eq!(second.view_count, 2);

        let err = view_photo(&h.core, &cx, &up.access_key, v3, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(list_photo_views(&h.core, owner, up.photo.id).await.unwrap().len(), 2);
        assert_eq!(h.events.count(routing_keys::EPHEMERAL_PHOTO_VIEWED), 2);
        assert_eq!(h.events.count(routing_keys::EPHEMERAL_PHOTO_EXPIRED), 1);
    }

    #[tokio::test]
    async fn deadline_expires_without_views() {
        let h = harness();
        let (owner, viewer) = (h.user(1).await, h.user(2).await);
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(5, 60)).await.unwrap();
        h.advance(chrono::Duration::seconds(60));

        let err = view_photo(&h.core, &OpContext::new(), &up.access_key, viewer, None, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PhotoExpired);
        assert!(photo_status(&h.core, owner, up.photo.id).await.unwrap().is_expired);
    }

    #[tokio::test]
    async fn signing_failure_does_not_consume_a_view() {
        let h = harness();
        let (owner, viewer) = (h.user(1).await, h.user(2).await);
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(1, 60)).await.unwrap();

        h.signer.set_failing(true);
        assert!(view_photo(&h.core, &OpContext::new(), &up.access_key, viewer, None, None).await.is_err());
        assert_eq!(photo_status(&h.core, owner, up.photo.id).await.unwrap().view_count, 0);

        h.signer.set_failing(false);
        view_photo(&h.core, &OpContext::new(), &up.access_key, viewer, None, None).await.unwrap();
    }

    #[tokio::test]
    async fn complete_view_belongs_to_the_viewer() {
        let h = harness();
        let (owner, viewer, other) = (h.user(1).await, h.user(2).await, h.user(3).await);
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(1, 60)).await.unwrap();
        let access = view_photo(&h.core, &OpContext::new(), &up.access_key, viewer, None, None).await.unwrap();

        let err = complete_view(&h.core, other, access.view_id, 4_000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PhotoViewNotFound);
        let view = complete_view(&h.core, viewer, access.view_id, 4_000).await.unwrap();
        assert_eq!(view.duration_ms, Some(4_000));
    }

    #[tokio::test]
    async fn status_is_private_to_the_owner() {
        let h = harness();
        let (owner, other) = (h.user(1).await, h.user(2).await);
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(1, 60)).await.unwrap();
        assert_eq!(photo_status(&h.core, other, up.photo.id).await.unwrap_err().code(), ErrorCode::PhotoNotFound);

        let expired = expire_photo(&h.core, &OpContext::new(), owner, up.photo.id).await.unwrap();
        assert!(expired.is_expired);
        expire_photo(&h.core, &OpContext::new(), owner, up.photo.id).await.unwrap();
        assert_eq!(h.events.count(routing_keys::EPHEMERAL_PHOTO_EXPIRED), 1);
    }

    #[tokio::test]
    async fn sweeps_expire_then_delete_after_retention() {
        let h = harness();
        let owner = h.user(1).await;
        let mut req = jpeg(1, 60);
        req.with_thumbnail = true;
        let up = upload_photo(&h.core, &OpContext::new(), owner, req).await.unwrap();

        assert_eq!(sweep_expired(&h.core).await.unwrap(), 0);
        h.advance(chrono::Duration::seconds(61));
        assert_eq!(sweep_expired(&h.core).await.unwrap(), 1);
        assert_eq!(sweep_deleted(&h.core).await.unwrap(), 0);

        h.advance(chrono::Duration::seconds(h.core.config.ephemeral.retention_period as i64));
        assert_eq!(sweep_deleted(&h.core).await.unwrap(), 1);
        let photo = photo_status(&h.core, owner, up.photo.id).await.unwrap();
        assert!(photo.is_deleted);
        assert_eq!(h.signer.deleted().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_views_succeed_exactly_max_views_times() {
        let h = harness();
        let owner = h.user(1).await;
        let up = upload_photo(&h.core, &OpContext::new(), owner, jpeg(3, 60)).await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..10u128 {
            let viewer = h.user(100 + n).await;
            let core = h.core.clone();
            let key = up.access_key.clone();
            tasks.push(tokio::spawn(async move {
                view_photo(&core, &OpContext::new(), &key, viewer, None, None).await.is_ok()
            }));
        }
        let mut ok = 0;
        for t in tasks {
            if t.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(list_photo_views(&h.core, owner, up.photo.id).await.unwrap().len(), 3);
    }
}
