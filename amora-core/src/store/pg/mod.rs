//! Postgres store over diesel. Blocking calls run on the blocking pool and
//! each `_atomic` method is one transaction.
//!
//! Pair-level serialization (swipes, blocks, user messages, match insertion)
//! uses a transaction
//! advisory lock keyed by a hash of the canonical pair. Row-level
//! serialization (photo views, sanctions, appeals) uses `SELECT ... FOR UPDATE`.
//! The one-open-report, one-active-sanction and one-pending-appeal rules are
//! also enforced by partial unique indexes; see `migrations/`.

mod models;
mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, exists};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use amora_shared::clients::db::DbPool;
use amora_shared::{AdminRole, AppError, AppResult, Capabilities, ErrorCode};

use self::models::*;
use self::schema::*;
use super::{
    AppealReview, BlockStore, ConversationStore, IdentityStore, ModerationStore, PhotoStore, RematchOutcome,
    ReportReview, ReputationBounds, ReviewedReport, SwipeStore, ViewDeletion,
};
use crate::model::*;
use crate::ports::{PhotoCatalog, PortError};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| AppError::Internal(e.into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }

    async fn in_tx<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_conn(move |conn| conn.transaction(f)).await
    }
}

fn is_unique_violation(err: &DieselError) -> bool {
    matches!(err, DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
}

fn on_unique(err: DieselError, code: ErrorCode, message: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::new(code, message)
    } else {
        AppError::Database(err)
    }
}

pub(crate) fn pair_lock_key(a: Uuid, b: Uuid) -> i64 {
    let (lo, hi) = canonical_pair(a, b);
    let digest = Sha256::new().chain_update(lo.as_bytes()).chain_update(hi.as_bytes()).finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

fn lock_pair(conn: &mut PgConnection, a: Uuid, b: Uuid) -> QueryResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<diesel::sql_types::BigInt, _>(pair_lock_key(a, b))
        .execute(conn)?;
    Ok(())
}

/// `ILIKE` pattern matching `needle` literally anywhere.
pub(crate) fn contains_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

// --- shared transaction steps ---

fn lock_user(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<User>> {
    users::table
        .find(id)
        .for_update()
        .select(UserRow::as_select())
        .first(conn)
        .optional()?
        .map(User::try_from)
        .transpose()
}

fn write_user(conn: &mut PgConnection, u: &User) -> QueryResult<()> {
    diesel::update(users::table.find(u.id))
        .set((
            users::is_active.eq(u.is_active),
            users::is_banned.eq(u.is_banned),
            users::is_suspended.eq(u.is_suspended),
            users::reputation.eq(u.reputation),
            users::updated_at.eq(u.updated_at),
        ))
        .execute(conn)?;
    Ok(())
}

fn user_available(conn: &mut PgConnection, id: Uuid) -> QueryResult<bool> {
    diesel::select(exists(
        users::table
            .filter(users::id.eq(id))
            .filter(users::is_active.eq(true))
            .filter(users::is_banned.eq(false)),
    ))
    .get_result(conn)
}

fn blocked_either(conn: &mut PgConnection, a: Uuid, b: Uuid) -> QueryResult<bool> {
    diesel::select(exists(blocks::table.filter(
        blocks::blocker_id
            .eq(a)
            .and(blocks::blocked_id.eq(b))
            .or(blocks::blocker_id.eq(b).and(blocks::blocked_id.eq(a))),
    )))
    .get_result(conn)
}

fn pair_eligible(conn: &mut PgConnection, m: &Match) -> QueryResult<bool> {
    Ok(user_available(conn, m.user1_id)?
        && user_available(conn, m.user2_id)?
        && !blocked_either(conn, m.user1_id, m.user2_id)?)
}

/// Write-time re-check for a pair. Holds both user rows `FOR SHARE` so a
/// concurrent sanction commits either before this read or after the caller.
/// Caller must hold the pair lock.
fn ensure_pair_open(conn: &mut PgConnection, a: Uuid, b: Uuid) -> AppResult<()> {
    let (lo, hi) = canonical_pair(a, b);
    let rows: Vec<(Uuid, bool, bool)> = users::table
        .filter(users::id.eq_any(vec![lo, hi]))
        .order(users::id)
        .for_share()
        .select((users::id, users::is_active, users::is_banned))
        .load(conn)?;
    if rows.len() != 2 || rows.iter().any(|(_, active, banned)| !active || *banned) {
        return Err(AppError::forbidden("account is not available"));
    }
    if blocked_either(conn, a, b)? {
        return Err(AppError::new(ErrorCode::Blocked, "a block exists between these users"));
    }
    Ok(())
}

fn lock_match(conn: &mut PgConnection, id: Uuid) -> AppResult<Match> {
    matches::table
        .find(id)
        .for_update()
        .select(MatchRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))?
        .try_into()
}

fn save_match(conn: &mut PgConnection, m: &Match) -> QueryResult<()> {
    diesel::update(matches::table.find(m.id)).set(&MatchState::from(m)).execute(conn)?;
    Ok(())
}

fn match_by_pair(conn: &mut PgConnection, a: Uuid, b: Uuid) -> AppResult<Option<Match>> {
    let (user1, user2) = canonical_pair(a, b);
    matches::table
        .filter(matches::user1_id.eq(user1))
        .filter(matches::user2_id.eq(user2))
        .select(MatchRow::as_select())
        .first(conn)
        .optional()?
        .map(Match::try_from)
        .transpose()
}

/// Caller must hold the pair lock.
fn insert_match_locked(conn: &mut PgConnection, a: Uuid, b: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)> {
    if let Some(existing) = match_by_pair(conn, a, b)? {
        return Ok((existing, false));
    }
    let m = Match::new(a, b, now);
    diesel::insert_into(matches::table).values(MatchRow::from(&m)).execute(conn)?;
    Ok((m, true))
}

fn has_active(conn: &mut PgConnection, user: Uuid, kind: SanctionKind, except: Option<Uuid>) -> QueryResult<bool> {
    let ids: Vec<Uuid> = sanctions::table
        .filter(sanctions::target_user_id.eq(user))
        .filter(sanctions::kind.eq(kind.as_str()))
        .filter(sanctions::is_active.eq(true))
        .select(sanctions::id)
        .load(conn)?;
    Ok(ids.into_iter().any(|id| Some(id) != except))
}

fn insert_audit(conn: &mut PgConnection, action: &AdminAction) -> QueryResult<()> {
    diesel::insert_into(admin_actions::table).values(AdminActionRow::from(action)).execute(conn)?;
    Ok(())
}

fn adjust_reputation_tx(
    conn: &mut PgConnection,
    id: Uuid,
    delta: i32,
    bounds: ReputationBounds,
    now: DateTime<Utc>,
) -> AppResult<Option<User>> {
    let Some(mut user) = lock_user(conn, id)? else {
        return Ok(None);
    };
    user.reputation = bounds.clamp(user.reputation as i64 + delta as i64);
    user.updated_at = now;
    write_user(conn, &user)?;
    Ok(Some(user))
}

fn apply_sanction_tx(
    conn: &mut PgConnection,
    new: NewSanction,
    audit: Option<AdminAction>,
    bounds: ReputationBounds,
    now: DateTime<Utc>,
) -> AppResult<AppliedSanction> {
    let mut user = lock_user(conn, new.target_user_id)?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "sanction target not found"))?;
    let already_active = || {
        AppError::new(
            ErrorCode::SanctionAlreadyActive,
            format!("an active {} already exists for this user", new.kind),
        )
    };
    if new.kind.is_exclusive() && has_active(conn, new.target_user_id, new.kind, None)? {
        return Err(already_active());
    }

    let row = SanctionRow {
        id: Uuid::now_v7(),
        target_user_id: new.target_user_id,
        issuer_id: new.issuer_id,
        kind: new.kind.as_str().to_string(),
        reason: new.reason.clone(),
        duration_token: new.duration_token.clone(),
        expires_at: new.expires_at,
        is_active: true,
        source: new.source.as_str().to_string(),
        report_id: new.report_id,
        created_at: now,
        lifted_at: None,
        lifted_by: None,
    };
    diesel::insert_into(sanctions::table)
        .values(&row)
        .execute(conn)
        .map_err(|e| if is_unique_violation(&e) { already_active() } else { AppError::Database(e) })?;
    let sanction = Sanction::try_from(row)?;

    match new.kind {
        SanctionKind::Ban => {
            user.is_banned = true;
            user.is_active = false;
        }
        SanctionKind::Suspend => {
            user.is_suspended = true;
            user.is_active = false;
        }
        SanctionKind::Warn => {
            user.reputation = bounds.clamp(user.reputation as i64 + new.reputation_delta as i64);
        }
    }
    user.updated_at = now;
    write_user(conn, &user)?;

    let mut deactivated = Vec::new();
    if new.kind.is_exclusive() {
        let rows: Vec<MatchRow> = matches::table
            .filter(matches::is_active.eq(true))
            .filter(matches::user1_id.eq(user.id).or(matches::user2_id.eq(user.id)))
            .for_update()
            .select(MatchRow::as_select())
            .load(conn)?;
        for row in rows {
            let mut m = Match::try_from(row)?;
            m.deactivate(MatchDeactivation::Sanction, now);
            save_match(conn, &m)?;
            deactivated.push(m);
        }
    }

    if let Some(audit) = &audit {
        insert_audit(conn, audit)?;
    }
    Ok(AppliedSanction { sanction, deactivated_matches: deactivated })
}

fn lift_sanction_tx(
    conn: &mut PgConnection,
    id: Uuid,
    lifted_by: Option<Uuid>,
    now: DateTime<Utc>,
) -> AppResult<Sanction> {
    let sanction: Sanction = sanctions::table
        .find(id)
        .for_update()
        .select(SanctionRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::SanctionNotFound, "sanction not found"))?
        .try_into()?;
    if !sanction.is_active {
        return Err(AppError::new(ErrorCode::SanctionNotActive, "sanction is not active"));
    }

    let target = sanction.target_user_id;
    let still_banned = has_active(conn, target, SanctionKind::Ban, Some(id))?;
    let still_suspended = has_active(conn, target, SanctionKind::Suspend, Some(id))?;

    diesel::update(sanctions::table.find(id))
        .set((
            sanctions::is_active.eq(false),
            sanctions::lifted_at.eq(Some(now)),
            sanctions::lifted_by.eq(lifted_by),
        ))
        .execute(conn)?;

    if let Some(mut user) = lock_user(conn, target)? {
        match sanction.kind {
            SanctionKind::Ban if !still_banned => user.is_banned = false,
            SanctionKind::Suspend if !still_suspended => user.is_suspended = false,
            _ => {}
        }
        user.is_active = !user.is_banned && !user.is_suspended;
        user.updated_at = now;
        write_user(conn, &user)?;
    }

    Ok(Sanction { is_active: false, lifted_at: Some(now), lifted_by, ..sanction })
}

fn lock_photo(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<EphemeralPhoto>> {
    Ok(ephemeral_photos::table
        .find(id)
        .for_update()
        .select(PhotoRow::as_select())
        .first(conn)
        .optional()?
        .map(EphemeralPhoto::from))
}

fn write_photo_state(conn: &mut PgConnection, p: &EphemeralPhoto) -> QueryResult<()> {
    diesel::update(ephemeral_photos::table.find(p.id))
        .set((
            ephemeral_photos::view_count.eq(p.view_count),
            ephemeral_photos::is_viewed.eq(p.is_viewed),
            ephemeral_photos::viewed_at.eq(p.viewed_at),
            ephemeral_photos::is_expired.eq(p.is_expired),
            ephemeral_photos::expired_at.eq(p.expired_at),
        ))
        .execute(conn)?;
    Ok(())
}

fn expire_in_place(photo: &mut EphemeralPhoto, now: DateTime<Utc>) -> bool {
    if photo.is_expired {
        return false;
    }
    photo.is_expired = true;
    photo.expired_at = Some(now);
    true
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        self.with_conn(move |conn| {
            users::table
                .find(id)
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn upsert_user(&self, user: User) -> AppResult<User> {
        self.with_conn(move |conn| {
            diesel::insert_into(users::table)
                .values(UserRow::from(&user))
                .on_conflict(users::id)
                .do_nothing()
                .execute(conn)?;
            users::table.find(user.id).select(UserRow::as_select()).first(conn)?.try_into()
        })
        .await
    }

    async fn set_admin_role(
        &self,
        id: Uuid,
        role: Option<AdminRole>,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> AppResult<Option<User>> {
        self.with_conn(move |conn| {
            diesel::update(users::table.find(id))
                .set((
                    users::admin_role.eq(role.map(|r| r.as_str().to_string())),
                    users::can_manage_reports.eq(capabilities.can_manage_reports),
                    users::can_ban_users.eq(capabilities.can_ban_users),
                    users::can_escalate.eq(capabilities.can_escalate),
                    users::updated_at.eq(now),
                ))
                .returning(UserRow::as_returning())
                .get_result(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn apply_ban(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<User>> {
        self.with_conn(move |conn| {
            diesel::update(users::table.find(id))
                .set((users::is_banned.eq(true), users::is_active.eq(false), users::updated_at.eq(now)))
                .returning(UserRow::as_returning())
                .get_result(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn lift_ban(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<User>> {
        self.in_tx(move |conn| {
            let Some(mut user) = lock_user(conn, id)? else {
                return Ok(None);
            };
            if !has_active(conn, id, SanctionKind::Ban, None)? {
                user.is_banned = false;
                user.is_active = !user.is_suspended;
                user.updated_at = now;
                write_user(conn, &user)?;
            }
            Ok(Some(user))
        })
        .await
    }

    async fn adjust_reputation(
        &self,
        id: Uuid,
        delta: i32,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<Option<User>> {
        self.in_tx(move |conn| adjust_reputation_tx(conn, id, delta, bounds, now)).await
    }
}

#[async_trait]
impl BlockStore for PgStore {
    async fn insert_block(&self, block: Block) -> AppResult<Block> {
        self.in_tx(move |conn| {
            lock_pair(conn, block.blocker_id, block.blocked_id)?;
            diesel::insert_into(blocks::table)
                .values(BlockRow::from(&block))
                .execute(conn)
                .map_err(|e| on_unique(e, ErrorCode::AlreadyBlocked, "user is already blocked"))?;
            Ok(block)
        })
        .await
    }

    async fn delete_block(&self, blocker: Uuid, blocked: Uuid) -> AppResult<bool> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(
                blocks::table.filter(blocks::blocker_id.eq(blocker)).filter(blocks::blocked_id.eq(blocked)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn find_block(&self, blocker: Uuid, blocked: Uuid) -> AppResult<Option<Block>> {
        self.with_conn(move |conn| {
            Ok(blocks::table
                .filter(blocks::blocker_id.eq(blocker))
                .filter(blocks::blocked_id.eq(blocked))
                .select(BlockRow::as_select())
                .first(conn)
                .optional()?
                .map(Block::from))
        })
        .await
    }

    async fn list_blocks_by(&self, blocker: Uuid) -> AppResult<Vec<Block>> {
        self.with_conn(move |conn| {
            let rows: Vec<BlockRow> = blocks::table
                .filter(blocks::blocker_id.eq(blocker))
                .order(blocks::created_at.desc())
                .select(BlockRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(Block::from).collect())
        })
        .await
    }

    async fn blocking_ids(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        self.with_conn(move |conn| {
            Ok(blocks::table.filter(blocks::blocker_id.eq(user)).select(blocks::blocked_id).load(conn)?)
        })
        .await
    }

    async fn blocked_by_ids(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        self.with_conn(move |conn| {
            Ok(blocks::table.filter(blocks::blocked_id.eq(user)).select(blocks::blocker_id).load(conn)?)
        })
        .await
    }
}

#[derive(QueryableByName)]
struct PairRow {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    user1_id: Uuid,
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    user2_id: Uuid,
}

const ORPHAN_LIKES_SQL: &str = "\
    SELECT a.swiper_id AS user1_id, a.swiped_id AS user2_id \
    FROM swipes a \
    JOIN swipes b ON b.swiper_id = a.swiped_id AND b.swiped_id = a.swiper_id \
    WHERE a.swiper_id < a.swiped_id \
      AND a.direction IN ('like', 'super_like') \
      AND b.direction IN ('like', 'super_like') \
      AND NOT EXISTS ( \
          SELECT 1 FROM matches m WHERE m.user1_id = a.swiper_id AND m.user2_id = a.swiped_id \
      ) \
    LIMIT $1";

#[async_trait]
impl SwipeStore for PgStore {
    async fn record_swipe_atomic(&self, swipe: Swipe, now: DateTime<Utc>) -> AppResult<SwipeRecord> {
        self.in_tx(move |conn| {
            lock_pair(conn, swipe.swiper_id, swipe.swiped_id)?;
            ensure_pair_open(conn, swipe.swiper_id, swipe.swiped_id)?;
            diesel::insert_into(swipes::table)
                .values(SwipeRow::from(&swipe))
                .execute(conn)
                .map_err(|e| on_unique(e, ErrorCode::AlreadySwiped, "already swiped on this user"))?;

            if !swipe.direction.is_like() {
                return Ok(SwipeRecord { swipe, matched: None, match_created: false });
            }

            let reciprocal: Option<String> = swipes::table
                .filter(swipes::swiper_id.eq(swipe.swiped_id))
                .filter(swipes::swiped_id.eq(swipe.swiper_id))
                .select(swipes::direction)
                .first(conn)
                .optional()?;
            let reciprocal = match reciprocal {
                Some(raw) => raw.parse::<SwipeDirection>()?.is_like(),
                None => false,
            };
            if !reciprocal {
                return Ok(SwipeRecord { swipe, matched: None, match_created: false });
            }

            let (m, created) = insert_match_locked(conn, swipe.swiper_id, swipe.swiped_id, now)?;
            Ok(SwipeRecord { swipe, matched: Some(m), match_created: created })
        })
        .await
    }

    async fn find_swipe(&self, swiper: Uuid, swiped: Uuid) -> AppResult<Option<Swipe>> {
        self.with_conn(move |conn| {
            swipes::table
                .filter(swipes::swiper_id.eq(swiper))
                .filter(swipes::swiped_id.eq(swiped))
                .select(SwipeRow::as_select())
                .first(conn)
                .optional()?
                .map(Swipe::try_from)
                .transpose()
        })
        .await
    }

    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>> {
        self.with_conn(move |conn| {
            matches::table
                .find(id)
                .select(MatchRow::as_select())
                .first(conn)
                .optional()?
                .map(Match::try_from)
                .transpose()
        })
        .await
    }

    async fn find_match(&self, a: Uuid, b: Uuid) -> AppResult<Option<Match>> {
        self.with_conn(move |conn| match_by_pair(conn, a, b)).await
    }

    async fn list_matches(&self, user: Uuid, active_only: bool) -> AppResult<Vec<Match>> {
        self.with_conn(move |conn| {
            let mut query = matches::table
                .filter(matches::user1_id.eq(user).or(matches::user2_id.eq(user)))
                .select(MatchRow::as_select())
                .order(matches::created_at.desc())
                .into_boxed();
            if active_only {
                query = query.filter(matches::is_active.eq(true));
            }
            convert_all(query.load(conn)?)
        })
        .await
    }

    async fn deactivate_match(
        &self,
        id: Uuid,
        reason: MatchDeactivation,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Match>> {
        self.in_tx(move |conn| {
            let row = matches::table
                .find(id)
                .for_update()
                .select(MatchRow::as_select())
                .first(conn)
                .optional()?;
            let Some(mut m) = row.map(Match::try_from).transpose()? else {
                return Ok(None);
            };
            if !m.is_active {
                return Ok(None);
            }
            m.deactivate(reason, now);
            save_match(conn, &m)?;
            Ok(Some(m))
        })
        .await
    }

    async fn reactivate_match_atomic(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)> {
        self.in_tx(move |conn| {
            let mut m = lock_match(conn, id)?;
            if m.is_active {
                return Err(AppError::new(ErrorCode::MatchAlreadyActive, "match is already active"));
            }
            if !pair_eligible(conn, &m)? {
                return Ok((m, false));
            }
            m.reactivate(now);
            save_match(conn, &m)?;
            Ok((m, true))
        })
        .await
    }

    async fn request_rematch_atomic(&self, id: Uuid, user: Uuid, now: DateTime<Utc>) -> AppResult<RematchOutcome> {
        self.in_tx(move |conn| {
            let mut m = lock_match(conn, id)?;
            m.ensure_participant(user)?;
            if m.is_active {
                return Err(AppError::new(ErrorCode::MatchAlreadyActive, "match is already active"));
            }
            if m.deactivation_reason != Some(MatchDeactivation::Sanction) {
                return Err(AppError::new(ErrorCode::MatchInactive, "only sanctioned matches can be rematched"));
            }

            if m.user1_id == user {
                m.user1_rematch = true;
            } else {
                m.user2_rematch = true;
            }
            m.updated_at = now;

            let outcome = if m.user1_rematch && m.user2_rematch && pair_eligible(conn, &m)? {
                m.reactivate(now);
                RematchOutcome::Reactivated(m.clone())
            } else {
                RematchOutcome::Recorded(m.clone())
            };
            save_match(conn, &m)?;
            Ok(outcome)
        })
        .await
    }

    async fn insert_match_if_absent(&self, a: Uuid, b: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)> {
        self.in_tx(move |conn| {
            lock_pair(conn, a, b)?;
            insert_match_locked(conn, a, b, now)
        })
        .await
    }

    async fn find_orphan_reciprocal_likes(&self, limit: i64) -> AppResult<Vec<(Uuid, Uuid)>> {
        self.with_conn(move |conn| {
            let rows: Vec<PairRow> = diesel::sql_query(ORPHAN_LIKES_SQL)
                .bind::<diesel::sql_types::BigInt, _>(limit)
                .load(conn)?;
            Ok(rows.into_iter().map(|r| (r.user1_id, r.user2_id)).collect())
        })
        .await
    }
}

fn load_conversation(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<Conversation>> {
    Ok(conversations::table
        .find(id)
        .select(ConversationRow::as_select())
        .first(conn)
        .optional()?
        .map(Conversation::from))
}

fn unread_for(conn: &mut PgConnection, conversation_id: Uuid, user: Uuid) -> QueryResult<i64> {
    messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .filter(messages::sender_id.ne(user))
        .filter(messages::is_read.eq(false))
        .select(count_star())
        .first(conn)
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn append_message_atomic(&self, new: NewMessage, now: DateTime<Utc>) -> AppResult<AppendedMessage> {
        self.in_tx(move |conn| {
            let (user1, user2): (Uuid, Uuid) = matches::table
                .find(new.match_id)
                .select((matches::user1_id, matches::user2_id))
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))?;
            if new.message_type != MessageType::System {
                lock_pair(conn, user1, user2)?;
                ensure_pair_open(conn, user1, user2)?;
            }
            // Sanctions and unmatch take this row FOR UPDATE.
            let m: Match = matches::table
                .find(new.match_id)
                .for_share()
                .select(MatchRow::as_select())
                .first(conn)?
                .try_into()?;
            if !m.is_active {
                return Err(AppError::new(ErrorCode::MatchInactive, "match is not active"));
            }

            let opened = diesel::insert_into(conversations::table)
                .values(ConversationRow {
                    id: Uuid::now_v7(),
                    match_id: m.id,
                    user1_id: m.user1_id,
                    user2_id: m.user2_id,
                    last_message_id: None,
                    user1_deleted_at: None,
                    user2_deleted_at: None,
                    created_at: now,
                    updated_at: now,
                })
                .on_conflict(conversations::match_id)
                .do_nothing()
                .execute(conn)?;
            let conversation: ConversationRow = conversations::table
                .filter(conversations::match_id.eq(m.id))
                .for_update()
                .select(ConversationRow::as_select())
                .first(conn)?;

            let last: Option<(DateTime<Utc>, i64)> = messages::table
                .filter(messages::conversation_id.eq(conversation.id))
                .order(messages::seq.desc())
                .select((messages::created_at, messages::seq))
                .first(conn)
                .optional()?;
            let (created_at, seq) = match last {
                Some((last_at, last_seq)) => (now.max(last_at), last_seq + 1),
                None => (now, 1),
            };

            let row = MessageRow {
                id: new.id,
                conversation_id: conversation.id,
                sender_id: new.sender_id,
                message_type: new.message_type.as_str().to_string(),
                content: new.content,
                attachment_ref: new.attachment_ref,
                is_read: false,
                content_verified: new.content_verified,
                seq,
                created_at,
            };
            diesel::insert_into(messages::table).values(&row).execute(conn)?;

            let conversation: Conversation = diesel::update(conversations::table.find(conversation.id))
                .set((
                    conversations::last_message_id.eq(Some(row.id)),
                    conversations::updated_at.eq(created_at),
                    conversations::user1_deleted_at.eq(None::<DateTime<Utc>>),
                    conversations::user2_deleted_at.eq(None::<DateTime<Utc>>),
                ))
                .returning(ConversationRow::as_returning())
                .get_result(conn)?
                .into();

            Ok(AppendedMessage {
                conversation,
                message: row.try_into()?,
                conversation_created: opened == 1,
            })
        })
        .await
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        self.with_conn(move |conn| load_conversation(conn, id)).await
    }

    async fn find_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>> {
        self.with_conn(move |conn| {
            Ok(conversations::table
                .filter(conversations::match_id.eq(match_id))
                .select(ConversationRow::as_select())
                .first(conn)
                .optional()?
                .map(Conversation::from))
        })
        .await
    }

    async fn list_conversations(&self, user: Uuid) -> AppResult<Vec<ConversationSummary>> {
        self.with_conn(move |conn| {
            let rows: Vec<ConversationRow> = conversations::table
                .filter(
                    conversations::user1_id
                        .eq(user)
                        .and(conversations::user1_deleted_at.is_null())
                        .or(conversations::user2_id.eq(user).and(conversations::user2_deleted_at.is_null())),
                )
                .order(conversations::updated_at.desc())
                .select(ConversationRow::as_select())
                .load(conn)?;

            let mut summaries = Vec::with_capacity(rows.len());
            for row in rows {
                let conversation = Conversation::from(row);
                let last_message = messages::table
                    .filter(messages::conversation_id.eq(conversation.id))
                    .order(messages::seq.desc())
                    .select(MessageRow::as_select())
                    .first(conn)
                    .optional()?
                    .map(Message::try_from)
                    .transpose()?;
                let unread = unread_for(conn, conversation.id, user)?;
                summaries.push(ConversationSummary {
                    other_user_id: conversation.other(user),
                    conversation,
                    last_message,
                    unread_count: unread as u64,
                });
            }
            Ok(summaries)
        })
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        cursor: MessageCursor,
        search: Option<&str>,
    ) -> AppResult<Vec<Message>> {
        let pattern = search.map(contains_pattern);
        self.with_conn(move |conn| {
            let mut query = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .select(MessageRow::as_select())
                .into_boxed();
            if let Some(before) = cursor.before {
                query = query.filter(messages::created_at.lt(before));
            }
            if let Some(after) = cursor.after {
                query = query.filter(messages::created_at.gt(after));
            }
            if let Some(pattern) = pattern {
                query = query
                    .filter(messages::message_type.eq(MessageType::Text.as_str()))
                    .filter(messages::content.ilike(pattern));
            }
            query = if cursor.after.is_some() && cursor.before.is_none() {
                query.order((messages::created_at.asc(), messages::seq.asc()))
            } else {
                query.order((messages::created_at.desc(), messages::seq.desc()))
            };
            convert_all(query.limit(cursor.limit.max(0)).load(conn)?)
        })
        .await
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.with_conn(move |conn| {
            messages::table
                .find(id)
                .select(MessageRow::as_select())
                .first(conn)
                .optional()?
                .map(Message::try_from)
                .transpose()
        })
        .await
    }

    async fn mark_read(&self, conversation_id: Uuid, reader: Uuid) -> AppResult<u64> {
        self.with_conn(move |conn| {
            let updated = diesel::update(
                messages::table
                    .filter(messages::conversation_id.eq(conversation_id))
                    .filter(messages::sender_id.ne(reader))
                    .filter(messages::is_read.eq(false)),
            )
            .set(messages::is_read.eq(true))
            .execute(conn)?;
            Ok(updated as u64)
        })
        .await
    }

    async fn unread_count(&self, user: Uuid) -> AppResult<u64> {
        self.with_conn(move |conn| {
            let involved = conversations::table
                .filter(conversations::user1_id.eq(user).or(conversations::user2_id.eq(user)))
                .select(conversations::id);
            let count: i64 = messages::table
                .filter(messages::conversation_id.eq_any(involved))
                .filter(messages::sender_id.ne(user))
                .filter(messages::is_read.eq(false))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }

    async fn unread_in_conversation(&self, conversation_id: Uuid, user: Uuid) -> AppResult<u64> {
        self.with_conn(move |conn| Ok(unread_for(conn, conversation_id, user)? as u64)).await
    }

    async fn delete_view(&self, conversation_id: Uuid, user: Uuid, now: DateTime<Utc>) -> AppResult<ViewDeletion> {
        self.in_tx(move |conn| {
            let mut conversation: Conversation = conversations::table
                .find(conversation_id)
                .for_update()
                .select(ConversationRow::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?
                .into();
            conversation.ensure_member(user)?;

            if conversation.user1_id == user {
                conversation.user1_deleted_at.get_or_insert(now);
            } else {
                conversation.user2_deleted_at.get_or_insert(now);
            }

            if conversation.user1_deleted_at.is_some() && conversation.user2_deleted_at.is_some() {
                diesel::delete(conversations::table.find(conversation_id)).execute(conn)?;
                return Ok(ViewDeletion::Purged);
            }
            diesel::update(conversations::table.find(conversation_id))
                .set((
                    conversations::user1_deleted_at.eq(conversation.user1_deleted_at),
                    conversations::user2_deleted_at.eq(conversation.user2_deleted_at),
                ))
                .execute(conn)?;
            Ok(ViewDeletion::Hidden)
        })
        .await
    }
}

#[async_trait]
impl PhotoStore for PgStore {
    async fn insert_photo(&self, photo: EphemeralPhoto) -> AppResult<EphemeralPhoto> {
        self.with_conn(move |conn| {
            diesel::insert_into(ephemeral_photos::table).values(PhotoRow::from(&photo)).execute(conn)?;
            Ok(photo)
        })
        .await
    }

    async fn get_photo(&self, id: Uuid) -> AppResult<Option<EphemeralPhoto>> {
        self.with_conn(move |conn| {
            Ok(ephemeral_photos::table
                .find(id)
                .select(PhotoRow::as_select())
                .first(conn)
                .optional()?
                .map(EphemeralPhoto::from))
        })
        .await
    }

    async fn find_by_access_key(&self, access_key: &str) -> AppResult<Option<EphemeralPhoto>> {
        let access_key = access_key.to_string();
        self.with_conn(move |conn| {
            Ok(ephemeral_photos::table
                .filter(ephemeral_photos::access_key.eq(access_key))
                .select(PhotoRow::as_select())
                .first(conn)
                .optional()?
                .map(EphemeralPhoto::from))
        })
        .await
    }

    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<(EphemeralPhoto, bool)>> {
        self.in_tx(move |conn| {
            let Some(mut photo) = lock_photo(conn, id)? else {
                return Ok(None);
            };
            let transitioned = expire_in_place(&mut photo, now);
            if transitioned {
                write_photo_state(conn, &photo)?;
            }
            Ok(Some((photo, transitioned)))
        })
        .await
    }

    async fn record_view_atomic(
        &self,
        id: Uuid,
        viewer: Option<Uuid>,
        ip: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<ViewOutcome> {
        self.in_tx(move |conn| {
            let mut photo =
                lock_photo(conn, id)?.ok_or_else(|| AppError::new(ErrorCode::PhotoNotFound, "photo not found"))?;

            if photo.is_spent(now) {
                if expire_in_place(&mut photo, now) {
                    write_photo_state(conn, &photo)?;
                }
                return Ok(ViewOutcome::Expired { photo });
            }

            photo.view_count += 1;
            photo.viewed_at.get_or_insert(now);
            if photo.view_count >= photo.max_views {
                photo.is_viewed = true;
                expire_in_place(&mut photo, now);
            }
            write_photo_state(conn, &photo)?;

            let row = PhotoViewRow {
                id: Uuid::now_v7(),
                photo_id: id,
                viewer_id: viewer,
                ip,
                user_agent,
                viewed_at: now,
                duration_ms: None,
            };
            diesel::insert_into(photo_views::table).values(&row).execute(conn)?;
            Ok(ViewOutcome::Viewed { photo, view: row.into() })
        })
        .await
    }

    async fn complete_view(&self, view_id: Uuid, viewer: Uuid, duration_ms: i64) -> AppResult<Option<PhotoView>> {
        self.with_conn(move |conn| {
            Ok(diesel::update(
                photo_views::table.filter(photo_views::id.eq(view_id)).filter(photo_views::viewer_id.eq(viewer)),
            )
            .set(photo_views::duration_ms.eq(Some(duration_ms)))
            .returning(PhotoViewRow::as_returning())
            .get_result(conn)
            .optional()?
            .map(PhotoView::from))
        })
        .await
    }

    async fn list_views(&self, photo_id: Uuid) -> AppResult<Vec<PhotoView>> {
        self.with_conn(move |conn| {
            let rows: Vec<PhotoViewRow> = photo_views::table
                .filter(photo_views::photo_id.eq(photo_id))
                .order(photo_views::viewed_at.asc())
                .select(PhotoViewRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(PhotoView::from).collect())
        })
        .await
    }

    async fn expire_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<EphemeralPhoto>> {
        self.in_tx(move |conn| {
            let due: Vec<Uuid> = ephemeral_photos::table
                .filter(ephemeral_photos::is_expired.eq(false))
                .filter(ephemeral_photos::is_deleted.eq(false))
                .filter(ephemeral_photos::expires_at.lt(now))
                .order(ephemeral_photos::expires_at.asc())
                .limit(limit)
                .select(ephemeral_photos::id)
                .for_update()
                .skip_locked()
                .load(conn)?;
            let rows: Vec<PhotoRow> = diesel::update(ephemeral_photos::table.filter(ephemeral_photos::id.eq_any(due)))
                .set((ephemeral_photos::is_expired.eq(true), ephemeral_photos::expired_at.eq(Some(now))))
                .returning(PhotoRow::as_returning())
                .get_results(conn)?;
            Ok(rows.into_iter().map(EphemeralPhoto::from).collect())
        })
        .await
    }

    async fn due_for_deletion(&self, expired_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<EphemeralPhoto>> {
        self.with_conn(move |conn| {
            let rows: Vec<PhotoRow> = ephemeral_photos::table
                .filter(ephemeral_photos::is_expired.eq(true))
                .filter(ephemeral_photos::is_deleted.eq(false))
                .filter(ephemeral_photos::expired_at.le(expired_before))
                .order(ephemeral_photos::expired_at.asc())
                .limit(limit)
                .select(PhotoRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(EphemeralPhoto::from).collect())
        })
        .await
    }

    async fn mark_deleted(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        self.with_conn(move |conn| {
            let updated = diesel::update(
                ephemeral_photos::table
                    .filter(ephemeral_photos::id.eq(id))
                    .filter(ephemeral_photos::is_deleted.eq(false)),
            )
            .set((ephemeral_photos::is_deleted.eq(true), ephemeral_photos::deleted_at.eq(Some(now))))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }
}

#[async_trait]
impl ModerationStore for PgStore {
    async fn insert_report(&self, report: Report) -> AppResult<Report> {
        self.with_conn(move |conn| {
            diesel::insert_into(reports::table)
                .values(ReportRow::from(&report))
                .execute(conn)
                .map_err(|e| on_unique(e, ErrorCode::DuplicateReport, "an open report already exists for this user"))?;
            Ok(report)
        })
        .await
    }

    async fn has_open_report(&self, reporter: Uuid, reported: Uuid) -> AppResult<bool> {
        self.with_conn(move |conn| {
            let open = vec![ReportStatus::Pending.as_str(), ReportStatus::Escalated.as_str()];
            Ok(diesel::select(exists(
                reports::table
                    .filter(reports::reporter_id.eq(reporter))
                    .filter(reports::reported_user_id.eq(reported))
                    .filter(reports::status.eq_any(open)),
            ))
            .get_result(conn)?)
        })
        .await
    }

    async fn get_report(&self, id: Uuid) -> AppResult<Option<Report>> {
        self.with_conn(move |conn| {
            reports::table
                .find(id)
                .select(ReportRow::as_select())
                .first(conn)
                .optional()?
                .map(Report::try_from)
                .transpose()
        })
        .await
    }

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        include_escalated: bool,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Report>, u64)> {
        self.with_conn(move |conn| {
            let mut items = reports::table.select(ReportRow::as_select()).into_boxed();
            let mut total = reports::table.select(count_star()).into_boxed();
            if let Some(status) = status {
                items = items.filter(reports::status.eq(status.as_str()));
                total = total.filter(reports::status.eq(status.as_str()));
            }
            if !include_escalated {
                items = items.filter(reports::status.ne(ReportStatus::Escalated.as_str()));
                total = total.filter(reports::status.ne(ReportStatus::Escalated.as_str()));
            }
            let total: i64 = total.first(conn)?;
            let rows = items.order(reports::created_at.asc()).offset(offset).limit(limit).load(conn)?;
            Ok((convert_all(rows)?, total as u64))
        })
        .await
    }

    async fn review_report_atomic(&self, review: ReportReview) -> AppResult<ReviewedReport> {
        self.in_tx(move |conn| {
            let report: Report = reports::table
                .find(review.report_id)
                .for_update()
                .select(ReportRow::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::new(ErrorCode::ReportNotFound, "report not found"))?
                .try_into()?;

            let reviewable = report.status == ReportStatus::Pending
                || (review.allow_escalated && report.status == ReportStatus::Escalated);
            if !reviewable {
                return Err(AppError::new(ErrorCode::ReportAlreadyReviewed, format!("report is {}", report.status)));
            }

            let applied = match review.sanction {
                Some(sanction) => Some(apply_sanction_tx(conn, sanction, None, review.bounds, review.now)?),
                None => None,
            };
            if let Some(delta) = review.reputation_delta {
                adjust_reputation_tx(conn, report.reported_user_id, delta, review.bounds, review.now)?;
            }

            let notes = match (report.resolution_notes.clone(), review.notes) {
                (Some(prev), Some(next)) => Some(format!("{prev}\n{next}")),
                (prev, next) => next.or(prev),
            };
            let updated: Report = diesel::update(reports::table.find(report.id))
                .set((
                    reports::status.eq(review.status.as_str()),
                    reports::reviewer_id.eq(Some(review.reviewer_id)),
                    reports::reviewed_at.eq(Some(review.now)),
                    reports::resolution_notes.eq(notes),
                    reports::updated_at.eq(review.now),
                ))
                .returning(ReportRow::as_returning())
                .get_result(conn)?
                .try_into()?;
            insert_audit(conn, &review.audit)?;

            Ok(ReviewedReport { report: updated, applied })
        })
        .await
    }

    async fn apply_sanction_atomic(
        &self,
        sanction: NewSanction,
        audit: Option<AdminAction>,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<AppliedSanction> {
        self.in_tx(move |conn| apply_sanction_tx(conn, sanction, audit, bounds, now)).await
    }

    async fn lift_sanction_atomic(
        &self,
        id: Uuid,
        lifted_by: Option<Uuid>,
        audit: Option<AdminAction>,
        now: DateTime<Utc>,
    ) -> AppResult<Sanction> {
        self.in_tx(move |conn| {
            let lifted = lift_sanction_tx(conn, id, lifted_by, now)?;
            if let Some(audit) = &audit {
                insert_audit(conn, audit)?;
            }
            Ok(lifted)
        })
        .await
    }

    async fn get_sanction(&self, id: Uuid) -> AppResult<Option<Sanction>> {
        self.with_conn(move |conn| {
            sanctions::table
                .find(id)
                .select(SanctionRow::as_select())
                .first(conn)
                .optional()?
                .map(Sanction::try_from)
                .transpose()
        })
        .await
    }

    async fn list_sanctions(&self, user: Uuid) -> AppResult<Vec<Sanction>> {
        self.with_conn(move |conn| {
            convert_all(
                sanctions::table
                    .filter(sanctions::target_user_id.eq(user))
                    .order(sanctions::created_at.desc())
                    .select(SanctionRow::as_select())
                    .load(conn)?,
            )
        })
        .await
    }

    async fn active_sanctions(&self, user: Uuid) -> AppResult<Vec<Sanction>> {
        self.with_conn(move |conn| {
            convert_all(
                sanctions::table
                    .filter(sanctions::target_user_id.eq(user))
                    .filter(sanctions::is_active.eq(true))
                    .order(sanctions::created_at.desc())
                    .select(SanctionRow::as_select())
                    .load(conn)?,
            )
        })
        .await
    }

    async fn expired_sanctions(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Sanction>> {
        self.with_conn(move |conn| {
            convert_all(
                sanctions::table
                    .filter(sanctions::is_active.eq(true))
                    .filter(sanctions::expires_at.le(now))
                    .order(sanctions::expires_at.asc())
                    .limit(limit)
                    .select(SanctionRow::as_select())
                    .load(conn)?,
            )
        })
        .await
    }

    async fn count_resolved_reporters(&self, target: Uuid, since: DateTime<Utc>) -> AppResult<u64> {
        self.with_conn(move |conn| {
            let reporters: Vec<Uuid> = reports::table
                .filter(reports::reported_user_id.eq(target))
                .filter(reports::status.eq(ReportStatus::Resolved.as_str()))
                .filter(reports::reviewed_at.ge(since))
                .select(reports::reporter_id)
                .distinct()
                .load(conn)?;
            Ok(reporters.len() as u64)
        })
        .await
    }

    async fn insert_appeal(&self, appeal: Appeal) -> AppResult<Appeal> {
        self.with_conn(move |conn| {
            diesel::insert_into(appeals::table)
                .values(AppealRow::from(&appeal))
                .execute(conn)
                .map_err(|e| on_unique(e, ErrorCode::AppealAlreadyPending, "an appeal is already pending"))?;
            Ok(appeal)
        })
        .await
    }

    async fn get_appeal(&self, id: Uuid) -> AppResult<Option<Appeal>> {
        self.with_conn(move |conn| {
            appeals::table
                .find(id)
                .select(AppealRow::as_select())
                .first(conn)
                .optional()?
                .map(Appeal::try_from)
                .transpose()
        })
        .await
    }

    async fn list_appeals(
        &self,
        status: Option<AppealStatus>,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Appeal>, u64)> {
        self.with_conn(move |conn| {
            let mut items = appeals::table.select(AppealRow::as_select()).into_boxed();
            let mut total = appeals::table.select(count_star()).into_boxed();
            if let Some(status) = status {
                items = items.filter(appeals::status.eq(status.as_str()));
                total = total.filter(appeals::status.eq(status.as_str()));
            }
            let total: i64 = total.first(conn)?;
            let rows = items.order(appeals::created_at.asc()).offset(offset).limit(limit).load(conn)?;
            Ok((convert_all(rows)?, total as u64))
        })
        .await
    }

    async fn review_appeal_atomic(&self, review: AppealReview) -> AppResult<ReviewedAppeal> {
        self.in_tx(move |conn| {
            let appeal: Appeal = appeals::table
                .find(review.appeal_id)
                .for_update()
                .select(AppealRow::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::new(ErrorCode::AppealNotFound, "appeal not found"))?
                .try_into()?;
            if appeal.status != AppealStatus::Pending {
                return Err(AppError::new(ErrorCode::AppealAlreadyReviewed, format!("appeal is {}", appeal.status)));
            }

            let sanction_active: bool = sanctions::table
                .find(appeal.sanction_id)
                .select(sanctions::is_active)
                .first(conn)
                .optional()?
                .unwrap_or(false);
            let lifted = if review.approved && sanction_active {
                Some(lift_sanction_tx(conn, appeal.sanction_id, Some(review.reviewer_id), review.now)?)
            } else {
                None
            };

            let status = if review.approved { AppealStatus::Approved } else { AppealStatus::Rejected };
            let updated: Appeal = diesel::update(appeals::table.find(appeal.id))
                .set((
                    appeals::status.eq(status.as_str()),
                    appeals::reviewer_id.eq(Some(review.reviewer_id)),
                    appeals::reviewed_at.eq(Some(review.now)),
                    appeals::review_notes.eq(review.notes),
                ))
                .returning(AppealRow::as_returning())
                .get_result(conn)?
                .try_into()?;
            insert_audit(conn, &review.audit)?;

            Ok(ReviewedAppeal { appeal: updated, lifted })
        })
        .await
    }

    async fn close_stale_appeals(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Appeal>> {
        self.in_tx(move |conn| {
            let inactive = sanctions::table.filter(sanctions::is_active.eq(false)).select(sanctions::id);
            let stale: Vec<Uuid> = appeals::table
                .filter(appeals::status.eq(AppealStatus::Pending.as_str()))
                .filter(appeals::sanction_id.eq_any(inactive))
                .limit(limit)
                .select(appeals::id)
                .for_update()
                .skip_locked()
                .load(conn)?;
            let rows: Vec<AppealRow> = diesel::update(appeals::table.filter(appeals::id.eq_any(stale)))
                .set((
                    appeals::status.eq(AppealStatus::Reviewed.as_str()),
                    appeals::reviewed_at.eq(Some(now)),
                    appeals::review_notes.eq(Some("sanction no longer active")),
                ))
                .returning(AppealRow::as_returning())
                .get_results(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn insert_admin_action(&self, action: AdminAction) -> AppResult<()> {
        self.with_conn(move |conn| Ok(insert_audit(conn, &action)?)).await
    }

    async fn list_admin_actions(&self, target: Uuid) -> AppResult<Vec<AdminAction>> {
        self.with_conn(move |conn| {
            let rows: Vec<AdminActionRow> = admin_actions::table
                .filter(admin_actions::target_user_id.eq(target))
                .order(admin_actions::created_at.asc())
                .select(AdminActionRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(AdminAction::from).collect())
        })
        .await
    }
}

#[async_trait]
impl PhotoCatalog for PgStore {
    async fn is_owned_approved(&self, owner_id: Uuid, photo_id: Uuid) -> Result<bool, PortError> {
        self.with_conn(move |conn| {
            Ok(diesel::select(exists(
                profile_photos::table
                    .filter(profile_photos::id.eq(photo_id))
                    .filter(profile_photos::owner_id.eq(owner_id))
                    .filter(profile_photos::is_approved.eq(true)),
            ))
            .get_result::<bool>(conn)?)
        })
        .await
        .map_err(|e| PortError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_lock_key_ignores_order() {
        let (a, b) = (Uuid::from_u128(7), Uuid::from_u128(3));
        assert_eq!(pair_lock_key(a, b), pair_lock_key(b, a));
        assert_ne!(pair_lock_key(a, b), pair_lock_key(a, Uuid::from_u128(4)));
    }

    #[test]
    fn search_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(contains_pattern("hi"), "%hi%");
    }
}
