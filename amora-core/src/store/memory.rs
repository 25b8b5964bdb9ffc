//! Process-local store. One mutex guards all state, so every `_atomic`
//! method is a critical section. Used by tests and single-node development.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use amora_shared::{AdminRole, AppError, AppResult, Capabilities, ErrorCode};

use super::*;
use crate::model::*;
use crate::ports::{PhotoCatalog, PortError};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    profile_photos: HashMap<Uuid, (Uuid, bool)>,
    blocks: HashMap<(Uuid, Uuid), Block>,
    swipes: HashMap<(Uuid, Uuid), Swipe>,
    matches: HashMap<Uuid, Match>,
    match_by_pair: HashMap<(Uuid, Uuid), Uuid>,
    conversations: HashMap<Uuid, Conversation>,
    conversation_by_match: HashMap<Uuid, Uuid>,
    messages: HashMap<Uuid, Vec<Message>>,
    photos: HashMap<Uuid, EphemeralPhoto>,
    photo_views: Vec<PhotoView>,
    reports: HashMap<Uuid, Report>,
    sanctions: HashMap<Uuid, Sanction>,
    appeals: HashMap<Uuid, Appeal>,
    admin_actions: Vec<AdminAction>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile photo as the profile service would.
    pub fn put_profile_photo(&self, owner_id: Uuid, photo_id: Uuid, approved: bool) {
        self.state.lock().profile_photos.insert(photo_id, (owner_id, approved));
    }

    pub fn match_count(&self) -> usize {
        self.state.lock().matches.len()
    }
}

impl MemoryState {
    fn is_blocked_either(&self, a: Uuid, b: Uuid) -> bool {
        self.blocks.contains_key(&(a, b)) || self.blocks.contains_key(&(b, a))
    }

    fn pair_eligible(&self, m: &Match) -> bool {
        let available = |id: &Uuid| self.users.get(id).is_some_and(User::is_available);
        available(&m.user1_id) && available(&m.user2_id) && !self.is_blocked_either(m.user1_id, m.user2_id)
    }

    fn ensure_pair_open(&self, a: Uuid, b: Uuid) -> AppResult<()> {
        let available = |id: &Uuid| self.users.get(id).is_some_and(User::is_available);
        if !available(&a) || !available(&b) {
            return Err(AppError::forbidden("account is not available"));
        }
        if self.is_blocked_either(a, b) {
            return Err(AppError::new(ErrorCode::Blocked, "a block exists between these users"));
        }
        Ok(())
    }

    fn has_active(&self, user: Uuid, kind: SanctionKind, except: Option<Uuid>) -> bool {
        self.sanctions.values().any(|s| {
            s.target_user_id == user && s.kind == kind && s.is_active && Some(s.id) != except
        })
    }

    fn apply_sanction(
        &mut self,
        new: NewSanction,
        audit: Option<AdminAction>,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<AppliedSanction> {
        if !self.users.contains_key(&new.target_user_id) {
            return Err(AppError::new(ErrorCode::UserNotFound, "sanction target not found"));
        }
        if new.kind.is_exclusive() && self.has_active(new.target_user_id, new.kind, None) {
            return Err(AppError::new(
                ErrorCode::SanctionAlreadyActive,
                format!("an active {} already exists for this user", new.kind),
            ));
        }

        let sanction = Sanction {
            id: Uuid::now_v7(),
            target_user_id: new.target_user_id,
            issuer_id: new.issuer_id,
            kind: new.kind,
            reason: new.reason,
            duration_token: new.duration_token,
            expires_at: new.expires_at,
            is_active: true,
            source: new.source,
            report_id: new.report_id,
            created_at: now,
            lifted_at: None,
            lifted_by: None,
        };
        self.sanctions.insert(sanction.id, sanction.clone());

        let mut deactivated = Vec::new();
        if let Some(user) = self.users.get_mut(&new.target_user_id) {
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
        }

        if new.kind.is_exclusive() {
            for m in self.matches.values_mut() {
                if m.is_active && m.involves(new.target_user_id) {
                    m.deactivate(MatchDeactivation::Sanction, now);
                    deactivated.push(m.clone());
                }
            }
        }

        if let Some(audit) = audit {
            self.admin_actions.push(audit);
        }

        Ok(AppliedSanction { sanction, deactivated_matches: deactivated })
    }

    fn lift_sanction(
        &mut self,
        id: Uuid,
        lifted_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Sanction> {
        let sanction = self
            .sanctions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::SanctionNotFound, "sanction not found"))?;
        if !sanction.is_active {
            return Err(AppError::new(ErrorCode::SanctionNotActive, "sanction is not active"));
        }

        let still_banned = self.has_active(sanction.target_user_id, SanctionKind::Ban, Some(id));
        let still_suspended = self.has_active(sanction.target_user_id, SanctionKind::Suspend, Some(id));

        let lifted = {
            let s = self.sanctions.get_mut(&id).ok_or_else(|| AppError::internal("sanction vanished"))?;
            s.is_active = false;
            s.lifted_at = Some(now);
            s.lifted_by = lifted_by;
            s.clone()
        };

        if let Some(user) = self.users.get_mut(&sanction.target_user_id) {
            match sanction.kind {
                SanctionKind::Ban if !still_banned => user.is_banned = false,
                SanctionKind::Suspend if !still_suspended => user.is_suspended = false,
                _ => {}
            }
            user.is_active = !user.is_banned && !user.is_suspended;
            user.updated_at = now;
        }

        Ok(lifted)
    }

    fn adjust_reputation(
        &mut self,
        id: Uuid,
        delta: i32,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> Option<User> {
        let user = self.users.get_mut(&id)?;
        user.reputation = bounds.clamp(user.reputation as i64 + delta as i64);
        user.updated_at = now;
        Some(user.clone())
    }
}

fn page<T: Clone>(items: Vec<T>, offset: i64, limit: i64) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (page, total)
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.lock().users.get(&id).cloned())
    }

    async fn upsert_user(&self, user: User) -> AppResult<User> {
        let mut state = self.state.lock();
        Ok(state.users.entry(user.id).or_insert(user).clone())
    }

    async fn set_admin_role(
        &self,
        id: Uuid,
        role: Option<AdminRole>,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> AppResult<Option<User>> {
        let mut state = self.state.lock();
        Ok(state.users.get_mut(&id).map(|user| {
            user.admin_role = role;
            user.capabilities = capabilities;
            user.updated_at = now;
            user.clone()
        }))
    }

    async fn apply_ban(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<User>> {
        let mut state = self.state.lock();
        Ok(state.users.get_mut(&id).map(|user| {
            user.is_banned = true;
            user.is_active = false;
            user.updated_at = now;
            user.clone()
        }))
    }

    async fn lift_ban(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<User>> {
        let mut state = self.state.lock();
        let still_banned = state.has_active(id, SanctionKind::Ban, None);
        Ok(state.users.get_mut(&id).map(|user| {
            if !still_banned {
                user.is_banned = false;
                user.is_active = !user.is_suspended;
                user.updated_at = now;
            }
            user.clone()
        }))
    }

    async fn adjust_reputation(
        &self,
        id: Uuid,
        delta: i32,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<Option<User>> {
        Ok(self.state.lock().adjust_reputation(id, delta, bounds, now))
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn insert_block(&self, block: Block) -> AppResult<Block> {
        let mut state = self.state.lock();
        let key = (block.blocker_id, block.blocked_id);
        if state.blocks.contains_key(&key) {
            return Err(AppError::new(ErrorCode::AlreadyBlocked, "user is already blocked"));
        }
        state.blocks.insert(key, block.clone());
        Ok(block)
    }

    async fn delete_block(&self, blocker: Uuid, blocked: Uuid) -> AppResult<bool> {
        Ok(self.state.lock().blocks.remove(&(blocker, blocked)).is_some())
    }

    async fn find_block(&self, blocker: Uuid, blocked: Uuid) -> AppResult<Option<Block>> {
        Ok(self.state.lock().blocks.get(&(blocker, blocked)).cloned())
    }

    async fn list_blocks_by(&self, blocker: Uuid) -> AppResult<Vec<Block>> {
        let state = self.state.lock();
        let mut blocks: Vec<Block> = state.blocks.values().filter(|b| b.blocker_id == blocker).cloned().collect();
        blocks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(blocks)
    }

    async fn blocking_ids(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock();
        Ok(state.blocks.keys().filter(|(a, _)| *a == user).map(|(_, b)| *b).collect())
    }

    async fn blocked_by_ids(&self, user: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock();
        Ok(state.blocks.keys().filter(|(_, b)| *b == user).map(|(a, _)| *a).collect())
    }
}

#[async_trait]
impl SwipeStore for MemoryStore {
    async fn record_swipe_atomic(&self, swipe: Swipe, now: DateTime<Utc>) -> AppResult<SwipeRecord> {
        let mut state = self.state.lock();
        state.ensure_pair_open(swipe.swiper_id, swipe.swiped_id)?;
        let key = (swipe.swiper_id, swipe.swiped_id);
        if state.swipes.contains_key(&key) {
            return Err(AppError::new(ErrorCode::AlreadySwiped, "already swiped on this user"));
        }
        state.swipes.insert(key, swipe.clone());

        if !swipe.direction.is_like() {
            return Ok(SwipeRecord { swipe, matched: None, match_created: false });
        }

        let reciprocal = state
            .swipes
            .get(&(swipe.swiped_id, swipe.swiper_id))
            .is_some_and(|s| s.direction.is_like());
        if !reciprocal {
            return Ok(SwipeRecord { swipe, matched: None, match_created: false });
        }

        let pair = canonical_pair(swipe.swiper_id, swipe.swiped_id);
        if let Some(existing) = state.match_by_pair.get(&pair).and_then(|id| state.matches.get(id)) {
            return Ok(SwipeRecord { swipe, matched: Some(existing.clone()), match_created: false });
        }

        let m = Match::new(pair.0, pair.1, now);
        state.match_by_pair.insert(pair, m.id);
        state.matches.insert(m.id, m.clone());
        Ok(SwipeRecord { swipe, matched: Some(m), match_created: true })
    }

    async fn find_swipe(&self, swiper: Uuid, swiped: Uuid) -> AppResult<Option<Swipe>> {
        Ok(self.state.lock().swipes.get(&(swiper, swiped)).cloned())
    }

    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>> {
        Ok(self.state.lock().matches.get(&id).cloned())
    }

    async fn find_match(&self, a: Uuid, b: Uuid) -> AppResult<Option<Match>> {
        let state = self.state.lock();
        Ok(state
            .match_by_pair
            .get(&canonical_pair(a, b))
            .and_then(|id| state.matches.get(id))
            .cloned())
    }

    async fn list_matches(&self, user: Uuid, active_only: bool) -> AppResult<Vec<Match>> {
        let state = self.state.lock();
        let mut matches: Vec<Match> = state
            .matches
            .values()
            .filter(|m| m.involves(user) && (!active_only || m.is_active))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn deactivate_match(
        &self,
        id: Uuid,
        reason: MatchDeactivation,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Match>> {
        let mut state = self.state.lock();
        Ok(state.matches.get_mut(&id).filter(|m| m.is_active).map(|m| {
            m.deactivate(reason, now);
            m.clone()
        }))
    }

    async fn reactivate_match_atomic(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)> {
        let mut state = self.state.lock();
        let current = state
            .matches
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))?;
        if current.is_active {
            return Err(AppError::new(ErrorCode::MatchAlreadyActive, "match is already active"));
        }
        if !state.pair_eligible(&current) {
            return Ok((current, false));
        }
        let m = state.matches.get_mut(&id).ok_or_else(|| AppError::internal("match vanished"))?;
        m.reactivate(now);
        Ok((m.clone(), true))
    }

    async fn request_rematch_atomic(&self, id: Uuid, user: Uuid, now: DateTime<Utc>) -> AppResult<RematchOutcome> {
        let mut state = self.state.lock();
        let current = state
            .matches
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))?;
        current.ensure_participant(user)?;
        if current.is_active {
            return Err(AppError::new(ErrorCode::MatchAlreadyActive, "match is already active"));
        }
        if current.deactivation_reason != Some(MatchDeactivation::Sanction) {
            return Err(AppError::new(ErrorCode::MatchInactive, "only sanctioned matches can be rematched"));
        }

        let eligible = state.pair_eligible(&current);
        let m = state.matches.get_mut(&id).ok_or_else(|| AppError::internal("match vanished"))?;
        if m.user1_id == user {
            m.user1_rematch = true;
        } else {
            m.user2_rematch = true;
        }
        m.updated_at = now;

        if m.user1_rematch && m.user2_rematch && eligible {
            m.reactivate(now);
            return Ok(RematchOutcome::Reactivated(m.clone()));
        }
        Ok(RematchOutcome::Recorded(m.clone()))
    }

    async fn insert_match_if_absent(&self, a: Uuid, b: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)> {
        let mut state = self.state.lock();
        let pair = canonical_pair(a, b);
        if let Some(existing) = state.match_by_pair.get(&pair).and_then(|id| state.matches.get(id)) {
            return Ok((existing.clone(), false));
        }
        let m = Match::new(pair.0, pair.1, now);
        state.match_by_pair.insert(pair, m.id);
        state.matches.insert(m.id, m.clone());
        Ok((m, true))
    }

    async fn find_orphan_reciprocal_likes(&self, limit: i64) -> AppResult<Vec<(Uuid, Uuid)>> {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        let mut orphans = Vec::new();
        for ((swiper, swiped), swipe) in &state.swipes {
            if !swipe.direction.is_like() {
                continue;
            }
            let pair = canonical_pair(*swiper, *swiped);
            if !seen.insert(pair) || state.match_by_pair.contains_key(&pair) {
                continue;
            }
            if state.swipes.get(&(*swiped, *swiper)).is_some_and(|s| s.direction.is_like()) {
                orphans.push(pair);
            }
            if orphans.len() as i64 >= limit {
                break;
            }
        }
        Ok(orphans)
    }
}

impl MemoryStore {
    /// Drop a match row without touching swipes. Simulates the partial-write
    /// damage the reconciliation pass repairs.
    pub fn remove_match(&self, a: Uuid, b: Uuid) {
        let mut state = self.state.lock();
        if let Some(id) = state.match_by_pair.remove(&canonical_pair(a, b)) {
            state.matches.remove(&id);
        }
    }
}

fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_message_atomic(&self, new: NewMessage, now: DateTime<Utc>) -> AppResult<AppendedMessage> {
        let mut state = self.state.lock();
        let m = state
            .matches
            .get(&new.match_id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))?;
        if new.message_type != MessageType::System {
            state.ensure_pair_open(m.user1_id, m.user2_id)?;
        }
        if !m.is_active {
            return Err(AppError::new(ErrorCode::MatchInactive, "match is not active"));
        }

        let (conversation_id, conversation_created) = match state.conversation_by_match.get(&m.id) {
            Some(id) => (*id, false),
            None => {
                let conversation = Conversation {
                    id: Uuid::now_v7(),
                    match_id: m.id,
                    user1_id: m.user1_id,
                    user2_id: m.user2_id,
                    last_message_id: None,
                    user1_deleted_at: None,
                    user2_deleted_at: None,
                    created_at: now,
                    updated_at: now,
                };
                let id = conversation.id;
                state.conversation_by_match.insert(m.id, id);
                state.conversations.insert(id, conversation);
                (id, true)
            }
        };

        let log = state.messages.entry(conversation_id).or_default();
        let (created_at, seq) = match log.last() {
            Some(last) => (now.max(last.created_at), last.seq + 1),
            None => (now, 1),
        };
        let message = Message {
            id: new.id,
            conversation_id,
            sender_id: new.sender_id,
            message_type: new.message_type,
            content: new.content,
            attachment_ref: new.attachment_ref,
            is_read: false,
            content_verified: new.content_verified,
            seq,
            created_at,
        };
        log.push(message.clone());

        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| AppError::internal("conversation vanished"))?;
        conversation.last_message_id = Some(message.id);
        conversation.updated_at = created_at;
        conversation.user1_deleted_at = None;
        conversation.user2_deleted_at = None;

        Ok(AppendedMessage {
            conversation: conversation.clone(),
            message,
            conversation_created,
        })
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.state.lock().conversations.get(&id).cloned())
    }

    async fn find_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>> {
        let state = self.state.lock();
        Ok(state
            .conversation_by_match
            .get(&match_id)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn list_conversations(&self, user: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let state = self.state.lock();
        let mut summaries: Vec<ConversationSummary> = state
            .conversations
            .values()
            .filter(|c| c.involves(user) && !c.is_deleted_for(user))
            .map(|c| {
                let log = state.messages.get(&c.id);
                let last_message = log.and_then(|l| l.last()).cloned();
                let unread_count = log
                    .map(|l| l.iter().filter(|m| m.sender_id != user && !m.is_read).count() as u64)
                    .unwrap_or(0);
                ConversationSummary {
                    conversation: c.clone(),
                    other_user_id: c.other(user),
                    last_message,
                    unread_count,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.conversation.updated_at.cmp(&a.conversation.updated_at));
        Ok(summaries)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        cursor: MessageCursor,
        search: Option<&str>,
    ) -> AppResult<Vec<Message>> {
        let state = self.state.lock();
        let needle = search.map(str::to_lowercase);
        let mut selected: Vec<Message> = state
            .messages
            .get(&conversation_id)
            .map(|log| {
                log.iter()
                    .filter(|m| cursor.before.map_or(true, |ts| m.created_at < ts))
                    .filter(|m| cursor.after.map_or(true, |ts| m.created_at > ts))
                    .filter(|m| match &needle {
                        Some(n) => m.message_type == MessageType::Text && m.content.to_lowercase().contains(n),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        sort_messages(&mut selected);
        let limit = cursor.limit.max(0) as usize;
        if cursor.after.is_some() && cursor.before.is_none() {
            selected.truncate(limit);
        } else {
            selected.reverse();
            selected.truncate(limit);
        }
        Ok(selected)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let state = self.state.lock();
        Ok(state.messages.values().flatten().find(|m| m.id == id).cloned())
    }

    async fn mark_read(&self, conversation_id: Uuid, reader: Uuid) -> AppResult<u64> {
        let mut state = self.state.lock();
        let mut count = 0;
        if let Some(log) = state.messages.get_mut(&conversation_id) {
            for m in log.iter_mut().filter(|m| m.sender_id != reader && !m.is_read) {
                m.is_read = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn unread_count(&self, user: Uuid) -> AppResult<u64> {
        let state = self.state.lock();
        Ok(state
            .conversations
            .values()
            .filter(|c| c.involves(user))
            .filter_map(|c| state.messages.get(&c.id))
            .flatten()
            .filter(|m| m.sender_id != user && !m.is_read)
            .count() as u64)
    }

    async fn unread_in_conversation(&self, conversation_id: Uuid, user: Uuid) -> AppResult<u64> {
        let state = self.state.lock();
        Ok(state
            .messages
            .get(&conversation_id)
            .map(|log| log.iter().filter(|m| m.sender_id != user && !m.is_read).count() as u64)
            .unwrap_or(0))
    }

    async fn delete_view(&self, conversation_id: Uuid, user: Uuid, now: DateTime<Utc>) -> AppResult<ViewDeletion> {
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;
        conversation.ensure_member(user)?;

        if conversation.user1_id == user {
            conversation.user1_deleted_at.get_or_insert(now);
        } else {
            conversation.user2_deleted_at.get_or_insert(now);
        }

        if conversation.user1_deleted_at.is_some() && conversation.user2_deleted_at.is_some() {
            let match_id = conversation.match_id;
            state.conversations.remove(&conversation_id);
            state.conversation_by_match.remove(&match_id);
            state.messages.remove(&conversation_id);
            return Ok(ViewDeletion::Purged);
        }
        Ok(ViewDeletion::Hidden)
    }
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
impl PhotoStore for MemoryStore {
    async fn insert_photo(&self, photo: EphemeralPhoto) -> AppResult<EphemeralPhoto> {
        self.state.lock().photos.insert(photo.id, photo.clone());
        Ok(photo)
    }

    async fn get_photo(&self, id: Uuid) -> AppResult<Option<EphemeralPhoto>> {
        Ok(self.state.lock().photos.get(&id).cloned())
    }

    async fn find_by_access_key(&self, access_key: &str) -> AppResult<Option<EphemeralPhoto>> {
        Ok(self.state.lock().photos.values().find(|p| p.access_key == access_key).cloned())
    }

    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<(EphemeralPhoto, bool)>> {
        let mut state = self.state.lock();
        Ok(state.photos.get_mut(&id).map(|photo| {
            let transitioned = expire_in_place(photo, now);
            (photo.clone(), transitioned)
        }))
    }

    async fn record_view_atomic(
        &self,
        id: Uuid,
        viewer: Option<Uuid>,
        ip: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<ViewOutcome> {
        let mut state = self.state.lock();
        let photo = state
            .photos
            .get_mut(&id)
            .ok_or_else(|| AppError::new(ErrorCode::PhotoNotFound, "photo not found"))?;

        if photo.is_spent(now) {
            expire_in_place(photo, now);
            return Ok(ViewOutcome::Expired { photo: photo.clone() });
        }

        photo.view_count += 1;
        photo.viewed_at.get_or_insert(now);
        if photo.view_count >= photo.max_views {
            photo.is_viewed = true;
            expire_in_place(photo, now);
        }
        let photo = photo.clone();

        let view = PhotoView {
            id: Uuid::now_v7(),
            photo_id: id,
            viewer_id: viewer,
            ip,
            user_agent,
            viewed_at: now,
            duration_ms: None,
        };
        state.photo_views.push(view.clone());

        Ok(ViewOutcome::Viewed { photo, view })
    }

    async fn complete_view(&self, view_id: Uuid, viewer: Uuid, duration_ms: i64) -> AppResult<Option<PhotoView>> {
        let mut state = self.state.lock();
        Ok(state
            .photo_views
            .iter_mut()
            .find(|v| v.id == view_id && v.viewer_id == Some(viewer))
            .map(|v| {
                v.duration_ms = Some(duration_ms);
                v.clone()
            }))
    }

    async fn list_views(&self, photo_id: Uuid) -> AppResult<Vec<PhotoView>> {
        let state = self.state.lock();
        Ok(state.photo_views.iter().filter(|v| v.photo_id == photo_id).cloned().collect())
    }

    async fn expire_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<EphemeralPhoto>> {
        let mut state = self.state.lock();
        let mut due: Vec<&mut EphemeralPhoto> = state
            .photos
            .values_mut()
            .filter(|p| !p.is_expired && !p.is_deleted && p.expires_at < now)
            .collect();
        due.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|p| {
                expire_in_place(p, now);
                p.clone()
            })
            .collect())
    }

    async fn due_for_deletion(&self, expired_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<EphemeralPhoto>> {
        let state = self.state.lock();
        let mut due: Vec<EphemeralPhoto> = state
            .photos
            .values()
            .filter(|p| p.is_expired && !p.is_deleted && p.expired_at.is_some_and(|t| t <= expired_before))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.expired_at.cmp(&b.expired_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_deleted(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock();
        Ok(match state.photos.get_mut(&id) {
            Some(p) if !p.is_deleted => {
                p.is_deleted = true;
                p.deleted_at = Some(now);
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn insert_report(&self, report: Report) -> AppResult<Report> {
        let mut state = self.state.lock();
        let duplicate = state.reports.values().any(|r| {
            r.reporter_id == report.reporter_id
                && r.reported_user_id == report.reported_user_id
                && r.status.is_open()
        });
        if duplicate {
            return Err(AppError::new(ErrorCode::DuplicateReport, "an open report already exists for this user"));
        }
        state.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn has_open_report(&self, reporter: Uuid, reported: Uuid) -> AppResult<bool> {
        let state = self.state.lock();
        Ok(state
            .reports
            .values()
            .any(|r| r.reporter_id == reporter && r.reported_user_id == reported && r.status.is_open()))
    }

    async fn get_report(&self, id: Uuid) -> AppResult<Option<Report>> {
        Ok(self.state.lock().reports.get(&id).cloned())
    }

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        include_escalated: bool,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Report>, u64)> {
        let state = self.state.lock();
        let mut reports: Vec<Report> = state
            .reports
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| include_escalated || r.status != ReportStatus::Escalated)
            .cloned()
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(page(reports, offset, limit))
    }

    async fn review_report_atomic(&self, review: ReportReview) -> AppResult<ReviewedReport> {
        let mut state = self.state.lock();
        let report = state
            .reports
            .get(&review.report_id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::ReportNotFound, "report not found"))?;

        let reviewable = report.status == ReportStatus::Pending
            || (review.allow_escalated && report.status == ReportStatus::Escalated);
        if !reviewable {
            return Err(AppError::new(
                ErrorCode::ReportAlreadyReviewed,
                format!("report is {}", report.status),
            ));
        }

        let applied = match review.sanction {
            Some(sanction) => Some(state.apply_sanction(sanction, None, review.bounds, review.now)?),
            None => None,
        };

        if let Some(delta) = review.reputation_delta {
            state.adjust_reputation(report.reported_user_id, delta, review.bounds, review.now);
        }

        let updated = {
            let r = state
                .reports
                .get_mut(&review.report_id)
                .ok_or_else(|| AppError::internal("report vanished"))?;
            r.status = review.status;
            r.reviewer_id = Some(review.reviewer_id);
            r.reviewed_at = Some(review.now);
            r.resolution_notes = match (r.resolution_notes.take(), review.notes) {
                (Some(prev), Some(next)) => Some(format!("{prev}\n{next}")),
                (prev, next) => next.or(prev),
            };
            r.updated_at = review.now;
            r.clone()
        };
        state.admin_actions.push(review.audit);

        Ok(ReviewedReport { report: updated, applied })
    }

    async fn apply_sanction_atomic(
        &self,
        sanction: NewSanction,
        audit: Option<AdminAction>,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<AppliedSanction> {
        self.state.lock().apply_sanction(sanction, audit, bounds, now)
    }

    async fn lift_sanction_atomic(
        &self,
        id: Uuid,
        lifted_by: Option<Uuid>,
        audit: Option<AdminAction>,
        now: DateTime<Utc>,
    ) -> AppResult<Sanction> {
        let mut state = self.state.lock();
        let lifted = state.lift_sanction(id, lifted_by, now)?;
        if let Some(audit) = audit {
            state.admin_actions.push(audit);
        }
        Ok(lifted)
    }

    async fn get_sanction(&self, id: Uuid) -> AppResult<Option<Sanction>> {
        Ok(self.state.lock().sanctions.get(&id).cloned())
    }

    async fn list_sanctions(&self, user: Uuid) -> AppResult<Vec<Sanction>> {
        let state = self.state.lock();
        let mut sanctions: Vec<Sanction> =
            state.sanctions.values().filter(|s| s.target_user_id == user).cloned().collect();
        sanctions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sanctions)
    }

    async fn active_sanctions(&self, user: Uuid) -> AppResult<Vec<Sanction>> {
        let state = self.state.lock();
        let mut sanctions: Vec<Sanction> = state
            .sanctions
            .values()
            .filter(|s| s.target_user_id == user && s.is_active)
            .cloned()
            .collect();
        sanctions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sanctions)
    }

    async fn expired_sanctions(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Sanction>> {
        let state = self.state.lock();
        let mut due: Vec<Sanction> = state
            .sanctions
            .values()
            .filter(|s| s.is_active && s.expires_at.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn count_resolved_reporters(&self, target: Uuid, since: DateTime<Utc>) -> AppResult<u64> {
        let state = self.state.lock();
        let reporters: HashSet<Uuid> = state
            .reports
            .values()
            .filter(|r| {
                r.reported_user_id == target
                    && r.status == ReportStatus::Resolved
                    && r.reviewed_at.is_some_and(|t| t >= since)
            })
            .map(|r| r.reporter_id)
            .collect();
        Ok(reporters.len() as u64)
    }

    async fn insert_appeal(&self, appeal: Appeal) -> AppResult<Appeal> {
        let mut state = self.state.lock();
        let pending = state
            .appeals
            .values()
            .any(|a| a.appellant_id == appeal.appellant_id && a.status == AppealStatus::Pending);
        if pending {
            return Err(AppError::new(ErrorCode::AppealAlreadyPending, "an appeal is already pending"));
        }
        state.appeals.insert(appeal.id, appeal.clone());
        Ok(appeal)
    }

    async fn get_appeal(&self, id: Uuid) -> AppResult<Option<Appeal>> {
        Ok(self.state.lock().appeals.get(&id).cloned())
    }

    async fn list_appeals(
        &self,
        status: Option<AppealStatus>,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Appeal>, u64)> {
        let state = self.state.lock();
        let mut appeals: Vec<Appeal> = state
            .appeals
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        appeals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(page(appeals, offset, limit))
    }

    async fn review_appeal_atomic(&self, review: AppealReview) -> AppResult<ReviewedAppeal> {
        let mut state = self.state.lock();
        let appeal = state
            .appeals
            .get(&review.appeal_id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::AppealNotFound, "appeal not found"))?;
        if appeal.status != AppealStatus::Pending {
            return Err(AppError::new(ErrorCode::AppealAlreadyReviewed, format!("appeal is {}", appeal.status)));
        }

        let sanction_active = state.sanctions.get(&appeal.sanction_id).is_some_and(|s| s.is_active);
        let lifted = if review.approved && sanction_active {
            Some(state.lift_sanction(appeal.sanction_id, Some(review.reviewer_id), review.now)?)
        } else {
            None
        };

        let updated = {
            let a = state
                .appeals
                .get_mut(&review.appeal_id)
                .ok_or_else(|| AppError::internal("appeal vanished"))?;
            a.status = if review.approved { AppealStatus::Approved } else { AppealStatus::Rejected };
            a.reviewer_id = Some(review.reviewer_id);
            a.reviewed_at = Some(review.now);
            a.review_notes = review.notes;
            a.clone()
        };
        state.admin_actions.push(review.audit);

        Ok(ReviewedAppeal { appeal: updated, lifted })
    }

    async fn close_stale_appeals(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Appeal>> {
        let mut state = self.state.lock();
        let stale: Vec<Uuid> = state
            .appeals
            .values()
            .filter(|a| {
                a.status == AppealStatus::Pending
                    && !state.sanctions.get(&a.sanction_id).is_some_and(|s| s.is_active)
            })
            .map(|a| a.id)
            .take(limit.max(0) as usize)
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(a) = state.appeals.get_mut(&id) {
                a.status = AppealStatus::Reviewed;
                a.reviewed_at = Some(now);
                a.review_notes = Some("sanction no longer active".into());
                closed.push(a.clone());
            }
        }
        Ok(closed)
    }

    async fn insert_admin_action(&self, action: AdminAction) -> AppResult<()> {
        self.state.lock().admin_actions.push(action);
        Ok(())
    }

    async fn list_admin_actions(&self, target: Uuid) -> AppResult<Vec<AdminAction>> {
        let state = self.state.lock();
        Ok(state
            .admin_actions
            .iter()
            .filter(|a| a.target_user_id == Some(target))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PhotoCatalog for MemoryStore {
    async fn is_owned_approved(&self, owner_id: Uuid, photo_id: Uuid) -> Result<bool, PortError> {
        Ok(self
            .state
            .lock()
            .profile_photos
            .get(&photo_id)
            .is_some_and(|(owner, approved)| *owner == owner_id && *approved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> ReputationBounds {
        ReputationBounds { min: 0, max: 200 }
    }

    fn swipe(swiper: u128, swiped: u128, direction: SwipeDirection) -> Swipe {
        Swipe {
            id: Uuid::now_v7(),
            swiper_id: Uuid::from_u128(swiper),
            swiped_id: Uuid::from_u128(swiped),
            direction,
            created_at: Utc::now(),
        }
    }

    async fn seeded(ids: &[u128]) -> MemoryStore {
        let store = MemoryStore::new();
        for id in ids {
            store.upsert_user(User::new(Uuid::from_u128(*id), 100, Utc::now())).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn second_like_creates_exactly_one_match() {
        let store = seeded(&[1, 2]).await;
        let first = store.record_swipe_atomic(swipe(1, 2, SwipeDirection::Like), Utc::now()).await.unwrap();
        assert!(first.matched.is_none());

        let second = store.record_swipe_atomic(swipe(2, 1, SwipeDirection::SuperLike), Utc::now()).await.unwrap();
        assert!(second.match_created);
        assert_eq!(store.match_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_swipe_is_rejected() {
        let store = seeded(&[1, 2]).await;
        store.record_swipe_atomic(swipe(1, 2, SwipeDirection::Pass), Utc::now()).await.unwrap();
        let err = store.record_swipe_atomic(swipe(1, 2, SwipeDirection::Like), Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadySwiped);
    }

    #[tokio::test]
    async fn swipe_unit_rechecks_bans_and_blocks() {
        let store = seeded(&[1, 2, 3]).await;
        store.apply_ban(Uuid::from_u128(2), Utc::now()).await.unwrap();
        let err = store.record_swipe_atomic(swipe(1, 2, SwipeDirection::Like), Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), amora_shared::ErrorKind::Forbidden);

        store
            .insert_block(Block {
                id: Uuid::now_v7(),
                blocker_id: Uuid::from_u128(3),
                blocked_id: Uuid::from_u128(1),
                reason: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let err = store.record_swipe_atomic(swipe(1, 3, SwipeDirection::Like), Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Blocked);
        assert!(store.find_swipe(Uuid::from_u128(1), Uuid::from_u128(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_unit_refuses_inactive_matches() {
        let store = seeded(&[1, 2]).await;
        let (m, _) = store.insert_match_if_absent(Uuid::from_u128(1), Uuid::from_u128(2), Utc::now()).await.unwrap();
        store.deactivate_match(m.id, MatchDeactivation::Unmatched, Utc::now()).await.unwrap();

        let err = store
            .append_message_atomic(
                NewMessage {
                    id: Uuid::now_v7(),
                    match_id: m.id,
                    sender_id: Uuid::from_u128(1),
                    message_type: MessageType::Text,
                    content: "still there?".into(),
                    attachment_ref: None,
                    content_verified: true,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MatchInactive);
        assert!(store.find_conversation_by_match(m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pass_never_matches() {
        let store = seeded(&[1, 2]).await;
        store.record_swipe_atomic(swipe(1, 2, SwipeDirection::Like), Utc::now()).await.unwrap();
        let rec = store.record_swipe_atomic(swipe(2, 1, SwipeDirection::Pass), Utc::now()).await.unwrap();
        assert!(rec.matched.is_none());
        assert_eq!(store.match_count(), 0);
    }

    #[tokio::test]
    async fn appended_timestamps_never_go_backwards() {
        let store = seeded(&[1, 2]).await;
        let (m, _) = store.insert_match_if_absent(Uuid::from_u128(1), Uuid::from_u128(2), Utc::now()).await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(30);
        let earlier = Utc::now();

        let new = |content: &str| NewMessage {
            id: Uuid::now_v7(),
            match_id: m.id,
            sender_id: Uuid::from_u128(1),
            message_type: MessageType::Text,
            content: content.into(),
            attachment_ref: None,
            content_verified: true,
        };
        let first = store.append_message_atomic(new("a"), later).await.unwrap();
        let second = store.append_message_atomic(new("b"), earlier).await.unwrap();
        assert!(first.conversation_created);
        assert!(!second.conversation_created);
        assert_eq!(second.message.created_at, first.message.created_at);
        assert_eq!(second.message.seq, first.message.seq + 1);
        assert_eq!(second.conversation.last_message_id, Some(second.message.id));
    }

    #[tokio::test]
    async fn lifting_one_ban_keeps_user_banned_while_another_is_active() {
        let store = seeded(&[1]).await;
        let target = Uuid::from_u128(1);
        let new_ban = || NewSanction {
            target_user_id: target,
            issuer_id: Uuid::from_u128(99),
            kind: SanctionKind::Ban,
            reason: "r".into(),
            duration_token: None,
            expires_at: None,
            source: SanctionSource::Manual,
            report_id: None,
            reputation_delta: 0,
        };
        let first = store.apply_sanction_atomic(new_ban(), None, bounds(), Utc::now()).await.unwrap();
        let err = store.apply_sanction_atomic(new_ban(), None, bounds(), Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SanctionAlreadyActive);

        store.lift_sanction_atomic(first.sanction.id, None, None, Utc::now()).await.unwrap();
        let user = store.get_user(target).await.unwrap().unwrap();
        assert!(!user.is_banned);
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn purge_happens_only_when_both_sides_delete() {
        let store = seeded(&[1, 2]).await;
        let (m, _) = store.insert_match_if_absent(Uuid::from_u128(1), Uuid::from_u128(2), Utc::now()).await.unwrap();
        let appended = store
            .append_message_atomic(
                NewMessage {
                    id: Uuid::now_v7(),
                    match_id: m.id,
                    sender_id: Uuid::from_u128(1),
                    message_type: MessageType::Text,
                    content: "hi".into(),
                    attachment_ref: None,
                    content_verified: true,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let cid = appended.conversation.id;

        assert_eq!(store.delete_view(cid, Uuid::from_u128(1), Utc::now()).await.unwrap(), ViewDeletion::Hidden);
        assert!(store.list_conversations(Uuid::from_u128(1)).await.unwrap().is_empty());
        assert_eq!(store.list_conversations(Uuid::from_u128(2)).await.unwrap().len(), 1);
        assert_eq!(store.delete_view(cid, Uuid::from_u128(2), Utc::now()).await.unwrap(), ViewDeletion::Purged);
        assert!(store.get_conversation(cid).await.unwrap().is_none());
    }
}
