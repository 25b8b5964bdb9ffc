//! Core tunables. Every field has a default so an empty source deserializes.
//!
//! Durations are expressed in seconds. A rate-limit budget of `0` disables
//! that window.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub ephemeral: EphemeralConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub blocks: BlocksConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    #[serde(default = "default_max_gift_code_length")]
    pub max_gift_code_length: usize,
    /// TTL of the cached per-user unread count.
    #[serde(default = "default_unread_cache_ttl")]
    pub unread_cache_ttl: u64,
}

fn default_max_text_length() -> usize { 1000 }
fn default_max_gift_code_length() -> usize { 64 }
fn default_unread_cache_ttl() -> u64 { 300 }

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_text_length: default_max_text_length(),
            max_gift_code_length: default_max_gift_code_length(),
            unread_cache_ttl: default_unread_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralConfig {
    /// Bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    #[serde(default = "default_photo_duration")]
    pub default_duration: u64,
    #[serde(default = "default_max_photo_duration")]
    pub max_duration: u64,
    /// Validity of the signed download URL handed to a viewer.
    #[serde(default = "default_view_duration")]
    pub view_duration: u64,
    /// Random bytes in an access key. Values below 32 are raised to 32.
    #[serde(default = "default_access_key_length")]
    pub access_key_length: usize,
    #[serde(default = "default_retention_period")]
    pub retention_period: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default = "default_job_batch_size")]
    pub job_batch_size: i64,
    /// Validity of the signed upload URL returned on create.
    #[serde(default = "default_upload_url_ttl")]
    pub upload_url_ttl: u64,
}

fn default_max_file_size() -> u64 { 10 * 1024 * 1024 }
fn default_allowed_types() -> Vec<String> {
    vec!["image/jpeg".into(), "image/png".into(), "image/webp".into(), "image/heic".into()]
}
fn default_photo_duration() -> u64 { 24 * 3600 }
fn default_max_photo_duration() -> u64 { 7 * 24 * 3600 }
fn default_view_duration() -> u64 { 10 }
fn default_access_key_length() -> usize { 32 }
fn default_retention_period() -> u64 { 24 * 3600 }
fn default_cleanup_interval() -> u64 { 60 }
fn default_job_batch_size() -> i64 { 100 }
fn default_upload_url_ttl() -> u64 { 300 }

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
            default_duration: default_photo_duration(),
            max_duration: default_max_photo_duration(),
            view_duration: default_view_duration(),
            access_key_length: default_access_key_length(),
            retention_period: default_retention_period(),
            cleanup_interval: default_cleanup_interval(),
            job_batch_size: default_job_batch_size(),
            upload_url_ttl: default_upload_url_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub rules: ModerationRules,
    #[serde(default)]
    pub rate_limit: ModerationRateLimit,
    #[serde(default = "default_moderation_sweep_interval")]
    pub sweep_interval: u64,
}

fn default_moderation_sweep_interval() -> u64 { 60 }

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationRules {
    /// Distinct resolved reporters within `window` that trigger a suspension.
    #[serde(default = "default_auto_suspend_threshold")]
    pub auto_suspend_threshold: u32,
    #[serde(default = "default_auto_ban_threshold")]
    pub auto_ban_threshold: u32,
    /// Classifier score at or above which a message is stored and auto-reported.
    #[serde(default = "default_report_threshold")]
    pub report_threshold: f64,
    /// Classifier score at or above which a message is rejected.
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: f64,
    #[serde(default = "default_initial_reputation")]
    pub initial_reputation: i32,
    #[serde(default = "default_min_reputation")]
    pub min_reputation: i32,
    #[serde(default = "default_max_reputation")]
    pub max_reputation: i32,
    #[serde(default = "default_rules_window")]
    pub window: u64,
    #[serde(default = "default_warn_reputation_delta")]
    pub warn_reputation_delta: i32,
    #[serde(default = "default_dismiss_reputation_delta")]
    pub dismiss_reputation_delta: i32,
    #[serde(default = "default_auto_suspend_duration")]
    pub auto_suspend_duration: String,
}

fn default_auto_suspend_threshold() -> u32 { 3 }
fn default_auto_ban_threshold() -> u32 { 5 }
fn default_report_threshold() -> f64 { 0.7 }
fn default_severity_threshold() -> f64 { 0.9 }
fn default_initial_reputation() -> i32 { 100 }
fn default_min_reputation() -> i32 { 0 }
fn default_max_reputation() -> i32 { 200 }
fn default_rules_window() -> u64 { 30 * 24 * 3600 }
fn default_warn_reputation_delta() -> i32 { -10 }
fn default_dismiss_reputation_delta() -> i32 { 5 }
fn default_auto_suspend_duration() -> String { "7d".into() }

impl Default for ModerationRules {
    fn default() -> Self {
        Self {
            auto_suspend_threshold: default_auto_suspend_threshold(),
            auto_ban_threshold: default_auto_ban_threshold(),
            report_threshold: default_report_threshold(),
            severity_threshold: default_severity_threshold(),
            initial_reputation: default_initial_reputation(),
            min_reputation: default_min_reputation(),
            max_reputation: default_max_reputation(),
            window: default_rules_window(),
            warn_reputation_delta: default_warn_reputation_delta(),
            dismiss_reputation_delta: default_dismiss_reputation_delta(),
            auto_suspend_duration: default_auto_suspend_duration(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationRateLimit {
    #[serde(default = "default_reports_per_minute")]
    pub reports_per_minute: u64,
    #[serde(default = "default_reports_per_hour")]
    pub reports_per_hour: u64,
    #[serde(default = "default_reports_per_day")]
    pub reports_per_day: u64,
    #[serde(default = "default_reports_per_pair_per_day")]
    pub reports_per_pair_per_day: u64,
    #[serde(default = "default_blocks_per_minute")]
    pub blocks_per_minute: u64,
    #[serde(default = "default_blocks_per_hour")]
    pub blocks_per_hour: u64,
    #[serde(default = "default_blocks_per_day")]
    pub blocks_per_day: u64,
    #[serde(default = "default_appeals_per_minute")]
    pub appeals_per_minute: u64,
    #[serde(default = "default_appeals_per_hour")]
    pub appeals_per_hour: u64,
    #[serde(default = "default_appeals_per_day")]
    pub appeals_per_day: u64,
}

fn default_reports_per_minute() -> u64 { 3 }
fn default_reports_per_hour() -> u64 { 10 }
fn default_reports_per_day() -> u64 { 20 }
fn default_reports_per_pair_per_day() -> u64 { 1 }
fn default_blocks_per_minute() -> u64 { 10 }
fn default_blocks_per_hour() -> u64 { 50 }
fn default_blocks_per_day() -> u64 { 100 }
fn default_appeals_per_minute() -> u64 { 1 }
fn default_appeals_per_hour() -> u64 { 3 }
fn default_appeals_per_day() -> u64 { 5 }

impl Default for ModerationRateLimit {
    fn default() -> Self {
        Self {
            reports_per_minute: default_reports_per_minute(),
            reports_per_hour: default_reports_per_hour(),
            reports_per_day: default_reports_per_day(),
            reports_per_pair_per_day: default_reports_per_pair_per_day(),
            blocks_per_minute: default_blocks_per_minute(),
            blocks_per_hour: default_blocks_per_hour(),
            blocks_per_day: default_blocks_per_day(),
            appeals_per_minute: default_appeals_per_minute(),
            appeals_per_hour: default_appeals_per_hour(),
            appeals_per_day: default_appeals_per_day(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub rate_limit: ChatRateLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRateLimit {
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u64,
    #[serde(default = "default_messages_per_hour")]
    pub messages_per_hour: u64,
    #[serde(default = "default_messages_per_day")]
    pub messages_per_day: u64,
    #[serde(default = "default_conversations_per_day")]
    pub conversations_per_day: u64,
    #[serde(default = "default_photos_per_day")]
    pub photos_per_day: u64,
}

fn default_messages_per_minute() -> u64 { 30 }
fn default_messages_per_hour() -> u64 { 500 }
fn default_messages_per_day() -> u64 { 2000 }
fn default_conversations_per_day() -> u64 { 50 }
fn default_photos_per_day() -> u64 { 50 }

impl Default for ChatRateLimit {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            messages_per_hour: default_messages_per_hour(),
            messages_per_day: default_messages_per_day(),
            conversations_per_day: default_conversations_per_day(),
            photos_per_day: default_photos_per_day(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub rate_limit: SwipeRateLimit,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: u64,
    #[serde(default = "default_reconcile_batch")]
    pub reconcile_batch_size: i64,
}

fn default_reconcile_interval() -> u64 { 300 }
fn default_reconcile_batch() -> i64 { 100 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            rate_limit: SwipeRateLimit::default(),
            reconcile_interval: default_reconcile_interval(),
            reconcile_batch_size: default_reconcile_batch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwipeRateLimit {
    #[serde(default = "default_swipes_per_minute")]
    pub swipes_per_minute: u64,
    #[serde(default = "default_swipes_per_hour")]
    pub swipes_per_hour: u64,
    #[serde(default = "default_swipes_per_day")]
    pub swipes_per_day: u64,
}

fn default_swipes_per_minute() -> u64 { 60 }
fn default_swipes_per_hour() -> u64 { 600 }
fn default_swipes_per_day() -> u64 { 2000 }

impl Default for SwipeRateLimit {
    fn default() -> Self {
        Self {
            swipes_per_minute: default_swipes_per_minute(),
            swipes_per_hour: default_swipes_per_hour(),
            swipes_per_day: default_swipes_per_day(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocksConfig {
    #[serde(default = "default_block_cache_ttl")]
    pub cache_ttl: u64,
}

fn default_block_cache_ttl() -> u64 { 15 * 60 }

impl Default for BlocksConfig {
    fn default() -> Self {
        Self { cache_ttl: default_block_cache_ttl() }
    }
}

/// Per-call budgets for external collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_classifier_timeout")]
    pub classifier: u64,
    #[serde(default = "default_storage_timeout")]
    pub storage: u64,
    #[serde(default = "default_cache_timeout")]
    pub cache: u64,
}

fn default_classifier_timeout() -> u64 { 30 }
fn default_storage_timeout() -> u64 { 5 }
fn default_cache_timeout() -> u64 { 3 }

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            classifier: default_classifier_timeout(),
            storage: default_storage_timeout(),
            cache: default_cache_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Score assumed when the classifier cannot be reached.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,
}

fn default_fallback_threshold() -> f64 { 0.5 }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { fallback_threshold: default_fallback_threshold() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Image classifier score at or above which an ephemeral photo is refused.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_similarity_threshold() -> f64 { 0.85 }

impl Default for VerificationConfig {
    fn default() -> Self {
        Self { similarity_threshold: default_similarity_threshold() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_idempotency_ttl")]
    pub ttl: u64,
    /// How long an in-flight marker survives a crashed request.
    #[serde(default = "default_in_flight_ttl")]
    pub in_flight_ttl: u64,
}

fn default_idempotency_ttl() -> u64 { 24 * 3600 }
fn default_in_flight_ttl() -> u64 { 60 }

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: default_idempotency_ttl(),
            in_flight_ttl: default_in_flight_ttl(),
        }
    }
}

impl CoreConfig {
    /// Load from an optional TOML file overlaid by `AMORA__*` environment variables.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("AMORA").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn access_key_bytes(&self) -> usize {
        self.ephemeral.access_key_length.max(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let cfg: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.messages.max_text_length, 1000);
        assert_eq!(cfg.ephemeral.job_batch_size, 100);
        assert_eq!(cfg.blocks.cache_ttl, 900);
        assert_eq!(cfg.timeouts.classifier, 30);
        assert_eq!(cfg.moderation.rules.initial_reputation, 100);
    }

    #[test]
    fn partial_section_keeps_sibling_defaults() {
        let cfg: CoreConfig =
            serde_json::from_str(r#"{"moderation":{"rate_limit":{"reports_per_day":5}}}"#).unwrap();
        assert_eq!(cfg.moderation.rate_limit.reports_per_day, 5);
        assert_eq!(cfg.moderation.rate_limit.reports_per_minute, 3);
        assert_eq!(cfg.moderation.rules.dismiss_reputation_delta, 5);
    }

    #[test]
    fn access_key_never_shorter_than_32_bytes() {
        let mut cfg = CoreConfig::default();
        cfg.ephemeral.access_key_length = 8;
        assert_eq!(cfg.access_key_bytes(), 32);
    }
}
