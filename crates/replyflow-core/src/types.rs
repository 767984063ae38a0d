//! Domain types — reviews, store policies, and the status state machine.
//!
//! The `ReviewStatus` enum is the load-bearing contract of the whole
//! pipeline: the three coordinators never talk to each other directly,
//! they hand work over purely through status transitions. Transitions are
//! checked by `ReviewStatus::can_transition_to`, so an illegal write
//! (e.g. `posted -> pending`) is rejected at the gateway instead of
//! silently corrupting a row.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Delivery platform a review was collected from.
///
/// The string forms are part of the stable contract shared with the
/// dashboard and the platform adapters. Dispatch is always by enum match,
/// never by string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Baemin,
    Coupang,
    Yogiyo,
    Naver,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Baemin,
        Platform::Coupang,
        Platform::Yogiyo,
        Platform::Naver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Baemin => "baemin",
            Platform::Coupang => "coupang",
            Platform::Yogiyo => "yogiyo",
            Platform::Naver => "naver",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = crate::error::ReplyFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baemin" => Ok(Platform::Baemin),
            "coupang" => Ok(Platform::Coupang),
            "yogiyo" => Ok(Platform::Yogiyo),
            "naver" => Ok(Platform::Naver),
            other => Err(crate::error::ReplyFlowError::UnknownPlatform(other.into())),
        }
    }
}

/// Review lifecycle status.
///
/// `pending -> {generated | ready_to_post} -> processing -> {posted | failed}`.
/// `posted` is terminal; `failed` re-enters `processing` on the next
/// posting pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Collected, no draft yet.
    Pending,
    /// Has an AI draft, needs human or delayed-auto review.
    Generated,
    /// Draft met the auto-post bar; may post once its delay window elapses.
    ReadyToPost,
    /// Claimed by a posting run.
    Processing,
    /// Reply is live on the platform.
    Posted,
    /// Last posting attempt failed; reselected next pass.
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Generated => "generated",
            ReviewStatus::ReadyToPost => "ready_to_post",
            ReviewStatus::Processing => "processing",
            ReviewStatus::Posted => "posted",
            ReviewStatus::Failed => "failed",
        }
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// Exhaustive on purpose: adding a status forces every call site that
    /// matches on it to be revisited.
    pub fn can_transition_to(self, to: ReviewStatus) -> bool {
        use ReviewStatus::*;
        match (self, to) {
            (Pending, Generated) | (Pending, ReadyToPost) => true,
            (Generated, Processing) | (ReadyToPost, Processing) => true,
            (Failed, Processing) => true,
            (Processing, Posted) | (Processing, Failed) => true,
            // Everything else, including any transition out of Posted.
            (Pending | Generated | ReadyToPost | Processing | Posted | Failed, _) => false,
        }
    }

    /// Statuses a posting pass may select from.
    pub fn is_postable(self) -> bool {
        matches!(
            self,
            ReviewStatus::ReadyToPost | ReviewStatus::Generated | ReviewStatus::Failed
        )
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = crate::error::ReplyFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "generated" => Ok(ReviewStatus::Generated),
            "ready_to_post" => Ok(ReviewStatus::ReadyToPost),
            "processing" => Ok(ReviewStatus::Processing),
            "posted" => Ok(ReviewStatus::Posted),
            "failed" => Ok(ReviewStatus::Failed),
            other => Err(crate::error::ReplyFlowError::Store(format!(
                "unknown review status: {other}"
            ))),
        }
    }
}

/// A customer review as the crawler hands it over, before identity and
/// date resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReview {
    /// Platform-native review id.
    pub native_id: String,
    /// Author display name as scraped (may carry date/menu noise).
    pub author: String,
    /// Star rating 1..=5; None on platforms without star ratings.
    pub rating: Option<u8>,
    pub content: String,
    /// Platform-native date string ("오늘", "3일 전", "2026-08-01", ...).
    pub relative_date: String,
    #[serde(default)]
    pub ordered_menu: String,
    #[serde(default)]
    pub delivery_review: String,
    #[serde(default)]
    pub images: Vec<String>,
    /// Platform already shows an owner reply.
    #[serde(default)]
    pub has_reply: bool,
}

/// One customer review, unique by `review_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Stable key derived from (platform, store, native id).
    pub review_id: String,
    pub store_code: String,
    pub platform: Platform,
    pub review_name: String,
    pub rating: Option<u8>,
    pub content: String,
    pub ordered_menu: String,
    pub delivery_review: String,
    pub images: Vec<String>,
    /// Absolute calendar date, resolved at ingestion.
    pub review_date: NaiveDate,
    pub status: ReviewStatus,
    pub ai_response: Option<String>,
    pub final_response: Option<String>,
    /// Set by generation when the draft needs owner attention.
    pub boss_reply_needed: Option<bool>,
    pub urgency_score: Option<f32>,
    pub quality_score: Option<f32>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub has_reply: bool,
    /// Rows are never physically deleted, only soft-marked.
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub response_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Map a crawled review into a fresh `pending` row.
    pub fn from_raw(raw: &RawReview, platform: Platform, store_code: &str, today: NaiveDate) -> Self {
        Self {
            review_id: review_identity(platform, store_code, &raw.native_id),
            store_code: store_code.to_string(),
            platform,
            review_name: clean_author_name(&raw.author),
            rating: raw.rating,
            content: raw.content.clone(),
            ordered_menu: raw.ordered_menu.clone(),
            delivery_review: raw.delivery_review.clone(),
            images: raw.images.clone(),
            review_date: resolve_review_date(&raw.relative_date, today),
            status: ReviewStatus::Pending,
            ai_response: None,
            final_response: None,
            boss_reply_needed: None,
            urgency_score: None,
            quality_score: None,
            retry_count: 0,
            error_message: None,
            has_reply: raw.has_reply,
            is_deleted: false,
            created_at: Utc::now(),
            response_at: None,
        }
    }
}

/// Per-store reply automation policy, one per store+platform+account.
///
/// Credentials are encrypted at rest; only the posting and collection
/// coordinators decrypt them, once per platform group, through the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePolicy {
    pub store_code: String,
    pub store_name: String,
    pub platform: Platform,
    /// Platform-native store id — the batching key together with platform.
    pub platform_code: String,
    /// Platform login id.
    pub platform_id: String,
    /// Platform login password, encrypted by the vault.
    pub platform_pw: String,
    /// Auto-reply toggle per star rating (index 0 = 1 star).
    pub rating_replies: [bool; 5],
    pub greeting_start: String,
    pub greeting_end: Option<String>,
    pub role: String,
    pub tone: String,
    pub prohibited_words: Vec<String>,
    pub max_reply_length: u32,
    pub auto_reply_enabled: bool,
    /// Optional "HH:MM-HH:MM" window gating generation.
    pub auto_reply_hours: Option<String>,
    pub is_active: bool,
    /// Last crawl/login failure, for operator visibility.
    pub last_error: Option<String>,
}

impl StorePolicy {
    /// Whether auto-reply is enabled for a given star rating.
    /// Ratingless reviews fall back to enabled.
    pub fn auto_reply_for(&self, rating: Option<u8>) -> bool {
        match rating {
            Some(r @ 1..=5) => self.rating_replies[(r - 1) as usize],
            _ => true,
        }
    }
}

/// Append-only audit record for one generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationHistoryEntry {
    pub id: String,
    pub review_id: String,
    pub prompt: String,
    pub model: String,
    pub quality_score: f32,
    pub urgency_score: f32,
    pub latency_ms: u64,
    pub token_usage: u32,
    /// Whether this attempt became the review's draft.
    pub chosen: bool,
    pub created_at: DateTime<Utc>,
}

impl GenerationHistoryEntry {
    pub fn new(review_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            review_id: review_id.to_string(),
            prompt: String::new(),
            model: String::new(),
            quality_score: 0.0,
            urgency_score: 0.0,
            latency_ms: 0,
            token_usage: 0,
            chosen: false,
            created_at: Utc::now(),
        }
    }
}

/// Deterministic review identity: hex SHA-256 over
/// `platform:store_code:native_id`, truncated to 32 chars.
///
/// Re-collecting the same native review always derives the same id, which
/// is what makes collection idempotent.
pub fn review_identity(platform: Platform, store_code: &str, native_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(platform.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(store_code.as_bytes());
    hasher.update(b":");
    hasher.update(native_id.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve a platform-native date string to an absolute date.
///
/// The Korean platforms emit relative forms ("오늘", "어제", "그제",
/// "N일 전", "N개월 전"); months are approximated as 30 days, matching
/// what the platforms themselves display. ISO dates pass through;
/// anything unrecognized falls back to `today`.
pub fn resolve_review_date(raw: &str, today: NaiveDate) -> NaiveDate {
    let s = raw.trim();
    match s {
        "오늘" => return today,
        "어제" => return today - chrono::Duration::days(1),
        "그제" => return today - chrono::Duration::days(2),
        _ => {}
    }
    if let Some(n) = s.strip_suffix("일 전").and_then(|d| d.trim().parse::<i64>().ok()) {
        return today - chrono::Duration::days(n);
    }
    if let Some(n) = s.strip_suffix("개월 전").and_then(|d| d.trim().parse::<i64>().ok()) {
        return today - chrono::Duration::days(n * 30);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        // Guard against far-future dates from a clock-skewed platform.
        if date.year() >= 2000 && date <= today {
            return date;
        }
    }
    today
}

/// Strip trailing date/menu noise the crawlers sometimes capture together
/// with the author name ("소워닝오늘완존 맛있어요..." -> "소워닝").
pub fn clean_author_name(raw: &str) -> String {
    const MARKERS: [&str; 8] = [
        "오늘", "어제", "그제", "일 전", "개월 전", "주문메뉴", "배달리뷰", "사장님",
    ];
    for marker in MARKERS {
        if let Some(idx) = raw.find(marker) {
            let head: String = raw[..idx].trim().chars().take(20).collect();
            if !head.is_empty() {
                return head;
            }
        }
    }
    raw.trim().chars().take(10).collect()
}

/// The auto-post eligibility rule.
///
/// A ratingless review never qualifies: platforms without star ratings
/// always go through the delayed-review path.
pub fn auto_post_eligible(
    rating: Option<u8>,
    quality_score: f32,
    urgency_score: f32,
    boss_review_needed: bool,
) -> bool {
    matches!(rating, Some(r) if r >= 4)
        && quality_score >= 0.7
        && urgency_score < 0.5
        && !boss_review_needed
}
