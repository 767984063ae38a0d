//! Collaborator traits — the seams to everything this crate does not do.
//!
//! The DOM scraping, the generative-AI wire format, and the browser
//! automation all live behind these traits in the platform adapter crates.
//! The orchestrator only ever sees typed inputs and outputs.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Platform, RawReview, Review, StorePolicy};

/// Decrypted login credentials for one platform account.
///
/// Produced by the vault once per platform group, immediately before the
/// collaborator call that needs them. Never persisted in this form.
#[derive(Debug, Clone)]
pub struct StoreCredentials {
    pub platform: Platform,
    /// Platform-native store id.
    pub platform_code: String,
    pub username: String,
    pub password: String,
}

/// Fetches unreplied reviews from one platform's owner dashboard.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Establish a session. Returns false on rejected credentials.
    async fn login(&self, creds: &StoreCredentials) -> Result<bool>;

    /// Fetch up to `limit` reviews that have no owner reply yet.
    async fn fetch_unreplied_reviews(
        &self,
        creds: &StoreCredentials,
        limit: u32,
    ) -> Result<Vec<RawReview>>;
}

/// One generated reply candidate with its evaluation scores.
#[derive(Debug, Clone)]
pub struct GeneratedReply {
    pub text: String,
    /// Draft quality in [0,1].
    pub quality_score: f32,
    /// How urgently a human should look at the review, in [0,1].
    pub urgency_score: f32,
    /// The draft needs owner attention before autonomous posting.
    pub boss_review_needed: bool,
    pub prompt_used: String,
    pub model_version: String,
    pub token_usage: u32,
    pub latency_ms: u64,
}

/// Produces reply drafts from the external generative-AI service.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, review: &Review, policy: &StorePolicy) -> Result<GeneratedReply>;
}

/// One reply queued for posting within a platform group.
#[derive(Debug, Clone)]
pub struct PostItem {
    pub review_id: String,
    pub text: String,
}

/// Per-review outcome of a batch posting run.
#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub review_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Posts replies back to a platform through one authenticated automation
/// session. Implementations post items sequentially and keep a short
/// inter-post delay to stay under platform rate limits.
#[async_trait]
pub trait ReplyPoster: Send + Sync {
    async fn post_batch(
        &self,
        creds: &StoreCredentials,
        items: &[PostItem],
    ) -> Result<Vec<PostOutcome>>;
}

/// One collaborator implementation per platform, selected by enum match.
///
/// Replaces the old string-keyed adapter lookup: a missing platform is
/// unrepresentable.
pub struct PlatformSet<T: ?Sized> {
    pub baemin: Arc<T>,
    pub coupang: Arc<T>,
    pub yogiyo: Arc<T>,
    pub naver: Arc<T>,
}

impl<T: ?Sized> PlatformSet<T> {
    /// Use the same implementation for every platform.
    pub fn uniform(shared: Arc<T>) -> Self {
        Self {
            baemin: shared.clone(),
            coupang: shared.clone(),
            yogiyo: shared.clone(),
            naver: shared,
        }
    }

    pub fn get(&self, platform: Platform) -> &Arc<T> {
        match platform {
            Platform::Baemin => &self.baemin,
            Platform::Coupang => &self.coupang,
            Platform::Yogiyo => &self.yogiyo,
            Platform::Naver => &self.naver,
        }
    }
}

impl<T: ?Sized> Clone for PlatformSet<T> {
    fn clone(&self) -> Self {
        Self {
            baemin: self.baemin.clone(),
            coupang: self.coupang.clone(),
            yogiyo: self.yogiyo.clone(),
            naver: self.naver.clone(),
        }
    }
}
