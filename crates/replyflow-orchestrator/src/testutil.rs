//! Scripted collaborators and fixtures shared by the coordinator tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use replyflow_core::{
    Crawler, GeneratedReply, Platform, PostItem, PostOutcome, RawReview, ReplyFlowError,
    ReplyGenerator, ReplyPoster, Result, Review, ReviewStatus, StoreCredentials, StorePolicy,
};
use replyflow_store::ReviewStore;
use replyflow_vault::CredentialVault;

pub fn seeded_vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::with_key([42u8; 32]))
}

pub fn make_policy(
    store_code: &str,
    platform: Platform,
    platform_code: &str,
    vault: &CredentialVault,
) -> StorePolicy {
    StorePolicy {
        store_code: store_code.into(),
        store_name: format!("매장 {store_code}"),
        platform,
        platform_code: platform_code.into(),
        platform_id: format!("owner-{store_code}"),
        platform_pw: vault.encrypt(&format!("pw-{platform_code}")),
        rating_replies: [true; 5],
        greeting_start: "안녕하세요".into(),
        greeting_end: Some("감사합니다".into()),
        role: "친근한 사장님".into(),
        tone: "전문성과 친근함이 조화된 어조".into(),
        prohibited_words: vec![],
        max_reply_length: 450,
        auto_reply_enabled: true,
        auto_reply_hours: None,
        is_active: true,
        last_error: None,
    }
}

pub fn raw_review(native_id: &str, days_ago: i64, rating: Option<u8>) -> RawReview {
    RawReview {
        native_id: native_id.into(),
        author: "고객".into(),
        rating,
        content: "맛있게 잘 먹었습니다".into(),
        relative_date: format!("{days_ago}일 전"),
        ordered_menu: "닭강정 세트".into(),
        delivery_review: String::new(),
        images: vec![],
        has_reply: false,
    }
}

/// Insert a review that already carries a draft, ready for a posting pass.
/// Returns its review id.
pub fn seed_drafted_review(
    store: &ReviewStore,
    store_code: &str,
    platform: Platform,
    native_id: &str,
    days_ago: i64,
    boss: bool,
) -> String {
    let today = chrono::Local::now().date_naive();
    let mut review = Review::from_raw(&raw_review(native_id, 0, Some(5)), platform, store_code, today);
    review.review_date = today - chrono::Duration::days(days_ago);
    store.insert_review_if_absent(&review).unwrap();
    let to = if boss {
        ReviewStatus::Generated
    } else {
        ReviewStatus::ReadyToPost
    };
    store
        .record_generation(&review.review_id, "소중한 리뷰 감사합니다!", 0.9, 0.1, boss, to)
        .unwrap();
    review.review_id
}

/// Crawler returning a fixed set of native review ids.
pub struct FixedCrawler {
    native_ids: Vec<String>,
    days_ago: i64,
    fail_platform_code: Option<String>,
    reject_login: bool,
    pub seen_credentials: Mutex<Vec<StoreCredentials>>,
}

impl FixedCrawler {
    pub fn with_reviews(native_ids: Vec<&str>) -> Self {
        Self {
            native_ids: native_ids.into_iter().map(String::from).collect(),
            days_ago: 0,
            fail_platform_code: None,
            reject_login: false,
            seen_credentials: Mutex::new(Vec::new()),
        }
    }

    /// Emit reviews dated this many days in the past.
    pub fn aged(mut self, days_ago: i64) -> Self {
        self.days_ago = days_ago;
        self
    }

    pub fn failing_for(mut self, platform_code: &str) -> Self {
        self.fail_platform_code = Some(platform_code.into());
        self
    }

    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }
}

#[async_trait]
impl Crawler for FixedCrawler {
    async fn login(&self, creds: &StoreCredentials) -> Result<bool> {
        self.seen_credentials.lock().unwrap().push(creds.clone());
        Ok(!self.reject_login)
    }

    async fn fetch_unreplied_reviews(
        &self,
        creds: &StoreCredentials,
        limit: u32,
    ) -> Result<Vec<RawReview>> {
        if self.fail_platform_code.as_deref() == Some(creds.platform_code.as_str()) {
            return Err(ReplyFlowError::Collection("crawler crashed".into()));
        }
        Ok(self
            .native_ids
            .iter()
            .take(limit as usize)
            .map(|id| raw_review(id, self.days_ago, Some(5)))
            .collect())
    }
}

/// Generator returning fixed scores, tracking concurrency.
pub struct ScriptedGenerator {
    quality: f32,
    urgency: f32,
    boss: bool,
    delay: Duration,
    fail: bool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(quality: f32, urgency: f32, boss: bool) -> Self {
        Self {
            quality,
            urgency,
            boss,
            delay: Duration::ZERO,
            fail: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn generate_reply(&self, _review: &Review, policy: &StorePolicy) -> Result<GeneratedReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(ReplyFlowError::Generation("model unavailable".into()));
        }
        Ok(GeneratedReply {
            text: format!("{} 소중한 리뷰 감사합니다!", policy.greeting_start),
            quality_score: self.quality,
            urgency_score: self.urgency,
            boss_review_needed: self.boss,
            prompt_used: "scripted prompt".into(),
            model_version: "test-model-1".into(),
            token_usage: 128,
            latency_ms: 5,
        })
    }
}

/// Poster with scriptable per-platform and per-review failures.
#[derive(Default)]
pub struct ScriptedPoster {
    fail_platform: Option<Platform>,
    reject_ids: Vec<String>,
    drop_ids: Vec<String>,
    pub calls: Mutex<Vec<(StoreCredentials, Vec<PostItem>)>>,
}

impl ScriptedPoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_platform(mut self, platform: Platform) -> Self {
        self.fail_platform = Some(platform);
        self
    }

    pub fn rejecting(mut self, review_id: &str) -> Self {
        self.reject_ids.push(review_id.into());
        self
    }

    /// Omit this review from the result list entirely (a buggy adapter).
    pub fn dropping(mut self, review_id: &str) -> Self {
        self.drop_ids.push(review_id.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ReplyPoster for ScriptedPoster {
    async fn post_batch(
        &self,
        creds: &StoreCredentials,
        items: &[PostItem],
    ) -> Result<Vec<PostOutcome>> {
        self.calls
            .lock()
            .unwrap()
            .push((creds.clone(), items.to_vec()));
        if self.fail_platform == Some(creds.platform) {
            return Err(ReplyFlowError::Posting("browser session lost".into()));
        }
        Ok(items
            .iter()
            .filter(|item| !self.drop_ids.contains(&item.review_id))
            .map(|item| {
                if self.reject_ids.contains(&item.review_id) {
                    PostOutcome {
                        review_id: item.review_id.clone(),
                        success: false,
                        error: Some("platform rejected the reply".into()),
                    }
                } else {
                    PostOutcome {
                        review_id: item.review_id.clone(),
                        success: true,
                        error: None,
                    }
                }
            })
            .collect())
    }
}
