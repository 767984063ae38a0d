//! Generation coordinator — drafts replies for reviews that have none.
//!
//! Fan-out toward the AI service is bounded by a counting semaphore: the
//! service rate-limits, and the browser automation downstream is the
//! scarcer resource anyway, so unbounded generation would only starve
//! posting. A failed call leaves the review `pending` with the error on
//! the row; the next cadence retries it.

use chrono::{Local, NaiveTime};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use replyflow_core::config::GenerationConfig;
use replyflow_core::types::auto_post_eligible;
use replyflow_core::{
    GenerationHistoryEntry, ReplyGenerator, Result, Review, ReviewStatus, StorePolicy,
};
use replyflow_store::ReviewStore;
use tokio::sync::Semaphore;

/// Upper bound on reviews taken per pass; anything beyond waits a cadence.
const PASS_LIMIT: u32 = 500;

/// Result of one generation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
}

enum Outcome {
    Success,
    Failed,
    Skipped,
}

pub struct GenerationCoordinator {
    store: Arc<ReviewStore>,
    generator: Arc<dyn ReplyGenerator>,
    cfg: GenerationConfig,
}

impl GenerationCoordinator {
    pub fn new(
        store: Arc<ReviewStore>,
        generator: Arc<dyn ReplyGenerator>,
        cfg: GenerationConfig,
    ) -> Self {
        Self {
            store,
            generator,
            cfg,
        }
    }

    /// Draft replies for every review without one, at most
    /// `cfg.max_concurrent` AI calls in flight.
    pub async fn generate_for_pending(&self) -> Result<GenerationSummary> {
        let reviews = self.store.reviews_without_reply(PASS_LIMIT)?;
        if reviews.is_empty() {
            return Ok(GenerationSummary::default());
        }

        // Load each owning policy once, not per review.
        let mut policies: HashMap<String, StorePolicy> = HashMap::new();
        for review in &reviews {
            if !policies.contains_key(&review.store_code) {
                if let Some(policy) = self.store.policy_for(&review.store_code)? {
                    policies.insert(review.store_code.clone(), policy);
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent.max(1)));
        let now = Local::now().time();
        let tasks = reviews.into_iter().map(|review| {
            let semaphore = semaphore.clone();
            let policy = policies.get(&review.store_code).cloned();
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Outcome::Failed;
                };
                self.generate_one(review, policy, now).await
            }
        });

        let mut summary = GenerationSummary::default();
        for outcome in futures::future::join_all(tasks).await {
            match outcome {
                Outcome::Success => summary.success += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
        }
        tracing::info!(
            "✍️ Generation pass: {} drafted, {} failed, {} skipped",
            summary.success,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    async fn generate_one(
        &self,
        review: Review,
        policy: Option<StorePolicy>,
        now: NaiveTime,
    ) -> Outcome {
        let Some(policy) = policy else {
            tracing::warn!("⚠️ No store policy for '{}', skipping", review.store_code);
            let _ = self
                .store
                .record_generation_error(&review.review_id, "store policy missing");
            return Outcome::Skipped;
        };
        if !policy.auto_reply_enabled || !policy.auto_reply_for(review.rating) {
            return Outcome::Skipped;
        }
        if let Some(hours) = &policy.auto_reply_hours {
            if !within_operating_hours(hours, now) {
                return Outcome::Skipped;
            }
        }

        let timeout = Duration::from_secs(self.cfg.call_timeout_secs);
        let started = std::time::Instant::now();
        let generated = match tokio::time::timeout(
            timeout,
            self.generator.generate_reply(&review, &policy),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Generation failed for {}: {e}", review.review_id);
                let _ = self
                    .store
                    .record_generation_error(&review.review_id, &e.to_string());
                return Outcome::Failed;
            }
            Err(_) => {
                tracing::warn!(
                    "⏱️ Generation timed out for {} after {}s",
                    review.review_id,
                    self.cfg.call_timeout_secs
                );
                let _ = self.store.record_generation_error(
                    &review.review_id,
                    &format!("generation timed out after {}s", self.cfg.call_timeout_secs),
                );
                return Outcome::Failed;
            }
        };

        let eligible = auto_post_eligible(
            review.rating,
            generated.quality_score,
            generated.urgency_score,
            generated.boss_review_needed,
        );
        let to = if eligible {
            ReviewStatus::ReadyToPost
        } else {
            ReviewStatus::Generated
        };

        if let Err(e) = self.store.record_generation(
            &review.review_id,
            &generated.text,
            generated.quality_score,
            generated.urgency_score,
            generated.boss_review_needed,
            to,
        ) {
            tracing::warn!("⚠️ Could not persist draft for {}: {e}", review.review_id);
            return Outcome::Failed;
        }

        let mut entry = GenerationHistoryEntry::new(&review.review_id);
        entry.prompt = generated.prompt_used.clone();
        entry.model = generated.model_version.clone();
        entry.quality_score = generated.quality_score;
        entry.urgency_score = generated.urgency_score;
        entry.token_usage = generated.token_usage;
        entry.latency_ms = if generated.latency_ms > 0 {
            generated.latency_ms
        } else {
            started.elapsed().as_millis() as u64
        };
        entry.chosen = true;
        if let Err(e) = self.store.append_history(&entry) {
            // History is an audit trail, not enforcement; the draft stands.
            tracing::warn!("⚠️ History append failed for {}: {e}", review.review_id);
        }

        tracing::debug!(
            "✍️ Drafted reply for {} ({} -> {})",
            review.review_id,
            review.status,
            to
        );
        Outcome::Success
    }
}

/// Check a "HH:MM-HH:MM" operating window. Unparseable windows gate nothing.
pub(crate) fn within_operating_hours(window: &str, now: NaiveTime) -> bool {
    let Some((start_raw, end_raw)) = window.split_once('-') else {
        return true;
    };
    let start = NaiveTime::parse_from_str(start_raw.trim(), "%H:%M");
    let end = NaiveTime::parse_from_str(end_raw.trim(), "%H:%M");
    match (start, end) {
        (Ok(start), Ok(end)) => start <= now && now <= end,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptedGenerator, make_policy, raw_review, seeded_vault};
    use replyflow_core::Platform;
    use std::sync::atomic::Ordering;

    fn seed_pending(store: &ReviewStore, native_id: &str, rating: Option<u8>) -> String {
        let today = Local::now().date_naive();
        let review = Review::from_raw(
            &raw_review(native_id, 0, rating),
            Platform::Baemin,
            "STR_001",
            today,
        );
        store.insert_review_if_absent(&review).unwrap();
        review.review_id
    }

    fn setup(generator: ScriptedGenerator) -> (Arc<ReviewStore>, Arc<ScriptedGenerator>, GenerationCoordinator) {
        let store = Arc::new(ReviewStore::in_memory().unwrap());
        let vault = seeded_vault();
        store
            .upsert_policy(&make_policy("STR_001", Platform::Baemin, "140001", &vault))
            .unwrap();
        let generator = Arc::new(generator);
        let coord = GenerationCoordinator::new(
            store.clone(),
            generator.clone() as Arc<dyn ReplyGenerator>,
            GenerationConfig::default(),
        );
        (store, generator, coord)
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_ceiling() {
        let (store, generator, coord) =
            setup(ScriptedGenerator::new(0.8, 0.2, false).with_delay(Duration::from_millis(20)));
        for i in 0..20 {
            seed_pending(&store, &format!("n{i}"), Some(5));
        }

        let summary = coord.generate_for_pending().await.unwrap();
        assert_eq!(summary.success, 20);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 20);
        assert!(
            generator.max_in_flight.load(Ordering::SeqCst) <= 5,
            "saw {} concurrent calls",
            generator.max_in_flight.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_eligible_draft_becomes_ready_to_post() {
        let (store, _, coord) = setup(ScriptedGenerator::new(0.8, 0.2, false));
        let id = seed_pending(&store, "n1", Some(5));

        coord.generate_for_pending().await.unwrap();

        let review = store.get_review(&id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::ReadyToPost);
        assert!(review.ai_response.is_some());
        assert_eq!(review.quality_score, Some(0.8));
        assert_eq!(review.boss_reply_needed, Some(false));
    }

    #[tokio::test]
    async fn test_low_rating_draft_stays_generated() {
        let (store, _, coord) = setup(ScriptedGenerator::new(0.9, 0.1, false));
        let id = seed_pending(&store, "n1", Some(2));

        coord.generate_for_pending().await.unwrap();
        let review = store.get_review(&id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Generated);
    }

    #[tokio::test]
    async fn test_boss_flag_blocks_auto_post() {
        let (store, _, coord) = setup(ScriptedGenerator::new(0.9, 0.1, true));
        let id = seed_pending(&store, "n1", Some(5));

        coord.generate_for_pending().await.unwrap();
        let review = store.get_review(&id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Generated);
        assert_eq!(review.boss_reply_needed, Some(true));
    }

    #[tokio::test]
    async fn test_ratingless_review_never_auto_posts() {
        let (store, _, coord) = setup(ScriptedGenerator::new(1.0, 0.0, false));
        let id = seed_pending(&store, "n1", None);

        coord.generate_for_pending().await.unwrap();
        let review = store.get_review(&id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Generated);
    }

    #[tokio::test]
    async fn test_failure_keeps_pending_and_retries_next_pass() {
        let (store, generator, coord) = setup(ScriptedGenerator::new(0.8, 0.2, false).failing());
        let id = seed_pending(&store, "n1", Some(5));

        let summary = coord.generate_for_pending().await.unwrap();
        assert_eq!(summary.failed, 1);
        let review = store.get_review(&id).unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Pending);
        assert!(review.ai_response.is_none());
        assert!(review.error_message.is_some());

        // the next pass selects it again
        coord.generate_for_pending().await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rating_toggle_skips() {
        let store = Arc::new(ReviewStore::in_memory().unwrap());
        let vault = seeded_vault();
        let mut policy = make_policy("STR_001", Platform::Baemin, "140001", &vault);
        policy.rating_replies = [false, false, false, false, true];
        store.upsert_policy(&policy).unwrap();
        let generator = Arc::new(ScriptedGenerator::new(0.8, 0.2, false));
        let coord = GenerationCoordinator::new(
            store.clone(),
            generator.clone() as Arc<dyn ReplyGenerator>,
            GenerationConfig::default(),
        );
        let low = seed_pending(&store, "low", Some(1));
        seed_pending(&store, "high", Some(5));

        let summary = coord.generate_for_pending().await.unwrap();
        assert_eq!(summary.success, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            store.get_review(&low).unwrap().unwrap().status,
            ReviewStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_history_is_appended() {
        let (store, _, coord) = setup(ScriptedGenerator::new(0.8, 0.2, false));
        let id = seed_pending(&store, "n1", Some(5));

        coord.generate_for_pending().await.unwrap();
        let history = store.history_for(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].chosen);
        assert_eq!(history[0].model, "test-model-1");
        assert_eq!(history[0].token_usage, 128);
    }

    #[test]
    fn test_operating_hours() {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let late = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        assert!(within_operating_hours("10:00-20:00", noon));
        assert!(!within_operating_hours("10:00-20:00", late));
        // boundary minutes are inside
        assert!(within_operating_hours("12:00-20:00", noon));
        // garbage never gates
        assert!(within_operating_hours("whenever", late));
        assert!(within_operating_hours("25:99-26:00", late));
    }
}
