//! Posting batch processor — pushes due drafts back to the platforms.
//!
//! Posting requires one authenticated browser session per platform
//! account, and sessions are expensive, so due reviews are grouped by
//! (platform, platform account) and each group shares a single login.
//! Groups are processed sequentially; one group's session failure never
//! blocks the others, and every selected review ends the run as either
//! `posted` or `failed` — no silent drops.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use replyflow_core::config::PostingConfig;
use replyflow_core::{
    Platform, PlatformSet, PostItem, ReplyPoster, Result, Review, ReviewStatus, StoreCredentials,
    StorePolicy,
};
use replyflow_store::ReviewStore;
use replyflow_vault::CredentialVault;

/// Result of one posting pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostingSummary {
    pub selected: u32,
    pub posted: u32,
    pub failed: u32,
    pub groups: u32,
}

/// All due reviews sharing one login session.
struct PostGroup {
    platform: Platform,
    platform_code: String,
    policy: StorePolicy,
    reviews: Vec<Review>,
}

pub struct PostingBatchProcessor {
    store: Arc<ReviewStore>,
    vault: Arc<CredentialVault>,
    posters: PlatformSet<dyn ReplyPoster>,
    cfg: PostingConfig,
}

impl PostingBatchProcessor {
    pub fn new(
        store: Arc<ReviewStore>,
        vault: Arc<CredentialVault>,
        posters: PlatformSet<dyn ReplyPoster>,
        cfg: PostingConfig,
    ) -> Self {
        Self {
            store,
            vault,
            posters,
            cfg,
        }
    }

    /// Post every draft whose delay window has elapsed.
    pub async fn post_due_replies(&self) -> Result<PostingSummary> {
        self.post_due_replies_at(Local::now().date_naive()).await
    }

    /// Same pass pinned to an explicit `today`, used by tests.
    pub async fn post_due_replies_at(&self, today: NaiveDate) -> Result<PostingSummary> {
        let normal = self.store.due_normal(
            today,
            self.cfg.min_age_days,
            self.cfg.max_age_days,
            self.cfg.normal_cap,
        )?;
        let boss = self.store.due_boss(
            today,
            self.cfg.boss_min_age_days,
            self.cfg.max_age_days,
            self.cfg.boss_cap,
        )?;

        let mut summary = PostingSummary {
            selected: (normal.len() + boss.len()) as u32,
            ..Default::default()
        };
        if summary.selected == 0 {
            return Ok(summary);
        }

        let groups = self.group_by_account(normal.into_iter().chain(boss), &mut summary)?;
        summary.groups = groups.len() as u32;

        for group in &groups {
            let (posted, failed) = self.post_group(group).await;
            summary.posted += posted;
            summary.failed += failed;
        }

        tracing::info!(
            "📤 Posting pass: {} selected, {} posted, {} failed across {} groups",
            summary.selected,
            summary.posted,
            summary.failed,
            summary.groups
        );
        Ok(summary)
    }

    /// Bucket due reviews by (platform, platform account). A review whose
    /// store has no policy cannot be posted; it fails immediately rather
    /// than dropping out silently.
    fn group_by_account(
        &self,
        reviews: impl Iterator<Item = Review>,
        summary: &mut PostingSummary,
    ) -> Result<Vec<PostGroup>> {
        let mut groups: Vec<PostGroup> = Vec::new();
        for review in reviews {
            let Some(policy) = self.store.policy_for(&review.store_code)? else {
                self.fail_unposted(&review, "store policy missing");
                summary.failed += 1;
                continue;
            };
            let existing = groups
                .iter()
                .position(|g| g.platform == policy.platform && g.platform_code == policy.platform_code);
            match existing {
                Some(idx) => groups[idx].reviews.push(review),
                None => groups.push(PostGroup {
                    platform: policy.platform,
                    platform_code: policy.platform_code.clone(),
                    policy,
                    reviews: vec![review],
                }),
            }
        }
        Ok(groups)
    }

    /// Post one group through a single session. Returns (posted, failed).
    async fn post_group(&self, group: &PostGroup) -> (u32, u32) {
        // Claim members first; a review another writer already moved is
        // left alone.
        let mut claimed: Vec<&Review> = Vec::new();
        for review in &group.reviews {
            match self.store.set_status(&review.review_id, ReviewStatus::Processing) {
                Ok(()) => claimed.push(review),
                Err(e) => {
                    tracing::debug!("Skipping {}: {e}", review.review_id);
                }
            }
        }
        if claimed.is_empty() {
            return (0, 0);
        }

        // Decrypt once per group, before any collaborator call.
        let password = match self.vault.decrypt(&group.policy.platform_pw) {
            Ok(pw) => pw,
            Err(e) => {
                let msg = format!("credential decrypt failed: {e}");
                tracing::warn!(
                    "⚠️ Group {}/{}: {msg}",
                    group.platform,
                    group.platform_code
                );
                return (0, self.fail_claimed(&claimed, &msg));
            }
        };
        let creds = StoreCredentials {
            platform: group.platform,
            platform_code: group.platform_code.clone(),
            username: group.policy.platform_id.clone(),
            password,
        };

        let items: Vec<PostItem> = claimed
            .iter()
            .map(|review| PostItem {
                review_id: review.review_id.clone(),
                text: reply_text(review),
            })
            .collect();

        let poster = self.posters.get(group.platform).clone();
        let timeout = Duration::from_secs(self.cfg.browser_timeout_secs);
        let outcomes = match tokio::time::timeout(timeout, poster.post_batch(&creds, &items)).await
        {
            Ok(Ok(outcomes)) => outcomes,
            Ok(Err(e)) => {
                tracing::warn!(
                    "⚠️ Group {}/{} failed: {e}",
                    group.platform,
                    group.platform_code
                );
                return (0, self.fail_claimed(&claimed, &e.to_string()));
            }
            Err(_) => {
                let msg = format!(
                    "browser automation timed out after {}s",
                    self.cfg.browser_timeout_secs
                );
                tracing::warn!(
                    "⏱️ Group {}/{}: {msg}",
                    group.platform,
                    group.platform_code
                );
                return (0, self.fail_claimed(&claimed, &msg));
            }
        };

        let mut posted = 0;
        let mut failed = 0;
        for (review, item) in claimed.iter().zip(&items) {
            let outcome = outcomes.iter().find(|o| o.review_id == review.review_id);
            match outcome {
                Some(o) if o.success => {
                    match self.store.mark_posted(&review.review_id, &item.text) {
                        Ok(()) => posted += 1,
                        Err(e) => {
                            tracing::warn!("⚠️ Could not mark {} posted: {e}", review.review_id);
                            failed += 1;
                        }
                    }
                }
                Some(o) => {
                    let msg = o.error.as_deref().unwrap_or("posting rejected");
                    if self.store.mark_failed(&review.review_id, msg).is_ok() {
                        failed += 1;
                    }
                }
                None => {
                    // The adapter returned no verdict; treat as failure.
                    if self
                        .store
                        .mark_failed(&review.review_id, "no posting result returned")
                        .is_ok()
                    {
                        failed += 1;
                    }
                }
            }
        }
        (posted, failed)
    }

    fn fail_claimed(&self, claimed: &[&Review], error: &str) -> u32 {
        let mut failed = 0;
        for review in claimed {
            if self.store.mark_failed(&review.review_id, error).is_ok() {
                failed += 1;
            }
        }
        failed
    }

    /// Fail a review that never reached a group session.
    fn fail_unposted(&self, review: &Review, error: &str) {
        if self
            .store
            .set_status(&review.review_id, ReviewStatus::Processing)
            .is_ok()
        {
            let _ = self.store.mark_failed(&review.review_id, error);
        }
    }
}

/// Human-edited reply wins over the raw AI draft.
fn reply_text(review: &Review) -> String {
    review
        .final_response
        .clone()
        .or_else(|| review.ai_response.clone())
        .unwrap_or_default()
}
