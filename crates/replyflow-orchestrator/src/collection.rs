//! Collection coordinator — pulls unreplied reviews from every active store.
//!
//! One crawler failure is recorded on the store record and skipped; it
//! never aborts the batch. Dedup against prior runs happens at the store
//! gateway via the deterministic review identity.

use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use replyflow_core::config::CollectionConfig;
use replyflow_core::{
    Crawler, PlatformSet, ReplyFlowError, Result, Review, StoreCredentials, StorePolicy,
};
use replyflow_store::ReviewStore;
use replyflow_vault::CredentialVault;

/// Result of one collection pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionSummary {
    pub stores: u32,
    pub collected: u32,
    pub duplicates: u32,
    /// (store_code, error) per store that failed this pass.
    pub store_errors: Vec<(String, String)>,
}

pub struct CollectionCoordinator {
    store: Arc<ReviewStore>,
    vault: Arc<CredentialVault>,
    crawlers: PlatformSet<dyn Crawler>,
    cfg: CollectionConfig,
}

impl CollectionCoordinator {
    pub fn new(
        store: Arc<ReviewStore>,
        vault: Arc<CredentialVault>,
        crawlers: PlatformSet<dyn Crawler>,
        cfg: CollectionConfig,
    ) -> Self {
        Self {
            store,
            vault,
            crawlers,
            cfg,
        }
    }

    /// Visit every active, auto-reply-enabled store and merge what the
    /// crawlers return into the review table as `pending` rows.
    pub async fn collect_all(&self) -> Result<CollectionSummary> {
        let policies = self.store.active_policies()?;
        let today = Local::now().date_naive();
        let mut summary = CollectionSummary {
            stores: policies.len() as u32,
            ..Default::default()
        };

        for policy in &policies {
            match self.collect_store(policy, today).await {
                Ok((new, dup)) => {
                    summary.collected += new;
                    summary.duplicates += dup;
                    if new > 0 {
                        tracing::info!(
                            "📥 Collected {} new reviews for '{}' ({})",
                            new,
                            policy.store_code,
                            policy.platform
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ Collection failed for '{}': {e}", policy.store_code);
                    self.store
                        .record_store_error(&policy.store_code, &e.to_string())?;
                    summary.store_errors.push((policy.store_code.clone(), e.to_string()));
                }
            }
        }

        Ok(summary)
    }

    async fn collect_store(
        &self,
        policy: &StorePolicy,
        today: chrono::NaiveDate,
    ) -> Result<(u32, u32)> {
        let creds = StoreCredentials {
            platform: policy.platform,
            platform_code: policy.platform_code.clone(),
            username: policy.platform_id.clone(),
            password: self.vault.decrypt(&policy.platform_pw)?,
        };
        let crawler = self.crawlers.get(policy.platform).clone();
        let timeout = Duration::from_secs(self.cfg.store_timeout_secs);

        let logged_in = tokio::time::timeout(timeout, crawler.login(&creds))
            .await
            .map_err(|_| ReplyFlowError::Timeout(self.cfg.store_timeout_secs))??;
        if !logged_in {
            return Err(ReplyFlowError::Collection("platform login rejected".into()));
        }

        let fetched = tokio::time::timeout(
            timeout,
            crawler.fetch_unreplied_reviews(&creds, self.cfg.fetch_limit),
        )
        .await
        .map_err(|_| ReplyFlowError::Timeout(self.cfg.store_timeout_secs))??;

        let mut new = 0;
        let mut duplicates = 0;
        for raw in &fetched {
            let review = Review::from_raw(raw, policy.platform, &policy.store_code, today);
            if self.store.insert_review_if_absent(&review)? {
                new += 1;
            } else {
                duplicates += 1;
            }
        }
        Ok((new, duplicates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FixedCrawler, make_policy, seeded_vault};
    use replyflow_core::Platform;

    fn coordinator(
        store: Arc<ReviewStore>,
        vault: Arc<CredentialVault>,
        crawler: Arc<FixedCrawler>,
    ) -> CollectionCoordinator {
        CollectionCoordinator::new(
            store,
            vault,
            PlatformSet::uniform(crawler as Arc<dyn Crawler>),
            CollectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_collects_and_dedups() {
        let store = Arc::new(ReviewStore::in_memory().unwrap());
        let vault = seeded_vault();
        store
            .upsert_policy(&make_policy("STR_001", Platform::Baemin, "140001", &vault))
            .unwrap();
        let crawler = Arc::new(FixedCrawler::with_reviews(vec!["n1", "n2"]));
        let coord = coordinator(store.clone(), vault, crawler);

        let first = coord.collect_all().await.unwrap();
        assert_eq!(first.collected, 2);
        assert_eq!(first.duplicates, 0);
        assert!(first.store_errors.is_empty());

        // second pass sees the same native reviews and drops them
        let second = coord.collect_all().await.unwrap();
        assert_eq!(second.collected, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(store.pending_count("STR_001").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated() {
        let store = Arc::new(ReviewStore::in_memory().unwrap());
        let vault = seeded_vault();
        store
            .upsert_policy(&make_policy("STR_BAD", Platform::Baemin, "140001", &vault))
            .unwrap();
        store
            .upsert_policy(&make_policy("STR_OK", Platform::Yogiyo, "990001", &vault))
            .unwrap();

        let crawler = Arc::new(FixedCrawler::with_reviews(vec!["n1"]).failing_for("140001"));
        let coord = coordinator(store.clone(), vault, crawler);

        let summary = coord.collect_all().await.unwrap();
        assert_eq!(summary.stores, 2);
        assert_eq!(summary.collected, 1);
        assert_eq!(summary.store_errors.len(), 1);
        assert_eq!(summary.store_errors[0].0, "STR_BAD");

        // the failure landed on the store record, not just the log
        let policy = store.policy_for("STR_BAD").unwrap().unwrap();
        assert!(policy.last_error.is_some());
        assert_eq!(store.pending_count("STR_OK").unwrap(), 1);
        assert_eq!(store.pending_count("STR_BAD").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_login_recorded() {
        let store = Arc::new(ReviewStore::in_memory().unwrap());
        let vault = seeded_vault();
        store
            .upsert_policy(&make_policy("STR_001", Platform::Coupang, "550001", &vault))
            .unwrap();
        let crawler = Arc::new(FixedCrawler::with_reviews(vec!["n1"]).rejecting_login());
        let coord = coordinator(store.clone(), vault, crawler);

        let summary = coord.collect_all().await.unwrap();
        assert_eq!(summary.collected, 0);
        assert_eq!(summary.store_errors.len(), 1);
        assert!(summary.store_errors[0].1.contains("login"));
    }

    #[tokio::test]
    async fn test_crawler_sees_decrypted_password() {
        let store = Arc::new(ReviewStore::in_memory().unwrap());
        let vault = seeded_vault();
        store
            .upsert_policy(&make_policy("STR_001", Platform::Baemin, "140001", &vault))
            .unwrap();
        let crawler = Arc::new(FixedCrawler::with_reviews(vec!["n1"]));
        let coord = coordinator(store, vault, crawler.clone());

        coord.collect_all().await.unwrap();
        let seen = crawler.seen_credentials.lock().unwrap();
        assert_eq!(seen.len(), 1);
        // make_policy encrypts this plaintext through the vault
        assert_eq!(seen[0].password, "pw-140001");
    }
}
