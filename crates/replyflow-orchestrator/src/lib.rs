//! # ReplyFlow Orchestrator
//!
//! The review lifecycle pipeline: collection, AI reply generation, and
//! batch posting, stitched together by the `Automation` facade.
//!
//! The three coordinators never call each other. Collection leaves rows
//! at `pending`, generation moves them to `generated`/`ready_to_post`,
//! posting drives them through `processing` to `posted`/`failed` — the
//! status field is the only handoff between stages, and the scheduler
//! fires each stage on its own cadence.

pub mod collection;
pub mod generation;
pub mod posting;

#[cfg(test)]
pub(crate) mod testutil;

pub use collection::{CollectionCoordinator, CollectionSummary};
pub use generation::{GenerationCoordinator, GenerationSummary};
pub use posting::{PostingBatchProcessor, PostingSummary};

use std::sync::Arc;
use std::time::Duration;

use replyflow_core::config::{Cadence, ReplyFlowConfig, SchedulerConfig};
use replyflow_core::{Crawler, PlatformSet, ReplyGenerator, ReplyPoster, Result, ReviewStatus};
use replyflow_scheduler::Scheduler;
use replyflow_store::ReviewStore;
use replyflow_vault::CredentialVault;

pub const JOB_COLLECT: &str = "collect";
pub const JOB_GENERATE: &str = "generate";
pub const JOB_POST: &str = "post";

/// The surface the HTTP layer and the CLI drive.
pub struct Automation {
    store: Arc<ReviewStore>,
    collector: CollectionCoordinator,
    generator: GenerationCoordinator,
    poster: PostingBatchProcessor,
    scheduler_cfg: SchedulerConfig,
}

impl Automation {
    pub fn new(
        store: Arc<ReviewStore>,
        vault: Arc<CredentialVault>,
        crawlers: PlatformSet<dyn Crawler>,
        reply_generator: Arc<dyn ReplyGenerator>,
        posters: PlatformSet<dyn ReplyPoster>,
        cfg: ReplyFlowConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            collector: CollectionCoordinator::new(
                store.clone(),
                vault.clone(),
                crawlers,
                cfg.collection.clone(),
            ),
            generator: GenerationCoordinator::new(
                store.clone(),
                reply_generator,
                cfg.generation.clone(),
            ),
            poster: PostingBatchProcessor::new(store.clone(), vault, posters, cfg.posting.clone()),
            scheduler_cfg: cfg.scheduler.clone(),
            store,
        })
    }

    /// One collection pass over every active store.
    pub async fn collect_all(&self) -> Result<CollectionSummary> {
        self.collector.collect_all().await
    }

    /// One generation pass over every review without a draft.
    pub async fn generate_for_pending(&self) -> Result<GenerationSummary> {
        self.generator.generate_for_pending().await
    }

    /// One posting pass over every due draft.
    pub async fn post_due_replies(&self) -> Result<PostingSummary> {
        self.poster.post_due_replies().await
    }

    /// Read-only status lookup.
    pub fn review_status(&self, review_id: &str) -> Result<Option<ReviewStatus>> {
        self.store.review_status(review_id)
    }

    /// Reviews still awaiting a draft for one store.
    pub fn pending_count(&self, store_code: &str) -> Result<u32> {
        self.store.pending_count(store_code)
    }

    /// Run the whole pipeline once, with a settle pause between stages so
    /// each stage sees the previous one's writes, then keep it running on
    /// the aggressive cadences.
    pub async fn run_bootstrap(self: Arc<Self>) -> Scheduler {
        let settle = Duration::from_secs(self.scheduler_cfg.bootstrap_settle_secs);
        tracing::info!("🚀 Bootstrap: immediate pipeline pass, then aggressive schedule");

        match self.collect_all().await {
            Ok(summary) => tracing::info!(
                "📥 Bootstrap collection: {} new, {} duplicate, {} store errors",
                summary.collected,
                summary.duplicates,
                summary.store_errors.len()
            ),
            Err(e) => tracing::error!("Bootstrap collection failed: {e}"),
        }
        tokio::time::sleep(settle).await;

        match self.generate_for_pending().await {
            Ok(summary) => tracing::info!(
                "✍️ Bootstrap generation: {} drafted, {} failed",
                summary.success,
                summary.failed
            ),
            Err(e) => tracing::error!("Bootstrap generation failed: {e}"),
        }
        tokio::time::sleep(settle).await;

        match self.post_due_replies().await {
            Ok(summary) => tracing::info!(
                "📤 Bootstrap posting: {} posted, {} failed",
                summary.posted,
                summary.failed
            ),
            Err(e) => tracing::error!("Bootstrap posting failed: {e}"),
        }

        let cadence = self.scheduler_cfg.aggressive.clone();
        let scheduler = Self::build_scheduler(&self, &cadence);
        scheduler.start();
        scheduler
    }

    /// Register the periodic jobs on the steady-state cadences without an
    /// immediate pass.
    pub fn run_scheduled_only(self: Arc<Self>) -> Scheduler {
        tracing::info!("⏰ Steady-state schedule, no immediate pass");
        let cadence = self.scheduler_cfg.steady.clone();
        let scheduler = Self::build_scheduler(&self, &cadence);
        scheduler.start();
        scheduler
    }

    fn build_scheduler(automation: &Arc<Self>, cadence: &Cadence) -> Scheduler {
        let scheduler = Scheduler::new();

        let collector = automation.clone();
        scheduler.register(
            JOB_COLLECT,
            Duration::from_secs(cadence.collect_secs),
            move || {
                let automation = collector.clone();
                async move {
                    if let Err(e) = automation.collect_all().await {
                        tracing::error!("Collection pass failed: {e}");
                    }
                }
            },
        );

        let generator = automation.clone();
        scheduler.register(
            JOB_GENERATE,
            Duration::from_secs(cadence.generate_secs),
            move || {
                let automation = generator.clone();
                async move {
                    if let Err(e) = automation.generate_for_pending().await {
                        tracing::error!("Generation pass failed: {e}");
                    }
                }
            },
        );

        let poster = automation.clone();
        scheduler.register(JOB_POST, Duration::from_secs(cadence.post_secs), move || {
            let automation = poster.clone();
            async move {
                if let Err(e) = automation.post_due_replies().await {
                    tracing::error!("Posting pass failed: {e}");
                }
            }
        });

        scheduler
    }
}
