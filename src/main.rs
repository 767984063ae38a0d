//! # ReplyFlow — Unattended Review Reply Automation
//!
//! Collects customer reviews from delivery platforms, drafts AI replies,
//! and posts them back on independent schedules.
//!
//! Usage:
//!   replyflow run                      # bootstrap pass, then aggressive schedule
//!   replyflow run --scheduled-only     # steady-state schedule only
//!   replyflow collect|generate|post    # one-shot pipeline passes
//!   replyflow status <review_id>       # review lifecycle status
//!   replyflow pending <store_code>     # reviews awaiting a draft
//!
//! The platform crawler/poster adapters and the generative provider are
//! separate crates; this binary wires dry-run collaborators so the
//! pipeline, selection windows, and schedules can be exercised against a
//! real database without touching any platform.

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use replyflow_core::{
    Crawler, GeneratedReply, PlatformSet, RawReview, ReplyFlowConfig, ReplyFlowError,
    ReplyGenerator, ReplyPoster, PostItem, PostOutcome, Review, StoreCredentials, StorePolicy,
};
use replyflow_orchestrator::Automation;
use replyflow_store::ReviewStore;
use replyflow_vault::CredentialVault;

#[derive(Parser)]
#[command(
    name = "replyflow",
    version,
    about = "🤖 ReplyFlow — unattended review reply automation"
)]
struct Cli {
    /// Config file (default: ~/.replyflow/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Database path override
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline under the scheduler until interrupted
    Run {
        /// Register the steady-state schedule without the immediate pass
        #[arg(long)]
        scheduled_only: bool,
    },
    /// One collection pass over every active store
    Collect,
    /// One generation pass over every review without a draft
    Generate,
    /// One posting pass over every due draft
    Post,
    /// Show a review's lifecycle status
    Status { review_id: String },
    /// Count reviews awaiting a draft for a store
    Pending { store_code: String },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "replyflow=debug,replyflow_orchestrator=debug,replyflow_scheduler=debug,replyflow_store=debug"
    } else {
        "replyflow=info,replyflow_orchestrator=info,replyflow_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => ReplyFlowConfig::load_from(Path::new(&expand_path(path)))?,
        None => ReplyFlowConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.database_path = expand_path(db_path);
    }

    let store = Arc::new(ReviewStore::open(Path::new(&config.database_path))?);
    let vault = Arc::new(CredentialVault::new(config.vault.encrypt));
    let automation = Automation::new(
        store,
        vault,
        PlatformSet::uniform(Arc::new(DryRunCrawler) as Arc<dyn Crawler>),
        Arc::new(TemplateReplyGenerator) as Arc<dyn ReplyGenerator>,
        PlatformSet::uniform(Arc::new(DryRunPoster) as Arc<dyn ReplyPoster>),
        config,
    );

    match cli.command {
        Command::Run { scheduled_only } => {
            let scheduler = if scheduled_only {
                automation.run_scheduled_only()
            } else {
                automation.run_bootstrap().await
            };
            tracing::info!("⏰ Jobs running: {}", scheduler.job_names().join(", "));
            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Shutting down; in-flight sessions are abandoned");
            scheduler.shutdown();
        }
        Command::Collect => {
            let summary = automation.collect_all().await?;
            println!(
                "Collected {} new reviews ({} duplicates) from {} stores; {} store errors",
                summary.collected,
                summary.duplicates,
                summary.stores,
                summary.store_errors.len()
            );
            for (store_code, error) in &summary.store_errors {
                println!("  {store_code}: {error}");
            }
        }
        Command::Generate => {
            let summary = automation.generate_for_pending().await?;
            println!(
                "Drafted {} replies, {} failed, {} skipped",
                summary.success, summary.failed, summary.skipped
            );
        }
        Command::Post => {
            let summary = automation.post_due_replies().await?;
            println!(
                "Posted {} of {} due replies ({} failed) across {} platform groups",
                summary.posted, summary.selected, summary.failed, summary.groups
            );
        }
        Command::Status { review_id } => match automation.review_status(&review_id)? {
            Some(status) => println!("{review_id}: {status}"),
            None => println!("{review_id}: not found"),
        },
        Command::Pending { store_code } => {
            println!("{}", automation.pending_count(&store_code)?);
        }
    }

    Ok(())
}

/// Stand-in crawler: accepts every login, returns no reviews.
struct DryRunCrawler;

#[async_trait]
impl Crawler for DryRunCrawler {
    async fn login(&self, creds: &StoreCredentials) -> replyflow_core::Result<bool> {
        tracing::info!("Dry-run login to {} ({})", creds.platform, creds.platform_code);
        Ok(true)
    }

    async fn fetch_unreplied_reviews(
        &self,
        creds: &StoreCredentials,
        _limit: u32,
    ) -> replyflow_core::Result<Vec<RawReview>> {
        tracing::info!(
            "Dry-run fetch for {} ({}): no crawler adapter linked",
            creds.platform,
            creds.platform_code
        );
        Ok(Vec::new())
    }
}

/// Fallback generator: greeting-template reply, scored so it never
/// qualifies for autonomous posting.
struct TemplateReplyGenerator;

#[async_trait]
impl ReplyGenerator for TemplateReplyGenerator {
    async fn generate_reply(
        &self,
        _review: &Review,
        policy: &StorePolicy,
    ) -> replyflow_core::Result<GeneratedReply> {
        let closing = policy.greeting_end.as_deref().unwrap_or("감사합니다");
        Ok(GeneratedReply {
            text: format!(
                "{} 소중한 리뷰 감사합니다! 더 나은 서비스로 보답하겠습니다. {closing}",
                policy.greeting_start
            ),
            quality_score: 0.0,
            urgency_score: 0.0,
            boss_review_needed: false,
            prompt_used: "template-fallback".into(),
            model_version: "template-fallback".into(),
            token_usage: 0,
            latency_ms: 0,
        })
    }
}

/// Stand-in poster: refuses every batch so nothing is falsely marked
/// posted while no platform adapter is linked.
struct DryRunPoster;

#[async_trait]
impl ReplyPoster for DryRunPoster {
    async fn post_batch(
        &self,
        creds: &StoreCredentials,
        items: &[PostItem],
    ) -> replyflow_core::Result<Vec<PostOutcome>> {
        tracing::warn!(
            "Dry-run poster: refusing {} replies for {} ({})",
            items.len(),
            creds.platform,
            creds.platform_code
        );
        Err(ReplyFlowError::Posting("no platform poster adapter linked".into()))
    }
}
