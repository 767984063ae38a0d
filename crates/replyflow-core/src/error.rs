//! Error taxonomy for the automation pipeline.
//!
//! No variant is fatal to the process: coordinators record the failure on
//! the owning review or store row and let the next scheduled pass retry.

use thiserror::Error;

use crate::types::ReviewStatus;

/// ReplyFlow result type.
pub type Result<T> = std::result::Result<T, ReplyFlowError>;

#[derive(Debug, Error)]
pub enum ReplyFlowError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("collection error: {0}")]
    Collection(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("posting error: {0}")]
    Posting(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: ReviewStatus,
        to: ReviewStatus,
    },

    #[error("review not found: {0}")]
    ReviewNotFound(String),

    #[error("store policy not found: {0}")]
    PolicyNotFound(String),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
