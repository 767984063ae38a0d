//! # ReplyFlow Core
//!
//! Shared foundation for the review reply automation pipeline:
//! domain types, the review status state machine, configuration,
//! the error taxonomy, and the collaborator traits implemented by
//! the platform crawler/poster adapters and the AI reply service.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ReplyFlowConfig;
pub use error::{ReplyFlowError, Result};
pub use traits::{Crawler, GeneratedReply, PlatformSet, PostItem, PostOutcome, ReplyGenerator, ReplyPoster, StoreCredentials};
pub use types::{
    GenerationHistoryEntry, Platform, RawReview, Review, ReviewStatus, StorePolicy,
    auto_post_eligible, clean_author_name, resolve_review_date, review_identity,
};
