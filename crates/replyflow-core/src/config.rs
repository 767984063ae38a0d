//! ReplyFlow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyFlowConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

fn default_database_path() -> String {
    ReplyFlowConfig::home_dir()
        .join("replyflow.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for ReplyFlowConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            collection: CollectionConfig::default(),
            generation: GenerationConfig::default(),
            posting: PostingConfig::default(),
            scheduler: SchedulerConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

impl ReplyFlowConfig {
    /// Load config from the default path (~/.replyflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::ReplyFlowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::ReplyFlowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ReplyFlowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".replyflow")
    }
}

/// Collection Coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Per-store crawl timeout. One slow store never stalls the batch.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
    /// Max reviews fetched per store per pass.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
}

fn default_store_timeout() -> u64 { 120 }
fn default_fetch_limit() -> u32 { 50 }

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: default_store_timeout(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

/// Generation Coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Ceiling on in-flight AI calls. The AI service rate-limits, and the
    /// browser automation downstream is the scarcer resource anyway.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_max_concurrent() -> usize { 5 }
fn default_call_timeout() -> u64 { 60 }

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Posting Batch Processor settings.
///
/// The age floor gives operators a window to intervene on drafts before
/// autonomous posting; the 30-day ceiling avoids replying to stale reviews
/// the platforms may reject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    #[serde(default = "default_normal_cap")]
    pub normal_cap: u32,
    #[serde(default = "default_boss_cap")]
    pub boss_cap: u32,
    /// Minimum review age in days for the normal set.
    #[serde(default = "default_min_age_days")]
    pub min_age_days: i64,
    /// Minimum review age in days for boss-review-flagged drafts.
    #[serde(default = "default_boss_min_age_days")]
    pub boss_min_age_days: i64,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    /// Browser-automation timeout per platform group.
    #[serde(default = "default_browser_timeout")]
    pub browser_timeout_secs: u64,
}

fn default_normal_cap() -> u32 { 15 }
fn default_boss_cap() -> u32 { 5 }
fn default_min_age_days() -> i64 { 1 }
fn default_boss_min_age_days() -> i64 { 2 }
fn default_max_age_days() -> i64 { 30 }
fn default_browser_timeout() -> u64 { 180 }

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            normal_cap: default_normal_cap(),
            boss_cap: default_boss_cap(),
            min_age_days: default_min_age_days(),
            boss_min_age_days: default_boss_min_age_days(),
            max_age_days: default_max_age_days(),
            browser_timeout_secs: default_browser_timeout(),
        }
    }
}

/// Cadences for one operating posture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cadence {
    pub collect_secs: u64,
    pub generate_secs: u64,
    pub post_secs: u64,
}

/// Scheduler settings: two postures over the same three jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between the immediate bootstrap stages.
    #[serde(default = "default_settle")]
    pub bootstrap_settle_secs: u64,
    /// Posture right after bootstrap, while a backlog is being drained.
    #[serde(default = "default_aggressive")]
    pub aggressive: Cadence,
    /// Steady-state posture for unattended operation.
    #[serde(default = "default_steady")]
    pub steady: Cadence,
}

fn default_settle() -> u64 { 10 }

fn default_aggressive() -> Cadence {
    Cadence {
        collect_secs: 180,
        generate_secs: 30,
        post_secs: 120,
    }
}

fn default_steady() -> Cadence {
    Cadence {
        collect_secs: 4 * 3600,
        generate_secs: 30 * 60,
        post_secs: 4 * 3600,
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bootstrap_settle_secs: default_settle(),
            aggressive: default_aggressive(),
            steady: default_steady(),
        }
    }
}

/// Credential vault settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "bool_true")]
    pub encrypt: bool,
}

fn bool_true() -> bool { true }

impl Default for VaultConfig {
    fn default() -> Self {
        Self { encrypt: bool_true() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ReplyFlowConfig::default();
        assert_eq!(cfg.generation.max_concurrent, 5);
        assert_eq!(cfg.posting.normal_cap, 15);
        assert_eq!(cfg.posting.boss_cap, 5);
        assert_eq!(cfg.posting.min_age_days, 1);
        assert_eq!(cfg.posting.boss_min_age_days, 2);
        assert_eq!(cfg.posting.max_age_days, 30);
        assert_eq!(cfg.scheduler.aggressive.generate_secs, 30);
        assert_eq!(cfg.scheduler.steady.collect_secs, 4 * 3600);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: ReplyFlowConfig = toml::from_str(
            r#"
            database_path = "/tmp/test.db"

            [generation]
            max_concurrent = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database_path, "/tmp/test.db");
        assert_eq!(cfg.generation.max_concurrent, 2);
        assert_eq!(cfg.generation.call_timeout_secs, 60);
        assert_eq!(cfg.posting.normal_cap, 15);
        assert!(cfg.vault.encrypt);
    }
}
