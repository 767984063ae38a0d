//! Review store gateway — the only component touching persistence.
//!
//! Typed query/update operations over the review, store-policy, and
//! generation-history tables. Status writes go through the state machine
//! check in `ReviewStatus::can_transition_to`; an illegal transition is an
//! error here, never a silent write.
//!
//! Dedup happens at this boundary: `insert_review_if_absent` is a
//! check-then-insert that treats a conflicting concurrent insert as a
//! no-op (`INSERT OR IGNORE`), so re-collecting a review can never create
//! a second row or re-trigger generation.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use replyflow_core::{
    GenerationHistoryEntry, Platform, ReplyFlowError, Result, Review, ReviewStatus, StorePolicy,
};

const DATE_FMT: &str = "%Y-%m-%d";

const REVIEW_COLUMNS: &str = "review_id, store_code, platform, review_name, rating, \
     review_content, ordered_menu, delivery_review, review_images, review_date, status, \
     ai_response, final_response, boss_reply_needed, urgency_score, quality_score, \
     retry_count, error_message, has_reply, is_deleted, created_at, response_at";

const POLICY_COLUMNS: &str = "store_code, store_name, platform, platform_code, platform_id, \
     platform_pw, rating_1_reply, rating_2_reply, rating_3_reply, rating_4_reply, rating_5_reply, \
     greeting_start, greeting_end, role, tone, prohibited_words, max_reply_length, \
     auto_reply_enabled, auto_reply_hours, is_active, last_error";

/// Gateway over the review database.
pub struct ReviewStore {
    conn: Mutex<Connection>,
}

impl ReviewStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reviews (
                review_id TEXT PRIMARY KEY,
                store_code TEXT NOT NULL,
                platform TEXT NOT NULL,
                review_name TEXT DEFAULT '',
                rating INTEGER,
                review_content TEXT DEFAULT '',
                ordered_menu TEXT DEFAULT '',
                delivery_review TEXT DEFAULT '',
                review_images TEXT DEFAULT '[]',
                review_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                ai_response TEXT,
                final_response TEXT,
                boss_reply_needed INTEGER,
                urgency_score REAL,
                quality_score REAL,
                retry_count INTEGER DEFAULT 0,
                error_message TEXT,
                has_reply INTEGER DEFAULT 0,
                is_deleted INTEGER DEFAULT 0,
                created_at TEXT NOT NULL,
                response_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status, review_date);
            CREATE INDEX IF NOT EXISTS idx_reviews_store ON reviews(store_code);

            CREATE TABLE IF NOT EXISTS store_policies (
                store_code TEXT PRIMARY KEY,
                store_name TEXT DEFAULT '',
                platform TEXT NOT NULL,
                platform_code TEXT NOT NULL,
                platform_id TEXT DEFAULT '',
                platform_pw TEXT DEFAULT '',
                rating_1_reply INTEGER DEFAULT 1,
                rating_2_reply INTEGER DEFAULT 1,
                rating_3_reply INTEGER DEFAULT 1,
                rating_4_reply INTEGER DEFAULT 1,
                rating_5_reply INTEGER DEFAULT 1,
                greeting_start TEXT DEFAULT '',
                greeting_end TEXT,
                role TEXT DEFAULT '',
                tone TEXT DEFAULT '',
                prohibited_words TEXT DEFAULT '[]',
                max_reply_length INTEGER DEFAULT 450,
                auto_reply_enabled INTEGER DEFAULT 1,
                auto_reply_hours TEXT,
                is_active INTEGER DEFAULT 1,
                last_error TEXT,
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS generation_history (
                id TEXT PRIMARY KEY,
                review_id TEXT NOT NULL,
                prompt TEXT DEFAULT '',
                model TEXT DEFAULT '',
                quality_score REAL DEFAULT 0,
                urgency_score REAL DEFAULT 0,
                latency_ms INTEGER DEFAULT 0,
                token_usage INTEGER DEFAULT 0,
                chosen INTEGER DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_review ON generation_history(review_id);",
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ReplyFlowError::Store(format!("Lock poisoned: {e}")))
    }

    // ── Reviews ──────────────────────────────

    /// Insert a freshly collected review unless its identity already
    /// exists. Returns true when a new row was created. A concurrent
    /// insert of the same identity is a no-op, not an error.
    pub fn insert_review_if_absent(&self, review: &Review) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO reviews ({REVIEW_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
                ),
                params![
                    review.review_id,
                    review.store_code,
                    review.platform.as_str(),
                    review.review_name,
                    review.rating.map(|r| r as i64),
                    review.content,
                    review.ordered_menu,
                    review.delivery_review,
                    serde_json::to_string(&review.images).unwrap_or_else(|_| "[]".into()),
                    review.review_date.format(DATE_FMT).to_string(),
                    review.status.as_str(),
                    review.ai_response,
                    review.final_response,
                    review.boss_reply_needed.map(i64::from),
                    review.urgency_score.map(|v| v as f64),
                    review.quality_score.map(|v| v as f64),
                    review.retry_count as i64,
                    review.error_message,
                    review.has_reply as i64,
                    review.is_deleted as i64,
                    review.created_at.to_rfc3339(),
                    review.response_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    /// Fetch one review by id.
    pub fn get_review(&self, review_id: &str) -> Result<Option<Review>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE review_id=?1"),
            params![review_id],
            row_to_review,
        )
        .optional()
        .map_err(store_err)
    }

    /// Reviews with no draft yet — the generation coordinator's work list.
    pub fn reviews_without_reply(&self, limit: u32) -> Result<Vec<Review>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews \
                 WHERE status='pending' AND ai_response IS NULL \
                   AND has_reply=0 AND is_deleted=0 \
                 ORDER BY review_date ASC LIMIT ?1"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_review)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// The normal posting candidate set: draft present, no boss flag,
    /// review aged into `[today-max_age, today-min_age]`, oldest first.
    pub fn due_normal(
        &self,
        today: NaiveDate,
        min_age_days: i64,
        max_age_days: i64,
        cap: u32,
    ) -> Result<Vec<Review>> {
        let newest = (today - chrono::Duration::days(min_age_days)).format(DATE_FMT).to_string();
        let oldest = (today - chrono::Duration::days(max_age_days)).format(DATE_FMT).to_string();
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews \
                 WHERE status IN ('ready_to_post', 'generated', 'failed') \
                   AND ai_response IS NOT NULL AND ai_response != '' \
                   AND (boss_reply_needed IS NULL OR boss_reply_needed=0) \
                   AND review_date >= ?1 AND review_date <= ?2 \
                   AND is_deleted=0 \
                 ORDER BY review_date ASC LIMIT ?3"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![oldest, newest, cap as i64], row_to_review)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// The boss-review candidate set: drafts flagged for owner attention,
    /// with a longer age floor so the owner gets an extra day to react.
    pub fn due_boss(
        &self,
        today: NaiveDate,
        min_age_days: i64,
        max_age_days: i64,
        cap: u32,
    ) -> Result<Vec<Review>> {
        let newest = (today - chrono::Duration::days(min_age_days)).format(DATE_FMT).to_string();
        let oldest = (today - chrono::Duration::days(max_age_days)).format(DATE_FMT).to_string();
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews \
                 WHERE status IN ('ready_to_post', 'generated', 'failed') \
                   AND ai_response IS NOT NULL AND ai_response != '' \
                   AND boss_reply_needed=1 \
                   AND review_date >= ?1 AND review_date <= ?2 \
                   AND is_deleted=0 \
                 ORDER BY review_date ASC LIMIT ?3"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![oldest, newest, cap as i64], row_to_review)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Transition a review to `to`, enforcing the state machine.
    pub fn set_status(&self, review_id: &str, to: ReviewStatus) -> Result<()> {
        let conn = self.lock()?;
        let from = current_status(&conn, review_id)?;
        if !from.can_transition_to(to) {
            return Err(ReplyFlowError::IllegalTransition { from, to });
        }
        conn.execute(
            "UPDATE reviews SET status=?1 WHERE review_id=?2",
            params![to.as_str(), review_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Persist a generation result: draft, scores, boss flag, and the
    /// eligibility-determined status. Clears any stale error.
    pub fn record_generation(
        &self,
        review_id: &str,
        draft: &str,
        quality_score: f32,
        urgency_score: f32,
        boss_review_needed: bool,
        to: ReviewStatus,
    ) -> Result<()> {
        let conn = self.lock()?;
        let from = current_status(&conn, review_id)?;
        if !from.can_transition_to(to) {
            return Err(ReplyFlowError::IllegalTransition { from, to });
        }
        conn.execute(
            "UPDATE reviews SET ai_response=?1, quality_score=?2, urgency_score=?3, \
             boss_reply_needed=?4, status=?5, error_message=NULL WHERE review_id=?6",
            params![
                draft,
                quality_score as f64,
                urgency_score as f64,
                boss_review_needed as i64,
                to.as_str(),
                review_id
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Record a generation failure without touching the status: the review
    /// stays `pending` and is retried next cadence.
    pub fn record_generation_error(&self, review_id: &str, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE reviews SET error_message=?1 WHERE review_id=?2",
            params![error, review_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Mark a review posted: terminal status, final text, response time.
    pub fn mark_posted(&self, review_id: &str, posted_text: &str) -> Result<()> {
        let conn = self.lock()?;
        let from = current_status(&conn, review_id)?;
        if !from.can_transition_to(ReviewStatus::Posted) {
            return Err(ReplyFlowError::IllegalTransition {
                from,
                to: ReviewStatus::Posted,
            });
        }
        conn.execute(
            "UPDATE reviews SET status='posted', final_response=?1, response_at=?2, \
             error_message=NULL WHERE review_id=?3",
            params![posted_text, Utc::now().to_rfc3339(), review_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Mark a posting failure: error recorded on the row, retry counter
    /// bumped. The review re-enters selection on the next pass.
    pub fn mark_failed(&self, review_id: &str, error: &str) -> Result<()> {
        let conn = self.lock()?;
        let from = current_status(&conn, review_id)?;
        if !from.can_transition_to(ReviewStatus::Failed) {
            return Err(ReplyFlowError::IllegalTransition {
                from,
                to: ReviewStatus::Failed,
            });
        }
        conn.execute(
            "UPDATE reviews SET status='failed', error_message=?1, retry_count=retry_count+1 \
             WHERE review_id=?2",
            params![error, review_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Read-only status lookup for the HTTP layer.
    pub fn review_status(&self, review_id: &str) -> Result<Option<ReviewStatus>> {
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM reviews WHERE review_id=?1",
                params![review_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        Ok(status.and_then(|s| s.parse().ok()))
    }

    /// Count of reviews still awaiting a draft for one store.
    pub fn pending_count(&self, store_code: &str) -> Result<u32> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reviews WHERE store_code=?1 AND status='pending' AND is_deleted=0",
                params![store_code],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count as u32)
    }

    // ── Store policies ──────────────────────────────

    /// Create or replace a store policy (driven by the CRUD layer; tests
    /// and the CLI importer use it directly).
    pub fn upsert_policy(&self, policy: &StorePolicy) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO store_policies ({POLICY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                policy.store_code,
                policy.store_name,
                policy.platform.as_str(),
                policy.platform_code,
                policy.platform_id,
                policy.platform_pw,
                policy.rating_replies[0] as i64,
                policy.rating_replies[1] as i64,
                policy.rating_replies[2] as i64,
                policy.rating_replies[3] as i64,
                policy.rating_replies[4] as i64,
                policy.greeting_start,
                policy.greeting_end,
                policy.role,
                policy.tone,
                serde_json::to_string(&policy.prohibited_words).unwrap_or_else(|_| "[]".into()),
                policy.max_reply_length as i64,
                policy.auto_reply_enabled as i64,
                policy.auto_reply_hours,
                policy.is_active as i64,
                policy.last_error,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// All stores the collection pass should visit.
    pub fn active_policies(&self) -> Result<Vec<StorePolicy>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {POLICY_COLUMNS} FROM store_policies \
                 WHERE is_active=1 AND auto_reply_enabled=1 ORDER BY store_code"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], row_to_policy)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Policy for one store, if registered.
    pub fn policy_for(&self, store_code: &str) -> Result<Option<StorePolicy>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {POLICY_COLUMNS} FROM store_policies WHERE store_code=?1"),
            params![store_code],
            row_to_policy,
        )
        .optional()
        .map_err(store_err)
    }

    /// Attach a crawl/login failure to the store record.
    pub fn record_store_error(&self, store_code: &str, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE store_policies SET last_error=?1, updated_at=datetime('now') WHERE store_code=?2",
            params![error, store_code],
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ── Generation history ──────────────────────────────

    /// Append one generation attempt. History rows are never mutated.
    pub fn append_history(&self, entry: &GenerationHistoryEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO generation_history \
             (id, review_id, prompt, model, quality_score, urgency_score, latency_ms, token_usage, chosen, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id,
                entry.review_id,
                entry.prompt,
                entry.model,
                entry.quality_score as f64,
                entry.urgency_score as f64,
                entry.latency_ms as i64,
                entry.token_usage as i64,
                entry.chosen as i64,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// All generation attempts for one review, oldest first.
    pub fn history_for(&self, review_id: &str) -> Result<Vec<GenerationHistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, review_id, prompt, model, quality_score, urgency_score, latency_ms, \
                 token_usage, chosen, created_at FROM generation_history \
                 WHERE review_id=?1 ORDER BY created_at ASC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![review_id], |row| {
                Ok(GenerationHistoryEntry {
                    id: row.get(0)?,
                    review_id: row.get(1)?,
                    prompt: row.get(2)?,
                    model: row.get(3)?,
                    quality_score: row.get::<_, f64>(4)? as f32,
                    urgency_score: row.get::<_, f64>(5)? as f32,
                    latency_ms: row.get::<_, i64>(6)? as u64,
                    token_usage: row.get::<_, i64>(7)? as u32,
                    chosen: row.get::<_, i64>(8)? != 0,
                    created_at: parse_timestamp(row.get::<_, String>(9)?),
                })
            })
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn store_err(e: rusqlite::Error) -> ReplyFlowError {
    ReplyFlowError::Store(e.to_string())
}

fn current_status(conn: &Connection, review_id: &str) -> Result<ReviewStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM reviews WHERE review_id=?1",
            params![review_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)?;
    match status {
        Some(s) => s.parse(),
        None => Err(ReplyFlowError::ReviewNotFound(review_id.into())),
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_review(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
    let platform: String = row.get(2)?;
    let date: String = row.get(9)?;
    let status: String = row.get(10)?;
    let images: String = row.get(8)?;
    Ok(Review {
        review_id: row.get(0)?,
        store_code: row.get(1)?,
        platform: platform.parse().unwrap_or(Platform::Baemin),
        review_name: row.get(3)?,
        rating: row.get::<_, Option<i64>>(4)?.map(|r| r as u8),
        content: row.get(5)?,
        ordered_menu: row.get(6)?,
        delivery_review: row.get(7)?,
        images: serde_json::from_str(&images).unwrap_or_default(),
        review_date: NaiveDate::parse_from_str(&date, DATE_FMT)
            .unwrap_or_else(|_| Utc::now().date_naive()),
        status: status.parse().unwrap_or(ReviewStatus::Pending),
        ai_response: row.get(11)?,
        final_response: row.get(12)?,
        boss_reply_needed: row.get::<_, Option<i64>>(13)?.map(|v| v != 0),
        urgency_score: row.get::<_, Option<f64>>(14)?.map(|v| v as f32),
        quality_score: row.get::<_, Option<f64>>(15)?.map(|v| v as f32),
        retry_count: row.get::<_, i64>(16)? as u32,
        error_message: row.get(17)?,
        has_reply: row.get::<_, i64>(18)? != 0,
        is_deleted: row.get::<_, i64>(19)? != 0,
        created_at: parse_timestamp(row.get::<_, String>(20)?),
        response_at: row
            .get::<_, Option<String>>(21)?
            .map(|t| parse_timestamp(t)),
    })
}

fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<StorePolicy> {
    let platform: String = row.get(2)?;
    let prohibited: String = row.get(15)?;
    Ok(StorePolicy {
        store_code: row.get(0)?,
        store_name: row.get(1)?,
        platform: platform.parse().unwrap_or(Platform::Baemin),
        platform_code: row.get(3)?,
        platform_id: row.get(4)?,
        platform_pw: row.get(5)?,
        rating_replies: [
            row.get::<_, i64>(6)? != 0,
            row.get::<_, i64>(7)? != 0,
            row.get::<_, i64>(8)? != 0,
            row.get::<_, i64>(9)? != 0,
            row.get::<_, i64>(10)? != 0,
        ],
        greeting_start: row.get(11)?,
        greeting_end: row.get(12)?,
        role: row.get(13)?,
        tone: row.get(14)?,
        prohibited_words: serde_json::from_str(&prohibited).unwrap_or_default(),
        max_reply_length: row.get::<_, i64>(16)? as u32,
        auto_reply_enabled: row.get::<_, i64>(17)? != 0,
        auto_reply_hours: row.get(18)?,
        is_active: row.get::<_, i64>(19)? != 0,
        last_error: row.get(20)?,
    })
}
