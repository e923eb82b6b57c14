use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::parser::profile::ProfileRecord;
use crate::parser::source::SourceStats;

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS source_profiles (
            position    INTEGER PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            description TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Singleton cursor row; the CHECK makes a second row impossible.
        CREATE TABLE IF NOT EXISTS progress (
            id         INTEGER PRIMARY KEY CHECK (id = 1),
            position   INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_items (
            id                INTEGER PRIMARY KEY,
            source_identifier TEXT UNIQUE NOT NULL,
            outcome           TEXT NOT NULL
                CHECK (outcome IN ('success','no_match','already_processed','error')),
            batch_position    INTEGER NOT NULL,
            processed_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_processed_outcome ON processed_items(outcome);

        CREATE TABLE IF NOT EXISTS records (
            id                  INTEGER PRIMARY KEY,
            source_identifier   TEXT UNIQUE NOT NULL,
            github_url          TEXT,
            source_description  TEXT,
            twitter_url         TEXT,
            source_stats        TEXT,
            email               TEXT,
            name                TEXT,
            username            TEXT,
            location            TEXT,
            company             TEXT,
            website             TEXT,
            bio                 TEXT,
            followers           TEXT,
            following           TEXT,
            contributions       TEXT,
            pinned_repositories TEXT,
            raw_json            TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE VIEW IF NOT EXISTS unprocessed_profiles AS
            SELECT s.position, s.url
            FROM source_profiles s
            WHERE NOT EXISTS (
                SELECT 1 FROM processed_items p WHERE p.source_identifier = s.url
            );
        ",
    )?;
    Ok(())
}

// ── Input ──

pub struct SourceRow {
    pub url: String,
    pub description: Option<String>,
}

pub fn insert_sources(conn: &Connection, rows: &[SourceRow]) -> StoreResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO source_profiles (url, description) VALUES (?1, ?2)")?;
        for r in rows {
            count += stmt.execute(params![r.url, r.description])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Front of the unprocessed view, in canonical order.
pub fn fetch_unprocessed(conn: &Connection, limit: usize) -> StoreResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT url FROM unprocessed_profiles ORDER BY position LIMIT ?1")?;
    let rows = stmt
        .query_map([limit], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(rows)
}

// ── Progress ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NoMatch,
    AlreadyProcessed,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NoMatch => "no_match",
            Outcome::AlreadyProcessed => "already_processed",
            Outcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressCursor {
    pub position: usize,
    pub updated_at: DateTime<Utc>,
}

/// One identifier accounted for by a batch.
#[derive(Debug, Clone)]
pub struct ProcessedItem {
    pub source_identifier: String,
    pub outcome: Outcome,
}

/// Read the cursor, creating it at 0 on first use. Concurrent first calls
/// race on the singleton key; the loser's insert is ignored.
pub fn cursor(conn: &Connection) -> StoreResult<ProgressCursor> {
    conn.execute(
        "INSERT OR IGNORE INTO progress (id, position, updated_at) VALUES (1, 0, ?1)",
        params![Utc::now()],
    )?;
    let cursor = conn.query_row(
        "SELECT position, updated_at FROM progress WHERE id = 1",
        [],
        |row| {
            Ok(ProgressCursor {
                position: row.get(0)?,
                updated_at: row.get(1)?,
            })
        },
    )?;
    Ok(cursor)
}

/// Move the cursor forward and upsert one row per identifier, atomically.
///
/// Repeating a call leaves the store unchanged: the cursor only moves (and
/// is only re-stamped) when `new_position` is ahead of it, and an upsert keeps
/// the first `processed_at`. An `already_processed` outcome never overwrites
/// the outcome that was recorded when the item was really handled.
pub fn advance(conn: &Connection, new_position: usize, items: &[ProcessedItem]) -> StoreResult<()> {
    let now = Utc::now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO progress (id, position, updated_at) VALUES (1, 0, ?1)",
        params![now],
    )?;
    tx.execute(
        "UPDATE progress SET position = ?1, updated_at = ?2 WHERE id = 1 AND position < ?1",
        params![new_position, now],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO processed_items (source_identifier, outcome, batch_position, processed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_identifier) DO UPDATE SET
                outcome = CASE WHEN excluded.outcome = 'already_processed'
                               THEN processed_items.outcome ELSE excluded.outcome END,
                batch_position = CASE WHEN excluded.outcome = 'already_processed'
                               THEN processed_items.batch_position ELSE excluded.batch_position END",
        )?;
        for item in items {
            stmt.execute(params![
                item.source_identifier,
                item.outcome.as_str(),
                new_position,
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn is_processed(conn: &Connection, id: &str) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM processed_items WHERE source_identifier = ?1",
            [id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Membership check for a whole slice in one query.
pub fn batch_is_processed(conn: &Connection, ids: &[String]) -> StoreResult<HashSet<String>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = (1..=ids.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT source_identifier FROM processed_items WHERE source_identifier IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let found = stmt
        .query_map(params_from_iter(ids.iter()), |row| row.get(0))?
        .collect::<std::result::Result<HashSet<String>, _>>()?;
    Ok(found)
}

pub fn count_processed(conn: &Connection) -> StoreResult<usize> {
    Ok(conn.query_row("SELECT COUNT(*) FROM processed_items", [], |r| r.get(0))?)
}

// ── Records ──

/// Everything stored for one source identifier.
#[derive(Debug, Clone, Serialize)]
pub struct RecordRow {
    pub source_url: String,
    pub github_url: Option<String>,
    pub source_description: Option<String>,
    pub twitter_url: Option<String>,
    pub source_stats: SourceStats,
    pub profile: Option<ProfileRecord>,
}

/// Persist what the source page alone gave us, plus the profile link if one
/// was found. Existing profile fields (and a known link) are left untouched
/// so a later failed lookup can't erase an earlier success.
pub fn save_partial(conn: &Connection, row: &RecordRow) -> StoreResult<()> {
    let stats = serde_json::to_string(&row.source_stats)?;
    let raw = serde_json::to_string(row)?;
    conn.execute(
        "INSERT INTO records
            (source_identifier, github_url, source_description, twitter_url, source_stats,
             raw_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(source_identifier) DO UPDATE SET
            github_url         = COALESCE(excluded.github_url, records.github_url),
            source_description = excluded.source_description,
            twitter_url        = excluded.twitter_url,
            source_stats       = excluded.source_stats,
            updated_at         = excluded.updated_at",
        params![
            row.source_url,
            row.github_url,
            row.source_description,
            row.twitter_url,
            stats,
            raw,
            Utc::now(),
        ],
    )?;
    Ok(())
}

/// Insert or fully replace the merged record for `row.source_url`.
pub fn save_record(conn: &Connection, row: &RecordRow) -> StoreResult<()> {
    let stats = serde_json::to_string(&row.source_stats)?;
    let raw = serde_json::to_string(row)?;
    let p = row.profile.as_ref();
    let pinned = p
        .map(|p| serde_json::to_string(&p.pinned_repositories))
        .transpose()?;

    conn.execute(
        "INSERT INTO records
            (source_identifier, github_url, source_description, twitter_url, source_stats,
             email, name, username, location, company, website, bio, followers, following,
             contributions, pinned_repositories, raw_json, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
         ON CONFLICT(source_identifier) DO UPDATE SET
            github_url          = excluded.github_url,
            source_description  = excluded.source_description,
            twitter_url         = excluded.twitter_url,
            source_stats        = excluded.source_stats,
            email               = excluded.email,
            name                = excluded.name,
            username            = excluded.username,
            location            = excluded.location,
            company             = excluded.company,
            website             = excluded.website,
            bio                 = excluded.bio,
            followers           = excluded.followers,
            following           = excluded.following,
            contributions       = excluded.contributions,
            pinned_repositories = excluded.pinned_repositories,
            raw_json            = excluded.raw_json,
            updated_at          = excluded.updated_at",
        params![
            row.source_url,
            row.github_url,
            row.source_description,
            row.twitter_url,
            stats,
            p.and_then(|p| p.email.clone()),
            p.and_then(|p| p.name.clone()),
            p.map(|p| p.username.clone()),
            p.and_then(|p| p.location.clone()),
            p.and_then(|p| p.company.clone()),
            p.and_then(|p| p.website.clone()),
            p.and_then(|p| p.bio.clone()),
            p.map(|p| p.followers.clone()),
            p.map(|p| p.following.clone()),
            p.and_then(|p| p.contributions.clone()),
            pinned,
            raw,
            Utc::now(),
        ],
    )?;
    Ok(())
}

// ── Export ──

/// One input row with whatever the pipeline learned about it. `outcome` is
/// `None` while the input is still queued.
#[derive(Debug, Clone, Default)]
pub struct ResultRow {
    pub source_url: String,
    pub input_description: Option<String>,
    pub outcome: Option<String>,
    pub github_url: Option<String>,
    pub source_description: Option<String>,
    pub twitter_url: Option<String>,
    pub source_stats: SourceStats,
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    pub followers: Option<String>,
    pub following: Option<String>,
    pub contributions: Option<String>,
    pub pinned_repositories: Option<String>,
}

/// Walk every input in queue order, joined with its record and outcome.
/// Rows are handed to `f` one at a time; returns how many were visited.
pub fn each_result(conn: &Connection, mut f: impl FnMut(ResultRow) -> Result<()>) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT s.url, s.description, p.outcome, r.github_url, r.source_description,
                r.twitter_url, r.source_stats, r.email, r.name, r.username, r.location,
                r.company, r.website, r.bio, r.followers, r.following, r.contributions,
                r.pinned_repositories
         FROM source_profiles s
         LEFT JOIN records r ON r.source_identifier = s.url
         LEFT JOIN processed_items p ON p.source_identifier = s.url
         ORDER BY s.position",
    )?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let source_url: String = row.get(0)?;
        let stats: Option<String> = row.get(6)?;
        let source_stats = match stats {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("Bad source_stats for {}", source_url))?,
            None => SourceStats::default(),
        };
        f(ResultRow {
            source_url,
            input_description: row.get(1)?,
            outcome: row.get(2)?,
            github_url: row.get(3)?,
            source_description: row.get(4)?,
            twitter_url: row.get(5)?,
            source_stats,
            email: row.get(7)?,
            name: row.get(8)?,
            username: row.get(9)?,
            location: row.get(10)?,
            company: row.get(11)?,
            website: row.get(12)?,
            bio: row.get(13)?,
            followers: row.get(14)?,
            following: row.get(15)?,
            contributions: row.get(16)?,
            pinned_repositories: row.get(17)?,
        })?;
        count += 1;
    }
    Ok(count)
}

// ── Stats ──

#[derive(Debug, Serialize)]
pub struct Stats {
    pub total: usize,
    pub processed: usize,
    pub unprocessed: usize,
    pub success: usize,
    pub no_match: usize,
    pub errors: usize,
    pub cursor: usize,
    pub records: usize,
    pub with_github: usize,
}

pub fn get_stats(conn: &Connection) -> StoreResult<Stats> {
    let count = |sql: &str| -> StoreResult<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let by_outcome = |outcome: Outcome| -> StoreResult<usize> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM processed_items WHERE outcome = ?1",
            [outcome.as_str()],
            |r| r.get(0),
        )?)
    };

    let total = count("SELECT COUNT(*) FROM source_profiles")?;
    let unprocessed = count("SELECT COUNT(*) FROM unprocessed_profiles")?;
    Ok(Stats {
        total,
        processed: count_processed(conn)?,
        unprocessed,
        success: by_outcome(Outcome::Success)?,
        no_match: by_outcome(Outcome::NoMatch)?,
        errors: by_outcome(Outcome::Error)?,
        cursor: cursor(conn)?.position,
        records: count("SELECT COUNT(*) FROM records")?,
        with_github: count("SELECT COUNT(*) FROM records WHERE github_url IS NOT NULL")?,
    })
}

#[cfg(test)]
pub fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}
