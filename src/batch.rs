use rusqlite::Connection;
use scraper::Html;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{self, Outcome, ProcessedItem, RecordRow};
use crate::error::{PersistenceError, TransportError};
use crate::fetcher::PageSource;
use crate::parser::links::{self, ResolvedLink};
use crate::parser::normalize::absolute_url;
use crate::parser::profile::{self, ProfileRecord};

/// What one batch invocation did. Never persisted.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchResult {
    Processed(BatchReport),
    Done {
        message: String,
        total_processed: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub start_index: usize,
    pub end_index: usize,
    pub processed: usize,
    /// Upstream answered 429 at least once; callers should back off.
    pub rate_limited: bool,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub source_url: String,
    pub status: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl ItemResult {
    fn new(source_url: &str, status: Outcome) -> Self {
        Self {
            source_url: source_url.to_string(),
            status,
            github_url: None,
            email: None,
            source_description: None,
            twitter_url: None,
            error: None,
            error_kind: None,
        }
    }

    fn failed(mut self, kind: &'static str, error: String) -> Self {
        self.status = Outcome::Error;
        self.error_kind = Some(kind);
        self.error = Some(error);
        self
    }

    /// A 404 means there is no such profile, not that something broke.
    fn unreachable(self, e: &TransportError) -> Self {
        let mut result = self.failed(e.kind(), e.to_string());
        if matches!(e, TransportError::NotFound { .. }) {
            result.status = Outcome::NoMatch;
        }
        result
    }
}

impl From<&ItemResult> for ProcessedItem {
    fn from(r: &ItemResult) -> Self {
        ProcessedItem {
            source_identifier: r.source_url.clone(),
            outcome: r.status,
        }
    }
}

// ── Per-page steps ──

/// Fetch a source page and mine it.
pub async fn resolve_source<P: PageSource>(
    source: &P,
    url: &str,
) -> Result<ResolvedLink, TransportError> {
    let html = source.fetch_source(url).await?;
    Ok(links::resolve(&Html::parse_document(&html)))
}

/// Fetch a code-host profile and extract it. `Ok(None)` means the page
/// came back but could not be read as a profile.
pub async fn fetch_profile<P: PageSource>(
    source: &P,
    url: &str,
) -> Result<Option<ProfileRecord>, TransportError> {
    let html = source.fetch_profile(url).await?;
    Ok(profile::extract_page(&html, url))
}

// ── Coordinator ──

/// Process the next slice of unprocessed source profiles and move the
/// cursor past it.
///
/// Item failures are reported in the result and never stop the slice. A
/// store failure aborts the whole batch before the cursor moves.
pub async fn run_batch<P: PageSource>(
    conn: &Connection,
    source: &P,
    batch_size: usize,
) -> Result<BatchResult, PersistenceError> {
    let cursor = db::cursor(conn)?;
    let slice = db::fetch_unprocessed(conn, batch_size)?;
    if slice.is_empty() {
        let total_processed = db::count_processed(conn)?;
        info!(total_processed, "All source profiles processed");
        return Ok(BatchResult::Done {
            message: "all processed".to_string(),
            total_processed,
        });
    }

    let start_index = cursor.position;
    let end_index = start_index + slice.len();
    info!(start_index, end_index, "Processing batch of {} profiles", slice.len());

    let seen = db::batch_is_processed(conn, &slice)?;
    let mut results = Vec::with_capacity(slice.len());
    for url in &slice {
        let result = if seen.contains(url) {
            info!("Skipping already processed {}", url);
            ItemResult::new(url, Outcome::AlreadyProcessed)
        } else {
            process_item(conn, source, url).await?
        };
        results.push(result);
    }

    let items: Vec<ProcessedItem> = results.iter().map(ProcessedItem::from).collect();
    db::advance(conn, end_index, &items)?;

    let rate_limited = results
        .iter()
        .any(|r| r.error_kind == Some("rate_limited"));
    let succeeded = results.iter().filter(|r| r.status == Outcome::Success).count();
    info!(
        start_index,
        end_index,
        succeeded,
        rate_limited,
        "Batch complete"
    );

    Ok(BatchResult::Processed(BatchReport {
        start_index,
        end_index,
        processed: results.len(),
        rate_limited,
        results,
    }))
}

async fn process_item<P: PageSource>(
    conn: &Connection,
    source: &P,
    url: &str,
) -> Result<ItemResult, PersistenceError> {
    let mut result = ItemResult::new(url, Outcome::NoMatch);

    let resolved = match resolve_source(source, &absolute_url(url)).await {
        Ok(r) => r,
        Err(e) => {
            warn!("Source page failed for {}: {}", url, e);
            return Ok(result.unreachable(&e));
        }
    };

    result.source_description = resolved.auxiliary_text.clone();
    result.twitter_url = resolved.secondary_link.clone();
    let mut row = RecordRow {
        source_url: url.to_string(),
        github_url: None,
        source_description: resolved.auxiliary_text,
        twitter_url: resolved.secondary_link,
        source_stats: resolved.stats,
        profile: None,
    };

    // Keep what the source page gave us even if the profile lookup fails.
    if row.twitter_url.is_some() {
        db::save_partial(conn, &row)?;
    }

    let Some(github_url) = resolved.url else {
        info!("No GitHub link on {}", url);
        return Ok(result);
    };
    result.github_url = Some(github_url.clone());
    row.github_url = Some(github_url.clone());

    match fetch_profile(source, &github_url).await {
        Ok(Some(profile)) => {
            result.email = profile.email.clone();
            row.profile = Some(profile);
            db::save_record(conn, &row)?;
            result.status = Outcome::Success;
            info!("Saved {} -> {}", url, github_url);
            Ok(result)
        }
        Ok(None) => {
            db::save_partial(conn, &row)?;
            Ok(result.failed("extraction", format!("could not parse profile page {}", github_url)))
        }
        Err(e) => {
            warn!("Profile fetch failed for {}: {}", github_url, e);
            Ok(result.unreachable(&e))
        }
    }
}
