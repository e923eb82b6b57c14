use std::io::Write;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::db::{self, ResultRow};

const MISSING: &str = "Not found";
const FAILED: &str = "Error";

pub const HEADERS: [&str; 23] = [
    "Stack Overflow Link",
    "Stack Overflow Description",
    "Status",
    "GitHub URL",
    "Email",
    "Bio",
    "Name",
    "Username",
    "Location",
    "Company",
    "Website",
    "Followers",
    "Following",
    "Contributions",
    "Pinned Repositories",
    "Stack Overflow Reputation",
    "Stack Overflow Reached",
    "Stack Overflow Answers",
    "Stack Overflow Questions",
    "Stack Overflow Bio",
    "Stack Overflow Twitter",
    "Stack Overflow GitHub",
    "Processed",
];

/// One line per cell: line breaks become spaces, nulls read "Not found".
fn sanitize(field: Option<&str>) -> String {
    match field {
        Some(v) => v.replace(['\n', '\r'], " ").trim().to_string(),
        None => MISSING.to_string(),
    }
}

fn to_record(r: &ResultRow) -> Vec<String> {
    // An errored item with no profile gets "Error" in every profile column.
    let failed = r.outcome.as_deref() == Some("error") && r.username.is_none();
    let profile = |v: &Option<String>| {
        if failed {
            FAILED.to_string()
        } else {
            sanitize(v.as_deref())
        }
    };
    let github = if failed && r.github_url.is_none() {
        FAILED.to_string()
    } else {
        sanitize(r.github_url.as_deref())
    };

    vec![
        sanitize(Some(&r.source_url)),
        sanitize(r.input_description.as_deref()),
        r.outcome.clone().unwrap_or_else(|| "pending".to_string()),
        github.clone(),
        profile(&r.email),
        profile(&r.bio),
        profile(&r.name),
        profile(&r.username),
        profile(&r.location),
        profile(&r.company),
        profile(&r.website),
        profile(&r.followers),
        profile(&r.following),
        profile(&r.contributions),
        profile(&r.pinned_repositories),
        sanitize(r.source_stats.reputation.as_deref()),
        sanitize(r.source_stats.reached.as_deref()),
        sanitize(r.source_stats.answers.as_deref()),
        sanitize(r.source_stats.questions.as_deref()),
        sanitize(r.source_description.as_deref()),
        sanitize(r.twitter_url.as_deref()),
        github,
        if r.outcome.is_some() { "yes" } else { "no" }.to_string(),
    ]
}

/// Write the results sheet: a header, then one row per queued input, in
/// queue order. Returns the number of data rows written.
pub fn write_results<W: Write>(conn: &Connection, out: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new().from_writer(out);
    writer.write_record(HEADERS).context("Failed to write CSV header")?;
    let count = db::each_result(conn, |row| {
        writer
            .write_record(to_record(&row))
            .with_context(|| format!("Failed to write row for {}", row.source_url))
    })?;
    writer.flush().context("Failed to flush CSV output")?;
    Ok(count)
}
