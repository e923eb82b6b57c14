use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::SourceRow;
use crate::parser::normalize::absolute_url;

#[derive(Debug, Deserialize)]
struct InputRecord {
    #[serde(
        rename = "Stack Overflow Link",
        alias = "StackOverflow Link",
        alias = "url",
        alias = "URL"
    )]
    url: String,
    #[serde(default, alias = "Description")]
    description: Option<String>,
}

/// Load Q&A profile URLs from a CSV file (by extension) or a newline list.
pub fn load_sources(path: &Path) -> Result<Vec<SourceRow>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let rows = if is_csv {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        read_csv(file)?
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        read_lines(&text)
    };

    info!("Loaded {} source URLs from {}", rows.len(), path.display());
    Ok(rows)
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<SourceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<InputRecord>().enumerate() {
        match result {
            Ok(rec) if !rec.url.is_empty() => rows.push(SourceRow {
                url: absolute_url(&rec.url),
                description: rec.description.filter(|d| !d.is_empty()),
            }),
            Ok(_) => {}
            // A bad header fails every row the same way; surface it once.
            Err(e) if i == 0 && is_header_error(&e) => {
                return Err(e).context("CSV needs a 'Stack Overflow Link' or 'url' column");
            }
            Err(e) => warn!("Skipping CSV row {}: {}", i + 2, e),
        }
    }
    Ok(rows)
}

fn is_header_error(e: &csv::Error) -> bool {
    matches!(e.kind(), csv::ErrorKind::Deserialize { .. })
        && e.to_string().contains("missing field")
}

/// One URL per line; blank lines and `#` comments are ignored.
pub fn read_lines(text: &str) -> Vec<SourceRow> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| SourceRow {
            url: absolute_url(l),
            description: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_with_spaced_header() {
        let data = "\
Name,Stack Overflow Link,Description
Jon, stackoverflow.com/users/22656/jon-skeet ,C# person
Empty,,
Ann,https://stackoverflow.com/users/1/ann,
";
        let rows = read_csv(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].url, "https://stackoverflow.com/users/22656/jon-skeet");
        assert_eq!(rows[0].description.as_deref(), Some("C# person"));
        assert_eq!(rows[1].description, None);
    }

    #[test]
    fn csv_with_url_alias() {
        let rows = read_csv("url\n//stackoverflow.com/users/2/b\n".as_bytes()).unwrap();
        assert_eq!(rows[0].url, "https://stackoverflow.com/users/2/b");
    }

    #[test]
    fn csv_without_link_column_is_rejected() {
        assert!(read_csv("name,email\na,b\n".as_bytes()).is_err());
    }

    #[test]
    fn plain_list() {
        let rows = read_lines("# seed list\nstackoverflow.com/users/1/a\n\n  https://stackoverflow.com/users/2/b  \n");
        let urls: Vec<_> = rows.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://stackoverflow.com/users/1/a", "https://stackoverflow.com/users/2/b"]
        );
    }
}
