use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use super::normalize::last_segment;
use super::{first_text, text_of};
use crate::error::ExtractionError;

/// Code hosts pin at most six items on a profile.
pub const MAX_PINNED: usize = 6;

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static NAME: LazyLock<Selector> = LazyLock::new(|| sel(r#"span[itemprop="name"]"#));
static HANDLE: LazyLock<Selector> = LazyLock::new(|| sel(r#"[itemprop="additionalName"]"#));
static EMAIL: LazyLock<Selector> = LazyLock::new(|| sel(r#"li[itemprop="email"]"#));
static LOCATION: LazyLock<Selector> = LazyLock::new(|| sel(r#"li[itemprop="homeLocation"]"#));
static COMPANY: LazyLock<Selector> = LazyLock::new(|| sel(r#"li[itemprop="worksFor"]"#));
static WEBSITE: LazyLock<Selector> = LazyLock::new(|| sel(r#"li[itemprop="url"] a[href]"#));
static BIO: LazyLock<Selector> = LazyLock::new(|| sel("div.user-profile-bio"));
static CONTRIBUTIONS: LazyLock<Selector> = LazyLock::new(|| sel("h2.f4.text-normal.mb-2"));
static PINNED: LazyLock<Selector> = LazyLock::new(|| {
    sel(".js-pinned-items-reorder-container .pinned-item-list-item-content")
});
static PINNED_NAME: LazyLock<Selector> = LazyLock::new(|| sel("span.repo"));
static PINNED_DESC: LazyLock<Selector> = LazyLock::new(|| sel("p.pinned-item-desc"));
static FOLLOWERS: LazyLock<Selector> = LazyLock::new(|| sel(r#"a[href*="tab=followers"]"#));
static FOLLOWING: LazyLock<Selector> = LazyLock::new(|| sel(r#"a[href*="tab=following"]"#));
static COUNTER: LazyLock<Selector> = LazyLock::new(|| sel("span.text-bold"));

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\d.,]+[kKmM]?$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedItem {
    pub name: String,
    pub description: Option<String>,
}

/// Identity fields of a code-host profile. Every key is serialized, `null`
/// when the page didn't show it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub github_url: String,
    pub name: Option<String>,
    pub username: String,
    pub email: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    /// Always rendered when present, so a missing counter reads "0".
    pub followers: String,
    pub following: String,
    pub contributions: Option<String>,
    pub pinned_repositories: Vec<PinnedItem>,
}

/// Parse `html` and extract a record. A page that can't be read as a
/// profile at all yields `None`; missing fields are just `None` inside.
pub fn extract_page(html: &str, target_url: &str) -> Option<ProfileRecord> {
    let doc = Html::parse_document(html);
    match extract(&doc, target_url) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Profile extraction failed for {}: {}", target_url, e);
            None
        }
    }
}

/// Each field is looked up on its own; one missing field never stops the rest.
pub fn extract(doc: &Html, target_url: &str) -> Result<ProfileRecord, ExtractionError> {
    Url::parse(target_url).map_err(|e| ExtractionError::InvalidUrl {
        url: target_url.to_string(),
        reason: e.to_string(),
    })?;
    let handle = last_segment(target_url)
        .ok_or_else(|| ExtractionError::MissingHandle(target_url.to_string()))?;

    Ok(ProfileRecord {
        github_url: target_url.to_string(),
        name: first_text(doc, &NAME),
        username: first_text(doc, &HANDLE).unwrap_or(handle),
        email: first_text(doc, &EMAIL),
        location: first_text(doc, &LOCATION),
        company: first_text(doc, &COMPANY),
        website: doc
            .select(&WEBSITE)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string),
        bio: first_text(doc, &BIO),
        followers: counter(doc, &FOLLOWERS).unwrap_or_else(|| "0".to_string()),
        following: counter(doc, &FOLLOWING).unwrap_or_else(|| "0".to_string()),
        contributions: first_text(doc, &CONTRIBUTIONS),
        pinned_repositories: pinned(doc),
    })
}

/// Bold number inside the followers/following link, else the link's first word.
fn counter(doc: &Html, link: &Selector) -> Option<String> {
    let anchor = doc.select(link).next()?;
    let bold = anchor.select(&COUNTER).next().and_then(text_of);
    let raw = bold.or_else(|| {
        text_of(anchor).and_then(|t| t.split_whitespace().next().map(str::to_string))
    })?;
    COUNT_RE.is_match(&raw).then_some(raw)
}

fn pinned(doc: &Html) -> Vec<PinnedItem> {
    doc.select(&PINNED)
        .filter_map(|item| {
            let name = item.select(&PINNED_NAME).next().and_then(text_of)?;
            let description = item.select(&PINNED_DESC).next().and_then(text_of);
            Some(PinnedItem { name, description })
        })
        .take(MAX_PINNED)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
        <html><body>
          <div class="vcard-names-container">
            <h1 class="vcard-names">
              <span class="p-name vcard-fullname" itemprop="name">
                The Octocat
              </span>
              <span class="p-nickname vcard-username" itemprop="additionalName">octocat</span>
            </h1>
          </div>
          <div class="p-note user-profile-bio mb-3"><div>Mascot of   the code host.</div></div>
          <div class="flex-order-1">
            <a class="Link--secondary" href="https://github.com/octocat?tab=followers">
              <svg class="octicon"></svg>
              <span class="text-bold color-fg-default">12.4k</span> followers
            </a> ·
            <a class="Link--secondary" href="https://github.com/octocat?tab=following">
              <span class="text-bold color-fg-default">9</span> following
            </a>
          </div>
          <ul class="vcard-details">
            <li itemprop="worksFor"><span class="p-org">@github</span></li>
            <li itemprop="homeLocation"><span class="p-label">San Francisco</span></li>
            <li itemprop="email"><a href="mailto:octocat@github.com">octocat@github.com</a></li>
            <li itemprop="url"><a rel="nofollow me" href="https://github.blog">https://github.blog</a></li>
          </ul>
          <h2 class="f4 text-normal mb-2">
            1,234 contributions
            in the last year
          </h2>
          <div class="js-pinned-items-reorder-container">
            <ol>
              <li><div class="pinned-item-list-item-content">
                <span class="repo">Hello-World</span>
                <p class="pinned-item-desc">My first repository.</p>
              </div></li>
              <li><div class="pinned-item-list-item-content">
                <span class="repo">Spoon-Knife</span>
              </div></li>
              <li><div class="pinned-item-list-item-content">
                <p class="pinned-item-desc">nameless, skipped</p>
              </div></li>
            </ol>
          </div>
        </body></html>"#;

    #[test]
    fn full_profile() {
        let doc = Html::parse_document(PROFILE);
        let p = extract(&doc, "https://github.com/octocat").unwrap();
        assert_eq!(p.name.as_deref(), Some("The Octocat"));
        assert_eq!(p.username, "octocat");
        assert_eq!(p.email.as_deref(), Some("octocat@github.com"));
        assert_eq!(p.location.as_deref(), Some("San Francisco"));
        assert_eq!(p.company.as_deref(), Some("@github"));
        assert_eq!(p.website.as_deref(), Some("https://github.blog"));
        assert_eq!(p.bio.as_deref(), Some("Mascot of the code host."));
        assert_eq!(p.followers, "12.4k");
        assert_eq!(p.following, "9");
        assert_eq!(p.contributions.as_deref(), Some("1,234 contributions in the last year"));
        assert_eq!(p.pinned_repositories.len(), 2);
        assert_eq!(p.pinned_repositories[0].name, "Hello-World");
        assert_eq!(
            p.pinned_repositories[0].description.as_deref(),
            Some("My first repository.")
        );
        assert_eq!(p.pinned_repositories[1].description, None);
    }

    #[test]
    fn bare_page_keeps_every_key() {
        let doc = Html::parse_document("<html><body><p>Nothing here</p></body></html>");
        let p = extract(&doc, "https://github.com/ghost").unwrap();
        assert_eq!(p.username, "ghost");
        assert_eq!(p.followers, "0");
        assert_eq!(p.following, "0");
        assert!(p.pinned_repositories.is_empty());

        let json = serde_json::to_value(&p).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "github_url", "name", "username", "email", "location", "company", "website",
            "bio", "followers", "following", "contributions", "pinned_repositories",
        ] {
            assert!(obj.contains_key(key), "missing key {}", key);
        }
        assert!(obj["email"].is_null());
        assert_eq!(obj["pinned_repositories"], serde_json::json!([]));
    }

    #[test]
    fn malformed_markup_never_panics() {
        for html in [
            "",
            "<div",
            "<<<>>>",
            "<li itemprop='email'>",
            "<a href='?tab=followers'>lots of</a>",
            "<div class='js-pinned-items-reorder-container'><div class='pinned-item-list-item-content'>",
            "\u{0}\u{feff}<span itemprop=name></span>",
        ] {
            let p = extract(&Html::parse_document(html), "https://github.com/x").unwrap();
            assert_eq!(p.username, "x");
        }
    }

    #[test]
    fn non_numeric_counter_defaults_to_zero() {
        let doc = Html::parse_document("<a href='/x?tab=followers'>lots of followers</a>");
        let p = extract(&doc, "https://github.com/x").unwrap();
        assert_eq!(p.followers, "0");
    }

    #[test]
    fn pinned_list_is_bounded() {
        let items: String = (0..10)
            .map(|i| format!("<div class='pinned-item-list-item-content'><span class='repo'>r{}</span></div>", i))
            .collect();
        let html = format!("<div class='js-pinned-items-reorder-container'>{}</div>", items);
        let p = extract(&Html::parse_document(&html), "https://github.com/x").unwrap();
        assert_eq!(p.pinned_repositories.len(), MAX_PINNED);
    }

    #[test]
    fn name_ignores_other_microdata() {
        let html = r#"
            <div itemscope itemtype="http://schema.org/Organization">
              <div itemprop="name">Some Org</div>
              <meta itemprop="name" content="Meta Org">
            </div>
            <h1 class="vcard-names"><span itemprop="name">Jane Roe</span></h1>"#;
        let p = extract(&Html::parse_document(html), "https://github.com/jane").unwrap();
        assert_eq!(p.name.as_deref(), Some("Jane Roe"));

        let only_org = Html::parse_document(r#"<div itemprop="name">Some Org</div>"#);
        let p = extract(&only_org, "https://github.com/jane").unwrap();
        assert_eq!(p.name, None);
    }

    #[test]
    fn handle_comes_from_url_when_markup_lacks_it() {
        let doc = Html::parse_document("<span itemprop='name'>Jane</span>");
        let p = extract(&doc, "https://github.com/jane-doe").unwrap();
        assert_eq!(p.username, "jane-doe");
    }

    #[test]
    fn url_without_handle_is_total_failure() {
        assert!(extract_page(PROFILE, "https://github.com/").is_none());
        assert!(extract_page(PROFILE, "not a url").is_none());

        let doc = Html::parse_document(PROFILE);
        assert!(matches!(
            extract(&doc, "not a url"),
            Err(ExtractionError::InvalidUrl { .. })
        ));
        assert!(matches!(
            extract(&doc, "https://github.com/"),
            Err(ExtractionError::MissingHandle(_))
        ));
    }
}
