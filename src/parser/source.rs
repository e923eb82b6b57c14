use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::normalize::normalize_url;
use super::{first_text, text_of};

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ABOUT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [".js-about-me-content", ".profile-about", ".about-me"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});
static STAT_VALUE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.fs-title").unwrap());
static STAT_LABEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.fc-black-500").unwrap());

const SOCIAL_HOSTS: &[&str] = &["twitter.com", "x.com"];
const SOCIAL_NON_PROFILE: &[&str] = &["share", "intent", "home", "search", "hashtag", "i"];
const OFFICIAL_ACCOUNTS: &[&str] = &["https://twitter.com/stackoverflow", "https://x.com/stackoverflow"];

/// Reputation counters shown on a Q&A profile page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub reputation: Option<String>,
    pub reached: Option<String>,
    pub answers: Option<String>,
    pub questions: Option<String>,
}

/// First link to the user's own social profile (Twitter/X), normalized.
/// The platform's account in the page chrome is passed over.
pub fn social_link(doc: &Html) -> Option<String> {
    doc.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(normalize_url)
        .find(|u| is_social_profile(u) && !is_official_account(u))
}

fn is_social_profile(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("").trim_start_matches("www.").to_ascii_lowercase();
    if !SOCIAL_HOSTS.contains(&host.as_str()) {
        return false;
    }
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    matches!(segments.as_slice(), [handle] if !SOCIAL_NON_PROFILE.contains(handle))
}

/// The Q&A platform's own account shows up in page chrome; it is never the user's.
pub fn is_official_account(url: &str) -> bool {
    let url = url.trim().trim_end_matches('/').to_ascii_lowercase();
    let url = url.replacen("://www.", "://", 1);
    OFFICIAL_ACCOUNTS.contains(&url.as_str())
}

/// The user's free-text "about me" block.
pub fn about_text(doc: &Html) -> Option<String> {
    ABOUT.iter().find_map(|sel| first_text(doc, sel))
}

pub fn stats(doc: &Html) -> SourceStats {
    SourceStats {
        reputation: first_text(doc, &STAT_VALUE),
        reached: labelled_stat(doc, "reached"),
        answers: labelled_stat(doc, "answers"),
        questions: labelled_stat(doc, "questions"),
    }
}

/// Value sitting next to a label like "reached" inside the same stat box.
fn labelled_stat(doc: &Html, label: &str) -> Option<String> {
    doc.select(&STAT_LABEL)
        .filter(|el| {
            text_of(*el)
                .map(|t| t.to_lowercase().contains(label))
                .unwrap_or(false)
        })
        .find_map(|el| {
            let parent = el.parent().and_then(ElementRef::wrap)?;
            parent.select(&STAT_VALUE).next().and_then(text_of)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="d-flex">
            <div class="flex--item"><div class="fs-title">12,345</div><div class="fc-black-500">reputation</div></div>
            <div class="flex--item"><div class="fs-title">1.2m</div><div class="fc-black-500">reached</div></div>
            <div class="flex--item"><div class="fs-title">431</div><div class="fc-black-500">answers</div></div>
          </div>
          <div class="js-about-me-content"><p>Ruby developer.</p>
            <p>Lima, Peru</p></div>
          <a href="https://twitter.com/share?text=hi">share</a>
          <a href="https://twitter.com/StackOverflow">so</a>
          <a href="http://www.twitter.com/rubydev/?ref=so">me</a>
        </body></html>"#;

    #[test]
    fn stat_boxes() {
        let doc = Html::parse_document(PAGE);
        let s = stats(&doc);
        assert_eq!(s.reputation.as_deref(), Some("12,345"));
        assert_eq!(s.reached.as_deref(), Some("1.2m"));
        assert_eq!(s.answers.as_deref(), Some("431"));
        assert_eq!(s.questions, None);
    }

    #[test]
    fn about_block_is_collapsed() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(about_text(&doc).as_deref(), Some("Ruby developer. Lima, Peru"));
    }

    #[test]
    fn share_links_and_official_account_are_skipped() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(social_link(&doc).as_deref(), Some("https://www.twitter.com/rubydev"));
    }

    #[test]
    fn official_account_alone_is_no_link() {
        let doc = Html::parse_document(r#"<a href="https://x.com/StackOverflow/">so</a>"#);
        assert_eq!(social_link(&doc), None);
    }

    #[test]
    fn official_account_detection() {
        assert!(is_official_account("https://twitter.com/StackOverflow/"));
        assert!(is_official_account("https://www.x.com/stackoverflow"));
        assert!(!is_official_account("https://twitter.com/rubydev"));
    }

    #[test]
    fn nothing_on_empty_page() {
        let doc = Html::parse_document("<html><body></body></html>");
        assert_eq!(social_link(&doc), None);
        assert_eq!(about_text(&doc), None);
        assert_eq!(stats(&doc), SourceStats::default());
    }
}
