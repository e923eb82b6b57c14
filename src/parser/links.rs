use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use super::normalize::canonical_profile_url;
use super::points_to_code_host;
use super::source::{self, SourceStats};

static CODE_HOST_ICON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("svg.iconGitHub").unwrap());
static VERIFIED_LIST: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.list-reset").unwrap());
static VERIFIED_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[rel~="me"][href]"#).unwrap());
static SOCIAL_ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.flex--item").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// A probe looks for one kind of candidate href. `None` means this probe
/// saw nothing, and the next one gets a turn.
type Probe = fn(&Html) -> Option<String>;

const PROBES: &[(&str, Probe)] = &[
    ("icon", icon_anchor),
    ("verified_list", verified_list),
    ("social_item", social_list_item),
    ("fallback", any_profile_link),
];

/// Everything mined from one source page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedLink {
    /// Canonical code-host profile URL, or `None`. Never half-normalized.
    pub url: Option<String>,
    /// Free-text "about" block of the source profile.
    pub auxiliary_text: Option<String>,
    /// Secondary social profile link.
    pub secondary_link: Option<String>,
    pub stats: SourceStats,
}

/// Run the probe chain and collect the auxiliary fields.
///
/// Auxiliary fields are extracted independently of whether a profile link is found.
pub fn resolve(doc: &Html) -> ResolvedLink {
    ResolvedLink {
        url: find_profile_link(doc),
        auxiliary_text: source::about_text(doc),
        secondary_link: source::social_link(doc),
        stats: source::stats(doc),
    }
}

/// First probe to produce a candidate decides. A candidate that fails the
/// profile-shape check after normalization is a non-match, not an error.
pub fn find_profile_link(doc: &Html) -> Option<String> {
    for (name, probe) in PROBES {
        if let Some(href) = probe(doc) {
            let url = canonical_profile_url(&href);
            debug!(strategy = *name, href = %href, accepted = url.is_some(), "profile link candidate");
            return url;
        }
    }
    debug!("no profile link candidate");
    None
}

/// Code-host icon inside a link that points at the code host.
fn icon_anchor(doc: &Html) -> Option<String> {
    doc.select(&CODE_HOST_ICON).find_map(|icon| {
        let anchor = icon
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "a")?;
        anchor
            .value()
            .attr("href")
            .filter(|h| points_to_code_host(h))
            .map(str::to_string)
    })
}

/// User-asserted links (`rel="me"`) in the profile's link list.
fn verified_list(doc: &Html) -> Option<String> {
    let list = doc.select(&VERIFIED_LIST).next()?;
    list.select(&VERIFIED_LINK)
        .filter_map(|a| a.value().attr("href"))
        .find(|h| points_to_code_host(h))
        .map(str::to_string)
}

/// Any code-host link inside a social-links list item.
fn social_list_item(doc: &Html) -> Option<String> {
    doc.select(&SOCIAL_ITEM).find_map(|item| {
        item.select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .find(|h| points_to_code_host(h))
            .map(str::to_string)
    })
}

/// Last resort: any link in the page that already looks like a profile.
fn any_profile_link(doc: &Html) -> Option<String> {
    doc.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter(|h| points_to_code_host(h))
        .find(|h| canonical_profile_url(h).is_some())
        .map(str::to_string)
}
