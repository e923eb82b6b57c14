pub mod links;
pub mod normalize;
pub mod profile;
pub mod source;

use scraper::{ElementRef, Html, Selector};

/// Collapsed, trimmed text content. `None` when the element has no text.
pub fn text_of(el: ElementRef) -> Option<String> {
    let text = el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text of the first element matching `selector`.
pub fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector).next().and_then(text_of)
}

/// Whether `href` points at the code host at all (any path, any scheme).
pub fn points_to_code_host(href: &str) -> bool {
    href.to_lowercase().contains(normalize::CODE_HOST)
}
