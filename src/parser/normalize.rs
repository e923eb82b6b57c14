use url::Url;

use crate::error::ValidationError;

pub const CODE_HOST: &str = "github.com";
pub const QA_HOST: &str = "stackoverflow.com";

/// First path segments that belong to repository pages, never to a user.
const NON_PROFILE_SEGMENTS: &[&str] = &[
    "issues",
    "pull",
    "pulls",
    "pull-requests",
    "commits",
    "commit",
    "releases",
    "tags",
    "wiki",
    "tree",
    "blob",
];

/// Strip query and fragment, force https, drop trailing slashes.
///
/// `//github.com/user/?x=1#y` becomes `https://github.com/user`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let base = raw.trim().split(['?', '#']).next().unwrap_or("");
    if base.is_empty() {
        return None;
    }

    let lower = base.to_ascii_lowercase();
    let with_scheme = if let Some(rest) = base.strip_prefix("//") {
        format!("https://{}", rest)
    } else if lower.starts_with("http://") {
        format!("https://{}", &base["http://".len()..])
    } else if lower.starts_with("https://") {
        format!("https://{}", &base["https://".len()..])
    } else {
        format!("https://{}", base)
    };

    let trimmed = with_scheme.trim_end_matches('/');
    if trimmed == "https:" || trimmed.len() <= "https://".len() {
        return None;
    }
    Some(trimmed.to_string())
}

/// A code-host user profile: exactly one non-empty path segment on the
/// main host, and that segment isn't a repository sub-page.
pub fn is_profile_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    if host != CODE_HOST && host != format!("www.{}", CODE_HOST) {
        return false;
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [only] => !NON_PROFILE_SEGMENTS.contains(&only.to_ascii_lowercase().as_str()),
        _ => false,
    }
}

/// Normalize `href` and keep it only if it is a profile URL. The host is
/// lowercased on the way out.
pub fn canonical_profile_url(href: &str) -> Option<String> {
    let url = normalize_url(href).filter(|u| is_profile_url(u))?;
    let parsed = Url::parse(&url).ok()?;
    Some(parsed.as_str().trim_end_matches('/').to_string())
}

/// Make an input identifier absolute. Query strings are kept; only a
/// missing or protocol-relative scheme is filled in.
pub fn absolute_url(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{}", rest)
    } else if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

/// Final non-empty path segment of a URL.
pub fn last_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Q&A user pages live under `/users/` on the Q&A host.
pub fn validate_source_url(raw: &str) -> Result<String, ValidationError> {
    let url = absolute_url(raw);
    let parsed =
        Url::parse(&url).map_err(|e| ValidationError::new(format!("Invalid URL format: {}", e), raw))?;
    let host = parsed.host_str().unwrap_or("");
    if !host.ends_with(QA_HOST) {
        return Err(ValidationError::new("Invalid Stack Overflow URL", raw));
    }
    if !parsed.path().starts_with("/users/") {
        return Err(ValidationError::new(
            "URL must be a Stack Overflow user profile",
            raw,
        ));
    }
    Ok(url)
}

/// Code-host profile pages have exactly one path segment.
pub fn validate_target_url(raw: &str) -> Result<String, ValidationError> {
    let url = normalize_url(raw).ok_or_else(|| ValidationError::new("Invalid GitHub URL", raw))?;
    let parsed =
        Url::parse(&url).map_err(|e| ValidationError::new(format!("Invalid URL format: {}", e), raw))?;
    if !parsed.host_str().unwrap_or("").ends_with(CODE_HOST) {
        return Err(ValidationError::new("Invalid GitHub URL", raw));
    }
    if !is_profile_url(&url) {
        return Err(ValidationError::new("URL must be a GitHub user profile", raw));
    }
    Ok(url)
}
