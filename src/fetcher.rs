use std::time::Instant;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, COOKIE};
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Cookies, Settings};
use crate::error::TransportError;

/// Where pages come from. The coordinator and the HTTP handlers only see this.
pub trait PageSource {
    /// Fetch a Q&A profile page.
    async fn fetch_source(&self, url: &str) -> Result<String, TransportError>;
    /// Fetch a code-host profile page. Paced to reduce rate limiting.
    async fn fetch_profile(&self, url: &str) -> Result<String, TransportError>;
}

/// HTTP session carrying a fixed user agent and the auth cookies.
pub struct Fetcher {
    client: Client,
    spacing: std::time::Duration,
    last_profile_fetch: Mutex<Option<Instant>>,
}

impl Fetcher {
    pub fn new(settings: &Settings, cookies: &Cookies) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if !cookies.is_empty() {
            let mut value = HeaderValue::from_str(&cookies.header_value())
                .context("Cookie values contain invalid header characters")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .timeout(settings.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        info!(names = ?cookies, "HTTP session ready with {} cookies", cookies.len());
        Ok(Self {
            client,
            spacing: settings.request_delay(),
            last_profile_fetch: Mutex::new(None),
        })
    }

    pub async fn get(&self, url: &str) -> Result<String, TransportError> {
        info!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|e| TransportError::Other {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(err) = classify_status(response.status(), url) {
            warn!("{}", err);
            return Err(err);
        }
        debug!(status = %response.status(), "request ok");

        response.text().await.map_err(|e| TransportError::Other {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Sleep until at least `spacing` has passed since the previous profile fetch.
    async fn pace(&self) {
        let mut last = self.last_profile_fetch.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.spacing {
                tokio::time::sleep(self.spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl PageSource for Fetcher {
    async fn fetch_source(&self, url: &str) -> Result<String, TransportError> {
        self.get(url).await
    }

    async fn fetch_profile(&self, url: &str) -> Result<String, TransportError> {
        self.pace().await;
        self.get(url).await
    }
}

/// Map a non-success status to its transport error. `None` for 2xx.
pub fn classify_status(status: StatusCode, url: &str) -> Option<TransportError> {
    let url = url.to_string();
    match status {
        s if s.is_success() => None,
        StatusCode::TOO_MANY_REQUESTS => Some(TransportError::RateLimited { url }),
        StatusCode::NOT_FOUND => Some(TransportError::NotFound { url }),
        s => Some(TransportError::Other {
            url,
            reason: format!("HTTP {}", s.as_u16()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let u = "https://github.com/octocat";
        assert!(classify_status(StatusCode::OK, u).is_none());
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, u),
            Some(TransportError::RateLimited { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, u),
            Some(TransportError::NotFound { .. })
        ));
        match classify_status(StatusCode::BAD_GATEWAY, u) {
            Some(TransportError::Other { reason, .. }) => assert_eq!(reason, "HTTP 502"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn profile_fetches_are_spaced() {
        let settings = Settings {
            request_delay_ms: 50,
            ..Settings::for_tests(":memory:")
        };
        let fetcher = Fetcher::new(&settings, &Cookies::default()).unwrap();
        let t0 = Instant::now();
        fetcher.pace().await;
        fetcher.pace().await;
        assert!(t0.elapsed() >= std::time::Duration::from_millis(50));
    }
}
