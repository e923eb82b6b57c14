use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::Config;
use serde::Deserialize;

const COOKIES_ENV: &str = "GITHUB_COOKIES";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36";

/// Runtime settings. Every key can be overridden with a `HARVEST_` env var,
/// e.g. `HARVEST_BATCH_SIZE=20`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub batch_size: usize,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub bind: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .set_default("db_path", "data/harvest.sqlite")?
            .set_default("batch_size", 40_i64)?
            .set_default("request_delay_ms", 1000_i64)?
            .set_default("timeout_secs", 30_i64)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("bind", "127.0.0.1:8080")?
            .add_source(config::Environment::with_prefix("HARVEST").try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid HARVEST_* settings")
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[cfg(test)]
    pub fn for_tests(db_path: &str) -> Self {
        Self {
            db_path: db_path.to_string(),
            batch_size: 40,
            request_delay_ms: 0,
            timeout_secs: 5,
            user_agent: "test".to_string(),
            bind: "127.0.0.1:0".to_string(),
        }
    }
}

/// Authentication cookies attached to every outbound request.
#[derive(Clone, Default)]
pub struct Cookies(BTreeMap<String, String>);

impl Cookies {
    /// Read the cookie blob from `GITHUB_COOKIES`. Absence is fatal.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(COOKIES_ENV)
            .with_context(|| format!("{} environment variable must be set", COOKIES_ENV))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).with_context(|| format!("Invalid JSON in {}", COOKIES_ENV))?;
        let Some(obj) = value.as_object() else {
            bail!("{} must be a JSON object of cookie name to value", COOKIES_ENV);
        };

        let mut cookies = BTreeMap::new();
        for (name, v) in obj {
            let v = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            cookies.insert(name.clone(), v);
        }
        Ok(Self(cookies))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as a `Cookie` request header value.
    pub fn header_value(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// Never print cookie values.
impl std::fmt::Debug for Cookies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}
