use reqwest::header::{HeaderName, HeaderValue};

use crate::{ClientError, FetchOptions, Result, RetrySchedule};

/// Configures the base url, default request options and retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Prefix prepended verbatim to every path.
    pub base_url: String,
    /// Defaults merged under every call's options.
    pub fetch_options: FetchOptions,
    /// Default waits between attempts. Empty means no retries.
    pub retry_after: RetrySchedule,
    /// Per-attempt timeout in milliseconds, used by the default transport.
    pub timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            fetch_options: FetchOptions::default(),
            retry_after: RetrySchedule::default(),
            timeout_ms: 10_000,
        }
    }
}

impl ClientOptions {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn fetch_options(mut self, fetch_options: FetchOptions) -> Self {
        self.fetch_options = fetch_options;
        self
    }

    /// Adds a default header sent with every request.
    pub fn default_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ClientError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ClientError::Config(format!("invalid value for '{name}': {err}")))?;
        self.fetch_options.headers.insert(name, value);
        Ok(self)
    }

    pub fn retry_after(mut self, schedule: impl Into<RetrySchedule>) -> Self {
        self.retry_after = schedule.into();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Reads options from environment variables.
    ///
    /// Reads:
    /// - `API_CLIENT_BASE_URL`: base url (optional, default empty)
    /// - `API_CLIENT_RETRY_AFTER`: comma-separated waits in ms, e.g. `100,200`
    /// - `API_CLIENT_TIMEOUT_MS`: per-attempt timeout in ms
    ///
    /// Unset variables keep their defaults; malformed values are an error.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(base_url) = std::env::var("API_CLIENT_BASE_URL") {
            options.base_url = base_url.trim().to_owned();
        }
        if let Ok(retry_after) = std::env::var("API_CLIENT_RETRY_AFTER") {
            options.retry_after = parse_retry_after(&retry_after)?;
        }
        if let Ok(timeout) = std::env::var("API_CLIENT_TIMEOUT_MS") {
            options.timeout_ms = timeout.trim().parse().map_err(|_| {
                ClientError::Config(format!("API_CLIENT_TIMEOUT_MS is not a number: '{timeout}'"))
            })?;
        }
        Ok(options)
    }
}

pub(crate) fn parse_retry_after(raw: &str) -> Result<RetrySchedule> {
    let waits = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>().map_err(|_| {
                ClientError::Config(format!("invalid retry wait '{part}' in API_CLIENT_RETRY_AFTER"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RetrySchedule::from_millis(waits))
}
