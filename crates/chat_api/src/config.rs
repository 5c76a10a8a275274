use std::collections::BTreeMap;
use std::time::Duration;

use crate::vendor::VendorAdapter;

pub const DEFAULT_KEY_HEADER: &str = "Authorization";
pub const DEFAULT_KEY_PREFIX: &str = "Bearer";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Transport configuration for one API endpoint.
///
/// Immutable once handed to [`crate::ChatApiClient::new`]; per-call settings
/// such as model or temperature travel in [`crate::RequestOptions`] instead.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every request path is joined onto.
    pub base_url: String,
    pub api_key: String,
    /// Header carrying the API key.
    pub key_header_name: String,
    /// Value prefix placed before the key; empty means the bare key is sent.
    pub key_prefix: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_delay: Duration,
    /// Additional headers merged into every request.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            key_header_name: DEFAULT_KEY_HEADER.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Config seeded with a vendor's base URL and auth header shape.
    pub fn for_vendor(vendor: &dyn VendorAdapter, api_key: impl Into<String>) -> Self {
        Self::new(vendor.default_base_url(), api_key)
            .with_key_header(vendor.key_header(), vendor.key_prefix())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_key_header(mut self, name: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.key_header_name = name.into();
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}
