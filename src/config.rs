//! Startup configuration: optional JSON file plus environment.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_api::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};
use chat_api::payload::{clamp_temperature, MAX_MAX_TOKENS, MIN_MAX_TOKENS};
use chat_api::vendor::{ARK_VENDOR_ID, DEEPSEEK_VENDOR_ID};
use chat_api::vendor_for_id;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_ENV_VAR: &str = "DESKCHAT_CONFIG_PATH";
pub const PROVIDER_ENV_VAR: &str = "DESKCHAT_PROVIDER";
pub const DEEPSEEK_KEY_ENV_VAR: &str = "DEEPSEEK_API_KEY";
pub const ARK_KEY_ENV_VAR: &str = "ARK_API_KEY";

/// Vendor id that routes a model to the offline scripted provider.
pub const MOCK_VENDOR_ID: &str = "mock";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no models configured; set {DEEPSEEK_KEY_ENV_VAR} or {ARK_KEY_ENV_VAR}, or point {CONFIG_PATH_ENV_VAR} at a config file")]
    NoModels,

    #[error("model entry {index} has an empty name")]
    EmptyModelName { index: usize },

    #[error("model name '{0}' is configured more than once")]
    DuplicateModel(String),

    #[error("model '{name}' uses unknown vendor '{vendor}'")]
    UnknownVendor { name: String, vendor: String },

    #[error("model '{name}' has no API key; set it in the config file or via {env_var}")]
    MissingApiKey { name: String, env_var: &'static str },

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("unsupported provider '{0}'; available providers: http, mock")]
    UnsupportedProvider(String),
}

/// One selectable model: a display name bound to a vendor endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    pub name: String,
    pub vendor: String,
    #[serde(default)]
    pub api_key: String,
    /// Vendor model id; empty selects the vendor default.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Auth header name; unset keeps the vendor's.
    #[serde(default)]
    pub key_header: Option<String>,
    /// Auth value prefix; unset keeps the vendor's, empty sends the bare key.
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Extra headers sent with every request to this model.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor: vendor.into(),
            api_key: String::new(),
            model: String::new(),
            base_url: None,
            key_header: None,
            key_prefix: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.vendor.trim().eq_ignore_ascii_case(MOCK_VENDOR_ID)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    models: Vec<ModelEntry>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    max_turns: Option<u32>,
    #[serde(default)]
    timeout_sec: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    retry_delay_ms: Option<u64>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    context_window: Option<usize>,
}

/// API keys taken from the environment, used for entries without their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorKeys {
    pub deepseek: Option<String>,
    pub ark: Option<String>,
}

impl VendorKeys {
    pub fn from_env() -> Self {
        Self {
            deepseek: env_string_opt(DEEPSEEK_KEY_ENV_VAR),
            ark: env_string_opt(ARK_KEY_ENV_VAR),
        }
    }

    fn key_for(&self, vendor_id: &str) -> Option<&str> {
        match vendor_id {
            DEEPSEEK_VENDOR_ID => self.deepseek.as_deref(),
            ARK_VENDOR_ID => self.ark.as_deref(),
            _ => None,
        }
    }
}

fn env_var_for(vendor_id: &str) -> &'static str {
    if vendor_id == ARK_VENDOR_ID {
        ARK_KEY_ENV_VAR
    } else {
        DEEPSEEK_KEY_ENV_VAR
    }
}

/// Validated application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub models: Vec<ModelEntry>,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Zero means unlimited.
    pub max_turns: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub system_prompt: Option<String>,
    /// Most recent non-system messages sent per request; `None` sends all.
    pub context_window: Option<usize>,
    /// Route every model to the scripted provider.
    pub use_mock: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            stream: false,
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            max_turns: 0,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            system_prompt: None,
            context_window: None,
            use_mock: false,
        }
    }
}

impl AppConfig {
    /// Loads from `DESKCHAT_CONFIG_PATH` when set, else derives models from
    /// the vendor keys present in the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let use_mock = match env_string_opt(PROVIDER_ENV_VAR) {
            None => false,
            Some(provider) => match provider.trim().to_ascii_lowercase().as_str() {
                "mock" => true,
                "http" => false,
                _ => return Err(ConfigError::UnsupportedProvider(provider)),
            },
        };
        let keys = VendorKeys::from_env();

        match env_string_opt(CONFIG_PATH_ENV_VAR) {
            Some(path) => Self::load_file(Path::new(path.trim()), &keys, use_mock),
            None => Self::from_keys(&keys, use_mock),
        }
    }

    pub fn load_file(path: &Path, keys: &VendorKeys, use_mock: bool) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_file(file, keys, use_mock)
    }

    fn from_file(file: ConfigFile, keys: &VendorKeys, use_mock: bool) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        if file.timeout_sec == Some(0) {
            return Err(ConfigError::NonPositive {
                field: "timeout_sec",
            });
        }
        if file.max_retries == Some(0) {
            return Err(ConfigError::NonPositive {
                field: "max_retries",
            });
        }

        let config = Self {
            models: file.models,
            stream: file.stream.unwrap_or(defaults.stream),
            temperature: match file.temperature {
                Some(value) => clamp_temperature(value),
                None => defaults.temperature,
            },
            max_tokens: Some(
                file.max_tokens
                    .unwrap_or(DEFAULT_MAX_TOKENS)
                    .clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS),
            ),
            max_turns: file.max_turns.unwrap_or(0),
            timeout: file
                .timeout_sec
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            retry_delay: file
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            system_prompt: file
                .system_prompt
                .map(|prompt| prompt.trim().to_string())
                .filter(|prompt| !prompt.is_empty()),
            context_window: file.context_window.filter(|window| *window > 0),
            use_mock,
        };
        config.resolved(keys)
    }

    /// Config with one model per vendor key present, or a single mock model.
    pub fn from_keys(keys: &VendorKeys, use_mock: bool) -> Result<Self, ConfigError> {
        let mut models = Vec::new();
        if use_mock {
            models.push(ModelEntry::new(MOCK_VENDOR_ID, MOCK_VENDOR_ID));
        } else {
            if keys.deepseek.is_some() {
                models.push(ModelEntry::new("deepseek", DEEPSEEK_VENDOR_ID));
            }
            if keys.ark.is_some() {
                models.push(ModelEntry::new("doubao", ARK_VENDOR_ID));
            }
        }

        Self {
            models,
            use_mock,
            ..Self::default()
        }
        .resolved(keys)
    }

    /// Validates entries, canonicalizes vendor ids and fills keys from env.
    fn resolved(mut self, keys: &VendorKeys) -> Result<Self, ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        let mut seen = BTreeSet::new();
        for (index, entry) in self.models.iter_mut().enumerate() {
            entry.name = entry.name.trim().to_string();
            if entry.name.is_empty() {
                return Err(ConfigError::EmptyModelName { index });
            }
            if !seen.insert(entry.name.clone()) {
                return Err(ConfigError::DuplicateModel(entry.name.clone()));
            }

            if entry.is_mock() {
                entry.vendor = MOCK_VENDOR_ID.to_string();
                continue;
            }

            let vendor = vendor_for_id(&entry.vendor).ok_or_else(|| ConfigError::UnknownVendor {
                name: entry.name.clone(),
                vendor: entry.vendor.clone(),
            })?;
            entry.vendor = vendor.id().to_string();

            if entry.api_key.trim().is_empty() {
                if let Some(key) = keys.key_for(vendor.id()) {
                    entry.api_key = key.trim().to_string();
                }
            }
            if entry.api_key.trim().is_empty() && !self.use_mock {
                return Err(ConfigError::MissingApiKey {
                    name: entry.name.clone(),
                    env_var: env_var_for(vendor.id()),
                });
            }
        }

        Ok(self)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|entry| entry.name.clone()).collect()
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
