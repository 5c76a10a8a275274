use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chat_provider::{ProviderInitError, RunProvider};
use chat_provider_http::{HttpChatProvider, HttpProviderConfig};
use chat_provider_mock::{MockProvider, MockScript};

use crate::config::{AppConfig, ModelEntry};

/// Delay between scripted chunks so offline runs still look like streaming.
const MOCK_CHUNK_DELAY: Duration = Duration::from_millis(40);

/// Providers keyed by configured model name.
pub type ProviderMap = BTreeMap<String, Arc<dyn RunProvider>>;

pub fn providers_from_config(config: &AppConfig) -> Result<ProviderMap, ProviderInitError> {
    let mut providers = ProviderMap::new();
    for entry in &config.models {
        let provider = provider_for_entry(config, entry).map_err(|error| {
            ProviderInitError::new(format!("model '{}': {}", entry.name, error.message()))
        })?;
        providers.insert(entry.name.clone(), provider);
    }
    Ok(providers)
}

fn provider_for_entry(
    config: &AppConfig,
    entry: &ModelEntry,
) -> Result<Arc<dyn RunProvider>, ProviderInitError> {
    if config.use_mock || entry.is_mock() {
        return Ok(Arc::new(
            MockProvider::new(&entry.name, MockScript::Echo).with_chunk_delay(MOCK_CHUNK_DELAY),
        ));
    }

    let mut http_config = HttpProviderConfig::new(&entry.vendor, &entry.api_key, &entry.model)
        .with_timeout(config.timeout)
        .with_max_retries(config.max_retries)
        .with_retry_delay(config.retry_delay);
    if let Some(base_url) = &entry.base_url {
        http_config = http_config.with_base_url(base_url);
    }
    http_config = http_config
        .with_key_header(entry.key_header.clone(), entry.key_prefix.clone())
        .with_headers(entry.headers.clone());

    Ok(Arc::new(HttpChatProvider::new(http_config)?))
}
