use std::collections::BTreeMap;

use crate::config::ClientConfig;
use crate::error::ChatApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";

/// Value of the authentication header: `"{prefix} {key}"`, or the bare key
/// when the prefix is empty.
pub fn auth_header_value(prefix: &str, api_key: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        api_key.trim().to_owned()
    } else {
        format!("{prefix} {}", api_key.trim())
    }
}

/// Build a deterministic header map for one request.
///
/// Keys are lowercased so caller overrides replace defaults regardless of
/// spelling. Precedence, lowest first: built-in defaults, config extras,
/// `overrides`, then the auth header which is always taken from config.
pub fn build_headers(
    config: &ClientConfig,
    stream: bool,
    overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ChatApiError> {
    if config.api_key.trim().is_empty() {
        return Err(ChatApiError::InvalidConfig("API key is required".to_string()));
    }
    let auth_name = config.key_header_name.trim().to_ascii_lowercase();
    if auth_name.is_empty() {
        return Err(ChatApiError::InvalidConfig(
            "API key header name is required".to_string(),
        ));
    }

    let mut headers = BTreeMap::new();
    headers.insert(HEADER_CONTENT_TYPE.to_owned(), CONTENT_TYPE_JSON.to_owned());
    headers.insert(
        HEADER_ACCEPT.to_owned(),
        if stream {
            ACCEPT_EVENT_STREAM
        } else {
            CONTENT_TYPE_JSON
        }
        .to_owned(),
    );

    headers.insert(HEADER_USER_AGENT.to_owned(), default_user_agent());

    for (key, value) in config.extra_headers.iter().chain(overrides) {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers.insert(
        auth_name,
        auth_header_value(&config.key_prefix, &config.api_key),
    );

    Ok(headers)
}

fn default_user_agent() -> String {
    format!(
        "deskchat/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        short_arch(std::env::consts::ARCH)
    )
}

fn short_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{auth_header_value, build_headers, short_arch, HEADER_USER_AGENT};
    use crate::config::ClientConfig;

    #[test]
    fn empty_prefix_sends_bare_key() {
        assert_eq!(auth_header_value("", "sk-1"), "sk-1");
        assert_eq!(auth_header_value("Bearer", "sk-1"), "Bearer sk-1");
    }

    #[test]
    fn arch_names_are_shortened() {
        assert_eq!(short_arch("x86_64"), "x64");
        assert_eq!(short_arch("aarch64"), "arm64");
        assert_eq!(short_arch("riscv64"), "riscv64");
    }

    #[test]
    fn configured_headers_can_replace_the_user_agent() {
        let config = ClientConfig::new("https://api.example.com", "k")
            .insert_header("User-Agent", "custom/1.0")
            .insert_header("X-Team", "research");

        let headers = build_headers(&config, false, &BTreeMap::new()).expect("headers");

        assert_eq!(headers.get(HEADER_USER_AGENT).map(String::as_str), Some("custom/1.0"));
        assert_eq!(headers.get("x-team").map(String::as_str), Some("research"));
        assert_eq!(
            headers.get("authorization").map(String::as_str),
            Some("Bearer k")
        );
    }
}
