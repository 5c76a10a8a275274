use url::Url;

use crate::error::ChatApiError;

/// Join a configured base URL and a request path with exactly one `/`.
///
/// Absolute `path` values are rejected rather than silently replacing the base.
pub fn join_url(base_url: &str, path: &str) -> Result<String, ChatApiError> {
    let base = base_url.trim();
    if base.is_empty() {
        return Err(ChatApiError::InvalidUrl("base URL is empty".to_string()));
    }
    let parsed = Url::parse(base)
        .map_err(|error| ChatApiError::InvalidUrl(format!("{base}: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ChatApiError::InvalidUrl(format!(
            "{base}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let path = path.trim();
    if path.contains("://") {
        return Err(ChatApiError::InvalidUrl(format!(
            "request path must be relative: {path}"
        )));
    }

    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Ok(base.to_string());
    }
    Ok(format!("{base}/{path}"))
}
