//! Network utilities and helpers

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::time::Duration;

use crate::core::models::{AppError, AppResult};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Get user agent string
pub fn get_user_agent() -> &'static str {
    concat!("HlsArchiver/", env!("CARGO_PKG_VERSION"))
}

/// Build the shared HTTP client used for playlist and segment requests.
///
/// No client-wide timeout is set; callers bound each attempt themselves.
pub fn build_http_client(
    user_agent: &str,
    headers: &HashMap<String, String>,
) -> AppResult<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::Config(format!("Invalid header value for {}: {}", name, e)))?;
        default_headers.insert(name, value);
    }

    let user_agent = if user_agent.is_empty() {
        get_user_agent()
    } else {
        user_agent
    };

    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(default_headers)
        .connect_timeout(DEFAULT_TIMEOUT)
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://example.com/".to_string());
        assert!(build_http_client("", &headers).is_ok());

        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            build_http_client("ua", &headers),
            Err(AppError::Config(_))
        ));
    }
}
