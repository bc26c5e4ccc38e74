//! Shared HTTP plumbing for the networked clients

use crate::{IngestError, IngestResult};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Build a client with a bounded per-call timeout
pub fn build_client(timeout: Duration) -> IngestResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("wxd/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| IngestError::Config(format!("cannot build HTTP client: {e}")))
}

/// Parse a base URL so that relative endpoints join below it
pub fn parse_base_url(base: &str) -> IngestResult<Url> {
    let mut url =
        Url::parse(base).map_err(|e| IngestError::Config(format!("invalid base URL {base:?}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Resolve an endpoint below `base`
pub fn endpoint(base: &Url, path: &str) -> IngestResult<Url> {
    base.join(path)
        .map_err(|e| IngestError::Config(format!("invalid endpoint {path:?}: {e}")))
}

/// GET `url` and decode the JSON body
///
/// Transport failures and error statuses are `SourceUnavailable`; a body
/// that is not the expected JSON is `MalformedResponse`. The query string is
/// never logged since it carries credentials.
pub async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: Url) -> IngestResult<T> {
    let path = url.path().to_string();
    let response = client.get(url).send().await?.error_for_status()?;
    let body = response.bytes().await?;
    debug!(path = %path, bytes = body.len(), "HTTP response received");

    serde_json::from_slice(&body)
        .map_err(|e| IngestError::MalformedResponse(format!("{path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let base = parse_base_url("https://api.ecowitt.net/api/v3").unwrap();
        let url = endpoint(&base, "device/history").unwrap();
        assert_eq!(url.as_str(), "https://api.ecowitt.net/api/v3/device/history");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            parse_base_url("not a url"),
            Err(IngestError::Config(_))
        ));
    }
}
