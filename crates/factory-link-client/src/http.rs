//! Pull-channel plumbing shared by both clients.

use crate::ClientError;
use crate::error::from_status;
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default bound on every one-shot request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

pub(crate) fn build_http() -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| ClientError::Connection(e.to_string()))
}

/// `base` with `segments` appended as escaped path segments.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)
        .map_err(|e| ClientError::Connection(format!("invalid base url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::Connection(format!("base url {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// WebSocket URL of the push channel: same host as `base`, `ws`/`wss`
/// scheme, path `/stream`.
pub(crate) fn stream_endpoint(base: &str, query: &[(&str, &str)]) -> Result<String, ClientError> {
    let mut url = endpoint(base, &["stream"])?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Connection(format!("cannot derive stream url from {base}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.to_string())
}

/// Send `request` with `timeout` and decode a JSON body.
pub(crate) async fn request_json<T: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<T, ClientError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest(e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        return Err(from_status(status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::from_reqwest(e, timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_segments() {
        let url = endpoint("http://localhost:8080", &["getPower"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/getPower");

        let url = endpoint("http://host/api/", &["commands", "a b"]).unwrap();
        assert_eq!(url.as_str(), "http://host/api/commands/a%20b");
    }

    #[test]
    fn stream_endpoint_switches_scheme() {
        assert_eq!(
            stream_endpoint("http://localhost:8080", &[]).unwrap(),
            "ws://localhost:8080/stream"
        );
        assert_eq!(
            stream_endpoint("https://mod.example/ctl", &[("token", "s3cret")]).unwrap(),
            "wss://mod.example/ctl/stream?token=s3cret"
        );
    }

    #[test]
    fn bad_base_url() {
        assert!(matches!(
            endpoint("not a url", &["x"]),
            Err(ClientError::Connection(_))
        ));
    }
}
