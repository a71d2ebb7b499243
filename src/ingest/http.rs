//! Shared HTTP plumbing for external fetches.

use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an external source (archive host, weather provider).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest_middleware::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("could not read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// Whether a later attempt may succeed (transient I/O), as opposed to a
    /// data or configuration problem that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { source, .. } => match source {
                reqwest_middleware::Error::Reqwest(err) => {
                    err.is_timeout() || err.is_connect() || err.is_request()
                }
                reqwest_middleware::Error::Middleware(_) => true,
            },
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Body { source, .. } => source.is_timeout(),
            FetchError::Decode { .. } | FetchError::Client(_) => false,
        }
    }
}

/// Client with a bounded timeout that retries transient failures with
/// exponential backoff.
pub fn retrying_client(
    timeout: Duration,
    max_retries: u32,
) -> Result<ClientWithMiddleware, FetchError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

    Ok(ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(policy))
        .build())
}

/// GET a URL and return the body bytes, mapping non-success statuses to
/// [`FetchError::Status`].
pub async fn get_bytes(
    client: &ClientWithMiddleware,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<Vec<u8>, FetchError> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request.send().await.map_err(|source| FetchError::Transport {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    let bytes = response.bytes().await.map_err(|source| FetchError::Body {
        url: url.to_string(),
        source,
    })?;
    Ok(bytes.to_vec())
}
