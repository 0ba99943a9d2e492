//! HTTP client implementation

use std::time::Duration;

use crm_api::ErrorResponse;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::authn::Credential;
use crate::errors::{DeployerError, RemoteError};

/// Wait applied to a 429 that carries no retry hint
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Longest response body quoted in an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the CRM REST API
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DeployerError> {
        Url::parse(base_url)
            .map_err(|e| DeployerError::ConfigError(format!("invalid CRM base URL '{base_url}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crmdeploy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &Credential,
    ) -> Result<T, RemoteError> {
        let response = self.send(self.request(Method::GET, path, credential)).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        credential: &Credential,
        body: &B,
    ) -> Result<T, RemoteError> {
        let request = self.request(Method::POST, path, credential).json(body);
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        credential: &Credential,
        body: &B,
    ) -> Result<T, RemoteError> {
        let request = self.request(Method::PATCH, path, credential).json(body);
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    /// Make a DELETE request, ignoring any response body
    pub async fn delete(&self, path: &str, credential: &Credential) -> Result<(), RemoteError> {
        self.send(self.request(Method::DELETE, path, credential))
            .await
            .map(|_| ())
    }

    fn request(&self, method: Method, path: &str, credential: &Credential) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, credential.bearer())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let retry_after = retry_after_from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();
        warn!("CRM request {} failed: {} - {}", url, status, truncate(&body));
        Err(classify_failure(status, retry_after, &body))
    }
}

/// Map a failed response onto the remote error taxonomy
pub fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("{}: {}", status, truncate(body)));

    if parsed
        .as_ref()
        .is_some_and(|e| e.category == "OBJECT_ALREADY_EXISTS")
    {
        return RemoteError::Conflict(message);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::CredentialInvalid(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout(message),
        s if s.is_server_error() => RemoteError::Unavailable(message),
        _ => RemoteError::Validation(message),
    }
}

/// Retry hint of a rate-limited response, `Retry-After` first
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    [header::RETRY_AFTER.as_str(), "x-ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.trim().parse::<u64>().ok())
        .map(|seconds| Duration::from_secs(seconds.max(1)))
        .next()
}

/// Encode a value for use as a single path segment
pub fn path_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn statuses_map_onto_remote_errors() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, None, ""),
            RemoteError::CredentialInvalid(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, None, ""),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::CONFLICT, None, ""),
            RemoteError::Conflict(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNPROCESSABLE_ENTITY, None, ""),
            RemoteError::Validation(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, None, ""),
            RemoteError::Unavailable(_)
        ));
        assert_eq!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, None, ""),
            RemoteError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }

    #[test]
    fn already_exists_category_is_a_conflict() {
        let body = r#"{"status":"error","message":"Property named 'tier' already exists.","category":"OBJECT_ALREADY_EXISTS"}"#;
        assert_eq!(
            classify_failure(StatusCode::BAD_REQUEST, None, body),
            RemoteError::Conflict("Property named 'tier' already exists.".to_string())
        );
    }

    #[test]
    fn retry_after_prefers_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("9"));
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_secs(9)));

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_secs(3)));

        assert_eq!(retry_after_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(path_segment("12345"), "12345");
        assert_eq!(path_segment("a/b c"), "a%2Fb+c");
    }
}
