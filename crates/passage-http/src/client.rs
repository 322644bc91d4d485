//! HTTP client wrapper and response classification.
//!
//! This is the boundary where raw `reqwest` and `serde_json` failures are
//! mapped into the crate's error taxonomy; nothing above this module ever
//! sees a transport or parser error type.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use passage_core::error::{ApiError, AuthError, Error, ServerError, TransportError};
use passage_core::{AccessToken, ApiUrl};

/// Error body shape the API uses for non-success responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// HTTP client for API requests.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    base: ApiUrl,
}

impl HttpClient {
    /// Create a new client for the given API base URL.
    pub(crate) fn new(base: ApiUrl) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("passage/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self { client, base }
    }

    /// Returns the API base URL this client is configured for.
    pub(crate) fn base(&self) -> &ApiUrl {
        &self.base
    }

    /// Issue one request, attaching the bearer token when present.
    ///
    /// Only transport-level failures are errors here; any response,
    /// whatever its status, is returned for the caller to classify.
    pub(crate) async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        token: Option<&AccessToken>,
    ) -> Result<Response, Error> {
        let url = self.base.endpoint_url(endpoint);
        debug!(%method, endpoint, "API request");

        let mut request = self
            .client
            .request(method, &url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(headers) = headers {
            request = request.headers(headers.clone());
        }
        if let Some(token) = token {
            let auth_value = format!("Bearer {}", token.as_str());
            request = request.header(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value).expect("invalid token characters"),
            );
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(transport_error)
    }

    /// Parse a success response body.
    ///
    /// An empty body is a valid "no content" result, not a parse failure.
    pub(crate) async fn parse_body(&self, response: Response) -> Result<Option<Value>, Error> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        trace!(%status, bytes = text.len(), "API response");

        if text.is_empty() {
            return Ok(None);
        }

        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(Error::InvalidResponse(e.to_string())),
        }
    }

    /// Map a non-success response into the error taxonomy.
    ///
    /// 401 means the bearer token was rejected, 403 means authenticated
    /// but forbidden, 5xx is the server's problem, and anything else
    /// carries whatever error body the server produced.
    pub(crate) async fn fail(&self, response: Response) -> Error {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => AuthError::Unauthenticated.into(),
            StatusCode::FORBIDDEN => AuthError::PermissionDenied.into(),
            s if s.is_server_error() => {
                let body = read_error_body(response).await;
                ServerError {
                    status: s.as_u16(),
                    message: body.and_then(|b| b.message.or(b.error)),
                }
                .into()
            }
            s => {
                let body = read_error_body(response).await;
                let (error, message) = match body {
                    Some(body) => (body.error, body.message),
                    None => (None, None),
                };
                ApiError::new(s.as_u16(), error, message).into()
            }
        }
    }
}

/// Best-effort read of a structured error body. Non-JSON bodies are
/// dropped rather than surfaced as a second error.
async fn read_error_body(response: Response) -> Option<ErrorBody> {
    response.json::<ErrorBody>().await.ok()
}

/// Map a `reqwest` failure into the transport error family.
fn transport_error(err: reqwest::Error) -> Error {
    let transport = if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connection {
            message: err.to_string(),
        }
    } else {
        TransportError::Http {
            message: err.to_string(),
        }
    };
    Error::Network(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let base = ApiUrl::new("https://api.example.com").unwrap();
        let client = HttpClient::new(base.clone());
        assert_eq!(client.base().as_str(), base.as_str());
    }

    #[test]
    fn error_body_tolerates_missing_fields() {
        let body: ErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.error.is_none());
        assert!(body.message.is_none());

        let body: ErrorBody = serde_json::from_str(r#"{"error":"Conflict"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("Conflict"));
    }
}
