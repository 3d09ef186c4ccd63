//! Feed Authentication
//!
//! Obtains the access token used in the stream URL and as the bearer token
//! for REST calls.
//!
//! # Authentication Flow
//!
//! 1. POST `{auth-url}/api/app_login` with `{"appKey": "...", "userId": "..."}`
//! 2. Receive `{"status": "success", "data": {"accessToken": "..."}}`
//! 3. Cache the token until a caller asks for a refresh
//!
//! Any other status, an HTTP error, or a body without a token is an
//! [`AuthError`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::application::ports::{AuthError, TokenProvider};

// =============================================================================
// Constants
// =============================================================================

/// Timeout for one login request.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

const LOGIN_PATH: &str = "/api/app_login";

// =============================================================================
// Credentials
// =============================================================================

/// Application credentials for the login endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Application key.
    pub app_key: String,
    /// User identifier.
    pub user_id: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub fn new(app_key: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

// =============================================================================
// Wire Messages
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    app_key: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: Option<String>,
    message: Option<String>,
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    access_token: Option<String>,
}

// =============================================================================
// Auth Client
// =============================================================================

/// Logs in against the auth service and caches the access token.
pub struct AuthClient {
    http: reqwest::Client,
    login_url: String,
    credentials: Credentials,
    token: tokio::sync::Mutex<Option<String>>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("login_url", &self.login_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Create a client for the given auth base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(LOGIN_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    /// Create a client that shares an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            login_url: format!("{}{LOGIN_PATH}", base_url.trim_end_matches('/')),
            credentials,
            token: tokio::sync::Mutex::new(None),
        }
    }

    /// Perform one login request.
    async fn login(&self) -> Result<String, AuthError> {
        let request = LoginRequest {
            app_key: &self.credentials.app_key,
            user_id: &self.credentials.user_id,
        };

        let response = self
            .http
            .post(&self.login_url)
            .header(reqwest::header::ACCEPT, "*/*")
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if parsed.status.as_deref() != Some("success") {
            return Err(AuthError::LoginFailed(
                parsed.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let token = parsed
            .data
            .and_then(|data| data.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("missing data.accessToken".to_string()))?;

        tracing::info!(user_id = %self.credentials.user_id, "App login successful");
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for AuthClient {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        let mut cached = self.token.lock().await;
        *cached = None;
        let token = self.login().await?;
        *cached = Some(token.clone());
        tracing::debug!("Access token refreshed");
        Ok(token)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> AuthClient {
        AuthClient::new(&server.uri(), Credentials::new("key-1", "user-1")).unwrap()
    }

    fn success(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "accessToken": token }
        }))
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let debug = format!("{:?}", Credentials::new("super-secret", "user-1"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("user-1"));
    }

    #[tokio::test]
    async fn login_posts_credentials_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/app_login"))
            .and(body_json(json!({ "appKey": "key-1", "userId": "user-1" })))
            .respond_with(success("tok-1"))
            .expect(1)
            .mount(&server)
            .await;

        let auth = client(&server);
        assert_eq!(auth.access_token().await.unwrap(), "tok-1");
        assert_eq!(auth.access_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn refresh_logs_in_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/app_login"))
            .respond_with(success("tok-1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/app_login"))
            .respond_with(success("tok-2"))
            .mount(&server)
            .await;

        let auth = client(&server);
        assert_eq!(auth.access_token().await.unwrap(), "tok-1");
        assert_eq!(auth.refresh().await.unwrap(), "tok-2");
        assert_eq!(auth.access_token().await.unwrap(), "tok-2");
    }

    #[tokio::test]
    async fn failed_status_is_login_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "invalid app key"
            })))
            .mount(&server)
            .await;

        let err = client(&server).access_token().await.unwrap_err();
        assert_eq!(err, AuthError::LoginFailed("invalid app key".to_string()));
    }

    #[tokio::test]
    async fn http_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server).access_token().await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Rejected {
                status: 500,
                body: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_token_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {}
            })))
            .mount(&server)
            .await;

        let err = client(&server).access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }
}
