//! REST API Client
//!
//! Bearer-authenticated calls against the trading API: market data
//! snapshots, orders, positions, trades, strategy statistics and signals.
//!
//! Every call returns an [`ApiResponse`] carrying the HTTP status, the raw
//! body and the parsed payload. A body that fails to parse keeps the parse
//! error next to the raw text. An HTTP 401 triggers one token refresh and
//! one retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::application::ports::{AuthError, TokenProvider};
use crate::application::services::DirectoryHandle;
use crate::domain::instrument::{BatchError, InstrumentId, InstrumentRef};

/// Timeout for one REST request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Error Types
// =============================================================================

/// REST client errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or its body not read.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No access token could be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// An instrument argument could not be resolved.
    #[error("instrument resolution failed: {0}")]
    Resolution(#[from] BatchError),
}

// =============================================================================
// Response
// =============================================================================

/// Outcome of one REST call.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
    /// Parsed body, if it parsed.
    pub payload: Option<T>,
    /// Why the body did not parse, if it did not.
    pub parse_error: Option<String>,
    /// Response headers.
    pub headers: HashMap<String, String>,
}

impl<T> ApiResponse<T> {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    fn parse(status: StatusCode, headers: HashMap<String, String>, body: String) -> Self {
        let (payload, parse_error) = if body.trim().is_empty() {
            (None, None)
        } else {
            match serde_json::from_str(&body) {
                Ok(payload) => (Some(payload), None),
                Err(error) => (None, Some(error.to_string())),
            }
        };
        Self {
            status: status.as_u16(),
            body,
            payload,
            parse_error,
            headers,
        }
    }
}

// =============================================================================
// REST Client
// =============================================================================

/// Client for the trading REST API.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    directory: DirectoryHandle,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Create a client for the given API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        directory: DirectoryHandle,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            directory,
        })
    }

    /// Send one request, refreshing the token and retrying once on 401.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport or token failures. HTTP error
    /// statuses are returned as responses, not errors.
    pub async fn request<T, B>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        query: &[(&str, String)],
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut token = self.tokens.access_token().await?;
        let mut retried = false;

        loop {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "*/*");
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            tracing::debug!(%method, endpoint, "Sending API request");
            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !retried {
                tracing::warn!(endpoint, "Access token expired, refreshing and retrying");
                token = self.tokens.refresh().await?;
                retried = true;
                continue;
            }

            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();
            let text = response.text().await?;

            if !status.is_success() {
                tracing::warn!(endpoint, status = status.as_u16(), "API request failed");
            }
            return Ok(ApiResponse::parse(status, headers, text));
        }
    }

    fn resolve_ids<I, T>(&self, items: I) -> Result<Vec<InstrumentId>, BatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let items: Vec<InstrumentRef> = items.into_iter().map(Into::into).collect();
        self.directory.load().resolve_all(&items)
    }

    // -------------------------------------------------------------------------
    // Market Data
    // -------------------------------------------------------------------------

    /// Last traded prices for instruments.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if an instrument cannot be resolved or the call fails.
    pub async fn ltp<I, T>(&self, instruments: I) -> Result<ApiResponse<Value>, ApiError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let ids = self.resolve_ids(instruments)?;
        self.request(Method::POST, "marketfeed/ltp", Some(&json!({ "InstrumentIds": ids })), &[])
            .await
    }

    /// Full quotes for instruments.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if an instrument cannot be resolved or the call fails.
    pub async fn quote<I, T>(&self, instruments: I) -> Result<ApiResponse<Value>, ApiError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let ids = self.resolve_ids(instruments)?;
        self.request(Method::POST, "marketfeed/quote", Some(&json!({ "InstrumentIds": ids })), &[])
            .await
    }

    /// Option chain for an underlying symbol and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn option_chain(
        &self,
        symbol: &str,
        expiry_date: &str,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let body = json!({ "symbol": symbol, "expiryDate": expiry_date });
        self.request(Method::POST, "marketfeed/optionChain", Some(&body), &[])
            .await
    }

    /// Historical data for one instrument.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the instrument cannot be resolved or the call fails.
    pub async fn historical_data(
        &self,
        instrument: impl Into<InstrumentRef>,
        from: &str,
        to: &str,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let ids = self.resolve_ids([instrument.into()])?;
        let body = json!({ "Instrument": ids.first(), "from": from, "to": to });
        self.request(Method::POST, "marketfeed/historicalData", Some(&body), &[])
            .await
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// All orders.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn orders(&self) -> Result<ApiResponse<Value>, ApiError> {
        tracing::info!("Fetching all orders");
        self.request::<Value, Value>(Method::GET, "orders", None, &[]).await
    }

    /// One order by its platform id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn order_by_id(&self, order_id: i64) -> Result<ApiResponse<Value>, ApiError> {
        tracing::info!(order_id, "Fetching order");
        self.request::<Value, Value>(Method::GET, &format!("orders/{order_id}"), None, &[])
            .await
    }

    /// Place an order.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn place_order<B: Serialize + ?Sized>(
        &self,
        order: &B,
    ) -> Result<ApiResponse<Value>, ApiError> {
        tracing::info!("Placing order");
        self.request(Method::POST, "orders/placeOrder", Some(order), &[])
            .await
    }

    /// Modify an open order.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn modify_order<B: Serialize + ?Sized>(
        &self,
        order: &B,
    ) -> Result<ApiResponse<Value>, ApiError> {
        tracing::info!("Modifying order");
        self.request(Method::PUT, "orders/modifyOrder", Some(order), &[])
            .await
    }

    /// Cancel an order.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn cancel_order(
        &self,
        instrument_id: InstrumentId,
        exchange_order_id: i64,
    ) -> Result<ApiResponse<Value>, ApiError> {
        tracing::info!(instrument_id, exchange_order_id, "Cancelling order");
        let query = [
            ("instrumentId", instrument_id.to_string()),
            ("exchangeOrderId", exchange_order_id.to_string()),
        ];
        self.request::<Value, Value>(Method::DELETE, "orders/cancelOrder", None, &query)
            .await
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Publish a strategy signal.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn send_signal<B: Serialize + ?Sized>(
        &self,
        signal: &B,
    ) -> Result<ApiResponse<Value>, ApiError> {
        tracing::info!("Sending signal");
        self.request(Method::POST, "signals", Some(signal), &[]).await
    }

    // -------------------------------------------------------------------------
    // Positions, Trades, Statistics
    // -------------------------------------------------------------------------

    /// All positions.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn positions(&self) -> Result<ApiResponse<Value>, ApiError> {
        self.request::<Value, Value>(Method::GET, "positions", None, &[]).await
    }

    /// All trades.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn trades(&self) -> Result<ApiResponse<Value>, ApiError> {
        self.request::<Value, Value>(Method::GET, "trades", None, &[]).await
    }

    /// Strategy statistics.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails.
    pub async fn statistics(&self) -> Result<ApiResponse<Value>, ApiError> {
        self.request::<Value, Value>(Method::GET, "strategy/statistics", None, &[])
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::application::ports::{MockTokenProvider, StaticToken};
    use crate::domain::instrument::{InstrumentDirectory, InstrumentRecord};

    fn directory() -> DirectoryHandle {
        DirectoryHandle::new(InstrumentDirectory::from_records([
            InstrumentRecord::new("NSECM", "RELIANCE", 100),
            InstrumentRecord::new("NSECM", "TCS", 200),
        ]))
    }

    fn client(server: &MockServer) -> RestClient {
        RestClient::new(&server.uri(), Arc::new(StaticToken::new("tok")), directory()).unwrap()
    }

    #[tokio::test]
    async fn ltp_resolves_instruments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/marketfeed/ltp"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({ "InstrumentIds": [100, 200] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ltp": 2450.5 })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server)
            .ltp(["NSECM|RELIANCE|EQ", "200"])
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.payload, Some(json!({ "ltp": 2450.5 })));
        assert!(response.parse_error.is_none());
    }

    #[tokio::test]
    async fn unresolvable_instrument_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server).quote(["NSECM|UNKNOWN"]).await.unwrap_err();
        assert!(matches!(err, ApiError::Resolution(_)));
    }

    #[tokio::test]
    async fn parse_failure_keeps_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("not json")
                    .insert_header("x-request-id", "abc"),
            )
            .mount(&server)
            .await;

        let response = client(&server).positions().await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "not json");
        assert!(response.payload.is_none());
        assert!(response.parse_error.is_some());
        assert_eq!(response.headers.get("x-request-id").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/42"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "not found" })))
            .mount(&server)
            .await;

        let response = client(&server).order_by_id(42).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.payload, Some(json!({ "error": "not found" })));
    }

    #[tokio::test]
    async fn cancel_order_uses_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/orders/cancelOrder"))
            .and(query_param("instrumentId", "100"))
            .and(query_param("exchangeOrderId", "7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server).cancel_order(100, 7).await.unwrap();
        assert!(response.payload.is_none());
        assert!(response.parse_error.is_none());
    }

    #[tokio::test]
    async fn send_signal_posts_body() {
        let server = MockServer::start().await;
        let signal = json!({ "instrumentId": 100, "side": "BUY", "price": 2450.5 });
        Mock::given(method("POST"))
            .and(path("/signals"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(signal.clone()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "sig-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server).send_signal(&signal).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.status, 201);
        assert_eq!(response.payload, Some(json!({ "id": "sig-1" })));
    }

    #[tokio::test]
    async fn unauthorized_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trades"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trades"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_access_token()
            .times(1)
            .returning(|| Ok("stale".to_string()));
        tokens
            .expect_refresh()
            .times(1)
            .returning(|| Ok("fresh".to_string()));
        let client = RestClient::new(&server.uri(), Arc::new(tokens), directory()).unwrap();

        let response = client.trades().await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.payload, Some(json!([])));
    }

    #[tokio::test]
    async fn second_unauthorized_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/strategy/statistics"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_access_token()
            .returning(|| Ok("a".to_string()));
        tokens.expect_refresh().times(1).returning(|| Ok("b".to_string()));
        let client = RestClient::new(&server.uri(), Arc::new(tokens), directory()).unwrap();

        let response = client.statistics().await.unwrap();
        assert_eq!(response.status, 401);
    }
}
