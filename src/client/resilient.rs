//! Authenticated client with bounded retry and failure classification

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::auth::TokenProvider;
use super::envelope::Envelope;
use super::transport::{ApiRequest, HttpTransport, RawResponse, Transport, TransportError};
use crate::failure::{AuthFailure, Failure, NetworkFailure, Result};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection and retry settings for a [`ResilientClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Proxy base address, e.g. `https://proxy.example.edu/api`
    pub base_url: String,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub receive_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    /// Default timeouts, retries and backoff against `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: DEFAULT_TIMEOUT,
            send_timeout: DEFAULT_TIMEOUT,
            receive_timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            user_agent: concat!("lmsfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Sets the connect, send and receive timeouts
    pub fn with_timeouts(mut self, connect: Duration, send: Duration, receive: Duration) -> Self {
        self.connect_timeout = connect;
        self.send_timeout = send;
        self.receive_timeout = receive;
        self
    }

    /// Retries after the first attempt; `0` disables retrying
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the first retry, doubled for each later one
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

/// Successful, unwrapped proxy response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// The envelope's `data`
    pub data: Value,
    pub etag: Option<String>,
}

/// Transport wrapper that authenticates, retries and classifies failures
///
/// Each request pulls a token from the [`TokenProvider`] once and attaches it as
/// `Authorization: Bearer <token>` when it is non-empty. Connection failures,
/// timeouts, 429 and 5xx are retried up to `max_retries` times with pure exponential
/// backoff; every other outcome is final. Exhausted retries surface the last
/// attempt's failure.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    max_retries: u32,
    base_delay: Duration,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Client over HTTP using `config`
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_transport(Arc::new(transport), tokens, config))
    }

    /// Client over any transport; only the retry settings of `config` are used
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            tokens,
            max_retries: config.max_retries,
            base_delay: config.base_delay,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.request(ApiRequest::post(path, body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.request(ApiRequest::put(path, body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(ApiRequest::delete(path)).await
    }

    /// Executes `request` and decodes the envelope's `data` into `T`
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let path = request.path.clone();
        let response = self.execute(request).await?;
        serde_json::from_value(response.data).map_err(|e| {
            Failure::unknown(format!("unexpected data from '{}': {}", path, e))
        })
    }

    /// Executes `request` with authentication and retries
    ///
    /// The bearer token is fetched once and attached to every attempt. Retryable
    /// failures (no connection, timeout, 5xx, 429) are retried up to `max_retries`
    /// times with exponential backoff; anything else ends the call immediately.
    ///
    /// # Arguments
    /// * `request` - Method, path below the base URL, query, body and extra headers
    ///
    /// # Returns
    /// * `Ok(ApiResponse)` with the envelope's `data` and the response ETag on a 2xx
    ///   `success: true` reply
    /// * `Err` with the last attempt's failure otherwise
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request = self.authorize(request).await;
        let mut retry = 0;

        loop {
            let attempt = retry + 1;
            debug!(method = %request.method, path = %request.path, attempt, "sending request");

            let failure = match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            if !failure.is_retryable() || retry >= self.max_retries {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    attempts = attempt,
                    error = %failure,
                    "request failed"
                );
                return Err(failure);
            }

            retry += 1;
            let delay = backoff_delay(self.base_delay, retry);
            warn!(
                path = %request.path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn authorize(&self, request: ApiRequest) -> ApiRequest {
        match self.tokens.token().await {
            Ok(Some(token)) if !token.is_empty() => {
                request.with_header("Authorization", format!("Bearer {}", token))
            }
            Ok(_) => request,
            Err(failure) => {
                warn!(error = %failure, "token provider failed; sending unauthenticated");
                request
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse> {
        match self.transport.send(request).await {
            Ok(response) => interpret(response),
            Err(error) => Err(transport_failure(error)),
        }
    }
}

fn transport_failure(error: TransportError) -> Failure {
    match error {
        TransportError::Timeout(detail) => Failure::network(NetworkFailure::Timeout, detail),
        TransportError::Connect(detail) => Failure::network(NetworkFailure::NoConnection, detail),
        TransportError::Tls(detail) => Failure::network(NetworkFailure::SslError, detail),
        TransportError::Other(detail) => Failure::unknown(detail),
    }
}

/// Maps a response to an [`ApiResponse`] or a classified failure
fn interpret(response: RawResponse) -> Result<ApiResponse> {
    let status = response.status;
    if (200..300).contains(&status) {
        let data = Envelope::parse(&response.body)?.into_data()?;
        return Ok(ApiResponse {
            status,
            data,
            etag: response.header("etag").map(str::to_string),
        });
    }

    let message = error_message(&response);
    let failure = match status {
        401 => Failure::auth(AuthFailure::InvalidToken, message),
        403 => Failure::auth(AuthFailure::InsufficientPermissions, message),
        429 => {
            let failure = Failure::network(NetworkFailure::RateLimited, message);
            match response.header("retry-after") {
                Some(retry_after) => failure.with_details(json!({ "retryAfter": retry_after })),
                None => failure,
            }
        }
        400..=499 => Failure::network(NetworkFailure::ClientError(status), message),
        s if s >= 500 => Failure::network(NetworkFailure::ServerError(status), message),
        _ => Failure::unknown(message),
    };
    Err(merge_details(failure, json!({ "status": status })))
}

/// Prefers the envelope's `error`, falls back to the status line
fn error_message(response: &RawResponse) -> String {
    Envelope::parse(&response.body)
        .ok()
        .and_then(|envelope| envelope.error)
        .unwrap_or_else(|| format!("HTTP {}", response.status))
}

/// Adds keys from `extra` to the failure's details without overwriting existing ones
fn merge_details(mut failure: Failure, extra: Value) -> Failure {
    match (&mut failure.details, extra) {
        (Some(Value::Object(existing)), Value::Object(extra)) => {
            for (key, value) in extra {
                existing.entry(key).or_insert(value);
            }
        }
        (None, extra) => failure.details = Some(extra),
        _ => {}
    }
    failure
}
