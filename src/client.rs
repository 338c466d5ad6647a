//! HTTP client module for the log-aggregation API.
//!
//! This module defines the [`LogsApi`] seam used by the inventory and the
//! event fetcher, and an async HTTP implementation speaking the CloudWatch
//! Logs JSON 1.1 protocol with connection pooling, retry logic with
//! exponential backoff, and proper error handling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::model::{Event, EventPage, EventsQuery, GroupDescriptor, StreamDescriptor};

/// Default base delay for exponential backoff (in milliseconds).
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Maximum delay between retries (in milliseconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Prefix of the `X-Amz-Target` header for every action.
const TARGET_PREFIX: &str = "Logs_20140328";

/// Error type reported with HTTP 400 when a call is throttled.
const THROTTLING_ERROR: &str = "ThrottlingException";

/// Content type of the JSON 1.1 protocol.
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code
    Status {
        code: StatusCode,
        message: String,
    },

    /// Failed to parse response body
    Parse(String),

    /// All retry attempts exhausted
    RetriesExhausted {
        attempts: u32,
        last_error: String,
    },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "All {} retry attempts exhausted. Last error: {}",
                    attempts, last_error
                )
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Operations the mirror needs from the log-aggregation service.
///
/// Implementations must be safe to share across concurrently running poll
/// tasks.
#[async_trait]
pub trait LogsApi: Send + Sync {
    /// List every group in the account.
    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>, ClientError>;

    /// List every stream of the named group.
    async fn list_streams(&self, group_name: &str) -> Result<Vec<StreamDescriptor>, ClientError>;

    /// Fetch one page of events.
    async fn get_events(&self, query: &EventsQuery) -> Result<EventPage, ClientError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsResponse {
    #[serde(default)]
    log_groups: Vec<GroupDescriptor>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<StreamDescriptor>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    start_time: i64,
    end_time: i64,
    limit: usize,
    start_from_head: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

impl<'a> From<&'a EventsQuery> for GetLogEventsRequest<'a> {
    fn from(query: &'a EventsQuery) -> Self {
        Self {
            log_group_name: &query.group_name,
            log_stream_name: &query.stream_name,
            start_time: query.start_time,
            end_time: query.end_time,
            limit: query.limit,
            start_from_head: true,
            next_token: query.next_token.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsResponse {
    #[serde(default)]
    events: Vec<Event>,
    #[serde(default)]
    next_forward_token: Option<String>,
}

/// HTTP client for the log-aggregation API.
///
/// The client uses connection pooling (via reqwest's internal pool),
/// implements retry logic with exponential backoff, and respects
/// configured timeouts. One instance is shared by every poll task.
///
/// # Example
///
/// ```no_run
/// use log_mirror::client::{HttpLogsClient, LogsApi};
/// use log_mirror::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let client = HttpLogsClient::new(&config).expect("Failed to create client");
///
///     match client.list_groups().await {
///         Ok(groups) => println!("Found {} groups", groups.len()),
///         Err(e) => eprintln!("Failed to list groups: {}", e),
///     }
/// }
/// ```
pub struct HttpLogsClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Service endpoint every action is posted to
    endpoint: String,

    /// Maximum number of retry attempts
    max_retries: u32,

    /// Request timeout duration
    timeout: Duration,
}

impl HttpLogsClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(&config.api_url, config.request_timeout, config.max_retries)
    }

    /// Create a new client with custom settings.
    pub fn with_settings(
        endpoint: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_retries,
            timeout,
        })
    }

    /// Invoke one API action, retrying transient failures.
    ///
    /// # Retryable Errors
    ///
    /// - Network connection errors
    /// - Request timeouts
    /// - Server errors (5xx status codes) and throttling (429, or a 400
    ///   carrying `ThrottlingException`)
    ///
    /// Client errors (other 4xx) and parse errors fail immediately. When
    /// every attempt fails with a retryable error the result is
    /// `ClientError::RetriesExhausted`.
    async fn call<Req, Resp>(&self, action: &str, body: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        // Stable across retries so the service can correlate attempts
        let invocation_id = Uuid::new_v4();

        debug!(
            action = action,
            invocation_id = %invocation_id,
            endpoint = %self.endpoint,
            "Calling log API"
        );

        let mut last_error: Option<ClientError> = None;
        let mut attempt = 0;

        while attempt <= self.max_retries {
            if attempt > 0 {
                let delay = self.calculate_backoff_delay(attempt);
                warn!(
                    action = action,
                    attempt = attempt,
                    max_retries = self.max_retries,
                    delay_ms = delay.as_millis(),
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_request(action, invocation_id, body).await {
                Ok(response) => return Ok(response),
                Err(e) if !self.is_retryable_error(&e) => {
                    error!(
                        action = action,
                        error = %e,
                        attempts = attempt + 1,
                        "Request failed permanently"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        action = action,
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        "Request failed"
                    );
                    last_error = Some(e);
                    attempt += 1;
                }
            }
        }

        error!(
            action = action,
            attempts = attempt,
            "Request failed, retries exhausted"
        );

        let last_error_msg = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());

        Err(ClientError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error: last_error_msg,
        })
    }

    /// Send a single HTTP request without retry logic.
    async fn send_request<Req, Resp>(
        &self,
        action: &str,
        invocation_id: Uuid,
        body: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| ClientError::Parse(e.to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .header("amz-sdk-invocation-id", invocation_id.to_string())
            .body(payload)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Calculate the backoff delay for a given retry attempt.
    ///
    /// Uses exponential backoff with jitter:
    /// delay = min(base_delay * 2^attempt + jitter, max_delay)
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base_delay = DEFAULT_BASE_DELAY_MS;

        let exponential_delay = base_delay.saturating_mul(1 << attempt.min(10));

        // Add jitter (up to 25% of the delay)
        let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);

        let total_delay = exponential_delay.saturating_add(jitter).min(MAX_RETRY_DELAY_MS);

        Duration::from_millis(total_delay)
    }

    /// Check if an error is retryable.
    fn is_retryable_error(&self, error: &ClientError) -> bool {
        match error {
            ClientError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClientError::Timeout => true,
            ClientError::Status { code, message } => {
                code.is_server_error()
                    || *code == StatusCode::TOO_MANY_REQUESTS
                    || (*code == StatusCode::BAD_REQUEST && message.contains(THROTTLING_ERROR))
            }
            ClientError::Parse(_) => false,
            ClientError::RetriesExhausted { .. } => false,
            ClientError::Config(_) => false,
        }
    }

    /// Get the configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Whether a listing should continue with `next`, given the token just sent.
fn continues(sent: Option<&str>, next: Option<&str>) -> bool {
    match next {
        Some(token) if !token.is_empty() => sent != Some(token),
        _ => false,
    }
}

#[async_trait]
impl LogsApi for HttpLogsClient {
    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>, ClientError> {
        let mut groups = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let request = DescribeLogGroupsRequest {
                next_token: token.as_deref(),
            };
            let response: DescribeLogGroupsResponse =
                self.call("DescribeLogGroups", &request).await?;
            groups.extend(response.log_groups);

            if !continues(token.as_deref(), response.next_token.as_deref()) {
                break;
            }
            token = response.next_token;
        }

        Ok(groups)
    }

    async fn list_streams(&self, group_name: &str) -> Result<Vec<StreamDescriptor>, ClientError> {
        let mut streams = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let request = DescribeLogStreamsRequest {
                log_group_name: group_name,
                next_token: token.as_deref(),
            };
            let response: DescribeLogStreamsResponse =
                self.call("DescribeLogStreams", &request).await?;
            streams.extend(response.log_streams);

            if !continues(token.as_deref(), response.next_token.as_deref()) {
                break;
            }
            token = response.next_token;
        }

        Ok(streams)
    }

    async fn get_events(&self, query: &EventsQuery) -> Result<EventPage, ClientError> {
        let request = GetLogEventsRequest::from(query);
        let response: GetLogEventsResponse = self.call("GetLogEvents", &request).await?;

        Ok(EventPage {
            events: response.events,
            next_token: response.next_forward_token,
        })
    }
}
