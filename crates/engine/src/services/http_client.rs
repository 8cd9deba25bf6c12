//! Outbound HTTP dispatch.
//!
//! Builds requests from project metadata, injects cached auth tokens and
//! retries retryable status codes with a linear backoff.

use domain::models::{AuthDescriptor, EndpointMeta, ProjectMeta, ProjectType};
use reqwest::{Client, Method};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::EngineError;
use crate::services::token_cache::{TokenCache, TokenCacheKey};

/// Methods whose requests never carry a body.
const BODYLESS_METHODS: [&str; 3] = ["GET", "HEAD", "OPTIONS"];

/// Retry policy for a single outbound request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_delay_ms: u64,
    pub retry_on_429: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_delay_ms: config.backoff_delay_ms,
            retry_on_429: config.retry_on_429,
        }
    }

    /// Whether the status code is worth another attempt.
    pub fn is_retryable(&self, status: u16) -> bool {
        matches!(status, 500 | 502 | 503 | 504) || (self.retry_on_429 && status == 429)
    }

    /// Linear backoff: attempt 1 waits one base delay, attempt 2 waits two.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_delay_ms * u64::from(attempt))
    }
}

/// A fully resolved request, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// Outcome of one dispatched request, after retries.
#[derive(Debug, Clone)]
pub struct HttpOutcome {
    pub status_code: u16,
    pub body: Option<String>,
    pub execution_time_ms: i64,
    pub attempts: u32,
}

impl HttpOutcome {
    /// 2xx means the row counts as successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Resolve endpoint metadata and a body into a dispatchable request.
///
/// SOAP endpoints get a text/xml content type and their SOAPAction header;
/// REST endpoints default to JSON content and accept headers, but only
/// when a body goes out. Explicit project headers always win and an
/// already-present auth header is never overwritten.
pub fn prepare_request(
    project_type: ProjectType,
    meta: &ProjectMeta,
    endpoint: &EndpointMeta,
    body: Option<String>,
    token: Option<&str>,
) -> PreparedRequest {
    let url = format!(
        "{}/{}",
        meta.base_url.trim_end_matches('/'),
        endpoint.path.trim_start_matches('/')
    );

    let method = endpoint.method.to_uppercase();
    let body = if BODYLESS_METHODS.contains(&method.as_str()) {
        None
    } else {
        body
    };

    let mut headers = BTreeMap::new();
    match project_type {
        ProjectType::Soap => {
            headers.insert("Content-Type".to_string(), "text/xml; charset=utf-8".to_string());
            if let Some(action) = &endpoint.soap_action {
                headers.insert("SOAPAction".to_string(), action.clone());
            }
        }
        ProjectType::Rest => {
            if body.is_some() {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                headers.insert("Accept".to_string(), "application/json".to_string());
            }
        }
    }
    for (key, value) in &meta.headers {
        headers.insert(key.clone(), value.clone());
    }

    if let (Some(auth), Some(token)) = (&meta.auth, token) {
        headers
            .entry(auth.header_key.clone())
            .or_insert_with(|| token_header_value(&auth.header_key, token));
    }

    PreparedRequest {
        method,
        url,
        headers,
        query_params: meta.query_params.clone(),
        body,
    }
}

/// Authorization headers carry a Bearer prefix; custom headers get the raw
/// token.
fn token_header_value(header_key: &str, token: &str) -> String {
    if header_key.eq_ignore_ascii_case("authorization") && !token.starts_with("Bearer ") {
        format!("Bearer {}", token)
    } else {
        token.to_string()
    }
}

/// Pull the token out of a token endpoint response.
///
/// Structured responses are read through the configured attribute; a plain
/// text response is taken verbatim.
fn extract_token(body: &str, token_attribute: &str) -> Result<String, EngineError> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map
            .get(token_attribute)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::Authentication(format!(
                    "Token response has no '{}' attribute",
                    token_attribute
                ))
            }),
        Ok(serde_json::Value::String(token)) => Ok(token),
        _ => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                Err(EngineError::Authentication(
                    "Token endpoint returned an empty body".to_string(),
                ))
            } else {
                Ok(trimmed.to_string())
            }
        }
    }
}

/// Read a reported token lifetime from a structured response, if any.
fn extract_expires_in(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("expires_in")?
        .as_u64()
}

/// HTTP dispatcher shared by all bulk executions.
pub struct HttpDispatcher {
    client: Client,
    token_cache: Arc<TokenCache>,
    // Per-identity locks; a cache miss triggers a single fetch even under
    // concurrent batches.
    fetch_locks: Mutex<HashMap<TokenCacheKey, Arc<Mutex<()>>>>,
    retry: RetryPolicy,
}

impl HttpDispatcher {
    pub fn new(config: &HttpConfig, token_cache: Arc<TokenCache>) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_cache,
            fetch_locks: Mutex::new(HashMap::new()),
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Get a token for the descriptor, from cache or the token endpoint.
    pub async fn acquire_token(&self, auth: &AuthDescriptor) -> Result<String, EngineError> {
        let key = TokenCacheKey::for_descriptor(auth);
        if let Some(token) = self.token_cache.get(&key).await {
            debug!(token_url = %auth.token_url, "Auth token cache hit");
            return Ok(token);
        }

        let fetch_lock = {
            let mut locks = self.fetch_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = fetch_lock.lock().await;

        // A concurrent fetch may have filled the cache while we waited.
        if let Some(token) = self.token_cache.get(&key).await {
            debug!(token_url = %auth.token_url, "Auth token fetched by concurrent caller");
            return Ok(token);
        }

        let response = self
            .client
            .post(&auth.token_url)
            .json(&auth.payload)
            .send()
            .await
            .map_err(|e| {
                EngineError::Authentication(format!("Token endpoint unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Authentication(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let body = response.text().await.map_err(|e| {
            EngineError::Authentication(format!("Failed to read token response: {}", e))
        })?;

        let token = extract_token(&body, &auth.token_attribute)?;
        let ttl = extract_expires_in(&body).map(Duration::from_secs);
        self.token_cache.insert(key, token.clone(), ttl).await;

        debug!(token_url = %auth.token_url, "Fetched and cached auth token");
        Ok(token)
    }

    /// Dispatch a prepared request, retrying retryable failures.
    ///
    /// Transport errors and retryable status codes consume retry budget;
    /// any received response, success or not, is returned as an outcome so
    /// the caller records it against the row.
    pub async fn execute(&self, request: &PreparedRequest) -> Result<HttpOutcome, EngineError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| EngineError::Validation(format!("Invalid method: {}", request.method)))?;

        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let mut builder = self
                .client
                .request(method.clone(), &request.url)
                .query(&request.query_params);
            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if self.retry.is_retryable(status) && attempt <= self.retry.max_retries {
                        let delay = self.retry.backoff_delay(attempt);
                        warn!(
                            url = %request.url,
                            status = status,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable status, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // A body read failure still yields a recordable outcome.
                    let body = response.text().await.ok();
                    return Ok(HttpOutcome {
                        status_code: status,
                        body,
                        execution_time_ms: start.elapsed().as_millis() as i64,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    if attempt <= self.retry.max_retries {
                        let delay = self.retry.backoff_delay(attempt);
                        warn!(
                            url = %request.url,
                            attempt = attempt,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Transport error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(EngineError::External(format!(
                        "Request to {} failed after {} attempts: {}",
                        request.url, attempt, e
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(auth: bool) -> ProjectMeta {
        let mut value = json!({
            "baseUrl": "https://api.example.com/",
            "headers": {"X-Tenant": "acme"},
            "queryParams": {"version": "2"}
        });
        if auth {
            value["auth"] = json!({
                "tokenUrl": "https://idp.example.com/token",
                "payload": {"grant_type": "client_credentials"}
            });
        }
        serde_json::from_value(value).unwrap()
    }

    fn endpoint(method: &str) -> EndpointMeta {
        EndpointMeta {
            name: "createOrder".to_string(),
            method: method.to_string(),
            path: "/orders".to_string(),
            soap_action: None,
        }
    }

    fn default_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_delay_ms: 1000,
            retry_on_429: false,
        }
    }

    #[test]
    fn test_retryable_statuses() {
        let policy = default_policy();
        for status in [500, 502, 503, 504] {
            assert!(policy.is_retryable(status), "{} should be retryable", status);
        }
        for status in [200, 201, 400, 401, 404, 409, 429, 501] {
            assert!(!policy.is_retryable(status), "{} should not be retryable", status);
        }
    }

    #[test]
    fn test_retry_on_429_opt_in() {
        let policy = RetryPolicy {
            retry_on_429: true,
            ..default_policy()
        };
        assert!(policy.is_retryable(429));
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = default_policy();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_prepare_request_rest_defaults() {
        let request = prepare_request(
            ProjectType::Rest,
            &meta(false),
            &endpoint("post"),
            Some(r#"{"a":1}"#.to_string()),
            None,
        );

        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "https://api.example.com/orders");
        assert_eq!(
            request.headers.get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(request.headers.get("Accept").unwrap(), "application/json");
        assert_eq!(request.headers.get("X-Tenant").unwrap(), "acme");
        assert_eq!(request.query_params.get("version").unwrap(), "2");
        assert_eq!(request.body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_prepare_request_soap_headers() {
        let mut ep = endpoint("POST");
        ep.soap_action = Some("urn:createOrder".to_string());

        let request = prepare_request(ProjectType::Soap, &meta(false), &ep, None, None);

        assert_eq!(
            request.headers.get("Content-Type").unwrap(),
            "text/xml; charset=utf-8"
        );
        assert_eq!(request.headers.get("SOAPAction").unwrap(), "urn:createOrder");
    }

    #[test]
    fn test_prepare_request_strips_body_for_get() {
        let request = prepare_request(
            ProjectType::Rest,
            &meta(false),
            &endpoint("GET"),
            Some(r#"{"a":1}"#.to_string()),
            None,
        );
        assert!(request.body.is_none());
        // No body, no content negotiation defaults.
        assert!(!request.headers.contains_key("Content-Type"));
        assert!(!request.headers.contains_key("Accept"));
    }

    #[test]
    fn test_prepare_request_bodyless_post_gets_no_json_headers() {
        let request = prepare_request(ProjectType::Rest, &meta(false), &endpoint("POST"), None, None);
        assert!(!request.headers.contains_key("Content-Type"));
        assert!(!request.headers.contains_key("Accept"));
    }

    #[test]
    fn test_prepare_request_injects_bearer_token() {
        let request = prepare_request(
            ProjectType::Rest,
            &meta(true),
            &endpoint("POST"),
            None,
            Some("tok-123"),
        );
        assert_eq!(
            request.headers.get("Authorization").unwrap(),
            "Bearer tok-123"
        );
    }

    #[test]
    fn test_prepare_request_keeps_explicit_auth_header() {
        let mut project_meta = meta(true);
        project_meta
            .headers
            .insert("Authorization".to_string(), "Basic abc".to_string());

        let request = prepare_request(
            ProjectType::Rest,
            &project_meta,
            &endpoint("POST"),
            None,
            Some("tok-123"),
        );
        assert_eq!(request.headers.get("Authorization").unwrap(), "Basic abc");
    }

    #[test]
    fn test_token_header_value_custom_header_is_raw() {
        assert_eq!(token_header_value("X-Api-Token", "tok"), "tok");
        assert_eq!(token_header_value("Authorization", "tok"), "Bearer tok");
        assert_eq!(
            token_header_value("Authorization", "Bearer tok"),
            "Bearer tok"
        );
    }

    #[test]
    fn test_extract_token_from_object() {
        let body = r#"{"access_token": "tok-1", "expires_in": 3600}"#;
        assert_eq!(extract_token(body, "access_token").unwrap(), "tok-1");
        assert_eq!(extract_expires_in(body), Some(3600));
    }

    #[test]
    fn test_extract_token_missing_attribute() {
        let body = r#"{"token": "tok-1"}"#;
        let err = extract_token(body, "access_token").unwrap_err();
        assert!(matches!(err, EngineError::Authentication(_)));
    }

    #[test]
    fn test_extract_token_raw_text() {
        assert_eq!(extract_token("  raw-token \n", "access_token").unwrap(), "raw-token");
        assert!(extract_token("   ", "access_token").is_err());
    }

    #[test]
    fn test_outcome_success_range() {
        let mut outcome = HttpOutcome {
            status_code: 204,
            body: None,
            execution_time_ms: 5,
            attempts: 1,
        };
        assert!(outcome.is_success());
        outcome.status_code = 404;
        assert!(!outcome.is_success());
    }

    const UNAVAILABLE_RESPONSE: &str =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const OK_RESPONSE: &str =
        "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";

    /// Serve one canned response per connection, then stop accepting.
    async fn serve_responses(responses: &'static [&'static str]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    fn fast_config() -> HttpConfig {
        HttpConfig {
            request_timeout_secs: 5,
            max_retries: 2,
            backoff_delay_ms: 10,
            retry_on_429: false,
        }
    }

    fn get_request(url: String) -> PreparedRequest {
        PreparedRequest {
            method: "GET".to_string(),
            url,
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_execute_exhausts_retry_budget_on_503() {
        let url = serve_responses(&[UNAVAILABLE_RESPONSE; 3]).await;
        let dispatcher =
            HttpDispatcher::new(&fast_config(), Arc::new(TokenCache::default())).unwrap();

        let outcome = dispatcher.execute(&get_request(url)).await.unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status_code, 503);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_execute_recovers_after_retryable_status() {
        let url = serve_responses(&[UNAVAILABLE_RESPONSE, OK_RESPONSE]).await;
        let dispatcher =
            HttpDispatcher::new(&fast_config(), Arc::new(TokenCache::default())).unwrap();

        let outcome = dispatcher.execute(&get_request(url)).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_execute_returns_non_retryable_status_first_attempt() {
        const NOT_FOUND: &str =
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
        let url = serve_responses(&[NOT_FOUND]).await;
        let dispatcher =
            HttpDispatcher::new(&fast_config(), Arc::new(TokenCache::default())).unwrap();

        let outcome = dispatcher.execute(&get_request(url)).await.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.status_code, 404);
    }
}
