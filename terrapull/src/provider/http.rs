//! HTTP transport abstraction and retry policy.
//!
//! [`HttpClient`] is the injectable transport seam: the real
//! [`ReqwestClient`] talks to the network, tests swap in mocks.
//! [`RetryingClient`] wraps any transport with bounded retries and
//! exponential backoff, retrying only transient server statuses and
//! transport failures; client errors (4xx) propagate immediately.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Provider-level failures, including transport and protocol errors.
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("export task '{id}' ended as {status}")]
    TaskFailed { id: String, status: String },
}

/// Status and body of one HTTP exchange. Non-2xx statuses are data here;
/// the retry layer decides what they mean.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for HTTP operations, allowing mock transports in tests.
pub trait HttpClient: Send + Sync {
    /// Performs a GET request, returning status and body.
    fn get(&self, url: &str) -> Result<HttpResponse, ProviderError>;

    /// Performs a POST request with a JSON body.
    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ProviderError>;
}

/// Retry and timeout parameters. Configuration inputs with documented
/// defaults: 5 retries, 0.3 backoff factor, transient server statuses only.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    pub retries: u32,
    /// Backoff delay is `backoff_factor * 2^(attempt - 1)` seconds.
    pub backoff_factor: f64,
    /// Statuses worth retrying; everything else propagates immediately.
    pub retry_statuses: Vec<u16>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_factor: 0.3,
            retry_statuses: vec![500, 502, 503, 504],
            timeout: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let seconds = self.backoff_factor * f64::powi(2.0, attempt as i32 - 1);
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Real transport backed by a blocking reqwest client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    fn read_response(
        url: &str,
        response: reqwest::blocking::Response,
    ) -> Result<HttpResponse, ProviderError> {
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| ProviderError::Transport {
                url: url.to_string(),
                message: format!("failed to read body: {}", e),
            })?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<HttpResponse, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ProviderError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Self::read_response(url, response)
    }

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ProviderError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| ProviderError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Self::read_response(url, response)
    }
}

/// A transport wrapped with the retry policy.
pub struct RetryingClient {
    transport: Box<dyn HttpClient>,
    config: RetryConfig,
}

impl RetryingClient {
    pub fn new(transport: Box<dyn HttpClient>, config: RetryConfig) -> Self {
        Self { transport, config }
    }

    /// GET with retries; returns the body of the first 2xx response.
    pub fn get(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.execute(url, |transport| transport.get(url))
    }

    /// POST a JSON body with retries; returns the body of the first 2xx
    /// response.
    pub fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, ProviderError> {
        self.execute(url, |transport| transport.post_json(url, body))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn execute(
        &self,
        url: &str,
        mut op: impl FnMut(&dyn HttpClient) -> Result<HttpResponse, ProviderError>,
    ) -> Result<Vec<u8>, ProviderError> {
        let attempts = self.config.retries + 1;
        let mut last: Option<ProviderError> = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.delay_for_attempt(attempt - 1);
                warn!(url, attempt, ?delay, "retrying request");
                thread::sleep(delay);
            }
            match op(self.transport.as_ref()) {
                Ok(response) if response.is_success() => {
                    debug!(url, bytes = response.body.len(), "request succeeded");
                    return Ok(response.body);
                }
                Ok(response) if self.config.retry_statuses.contains(&response.status) => {
                    last = Some(ProviderError::Status {
                        status: response.status,
                        url: url.to_string(),
                    });
                }
                Ok(response) => {
                    // non-transient status, not worth retrying
                    return Err(ProviderError::Status {
                        status: response.status,
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    last = Some(e);
                }
            }
        }
        Err(ProviderError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock transport yielding a scripted sequence of responses.
    pub struct SequenceClient {
        responses: Vec<Result<HttpResponse, ProviderError>>,
        calls: AtomicUsize,
    }

    impl SequenceClient {
        pub fn new(responses: Vec<Result<HttpResponse, ProviderError>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl HttpClient for SequenceClient {
        fn get(&self, url: &str) -> Result<HttpResponse, ProviderError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(i.min(self.responses.len() - 1))
                .cloned()
                .unwrap_or_else(|| {
                    Err(ProviderError::Transport {
                        url: url.to_string(),
                        message: "no scripted response".to_string(),
                    })
                })
        }

        fn post_json(
            &self,
            url: &str,
            _body: &serde_json::Value,
        ) -> Result<HttpResponse, ProviderError> {
            self.get(url)
        }
    }

    fn ok(body: &[u8]) -> Result<HttpResponse, ProviderError> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_vec(),
        })
    }

    fn status(code: u16) -> Result<HttpResponse, ProviderError> {
        Ok(HttpResponse {
            status: code,
            body: Vec::new(),
        })
    }

    fn fast_config(retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_retries(retries)
            .with_backoff_factor(0.0)
    }

    #[test]
    fn test_success_returns_body_without_retry() {
        let client = RetryingClient::new(
            Box::new(SequenceClient::new(vec![ok(b"payload")])),
            fast_config(3),
        );
        assert_eq!(client.get("http://svc/x").unwrap(), b"payload");
    }

    #[test]
    fn test_transient_status_is_retried_until_success() {
        let client = RetryingClient::new(
            Box::new(SequenceClient::new(vec![
                status(503),
                status(502),
                ok(b"done"),
            ])),
            fast_config(3),
        );
        assert_eq!(client.get("http://svc/x").unwrap(), b"done");
    }

    #[test]
    fn test_client_error_propagates_immediately() {
        let client = RetryingClient::new(
            Box::new(SequenceClient::new(vec![status(404), ok(b"never")])),
            fast_config(3),
        );
        match client.get("http://svc/x").unwrap_err() {
            ProviderError::Status { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_retries_exhausted_carries_last_error() {
        let client = RetryingClient::new(
            Box::new(SequenceClient::new(vec![status(500)])),
            fast_config(2),
        );
        match client.get("http://svc/x").unwrap_err() {
            ProviderError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("500"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_transport_errors_are_retried() {
        let client = RetryingClient::new(
            Box::new(SequenceClient::new(vec![
                Err(ProviderError::Transport {
                    url: "http://svc/x".to_string(),
                    message: "connection reset".to_string(),
                }),
                ok(b"recovered"),
            ])),
            fast_config(3),
        );
        assert_eq!(client.get("http://svc/x").unwrap(), b"recovered");
    }

    #[test]
    fn test_backoff_delays_double_per_attempt() {
        let config = RetryConfig::default().with_backoff_factor(0.3);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs_f64(0.3));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs_f64(0.6));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs_f64(1.2));
    }
}
