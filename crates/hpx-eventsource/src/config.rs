//! Event source configuration.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};

/// Reconnection delay used until the server sends a `retry` field.
pub const DEFAULT_RETRY_TIME: Duration = Duration::from_secs(3);

/// Configuration for an [`EventSource`](crate::EventSource).
///
/// Built with chainable setters on top of sensible defaults. A configuration
/// is moved into the client and never changes afterwards.
#[derive(Clone, Debug)]
pub struct EventSourceConfig {
    /// Event stream endpoint URL.
    pub url: String,
    /// HTTP method, `GET` or `POST`.
    pub method: Method,
    /// Custom headers. They override the default streaming headers and are
    /// re-applied to every redirect target.
    pub headers: HeaderMap,
    /// Optional request body (for POST-based streams).
    pub body: Option<Bytes>,
    /// Resumption token sent as `Last-Event-Id` on the first connection.
    pub last_event_id: Option<String>,
    /// Initial reconnection delay reported by the client.
    pub retry_time: Duration,
    /// Limit on establishing the connection. The stream itself never times
    /// out.
    pub connect_timeout: Option<Duration>,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            last_event_id: None,
            retry_time: DEFAULT_RETRY_TIME,
            connect_timeout: None,
        }
    }
}

impl EventSourceConfig {
    /// Create a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the custom headers.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Seed the resumption token.
    #[must_use]
    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    /// Set the initial reconnection delay.
    #[must_use]
    pub fn retry_time(mut self, retry_time: Duration) -> Self {
        self.retry_time = retry_time;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if self.method != Method::GET && self.method != Method::POST {
            return Err(format!("Unsupported method {}", self.method));
        }
        if self.connect_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("Connect timeout must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EventSourceConfig::default();
        assert!(config.url.is_empty());
        assert_eq!(config.method, Method::GET);
        assert!(config.headers.is_empty());
        assert!(config.body.is_none());
        assert!(config.last_event_id.is_none());
        assert_eq!(config.retry_time, Duration::from_secs(3));
        assert!(config.connect_timeout.is_none());
    }

    #[test]
    fn test_new_sets_url() {
        let config = EventSourceConfig::new("https://api.example.com/stream");
        assert_eq!(config.url, "https://api.example.com/stream");
        assert_eq!(config.method, Method::GET);
        assert_eq!(config.retry_time, DEFAULT_RETRY_TIME);
    }

    #[test]
    fn test_all_builder_methods() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer sk".parse().expect("valid header value"));

        let config = EventSourceConfig::new("https://api.example.com/v1/chat")
            .method(Method::POST)
            .headers(headers)
            .body(&b"{\"stream\":true}"[..])
            .last_event_id("7")
            .retry_time(Duration::from_millis(1500))
            .connect_timeout(Duration::from_secs(10));

        assert_eq!(config.method, Method::POST);
        assert_eq!(
            config
                .headers
                .get("authorization")
                .map(|v| v.to_str().expect("valid str")),
            Some("Bearer sk")
        );
        assert_eq!(config.body.as_deref(), Some(&b"{\"stream\":true}"[..]));
        assert_eq!(config.last_event_id.as_deref(), Some("7"));
        assert_eq!(config.retry_time, Duration::from_millis(1500));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_validation_empty_url() {
        let result = EventSourceConfig::default().validate();
        assert_eq!(result.expect_err("should fail"), "URL cannot be empty");
    }

    #[test]
    fn test_validation_unsupported_method() {
        let result = EventSourceConfig::new("https://example.com")
            .method(Method::PUT)
            .validate();
        assert_eq!(result.expect_err("should fail"), "Unsupported method PUT");
    }

    #[test]
    fn test_validation_zero_timeout() {
        let result = EventSourceConfig::new("https://example.com")
            .connect_timeout(Duration::ZERO)
            .validate();
        assert_eq!(result.expect_err("should fail"), "Connect timeout must be > 0");
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(EventSourceConfig::new("https://example.com").validate().is_ok());
        assert!(
            EventSourceConfig::new("https://example.com")
                .method(Method::POST)
                .validate()
                .is_ok()
        );
    }
}
