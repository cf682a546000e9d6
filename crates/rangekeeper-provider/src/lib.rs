//! Range provider: the abstract capability to fetch the textual record
//! list for a hash prefix, its HTTP implementation, and (behind
//! `test-support`) a deterministic fake used by tests.

use std::time::Duration;

use async_trait::async_trait;
use rangekeeper_error::ProviderError;

#[cfg(feature = "test-support")]
pub mod mock;

/// The fixed retry delay schedule, in seconds: the first entry is the delay
/// after the first failed attempt, and so on. After these are exhausted a
/// final, un-retried attempt is made.
pub const RETRY_DELAYS_SECONDS: [u64; 4] = [0, 30, 60, 120];

/// Provides the upstream password-range record list for a hash prefix.
#[async_trait]
pub trait RangeProvider: Send + Sync {
    /// Fetch the range for `prefix` (5 or 6 hex digits), with line endings
    /// normalised to `\n`. No retries.
    async fn fetch(&self, prefix: &str) -> Result<String, ProviderError>;

    /// Fetch with the fixed retry delay schedule. Only
    /// [`ProviderError::is_retryable`] failures are retried; a
    /// non-retryable failure (malformed-input style errors never reach
    /// here, since validation happens before the provider is called) is
    /// returned immediately.
    async fn fetch_with_retries(&self, prefix: &str) -> Result<String, ProviderError> {
        for &delay_seconds in &RETRY_DELAYS_SECONDS {
            match self.fetch(prefix).await {
                Ok(body) => return Ok(body),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => {
                    tracing::warn!(prefix, delay_seconds, error = %error, "retrying range fetch");
                    if delay_seconds > 0 {
                        tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
                    }
                }
            }
        }
        self.fetch(prefix).await
    }
}

/// Normalise `\r\n` line endings to `\n`, as the upstream API returns CRLF.
fn normalize_line_endings(body: &str) -> String {
    body.replace("\r\n", "\n")
}

/// HTTPS client for `https://api.pwnedpasswords.com/range/<prefix>`.
pub struct HttpRangeProvider {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl HttpRangeProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.pwnedpasswords.com/range";

    /// # Panics
    /// Panics if the underlying `reqwest` client cannot be built (e.g. the
    /// TLS backend failed to initialize).
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self::with_base_url(user_agent, Self::DEFAULT_BASE_URL.to_string())
    }

    #[must_use]
    pub fn with_base_url(user_agent: impl Into<String>, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("reqwest client with the default TLS backend must build");
        Self { client, base_url, user_agent: user_agent.into() }
    }
}

#[async_trait]
impl RangeProvider for HttpRangeProvider {
    async fn fetch(&self, prefix: &str) -> Result<String, ProviderError> {
        let url = format!("{}/{prefix}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|error| ProviderError::Transport {
                prefix: prefix.to_string(),
                message: error.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| ProviderError::Transport {
            prefix: prefix.to_string(),
            message: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(ProviderError::Status { prefix: prefix.to_string(), status: status.as_u16() });
        }

        Ok(normalize_line_endings(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crlf_to_lf() {
        assert_eq!(normalize_line_endings("A:1\r\nB:2\r\n"), "A:1\nB:2\n");
    }

    struct FlakyProvider {
        failures_before_success: std::sync::atomic::AtomicU32,
        attempts: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl RangeProvider for FlakyProvider {
        async fn fetch(&self, prefix: &str) -> Result<String, ProviderError> {
            self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let remaining =
                self.failures_before_success.fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |value| value.checked_sub(1),
                );
            if remaining.is_ok() {
                return Err(ProviderError::Status { prefix: prefix.to_string(), status: 503 });
            }
            Ok("OK".to_string())
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let provider = FlakyProvider {
            failures_before_success: std::sync::atomic::AtomicU32::new(2),
            attempts: std::sync::atomic::AtomicU32::new(0),
        };
        let result = provider.fetch_with_retries("ABCDE").await;
        assert_eq!(result.unwrap(), "OK");
        assert_eq!(provider.attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        struct AlwaysBadRequest;
        #[async_trait]
        impl RangeProvider for AlwaysBadRequest {
            async fn fetch(&self, prefix: &str) -> Result<String, ProviderError> {
                Err(ProviderError::Status { prefix: prefix.to_string(), status: 400 })
            }
        }
        let result = AlwaysBadRequest.fetch_with_retries("ABCDE").await;
        assert!(matches!(result, Err(ProviderError::Status { status: 400, .. })));
    }
}
