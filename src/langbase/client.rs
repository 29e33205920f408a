use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

/// HTTP client for running Langbase pipes
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a client; the request timeout applies to every call
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Run a pipe, retrying failed attempts with exponential backoff.
    ///
    /// Makes at most `max_retries + 1` attempts and reports the last error
    /// as [`LangbaseError::Unavailable`].
    pub async fn call_pipe(&self, request: &PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let mut last_error: Option<LangbaseError> = None;
        let mut attempt: u32 = 0;

        while attempt <= self.request_config.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                warn!(
                    pipe = %request.name,
                    retry = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying Langbase pipe call"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            match self.send(&url, request).await {
                Ok(response) => {
                    info!(
                        pipe = %request.name,
                        latency_ms = start.elapsed().as_millis() as u64,
                        attempts = attempt + 1,
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        pipe = %request.name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis() as u64,
                        attempt = attempt + 1,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                    attempt += 1;
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt was made".to_string()),
            retries: attempt.saturating_sub(1),
        })
    }

    /// Delay before the given retry: `retry_delay_ms * 2^(retry - 1)`.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.request_config.retry_delay_ms.saturating_mul(factor))
    }

    async fn send(&self, url: &str, request: &PipeRequest) -> LangbaseResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Sending Langbase pipe request"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<PipeResponse>()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse pipe response: {}", e),
            })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(retry_delay_ms: u64) -> LangbaseClient {
        let config = LangbaseConfig {
            api_key: "test_key".to_string(),
            base_url: "https://api.langbase.com/".to_string(),
        };
        let request_config = RequestConfig {
            retry_delay_ms,
            ..RequestConfig::default()
        };
        LangbaseClient::new(&config, request_config).unwrap()
    }

    #[test]
    fn test_base_url_is_trimmed() {
        assert_eq!(client(100).base_url(), "https://api.langbase.com");
    }

    #[test]
    fn test_backoff_doubles() {
        let c = client(100);
        assert_eq!(c.backoff(1), Duration::from_millis(100));
        assert_eq!(c.backoff(2), Duration::from_millis(200));
        assert_eq!(c.backoff(3), Duration::from_millis(400));
    }
}
