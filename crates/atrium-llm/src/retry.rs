use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use atrium_core::config::{ModelConfig, RetryConfig};
use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::LlmClient;
use atrium_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative providers.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &AtriumError) -> bool {
    match e {
        AtriumError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("529")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<Completion>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self
                    .primary
                    .complete(&config, messages.clone(), &tools)
                    .await
                {
                    Ok(completion) => return Ok(completion),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying LLM request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.complete(fb_config, messages.clone(), &tools).await {
                    Ok(completion) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(completion);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| AtriumError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails with `error` for the first `failures` calls, then answers.
    struct FlakyClient {
        calls: Arc<AtomicUsize>,
        failures: usize,
        error: &'static str,
    }

    impl LlmClient for FlakyClient {
        fn complete(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<Completion>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(AtriumError::LlmRequest(self.error.to_string()))
                } else {
                    Ok(Completion {
                        text: format!("answer after {} failures", n),
                        ..Default::default()
                    })
                }
            })
        }
    }

    fn model(id: &str) -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            model_id: id.into(),
            api_key: None,
            base_url: None,
            max_tokens: 256,
            temperature: 0.0,
            retry: None,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn flaky(failures: usize, error: &'static str) -> (Box<dyn LlmClient>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FlakyClient {
            calls: calls.clone(),
            failures,
            error,
        };
        (Box::new(client), calls)
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&AtriumError::LlmRequest("HTTP 429 Too Many Requests: slow down".into())));
        assert!(is_retryable(&AtriumError::LlmRequest("connection reset".into())));
        assert!(!is_retryable(&AtriumError::LlmRequest("HTTP 401 Unauthorized: bad key".into())));
        assert!(!is_retryable(&AtriumError::LlmParse("eof".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let backoff = calculate_backoff(8, &config);
        assert!(backoff <= Duration::from_millis(4800));
        assert!(backoff >= Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let (primary, calls) = flaky(2, "HTTP 503 Service Unavailable: busy");
        let client = RetryingClient::new(primary, vec![], fast_retry(3));
        let completion = client.complete(&model("m"), vec![], &[]).await.unwrap();
        assert_eq!(completion.text, "answer after 2 failures");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retry_and_uses_fallback() {
        let (primary, primary_calls) = flaky(usize::MAX, "HTTP 401 Unauthorized: bad key");
        let (fallback, fallback_calls) = flaky(0, "");
        let client = RetryingClient::new(primary, vec![(model("fb"), fallback)], fast_retry(3));

        let completion = client.complete(&model("m"), vec![], &[]).await.unwrap();
        assert_eq!(completion.text, "answer after 0 failures");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_providers_fail_returns_primary_error() {
        let (primary, primary_calls) = flaky(usize::MAX, "HTTP 500 Internal Server Error: oops");
        let (fallback, _) = flaky(usize::MAX, "HTTP 401 Unauthorized: nope");
        let client = RetryingClient::new(primary, vec![(model("fb"), fallback)], fast_retry(2));

        let err = client.complete(&model("m"), vec![], &[]).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
    }
}
