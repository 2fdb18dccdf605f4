use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use inkflow_core::config::RetryConfig;
use inkflow_core::error::{InkflowError, Result};
use inkflow_core::traits::Generator;
use inkflow_core::types::*;

/// A generator that retries failed requests and falls back to alternative providers.
pub struct RetryingGenerator {
    primary: Box<dyn Generator>,
    fallbacks: Vec<Box<dyn Generator>>,
    retry_config: RetryConfig,
}

impl RetryingGenerator {
    pub fn new(
        primary: Box<dyn Generator>,
        fallbacks: Vec<Box<dyn Generator>>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }

    async fn with_retries<T, F>(&self, mut call: F) -> Result<T>
    where
        F: FnMut(&dyn Generator) -> BoxFuture<'_, Result<T>>,
    {
        let max_retries = self.retry_config.max_retries;

        // Try primary with retries
        let mut last_err = None;
        for attempt in 0..=max_retries {
            match call(self.primary.as_ref()).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    if is_retryable(&e) && attempt < max_retries {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying generation request"
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

        // Primary exhausted, try fallbacks
        if !self.fallbacks.is_empty() {
            info!("Primary generator exhausted, trying fallbacks");
        }
        for fallback in &self.fallbacks {
            match call(fallback.as_ref()).await {
                Ok(out) => {
                    info!(provider = %fallback.name(), "Fell back to alternative generator");
                    return Ok(out);
                }
                Err(e) => {
                    warn!(provider = %fallback.name(), error = %e, "Fallback generator also failed");
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| InkflowError::Generation("All providers failed".into())))
    }
}

fn is_retryable(e: &InkflowError) -> bool {
    match e {
        InkflowError::Generation(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let ms = config
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl Generator for RetryingGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation>> {
        Box::pin(async move {
            self.with_retries(|g| g.generate(request.clone())).await
        })
    }

    fn generate_media(&self, kind: MediaKind, prompt: String) -> BoxFuture<'_, Result<MediaAsset>> {
        Box::pin(async move {
            self.with_retries(|g| g.generate_media(kind, prompt.clone()))
                .await
        })
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}
