//! Per-attempt timeout with exponential backoff between retryable failures.

use std::time::Duration;

use docsage_core::{Error, Result, RetryPolicy};
use tracing::{info, warn};

use crate::providers::Generator;
use crate::types::GenerationRequest;

/// Run `request` against `generator`, bounding each attempt by `timeout`.
/// Blank output counts as unavailability. Only timeouts and unavailability
/// are retried; the last error is returned once `policy.max_retries`
/// retries are spent.
pub async fn generate_with_retry(
    generator: &dyn Generator,
    request: &GenerationRequest,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::GenerationTimeout(timeout)),
        };
        let outcome = outcome.and_then(|text| {
            if text.trim().is_empty() {
                Err(Error::GenerationUnavailable("empty response".into()))
            } else {
                Ok(text)
            }
        });

        match outcome {
            Ok(text) => {
                if attempt > 0 {
                    info!(
                        "{} generation succeeded after {} retries",
                        generator.name(),
                        attempt
                    );
                }
                return Ok(text);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} generation failed ({}), retry {}/{} in {:?}",
                    generator.name(),
                    e,
                    attempt + 1,
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
