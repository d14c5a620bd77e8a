use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 10000;

/// Exponential backoff with +/-25% jitter for the given zero-based attempt.
pub fn backoff_delay(attempt: u32) -> Duration {
    let delay_ms = (BASE_DELAY_MS * 2_u64.pow(attempt)).min(MAX_DELAY_MS);
    let jitter_range = (delay_ms as f64 * 0.25) as u64;
    let jitter = fastrand::u64(0..=jitter_range * 2);
    Duration::from_millis(delay_ms.saturating_sub(jitter_range).saturating_add(jitter))
}

macro_rules! retry_http_operation {
    ($context:expr, $operation:expr) => {{
        let context_value: String = $context.into();
        let mut attempt: u32 = 0;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt + 1 >= $crate::retry::MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    let delay = $crate::retry::backoff_delay(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                        attempt + 1,
                        $crate::retry::MAX_ATTEMPTS,
                        context_value,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_http_operation;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        for _ in 0..20 {
            let first = backoff_delay(0).as_millis();
            assert!((750..=1250).contains(&first));
            let capped = backoff_delay(8).as_millis();
            assert!((7500..=12500).contains(&capped));
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut calls = 0;
        let result: Result<u32, String> = retry_http_operation!("flaky fetch", async {
            calls += 1;
            if calls < 3 {
                Err(format!("failure {}", calls))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = retry_http_operation!("broken fetch", async {
            calls += 1;
            Err::<(), String>("down".to_string())
        });
        assert!(result.is_err());
        assert_eq!(calls, MAX_ATTEMPTS);
    }
}
