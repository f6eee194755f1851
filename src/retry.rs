pub(crate) const FETCH_ATTEMPTS: u32 = 3;
pub(crate) const FETCH_RETRY_DELAY_SECS: u64 = 3;

/// Awaits a fallible repository call, retrying with a fixed delay.
/// The operation expression is re-evaluated on every attempt.
macro_rules! retry_fetch {
    ($context:expr, $operation:expr) => {{
        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= $crate::retry::FETCH_ATTEMPTS => {
                    break Err(err.context(format!(
                        "{} failed after {} attempts",
                        context_value, attempt
                    )))
                }
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} to {} failed: {}. Retrying in {}s.",
                        attempt,
                        $crate::retry::FETCH_ATTEMPTS,
                        context_value,
                        err,
                        $crate::retry::FETCH_RETRY_DELAY_SECS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(
                        $crate::retry::FETCH_RETRY_DELAY_SECS,
                    ))
                    .await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_fetch;
