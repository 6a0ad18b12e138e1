//! Cancellable sleeps for politeness and backoff delays.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `duration`, waking early if `token` is cancelled.
///
/// Returns `true` if the full duration elapsed, `false` on cancellation.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });

        let started = Instant::now();
        assert!(!sleep_or_cancel(&token, Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(&token, Duration::from_millis(5)).await);
    }
}
