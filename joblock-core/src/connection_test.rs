#[cfg(test)]
mod tests {
    use crate::connection::{CONNECT_RETRY_INTERVAL, retry_until_ready};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_retries_until_attempt_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let value = retry_until_ready("test store", Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    Err(format!("connection refused (attempt {n})"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(value, 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_first_success_does_not_sleep() {
        let started = std::time::Instant::now();
        let value: &str =
            retry_until_ready("test store", Duration::from_secs(60), || async {
                Ok::<_, String>("ready")
            })
            .await;
        assert_eq!(value, "ready");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_fixed_interval_between_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let started = tokio::time::Instant::now();

        retry_until_ready("test store", CONNECT_RETRY_INTERVAL, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("timeout")
                } else {
                    Ok(())
                }
            }
        })
        .await;

        // Three failures, three fixed pauses, no growth
        let elapsed = started.elapsed();
        assert!(elapsed >= CONNECT_RETRY_INTERVAL * 3);
        assert!(elapsed < CONNECT_RETRY_INTERVAL * 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn test_manager_keeps_retrying_unreachable_store() {
        use crate::connection::ConnectionManager;

        // Nothing listens on port 1, so every attempt is refused
        let manager = ConnectionManager::new("postgres://u:p@127.0.0.1:1/db")
            .with_retry_interval(Duration::from_millis(50));

        let outcome = tokio::time::timeout(Duration::from_millis(800), manager.acquire()).await;
        assert!(outcome.is_err(), "acquire returned a pool for an unreachable store");
    }
}
