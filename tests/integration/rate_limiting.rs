//! Integration tests for rate limiting

use std::time::Duration;

use study_export_worker::table::rate_limit::RateLimiter;
use tokio::time::Instant;

#[test]
fn test_rate_limiter_interval_from_rate() {
    let limiter = RateLimiter::per_second(10);
    assert_eq!(limiter.interval(), Duration::from_millis(100));

    let limiter = RateLimiter::with_interval(Duration::from_millis(250));
    assert_eq!(limiter.interval(), Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_is_smoothed_not_bursty() {
    let limiter = RateLimiter::per_second(10);
    let start = Instant::now();

    // Ten permits at 10/second: the last one lands at or after the 900ms
    // slot, not all at time zero.
    for _ in 0..10 {
        limiter.acquire().await;
    }

    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test(start_paused = true)]
async fn test_first_acquire_is_immediate() {
    let limiter = RateLimiter::per_second(1);
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() < Duration::from_millis(1));
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_spaces_concurrent_callers() {
    use std::sync::Arc;

    let limiter = Arc::new(RateLimiter::per_second(2));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Four permits at 2/second: the last slot is at 1.5 seconds.
    assert!(start.elapsed() >= Duration::from_millis(1500));
}
