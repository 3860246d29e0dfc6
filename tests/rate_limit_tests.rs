use chrono::Duration;
use std::sync::Arc;

use churnwatch::{
    clock::ManualClock,
    db,
    rate_limit::RateLimiter,
};

async fn limiter() -> (RateLimiter, ManualClock) {
    let pool = db::init("sqlite::memory:").await.unwrap();
    let clock = ManualClock::default();
    (RateLimiter::new(pool, Arc::new(clock.clone())), clock)
}

#[tokio::test]
async fn window_fills_then_restarts() {
    let (limiter, clock) = limiter().await;
    let window = Duration::minutes(15);

    for _ in 0..5 {
        assert!(limiter
            .check_and_increment("email:ada@example.com", "request_otp_email", 5, window)
            .await
            .unwrap());
    }
    assert!(!limiter
        .check_and_increment("email:ada@example.com", "request_otp_email", 5, window)
        .await
        .unwrap());
    assert_eq!(
        limiter
            .attempts("email:ada@example.com", "request_otp_email")
            .await
            .unwrap(),
        Some(5)
    );

    clock.advance(window + Duration::seconds(1));
    assert!(limiter
        .check_and_increment("email:ada@example.com", "request_otp_email", 5, window)
        .await
        .unwrap());
    assert_eq!(
        limiter
            .attempts("email:ada@example.com", "request_otp_email")
            .await
            .unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn keys_and_actions_are_counted_separately() {
    let (limiter, _) = limiter().await;
    let window = Duration::minutes(15);

    assert!(limiter.check_and_increment("10.0.0.1", "verify_otp", 1, window).await.unwrap());
    assert!(!limiter.check_and_increment("10.0.0.1", "verify_otp", 1, window).await.unwrap());
    assert!(limiter.check_and_increment("10.0.0.2", "verify_otp", 1, window).await.unwrap());
    assert!(limiter
        .check_and_increment("10.0.0.1", "request_otp_ip", 1, window)
        .await
        .unwrap());
}

#[tokio::test]
async fn concurrent_attempts_never_exceed_the_limit() {
    let (limiter, _) = limiter().await;
    let window = Duration::minutes(15);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .check_and_increment("10.0.0.1", "request_otp_ip", 7, window)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 7);
}

#[tokio::test]
async fn prune_only_drops_stale_counters() {
    let (limiter, clock) = limiter().await;
    let window = Duration::minutes(15);

    limiter.check_and_increment("old", "verify_otp", 5, window).await.unwrap();
    clock.advance(Duration::hours(30));
    limiter.check_and_increment("new", "verify_otp", 5, window).await.unwrap();

    assert_eq!(limiter.prune(Duration::hours(24)).await.unwrap(), 1);
    assert_eq!(limiter.attempts("old", "verify_otp").await.unwrap(), None);
    assert_eq!(limiter.attempts("new", "verify_otp").await.unwrap(), Some(1));
}
