//! Rate limiter behaviour, on its own and behind the client.

use futures::future::join_all;
use resilient_http_client::mocks::MockTransport;
use resilient_http_client::observability::NoopTelemetry;
use resilient_http_client::{ApiClient, RateLimitConfig, RateLimiter};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_burst_is_immediate_then_throttled() {
    let limiter = RateLimiter::new(RateLimitConfig::new(2.0).with_burst(3));
    let start = Instant::now();

    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(1));

    limiter.acquire().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(520), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_sequential_client_calls_are_spaced() {
    let transport = Arc::new(MockTransport::with_statuses([200; 5]));
    let client = ApiClient::builder()
        .base_url("https://api.example.com")
        .transport(transport.clone())
        .telemetry(Arc::new(NoopTelemetry))
        .requests_per_second(2.0)
        .build()
        .unwrap();

    let start = Instant::now();
    for i in 0..5 {
        client.get(format!("/items/{i}")).await.unwrap();
    }
    let elapsed = start.elapsed();

    assert_eq!(transport.request_count(), 5);
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2_100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_retries_also_consume_tokens() {
    let transport = Arc::new(MockTransport::with_statuses([503, 503, 200]));
    let client = ApiClient::builder()
        .base_url("https://api.example.com")
        .transport(transport.clone())
        .telemetry(Arc::new(NoopTelemetry))
        .requests_per_second(1.0)
        .build()
        .unwrap();

    let start = Instant::now();
    client.get("/items").await.unwrap();

    // Backoff is far shorter than the refill interval, so the limiter paces retries.
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_never_waits() {
    let limiter = RateLimiter::unlimited();
    let start = Instant::now();

    for _ in 0..1_000 {
        limiter.acquire().await;
    }

    assert!(limiter.is_unlimited());
    assert!(limiter.try_acquire());
    assert_eq!(limiter.available_tokens(), None);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_never_oversubscribe() {
    const RATE: f64 = 10.0;
    const BURST: u32 = 2;
    const CALLERS: usize = 12;

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(RATE).with_burst(BURST)));
    let grants = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let tasks = (0..CALLERS).map(|_| {
        let limiter = limiter.clone();
        let grants = grants.clone();
        tokio::spawn(async move {
            limiter.acquire().await;
            grants.lock().unwrap().push(start.elapsed().as_secs_f64());
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let mut times = grants.lock().unwrap().clone();
    times.sort_by(f64::total_cmp);
    assert_eq!(times.len(), CALLERS);
    assert_eq!(times.iter().filter(|t| **t == 0.0).count(), BURST as usize);

    // Any window [t_i, t_j] holds at most burst + rate * width grants.
    for i in 0..times.len() {
        for j in i..times.len() {
            let granted = (j - i + 1) as f64;
            let allowed = f64::from(BURST) + RATE * (times[j] - times[i]) + 1e-6;
            assert!(granted <= allowed, "{granted} grants in [{}, {}]", times[i], times[j]);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_shared_client_across_tasks() {
    let transport = Arc::new(MockTransport::with_statuses([200; 6]));
    let client = Arc::new(
        ApiClient::builder()
            .base_url("https://api.example.com")
            .transport(transport.clone())
            .telemetry(Arc::new(NoopTelemetry))
            .requests_per_second(4.0)
            .burst(2)
            .build()
            .unwrap(),
    );

    let start = Instant::now();
    let calls = (0..6).map(|i| {
        let client = client.clone();
        async move { client.get(format!("/items/{i}")).await }
    });
    for result in join_all(calls).await {
        assert_eq!(result.unwrap().status(), 200);
    }

    // Two immediately, then four more at 250ms spacing.
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(transport.request_count(), 6);
}
