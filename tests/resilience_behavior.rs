//! End-to-end behavior of the retrier and rate limiter, composed the way a
//! caller would: consult the limiter first, then wrap the call in the
//! retrier. All timing runs over the virtual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tower::{service_fn, Layer, Service, ServiceExt};

use backstop::{
    CallError, ErrorCode, ManualClock, RateLimitLayer, RateLimiter, Retrier, RetryLayer,
    RetryPolicy,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn call_site_composition_limiter_then_retrier() {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    // Window long enough that the retrier's backoff sleeps stay inside it
    let limiter = RateLimiter::with_clock(2, Duration::from_millis(10_000), clock.clone());
    let retrier = Retrier::with_clock(
        RetryPolicy::default().max_attempts(3),
        clock.clone(),
    );

    let calls = AtomicUsize::new(0);
    let mut completed = 0;

    for _ in 0..3 {
        if !limiter.try_acquire() {
            // Throttled before the call is even attempted
            assert!(limiter.time_until_ready() > Duration::ZERO);
            continue;
        }
        let result = retrier
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CallError::http(503, "cold start"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        completed += 1;
    }

    // Two admissions; the first admitted call retried once internally, which
    // consumed no extra limiter slot.
    assert_eq!(completed, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(clock.slept(), vec![Duration::from_millis(1_000)]);
}

#[tokio::test]
async fn retrier_never_consumes_limiter_slots() {
    let clock = Arc::new(ManualClock::new());
    let limiter = RateLimiter::with_clock(1, Duration::from_millis(1_000), clock.clone());
    let retrier = Retrier::with_clock(RetryPolicy::default().max_attempts(4), clock.clone());

    assert!(limiter.try_acquire());
    let result: backstop::Result<()> = retrier
        .run(|| async { Err(CallError::service(ErrorCode::Unavailable, "down")) })
        .await;
    assert!(result.is_err());

    // Three backoff sleeps moved virtual time past the window, so the
    // limiter admits again purely by time passing.
    assert_eq!(clock.slept().len(), 3);
    assert!(limiter.try_acquire());
}

#[tokio::test]
async fn layered_stack_throttles_then_retries() {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_clock(
        10,
        Duration::from_millis(1_000),
        clock.clone(),
    ));

    let calls = Arc::new(AtomicUsize::new(0));
    let svc_calls = calls.clone();
    let svc = service_fn(move |prompt: String| {
        let n = svc_calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(CallError::service(ErrorCode::ResourceExhausted, "quota"))
            } else {
                Ok(format!("echo: {prompt}"))
            }
        }
    });

    let retry = RetryLayer::with_clock(
        RetryPolicy::rpc().max_attempts(5),
        clock.clone(),
    );
    let limit = RateLimitLayer::new(limiter).with_clock(clock.clone());
    let mut stack = limit.layer(retry.layer(svc));

    let resp = ServiceExt::ready(&mut stack)
        .await
        .unwrap()
        .call("hello".to_string())
        .await
        .unwrap();

    assert_eq!(resp, "echo: hello");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Default policy backoff: 1s then 2s
    assert_eq!(
        clock.slept(),
        vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
    );
}

#[tokio::test]
async fn fail_fast_stack_surfaces_retry_after() {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_clock(
        1,
        Duration::from_millis(1_000),
        clock.clone(),
    ));
    let svc = service_fn(|(): ()| async { Ok::<_, CallError>(()) });
    let mut stack = RateLimitLayer::fail_fast(limiter).layer(svc);

    ServiceExt::ready(&mut stack).await.unwrap().call(()).await.unwrap();
    clock.advance(Duration::from_millis(400));
    let err = ServiceExt::ready(&mut stack).await.unwrap().call(()).await.unwrap_err();

    match err {
        CallError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Duration::from_millis(600));
        }
        other => panic!("expected RateLimited, got {other}"),
    }
}

#[tokio::test]
async fn original_error_survives_the_stack() {
    let clock = Arc::new(ManualClock::new());
    let svc = service_fn(|(): ()| async {
        Err::<(), _>(CallError::InvalidInput {
            message: "history too long".to_string(),
        })
    });
    let mut stack =
        RetryLayer::with_clock(RetryPolicy::default().max_attempts(5), clock.clone()).layer(svc);

    let err = ServiceExt::ready(&mut stack).await.unwrap().call(()).await.unwrap_err();

    assert_eq!(err.to_string(), "invalid input: history too long");
    assert!(clock.slept().is_empty());
}
