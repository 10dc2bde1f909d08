use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn instant_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::ZERO)
}

#[test]
fn backoff_doubles_each_attempt() {
    let policy = RetryPolicy::new(4, Duration::from_millis(100));
    assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    assert_eq!(policy.delay_after(2), Duration::from_millis(200));
    assert_eq!(policy.delay_after(3), Duration::from_millis(400));
}

#[test]
fn zero_attempts_still_runs_once() {
    let policy = RetryPolicy::new(0, Duration::ZERO);
    assert_eq!(policy.attempts, 1);
}

#[test]
fn client_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result = send_with_retry(&instant_policy(3), "test", || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ureq::Error::StatusCode(404))
    });

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn server_errors_are_retried_until_success() {
    let calls = AtomicU32::new(0);
    let result = send_with_retry(&instant_policy(3), "test", || {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(ureq::Error::StatusCode(503))
        } else {
            Ok("ok".to_string())
        }
    });

    assert_eq!(result.expect("third attempt should succeed"), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn retries_are_bounded() {
    let calls = AtomicU32::new(0);
    let result = send_with_retry(&instant_policy(2), "test", || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ureq::Error::ConnectionFailed)
    });

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn async_retry_recovers_from_unavailable_index() {
    let calls = AtomicU32::new(0);
    let result = retry_async(&instant_policy(3), "knn_search", || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(IntentCacheError::IndexUnavailable("connection reset".to_string()))
            } else {
                Ok(7_usize)
            }
        }
    })
    .await;

    assert_eq!(result.expect("second attempt should succeed"), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn async_retry_surfaces_exhausted_error() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = retry_async(&instant_policy(3), "upsert", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(IntentCacheError::IndexUnavailable("down".to_string())) }
    })
    .await;

    assert!(matches!(result, Err(IntentCacheError::IndexUnavailable(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn async_retry_skips_schema_conflicts() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = retry_async(&instant_policy(5), "ensure_index", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            Err(IntentCacheError::IndexSchemaConflict(
                "dimension 384 != 768".to_string(),
            ))
        }
    })
    .await;

    assert!(matches!(
        result,
        Err(IntentCacheError::IndexSchemaConflict(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
