//! Tests for the credential pool

use super::*;
use crate::engine::{PageResponse, RateSignal};
use crate::error::Error;
use crate::http::RetryPolicy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;

fn pool(ids: &[&str]) -> CredentialPool {
    CredentialPool::with_credentials(
        ids.iter().map(|id| Credential::new(*id, format!("tok-{id}"))),
        PoolConfig::default(),
    )
}

fn in_secs(secs: i64) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(secs)
}

// ============================================================================
// Budget
// ============================================================================

#[test]
fn test_budget_availability() {
    let now = Utc::now();
    assert!(Budget::default().is_available(now));

    let spent = Budget {
        remaining: Some(0),
        reset_at: Some(now + chrono::Duration::seconds(30)),
        leases: 0,
    };
    assert!(!spent.is_available(now));
    assert!((29..=30).contains(&spent.seconds_to_reset(now)));

    let refilled = Budget {
        reset_at: Some(now - chrono::Duration::seconds(1)),
        ..spent
    };
    assert!(refilled.is_available(now));
    assert_eq!(refilled.seconds_to_reset(now), 0);
}

#[test]
fn test_credential_debug_redacts_token() {
    let debug = format!("{:?}", Credential::new("a", "very-secret"));
    assert!(debug.contains("\"a\""));
    assert!(!debug.contains("very-secret"));
}

// ============================================================================
// Acquire / Release
// ============================================================================

#[tokio::test]
async fn test_acquire_from_empty_pool_fails() {
    let pool = CredentialPool::new(PoolConfig::default());
    let err = pool.acquire("run-1").await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_acquire_prefers_least_leased() {
    let pool = pool(&["a", "b"]);

    let first = pool.acquire("run-1").await.unwrap();
    let second = pool.acquire("run-2").await.unwrap();
    assert_eq!(first.id, "a");
    assert_eq!(second.id, "b");

    pool.release(&first).await;
    let third = pool.acquire("run-3").await.unwrap();
    assert_eq!(third.id, "a");
    assert_eq!(pool.budget("a").await.unwrap().leases, 1);
}

#[tokio::test]
async fn test_acquire_skips_exhausted_credentials() {
    let pool = pool(&["a", "b"]);
    pool.update_budget(&Credential::new("a", ""), 0, in_secs(600))
        .await;

    let credential = pool.acquire("run-1").await.unwrap();
    assert_eq!(credential.id, "b");
}

#[tokio::test]
async fn test_acquire_clears_budget_after_reset() {
    let pool = pool(&["a"]);
    pool.update_budget(&Credential::new("a", ""), 0, in_secs(-5))
        .await;

    let credential = pool.acquire("run-1").await.unwrap();
    assert_eq!(credential.id, "a");

    let budget = pool.budget("a").await.unwrap();
    assert_eq!(budget.remaining, None);
    assert_eq!(budget.reset_at, None);
}

#[tokio::test]
async fn test_long_wait_raises_pool_exhausted() {
    let pool = pool(&["a", "b"]);
    pool.update_budget(&Credential::new("a", ""), 0, in_secs(900))
        .await;
    pool.update_budget(&Credential::new("b", ""), 0, in_secs(600))
        .await;

    let err = pool.acquire("run-1").await.unwrap_err();
    match err {
        Error::PoolExhausted { wait_seconds } => assert!((599..=600).contains(&wait_seconds)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_short_wait_sleeps_then_acquires() {
    let pool = pool(&["a"]);
    pool.update_budget(&Credential::new("a", ""), 0, in_secs(20))
        .await;

    let credential = pool.acquire("run-1").await.unwrap();
    assert_eq!(credential.id, "a");
}

#[tokio::test]
async fn test_clones_share_budgets() {
    let pool = pool(&["a"]);
    let clone = pool.clone();

    clone
        .update_budget(&Credential::new("a", ""), 12, in_secs(60))
        .await;
    assert_eq!(pool.budget("a").await.unwrap().remaining, Some(12));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_leases_settle_back_to_zero() {
    let pool = pool(&["a", "b", "c"]);

    let mut tasks = Vec::new();
    for task in 0..8u64 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                let credential = pool.acquire("run-1").await.unwrap();
                pool.update_budget(&credential, 100 + task, in_secs(3600))
                    .await;
                tokio::task::yield_now().await;
                pool.release(&credential).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for id in ["a", "b", "c"] {
        let budget = pool.budget(id).await.unwrap();
        assert_eq!(budget.leases, 0, "credential {id} still leased");
        if let Some(remaining) = budget.remaining {
            assert!((100..108).contains(&remaining));
            assert!(budget.reset_at.is_some());
        }
    }
    assert_eq!(pool.len().await, 3);
}

// ============================================================================
// Rotation
// ============================================================================

#[tokio::test]
async fn test_rotate_without_priority_returns_cause() {
    let pool = pool(&["a", "b"]);
    let current = pool.acquire("run-1").await.unwrap();

    let cause = Error::RateLimited {
        retry_after_seconds: 30,
    };
    let err = pool
        .rotate("run-1", &current, false, cause)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::RateLimited {
            retry_after_seconds: 30
        }
    ));
    assert_eq!(pool.budget("a").await.unwrap().leases, 0);
}

#[tokio::test]
async fn test_rotate_with_priority_switches_credential() {
    let pool = pool(&["a", "b"]);
    let current = pool.acquire("run-1").await.unwrap();
    assert_eq!(current.id, "a");

    let next = pool
        .rotate("run-1", &current, true, Error::http_status(403, "rate limit"))
        .await
        .unwrap();

    assert_eq!(next.id, "b");
    let spent = pool.budget("a").await.unwrap();
    assert_eq!(spent.remaining, Some(0));
    assert_eq!(spent.leases, 0);
    assert!(spent.reset_at.is_some());
}

// ============================================================================
// Pooled Caller
// ============================================================================

struct FixedProbe {
    signal: RateSignal,
    calls: AtomicU32,
}

#[async_trait]
impl BudgetProbe for FixedProbe {
    async fn probe(&self, _credential: &Credential) -> crate::error::Result<RateSignal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.signal)
    }
}

#[tokio::test(start_paused = true)]
async fn test_caller_retries_gateway_errors() {
    let pool = pool(&["a"]);
    let caller = PooledCaller::new(pool.clone(), "run-1")
        .with_retry(RetryPolicy::new(3, std::time::Duration::from_secs(2)));

    let calls = AtomicU32::new(0);
    let counter = &calls;
    let response = caller
        .call("stargazers", move |_credential| async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::http_status(502, ""))
            } else {
                Ok(PageResponse::new(vec![], None, RateSignal::new(100, 60)))
            }
        })
        .await
        .unwrap();

    assert_eq!(response.rate.remaining, Some(100));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let budget = pool.budget("a").await.unwrap();
    assert_eq!(budget.remaining, Some(100));
    assert_eq!(budget.leases, 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_exhausts_retries() {
    let pool = pool(&["a"]);
    let caller = PooledCaller::new(pool.clone(), "run-1")
        .with_retry(RetryPolicy::new(2, std::time::Duration::from_secs(2)));

    let err = caller
        .call("forks", |_credential| async {
            Err(Error::http_status(500, ""))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(pool.budget("a").await.unwrap().leases, 0);
}

#[tokio::test]
async fn test_caller_rotates_on_rate_limit() {
    let pool = pool(&["a", "b"]);
    let caller = PooledCaller::new(pool.clone(), "run-1");

    let seen = StdMutex::new(Vec::new());
    let seen_ref = &seen;
    let response = caller
        .call("pulls", move |credential| async move {
            seen_ref.lock().unwrap().push(credential.id.clone());
            if credential.id == "a" {
                Err(Error::RateLimited {
                    retry_after_seconds: 900,
                })
            } else {
                Ok(PageResponse::last(vec![serde_json::json!({"id": 1})]))
            }
        })
        .await
        .unwrap();

    assert_eq!(response.records.len(), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(pool.budget("a").await.unwrap().remaining, Some(0));
    assert_eq!(pool.budget("b").await.unwrap().leases, 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_stops_rotating_when_every_credential_is_limited() {
    let pool = pool(&["a"]);
    let caller = PooledCaller::new(pool.clone(), "run-1");

    let calls = AtomicU32::new(0);
    let counter = &calls;
    let err = caller
        .call("mentions", move |_credential| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::RateLimited {
                retry_after_seconds: 30,
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PoolExhausted { wait_seconds: 30 }));
    assert_eq!(err.retry_after(), Some(30));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let budget = pool.budget("a").await.unwrap();
    assert_eq!(budget.leases, 0);
    assert_eq!(budget.remaining, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_caller_tries_each_credential_before_giving_up() {
    let pool = pool(&["a", "b"]);
    let caller = PooledCaller::new(pool.clone(), "run-1");

    let calls = AtomicU32::new(0);
    let counter = &calls;
    let err = caller
        .call("followers", move |_credential| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::http_status(403, "API rate limit exceeded"))
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PoolExhausted {
            wait_seconds: DEFAULT_COOLDOWN_SECS
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pool.budget("a").await.unwrap().leases, 0);
    assert_eq!(pool.budget("b").await.unwrap().leases, 0);
}

#[tokio::test]
async fn test_caller_without_priority_propagates_rate_limit() {
    let pool = pool(&["a", "b"]);
    let caller = PooledCaller::new(pool.clone(), "run-1").with_priority(false);

    let err = caller
        .call("issues", |_credential| async {
            Err(Error::http_status(429, ""))
        })
        .await
        .unwrap_err();

    assert!(err.is_rate_limit_signal());
    assert_eq!(pool.budget("a").await.unwrap().leases, 0);
}

#[tokio::test]
async fn test_caller_uses_probe_when_response_has_no_budget() {
    let pool = pool(&["a"]);
    let probe = Arc::new(FixedProbe {
        signal: RateSignal::new(42, 120),
        calls: AtomicU32::new(0),
    });
    let caller = PooledCaller::new(pool.clone(), "run-1").with_probe(probe.clone());

    caller
        .call("discussions", |_credential| async {
            Ok(PageResponse::last(vec![]))
        })
        .await
        .unwrap();

    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.budget("a").await.unwrap().remaining, Some(42));
}
