//! Integration tests for the read-through query cache

use querylito_core::{cache_key, QueryCache, QueryError, QueryOptions, QueryStatus, RetryPolicy};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, io::Error>> + Send>>;

/// Fetch function returning its own call number after `delay`.
fn counting_fetch(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl Fn() -> FetchFuture<usize> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            sleep(delay).await;
            Ok(call)
        })
    }
}

/// Fetch function that always fails with `message`.
fn failing_fetch(
    calls: &Arc<AtomicUsize>,
    message: &'static str,
) -> impl Fn() -> FetchFuture<usize> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Err(io::Error::new(io::ErrorKind::Other, message)) })
    }
}

/// Routes cache diagnostics to the test output; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribers_share_one_fetch() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["regions"];

    let mut handles: Vec<_> = (0..10)
        .map(|_| {
            cache.subscribe(
                key.clone(),
                counting_fetch(&calls, Duration::from_millis(50)),
                cache.default_options(),
            )
        })
        .collect();

    // All subscribers see the same pending fetch
    for handle in &handles {
        assert_eq!(handle.status(), QueryStatus::Pending);
        assert!(handle.is_fetching());
        assert_eq!(handle.data(), None);
    }
    assert_eq!(cache.peek(&key).unwrap().subscriber_count, 10);

    for handle in handles.iter_mut() {
        let state = handle.settled().await;
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.data, Some(1));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().misses(), 1);
    assert_eq!(cache.stats().coalesced(), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalescing_across_threads() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let fetch = counting_fetch(&calls, Duration::from_millis(20));
            tokio::spawn(async move {
                let mut handle = cache.subscribe(cache_key!["units"], fetch, cache.default_options());
                handle.settled().await.data
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Some(1));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_data_is_not_refetched() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_stale_after(Duration::from_secs(60));

    let first = cache
        .fetch_query(cache_key!["contacts"], counting_fetch(&calls, Duration::ZERO), options)
        .await
        .unwrap();

    sleep(Duration::from_secs(30)).await;

    // Still within the freshness window
    let handle = cache.subscribe(
        cache_key!["contacts"],
        counting_fetch(&calls, Duration::ZERO),
        options,
    );
    assert!(!handle.is_fetching());
    assert_eq!(handle.status(), QueryStatus::Success);
    assert_eq!(handle.data(), Some(first));

    let again = cache
        .fetch_query(cache_key!["contacts"], counting_fetch(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["regions"];
    let options = QueryOptions::default().with_stale_after(Duration::from_secs(10));

    let mut first = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(10)), options);
    assert_eq!(first.settled().await.data, Some(1));

    sleep(Duration::from_secs(11)).await;

    let mut second = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(10)), options);

    // Previous data is served immediately while the refetch runs
    assert_eq!(second.data(), Some(1));
    assert_eq!(second.status(), QueryStatus::Success);
    assert!(second.is_fetching());
    assert!(first.is_fetching());

    let state = second.settled().await;
    assert_eq!(state.data, Some(2));
    assert!(!state.is_fetching);

    // Existing subscribers observe the refreshed value too
    assert_eq!(first.data(), Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_error_after_retries_reaches_every_subscriber() {
    init_tracing();
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["contacts"];

    let mut a = cache.subscribe(key.clone(), failing_fetch(&calls, "network down"), cache.default_options());
    let mut b = cache.subscribe(key.clone(), failing_fetch(&calls, "network down"), cache.default_options());

    let state_a = a.settled().await;
    let state_b = b.settled().await;

    assert_eq!(state_a.status, QueryStatus::Error);
    assert_eq!(state_b.status, QueryStatus::Error);
    assert_eq!(state_a.error.as_ref().unwrap().message(), "network down");

    let (err_a, err_b) = (state_a.error.unwrap(), state_b.error.unwrap());
    assert!(err_a.is_same_failure(&err_b));
    assert!(err_a.downcast_ref::<io::Error>().is_some());

    // One initial attempt plus the three default retries
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(state_a.failure_count, 4);
    assert_eq!(cache.stats().retries(), 3);
    assert_eq!(cache.stats().failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_before_exhaustion() {
    init_tracing();
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let value = cache
        .fetch_query(
            cache_key!["flaky"],
            move || {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call < 3 {
                        Err(io::Error::new(io::ErrorKind::Other, "try again"))
                    } else {
                        Ok(call)
                    }
                }
            },
            cache.default_options(),
        )
        .await
        .unwrap();

    assert_eq!(value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_timing() {
    init_tracing();
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let started = tokio::time::Instant::now();

    let options = QueryOptions::default().with_retries(2);
    let result = cache
        .fetch_query(cache_key!["slow_fail"], failing_fetch(&calls, "down"), options)
        .await;

    assert!(result.is_err());
    // Exponential backoff: 1s + 2s between the three attempts
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_next_success_clears_error() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["recovering"];
    let options = QueryOptions::default().with_retry(RetryPolicy::none());

    let err = cache
        .fetch_query(key.clone(), failing_fetch(&calls, "network down"), options)
        .await
        .unwrap_err();
    assert_eq!(err.message(), "network down");

    // Error entries are never fresh: the next subscription fetches again
    let mut handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), options);
    assert_eq!(handle.status(), QueryStatus::Pending);
    let state = handle.settled().await;
    assert_eq!(state.status, QueryStatus::Success);
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_query_does_not_fetch() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_enabled(false);

    let mut handle = cache.subscribe(
        cache_key!["disabled"],
        counting_fetch(&calls, Duration::ZERO),
        options,
    );
    assert_eq!(handle.status(), QueryStatus::Idle);
    assert!(!handle.is_fetching());

    let state = handle.settled().await;
    assert_eq!(state.status, QueryStatus::Idle);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // An explicit refetch still works
    assert!(handle.refetch());
    assert_eq!(handle.settled().await.data, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_released_subscription_does_not_cancel_fetch() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["released"];

    let handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(50)), cache.default_options());
    drop(handle);
    assert_eq!(cache.peek(&key).unwrap().subscriber_count, 0);

    sleep(Duration::from_millis(100)).await;

    let info = cache.peek(&key).unwrap();
    assert_eq!(info.status, QueryStatus::Success);
    assert!(!info.is_fetching);

    // The completed result serves the next subscriber without another fetch
    let handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(50)), cache.default_options());
    assert_eq!(handle.data(), Some(1));
    assert!(!handle.is_fetching());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_entry_is_evicted_after_gc_time() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["evictable"];
    let options = QueryOptions::default().with_gc_time(Some(Duration::from_secs(1)));

    let mut handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), options);
    handle.settled().await;
    drop(handle);

    sleep(Duration::from_millis(500)).await;
    assert!(cache.peek(&key).is_some());

    sleep(Duration::from_millis(600)).await;
    assert!(cache.peek(&key).is_none());
    assert_eq!(cache.stats().evictions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_waits_for_in_flight_fetch() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["slow"];
    let options = QueryOptions::default().with_gc_time(Some(Duration::from_secs(1)));

    drop(cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_secs(5)), options));

    sleep(Duration::from_secs(2)).await;
    assert!(cache.peek(&key).unwrap().is_fetching);

    // Fetch completes at 5s, eviction becomes due at 6s
    sleep(Duration::from_millis(3500)).await;
    assert_eq!(cache.peek(&key).unwrap().status, QueryStatus::Success);

    sleep(Duration::from_secs(1)).await;
    assert!(cache.peek(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_keeps_entry_alive() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["kept"];
    let options = QueryOptions::default().with_gc_time(Some(Duration::from_secs(1)));

    let mut handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), options);
    handle.settled().await;
    drop(handle);

    sleep(Duration::from_millis(500)).await;
    let _handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), options);

    sleep(Duration::from_secs(2)).await;
    let info = cache.peek(&key).unwrap();
    assert_eq!(info.subscriber_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_collect_garbage_without_runtime() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    // disabled subscriptions attach without needing a runtime
    let options = QueryOptions::default()
        .with_gc_time(Some(Duration::ZERO))
        .with_enabled(false);

    let handle = cache.subscribe(cache_key!["a"], counting_fetch(&calls, Duration::ZERO), options);
    let _held = cache.subscribe(cache_key!["b"], counting_fetch(&calls, Duration::ZERO), options);
    drop(handle);

    // Only the unobserved entry goes
    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.peek(&cache_key!["a"]).is_none());
    assert!(cache.peek(&cache_key!["b"]).is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_fetch_dropped_with_its_runtime_is_settled() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["runtime_bound"];

    let first = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let handle = first.block_on(async {
        cache.subscribe(
            key.clone(),
            counting_fetch(&calls, Duration::from_millis(200)),
            cache.default_options(),
        )
    });
    assert!(handle.is_fetching());
    drop(first);

    // The abandoned fetch no longer counts as in flight
    assert!(!handle.is_fetching());
    assert_eq!(handle.status(), QueryStatus::Error);
    assert!(matches!(handle.error(), Some(QueryError::Cancelled(_))));

    let second = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let value = second.block_on(async {
        tokio::time::timeout(
            Duration::from_secs(3),
            cache.fetch_query(
                key.clone(),
                counting_fetch(&calls, Duration::from_millis(10)),
                cache.default_options(),
            ),
        )
        .await
    });
    assert_eq!(value.unwrap().unwrap(), calls.load(Ordering::SeqCst));
    assert_eq!(cache.peek(&key).unwrap().status, QueryStatus::Success);
}

#[tokio::test]
async fn test_subscribe_without_runtime_leaves_shared_entry_untouched() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["shared_stale"];

    let mut first = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), cache.default_options());
    first.settled().await;
    assert!(cache.invalidate(&key));

    let other = cache.clone();
    let thread_calls = Arc::clone(&calls);
    let thread_key = key.clone();
    let (status, no_runtime) = std::thread::spawn(move || {
        let handle = other.subscribe(
            thread_key,
            counting_fetch(&thread_calls, Duration::ZERO),
            other.default_options(),
        );
        (handle.status(), matches!(handle.error(), Some(QueryError::NoRuntime(_))))
    })
    .join()
    .unwrap();
    assert_eq!(status, QueryStatus::Error);
    assert!(no_runtime);

    // The rejected caller changed nothing the other subscriber sees
    assert_eq!(first.status(), QueryStatus::Success);
    assert!(first.error().is_none());
    assert_eq!(first.data(), Some(1));
    let info = cache.peek(&key).unwrap();
    assert_eq!(info.subscriber_count, 1);
    assert!(info.error_updated_at.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_subscription_to_existing_key_reports_its_state() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["observed"];
    let disabled = cache.default_options().with_enabled(false);

    // Joins a fetch started by someone else
    let mut loading = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(50)), cache.default_options());
    let mut observer = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), disabled);
    assert_eq!(observer.status(), QueryStatus::Pending);
    assert!(observer.is_fetching());
    loading.settled().await;
    assert_eq!(observer.settled().await.data, Some(1));

    // Cached data is reported even once stale, without fetching
    sleep(Duration::from_secs(120)).await;
    let late = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::ZERO), disabled);
    assert_eq!(late.status(), QueryStatus::Success);
    assert!(!late.is_fetching());
    assert_eq!(late.data(), Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_refetch_and_keeps_data() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["contacts", "active"];

    let mut handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(10)), cache.default_options());
    handle.settled().await;

    assert!(cache.invalidate(&key));
    assert!(cache.peek(&key).unwrap().invalidated);
    assert!(!cache.invalidate(&cache_key!["missing"]));

    let mut again = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(10)), cache.default_options());
    assert!(again.is_fetching());
    assert_eq!(again.data(), Some(1));
    assert_eq!(again.settled().await.data, Some(2));
    assert!(!cache.peek(&key).unwrap().invalidated);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_prefix() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for key in [cache_key!["contacts", 1], cache_key!["contacts", 2], cache_key!["regions"]] {
        cache
            .fetch_query(key, counting_fetch(&calls, Duration::ZERO), cache.default_options())
            .await
            .unwrap();
    }

    assert_eq!(cache.invalidate_prefix(&cache_key!["contacts"]), 2);
    assert!(!cache.peek(&cache_key!["regions"]).unwrap().invalidated);
    assert_eq!(cache.invalidate_all(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_refetch_is_coalesced() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handle = cache.subscribe(cache_key!["r"], counting_fetch(&calls, Duration::from_millis(10)), cache.default_options());
    // A fetch is already in flight
    assert!(!handle.refetch());
    handle.settled().await;

    assert!(handle.refetch());
    assert!(!handle.refetch());
    assert_eq!(handle.settled().await.data, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_removed_entry_drops_fetch_result() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = cache_key!["removed"];

    let mut handle = cache.subscribe(key.clone(), counting_fetch(&calls, Duration::from_millis(10)), cache.default_options());
    assert!(cache.remove(&key));

    let state = handle.settled().await;
    assert!(state.is_fetching);

    sleep(Duration::from_millis(50)).await;
    assert!(cache.peek(&key).is_none());
    assert!(handle.changed().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_fetch_is_reported_as_error() {
    init_tracing();
    let cache = QueryCache::new();
    let options = QueryOptions::default().with_retry(RetryPolicy::none());

    let result = cache
        .fetch_query(
            cache_key!["panics"],
            || async {
                if true {
                    panic!("fetch exploded");
                }
                Ok::<u32, io::Error>(0)
            },
            options,
        )
        .await;

    assert!(matches!(result, Err(QueryError::Panicked(_))));
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_independent() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let a = cache
        .fetch_query(cache_key!["a"], counting_fetch(&calls, Duration::ZERO), cache.default_options())
        .await
        .unwrap();
    let b = cache
        .fetch_query(cache_key!["b"], counting_fetch(&calls, Duration::ZERO), cache.default_options())
        .await
        .unwrap();

    assert_ne!(a, b);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
