use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use trawler_core::{BrowserBackend, BrowserError, BrowserPool, BrowserResult, PoolOptions};

/// Counts launches and closes instead of spawning real browsers.
#[derive(Default)]
struct CountingBackend {
    launched: AtomicUsize,
    closed: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
}

struct CountingHandle;

/// Backend facade sharing its counters with the test body.
struct SharedBackend(Arc<CountingBackend>);

#[async_trait]
impl BrowserBackend for SharedBackend {
    type Handle = CountingHandle;

    async fn launch(&self) -> BrowserResult<Self::Handle> {
        self.0.launched.fetch_add(1, Ordering::SeqCst);
        let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(CountingHandle)
    }

    async fn close(&self, _handle: Self::Handle) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn quick_options(max: usize, min: usize) -> PoolOptions {
    PoolOptions {
        max_pool_size: max,
        min_pool_size: min,
        idle_timeout: Duration::from_secs(60),
        retry_limit: 3,
        lease_poll_initial: Duration::from_millis(10),
        lease_poll_interval: Duration::from_millis(10),
    }
}

fn counting_pool(
    options: PoolOptions,
) -> (Arc<BrowserPool<SharedBackend>>, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::default());
    let pool = Arc::new(BrowserPool::new(
        SharedBackend(Arc::clone(&backend)),
        options,
    ));
    (pool, backend)
}

#[tokio::test]
async fn initialize_warms_to_min_pool_size() {
    let (pool, backend) = counting_pool(quick_options(4, 2));
    pool.initialize().await.unwrap();

    let stats = pool.stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(backend.launched.load(Ordering::SeqCst), 2);

    pool.shutdown().await.unwrap();
    assert_eq!(backend.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lease_reuses_idle_browsers_before_launching() {
    let (pool, backend) = counting_pool(quick_options(3, 1));
    pool.initialize().await.unwrap();

    let lease = pool.lease().await.unwrap();
    pool.release(lease).await;
    let lease = pool.lease().await.unwrap();
    pool.release(lease).await;

    // The warm browser served both leases.
    assert_eq!(backend.launched.load(Ordering::SeqCst), 1);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_leases_never_exceed_max_pool_size() {
    let (pool, backend) = counting_pool(PoolOptions {
        retry_limit: 30,
        ..quick_options(3, 0)
    });
    pool.initialize().await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let lease = pool.lease().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(lease).await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert!(backend.peak_live.load(Ordering::SeqCst) <= 3);
    assert!(pool.stats().await.total <= 3);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn waiter_acquires_after_release_within_polling_window() {
    let (pool, _backend) = counting_pool(PoolOptions {
        retry_limit: 50,
        ..quick_options(1, 0)
    });
    pool.initialize().await.unwrap();

    let held = pool.lease().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let lease = pool.lease().await.unwrap();
            pool.release(lease).await;
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    pool.release(held).await;
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should acquire after release")
        .unwrap();
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_pool_reports_poll_count() {
    let (pool, _backend) = counting_pool(PoolOptions {
        retry_limit: 2,
        ..quick_options(1, 0)
    });
    pool.initialize().await.unwrap();

    let held = pool.lease().await.unwrap();
    match pool.lease().await {
        Err(BrowserError::PoolExhausted { polls }) => assert_eq!(polls, 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("saturated pool handed out a lease"),
    }

    pool.release(held).await;
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_rejects_new_leases_and_closes_browsers() {
    let (pool, backend) = counting_pool(quick_options(2, 2));
    pool.initialize().await.unwrap();
    pool.shutdown().await.unwrap();

    assert!(matches!(
        pool.lease().await,
        Err(BrowserError::ShuttingDown)
    ));
    assert_eq!(backend.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stats_reflect_leases_in_flight() {
    let (pool, _backend) = counting_pool(quick_options(3, 1));
    pool.initialize().await.unwrap();

    let lease = pool.lease().await.unwrap();
    let stats = pool.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.in_use, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.max_pool_size, 3);

    pool.release(lease).await;
    let stats = pool.stats().await;
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 1);
    pool.shutdown().await.unwrap();
}
