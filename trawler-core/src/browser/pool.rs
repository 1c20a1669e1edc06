//! Bounded pool of reusable browser instances.
//!
//! Leases hand out shared handles; `max_pool_size` counts live browsers
//! plus launches in flight, so concurrent leases never over-launch. Callers
//! that find the pool full wait through a short polling window before the
//! lease is refused.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PoolSection;
use crate::model::PoolSettings;

use super::backend::BrowserBackend;
use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_pool_size: usize,
    pub min_pool_size: usize,
    pub idle_timeout: Duration,
    pub retry_limit: u32,
    pub lease_poll_initial: Duration,
    pub lease_poll_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 5,
            min_pool_size: 2,
            idle_timeout: Duration::from_secs(60),
            retry_limit: 3,
            lease_poll_initial: Duration::from_secs(1),
            lease_poll_interval: Duration::from_secs(2),
        }
    }
}

impl PoolOptions {
    pub fn from_section(section: &PoolSection) -> Self {
        Self {
            max_pool_size: section.max_pool_size as usize,
            min_pool_size: section.min_pool_size as usize,
            idle_timeout: Duration::from_millis(section.idle_timeout_ms),
            retry_limit: section.retry_limit,
            lease_poll_initial: Duration::from_millis(section.lease_poll_initial_ms),
            lease_poll_interval: Duration::from_millis(section.lease_poll_interval_ms),
        }
    }

    /// Persisted settings override the sizing knobs; the polling cadence
    /// stays with the config file.
    pub fn with_settings(mut self, settings: &PoolSettings) -> Self {
        self.max_pool_size = settings.max_pool_size as usize;
        self.min_pool_size = settings.min_pool_size as usize;
        self.idle_timeout = Duration::from_millis(settings.idle_timeout_ms);
        self.retry_limit = settings.retry_limit;
        self
    }
}

struct PooledBrowser<H> {
    id: Uuid,
    handle: Arc<H>,
    in_use: bool,
    last_used: Instant,
}

struct PoolState<H> {
    browsers: Vec<PooledBrowser<H>>,
    launching: usize,
}

impl<H> Default for PoolState<H> {
    fn default() -> Self {
        Self {
            browsers: Vec::new(),
            launching: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub launching: usize,
    pub pages_created: u64,
    pub max_pool_size: usize,
    pub min_pool_size: usize,
}

/// An exclusive claim on one pooled browser. Hand it back with
/// [`BrowserPool::release`]; a lease dropped without release is returned to
/// the pool on a best-effort basis and logged.
pub struct BrowserLease<H: Send + Sync + 'static> {
    id: Uuid,
    handle: Arc<H>,
    state: Arc<Mutex<PoolState<H>>>,
    released: bool,
}

impl<H: Send + Sync + 'static> BrowserLease<H> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H: Send + Sync + 'static> Drop for BrowserLease<H> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(browser_id = %self.id, "browser lease dropped without explicit release");
        let state = Arc::clone(&self.state);
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                mark_free(&state, id).await;
            });
        }
    }
}

async fn mark_free<H>(state: &Mutex<PoolState<H>>, id: Uuid) {
    let mut state = state.lock().await;
    if let Some(entry) = state.browsers.iter_mut().find(|entry| entry.id == id) {
        entry.in_use = false;
        entry.last_used = Instant::now();
    }
}

pub struct BrowserPool<B: BrowserBackend> {
    backend: Arc<B>,
    options: PoolOptions,
    state: Arc<Mutex<PoolState<B::Handle>>>,
    shutting_down: Arc<AtomicBool>,
    pages_created: AtomicU64,
    maintenance: StdMutex<Option<JoinHandle<()>>>,
}

impl<B: BrowserBackend> BrowserPool<B> {
    pub fn new(backend: B, options: PoolOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            options,
            state: Arc::new(Mutex::new(PoolState::default())),
            shutting_down: Arc::new(AtomicBool::new(false)),
            pages_created: AtomicU64::new(0),
            maintenance: StdMutex::new(None),
        }
    }

    /// Bumps the lifetime page counter reported by [`BrowserPool::stats`].
    pub(crate) fn record_page_created(&self) {
        self.pages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Warms the pool up to `min_pool_size` and starts the maintenance task
    /// that reaps idle browsers. The warm-up launches run concurrently; any
    /// launch failure closes the browsers that did come up and fails the
    /// whole initialization.
    pub async fn initialize(self: &Arc<Self>) -> BrowserResult<()> {
        let launches = (0..self.options.min_pool_size).map(|_| self.backend.launch());
        let mut handles = Vec::with_capacity(self.options.min_pool_size);
        let mut first_error = None;
        for result in futures::future::join_all(launches).await {
            match result {
                Ok(handle) => handles.push(Arc::new(handle)),
                Err(err) => first_error = first_error.or(Some(err)),
            }
        }
        if let Some(err) = first_error {
            warn!(error = %err, "pool warm-up failed, closing partial launches");
            for handle in handles {
                self.close_handle(handle).await;
            }
            return Err(err);
        }

        {
            let mut state = self.state.lock().await;
            for handle in handles {
                let id = Uuid::new_v4();
                state.browsers.push(PooledBrowser {
                    id,
                    handle,
                    in_use: false,
                    last_used: Instant::now(),
                });
                debug!(browser_id = %id, "warmed pooled browser");
            }
        }

        let period = std::cmp::max(Duration::from_secs(30), self.options.idle_timeout / 2);
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                pool.maintain().await;
            }
        });
        if let Ok(mut slot) = self.maintenance.lock() {
            *slot = Some(task);
        }

        info!(
            min = self.options.min_pool_size,
            max = self.options.max_pool_size,
            "browser pool initialized"
        );
        Ok(())
    }

    /// Claims a browser, launching one when the pool has room. When the
    /// pool is saturated the call polls for a freed browser: one initial
    /// delay, then `retry_limit` interval polls before giving up.
    pub async fn lease(&self) -> BrowserResult<BrowserLease<B::Handle>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BrowserError::ShuttingDown);
        }
        if let Some(lease) = self.try_acquire().await? {
            return Ok(lease);
        }

        debug!("pool saturated, waiting for a browser to be released");
        for poll in 0..self.options.retry_limit {
            let wait = if poll == 0 {
                self.options.lease_poll_initial
            } else {
                self.options.lease_poll_interval
            };
            tokio::time::sleep(wait).await;
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(BrowserError::ShuttingDown);
            }
            if let Some(lease) = self.try_acquire().await? {
                return Ok(lease);
            }
        }
        Err(BrowserError::PoolExhausted {
            polls: self.options.retry_limit,
        })
    }

    async fn try_acquire(&self) -> BrowserResult<Option<BrowserLease<B::Handle>>> {
        {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.browsers.iter_mut().find(|entry| !entry.in_use) {
                entry.in_use = true;
                entry.last_used = Instant::now();
                let lease = BrowserLease {
                    id: entry.id,
                    handle: Arc::clone(&entry.handle),
                    state: Arc::clone(&self.state),
                    released: false,
                };
                return Ok(Some(lease));
            }
            if state.browsers.len() + state.launching >= self.options.max_pool_size {
                return Ok(None);
            }
            // Reserve the slot before launching outside the lock.
            state.launching += 1;
        }

        match self.backend.launch().await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                let id = Uuid::new_v4();
                let mut state = self.state.lock().await;
                state.launching -= 1;
                if self.shutting_down.load(Ordering::SeqCst) {
                    drop(state);
                    self.close_handle(handle).await;
                    return Err(BrowserError::ShuttingDown);
                }
                state.browsers.push(PooledBrowser {
                    id,
                    handle: Arc::clone(&handle),
                    in_use: true,
                    last_used: Instant::now(),
                });
                info!(browser_id = %id, total = state.browsers.len(), "launched pooled browser");
                Ok(Some(BrowserLease {
                    id,
                    handle,
                    state: Arc::clone(&self.state),
                    released: false,
                }))
            }
            Err(err) => {
                self.state.lock().await.launching -= 1;
                Err(err)
            }
        }
    }

    pub async fn release(&self, mut lease: BrowserLease<B::Handle>) {
        lease.released = true;
        let id = lease.id;
        drop(lease);
        mark_free(&self.state, id).await;
    }

    /// Closes browsers idle past the timeout while keeping `min_pool_size`
    /// warm.
    async fn maintain(&self) {
        let mut reaped = Vec::new();
        {
            let mut state = self.state.lock().await;
            let mut index = 0;
            while index < state.browsers.len() {
                let excess = state.browsers.len() > self.options.min_pool_size;
                let entry = &state.browsers[index];
                if excess && !entry.in_use && entry.last_used.elapsed() >= self.options.idle_timeout
                {
                    reaped.push(state.browsers.remove(index));
                } else {
                    index += 1;
                }
            }
        }
        for entry in reaped {
            debug!(browser_id = %entry.id, "reaping idle browser");
            self.close_handle(entry.handle).await;
        }
    }

    pub async fn shutdown(&self) -> BrowserResult<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        let browsers = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.browsers)
        };
        info!(count = browsers.len(), "shutting down browser pool");
        for entry in browsers {
            if entry.in_use {
                warn!(browser_id = %entry.id, "closing browser that was still leased");
            }
            self.close_handle(entry.handle).await;
        }
        Ok(())
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let in_use = state.browsers.iter().filter(|entry| entry.in_use).count();
        PoolStats {
            total: state.browsers.len(),
            in_use,
            idle: state.browsers.len() - in_use,
            launching: state.launching,
            pages_created: self.pages_created.load(Ordering::Relaxed),
            max_pool_size: self.options.max_pool_size,
            min_pool_size: self.options.min_pool_size,
        }
    }

    async fn close_handle(&self, handle: Arc<B::Handle>) {
        match Arc::try_unwrap(handle) {
            Ok(handle) => self.backend.close(handle).await,
            Err(_) => warn!("browser handle still shared at close time, dropping pool reference"),
        }
    }
}
