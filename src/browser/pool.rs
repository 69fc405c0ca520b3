//! Fixed-capacity page pool.
//!
//! Pages are lent out by [`PagePool::acquire`] and handed back with
//! [`PagePool::release`]. The free-list lives behind a single mutex and never
//! grows past its capacity; a page that fails to reset is closed instead of
//! being returned to circulation.
//!
//! [`PagePool::lease`] wraps a page in a [`PageLease`] so that a caller whose
//! future is cancelled mid-use still gives the page back.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::fingerprint::HeaderProfile;
use crate::error::ScrapeError;

/// A page that can live in a [`PagePool`].
#[async_trait]
pub trait PooledPage: Send + Sync + Sized + 'static {
    /// Wipe storage and cookies of the origin the page is currently on.
    async fn clear_site_data(&self) -> Result<(), ScrapeError>;

    /// Navigate to an empty document.
    async fn blank(&self) -> Result<(), ScrapeError>;

    /// Apply a fresh request identity before the page is lent out.
    async fn apply_identity(&self, headers: &HeaderProfile) -> Result<(), ScrapeError>;

    async fn is_closed(&self) -> bool;

    async fn close(self);
}

/// Opens new pages from the shared browser context.
#[async_trait]
pub trait PageFactory<P>: Send + Sync {
    async fn open_page(&self) -> Result<P, ScrapeError>;

    async fn shutdown(&self);
}

/// Lifetime counters for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    pub opened: u64,
    pub reused: u64,
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct AtomicCounters {
    opened: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

/// Pool of reusable pages over a [`PageFactory`].
pub struct PagePool<P, F> {
    factory: F,
    free: Mutex<Vec<P>>,
    capacity: usize,
    counters: AtomicCounters,
}

impl<P, F> PagePool<P, F>
where
    P: PooledPage,
    F: PageFactory<P>,
{
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            counters: AtomicCounters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Number of idle pages held by the pool.
    pub async fn free_len(&self) -> usize {
        self.free.lock().await.len()
    }

    pub fn counters(&self) -> PoolCounters {
        PoolCounters {
            opened: self.counters.opened.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Lend a page, reusing an idle one when possible.
    pub async fn acquire(&self) -> Result<P, ScrapeError> {
        let headers = HeaderProfile::random();

        let pooled = self.free.lock().await.pop();
        if let Some(page) = pooled {
            match page.apply_identity(&headers).await {
                Ok(()) => {
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    debug!("Reusing pooled page");
                    return Ok(page);
                }
                Err(e) => {
                    warn!("Discarding pooled page that failed to reset: {}", e);
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    page.close().await;
                }
            }
        }

        let page = self.factory.open_page().await?;
        self.counters.opened.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = page.apply_identity(&headers).await {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            page.close().await;
            return Err(e);
        }
        Ok(page)
    }

    /// Return a page. Closed pages and pages beyond capacity are closed.
    pub async fn release(&self, page: P) {
        if page.is_closed().await {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self.free.lock().await.len() >= self.capacity {
            page.close().await;
            return;
        }

        if let Err(e) = Self::scrub(&page).await {
            debug!("Closing page that failed to scrub: {}", e);
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            page.close().await;
            return;
        }

        let mut free = self.free.lock().await;
        if free.len() < self.capacity {
            free.push(page);
        } else {
            drop(free);
            page.close().await;
        }
    }

    /// Site data has to go while the page is still on the site's origin.
    async fn scrub(page: &P) -> Result<(), ScrapeError> {
        page.clear_site_data().await?;
        page.blank().await
    }

    /// Close every idle page and the browser behind them.
    pub async fn shutdown(&self) {
        let pages: Vec<P> = std::mem::take(&mut *self.free.lock().await);
        let count = pages.len();
        for page in pages {
            page.close().await;
        }
        self.factory.shutdown().await;

        let c = self.counters();
        info!(
            "Browser pool shut down ({} idle closed, {} opened, {} reused, {} discarded)",
            count, c.opened, c.reused, c.discarded
        );
    }
}

impl<P, F> PagePool<P, F>
where
    P: PooledPage,
    F: PageFactory<P> + 'static,
{
    /// Like [`acquire`](Self::acquire), but the page comes back on drop.
    pub async fn lease(self: &Arc<Self>) -> Result<PageLease<P, F>, ScrapeError> {
        let page = self.acquire().await?;
        Ok(PageLease {
            page: Some(page),
            pool: self.clone(),
        })
    }
}

/// A page on loan from a [`PagePool`].
///
/// [`release`](Self::release) returns it for reuse. A lease dropped without
/// being released (a cancelled or timed-out caller) closes its page on a
/// background task, since it may be stopped mid-navigation.
pub struct PageLease<P, F>
where
    P: PooledPage,
    F: PageFactory<P> + 'static,
{
    page: Option<P>,
    pool: Arc<PagePool<P, F>>,
}

impl<P, F> PageLease<P, F>
where
    P: PooledPage,
    F: PageFactory<P> + 'static,
{
    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            self.pool.release(page).await;
        }
    }
}

impl<P, F> Deref for PageLease<P, F>
where
    P: PooledPage,
    F: PageFactory<P> + 'static,
{
    type Target = P;

    fn deref(&self) -> &P {
        // Only `release` and `drop` take the page, and both consume the lease.
        self.page.as_ref().unwrap_or_else(|| unreachable!("page lease already released"))
    }
}

impl<P, F> Drop for PageLease<P, F>
where
    P: PooledPage,
    F: PageFactory<P> + 'static,
{
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        self.pool.counters.discarded.fetch_add(1, Ordering::Relaxed);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Page lease dropped before release, closing page");
                handle.spawn(page.close());
            }
            Err(_) => warn!("Page lease dropped outside a runtime; page left open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    type Events = Arc<std::sync::Mutex<Vec<&'static str>>>;

    struct FakePage {
        id: usize,
        closed: AtomicBool,
        fail_reset: AtomicBool,
        fail_scrub: bool,
        closes: Arc<AtomicUsize>,
        events: Events,
        last_agent: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl PooledPage for FakePage {
        async fn clear_site_data(&self) -> Result<(), ScrapeError> {
            self.events.lock().unwrap().push("clear");
            if self.fail_scrub {
                Err(ScrapeError::Browser("scrub failed".into()))
            } else {
                Ok(())
            }
        }

        async fn blank(&self) -> Result<(), ScrapeError> {
            self.events.lock().unwrap().push("blank");
            Ok(())
        }

        async fn apply_identity(&self, headers: &HeaderProfile) -> Result<(), ScrapeError> {
            if self.fail_reset.load(Ordering::SeqCst) {
                return Err(ScrapeError::Browser("reset failed".into()));
            }
            self.events.lock().unwrap().push("identity");
            *self.last_agent.lock().unwrap() = Some(headers.user_agent.clone());
            Ok(())
        }

        async fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn close(self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        next_id: AtomicUsize,
        closes: Arc<AtomicUsize>,
        events: Events,
        fail_scrub: bool,
    }

    #[async_trait]
    impl PageFactory<FakePage> for FakeFactory {
        async fn open_page(&self) -> Result<FakePage, ScrapeError> {
            Ok(FakePage {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                closed: AtomicBool::new(false),
                fail_reset: AtomicBool::new(false),
                fail_scrub: self.fail_scrub,
                closes: self.closes.clone(),
                events: self.events.clone(),
                last_agent: std::sync::Mutex::new(None),
            })
        }

        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn test_free_list_never_exceeds_capacity() {
        let pool = PagePool::new(FakeFactory::default(), 2);

        let mut lent = Vec::new();
        for _ in 0..5 {
            lent.push(pool.acquire().await.unwrap());
        }
        for page in lent {
            pool.release(page).await;
            assert!(pool.free_len().await <= 2);
        }
        assert_eq!(pool.free_len().await, 2);
        assert_eq!(pool.factory().closes.load(Ordering::SeqCst), 3);

        // Interleaved acquire/release keeps the bound.
        for _ in 0..10 {
            let a = pool.acquire().await.unwrap();
            let b = pool.acquire().await.unwrap();
            let c = pool.acquire().await.unwrap();
            pool.release(c).await;
            pool.release(a).await;
            pool.release(b).await;
            assert!(pool.free_len().await <= 2);
        }
    }

    #[tokio::test]
    async fn test_released_page_is_reused() {
        let pool = PagePool::new(FakeFactory::default(), 5);
        let page = pool.acquire().await.unwrap();
        let id = page.id;
        pool.release(page).await;

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id, id);
        assert!(again.last_agent.lock().unwrap().is_some());
        assert_eq!(pool.counters().reused, 1);
        assert_eq!(pool.counters().opened, 1);
    }

    #[tokio::test]
    async fn test_failed_reset_discards_page() {
        let pool = PagePool::new(FakeFactory::default(), 5);
        let page = pool.acquire().await.unwrap();
        let bad_id = page.id;
        page.fail_reset.store(true, Ordering::SeqCst);
        pool.release(page).await;
        assert_eq!(pool.free_len().await, 1);

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id, bad_id);
        assert_eq!(pool.counters().discarded, 1);
        assert_eq!(pool.factory().closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.free_len().await, 0);
    }

    #[tokio::test]
    async fn test_closed_page_not_pooled() {
        let pool = PagePool::new(FakeFactory::default(), 5);
        let page = pool.acquire().await.unwrap();
        page.closed.store(true, Ordering::SeqCst);
        pool.release(page).await;
        assert_eq!(pool.free_len().await, 0);
    }

    #[tokio::test]
    async fn test_failed_scrub_closes_page() {
        let factory = FakeFactory {
            fail_scrub: true,
            ..Default::default()
        };
        let pool = PagePool::new(factory, 5);
        let page = pool.acquire().await.unwrap();
        pool.release(page).await;
        assert_eq!(pool.free_len().await, 0);
        assert_eq!(pool.factory().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pool() {
        let pool = PagePool::new(FakeFactory::default(), 3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await;
        pool.release(b).await;
        pool.shutdown().await;
        assert_eq!(pool.free_len().await, 0);
        assert_eq!(pool.factory().closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_release() {
        let pool = Arc::new(PagePool::new(FakeFactory::default(), 2));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let page = pool.acquire().await.unwrap();
                    tokio::task::yield_now().await;
                    pool.release(page).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(pool.free_len().await <= 2);
    }

    #[tokio::test]
    async fn test_release_clears_site_data_before_blanking() {
        let pool = PagePool::new(FakeFactory::default(), 2);
        let page = pool.acquire().await.unwrap();
        pool.release(page).await;
        let again = pool.acquire().await.unwrap();
        pool.release(again).await;

        assert_eq!(
            pool.factory().events.lock().unwrap().as_slice(),
            ["identity", "clear", "blank", "identity", "clear", "blank"]
        );
    }

    #[tokio::test]
    async fn test_released_lease_returns_page() {
        let pool = Arc::new(PagePool::new(FakeFactory::default(), 2));
        let lease = pool.lease().await.unwrap();
        let id = lease.id;
        lease.release().await;

        assert_eq!(pool.free_len().await, 1);
        assert_eq!(pool.acquire().await.unwrap().id, id);
        assert_eq!(pool.counters().discarded, 0);
    }

    #[tokio::test]
    async fn test_cancelled_lease_closes_page() {
        let pool = Arc::new(PagePool::new(FakeFactory::default(), 2));

        let holder = {
            let pool = pool.clone();
            async move {
                let lease = pool.lease().await.unwrap();
                std::future::pending::<()>().await;
                lease.release().await;
            }
        };
        let outcome = tokio::time::timeout(Duration::from_millis(20), holder).await;
        assert!(outcome.is_err());

        for _ in 0..10 {
            if pool.factory().closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.factory().closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.counters().discarded, 1);
        assert_eq!(pool.free_len().await, 0);
    }
}
