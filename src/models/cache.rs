use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::{CreditAssessment, CreditScoreError, Grade, ReportResult, Result, ScoreResult};

/// Cached assessment for one address.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub address: String,
    pub assessment: CreditAssessment,
    pub report: Option<ReportResult>,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(address: String, assessment: CreditAssessment, expires_at: Instant) -> Self {
        Self {
            address,
            assessment,
            report: None,
            expires_at,
        }
    }

    pub fn score_result(&self) -> &ScoreResult {
        &self.assessment.score
    }

    pub fn grade(&self) -> Grade {
        self.assessment.grade
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

type Pending<T> = Shared<BoxFuture<'static, Result<T>>>;

struct CacheInner {
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, Pending<CacheEntry>>,
    reports_in_flight: DashMap<String, Pending<ReportResult>>,
    ttl: Duration,
    capacity: usize,
}

/// Frees an address in an in-flight registry when the owning task ends,
/// whether it returns or panics.
struct InFlightSlot<'a, T> {
    registry: &'a DashMap<String, Pending<T>>,
    address: &'a str,
}

impl<T> Drop for InFlightSlot<'_, T> {
    fn drop(&mut self) {
        self.registry.remove(self.address);
    }
}

impl CacheInner {
    fn lookup(&self, address: &str, now: Instant) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get(address) {
            if !entry.is_expired_at(now) {
                return Some(entry.value().clone());
            }
        }
        // Read guard is released above; expired entries go lazily here.
        self.entries.remove_if(address, |_, entry| entry.is_expired_at(now));
        None
    }

    fn cached_report(&self, address: &str) -> Option<ReportResult> {
        self.lookup(address, Instant::now()).and_then(|entry| entry.report)
    }

    fn attach(&self, address: &str, report: ReportResult) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(address) {
            Some(mut entry) if !entry.is_expired_at(now) => {
                entry.report = Some(report);
                true
            }
            _ => false,
        }
    }

    fn admit(&self, address: String, assessment: CreditAssessment) -> CacheEntry {
        let now = Instant::now();
        let entry = CacheEntry::new(address.clone(), assessment, now + self.ttl);

        if !self.entries.contains_key(&address) {
            self.make_room(now);
        }
        self.entries.insert(address, entry.clone());
        entry
    }

    fn make_room(&self, now: Instant) {
        if self.entries.len() < self.capacity {
            return;
        }
        self.entries.retain(|_, entry| !entry.is_expired_at(now));

        while self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.expires_at)
                .map(|entry| entry.key().clone());
            match victim {
                Some(address) => {
                    debug!("Evicting {} from result cache (capacity {})", address, self.capacity);
                    self.entries.remove(&address);
                }
                None => break,
            }
        }
    }
}

/// In-memory cache of enquiry results keyed by normalized address.
///
/// Concurrent requests for an address that is not cached share a single
/// computation. Locking is per shard of the underlying maps, so unrelated
/// addresses proceed in parallel.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                reports_in_flight: DashMap::new(),
                ttl,
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Returns the live entry for `address` without triggering computation.
    pub fn get(&self, address: &str) -> Option<CacheEntry> {
        self.inner.lookup(address, Instant::now())
    }

    /// Returns the cached entry for `address`, or runs `compute` once for all
    /// concurrent callers and caches its successful result.
    ///
    /// The computation runs as its own task: a caller dropping its future
    /// does not abort it, and nothing is cached unless it succeeds.
    pub async fn get_or_compute<F, Fut>(&self, address: &str, compute: F) -> Result<CacheEntry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CreditAssessment>> + Send + 'static,
    {
        if let Some(entry) = self.inner.lookup(address, Instant::now()) {
            debug!("Result cache hit for {}", address);
            return Ok(entry);
        }

        let pending = match self.inner.in_flight.entry(address.to_string()) {
            Entry::Occupied(slot) => {
                debug!("Joining in-flight computation for {}", address);
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                // A computation may have finished between the lookup above
                // and taking the registry slot.
                if let Some(entry) = self.inner.lookup(address, Instant::now()) {
                    return Ok(entry);
                }
                let inner = Arc::clone(&self.inner);
                let key = address.to_string();
                let work = compute();
                let pending = spawn_shared(address.to_string(), async move {
                    let _slot = InFlightSlot {
                        registry: &inner.in_flight,
                        address: &key,
                    };
                    work.await.map(|assessment| inner.admit(key.clone(), assessment))
                });
                slot.insert(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Returns the report attached to `address`, or runs `generate` once for
    /// all concurrent callers and attaches its result to the live entry.
    ///
    /// A report generated after its entry expired or was evicted is still
    /// returned to the waiting callers but is not stored.
    pub async fn get_or_generate_report<F, Fut>(&self, address: &str, generate: F) -> Result<ReportResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ReportResult>> + Send + 'static,
    {
        if let Some(report) = self.inner.cached_report(address) {
            debug!("Using cached report for {}", address);
            return Ok(report);
        }

        let pending = match self.inner.reports_in_flight.entry(address.to_string()) {
            Entry::Occupied(slot) => {
                debug!("Joining in-flight report for {}", address);
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                if let Some(report) = self.inner.cached_report(address) {
                    return Ok(report);
                }
                let inner = Arc::clone(&self.inner);
                let key = address.to_string();
                let work = generate();
                let pending = spawn_shared(address.to_string(), async move {
                    let _slot = InFlightSlot {
                        registry: &inner.reports_in_flight,
                        address: &key,
                    };
                    work.await.map(|report| {
                        if !inner.attach(&key, report.clone()) {
                            debug!("Entry for {} is gone, report not cached", key);
                        }
                        report
                    })
                });
                slot.insert(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Stores a report alongside a live entry. The entry keeps its expiry.
    pub fn attach_report(&self, address: &str, report: ReportResult) -> bool {
        self.inner.attach(address, report)
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.inner.entries.retain(|_, entry| !entry.is_expired_at(now));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.entries.len(),
            in_flight: self.inner.in_flight.len() + self.inner.reports_in_flight.len(),
            capacity: self.inner.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
}

/// Runs `task` on the runtime and hands every waiter a clone of its outcome.
fn spawn_shared<T, Fut>(address: String, task: Fut) -> Pending<T>
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(task);
    async move {
        handle.await.unwrap_or_else(|e| {
            warn!("Cached computation for {} did not complete: {}", address, e);
            Err(CreditScoreError::Internal(format!(
                "computation for {} did not complete: {}",
                address, e
            )))
        })
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, ScoreResult};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn assessment(address: &str, score: f64) -> CreditAssessment {
        CreditAssessment {
            address: address.to_string(),
            score: ScoreResult {
                score,
                offset: score,
                contributions: Vec::new(),
            },
            grade: Grade::LowRisk,
            transaction_count: 0,
            assessed_at: Utc::now(),
        }
    }

    fn report() -> ReportResult {
        ReportResult {
            narrative: "ok".to_string(),
            provider_used: "primary".to_string(),
            generated_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache
            .get_or_compute("0xa", || async { Ok(assessment("0xa", 610.0)) })
            .await
            .unwrap();
        assert!(cache.get("0xa").is_some());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get("0xa").is_some(), "entry is live up to and including the TTL");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("0xa").is_none());
        assert!(cache.is_empty(), "expired entry is removed on access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_recomputed() {
        let cache = ResultCache::new(Duration::from_secs(10), 10);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute("0xa", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(assessment("0xa", 600.0))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        let calls_clone = calls.clone();
        cache
            .get_or_compute("0xa", move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(assessment("0xa", 600.0))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let calls = Arc::new(AtomicU32::new(0));

        let waiters = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_compute("0xa", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(assessment("0xa", 640.0))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().assessment.score.score == 640.0));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let err = cache
            .get_or_compute("0xa", || async {
                Err(CreditScoreError::GatewayUnavailable("down".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, CreditScoreError::GatewayUnavailable("down".to_string()));
        assert!(cache.is_empty());

        let entry = cache
            .get_or_compute("0xa", || async { Ok(assessment("0xa", 580.0)) })
            .await
            .unwrap();
        assert_eq!(entry.grade(), Grade::LowRisk);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_soonest_expiring_at_capacity() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        for address in ["0xa", "0xb", "0xc"] {
            cache
                .get_or_compute(address, move || async move { Ok(assessment(address, 600.0)) })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.get("0xa").is_none());
        assert!(cache.get("0xb").is_some());
        assert!(cache.get("0xc").is_some());
    }

    #[tokio::test]
    async fn test_cancelled_caller_still_populates_cache() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let task_cache = cache.clone();
        let caller = tokio::spawn(async move {
            task_cache
                .get_or_compute("0xa", || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(assessment("0xa", 700.0))
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let entry = cache.get("0xa").expect("computation completed after cancellation");
        assert_eq!(entry.score_result().score, 700.0);
    }

    #[tokio::test]
    async fn test_attach_report_keeps_expiry() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let entry = cache
            .get_or_compute("0xa", || async { Ok(assessment("0xa", 600.0)) })
            .await
            .unwrap();

        assert!(cache.attach_report("0xa", report()));
        assert!(!cache.attach_report("0xb", report()));

        let cached = cache.get("0xa").unwrap();
        assert_eq!(cached.expires_at, entry.expires_at);
        assert_eq!(cached.report.unwrap().provider_used, "primary");
    }

    #[tokio::test]
    async fn test_concurrent_reports_share_one_generation() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache
            .get_or_compute("0xa", || async { Ok(assessment("0xa", 600.0)) })
            .await
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let waiters = (0..6).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_generate_report("0xa", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(report())
                    })
                    .await
            }
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|r| r.as_ref().unwrap() == first));
        assert_eq!(cache.get("0xa").unwrap().report.as_ref(), Some(first));
        assert_eq!(cache.stats().in_flight, 0);

        // Later callers read the attached report.
        let cached = cache
            .get_or_generate_report("0xa", || async {
                Err(CreditScoreError::Internal("should not run".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(cached.provider_used, "primary");
    }

    #[tokio::test]
    async fn test_failed_report_is_not_attached() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache
            .get_or_compute("0xa", || async { Ok(assessment("0xa", 600.0)) })
            .await
            .unwrap();

        let err = cache
            .get_or_generate_report("0xa", || async {
                Err(CreditScoreError::Template("no value".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreditScoreError::Template(_)));
        assert!(cache.get("0xa").unwrap().report.is_none());
    }

    #[tokio::test]
    async fn test_report_without_entry_is_returned_uncached() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let generated = cache
            .get_or_generate_report("0xb", || async { Ok(report()) })
            .await
            .unwrap();

        assert_eq!(generated.narrative, "ok");
        assert!(cache.get("0xb").is_none());
    }
}
