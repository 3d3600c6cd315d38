use std::future::Future;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    payload: T,
    computed_at: i64,
}

/// Keeps the result of an expensive computation for `ttl_secs`.
///
/// The lock is held across recomputation, so concurrent callers that find the
/// entry stale wait for the one in-flight computation instead of starting
/// their own.
#[derive(Debug)]
pub struct StalenessCache<T> {
    ttl_secs: i64,
    entry: Mutex<Option<CacheEntry<T>>>,
}

impl<T: Clone> StalenessCache<T> {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs: ttl_secs as i64,
            entry: Mutex::new(None),
        }
    }

    pub async fn get<F, Fut>(&self, now_unix: i64, compute: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = self.entry.lock().await;
        if let Some(entry) = guard.as_ref() {
            if now_unix - entry.computed_at < self.ttl_secs {
                return entry.payload.clone();
            }
        }

        let payload = compute().await;
        *guard = Some(CacheEntry {
            payload: payload.clone(),
            computed_at: now_unix,
        });
        payload
    }

    /// Seconds since the stored payload was computed, if there is one.
    pub async fn age(&self, now_unix: i64) -> Option<i64> {
        self.entry
            .lock()
            .await
            .as_ref()
            .map(|e| now_unix.saturating_sub(e.computed_at))
    }
}
