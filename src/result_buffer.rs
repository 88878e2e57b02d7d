//! C11 — ResultBuffer. Stores query results not yet voiced, bounded by
//! capacity and a 30s expiry, with a periodic sweep that promotes stale
//! pendings to `expired` (spec §4.11). Grounded on the teacher's
//! `InboxManager::cleanup` (age-based eviction with a `MAX_MESSAGES` cap,
//! `voice-core/src/inbox/mod.rs`) generalized to priority-aware eviction.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::debug;

use crate::config::EngineConfig;
use crate::result::{BufferedResult, ExecutionResult, ResultPriority, ResultStatus};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

struct Inner {
    results: Vec<BufferedResult>,
}

pub struct ResultBuffer {
    inner: Mutex<Inner>,
    max_capacity: usize,
    expiration_ms: u64,
    cleanup_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl ResultBuffer {
    pub fn new(config: &EngineConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            inner: Mutex::new(Inner { results: Vec::new() }),
            max_capacity: config.result_buffer_max_capacity,
            expiration_ms: config.result_buffer_expiration_sec * 1000,
            cleanup_interval: Duration::from_secs(config.result_buffer_cleanup_sec),
            shutdown: shutdown_tx,
        })
    }

    /// Computes priority per spec §4.11: deletes and large amounts (>1000)
    /// are critical, everything else normal.
    pub fn priority_for(_execution_result: &ExecutionResult, is_delete: bool, amount: Option<f64>) -> ResultPriority {
        if is_delete {
            return ResultPriority::Critical;
        }
        if amount.map(|a| a.abs() > 1000.0).unwrap_or(false) {
            return ResultPriority::Critical;
        }
        ResultPriority::Normal
    }

    /// Inserts a new buffered result, evicting to make room if at
    /// capacity. Eviction prefers the oldest non-pending (or stale
    /// pending) entry; if every entry is still fresh and pending, the
    /// oldest pending is force-evicted anyway (spec §4.11).
    pub fn insert(&self, id: impl Into<String>, execution_result: ExecutionResult, priority: ResultPriority, description: impl Into<String>, amount: Option<f64>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.results.len() >= self.max_capacity {
            self.evict_one(&mut inner);
        }
        inner.results.push(BufferedResult {
            id: id.into(),
            execution_result,
            priority,
            status: ResultStatus::Pending,
            created_at_ms: now_ms(),
            description: description.into(),
            amount,
        });
    }

    fn evict_one(&self, inner: &mut Inner) {
        let now = now_ms();
        let evictable_index = inner
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status != ResultStatus::Pending || now.saturating_sub(r.created_at_ms) > self.expiration_ms)
            .min_by_key(|(_, r)| r.created_at_ms)
            .map(|(i, _)| i);

        let evict_index = evictable_index.or_else(|| {
            inner
                .results
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| r.created_at_ms)
                .map(|(i, _)| i)
        });

        if let Some(index) = evict_index {
            let evicted = inner.results.remove(index);
            debug!(id = %evicted.id, "result buffer evicted entry to make room");
        }
    }

    /// Marks `id` as delivered (`notified`) if it's still pending.
    pub fn mark_notified(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.results.iter_mut().find(|r| r.id == id) {
            Some(r) => r.transition(ResultStatus::Notified),
            None => false,
        }
    }

    pub fn mark_suppressed(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.results.iter_mut().find(|r| r.id == id) {
            Some(r) => r.transition(ResultStatus::Suppressed),
            None => false,
        }
    }

    pub fn pending(&self) -> Vec<BufferedResult> {
        self.inner
            .lock()
            .unwrap()
            .results
            .iter()
            .filter(|r| r.status == ResultStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().results.iter().filter(|r| r.status == ResultStatus::Pending).count()
    }

    pub fn highest_pending_priority(&self) -> Option<ResultPriority> {
        self.pending().into_iter().map(|r| r.priority).min()
    }

    /// Marks every stale pending result `expired` and drops anything
    /// already `expired`/`notified`, in a single pass so readers never see
    /// a result that's logically gone but still `pending` (spec §4.11
    /// "atomic sweep").
    pub fn sweep(&self) {
        let now = now_ms();
        let mut inner = self.inner.lock().unwrap();
        for r in inner.results.iter_mut() {
            if r.status == ResultStatus::Pending && now.saturating_sub(r.created_at_ms) > self.expiration_ms {
                r.transition(ResultStatus::Expired);
            }
        }
        inner.results.retain(|r| !matches!(r.status, ResultStatus::Expired | ResultStatus::Notified));
    }

    /// Spawns the periodic sweeper. Call once per buffer lifetime.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let buffer = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(buffer.cleanup_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => buffer.sweep(),
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    /// Cancels the sweeper timer *before* clearing state, so a sweep
    /// in-flight can't race a caller that's simultaneously tearing down
    /// (spec §4.11).
    pub fn dispose(&self) {
        let _ = self.shutdown.send(true);
        self.inner.lock().unwrap().results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExecutionResult {
        ExecutionResult::ok("op", serde_json::json!({}))
    }

    #[test]
    fn capacity_is_enforced() {
        let config = EngineConfig { result_buffer_max_capacity: 2, ..EngineConfig::default() };
        let buffer = ResultBuffer::new(&config);
        buffer.insert("a", sample(), ResultPriority::Normal, "a", None);
        buffer.insert("b", sample(), ResultPriority::Normal, "b", None);
        buffer.insert("c", sample(), ResultPriority::Normal, "c", None);
        assert_eq!(buffer.pending_count(), 2);
    }

    #[test]
    fn eviction_prefers_non_pending_entries() {
        let config = EngineConfig { result_buffer_max_capacity: 2, ..EngineConfig::default() };
        let buffer = ResultBuffer::new(&config);
        buffer.insert("a", sample(), ResultPriority::Normal, "a", None);
        buffer.mark_notified("a");
        buffer.insert("b", sample(), ResultPriority::Normal, "b", None);
        buffer.insert("c", sample(), ResultPriority::Normal, "c", None);

        let ids: Vec<String> = buffer.pending().into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&"b".to_string()));
        assert!(ids.contains(&"c".to_string()));
    }

    #[test]
    fn sweep_expires_stale_pending_and_removes_terminal_entries() {
        let config = EngineConfig { result_buffer_expiration_sec: 0, ..EngineConfig::default() };
        let buffer = ResultBuffer::new(&config);
        buffer.insert("a", sample(), ResultPriority::Normal, "a", None);
        std::thread::sleep(Duration::from_millis(5));
        buffer.sweep();
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn priority_for_delete_is_always_critical() {
        assert_eq!(ResultBuffer::priority_for(&sample(), true, None), ResultPriority::Critical);
    }

    #[test]
    fn priority_for_large_amount_is_critical() {
        assert_eq!(ResultBuffer::priority_for(&sample(), false, Some(1500.0)), ResultPriority::Critical);
        assert_eq!(ResultBuffer::priority_for(&sample(), false, Some(50.0)), ResultPriority::Normal);
    }
}
