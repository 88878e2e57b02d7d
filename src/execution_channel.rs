//! C8 — ExecutionChannel, the scheduling core (spec §4.8). Three priority
//! lanes drained under a strict async mutex so at most one operation ever
//! executes at a time, with a 2.5s aggregation window for deferred/
//! background batches (armed once per batch, on its first enqueue, and
//! backed by a `max_deferred_wait_ms` hard ceiling so a steady trickle of
//! enqueues can't delay it forever) and immediate pre-emption of any
//! pending deferred batch. Retryable adapter failures (network/timeout)
//! are retried with doubling backoff inside the same critical section
//! before a result is dispatched.
//!
//! The async-mutex shape (a FIFO of waiters, each woken by completing a
//! `oneshot`) is new code — no pack repo implements a custom one — but it
//! follows the same waiter-queue design `tokio::sync::Mutex` itself uses
//! internally, as spec.md §4.8/§9 call for this exact shape (a critical
//! section spanning `.await` points, i.e. the adapter's `execute()` call).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::collaborators::OperationAdapter;
use crate::config::EngineConfig;
use crate::error::{CoreError, ErrorHandler, ErrorKind, ErrorSeverity};
use crate::operation::{Operation, Priority};
use crate::result::ExecutionResult;

type ResultCallback = Box<dyn Fn(ExecutionResult) + Send + Sync>;

struct Queues {
    immediate: VecDeque<Operation>,
    normal: VecDeque<Operation>,
    deferred: VecDeque<Operation>,
}

impl Queues {
    fn new() -> Self {
        Self { immediate: VecDeque::new(), normal: VecDeque::new(), deferred: VecDeque::new() }
    }

    fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

/// FIFO of waiters for the channel's internal async mutex. Each entry is a
/// `oneshot::Sender` completed when the waiter acquires the lock.
struct LockState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct Inner {
    queues: Mutex<Queues>,
    lock: Mutex<LockState>,
    disposed: std::sync::atomic::AtomicBool,
    /// Bumped each time a new deferred/background batch starts (transition
    /// from an empty deferred queue to non-empty) or is flushed. Timers
    /// spawned for a batch capture the generation at arm time and check it
    /// before firing, so a batch that already flushed doesn't flush again,
    /// and — critically — later enqueues into an *already-running* batch
    /// must NOT bump this, or they'd invalidate the batch's own timers
    /// (spec §8 scenario 2: "the timer is not reset, it was started on the
    /// first enqueue").
    deferred_batch_generation: std::sync::atomic::AtomicU64,
}

/// The scheduling core: three priority queues plus a strict-serial
/// execution guarantee over a pluggable `OperationAdapter`.
pub struct ExecutionChannel {
    inner: Arc<Inner>,
    adapter: Arc<dyn OperationAdapter>,
    error_handler: Arc<dyn ErrorHandler>,
    on_result: Mutex<Option<ResultCallback>>,
    max_queue_size: usize,
    lock_timeout: Duration,
    aggregation_window: Duration,
    /// Hard ceiling on how long a deferred/background batch may sit
    /// unflushed, independent of the rolling aggregation window (spec §5).
    max_deferred_wait: Duration,
    /// How many times a retryable (network/timeout) execution failure is
    /// retried before giving up (spec §6/§7).
    max_retries: u32,
    /// Base backoff delay before the first retry; doubled on each
    /// subsequent attempt.
    initial_retry_delay: Duration,
}

impl ExecutionChannel {
    pub fn new(config: &EngineConfig, adapter: Arc<dyn OperationAdapter>, error_handler: Arc<dyn ErrorHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(Queues::new()),
                lock: Mutex::new(LockState { held: false, waiters: VecDeque::new() }),
                disposed: std::sync::atomic::AtomicBool::new(false),
                deferred_batch_generation: std::sync::atomic::AtomicU64::new(0),
            }),
            adapter,
            error_handler,
            on_result: Mutex::new(None),
            max_queue_size: config.max_queue_size,
            lock_timeout: Duration::from_secs(config.lock_timeout_sec),
            aggregation_window: Duration::from_millis(config.aggregation_window_ms),
            max_deferred_wait: Duration::from_millis(config.max_deferred_wait_ms),
            max_retries: config.max_retries,
            initial_retry_delay: Duration::from_millis(config.initial_retry_delay_ms),
        }
    }

    /// Registers the callback invoked with every operation's
    /// `ExecutionResult`. A throwing/panicking callback is caught and
    /// logged rather than aborting subsequent callbacks (spec §4.8).
    pub fn on_result(&self, callback: impl Fn(ExecutionResult) + Send + Sync + 'static) {
        *self.on_result.lock().unwrap() = Some(Box::new(callback));
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Enqueues `op` per its priority and, for `immediate`, executes it
    /// (after flushing any waiting deferred batch) before returning.
    pub async fn enqueue(self: &Arc<Self>, op: Operation) {
        if self.is_disposed() {
            return;
        }

        match op.priority {
            Priority::Immediate => {
                self.flush_deferred_locked().await;
                self.run_one(op).await;
            }
            Priority::Normal => {
                {
                    let mut queues = self.inner.queues.lock().unwrap();
                    queues.normal.push_back(op);
                }
                self.drain_normal().await;
            }
            Priority::Deferred | Priority::Background => {
                let overflowed = {
                    let queues = self.inner.queues.lock().unwrap();
                    queues.deferred_len() >= self.max_queue_size
                };
                if overflowed {
                    // Overflow: flush *before* appending so the post-append
                    // length is 1, never > max_queue_size (spec §4.8/§8).
                    self.flush_deferred_locked().await;
                }
                let is_first_in_batch = {
                    let mut queues = self.inner.queues.lock().unwrap();
                    let was_empty = queues.deferred.is_empty();
                    queues.deferred.push_back(op);
                    was_empty
                };
                // Only the enqueue that starts a new batch (deferred queue
                // was empty) arms the batch's timers. Later arrivals ride
                // the same window rather than resetting it (spec §8
                // scenario 2).
                if is_first_in_batch {
                    self.arm_deferred_batch_timers();
                }
            }
        }
    }

    /// Drains normal + deferred queues and returns once both are empty.
    /// Used by C10's `process()` to ensure every operation from one
    /// recognized utterance has at least started executing before the
    /// reply is generated.
    pub async fn flush(self: &Arc<Self>) {
        self.drain_normal().await;
        self.flush_deferred_locked().await;
    }

    async fn drain_normal(self: &Arc<Self>) {
        loop {
            let next = {
                let mut queues = self.inner.queues.lock().unwrap();
                queues.normal.pop_front()
            };
            match next {
                Some(op) => self.run_one(op).await,
                None => return,
            }
        }
    }

    async fn flush_deferred_locked(self: &Arc<Self>) {
        let batch: Vec<Operation> = {
            let mut queues = self.inner.queues.lock().unwrap();
            queues.deferred.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        // The batch is done: bump the generation so any still-pending timer
        // for it (the aggregation window if the hard cap fired first, or
        // vice versa) becomes a harmless no-op instead of flushing again.
        self.inner.deferred_batch_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        for op in batch {
            self.run_one(op).await;
        }
    }

    /// Arms the two timers that govern a deferred/background batch's
    /// lifetime (spec §5, §8 scenario 2): the rolling `aggregation_window`
    /// that flushes once things go quiet, started on the *first* enqueue
    /// of the batch and never reset by later ones, and a `max_deferred_wait`
    /// hard ceiling that force-flushes regardless, so a steady trickle of
    /// enqueues under the aggregation window can't delay the batch forever.
    fn arm_deferred_batch_timers(self: &Arc<Self>) {
        let generation = self.inner.deferred_batch_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;

        let aggregation_channel = Arc::clone(self);
        let aggregation_window = self.aggregation_window;
        tokio::spawn(async move {
            tokio::time::sleep(aggregation_window).await;
            if aggregation_channel.inner.deferred_batch_generation.load(std::sync::atomic::Ordering::SeqCst) == generation {
                aggregation_channel.flush_deferred_locked().await;
            }
        });

        let cap_channel = Arc::clone(self);
        let max_deferred_wait = self.max_deferred_wait;
        tokio::spawn(async move {
            tokio::time::sleep(max_deferred_wait).await;
            if cap_channel.inner.deferred_batch_generation.load(std::sync::atomic::Ordering::SeqCst) == generation {
                warn!("deferred batch hit max_deferred_wait_ms, force-flushing");
                cap_channel.flush_deferred_locked().await;
            }
        });
    }

    /// Acquires the async mutex (with a timeout), executes `op` through the
    /// adapter, releases the lock, and dispatches the result callback.
    async fn run_one(self: &Arc<Self>, op: Operation) {
        if !self.acquire_lock().await {
            warn!(op_id = %op.id, "execution lock acquisition timed out");
            self.dispatch_result(ExecutionResult::failed(op.id, "操作超时，请重试"));
            return;
        }

        let result = self.execute_with_retries(&op).await;

        self.release_lock();
        self.dispatch_result(result);
    }

    /// Retries a retryable (network/timeout) adapter failure up to
    /// `max_retries` times with doubling backoff, starting from
    /// `initial_retry_delay_ms` (spec §6/§7). The retry loop runs entirely
    /// inside the held lock — it's part of the same await chain the
    /// critical section already spans, so other operations still wait
    /// their turn rather than interleaving with a retrying one. Non-
    /// retryable failures (everything but network/timeout) fail fast.
    async fn execute_with_retries(&self, op: &Operation) -> ExecutionResult {
        let mut delay = self.initial_retry_delay;
        for attempt in 0..=self.max_retries {
            match self.adapter.execute(op).await {
                Ok(result) => return result,
                Err(err) => {
                    let retryable = err.retryable && attempt < self.max_retries;
                    self.error_handler.on_error(&err);
                    if !retryable {
                        return ExecutionResult::failed(op.id.clone(), err.user_message().to_string());
                    }
                    warn!(op_id = %op.id, attempt, delay_ms = delay.as_millis() as u64, "retrying retryable execution failure");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("loop always returns on success or final attempt")
    }

    fn dispatch_result(&self, result: ExecutionResult) {
        let callback = self.on_result.lock().unwrap();
        if let Some(callback) = callback.as_ref() {
            // A panicking callback must not abort subsequent callbacks
            // (spec §4.8) — it's absorbed and logged via the error
            // handler, never propagated.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(result)));
            if outcome.is_err() {
                self.error_handler.on_error(
                    &CoreError::new("execution_channel", ErrorKind::Callback, "result callback panicked")
                        .with_severity(ErrorSeverity::Error),
                );
            }
        }
    }

    /// Acquires the single-slot async mutex, honoring the configured
    /// timeout. Implements the §4.8 race: if this waiter's timeout fires
    /// but it was *already* granted the lock in the same instant, it must
    /// still release it rather than leaking a held lock forever.
    async fn acquire_lock(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        {
            let mut lock = self.inner.lock.lock().unwrap();
            if !lock.held {
                lock.held = true;
                return true;
            }
            lock.waiters.push_back(tx);
        }

        let mut rx = rx;
        tokio::select! {
            biased;
            res = &mut rx => return res.is_ok(),
            _ = tokio::time::sleep(self.lock_timeout) => {}
        }

        // The sleep branch won the race. The waiter's sender is still
        // sitting in the queue (we never removed it) — if `release_lock`
        // granted it in the same instant we'd otherwise leak a held lock
        // nobody will ever use, so check for that before giving up.
        match rx.try_recv() {
            Ok(()) => {
                self.release_lock();
                false
            }
            Err(_) => false,
        }
    }

    /// Hands the lock to the next waiter, skipping any whose receiver was
    /// already dropped (an abandoned timed-out waiter) instead of leaving
    /// the lock permanently "held" with nobody to run it.
    fn release_lock(&self) {
        let mut lock = self.inner.lock.lock().unwrap();
        while let Some(waiter) = lock.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        lock.held = false;
    }

    /// Cancels the aggregation timer, clears every queue, completes every
    /// waiting lock acquisition harmlessly, and prevents further enqueues.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, std::sync::atomic::Ordering::Release);
        self.inner.deferred_batch_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        {
            let mut queues = self.inner.queues.lock().unwrap();
            queues.immediate.clear();
            queues.normal.clear();
            queues.deferred.clear();
        }
        {
            let mut lock = self.inner.lock.lock().unwrap();
            for waiter in lock.waiters.drain(..) {
                let _ = waiter.send(());
            }
            lock.held = false;
        }
        debug!("execution channel disposed");
    }

    pub fn deferred_queue_len(&self) -> usize {
        self.inner.queues.lock().unwrap().deferred_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DefaultErrorHandler;
    use crate::operation::OperationParams;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingAdapter {
        order: Arc<AsyncMutex<Vec<String>>>,
        concurrent: Arc<AtomicUsize>,
        max_concurrent_seen: Arc<AtomicUsize>,
    }

    impl OperationAdapter for RecordingAdapter {
        async fn execute(&self, op: &Operation) -> Result<ExecutionResult, CoreError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.order.lock().await.push(op.id.clone());
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecutionResult::ok(op.id.clone(), serde_json::json!({})))
        }
    }

    fn noop_op(priority: Priority) -> Operation {
        Operation::new(crate::operation::OperationType::AddTransaction, priority, OperationParams::AddTransaction {
            amount: 10.0,
            category: "测试".into(),
            note: None,
        })
    }

    #[tokio::test]
    async fn at_most_one_operation_executes_at_a_time() {
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(RecordingAdapter {
            order: order.clone(),
            concurrent: concurrent.clone(),
            max_concurrent_seen: max_seen.clone(),
        });
        let channel = Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));

        let a = channel.clone();
        let b = channel.clone();
        let op_a = noop_op(Priority::Normal);
        let op_b = noop_op(Priority::Normal);
        let (r1, r2) = tokio::join!(a.enqueue(op_a), b.enqueue(op_b));
        let _ = (r1, r2);

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_priority_executes_in_arrival_order() {
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let adapter = Arc::new(RecordingAdapter {
            order: order.clone(),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let channel = Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));

        let mut first = noop_op(Priority::Normal);
        first.id = "first".into();
        let mut second = noop_op(Priority::Normal);
        second.id = "second".into();

        channel.enqueue(first).await;
        channel.enqueue(second).await;

        assert_eq!(*order.lock().await, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn deferred_overflow_flushes_before_append() {
        let adapter = Arc::new(RecordingAdapter {
            order: Arc::new(AsyncMutex::new(Vec::new())),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let mut config = EngineConfig::default();
        config.max_queue_size = 2;
        let channel = Arc::new(ExecutionChannel::new(&config, adapter, Arc::new(DefaultErrorHandler::new())));

        channel.enqueue(noop_op(Priority::Deferred)).await;
        channel.enqueue(noop_op(Priority::Deferred)).await;
        assert_eq!(channel.deferred_queue_len(), 2);

        // Third enqueue hits the cap: flush happens first, so post-append
        // length is 1 (spec §8 boundary behaviour).
        channel.enqueue(noop_op(Priority::Deferred)).await;
        assert_eq!(channel.deferred_queue_len(), 1);
    }

    /// Spec §8 scenario 2: "打车35" at t=0 then "吃饭50" at t=1200 execute
    /// together at t≈2500ms from the *first* enqueue — the second enqueue
    /// must not push the flush out to t≈3700ms.
    #[tokio::test(start_paused = true)]
    async fn second_deferred_enqueue_does_not_reset_the_aggregation_window() {
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let adapter = Arc::new(RecordingAdapter {
            order: order.clone(),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let channel = Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));

        let mut first = noop_op(Priority::Deferred);
        first.id = "first".into();
        channel.enqueue(first).await;

        tokio::time::sleep(Duration::from_millis(1200)).await;

        let mut second = noop_op(Priority::Deferred);
        second.id = "second".into();
        channel.enqueue(second).await;
        assert_eq!(channel.deferred_queue_len(), 2);

        // Advance to just past t=2500ms from the FIRST enqueue (only
        // ~1300ms more from here), not t=2500ms from the second.
        tokio::time::sleep(Duration::from_millis(1350)).await;

        assert_eq!(channel.deferred_queue_len(), 0);
        assert_eq!(*order.lock().await, vec!["first".to_string(), "second".to_string()]);
    }

    /// `max_deferred_wait_ms` is a hard ceiling independent of the rolling
    /// aggregation window (spec §5) — it must force a flush even when the
    /// aggregation window alone is configured far longer than the cap.
    #[tokio::test(start_paused = true)]
    async fn max_deferred_wait_forces_flush_before_a_long_aggregation_window() {
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let adapter = Arc::new(RecordingAdapter {
            order: order.clone(),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let mut config = EngineConfig::default();
        config.aggregation_window_ms = 20_000;
        config.max_deferred_wait_ms = 3_000;
        let channel = Arc::new(ExecutionChannel::new(&config, adapter, Arc::new(DefaultErrorHandler::new())));

        channel.enqueue(noop_op(Priority::Deferred)).await;
        assert_eq!(channel.deferred_queue_len(), 1);

        tokio::time::sleep(Duration::from_millis(3_200)).await;

        assert_eq!(channel.deferred_queue_len(), 0);
        assert_eq!(order.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn immediate_flushes_pending_deferred_batch_first() {
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let adapter = Arc::new(RecordingAdapter {
            order: order.clone(),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let channel = Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));

        let mut deferred = noop_op(Priority::Deferred);
        deferred.id = "deferred".into();
        let mut immediate = noop_op(Priority::Immediate);
        immediate.id = "immediate".into();

        channel.enqueue(deferred).await;
        assert_eq!(channel.deferred_queue_len(), 1);
        channel.enqueue(immediate).await;

        assert_eq!(channel.deferred_queue_len(), 0);
        assert_eq!(*order.lock().await, vec!["deferred".to_string(), "immediate".to_string()]);
    }

    #[tokio::test]
    async fn dispose_clears_queues_and_rejects_further_work() {
        let adapter = Arc::new(RecordingAdapter {
            order: Arc::new(AsyncMutex::new(Vec::new())),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let channel = Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));
        channel.enqueue(noop_op(Priority::Deferred)).await;
        channel.dispose();
        assert_eq!(channel.deferred_queue_len(), 0);
        channel.enqueue(noop_op(Priority::Deferred)).await;
        assert_eq!(channel.deferred_queue_len(), 0);
    }

    #[tokio::test]
    async fn panicking_result_callback_does_not_abort_subsequent_dispatch() {
        let adapter = Arc::new(RecordingAdapter {
            order: Arc::new(AsyncMutex::new(Vec::new())),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        });
        let channel = Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        channel.on_result(move |_result| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            panic!("callback exploded");
        });

        channel.enqueue(noop_op(Priority::Normal)).await;
        channel.enqueue(noop_op(Priority::Normal)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    /// Fails with a retryable `Network` error `fail_times` times, then
    /// succeeds, recording every attempt it was called for.
    struct FlakyAdapter {
        attempts: Arc<AtomicUsize>,
        fail_times: usize,
        kind: ErrorKind,
    }

    impl OperationAdapter for FlakyAdapter {
        async fn execute(&self, op: &Operation) -> Result<ExecutionResult, CoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                return Err(CoreError::new("flaky_adapter", self.kind, "transient failure"));
            }
            Ok(ExecutionResult::ok(op.id.clone(), serde_json::json!({})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_retried_with_backoff_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(FlakyAdapter { attempts: attempts.clone(), fail_times: 2, kind: ErrorKind::Network });
        let mut config = EngineConfig::default();
        config.max_retries = 3;
        config.initial_retry_delay_ms = 10;
        let channel = Arc::new(ExecutionChannel::new(&config, adapter, Arc::new(DefaultErrorHandler::new())));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel.on_result(move |result| seen_clone.lock().unwrap().push(result.success));

        channel.enqueue(noop_op(Priority::Normal)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(FlakyAdapter { attempts: attempts.clone(), fail_times: 100, kind: ErrorKind::Timeout });
        let mut config = EngineConfig::default();
        config.max_retries = 2;
        config.initial_retry_delay_ms = 5;
        let channel = Arc::new(ExecutionChannel::new(&config, adapter, Arc::new(DefaultErrorHandler::new())));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel.on_result(move |result| seen_clone.lock().unwrap().push(result.success));

        channel.enqueue(noop_op(Priority::Normal)).await;

        // Initial attempt plus `max_retries` retries, never more.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_fast_without_retrying() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(FlakyAdapter { attempts: attempts.clone(), fail_times: 100, kind: ErrorKind::Execution });
        let channel =
            Arc::new(ExecutionChannel::new(&EngineConfig::default(), adapter, Arc::new(DefaultErrorHandler::new())));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel.on_result(move |result| seen_clone.lock().unwrap().push(result.success));

        channel.enqueue(noop_op(Priority::Normal)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }
}
