//! Trade queue
//!
//! Priority-ordered, backpressured funnel from strategies to execution.
//! Admission is gated by the global, per-strategy, and per-token breakers;
//! a single worker dispatches strictly by priority then FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::breaker::{BreakerRegistry, BreakerState};

/// Priority classes, dispatched highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TradePriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

/// A queued trade request. Immutable once enqueued; the queue owns it
/// exclusively until dispatch.
#[derive(Debug)]
pub struct TradeRequest {
    pub token_address: String,
    /// Quantity in base-asset units; SOL to spend for buys, tokens for sells
    pub amount: f64,
    pub is_buy: bool,
    pub priority: TradePriority,
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
    /// Completion continuation; fired with the success boolean exactly once,
    /// or dropped unfired if the queue is cleared before dispatch
    pub callback: Option<oneshot::Sender<bool>>,
}

impl TradeRequest {
    pub fn new(
        token_address: impl Into<String>,
        amount: f64,
        is_buy: bool,
        priority: TradePriority,
        strategy_id: impl Into<String>,
    ) -> Self {
        Self {
            token_address: token_address.into(),
            amount,
            is_buy,
            priority,
            strategy_id: strategy_id.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
            callback: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_callback(mut self, callback: oneshot::Sender<bool>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Dispatch capability the queue drives; the order manager implements it
#[async_trait]
pub trait TradeDispatcher: Send + Sync {
    async fn dispatch(&self, request: &TradeRequest) -> bool;
}

struct QueuedTrade {
    /// Monotonic admission sequence, the FIFO tiebreaker
    seq: u64,
    request: TradeRequest,
}

impl PartialEq for QueuedTrade {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTrade {}

impl PartialOrd for QueuedTrade {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTrade {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, earlier sequence breaks ties
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Queue throughput metrics
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub queue_size: usize,
    pub total_processing_secs: f64,
    pub avg_processing_secs: f64,
}

/// Point-in-time queue status
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub processing: bool,
    pub metrics: QueueMetrics,
    pub active_breakers: Vec<BreakerState>,
}

struct QueueInner {
    heap: Mutex<BinaryHeap<QueuedTrade>>,
    seq: AtomicU64,
    processing: AtomicBool,
    closed: AtomicBool,
    metrics: Mutex<QueueMetrics>,
    breakers: Arc<BreakerRegistry>,
    dispatcher: Arc<dyn TradeDispatcher>,
    inter_trade_delay: Duration,
}

/// Prioritized trade queue with a single execution worker
#[derive(Clone)]
pub struct TradeQueue {
    inner: Arc<QueueInner>,
}

impl TradeQueue {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        dispatcher: Arc<dyn TradeDispatcher>,
        inter_trade_delay: Duration,
    ) -> Self {
        info!("trade queue initialized");
        Self {
            inner: Arc::new(QueueInner {
                heap: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                processing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                metrics: Mutex::new(QueueMetrics::default()),
                breakers,
                dispatcher,
                inter_trade_delay,
            }),
        }
    }

    /// Admit a trade request. Returns false, without enqueueing, when the
    /// queue is closed or any admission breaker is active.
    pub fn add_trade(&self, request: TradeRequest) -> bool {
        let inner = &self.inner;
        if inner.closed.load(AtomicOrdering::SeqCst) {
            warn!("trade queue closed, rejecting trade");
            return false;
        }

        if inner.breakers.global().check() {
            warn!("global breaker active, rejecting trade request");
            return false;
        }
        if inner.breakers.strategy(&request.strategy_id).check() {
            warn!(
                strategy = %request.strategy_id,
                "strategy breaker active, rejecting trade"
            );
            return false;
        }
        if inner.breakers.token(&request.token_address).check() {
            warn!(
                token = %request.token_address,
                "token breaker active, rejecting trade"
            );
            return false;
        }

        let seq = inner.seq.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(
            token = %request.token_address,
            strategy = %request.strategy_id,
            priority = ?request.priority,
            seq,
            "trade request enqueued"
        );
        {
            let mut heap = inner.heap.lock().expect("queue lock poisoned");
            heap.push(QueuedTrade { seq, request });
            inner.metrics.lock().expect("metrics lock poisoned").queue_size = heap.len();
        }

        // Wake an execution worker if none is running
        if inner
            .processing
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
        {
            let inner = inner.clone();
            tokio::spawn(async move { run_worker(inner).await });
        }

        true
    }

    /// Empty the queue without invoking callbacks
    pub fn clear(&self) {
        let mut heap = self.inner.heap.lock().expect("queue lock poisoned");
        let dropped = heap.len();
        heap.clear();
        self.inner
            .metrics
            .lock()
            .expect("metrics lock poisoned")
            .queue_size = 0;
        if dropped > 0 {
            info!(dropped, "trade queue cleared");
        }
    }

    /// Clear the queue and stop the worker; subsequent add_trade calls fail
    pub fn close(&self) {
        info!("closing trade queue");
        self.inner.closed.store(true, AtomicOrdering::SeqCst);
        self.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(AtomicOrdering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.heap.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> QueueMetrics {
        let mut metrics = self
            .inner
            .metrics
            .lock()
            .expect("metrics lock poisoned")
            .clone();
        metrics.queue_size = self.len();
        metrics
    }

    /// Queue status including active breakers, for the operator surface
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_size: self.len(),
            processing: self.inner.processing.load(AtomicOrdering::SeqCst),
            metrics: self.metrics(),
            active_breakers: self.inner.breakers.active_snapshot(),
        }
    }

    /// Wait until the queue is empty and the worker idle
    pub async fn drain(&self) {
        while self.inner.processing.load(AtomicOrdering::SeqCst) || !self.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn run_worker(inner: Arc<QueueInner>) {
    info!("trade queue worker started");
    loop {
        process_available(&inner).await;
        inner.processing.store(false, AtomicOrdering::SeqCst);

        // A request may have been admitted between the last pop and the
        // store above; reclaim the worker slot if so.
        let has_work = !inner.heap.lock().expect("queue lock poisoned").is_empty();
        if !has_work
            || inner.closed.load(AtomicOrdering::SeqCst)
            || inner
                .processing
                .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
                .is_err()
        {
            break;
        }
    }
    info!("trade queue worker stopped");
}

async fn process_available(inner: &Arc<QueueInner>) {
    loop {
        if inner.closed.load(AtomicOrdering::SeqCst) {
            break;
        }
        if inner.breakers.global().check() {
            warn!("global breaker active, pausing queue processing");
            break;
        }

        let queued = {
            let mut heap = inner.heap.lock().expect("queue lock poisoned");
            let queued = heap.pop();
            inner.metrics.lock().expect("metrics lock poisoned").queue_size = heap.len();
            queued
        };
        let Some(QueuedTrade { request, .. }) = queued else {
            break;
        };

        // Breakers may have tripped since admission; discard gated heads
        let strategy_breaker = inner.breakers.strategy(&request.strategy_id);
        let token_breaker = inner.breakers.token(&request.token_address);
        if strategy_breaker.check() || token_breaker.check() {
            warn!(
                token = %request.token_address,
                strategy = %request.strategy_id,
                "discarding queued trade, breaker tripped since admission"
            );
            complete(request, false);
            continue;
        }

        let started = Instant::now();
        let success = inner.dispatcher.dispatch(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        {
            let mut metrics = inner.metrics.lock().expect("metrics lock poisoned");
            metrics.total_trades += 1;
            if success {
                metrics.successful_trades += 1;
            } else {
                metrics.failed_trades += 1;
            }
            metrics.total_processing_secs += elapsed;
            metrics.avg_processing_secs =
                metrics.total_processing_secs / metrics.total_trades as f64;
        }

        if success {
            strategy_breaker.reset_failures();
            token_breaker.reset_failures();
        } else {
            // Per-trade failures stay scoped; the global breaker is reserved
            // for infrastructure faults
            strategy_breaker.increment_failures();
            token_breaker.increment_failures();
        }

        complete(request, success);

        tokio::time::sleep(inner.inter_trade_delay).await;
    }
}

/// Fire the request's callback; a dropped receiver is logged, never fatal
fn complete(mut request: TradeRequest, success: bool) {
    if let Some(callback) = request.callback.take() {
        if callback.send(success).is_err() {
            error!(
                token = %request.token_address,
                "trade callback receiver dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use tokio::sync::Notify;

    /// Dispatcher that records dispatch order and can gate the first call
    struct RecordingDispatcher {
        order: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
        result: bool,
    }

    impl RecordingDispatcher {
        fn new(result: bool) -> Arc<Self> {
            Arc::new(Self {
                order: Mutex::new(Vec::new()),
                gate: None,
                result,
            })
        }

        fn gated(result: bool, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                order: Mutex::new(Vec::new()),
                gate: Some(gate),
                result,
            })
        }

        fn seen(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TradeDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: &TradeRequest) -> bool {
            let first = {
                let mut order = self.order.lock().unwrap();
                order.push(request.token_address.clone());
                order.len() == 1
            };
            if first {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            self.result
        }
    }

    fn registry() -> Arc<BreakerRegistry> {
        Arc::new(BreakerRegistry::new(BreakerConfig::default()))
    }

    fn queue(dispatcher: Arc<dyn TradeDispatcher>) -> TradeQueue {
        TradeQueue::new(registry(), dispatcher, Duration::from_millis(1))
    }

    fn request(token: &str, priority: TradePriority) -> TradeRequest {
        TradeRequest::new(token, 1.0, true, priority, "momentum")
    }

    #[tokio::test]
    async fn test_priority_then_fifo_dispatch_order() {
        let gate = Arc::new(Notify::new());
        let dispatcher = RecordingDispatcher::gated(true, gate.clone());
        let queue = queue(dispatcher.clone());

        // A is popped immediately and parks in the gated dispatcher; the
        // rest queue up behind it.
        assert!(queue.add_trade(request("A", TradePriority::Low)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.add_trade(request("B", TradePriority::Low)));
        assert!(queue.add_trade(request("C", TradePriority::High)));
        assert!(queue.add_trade(request("D", TradePriority::Medium)));
        assert!(queue.add_trade(request("E", TradePriority::High)));

        gate.notify_one();
        queue.drain().await;

        // In-flight A is not preempted; then priority order with FIFO ties
        assert_eq!(dispatcher.seen(), vec!["A", "C", "E", "D", "B"]);
    }

    #[tokio::test]
    async fn test_callback_fired_with_result() {
        let dispatcher = RecordingDispatcher::new(true);
        let queue = queue(dispatcher);

        let (tx, rx) = oneshot::channel();
        assert!(queue.add_trade(request("A", TradePriority::Medium).with_callback(tx)));
        assert!(rx.await.unwrap());

        let failing = RecordingDispatcher::new(false);
        let queue = TradeQueue::new(registry(), failing, Duration::from_millis(1));
        let (tx, rx) = oneshot::channel();
        assert!(queue.add_trade(request("A", TradePriority::Medium).with_callback(tx)));
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_token_breaker_blocks_admission() {
        let breakers = registry();
        let dispatcher = RecordingDispatcher::new(false);
        let queue = TradeQueue::new(breakers.clone(), dispatcher, Duration::from_millis(1));

        // Scoped breakers trip at 10 consecutive failures
        for _ in 0..10 {
            let (tx, rx) = oneshot::channel();
            assert!(queue.add_trade(request("X", TradePriority::Medium).with_callback(tx)));
            assert!(!rx.await.unwrap());
        }

        assert!(breakers.token("X").is_active());
        assert!(!queue.add_trade(request("X", TradePriority::Medium)));
        // Other tokens are unaffected until their strategy breaker trips too
        assert!(breakers.strategy("momentum").is_active());
    }

    #[tokio::test]
    async fn test_global_breaker_blocks_admission() {
        let breakers = registry();
        let queue = TradeQueue::new(
            breakers.clone(),
            RecordingDispatcher::new(true),
            Duration::from_millis(1),
        );

        breakers.global().activate();
        assert!(!queue.add_trade(request("A", TradePriority::Critical)));
    }

    #[tokio::test]
    async fn test_head_recheck_discards_with_failure_callback() {
        let gate = Arc::new(Notify::new());
        let breakers = registry();
        let dispatcher = RecordingDispatcher::gated(true, gate.clone());
        let queue = TradeQueue::new(breakers.clone(), dispatcher.clone(), Duration::from_millis(1));

        assert!(queue.add_trade(request("A", TradePriority::Medium)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, rx) = oneshot::channel();
        assert!(queue.add_trade(request("B", TradePriority::Medium).with_callback(tx)));

        // Trip B's token breaker while it waits in the queue
        breakers.token("B").activate();
        gate.notify_one();
        queue.drain().await;

        assert!(!rx.await.unwrap());
        assert_eq!(dispatcher.seen(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_clear_drops_callbacks_unfired() {
        let gate = Arc::new(Notify::new());
        let dispatcher = RecordingDispatcher::gated(true, gate.clone());
        let queue = queue(dispatcher);

        assert!(queue.add_trade(request("A", TradePriority::Medium)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, rx) = oneshot::channel();
        assert!(queue.add_trade(request("B", TradePriority::Medium).with_callback(tx)));
        queue.clear();
        assert!(queue.is_empty());

        gate.notify_one();
        queue.drain().await;

        // B was cleared before dispatch: its callback is never invoked
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_new_trades() {
        let queue = queue(RecordingDispatcher::new(true));
        queue.close();
        assert!(queue.is_closed());
        assert!(!queue.add_trade(request("A", TradePriority::Critical)));
    }

    #[tokio::test]
    async fn test_metrics_accumulate() {
        let dispatcher = RecordingDispatcher::new(true);
        let queue = queue(dispatcher);

        for token in ["A", "B", "C"] {
            let (tx, rx) = oneshot::channel();
            assert!(queue.add_trade(request(token, TradePriority::Medium).with_callback(tx)));
            assert!(rx.await.unwrap());
        }
        queue.drain().await;

        let metrics = queue.metrics();
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.successful_trades, 3);
        assert_eq!(metrics.failed_trades, 0);
        assert_eq!(metrics.queue_size, 0);
        assert!(metrics.avg_processing_secs >= 0.0);
    }
}
