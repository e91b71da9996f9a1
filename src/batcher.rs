//! Time/size-triggered grouping of homogeneous work items.
//!
//! Queues items until the inbox fills to capacity or a delay elapses, then
//! hands them to a [`BatchProcessor`] in arrival-ordered groups.
//!
//! # Design
//!
//! ```text
//! enqueue() ──┬──▶ inbox (FIFO) ──┬──▶ armed delivery task (tokio timer)
//!             │                   │
//!             │  capacity / delay │  groups of 1..=capacity
//!             │  latency catch-up │
//!             │                   ▼
//!             └───────────────────┼──▶ processor.process(group)
//! ```
//!
//! Scheduling rules, in order:
//!
//! 1. Inbox at capacity → deliver immediately.
//! 2. Idle for at least `delay` since the last delivery → deliver
//!    immediately (latency catch-up).
//! 3. Otherwise wait `delay` to coalesce more arrivals.
//!
//! At most one delivery task is armed at a time. Re-arming with a shorter
//! delay cancels the longer one, unless the armed task is already past its
//! fire time or has entered delivery; then it is left alone and reschedules
//! itself afterward.

use crate::config::BatcherConfig;
use crate::metrics;
use crate::processor::BatchProcessor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument};

/// Accumulates items and delivers them to a processor in bounded groups.
///
/// Cloning is cheap and shares the same inbox.
pub struct Batcher<T, P> {
    inner: Arc<Inner<T, P>>,
}

impl<T, P> Clone for Batcher<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T, P> {
    capacity: usize,
    delay: Duration,
    processor: Arc<P>,
    state: Mutex<State<T>>,
    /// Signaled on enqueue, clear, snapshot, and delivery completion.
    drained: Notify,
    shutdown: AtomicBool,
}

struct State<T> {
    inbox: VecDeque<T>,
    scheduled: bool,
    scheduled_delay: Duration,
    pending: Option<ArmedDelivery>,
    last_processed_at: Instant,
    /// A processor invocation is in flight.
    delivering: bool,
}

/// Handle to the armed delivery task.
struct ArmedDelivery {
    handle: JoinHandle<()>,
    deadline: Instant,
    /// Set by the task once its timer elapses, before it takes the lock.
    fired: Arc<AtomicBool>,
    /// Cooperative cancel, checked under the lock before snapshotting.
    cancelled: Arc<AtomicBool>,
}

impl ArmedDelivery {
    /// Past its fire time or already running; cancelling it would be a
    /// wasted race, it will reschedule itself after delivering.
    fn is_ready_or_firing(&self) -> bool {
        if self.handle.is_finished() {
            return false;
        }
        self.fired.load(Ordering::Acquire) || Instant::now() >= self.deadline
    }
}

impl<T, P> Batcher<T, P>
where
    T: Send + 'static,
    P: BatchProcessor<T>,
{
    /// Create a new batcher.
    ///
    /// `capacity` is the maximum group size per processor call; `delay` is
    /// the maximum wait between a first arrival and its delivery. A capacity
    /// of zero would stall the inbox and is raised to one.
    ///
    /// Must be created and used within a tokio runtime: deliveries run on
    /// spawned tasks.
    pub fn new(config: BatcherConfig, processor: Arc<P>) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: config.capacity.max(1),
                delay: config.delay,
                processor,
                state: Mutex::new(State {
                    inbox: VecDeque::new(),
                    scheduled: false,
                    scheduled_delay: Duration::ZERO,
                    pending: None,
                    last_processed_at: Instant::now(),
                    delivering: false,
                }),
                drained: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Maximum group size.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Maximum batching window.
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// The number of items currently in the inbox.
    pub fn count(&self) -> usize {
        self.inner.state.lock().inbox.len()
    }

    /// Add a single item to the inbox.
    pub fn enqueue_one(&self, item: T) {
        self.enqueue(vec![item]);
    }

    /// Add items to the inbox in order. An empty slice is a no-op.
    pub fn enqueue(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        debug!(
            incoming = items.len(),
            inbox = state.inbox.len(),
            "queueing items"
        );
        state.inbox.extend(items);
        metrics::record_inbox_depth(state.inbox.len());
        self.inner.drained.notify_waiters();
        Inner::schedule_batch_process(&self.inner, &mut state, false);
    }

    /// Empty the inbox without processing any of the items in it.
    ///
    /// Cancels the armed delivery. A group already being delivered runs to
    /// completion.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        Inner::<T, P>::unschedule(&mut state);
        let dropped = state.inbox.len();
        state.inbox.clear();
        if dropped > 0 {
            debug!(dropped, "cleared inbox without processing");
            metrics::record_items_cleared(dropped);
        }
        metrics::record_inbox_depth(0);
        self.inner.drained.notify_waiters();
    }

    /// Deliver every item currently in the inbox, in contiguous
    /// capacity-sized groups, waiting for each delivery to complete.
    ///
    /// Items arriving while this runs are not guaranteed to be flushed by
    /// this call.
    #[instrument(skip(self))]
    pub async fn flush_all(&self) {
        {
            let mut state = self.inner.state.lock();
            Inner::<T, P>::unschedule(&mut state);
        }
        loop {
            // Register for wakeups before checking state so a completion
            // signal between the check and the await is not lost.
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let group = {
                let mut state = self.inner.state.lock();
                if state.delivering {
                    // An in-flight group completes first; keeps arrival order.
                    None
                } else if state.inbox.is_empty() {
                    return;
                } else {
                    let group = Inner::<T, P>::snapshot_group(&mut state, self.inner.capacity);
                    state.delivering = true;
                    metrics::record_inbox_depth(state.inbox.len());
                    self.inner.drained.notify_waiters();
                    Some(group)
                }
            };
            match group {
                Some(group) => self.inner.deliver(group).await,
                None => notified.await,
            }
        }
    }

    /// Wait until the inbox is empty and no delivery is in flight.
    ///
    /// Items enqueued after this call begins may be observed by the wait
    /// loop. After [`shutdown`](Self::shutdown) this can wait forever since
    /// nothing will drain the inbox.
    pub async fn wait_until_drained(&self) {
        debug!("waiting for inbox to drain");
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock();
                if state.inbox.is_empty() && !state.delivering {
                    break;
                }
                debug!(inbox = state.inbox.len(), "still draining");
            }
            notified.await;
        }
        debug!("inbox drained");
    }

    /// Signal shutdown.
    ///
    /// Further enqueues still accept items, but scheduling silently no-ops.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
    }
}

impl<T, P> Inner<T, P>
where
    T: Send + 'static,
    P: BatchProcessor<T>,
{
    /// Pick a delivery delay from capacity, inbox size, and idle time.
    fn schedule_batch_process(inner: &Arc<Self>, state: &mut State<T>, immediate: bool) {
        if state.inbox.is_empty() {
            return;
        }
        let mut suggested = Duration::ZERO;
        if !immediate && state.inbox.len() < inner.capacity {
            // To improve latency, if nothing has been processed in at least
            // our delay time, rush these items through immediately.
            if state.last_processed_at.elapsed() < inner.delay {
                suggested = inner.delay;
            }
        }
        Self::schedule_with_delay(inner, state, suggested);
    }

    fn schedule_with_delay(inner: &Arc<Self>, state: &mut State<T>, delay: Duration) {
        if state.scheduled && delay < state.scheduled_delay {
            if state
                .pending
                .as_ref()
                .is_some_and(ArmedDelivery::is_ready_or_firing)
            {
                debug!(?delay, "reschedule ignored; current batch is ready or in process");
                return;
            }
            Self::unschedule(state);
        }
        if state.scheduled {
            debug!(?delay, "schedule ignored; a delivery is already armed");
            return;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            debug!("shut down; not arming a delivery");
            return;
        }

        state.scheduled = true;
        state.scheduled_delay = delay;
        let deadline = Instant::now() + delay;
        let fired = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        debug!(?delay, "delivery armed");

        let task_inner = Arc::clone(inner);
        let task_fired = Arc::clone(&fired);
        let task_cancelled = Arc::clone(&cancelled);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            task_fired.store(true, Ordering::Release);
            task_inner.process_now(task_cancelled).await;
        });
        state.pending = Some(ArmedDelivery {
            handle,
            deadline,
            fired,
            cancelled,
        });
    }

    /// Cancel the armed delivery task, if any.
    ///
    /// A task past its timer is only flagged: it checks the flag under the
    /// lock before snapshotting, so an in-flight group is never lost.
    fn unschedule(state: &mut State<T>) {
        if let Some(pending) = state.pending.take() {
            pending.cancelled.store(true, Ordering::Release);
            if !pending.fired.load(Ordering::Acquire) && !pending.handle.is_finished() {
                debug!("cancelling the armed delivery");
                pending.handle.abort();
            }
        }
        state.scheduled = false;
    }

    fn snapshot_group(state: &mut State<T>, capacity: usize) -> Vec<T> {
        let take = state.inbox.len().min(capacity);
        state.inbox.drain(..take).collect()
    }

    /// Body of the armed delivery task.
    ///
    /// Takes up to `capacity` items out of the inbox and processes them;
    /// reschedules immediately if items remain.
    async fn process_now(self: Arc<Self>, cancelled: Arc<AtomicBool>) {
        enum Step<T> {
            Deliver(Vec<T>, bool),
            Wait,
            Done,
        }

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let step = {
                let mut state = self.state.lock();
                if cancelled.load(Ordering::Acquire) {
                    Step::Done
                } else if state.delivering {
                    // A flush is mid-delivery; snapshotting now would reorder.
                    Step::Wait
                } else {
                    state.scheduled = false;
                    state.pending = None;
                    let count = state.inbox.len();
                    debug!(inbox = count, "delivery task fired");
                    if count == 0 {
                        Step::Done
                    } else {
                        let group = Self::snapshot_group(&mut state, self.capacity);
                        let more = !state.inbox.is_empty();
                        state.delivering = true;
                        metrics::record_inbox_depth(state.inbox.len());
                        self.drained.notify_waiters();
                        Step::Deliver(group, more)
                    }
                }
            };

            match step {
                Step::Wait => notified.await,
                Step::Done => return,
                Step::Deliver(group, more) => {
                    self.deliver(group).await;
                    let mut state = self.state.lock();
                    Self::schedule_batch_process(&self, &mut state, more);
                    return;
                }
            }
        }
    }

    /// Invoke the processor outside the lock, then record completion.
    async fn deliver(&self, group: Vec<T>) {
        let started = Instant::now();
        let group_size = group.len();
        debug!(group_size, "invoking processor");
        match self.processor.process(group).await {
            Ok(()) => metrics::record_group_delivered(group_size, started.elapsed()),
            Err(e) => {
                // No retries at this layer; the group is not re-enqueued.
                error!(group_size, error = %e, "processor failed, dropping group");
                metrics::record_process_failure();
            }
        }
        let mut state = self.state.lock();
        state.last_processed_at = Instant::now();
        state.delivering = false;
        self.drained.notify_waiters();
    }
}
