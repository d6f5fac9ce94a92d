//! Rate-limited, delaying work queue.
//!
//! Semantics follow a level-triggered controller queue:
//! - an item is queued at most once, however often it is added
//! - an item being processed is never handed to a second worker; adding it
//!   meanwhile marks it dirty and it is requeued when [`WorkQueue::done`] is
//!   called
//! - delayed adds are held in a [`DelayQueue`] driven by
//!   [`WorkQueue::run_delayed`]
//! - after [`WorkQueue::shutdown`] no item is handed out and adds are ignored

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::trace;

use super::ratelimit::RateLimiter;

/// Bound on the item type of a [`WorkQueue`].
pub trait QueueItem: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> QueueItem for T {}

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            shutting_down: false,
        }
    }
}

/// Work queue with per-item rate limiting and delayed adds.
pub struct WorkQueue<K: QueueItem> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    limiter: Box<dyn RateLimiter<K>>,
    delayed_tx: mpsc::UnboundedSender<(K, Instant)>,
    delayed_rx: Mutex<Option<mpsc::UnboundedReceiver<(K, Instant)>>>,
    closed: CancellationToken,
}

impl<K: QueueItem> std::fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkQueue")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl<K: QueueItem> WorkQueue<K> {
    /// Create a queue using `limiter` for rate-limited adds.
    pub fn new(limiter: impl RateLimiter<K> + 'static) -> Self {
        let (delayed_tx, delayed_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter: Box::new(limiter),
            delayed_tx,
            delayed_rx: Mutex::new(Some(delayed_rx)),
            closed: CancellationToken::new(),
        }
    }

    /// Queue an item.
    pub fn add(&self, item: K) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        trace!(item = ?item, "queued");
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue an item once `delay` has passed.
    pub fn add_after(&self, item: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        // The receiver only goes away together with the queue.
        let _ = self.delayed_tx.send((item, Instant::now() + delay));
    }

    /// Queue an item after its rate-limited delay.
    pub fn add_rate_limited(&self, item: K) {
        let delay = self.limiter.when(&item);
        trace!(item = ?item, delay = ?delay, "rate limited requeue");
        self.add_after(item, delay);
    }

    /// Drop the rate-limit history of an item.
    pub fn forget(&self, item: &K) {
        self.limiter.forget(item);
    }

    /// Number of rate-limited requeues recorded for an item.
    pub fn num_requeues(&self, item: &K) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    ///
    /// The item must be handed back with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Mark an item as processed, requeueing it if it was added meanwhile.
    pub fn done(&self, item: &K) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out items and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.closed.cancel();
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shutdown`] was called.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of queued items (not counting items being processed).
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move delayed items into the queue as they come due, until shutdown.
    ///
    /// Only the first caller drives the delays; later calls return at once.
    pub async fn run_delayed(self: Arc<Self>) {
        let Some(mut incoming) = self.delayed_rx.lock().take() else {
            return;
        };
        let mut delayed: DelayQueue<K> = DelayQueue::new();
        let mut pending: HashMap<K, (delay_queue::Key, Instant)> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                Some((item, deadline)) = incoming.recv() => {
                    match pending.get_mut(&item) {
                        Some((key, at)) => {
                            if deadline < *at {
                                delayed.reset_at(key, deadline);
                                *at = deadline;
                            }
                        }
                        None => {
                            let key = delayed.insert_at(item.clone(), deadline);
                            pending.insert(item, (key, deadline));
                        }
                    }
                }
                Some(expired) = delayed.next(), if !delayed.is_empty() => {
                    let item = expired.into_inner();
                    pending.remove(&item);
                    self.add(item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ratelimit::ItemBackoff;

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::new(ItemBackoff::default()))
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let q = queue();
        q.add("a".into());
        q.add("a".into());
        q.add("b".into());
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_on_done() {
        let q = queue();
        q.add("a".into());
        let item = q.get().await.unwrap();
        q.add("a".into());
        assert!(q.is_empty());
        q.done(&item);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shutdown();
        assert_eq!(waiter.await.unwrap(), None);
        q.add("a".into());
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delivers_when_due() {
        let q = queue();
        let driver = tokio::spawn(q.clone().run_delayed());

        q.add_after("late".into(), Duration::from_secs(5));
        q.add_after("late".into(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(q.get().await.as_deref(), Some("late"));
        q.done(&"late".to_string());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(q.is_empty());

        q.shutdown();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limited_history() {
        let q = queue();
        q.add_rate_limited("a".into());
        q.add_rate_limited("a".into());
        assert_eq!(q.num_requeues(&"a".to_string()), 2);
        q.forget(&"a".to_string());
        assert_eq!(q.num_requeues(&"a".to_string()), 0);
    }
}
