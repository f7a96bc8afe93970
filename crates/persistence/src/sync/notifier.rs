//! Topic-based change notifier backed by a bounded queue and a worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{IndexError, StorageResult};

/// Topic on which accessors publish the outcome of a mutation.
pub const ENTITY_MUTATED: &str = "entity.mutated";

/// Receives events published on a subscribed topic.
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, event: &T) -> StorageResult<()>;
}

/// Handle returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Queue and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Events that may wait in the queue before `publish` applies
    /// backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    2
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Handler invocations that returned an error.
    pub failed: u64,
    /// Events queued or being handled.
    pub pending: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    pending: AtomicU64,
}

struct Envelope<T> {
    topic: String,
    event: T,
}

type HandlerMap<T> = HashMap<String, Vec<(u64, Arc<dyn EventHandler<T>>)>>;

/// Broadcasts events to the handlers subscribed to their topic.
///
/// `publish` returns once the event is queued; handlers run on the worker
/// pool. Each handler sees each event at most once, and a failing handler is
/// logged without retry. Events from concurrent publishers may be handled in
/// any order.
pub struct ChangeNotifier<T> {
    sender: Mutex<Option<mpsc::Sender<Envelope<T>>>>,
    handlers: Arc<RwLock<HandlerMap<T>>>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl<T> std::fmt::Debug for ChangeNotifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("closed", &self.sender.lock().is_none())
            .field("topics", &self.handlers.read().len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl<T: Send + Sync + 'static> ChangeNotifier<T> {
    /// Starts the worker pool on the current tokio runtime.
    pub fn new(config: &NotifierConfig) -> StorageResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| IndexError::Unavailable {
            message: format!("change notifier needs a tokio runtime: {}", e),
        })?;

        let (sender, receiver) = mpsc::channel::<Envelope<T>>(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handlers: Arc<RwLock<HandlerMap<T>>> = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                runtime.spawn(Self::run_worker(
                    worker,
                    receiver.clone(),
                    handlers.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handlers,
            counters,
            workers: Mutex::new(workers),
            next_id: AtomicU64::new(1),
        })
    }

    async fn run_worker(
        worker: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope<T>>>>,
        handlers: Arc<RwLock<HandlerMap<T>>>,
        counters: Arc<Counters>,
    ) {
        loop {
            let next = receiver.lock().await.recv().await;
            let Some(envelope) = next else {
                debug!(worker, "Change notifier worker stopped");
                return;
            };

            let subscribed: Vec<Arc<dyn EventHandler<T>>> = handlers
                .read()
                .get(&envelope.topic)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default();

            for handler in subscribed {
                match handler.handle(&envelope.event).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        error!(topic = %envelope.topic, error = %e, "Event handler failed");
                    }
                }
            }

            counters.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Registers `handler` for `topic`.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler<T>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        Subscription {
            topic: topic.to_string(),
            id,
        }
    }

    /// Removes a handler. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&subscription.topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&subscription.topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map_or(0, Vec::len)
    }

    /// Queues `event` for the handlers of `topic`.
    ///
    /// Waits only while the queue is full. Fails once the notifier is closed.
    pub async fn publish(&self, topic: &str, event: T) -> StorageResult<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(IndexError::NotifierClosed.into());
        };

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            topic: topic.to_string(),
            event,
        };
        if sender.send(envelope).await.is_err() {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(IndexError::NotifierClosed.into());
        }
        self.counters.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            published: self.counters.published.load(Ordering::SeqCst),
            delivered: self.counters.delivered.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
        }
    }

    /// Waits until every published event has been handled. Returns false on
    /// timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.counters.pending.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops accepting events. Queued events are still handled.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Closes the notifier and waits for the workers to drain the queue.
    pub async fn shutdown(&self) {
        self.close();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Change notifier worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl EventHandler<u32> for Recorder {
        async fn handle(&self, event: &u32) -> StorageResult<()> {
            self.seen.lock().push(*event);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler<u32> for Failing {
        async fn handle(&self, _event: &u32) -> StorageResult<()> {
            Err(IndexError::Unavailable {
                message: "down".to_string(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier = ChangeNotifier::new(&NotifierConfig::default()).unwrap();
        let recorder = Arc::new(Recorder::default());
        notifier.subscribe("t", recorder.clone());

        for i in 0..5 {
            notifier.publish("t", i).await.unwrap();
        }
        notifier.publish("other", 99).await.unwrap();
        assert!(notifier.wait_idle(Duration::from_secs(5)).await);

        let mut seen = recorder.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let stats = notifier.stats();
        assert_eq!(stats.published, 6);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_retried() {
        let notifier = ChangeNotifier::new(&NotifierConfig::default()).unwrap();
        notifier.subscribe("t", Arc::new(Failing));
        notifier.publish("t", 1).await.unwrap();
        assert!(notifier.wait_idle(Duration::from_secs(5)).await);

        let stats = notifier.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let notifier = ChangeNotifier::new(&NotifierConfig::default()).unwrap();
        let recorder = Arc::new(Recorder::default());
        let subscription = notifier.subscribe("t", recorder.clone());
        assert_eq!(notifier.subscriber_count("t"), 1);

        assert!(notifier.unsubscribe(&subscription));
        assert!(!notifier.unsubscribe(&subscription));
        assert_eq!(notifier.subscriber_count("t"), 0);

        notifier.publish("t", 1).await.unwrap();
        assert!(notifier.wait_idle(Duration::from_secs(5)).await);
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let config = NotifierConfig {
            queue_capacity: 64,
            workers: 1,
        };
        let notifier = ChangeNotifier::new(&config).unwrap();
        let recorder = Arc::new(Recorder::default());
        notifier.subscribe("t", recorder.clone());

        for i in 0..20 {
            notifier.publish("t", i).await.unwrap();
        }
        notifier.shutdown().await;

        assert_eq!(recorder.seen.lock().len(), 20);
        assert!(notifier.is_closed());
        assert!(notifier.publish("t", 1).await.is_err());
    }

    #[test]
    fn test_requires_runtime() {
        assert!(ChangeNotifier::<u32>::new(&NotifierConfig::default()).is_err());
    }
}
