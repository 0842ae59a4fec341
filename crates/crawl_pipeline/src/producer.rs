use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use pipeline_logging::{pipeline_debug, pipeline_trace};

use crate::queue::{DeferredGet, FetchHandle, FetchOutcome, ItemQueue};
use crate::ItemSource;

/// Feeds fetches from an [`ItemSource`] into an [`ItemQueue`].
///
/// The source is not called here: each fetch is queued as a deferred get and
/// runs on whichever worker lane dequeues it. The producer only waits for the
/// outcome.
pub struct Producer<T> {
    item_source: Arc<dyn ItemSource<T>>,
    item_queue: Arc<ItemQueue<T>>,
    running: AtomicBool,
}

impl<T: Send + 'static> Producer<T> {
    pub fn new(item_source: Arc<dyn ItemSource<T>>, item_queue: Arc<ItemQueue<T>>) -> Self {
        Self {
            item_source,
            item_queue,
            running: AtomicBool::new(false),
        }
    }

    /// Queue one fetch and wait for a worker to run it.
    ///
    /// A fetch that was drained before any worker reached it reports
    /// [`FetchOutcome::Empty`].
    pub async fn process_one(&self) -> FetchOutcome {
        let (handle, outcome) = FetchHandle::new();
        let item_source = self.item_source.clone();
        let get: DeferredGet<T> = async move { item_source.get_item().await }.boxed();

        pipeline_trace!("Queueing fetch from item source");
        self.item_queue.put_item(get, Some(handle)).await;

        match outcome.await {
            Ok(outcome) => outcome,
            Err(_) => {
                pipeline_trace!("Queued fetch was cancelled");
                FetchOutcome::Empty
            }
        }
    }

    /// Keep the queue supplied until stopped or the source runs dry.
    ///
    /// An empty fetch only ends the loop once no item is unfinished, since an
    /// item still being processed may add more work to the source.
    pub async fn process(&self) {
        while self.is_running() {
            match self.process_one().await {
                FetchOutcome::Item => {}
                FetchOutcome::Failed => {
                    pipeline_debug!("Item source failed; producer stopping");
                    self.stop();
                }
                FetchOutcome::Empty => {
                    if !self.is_running() {
                        break;
                    }
                    if self.item_queue.wait_for_worker_unless_idle().await {
                        pipeline_debug!("Item source exhausted with no unfinished items");
                        self.stop();
                    }
                }
            }
        }
        pipeline_debug!("Producer finished");
    }

    /// Arm the producer loop. Called before [`Producer::process`] is spawned.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
