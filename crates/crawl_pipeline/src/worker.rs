use std::sync::Arc;

use pipeline_logging::{pipeline_debug, pipeline_error, pipeline_trace};

use crate::error::PipelineError;
use crate::queue::{EntryKind, FetchOutcome, ItemQueue};
use crate::ItemTask;

/// Result of one [`Worker::process_one`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// An item ran through the whole task chain.
    Processed,
    /// The source had nothing to hand out.
    Empty,
    /// A poison pill was taken; the lane must exit.
    Poisoned,
}

/// Calls `item_done` when dropped, so accounting is the very last thing that
/// happens for an item, on success, error or cancellation alike.
struct ItemDoneGuard<'a, T> {
    item_queue: &'a ItemQueue<T>,
}

impl<T> Drop for ItemDoneGuard<'_, T> {
    fn drop(&mut self) {
        self.item_queue.item_done();
    }
}

/// Runs queued fetches and the task chain over their items.
///
/// One `Worker` is shared by every lane of a pipeline.
pub struct Worker<T> {
    item_queue: Arc<ItemQueue<T>>,
    tasks: Vec<Arc<dyn ItemTask<T>>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn new(item_queue: Arc<ItemQueue<T>>, tasks: Vec<Arc<dyn ItemTask<T>>>) -> Self {
        Self { item_queue, tasks }
    }

    pub async fn process_one(&self, lane: usize) -> Result<Dispatch, PipelineError> {
        let (get, handle) = match self.item_queue.get().await.into_kind() {
            EntryKind::Poison => {
                pipeline_debug!("Lane {} took a poison pill", lane);
                return Ok(Dispatch::Poisoned);
            }
            EntryKind::Item { get, handle } => (get, handle),
        };
        let _done = ItemDoneGuard {
            item_queue: &self.item_queue,
        };

        let fetched = get.await;
        if let Some(handle) = handle {
            handle.resolve(match &fetched {
                Ok(Some(_)) => FetchOutcome::Item,
                Ok(None) => FetchOutcome::Empty,
                Err(_) => FetchOutcome::Failed,
            });
        }

        match fetched {
            Ok(Some(mut item)) => {
                pipeline_trace!("Lane {} processing item", lane);
                self.run_tasks(&mut item).await?;
                Ok(Dispatch::Processed)
            }
            Ok(None) => Ok(Dispatch::Empty),
            Err(err) => {
                pipeline_error!("Lane {}: item source failed: {:#}", lane, err);
                Err(PipelineError::Source(err))
            }
        }
    }

    async fn run_tasks(&self, item: &mut T) -> Result<(), PipelineError> {
        for task in &self.tasks {
            if let Err(source) = task.process(item).await {
                pipeline_error!("Task `{}` failed: {:#}", task.name(), source);
                return Err(PipelineError::Task {
                    task: task.name().to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Lifetime of one lane: process entries until a poison pill arrives.
    pub async fn process(&self, lane: usize) -> Result<(), PipelineError> {
        pipeline_debug!("Lane {} started", lane);
        loop {
            if self.process_one(lane).await? == Dispatch::Poisoned {
                pipeline_debug!("Lane {} exiting", lane);
                return Ok(());
            }
        }
    }
}
