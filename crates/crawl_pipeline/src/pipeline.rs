//! Adaptive worker pool around one producer and one item queue.
//!
//! A [`Pipeline`] keeps the number of live worker lanes converged on its
//! `concurrency` setting. Lanes are only ever removed with poison pills, which
//! the queue hands out ahead of any item, so shrinking takes effect as soon as
//! lanes finish their current item. Growing puts a single pill to wake the
//! control loop, which then spawns lanes up to the new target.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pipeline_logging::{pipeline_debug, pipeline_error, pipeline_info, pipeline_warn};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinError, JoinSet};

use crate::config::PipelineSettings;
use crate::error::PipelineError;
use crate::producer::Producer;
use crate::queue::ItemQueue;
use crate::worker::Worker;
use crate::{ItemSource, ItemTask, PipelineState};

struct Control {
    state: PipelineState,
    concurrency: usize,
    live_lanes: usize,
}

pub struct Pipeline<T> {
    name: String,
    item_queue: Arc<ItemQueue<T>>,
    producer: Arc<Producer<T>>,
    worker: Arc<Worker<T>>,
    control: Mutex<Control>,
    control_changed: Notify,
    skippable: bool,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new(
        item_source: Arc<dyn ItemSource<T>>,
        tasks: Vec<Arc<dyn ItemTask<T>>>,
        settings: PipelineSettings,
    ) -> Self {
        PipelineBuilder::new(item_source)
            .tasks(tasks)
            .settings(settings)
            .build()
    }

    pub fn builder<S>(item_source: Arc<S>) -> PipelineBuilder<T>
    where
        S: ItemSource<T> + 'static,
    {
        PipelineBuilder::new(item_source)
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn item_queue(&self) -> &Arc<ItemQueue<T>> {
        &self.item_queue
    }

    pub fn skippable(&self) -> bool {
        self.skippable
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn concurrency(&self) -> usize {
        self.lock().concurrency
    }

    /// Change the target number of worker lanes.
    ///
    /// While running, shrinking enqueues one poison pill per removed lane and
    /// growing enqueues a single pill to wake the control loop. Zero pauses
    /// dispatch until a non-zero value is set. While stopped, the value only
    /// takes effect on the next [`Pipeline::process`].
    pub fn set_concurrency(&self, concurrency: usize) {
        let mut control = self.lock();
        let previous = control.concurrency;
        control.concurrency = concurrency;

        if control.state != PipelineState::Running {
            return;
        }

        if concurrency < previous {
            pipeline_debug!(
                "Pipeline `{}`: {} poison pills for fewer lanes",
                self.name,
                previous - concurrency
            );
            for _ in concurrency..previous {
                self.item_queue.put_poison_nowait();
            }
        } else if concurrency > previous {
            pipeline_debug!("Pipeline `{}`: 1 poison pill to add lanes", self.name);
            self.item_queue.put_poison_nowait();
        }
        drop(control);
        self.control_changed.notify_waiters();
    }

    /// Stop queueing new work and terminate every live lane.
    ///
    /// Items already being processed run to completion. Has no effect unless
    /// the pipeline is running.
    pub fn stop(&self) {
        let mut control = self.lock();
        if control.state != PipelineState::Running {
            return;
        }
        control.state = PipelineState::Stopping;
        pipeline_debug!(
            "Pipeline `{}` stopping; poisoning {} lanes",
            self.name,
            control.live_lanes
        );
        self.producer.stop();
        for _ in 0..control.live_lanes {
            self.item_queue.put_poison_nowait();
        }
        drop(control);
        self.control_changed.notify_waiters();
    }

    /// Run the pipeline until its source is exhausted, it is stopped, or a
    /// source or task fails.
    ///
    /// Errors are returned only after every lane and the producer have been
    /// joined and the queue drained; the pipeline is `Stopped` again by then
    /// and may be processed anew.
    ///
    /// Dropping the returned future aborts every lane and the producer. Items
    /// in flight at that point are abandoned, and the pipeline is `Stopped`.
    pub async fn process(&self) -> Result<(), PipelineError> {
        {
            let mut control = self.lock();
            if control.state != PipelineState::Stopped {
                return Err(PipelineError::AlreadyRunning);
            }
            control.state = PipelineState::Running;
        }
        pipeline_debug!("Pipeline `{}` running", self.name);

        self.producer.start();
        let mut producer_task = {
            let producer = self.producer.clone();
            tokio::spawn(async move { producer.process().await })
        };
        let mut guard = ProcessGuard {
            pipeline: self,
            producer_task: producer_task.abort_handle(),
            armed: true,
        };
        let mut producer_joined = false;
        let mut lanes = JoinSet::new();
        let mut next_lane = 0;
        let mut failure = None;

        loop {
            let control_changed = self.control_changed.notified();
            tokio::pin!(control_changed);
            control_changed.as_mut().enable();

            if !self.spawn_missing_lanes(&mut lanes, &mut next_lane) {
                break;
            }

            tokio::select! {
                Some(joined) = lanes.join_next(), if !lanes.is_empty() => {
                    self.set_live_lanes(lanes.len());
                    if let Err(err) = lane_result(joined) {
                        failure.get_or_insert(err);
                        self.stop();
                    }
                }
                joined = &mut producer_task, if !producer_joined => {
                    producer_joined = true;
                    if let Err(err) = joined {
                        failure.get_or_insert(producer_panic(err));
                    }
                    self.stop();
                }
                _ = control_changed.as_mut(), if lanes.is_empty() => {}
            }
        }

        pipeline_debug!("Pipeline `{}` waiting for {} lanes", self.name, lanes.len());
        while let Some(joined) = lanes.join_next().await {
            self.set_live_lanes(lanes.len());
            if let Err(err) = lane_result(joined) {
                failure.get_or_insert(err);
            }
        }

        pipeline_debug!("Pipeline `{}` waiting for producer", self.name);
        if producer_joined {
            self.item_queue.drain();
        } else if let Err(err) = self.item_queue.drain_until(&mut producer_task).await {
            failure.get_or_insert(producer_panic(err));
        }

        guard.armed = false;
        self.lock().state = PipelineState::Stopped;
        match failure {
            Some(err) => {
                pipeline_error!("Pipeline `{}` stopped with error: {}", self.name, err);
                Err(err)
            }
            None => {
                pipeline_info!("Pipeline `{}` finished", self.name);
                Ok(())
            }
        }
    }

    /// Spawn lanes up to the concurrency target. Returns `false` once the
    /// pipeline has left the running state.
    fn spawn_missing_lanes(
        &self,
        lanes: &mut JoinSet<Result<(), PipelineError>>,
        next_lane: &mut usize,
    ) -> bool {
        let mut control = self.lock();
        if control.state != PipelineState::Running {
            return false;
        }
        while lanes.len() < control.concurrency {
            let lane = *next_lane;
            *next_lane += 1;
            let worker = self.worker.clone();
            lanes.spawn(async move { worker.process(lane).await });
        }
        control.live_lanes = lanes.len();
        true
    }

    fn set_live_lanes(&self, live_lanes: usize) {
        self.lock().live_lanes = live_lanes;
    }
}

/// Tears a run down if the `process` future is dropped before finishing.
struct ProcessGuard<'a, T: Send + 'static> {
    pipeline: &'a Pipeline<T>,
    producer_task: AbortHandle,
    armed: bool,
}

impl<T: Send + 'static> Drop for ProcessGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let pipeline = self.pipeline;
        pipeline_warn!("Pipeline `{}` dropped while processing; aborting", pipeline.name);
        pipeline.producer.stop();
        self.producer_task.abort();
        pipeline.item_queue.drain();

        let mut control = pipeline.lock();
        control.state = PipelineState::Stopped;
        control.live_lanes = 0;
    }
}

fn lane_result(joined: Result<Result<(), PipelineError>, JoinError>) -> Result<(), PipelineError> {
    joined.map_err(|err| PipelineError::LanePanicked(err.to_string()))?
}

fn producer_panic(err: JoinError) -> PipelineError {
    PipelineError::ProducerPanicked(err.to_string())
}

pub struct PipelineBuilder<T> {
    name: Option<String>,
    item_source: Arc<dyn ItemSource<T>>,
    tasks: Vec<Arc<dyn ItemTask<T>>>,
    item_queue: Option<Arc<ItemQueue<T>>>,
    settings: PipelineSettings,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    pub fn new(item_source: Arc<dyn ItemSource<T>>) -> Self {
        Self {
            name: None,
            item_source,
            tasks: Vec::new(),
            item_queue: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn task(mut self, task: Arc<dyn ItemTask<T>>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Arc<dyn ItemTask<T>>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Use a pre-built queue instead of a fresh one.
    pub fn item_queue(mut self, item_queue: Arc<ItemQueue<T>>) -> Self {
        self.item_queue = Some(item_queue);
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.settings.concurrency = concurrency;
        self
    }

    pub fn skippable(mut self, skippable: bool) -> Self {
        self.settings.skippable = skippable;
        self
    }

    pub fn build(self) -> Pipeline<T> {
        let item_queue = self.item_queue.unwrap_or_default();
        let producer = Producer::new(self.item_source, item_queue.clone());
        let worker = Worker::new(item_queue.clone(), self.tasks);

        Pipeline {
            name: self.name.unwrap_or_else(|| "pipeline".to_string()),
            item_queue,
            producer: Arc::new(producer),
            worker: Arc::new(worker),
            control: Mutex::new(Control {
                state: PipelineState::Stopped,
                concurrency: self.settings.concurrency,
                live_lanes: 0,
            }),
            control_changed: Notify::new(),
            skippable: self.settings.skippable,
        }
    }
}

/// Type-erased control surface of a [`Pipeline`], so pipelines over
/// different item types can be sequenced together.
#[async_trait::async_trait]
pub trait PipelineHandle: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self) -> Result<(), PipelineError>;
    fn stop(&self);
    fn concurrency(&self) -> usize;
    fn set_concurrency(&self, concurrency: usize);
    fn state(&self) -> PipelineState;
    fn skippable(&self) -> bool;
}

#[async_trait::async_trait]
impl<T: Send + 'static> PipelineHandle for Pipeline<T> {
    fn name(&self) -> &str {
        Pipeline::name(self)
    }

    async fn process(&self) -> Result<(), PipelineError> {
        Pipeline::process(self).await
    }

    fn stop(&self) {
        Pipeline::stop(self)
    }

    fn concurrency(&self) -> usize {
        Pipeline::concurrency(self)
    }

    fn set_concurrency(&self, concurrency: usize) {
        Pipeline::set_concurrency(self, concurrency)
    }

    fn state(&self) -> PipelineState {
        Pipeline::state(self)
    }

    fn skippable(&self) -> bool {
        Pipeline::skippable(self)
    }
}
