use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;

use pipeline_logging::{pipeline_debug, pipeline_error, pipeline_info};

use crate::error::PipelineError;
use crate::{PipelineHandle, PipelineSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Ready,
    Running,
    Stopping,
    Stopped,
}

/// Process exit status reported by [`Application::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    GenericError = 1,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

struct AppInner {
    state: ApplicationState,
    current: Option<Arc<dyn PipelineHandle>>,
}

/// Drives the pipelines of a [`PipelineSeries`] one after another.
///
/// Once stopping, skippable pipelines are passed over while the rest still
/// run, so statistics and cleanup pipelines always get their turn.
pub struct Application {
    series: Arc<PipelineSeries>,
    inner: Mutex<AppInner>,
}

impl Application {
    pub fn new(series: Arc<PipelineSeries>) -> Self {
        Self {
            series,
            inner: Mutex::new(AppInner {
                state: ApplicationState::Ready,
                current: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AppInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn series(&self) -> &Arc<PipelineSeries> {
        &self.series
    }

    pub fn state(&self) -> ApplicationState {
        self.lock().state
    }

    /// Run every pipeline in order. Can only be called once.
    ///
    /// A failing pipeline is logged, turns the exit status into
    /// [`ExitStatus::GenericError`] and stops the application.
    pub async fn run(&self) -> Result<ExitStatus, PipelineError> {
        {
            let mut inner = self.lock();
            if inner.state != ApplicationState::Ready {
                return Err(PipelineError::NotReady);
            }
            inner.state = ApplicationState::Running;
        }

        let mut exit_status = ExitStatus::Success;
        for pipeline in self.series.pipelines() {
            {
                let mut inner = self.lock();
                if inner.state == ApplicationState::Stopping && pipeline.skippable() {
                    pipeline_info!("Skipping pipeline `{}`", pipeline.name());
                    continue;
                }
                inner.current = Some(pipeline.clone());
            }

            pipeline_debug!("Processing pipeline `{}`", pipeline.name());
            let mut process = pipeline.process();
            let result = match futures_util::poll!(&mut process) {
                Poll::Ready(result) => result,
                Poll::Pending => {
                    // The first poll moved the pipeline to running; a stop
                    // that arrived before then found nothing to stop.
                    if self.state() == ApplicationState::Stopping {
                        pipeline.stop();
                    }
                    process.await
                }
            };
            self.lock().current = None;

            if let Err(err) = result {
                pipeline_error!("Pipeline `{}` failed: {}", pipeline.name(), err);
                exit_status = ExitStatus::GenericError;
                self.stop();
            }
        }

        self.lock().state = ApplicationState::Stopped;
        pipeline_info!("Application finished with exit status {}", exit_status.code());
        Ok(exit_status)
    }

    /// Stop the pipeline currently running and skip the remaining skippable
    /// ones. Has no effect unless the application is running.
    pub fn stop(&self) {
        let current = {
            let mut inner = self.lock();
            if inner.state != ApplicationState::Running {
                return;
            }
            inner.state = ApplicationState::Stopping;
            inner.current.clone()
        };

        pipeline_info!("Application stopping");
        if let Some(pipeline) = current {
            pipeline.stop();
        }
    }
}
