use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pipeline_logging::pipeline_debug;

use crate::PipelineHandle;

struct Forwarding {
    concurrency: usize,
    pipelines: Vec<Arc<dyn PipelineHandle>>,
}

/// Ordered group of pipelines sharing one forwarded concurrency value.
///
/// Only pipelines registered with [`PipelineSeries::forward_concurrency`]
/// follow [`PipelineSeries::set_concurrency`]; the others keep their own.
pub struct PipelineSeries {
    pipelines: Vec<Arc<dyn PipelineHandle>>,
    forwarding: Mutex<Forwarding>,
}

impl PipelineSeries {
    pub fn new(pipelines: impl IntoIterator<Item = Arc<dyn PipelineHandle>>) -> Self {
        Self {
            pipelines: pipelines.into_iter().collect(),
            forwarding: Mutex::new(Forwarding {
                concurrency: 1,
                pipelines: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Forwarding> {
        self.forwarding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pipelines in the order a driver should process them.
    pub fn pipelines(&self) -> &[Arc<dyn PipelineHandle>] {
        &self.pipelines
    }

    /// Register a pipeline to follow this series' concurrency. Registering
    /// the same pipeline twice has no further effect.
    pub fn forward_concurrency(&self, pipeline: Arc<dyn PipelineHandle>) {
        let mut forwarding = self.lock();
        let already = forwarding
            .pipelines
            .iter()
            .any(|known| same_pipeline(known, &pipeline));
        if !already {
            forwarding.pipelines.push(pipeline);
        }
    }

    pub fn is_forwarded(&self, pipeline: &Arc<dyn PipelineHandle>) -> bool {
        self.lock()
            .pipelines
            .iter()
            .any(|known| same_pipeline(known, pipeline))
    }

    pub fn concurrency(&self) -> usize {
        self.lock().concurrency
    }

    pub fn set_concurrency(&self, concurrency: usize) {
        let mut forwarding = self.lock();
        forwarding.concurrency = concurrency;
        for pipeline in &forwarding.pipelines {
            pipeline_debug!(
                "Forwarding concurrency {} to pipeline `{}`",
                concurrency,
                pipeline.name()
            );
            pipeline.set_concurrency(concurrency);
        }
    }
}

fn same_pipeline(a: &Arc<dyn PipelineHandle>, b: &Arc<dyn PipelineHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
