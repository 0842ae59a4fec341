use std::fmt;

/// Supplier of work items for one pipeline.
///
/// `Ok(None)` means nothing is available right now, which is not necessarily
/// permanent: a task still in flight may add more work. An `Err` is fatal to
/// the pipeline.
#[async_trait::async_trait]
pub trait ItemSource<T>: Send + Sync {
    async fn get_item(&self) -> anyhow::Result<Option<T>>;
}

/// One stage of a pipeline's fixed processing chain.
///
/// Each item is handed to every task in configured order, one task at a time.
#[async_trait::async_trait]
pub trait ItemTask<T>: Send + Sync {
    async fn process(&self, item: &mut T) -> anyhow::Result<()>;

    /// Human-readable task name for logging and error reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Stopping => write!(f, "stopping"),
        }
    }
}
