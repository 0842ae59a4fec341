//! Crawl pipeline: adaptive producer/worker scheduling engine.
//!
//! Every stage of a crawl is a [`Pipeline`]: an [`ItemSource`] feeding an
//! ordered chain of [`ItemTask`]s through a pool of worker lanes whose width
//! can be changed while it runs. A [`PipelineSeries`] groups the stages and an
//! [`Application`] drives them in order.
mod application;
mod config;
mod error;
mod pipeline;
mod producer;
mod queue;
mod series;
mod source;
mod types;
mod worker;

pub use application::{Application, ApplicationState, ExitStatus};
pub use config::{load_ron, parse_ron, PipelineSettings};
pub use error::{ConfigError, PipelineError};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandle};
pub use producer::Producer;
pub use queue::{
    DeferredGet, EntryKind, FetchHandle, FetchOutcome, ItemQueue, Priority, QueueEntry,
};
pub use series::PipelineSeries;
pub use source::MemorySource;
pub use types::{ItemSource, ItemTask, PipelineState};
pub use worker::{Dispatch, Worker};
