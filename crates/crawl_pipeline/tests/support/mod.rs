#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crawl_pipeline::{ItemTask, MemorySource, Pipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: u32,
    pub processed_value: Option<u32>,
}

impl Item {
    pub fn new(value: u32) -> Self {
        Self {
            value,
            processed_value: None,
        }
    }
}

pub fn source_of(values: impl IntoIterator<Item = u32>) -> Arc<MemorySource<Item>> {
    pipeline_logging::initialize_for_tests();
    Arc::new(MemorySource::new(values.into_iter().map(Item::new)))
}

/// Tracks how many task chains are running at once.
#[derive(Default)]
pub struct Meter {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<u32>>,
    completed: Mutex<Vec<u32>>,
}

impl Meter {
    pub fn enter(&self, value: u32) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.started.lock().unwrap().push(value);
    }

    pub fn exit(&self, value: u32) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(value);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Forget the peak so far; only chains started afterwards count.
    pub fn reset_peak(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<u32> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<u32> {
        self.completed.lock().unwrap().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().unwrap().len()
    }
}

/// Occupies its lane for `delay` while being metered.
pub struct SleepTask {
    pub meter: Arc<Meter>,
    pub delay: Duration,
}

#[async_trait::async_trait]
impl ItemTask<Item> for SleepTask {
    async fn process(&self, item: &mut Item) -> anyhow::Result<()> {
        self.meter.enter(item.value);
        tokio::time::sleep(self.delay).await;
        self.meter.exit(item.value);
        Ok(())
    }

    fn name(&self) -> &str {
        "sleep"
    }
}

pub fn metered_pipeline(
    values: impl IntoIterator<Item = u32>,
    concurrency: usize,
) -> (Arc<Pipeline<Item>>, Arc<MemorySource<Item>>, Arc<Meter>) {
    let source = source_of(values);
    let meter = Arc::new(Meter::default());
    let pipeline = Pipeline::builder(source.clone())
        .name("metered")
        .task(Arc::new(SleepTask {
            meter: meter.clone(),
            delay: Duration::from_millis(10),
        }))
        .concurrency(concurrency)
        .build();
    (Arc::new(pipeline), source, meter)
}

/// Poll `condition` on a short timer until it holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn sorted(mut values: Vec<u32>) -> Vec<u32> {
    values.sort_unstable();
    values
}
