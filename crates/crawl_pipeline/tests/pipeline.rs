mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crawl_pipeline::{
    ItemQueue, ItemSource, ItemTask, MemorySource, Pipeline, PipelineError, PipelineSettings,
    PipelineState,
};
use pretty_assertions::assert_eq;

use support::{metered_pipeline, source_of, sorted, wait_until, Item};

struct DoubleTask;

#[async_trait::async_trait]
impl ItemTask<Item> for DoubleTask {
    async fn process(&self, item: &mut Item) -> anyhow::Result<()> {
        item.processed_value = Some(item.value * 2);
        Ok(())
    }
}

#[derive(Default)]
struct CollectTask {
    seen: Mutex<Vec<Item>>,
}

impl CollectTask {
    fn seen(&self) -> Vec<Item> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ItemTask<Item> for CollectTask {
    async fn process(&self, item: &mut Item) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(item.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "collect"
    }
}

#[derive(Debug, thiserror::Error)]
#[error("refused item {0}")]
struct Refused(u32);

struct FailOnTask {
    value: u32,
}

#[async_trait::async_trait]
impl ItemTask<Item> for FailOnTask {
    async fn process(&self, item: &mut Item) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if item.value == self.value {
            return Err(Refused(item.value).into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fail-on"
    }
}

#[tokio::test]
async fn tasks_run_in_order_over_items_in_submission_order() {
    pipeline_logging::initialize_for_tests();
    let collect = Arc::new(CollectTask::default());
    let pipeline = Pipeline::builder(source_of([1, 2, 3, 4]))
        .task(Arc::new(DoubleTask))
        .task(collect.clone())
        .build();

    pipeline.process().await.expect("pipeline ok");

    let seen: Vec<_> = collect
        .seen()
        .into_iter()
        .map(|item| (item.value, item.processed_value))
        .collect();
    assert_eq!(
        seen,
        vec![(1, Some(2)), (2, Some(4)), (3, Some(6)), (4, Some(8))]
    );
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn single_lane_preserves_source_order() {
    let (pipeline, _source, meter) = metered_pipeline(0..50, 1);

    pipeline.process().await.unwrap();

    assert_eq!(meter.started(), (0..50).collect::<Vec<_>>());
    assert_eq!(meter.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn peak_concurrency_matches_setting() {
    for concurrency in [1, 3, 8] {
        let (pipeline, _source, meter) = metered_pipeline(0..30, concurrency);

        pipeline.process().await.unwrap();

        assert_eq!(meter.peak(), concurrency, "concurrency {concurrency}");
        assert_eq!(sorted(meter.completed()), (0..30).collect::<Vec<_>>());
    }
}

#[tokio::test(start_paused = true)]
async fn over_provisioned_pool_is_bounded_by_items() {
    let (pipeline, _source, meter) = metered_pipeline(0..100, 200);

    pipeline.process().await.unwrap();

    assert!(meter.peak() <= 100);
    assert_eq!(sorted(meter.completed()), (0..100).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn unfinished_counter_is_zero_after_normal_completion() {
    let (pipeline, _source, _meter) = metered_pipeline(0..25, 4);

    pipeline.process().await.unwrap();

    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
    assert!(pipeline.item_queue().is_empty());
}

#[tokio::test]
async fn empty_source_finishes_immediately() {
    let tasks: Vec<Arc<dyn ItemTask<Item>>> = vec![Arc::new(DoubleTask)];
    let settings = PipelineSettings {
        concurrency: 3,
        ..PipelineSettings::default()
    };
    let pipeline: Pipeline<Item> = Pipeline::new(source_of([]), tasks, settings);

    pipeline.process().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_leaves_remaining_items_unprocessed() {
    let (pipeline, source, meter) = metered_pipeline(0..40, 2);
    let run = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process().await })
    };

    wait_until(|| meter.completed_count() >= 6).await;
    pipeline.stop();
    run.await.unwrap().expect("graceful stop is not an error");

    let completed = meter.completed();
    assert!(completed.len() < 40);
    // Every item taken from the source ran to completion; drained fetches
    // never reached the source.
    assert_eq!(source.len() + completed.len(), 40);
    assert_eq!(meter.started().len(), completed.len());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
    assert!(pipeline.item_queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopped_pipeline_can_be_processed_again() {
    let (pipeline, source, meter) = metered_pipeline(0..20, 3);
    let run = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process().await })
    };
    wait_until(|| meter.completed_count() >= 3).await;
    pipeline.stop();
    run.await.unwrap().unwrap();

    pipeline.process().await.unwrap();

    assert!(source.is_empty());
    assert_eq!(sorted(meter.completed()), (0..20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn dropped_run_leaves_pipeline_restartable() {
    let (pipeline, source, meter) = metered_pipeline(0..50, 2);

    let timed_out = tokio::time::timeout(Duration::from_millis(25), pipeline.process()).await;
    assert!(timed_out.is_err());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.item_queue().is_empty());
    let abandoned = meter.started().len() - meter.completed_count();
    assert!(abandoned > 0);

    pipeline.process().await.expect("restart after a dropped run");

    assert!(source.is_empty());
    assert_eq!(sorted(meter.started()), (0..50).collect::<Vec<_>>());
    assert_eq!(meter.completed_count(), 50 - abandoned);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
}

#[tokio::test(start_paused = true)]
async fn pipelines_can_share_one_item_queue() {
    let item_queue = Arc::new(ItemQueue::new());
    let collect = Arc::new(CollectTask::default());

    for values in [0..10, 10..20] {
        let pipeline = Pipeline::builder(source_of(values))
            .task(collect.clone())
            .item_queue(item_queue.clone())
            .concurrency(3)
            .build();

        pipeline.process().await.unwrap();

        assert!(Arc::ptr_eq(pipeline.item_queue(), &item_queue));
        assert_eq!(item_queue.unfinished_items(), 0);
        assert!(item_queue.is_empty());
    }

    let seen = sorted(collect.seen().into_iter().map(|item| item.value).collect());
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn process_while_running_is_rejected() {
    let (pipeline, _source, meter) = metered_pipeline(0..20, 1);
    let run = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process().await })
    };
    wait_until(|| meter.completed_count() >= 1).await;

    let err = pipeline.process().await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRunning));

    pipeline.stop();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn task_error_surfaces_after_shutdown() {
    let collect = Arc::new(CollectTask::default());
    let pipeline = Pipeline::builder(source_of(0..30))
        .task(Arc::new(FailOnTask { value: 7 }))
        .task(collect.clone())
        .concurrency(3)
        .build();

    let err = pipeline.process().await.unwrap_err();

    match &err {
        PipelineError::Task { task, source } => {
            assert_eq!(task, "fail-on");
            assert_eq!(source.downcast_ref::<Refused>().map(|r| r.0), Some(7));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.cause().is_some());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
    assert!(pipeline.item_queue().is_empty());

    let seen: Vec<u32> = collect.seen().into_iter().map(|item| item.value).collect();
    assert!(!seen.contains(&7));
    assert!(seen.len() < 29);
}

struct FlakySource {
    items: MemorySource<Item>,
    fail_after: Mutex<usize>,
}

#[async_trait::async_trait]
impl ItemSource<Item> for FlakySource {
    async fn get_item(&self) -> anyhow::Result<Option<Item>> {
        {
            let mut remaining = self.fail_after.lock().unwrap();
            if *remaining == 0 {
                anyhow::bail!("frontier unavailable");
            }
            *remaining -= 1;
        }
        self.items.get_item().await
    }
}

#[tokio::test]
async fn source_error_surfaces_after_shutdown() {
    let collect = Arc::new(CollectTask::default());
    let source = Arc::new(FlakySource {
        items: MemorySource::new((0..10).map(Item::new)),
        fail_after: Mutex::new(3),
    });
    let pipeline = Pipeline::builder(source)
        .task(collect.clone())
        .build();

    let err = pipeline.process().await.unwrap_err();

    assert!(matches!(err, PipelineError::Source(_)));
    assert_eq!(err.cause().unwrap().to_string(), "frontier unavailable");
    assert_eq!(collect.seen().len(), 3);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
}

struct PanicTask;

#[async_trait::async_trait]
impl ItemTask<Item> for PanicTask {
    async fn process(&self, _item: &mut Item) -> anyhow::Result<()> {
        panic!("task blew up");
    }
}

#[tokio::test]
async fn panicking_task_is_reported_not_masked() {
    let pipeline = Pipeline::builder(source_of(0..3))
        .task(Arc::new(PanicTask))
        .build();

    let err = pipeline.process().await.unwrap_err();

    assert!(matches!(err, PipelineError::LanePanicked(_)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.item_queue().unfinished_items(), 0);
}

/// Pushes `value * 10 + 1 ..= value * 10 + 2` back into the source for every
/// item below 10, so the source runs dry while items are still in flight.
struct SpawnChildrenTask {
    source: Arc<MemorySource<Item>>,
}

#[async_trait::async_trait]
impl ItemTask<Item> for SpawnChildrenTask {
    async fn process(&self, item: &mut Item) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if item.value < 10 {
            self.source
                .extend([item.value * 10 + 1, item.value * 10 + 2].map(Item::new));
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn items_added_by_tasks_are_picked_up() {
    let source = source_of([1]);
    let collect = Arc::new(CollectTask::default());
    let pipeline = Pipeline::builder(source.clone())
        .task(Arc::new(SpawnChildrenTask {
            source: source.clone(),
        }))
        .task(collect.clone())
        .concurrency(2)
        .build();

    pipeline.process().await.unwrap();

    let seen = sorted(collect.seen().into_iter().map(|item| item.value).collect());
    assert_eq!(seen, vec![1, 11, 12]);
    assert!(source.is_empty());
}
