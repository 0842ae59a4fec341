//! The pipelines making up one crawl run.
//!
//! `setup` seeds the URL frontier from the configuration, `crawl` drains the
//! frontier and `stats` reports what was seen. Only `crawl` is skippable and
//! follows the series concurrency.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crawl_pipeline::{
    ItemTask, MemorySource, Pipeline, PipelineHandle, PipelineSeries, PipelineSettings,
};
use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_warn};
use url::Url;

use crate::config::CrawlConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
    pub url: Url,
}

#[derive(Debug, Default)]
struct StatsInner {
    visited: HashSet<String>,
    per_host: BTreeMap<String, usize>,
    duplicates: usize,
    rejected: usize,
}

/// Counters shared by the crawl and stats pipelines.
#[derive(Debug, Default)]
pub struct CrawlStats {
    inner: Mutex<StatsInner>,
}

impl CrawlStats {
    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn visited(&self) -> usize {
        self.lock().visited.len()
    }

    pub fn duplicates(&self) -> usize {
        self.lock().duplicates
    }

    pub fn rejected(&self) -> usize {
        self.lock().rejected
    }

    pub fn per_host(&self) -> BTreeMap<String, usize> {
        self.lock().per_host.clone()
    }
}

struct SeedFrontierTask {
    frontier: Arc<MemorySource<UrlRecord>>,
    stats: Arc<CrawlStats>,
    max_pages: Option<usize>,
}

#[async_trait::async_trait]
impl ItemTask<Vec<String>> for SeedFrontierTask {
    async fn process(&self, seeds: &mut Vec<String>) -> anyhow::Result<()> {
        let limit = self.max_pages.unwrap_or(usize::MAX);
        let mut seeded = 0;
        for seed in seeds.drain(..) {
            if seeded == limit {
                pipeline_info!("Reached max_pages ({}); ignoring remaining seeds", limit);
                break;
            }
            match Url::parse(seed.trim()) {
                Ok(url) => {
                    self.frontier.push(UrlRecord { url });
                    seeded += 1;
                }
                Err(err) => {
                    pipeline_warn!("Rejecting seed URL {:?}: {}", seed, err);
                    self.stats.lock().rejected += 1;
                }
            }
        }
        pipeline_info!("Seeded frontier with {} URLs", seeded);
        Ok(())
    }

    fn name(&self) -> &str {
        "seed-frontier"
    }
}

/// Drops fragments and empty queries so equivalent URLs compare equal.
struct NormalizeTask;

#[async_trait::async_trait]
impl ItemTask<UrlRecord> for NormalizeTask {
    async fn process(&self, record: &mut UrlRecord) -> anyhow::Result<()> {
        record.url.set_fragment(None);
        if record.url.query() == Some("") {
            record.url.set_query(None);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "normalize"
    }
}

struct RecordTask {
    stats: Arc<CrawlStats>,
}

#[async_trait::async_trait]
impl ItemTask<UrlRecord> for RecordTask {
    async fn process(&self, record: &mut UrlRecord) -> anyhow::Result<()> {
        let mut stats = self.stats.lock();
        if !stats.visited.insert(record.url.to_string()) {
            pipeline_debug!("Duplicate URL {}", record.url);
            stats.duplicates += 1;
            return Ok(());
        }
        let host = record.url.host_str().unwrap_or("<none>").to_string();
        *stats.per_host.entry(host).or_default() += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "record"
    }
}

struct ReportTask {
    stats: Arc<CrawlStats>,
}

#[async_trait::async_trait]
impl ItemTask<()> for ReportTask {
    async fn process(&self, _item: &mut ()) -> anyhow::Result<()> {
        pipeline_info!(
            "Crawl finished: {} URLs visited, {} duplicates, {} rejected",
            self.stats.visited(),
            self.stats.duplicates(),
            self.stats.rejected()
        );
        for (host, count) in self.stats.per_host() {
            pipeline_info!("  {}: {}", host, count);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "report"
    }
}

pub struct CrawlRun {
    pub series: Arc<PipelineSeries>,
    pub stats: Arc<CrawlStats>,
}

pub fn build(config: &CrawlConfig) -> CrawlRun {
    let stats = Arc::new(CrawlStats::default());
    let frontier = Arc::new(MemorySource::default());

    let setup = Pipeline::builder(Arc::new(MemorySource::new([config.seed_urls.clone()])))
        .name("setup")
        .task(Arc::new(SeedFrontierTask {
            frontier: frontier.clone(),
            stats: stats.clone(),
            max_pages: config.max_pages,
        }))
        .build();

    let crawl: Arc<dyn PipelineHandle> = Arc::new(
        Pipeline::builder(frontier)
            .name("crawl")
            .task(Arc::new(NormalizeTask))
            .task(Arc::new(RecordTask {
                stats: stats.clone(),
            }))
            .settings(PipelineSettings {
                concurrency: config.concurrency,
                skippable: true,
            })
            .build(),
    );

    let report = Pipeline::builder(Arc::new(MemorySource::new([()])))
        .name("stats")
        .task(Arc::new(ReportTask {
            stats: stats.clone(),
        }))
        .build();

    let series = Arc::new(PipelineSeries::new([
        Arc::new(setup) as Arc<dyn PipelineHandle>,
        crawl.clone(),
        Arc::new(report),
    ]));
    series.forward_concurrency(crawl);
    series.set_concurrency(config.concurrency);

    CrawlRun { series, stats }
}
