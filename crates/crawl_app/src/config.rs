//! Crawl configuration, read from a RON file.

use std::path::PathBuf;

use pipeline_logging::LogDestination;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Worker lanes for the crawl pipeline.
    pub concurrency: usize,
    pub seed_urls: Vec<String>,
    /// Also log to this file when set.
    pub log_file: Option<PathBuf>,
    /// Stop seeding the frontier after this many URLs.
    pub max_pages: Option<usize>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            seed_urls: Vec::new(),
            log_file: None,
            max_pages: None,
        }
    }
}

impl CrawlConfig {
    pub fn log_destination(&self) -> LogDestination {
        match &self.log_file {
            Some(path) => LogDestination::Both(path.clone()),
            None => LogDestination::Terminal,
        }
    }
}
