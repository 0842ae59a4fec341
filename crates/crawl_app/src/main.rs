mod config;
mod stages;

use std::path::PathBuf;
use std::sync::Arc;

use crawl_pipeline::{load_ron, Application, ExitStatus};
use log::LevelFilter;
use pipeline_logging::{pipeline_error, pipeline_warn};

use crate::config::CrawlConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => match load_ron::<CrawlConfig>(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Could not load config {:?}: {}", path, err);
                std::process::exit(ExitStatus::GenericError.code());
            }
        },
        None => CrawlConfig::default(),
    };

    pipeline_logging::initialize(config.log_destination(), LevelFilter::Info);

    let stages::CrawlRun { series, stats } = stages::build(&config);
    let app = Arc::new(Application::new(series));

    {
        let app = app.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pipeline_warn!("Interrupted; finishing current items");
                app.stop();
            }
        });
    }

    let status = match app.run().await {
        Ok(status) => status,
        Err(err) => {
            pipeline_error!("Crawl could not run: {}", err);
            ExitStatus::GenericError
        }
    };
    if stats.visited() == 0 {
        pipeline_warn!("No URLs were crawled");
    }
    std::process::exit(status.code());
}
