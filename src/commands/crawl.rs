use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::hydro::config::load_config;
use crate::hydro::crawler;
use crate::hydro::lister::HttpLister;
use crate::hydro::store::IndexStore;

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub network: String,
    pub site: String,
    pub instrument: String,
    pub outfile: PathBuf,
}

pub fn run(opts: &CrawlOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("crawl");

    let instrument_url =
        cfg.crawl
            .instrument_url(&opts.network, &opts.site, &opts.instrument);
    report.detail(format!("instrument_url={instrument_url}"));
    report.detail(format!("outfile={}", opts.outfile.display()));
    report.detail(format!(
        "anomaly_threshold_bytes={}",
        cfg.crawl.anomaly_threshold_bytes
    ));

    let store = IndexStore::new(&opts.outfile);
    let _guard = store.lock_exclusive()?;

    let lister = HttpLister::new(cfg.crawl.fetch_timeout_secs)
        .context("failed to build http client")?;
    let outcome = crawler::crawl(&store, &lister, &cfg.crawl, &instrument_url)?;

    report.detail(format!("resumed={}", outcome.resumed));
    report.detail(format!("days_listed={}", outcome.days_listed));
    report.detail(format!("days_skipped={}", outcome.days_skipped));
    report.detail(format!("months_committed={}", outcome.months_committed));
    report.detail(format!("entries_appended={}", outcome.entries_appended));

    Ok(report)
}
