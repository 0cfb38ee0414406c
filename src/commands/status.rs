use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::hydro::config::load_config;
use crate::hydro::store::IndexStore;

include!(concat!(env!("OUT_DIR"), "/hydroscan_env_allowlist.rs"));

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub index: Option<PathBuf>,
}

pub fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("base_url={}", cfg.crawl.base_url));
    report.detail(format!("file_suffix={}", cfg.crawl.file_suffix));
    report.detail(format!(
        "anomaly_threshold_bytes={}",
        cfg.crawl.anomaly_threshold_bytes
    ));
    report.detail(format!(
        "fetch_timeout_secs={}",
        cfg.crawl.fetch_timeout_secs
    ));
    report.detail(format!("decoder_bin={}", cfg.decoder.bin));
    report.detail(format!("decoder_timeout_secs={}", cfg.decoder.timeout_secs));

    if let Some(index) = &opts.index {
        let store = IndexStore::new(index);
        report.detail(format!("index={}", store.path().display()));
        if store.exists() {
            let entries = store.load()?;
            report.detail(format!("entries={}", entries.len()));
            match store.latest()? {
                Some(latest) => report.detail(format!("latest={}", latest.start_time)),
                None => report.detail("latest=none".to_string()),
            }
        } else {
            report.issue("index store not initialized; run `hydroscan crawl` first");
        }
    }

    let mut keys: Vec<String> = env::vars().map(|(key, _)| key).collect();
    keys.sort();
    for key in keys {
        if key.starts_with("HYDROSCAN_")
            && !GENERATED_HYDROSCAN_ENV_ALLOWLIST.contains(&key.as_str())
        {
            report.issue(format!("unrecognized env key: {key}"));
        }
    }

    Ok(report)
}
