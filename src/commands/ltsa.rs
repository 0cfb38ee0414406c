use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::hydro::config::load_config;
use crate::hydro::loader::CommandRecordLoader;
use crate::hydro::ltsa::{self, LtsaParams};
use crate::hydro::store::{IndexStore, select_range};

#[derive(Debug, Clone)]
pub struct LtsaOptions {
    pub index: PathBuf,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub segment_seconds: f64,
    pub percent_overlap: f64,
    pub decimation_factor: Option<u32>,
    pub out: Option<PathBuf>,
}

pub fn run(opts: &LtsaOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("build-ltsa");

    report.detail(format!("index={}", opts.index.display()));
    report.detail(format!("range=[{}, {})", opts.start, opts.end));

    let store = IndexStore::new(&opts.index);
    let entries = store.load()?;
    let selected = select_range(&entries, opts.start, opts.end);
    report.detail(format!("selected={} of {}", selected.len(), entries.len()));

    let loader = CommandRecordLoader::from_settings(&cfg.decoder)?;
    let params = LtsaParams {
        segment_seconds: opts.segment_seconds,
        percent_overlap: opts.percent_overlap,
        decimation_factor: opts.decimation_factor,
    };
    let matrix = ltsa::build_ltsa(&selected, &loader, &params)?;

    report.detail(format!("rows={}", matrix.rows.len()));
    report.detail(format!("frequency_bins={}", matrix.frequency_bins.len()));
    if let Some((low, high)) = ltsa::dynamic_range_db(&matrix) {
        report.detail(format!("power_db_p5={low:.1}"));
        report.detail(format!("power_db_p95={high:.1}"));
    }

    let rendered = serde_json::to_string_pretty(&matrix).context("failed to render matrix")?;
    match &opts.out {
        Some(path) => {
            fs::write(path, format!("{rendered}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            report.detail(format!("out={}", path.display()));
        }
        None => println!("{rendered}"),
    }

    Ok(report)
}
