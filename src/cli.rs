use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "hydroscan",
    version,
    about = "Index OOI raw-data hydrophone folders and build long-term spectral averages"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Crawl an instrument's year/month/day hierarchy into the index store
    Crawl {
        /// OOI network code, e.g. RS03AXBS
        #[arg(long)]
        network: String,
        /// OOI site code, e.g. LJ03A
        #[arg(long)]
        site: String,
        /// Instrument code, e.g. 09-HYDBBA302
        #[arg(long)]
        instrument: String,
        /// Index store location; its parent directory must exist
        #[arg(long)]
        outfile: PathBuf,
    },
    /// Build a long-term spectral average from indexed recordings
    BuildLtsa {
        /// Index store written by `crawl`
        #[arg(long)]
        index: PathBuf,
        /// Inclusive range start, `2016-01-15` or `2016-01-15T06:00:00`
        #[arg(long, value_parser = parse_timestamp)]
        start: NaiveDateTime,
        /// Exclusive range end
        #[arg(long, value_parser = parse_timestamp)]
        end: NaiveDateTime,
        /// Spectrogram segment length in seconds
        #[arg(long)]
        segment_seconds: f64,
        /// Segment overlap in percent, 0 to <100
        #[arg(long, default_value_t = 0.0)]
        percent_overlap: f64,
        /// Integer decimation factor applied by the decoder
        #[arg(long)]
        decimation: Option<u32>,
        /// Write the matrix as JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Report resolved configuration and index store health
    Status {
        /// Index store to inspect
        #[arg(long)]
        index: Option<PathBuf>,
    },
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    if let Ok(full) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(full);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        .map_err(|_| {
            format!("`{raw}` is not a `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS` timestamp")
        })
}

fn emit_report(report: &CommandReport) -> Result<()> {
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
    if report.ok {
        Ok(())
    } else {
        anyhow::bail!(
            "{} completed with {} issue(s)",
            report.command,
            report.issues.len()
        )
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Crawl {
            network,
            site,
            instrument,
            outfile,
        } => commands::crawl::run(&commands::crawl::CrawlOptions {
            network,
            site,
            instrument,
            outfile,
        })?,
        Command::BuildLtsa {
            index,
            start,
            end,
            segment_seconds,
            percent_overlap,
            decimation,
            out,
        } => commands::ltsa::run(&commands::ltsa::LtsaOptions {
            index,
            start,
            end,
            segment_seconds,
            percent_overlap,
            decimation_factor: decimation,
            out,
        })?,
        Command::Status { index } => commands::status::run(&commands::status::StatusOptions { index })?,
    };

    emit_report(&report)
}
