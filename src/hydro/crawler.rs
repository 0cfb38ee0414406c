use crate::error::ScanError;
use crate::hydro::config::CrawlSettings;
use crate::hydro::lister::DirectoryLister;
use crate::hydro::store::{IndexEntry, IndexStore};
use crate::hydro::warn::{self, WarnEvent};
use chrono::{Datelike, NaiveDateTime};

/// Timestamp width in the recording file names: `2016-01-15T00:00:00.000000`.
const TIMESTAMP_CHARS: usize = 26;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Where the previous run left off, derived once per run from the store's
/// most recent entry and passed through the traversal. The recorded day is
/// re-fetched: its folder may have been incomplete at last crawl time.
#[derive(Debug, Clone, Copy)]
pub struct CrawlCursor {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CrawlCursor {
    fn from_entry(entry: &IndexEntry) -> Self {
        Self {
            year: entry.start_time.year(),
            month: entry.start_time.month(),
            day: entry.start_time.day(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlOutcome {
    pub resumed: bool,
    pub days_listed: usize,
    pub days_skipped: usize,
    pub entries_appended: usize,
    pub months_committed: usize,
}

/// Populate `store` from the instrument's year/month/day hierarchy.
///
/// Already-covered periods before the cursor are not re-fetched. Each month's
/// discoveries are committed as one batch, so an aborted run loses at most
/// one month of uncommitted work and a re-run picks up from the last commit.
pub fn crawl(
    store: &IndexStore,
    lister: &dyn DirectoryLister,
    settings: &CrawlSettings,
    instrument_url: &str,
) -> Result<CrawlOutcome, ScanError> {
    let cursor = if store.exists() {
        store.latest()?.map(|entry| CrawlCursor::from_entry(&entry))
    } else {
        store.initialize_empty()?;
        None
    };

    let mut outcome = CrawlOutcome {
        resumed: cursor.is_some(),
        ..CrawlOutcome::default()
    };

    let root = lister.fetch(instrument_url)?;
    let mut year_folders = root.child_hrefs();
    if let Some(cursor) = cursor {
        year_folders = truncate_from(
            year_folders,
            u32::try_from(cursor.year).unwrap_or(0),
            "year",
            instrument_url,
        )?;
    }

    for (ydex, year_folder) in year_folders.iter().enumerate() {
        let year_url = format!("{instrument_url}{year_folder}");
        let year_listing = lister.fetch(&year_url)?;
        let mut month_folders = year_listing.child_hrefs();
        if ydex == 0 {
            if let Some(cursor) = cursor {
                month_folders = truncate_from(month_folders, cursor.month, "month", &year_url)?;
            }
        }

        for (mdex, month_folder) in month_folders.iter().enumerate() {
            let month_url = format!("{year_url}{month_folder}");
            let month_listing = lister.fetch(&month_url)?;
            let mut day_folders = month_listing.child_hrefs();
            if ydex == 0 && mdex == 0 {
                if let Some(cursor) = cursor {
                    day_folders = truncate_from(day_folders, cursor.day, "day", &month_url)?;
                }
            }

            let mut batch: Vec<IndexEntry> = Vec::new();
            for day_folder in &day_folders {
                let day_url = format!("{month_url}{day_folder}");
                let day_listing = lister.fetch(&day_url)?;
                outcome.days_listed += 1;

                let payload_bytes = day_listing.payload_bytes();
                if payload_bytes > settings.anomaly_threshold_bytes {
                    warn::emit(WarnEvent {
                        code: "DAY_SKIPPED",
                        stage: "crawl",
                        url: &day_listing.url,
                        reason: "listing-exceeds-anomaly-threshold",
                        detail: &format!(
                            "{payload_bytes}B > {}B",
                            settings.anomaly_threshold_bytes
                        ),
                    });
                    outcome.days_skipped += 1;
                    continue;
                }

                for href in day_listing.child_hrefs() {
                    if !href.contains(&settings.file_suffix) {
                        continue;
                    }
                    let file_name = strip_listing_prefix(&href).to_string();
                    let start_time = parse_start_time(&file_name, &settings.file_suffix)?;
                    batch.push(IndexEntry {
                        folder_path: day_url.clone(),
                        file_name,
                        start_time,
                    });
                }
            }

            outcome.entries_appended += store.append_and_dedupe(&batch)?;
            outcome.months_committed += 1;
        }
    }

    Ok(outcome)
}

/// Drop leading folders up to the one matching `wanted`. The recorded resume
/// position having vanished from the remote listing is surfaced, not skipped.
fn truncate_from(
    folders: Vec<String>,
    wanted: u32,
    level: &'static str,
    url: &str,
) -> Result<Vec<String>, ScanError> {
    let position = folders
        .iter()
        .position(|folder| folder_number(folder) == Some(wanted));
    match position {
        Some(index) => Ok(folders[index..].to_vec()),
        None => Err(ScanError::ResumePointMissing {
            level,
            wanted,
            url: url.to_string(),
        }),
    }
}

fn folder_number(folder: &str) -> Option<u32> {
    folder.trim_end_matches('/').parse::<u32>().ok()
}

/// Listing hrefs carry a `./` prefix relative to the day folder.
fn strip_listing_prefix(href: &str) -> &str {
    match href.split_once("./") {
        Some((_, rest)) => rest,
        None => href,
    }
}

/// The recording's start time is a fixed-width substring at the end of the
/// file stem, immediately before the suffix.
pub fn parse_start_time(file_name: &str, suffix: &str) -> Result<NaiveDateTime, ScanError> {
    let stem = file_name.split(suffix).next().unwrap_or(file_name);
    let stamp = stem
        .len()
        .checked_sub(TIMESTAMP_CHARS)
        .and_then(|start| stem.get(start..))
        .ok_or_else(|| ScanError::BadTimestamp {
            name: file_name.to_string(),
            reason: format!("expected a {TIMESTAMP_CHARS}-character timestamp before {suffix}"),
        })?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|err| ScanError::BadTimestamp {
        name: file_name.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydro::lister::RawListing;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct FakeLister {
        pages: BTreeMap<String, String>,
        fetched: RefCell<Vec<String>>,
    }

    impl FakeLister {
        fn new() -> Self {
            Self {
                pages: BTreeMap::new(),
                fetched: RefCell::new(Vec::new()),
            }
        }

        fn page(&mut self, url: &str, body: String) {
            self.pages.insert(url.to_string(), body);
        }

        fn fetched_urls(&self) -> Vec<String> {
            self.fetched.borrow().clone()
        }
    }

    impl DirectoryLister for FakeLister {
        fn fetch(&self, url: &str) -> Result<RawListing, ScanError> {
            self.fetched.borrow_mut().push(url.to_string());
            match self.pages.get(url) {
                Some(body) => Ok(RawListing {
                    url: url.to_string(),
                    body: body.clone(),
                }),
                None => Err(ScanError::Fetch {
                    url: url.to_string(),
                    reason: "no such page".to_string(),
                }),
            }
        }
    }

    fn listing_page(hrefs: &[&str]) -> String {
        let mut body = String::from("<html><body><pre>\n");
        for filler in ["?C=N;O=D", "?C=M;O=A", "?C=S;O=A", "?C=D;O=A", "?C=T;O=A", "../"] {
            body.push_str(&format!("<a href=\"{filler}\">{filler}</a>\n"));
        }
        for href in hrefs {
            body.push_str(&format!("<a href=\"{href}\">{href}</a>\n"));
        }
        body.push_str("</pre></body></html>\n");
        body
    }

    fn mseed_href(day: u32, hour: u32) -> String {
        format!("./HYD-2016-01-{day:02}T{hour:02}:00:00.000000.mseed")
    }

    const ROOT: &str = "https://example.net/files/RS03AXBS/LJ03A/09-HYDBBA302/";

    fn single_month_tree(days: &[(u32, &[u32])]) -> FakeLister {
        let mut lister = FakeLister::new();
        lister.page(ROOT, listing_page(&["2016/"]));
        lister.page(&format!("{ROOT}2016/"), listing_page(&["01/"]));

        let day_folders: Vec<String> = days.iter().map(|(d, _)| format!("{d:02}/")).collect();
        let day_refs: Vec<&str> = day_folders.iter().map(String::as_str).collect();
        lister.page(&format!("{ROOT}2016/01/"), listing_page(&day_refs));

        for (day, hours) in days {
            let hrefs: Vec<String> = hours.iter().map(|h| mseed_href(*day, *h)).collect();
            let href_refs: Vec<&str> = hrefs.iter().map(String::as_str).collect();
            lister.page(
                &format!("{ROOT}2016/01/{day:02}/"),
                listing_page(&href_refs),
            );
        }
        lister
    }

    fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .expect("valid date")
            .and_hms_opt(h, 0, 0)
            .expect("valid time")
    }

    #[test]
    fn fresh_crawl_indexes_all_recordings() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        let lister = single_month_tree(&[(15, &[0, 6]), (16, &[0])]);
        let settings = CrawlSettings::default();

        let outcome = crawl(&store, &lister, &settings, ROOT).expect("crawl");
        assert!(!outcome.resumed);
        assert_eq!(outcome.days_listed, 2);
        assert_eq!(outcome.entries_appended, 3);
        assert_eq!(outcome.months_committed, 1);

        let entries = store.load().expect("load");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].start_time, ts(2016, 1, 15, 0));
        assert_eq!(entries[0].folder_path, format!("{ROOT}2016/01/15/"));
        assert_eq!(
            entries[0].file_name,
            "HYD-2016-01-15T00:00:00.000000.mseed"
        );
    }

    #[test]
    fn second_run_appends_nothing_new() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        let lister = single_month_tree(&[(15, &[0, 6])]);
        let settings = CrawlSettings::default();

        crawl(&store, &lister, &settings, ROOT).expect("first run");
        let rerun = crawl(&store, &lister, &settings, ROOT).expect("second run");

        assert!(rerun.resumed);
        assert_eq!(rerun.entries_appended, 0);
        assert_eq!(store.load().expect("load").len(), 2);
    }

    #[test]
    fn resumption_skips_covered_periods_and_refetches_latest_day() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        store.initialize_empty().expect("init");
        store
            .append_and_dedupe(&[IndexEntry {
                folder_path: format!("{ROOT}2016/01/15/"),
                file_name: "HYD-2016-01-15T00:00:00.000000.mseed".to_string(),
                start_time: ts(2016, 1, 15, 0),
            }])
            .expect("seed");

        let mut lister = FakeLister::new();
        lister.page(ROOT, listing_page(&["2015/", "2016/"]));
        lister.page(&format!("{ROOT}2016/"), listing_page(&["01/"]));
        lister.page(&format!("{ROOT}2016/01/"), listing_page(&["14/", "15/", "16/"]));
        let day15: Vec<String> = vec![mseed_href(15, 0), mseed_href(15, 6)];
        let day15_refs: Vec<&str> = day15.iter().map(String::as_str).collect();
        lister.page(&format!("{ROOT}2016/01/15/"), listing_page(&day15_refs));
        let day16 = mseed_href(16, 0);
        lister.page(&format!("{ROOT}2016/01/16/"), listing_page(&[day16.as_str()]));

        let outcome =
            crawl(&store, &lister, &CrawlSettings::default(), ROOT).expect("resumed crawl");
        assert!(outcome.resumed);
        assert_eq!(outcome.entries_appended, 2);

        let fetched = lister.fetched_urls();
        assert!(!fetched.contains(&format!("{ROOT}2015/")));
        assert!(!fetched.contains(&format!("{ROOT}2016/01/14/")));
        assert!(fetched.contains(&format!("{ROOT}2016/01/15/")));
        assert!(fetched.contains(&format!("{ROOT}2016/01/16/")));
    }

    #[test]
    fn missing_resume_year_is_surfaced() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        store.initialize_empty().expect("init");
        store
            .append_and_dedupe(&[IndexEntry {
                folder_path: format!("{ROOT}2016/01/15/"),
                file_name: "HYD-2016-01-15T00:00:00.000000.mseed".to_string(),
                start_time: ts(2016, 1, 15, 0),
            }])
            .expect("seed");

        let mut lister = FakeLister::new();
        lister.page(ROOT, listing_page(&["2017/", "2018/"]));

        let err = crawl(&store, &lister, &CrawlSettings::default(), ROOT)
            .expect_err("resume year is gone");
        match err {
            ScanError::ResumePointMissing { level, wanted, .. } => {
                assert_eq!(level, "year");
                assert_eq!(wanted, 2016);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn anomalous_day_contributes_no_entries_and_crawl_continues() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        let mut lister = single_month_tree(&[(15, &[0]), (16, &[0])]);
        let oversized = format!(
            "{}{}",
            listing_page(&[mseed_href(15, 0).as_str()]),
            " ".repeat(300_000)
        );
        lister.page(&format!("{ROOT}2016/01/15/"), oversized);

        let outcome =
            crawl(&store, &lister, &CrawlSettings::default(), ROOT).expect("crawl");
        assert_eq!(outcome.days_skipped, 1);
        assert_eq!(outcome.entries_appended, 1);

        let entries = store.load().expect("load");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_time, ts(2016, 1, 16, 0));
    }

    #[test]
    fn fetch_failure_aborts_but_committed_months_survive() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));

        let mut lister = FakeLister::new();
        lister.page(ROOT, listing_page(&["2016/"]));
        lister.page(&format!("{ROOT}2016/"), listing_page(&["01/", "02/"]));
        lister.page(&format!("{ROOT}2016/01/"), listing_page(&["15/"]));
        let day15 = mseed_href(15, 0);
        lister.page(&format!("{ROOT}2016/01/15/"), listing_page(&[day15.as_str()]));
        lister.page(&format!("{ROOT}2016/02/"), listing_page(&["01/"]));
        // 2016/02/01/ is never registered, so its fetch fails.

        let err = crawl(&store, &lister, &CrawlSettings::default(), ROOT)
            .expect_err("second month must abort");
        assert!(matches!(err, ScanError::Fetch { .. }));

        let entries = store.load().expect("load");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_time, ts(2016, 1, 15, 0));
    }

    #[test]
    fn non_recording_links_are_ignored() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        let mut lister = FakeLister::new();
        lister.page(ROOT, listing_page(&["2016/"]));
        lister.page(&format!("{ROOT}2016/"), listing_page(&["01/"]));
        lister.page(&format!("{ROOT}2016/01/"), listing_page(&["15/"]));
        let day15 = mseed_href(15, 0);
        lister.page(
            &format!("{ROOT}2016/01/15/"),
            listing_page(&["./checksums.md5", day15.as_str()]),
        );

        let outcome = crawl(&store, &lister, &CrawlSettings::default(), ROOT).expect("crawl");
        assert_eq!(outcome.entries_appended, 1);
    }

    #[test]
    fn parse_start_time_reads_fixed_width_stamp() {
        let parsed = parse_start_time("HYD-2016-01-15T12:34:56.789000.mseed", ".mseed")
            .expect("parseable");
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2016, 1, 15)
                .expect("valid date")
                .and_hms_micro_opt(12, 34, 56, 789_000)
                .expect("valid time")
        );
    }

    #[test]
    fn parse_start_time_rejects_short_names() {
        let err = parse_start_time("short.mseed", ".mseed").expect_err("too short");
        assert!(matches!(err, ScanError::BadTimestamp { .. }));
    }

    #[test]
    fn strip_listing_prefix_drops_relative_marker() {
        assert_eq!(
            strip_listing_prefix("./HYD-2016-01-15T00:00:00.000000.mseed"),
            "HYD-2016-01-15T00:00:00.000000.mseed"
        );
        assert_eq!(strip_listing_prefix("plain.mseed"), "plain.mseed");
    }
}
