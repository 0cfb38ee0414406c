use crate::error::ScanError;
use chrono::NaiveDateTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One discovered recording. `folder_path` is the day-folder URL the file was
/// listed under, `file_name` the entry name within it. The pair is unique
/// within a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub folder_path: String,
    pub file_name: String,
    pub start_time: NaiveDateTime,
}

impl IndexEntry {
    pub fn record_url(&self) -> String {
        format!("{}{}", self.folder_path, self.file_name)
    }
}

/// Persisted lookup table of discovered recordings, stored as JSON Lines and
/// rewritten whole on every commit. Entries are kept sorted by `start_time`
/// ascending; resumption and range selection rely on that ordering.
pub struct IndexStore {
    path: PathBuf,
}

/// Held for the duration of a crawl run. Only one writer may mutate a store
/// at a time; the advisory lock lives in a sidecar file next to the store.
#[derive(Debug)]
pub struct StoreGuard {
    file: fs::File,
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.lock", self.path.display()))
    }

    /// Take the single-writer lock for this store. Fails fast instead of
    /// blocking when another crawl run already holds it.
    pub fn lock_exclusive(&self) -> Result<StoreGuard, ScanError> {
        let parent = self.parent_dir();
        if !parent.is_dir() {
            return Err(ScanError::PathNotFound(parent));
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        file.try_lock_exclusive()
            .map_err(|_| ScanError::StoreLocked(self.path.clone()))?;
        Ok(StoreGuard { file })
    }

    /// Create an empty store file. The parent directory must already exist;
    /// a missing parent is a configuration error, not something to repair.
    pub fn initialize_empty(&self) -> Result<(), ScanError> {
        let parent = self.parent_dir();
        if !parent.is_dir() {
            return Err(ScanError::PathNotFound(parent));
        }
        fs::write(&self.path, "")?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<IndexEntry>, ScanError> {
        if !self.exists() {
            return Err(ScanError::StoreUnavailable(self.path.clone()));
        }

        let raw = fs::read_to_string(&self.path)?;
        let mut out = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: IndexEntry =
                serde_json::from_str(trimmed).map_err(|source| ScanError::MalformedStore {
                    path: self.path.clone(),
                    line: idx + 1,
                    source,
                })?;
            out.push(entry);
        }
        Ok(out)
    }

    /// Merge `new_entries` into the store, drop duplicate
    /// (`folder_path`, `file_name`) rows keeping the first copy, re-sort by
    /// `start_time`, and rewrite the file. Returns the number of rows the
    /// store grew by.
    pub fn append_and_dedupe(&self, new_entries: &[IndexEntry]) -> Result<usize, ScanError> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.extend_from_slice(new_entries);

        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        entries.retain(|entry| seen.insert((entry.folder_path.clone(), entry.file_name.clone())));
        entries.sort_by_key(|entry| entry.start_time);

        self.rewrite(&entries)?;
        Ok(entries.len() - before)
    }

    /// The entry with the maximum `start_time`, used to seed resumption.
    pub fn latest(&self) -> Result<Option<IndexEntry>, ScanError> {
        let entries = self.load()?;
        Ok(entries.into_iter().max_by_key(|entry| entry.start_time))
    }

    fn rewrite(&self, entries: &[IndexEntry]) -> Result<(), ScanError> {
        let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir())?;
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(|source| ScanError::MalformedStore {
                path: self.path.clone(),
                line: 0,
                source,
            })?;
            writeln!(tmp, "{line}")?;
        }
        tmp.persist(&self.path).map_err(|err| ScanError::Io(err.error))?;
        Ok(())
    }
}

/// Order-preserving half-open range filter: keeps entries with
/// `start <= start_time < end`.
pub fn select_range(
    entries: &[IndexEntry],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<IndexEntry> {
    entries
        .iter()
        .filter(|entry| entry.start_time >= start && entry.start_time < end)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .expect("valid date")
            .and_hms_opt(h, 0, 0)
            .expect("valid time")
    }

    fn entry(day: u32, hour: u32) -> IndexEntry {
        IndexEntry {
            folder_path: format!("https://example.net/files/2016/01/{day:02}/"),
            file_name: format!("HYD-2016-01-{day:02}T{hour:02}:00:00.000000.mseed"),
            start_time: ts(2016, 1, day, hour),
        }
    }

    #[test]
    fn load_without_initialization_is_unavailable() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));

        let err = store.load().expect_err("store must be unavailable");
        assert!(matches!(err, ScanError::StoreUnavailable(_)));
    }

    #[test]
    fn initialize_fails_when_parent_missing() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("missing/lookup.jsonl"));

        let err = store.initialize_empty().expect_err("parent is missing");
        assert!(matches!(err, ScanError::PathNotFound(_)));
    }

    #[test]
    fn append_and_dedupe_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        store.initialize_empty().expect("init");

        let batch = vec![entry(15, 0), entry(15, 1)];
        let grew = store.append_and_dedupe(&batch).expect("first append");
        assert_eq!(grew, 2);

        let grew_again = store.append_and_dedupe(&batch).expect("second append");
        assert_eq!(grew_again, 0);
        assert_eq!(store.load().expect("load").len(), 2);
    }

    #[test]
    fn append_keeps_entries_sorted_by_start_time() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        store.initialize_empty().expect("init");

        store
            .append_and_dedupe(&[entry(16, 0), entry(15, 3), entry(15, 1)])
            .expect("append");

        let entries = store.load().expect("load");
        let times: Vec<_> = entries.iter().map(|e| e.start_time).collect();
        assert_eq!(times, vec![ts(2016, 1, 15, 1), ts(2016, 1, 15, 3), ts(2016, 1, 16, 0)]);
    }

    #[test]
    fn latest_is_none_for_empty_store() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        store.initialize_empty().expect("init");

        assert!(store.latest().expect("latest").is_none());
    }

    #[test]
    fn latest_returns_maximum_start_time() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));
        store.initialize_empty().expect("init");
        store
            .append_and_dedupe(&[entry(15, 0), entry(17, 0), entry(16, 0)])
            .expect("append");

        let latest = store.latest().expect("latest").expect("non-empty");
        assert_eq!(latest.start_time, ts(2016, 1, 17, 0));
    }

    #[test]
    fn malformed_line_is_reported_with_position() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("lookup.jsonl");
        std::fs::write(&path, "{not json}\n").expect("write");
        let store = IndexStore::new(&path);

        let err = store.load().expect_err("malformed");
        match err {
            ScanError::MalformedStore { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lock_is_exclusive_per_store() {
        let tmp = tempdir().expect("tempdir");
        let store = IndexStore::new(tmp.path().join("lookup.jsonl"));

        let guard = store.lock_exclusive().expect("first lock");
        let err = store.lock_exclusive().expect_err("second lock must fail");
        assert!(matches!(err, ScanError::StoreLocked(_)));
        drop(guard);

        store.lock_exclusive().expect("relock after release");
    }

    #[test]
    fn select_range_is_half_open() {
        let entries = vec![entry(15, 0), entry(16, 0)];

        let selected = select_range(&entries, ts(2016, 1, 15, 0), ts(2016, 1, 16, 0));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].start_time, ts(2016, 1, 15, 0));
    }

    #[test]
    fn select_range_empty_result_is_valid() {
        let entries = vec![entry(15, 0)];

        let selected = select_range(&entries, ts(2016, 2, 1, 0), ts(2016, 3, 1, 0));
        assert!(selected.is_empty());
    }

    #[test]
    fn select_range_preserves_store_order() {
        let entries = vec![entry(15, 0), entry(15, 6), entry(16, 0), entry(17, 0)];

        let selected = select_range(&entries, ts(2016, 1, 15, 0), ts(2016, 1, 17, 0));
        let times: Vec<_> = selected.iter().map(|e| e.start_time).collect();
        assert_eq!(
            times,
            vec![ts(2016, 1, 15, 0), ts(2016, 1, 15, 6), ts(2016, 1, 16, 0)]
        );
    }
}
