//! Rotating per-transaction-name log streams
//!
//! The rotator owns every open output stream in the pipeline. Each stream is
//! keyed by sanitized transaction name plus stream kind, carries a write
//! counter, and is rotated (flushed, closed, renamed with a timestamp
//! suffix, reopened fresh) once the counter passes the threshold. With no
//! target folder configured everything goes to the console and no per-key
//! state is kept.
//!
//! Rotation failures are logged and survived: a failed rename keeps the data
//! in place and writing continues against a reopened stream. A failed write
//! evicts the handle so the next write retries on a fresh one.

use chrono::Local;
use regex::Regex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Which of the two output streams of a transaction name a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Per-transaction raw record blocks (`<name>.log`)
    Raw,
    /// Aggregation reports (`<name>.percent.log`)
    Percent,
}

/// Stable stream key: sanitized transaction name plus stream kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    file_name: String,
}

impl FileKey {
    pub fn new(transaction_name: &str, kind: StreamKind) -> Self {
        let mut file_name = sanitize(transaction_name);
        if kind == StreamKind::Percent {
            file_name.push_str(".percent");
        }
        file_name.push_str(".log");
        Self { file_name }
    }

    /// The on-disk file name this key maps to.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Replace every run of non-word characters with `_` for a safe file name.
fn sanitize(name: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    NON_WORD
        .get_or_init(|| Regex::new(r"\W+").expect("valid pattern"))
        .replace_all(name, "_")
        .into_owned()
}

/// Open stream plus the record count since it was created or last rotated.
struct RotationState {
    out: BufWriter<File>,
    written: u64,
}

/// Owner of all open log streams, exclusively held by the writer thread.
pub struct FileRotator {
    folder: Option<PathBuf>,
    rotate_after: u64,
    streams: HashMap<String, RotationState>,
}

impl FileRotator {
    pub fn new(folder: Option<PathBuf>, rotate_after: u64) -> Self {
        Self {
            folder,
            rotate_after,
            streams: HashMap::new(),
        }
    }

    /// Write one record block (plus trailing newline) to the stream for
    /// `key`, rotating first when the write counter passes the threshold.
    pub fn write(&mut self, key: &FileKey, block: &str) -> io::Result<()> {
        let path = match &self.folder {
            None => {
                let mut out = io::stdout().lock();
                writeln!(out, "{block}")?;
                return Ok(());
            }
            Some(folder) => folder.join(key.file_name()),
        };

        let count = {
            let state = self.open_stream(key, &path)?;
            state.written += 1;
            state.written
        };

        if count > self.rotate_after {
            self.rotate(key, &path);
        }

        let state = self.open_stream(key, &path)?;
        let result = writeln!(state.out, "{block}").and_then(|()| state.out.flush());
        if result.is_err() {
            // Evict the handle; the next write reopens a fresh stream
            self.streams.remove(key.file_name());
        }
        result
    }

    /// Flush every open stream. Called at shutdown and after a writer fault.
    pub fn flush_all(&mut self) {
        for (file_name, state) in &mut self.streams {
            if let Err(e) = state.out.flush() {
                tracing::warn!("flush failed for '{}': {}", file_name, e);
            }
        }
    }

    fn open_stream(&mut self, key: &FileKey, path: &Path) -> io::Result<&mut RotationState> {
        match self.streams.entry(key.file_name().to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(entry.insert(RotationState {
                    out: BufWriter::new(file),
                    written: 0,
                }))
            }
        }
    }

    /// Close the current stream and rename the file with a sortable
    /// second-granularity timestamp suffix. A failed rename is logged and
    /// writing resumes against the original path either way.
    fn rotate(&mut self, key: &FileKey, path: &Path) {
        tracing::debug!(
            "rotating '{}' after {} records",
            key.file_name(),
            self.rotate_after
        );

        if let Some(mut state) = self.streams.remove(key.file_name()) {
            if let Err(e) = state.out.flush() {
                tracing::warn!("flush before rotation failed for '{}': {}", key.file_name(), e);
            }
            // Dropping the state closes the file ahead of the rename
        }

        let mut rotated = path.as_os_str().to_owned();
        rotated.push(format!(".{}", Local::now().format("%Y%m%d%H%M%S")));
        let rotated = PathBuf::from(rotated);

        if let Err(e) = fs::rename(path, &rotated) {
            tracing::error!(
                "can't move {} to {}: {}",
                path.display(),
                rotated.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn list_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sanitize_replaces_non_word_runs() {
        assert_eq!(sanitize("GET /api/v1/users?id=7"), "GET_api_v1_users_id_7");
        assert_eq!(sanitize("plain_name"), "plain_name");
        assert_eq!(sanitize("a  b!!c"), "a_b_c");
    }

    #[test]
    fn test_file_key_names() {
        assert_eq!(FileKey::new("job run", StreamKind::Raw).file_name(), "job_run.log");
        assert_eq!(
            FileKey::new("job run", StreamKind::Percent).file_name(),
            "job_run.percent.log"
        );
    }

    #[test]
    fn test_write_appends_blocks() {
        let dir = TempDir::new().unwrap();
        let mut rotator = FileRotator::new(Some(dir.path().to_path_buf()), 100);
        let key = FileKey::new("job", StreamKind::Raw);

        rotator.write(&key, "block one").unwrap();
        rotator.write(&key, "block two").unwrap();
        rotator.flush_all();

        let content = fs::read_to_string(dir.path().join("job.log")).unwrap();
        assert_eq!(content, "block one\nblock two\n");
    }

    #[test]
    fn test_rotation_triggers_exactly_past_threshold() {
        let dir = TempDir::new().unwrap();
        let mut rotator = FileRotator::new(Some(dir.path().to_path_buf()), 5);
        let key = FileKey::new("job", StreamKind::Raw);

        for i in 0..5 {
            rotator.write(&key, &format!("record {i}")).unwrap();
        }
        // No rotation yet at exactly the threshold
        assert_eq!(list_files(dir.path()), ["job.log"]);

        rotator.write(&key, "record 5").unwrap();
        rotator.flush_all();

        let files = list_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.contains(&"job.log".to_string()));

        let rotated = files.iter().find(|f| *f != "job.log").unwrap();
        let suffix_re = Regex::new(r"^job\.log\.\d{14}$").unwrap();
        assert!(suffix_re.is_match(rotated), "bad rotated name: {rotated}");

        // The rotated file holds the first five records, the fresh file the
        // record that triggered rotation
        let old = fs::read_to_string(dir.path().join(rotated)).unwrap();
        assert_eq!(old.lines().count(), 5);
        let fresh = fs::read_to_string(dir.path().join("job.log")).unwrap();
        assert_eq!(fresh, "record 5\n");
    }

    #[test]
    fn test_raw_and_percent_streams_are_independent() {
        let dir = TempDir::new().unwrap();
        let mut rotator = FileRotator::new(Some(dir.path().to_path_buf()), 100);

        rotator
            .write(&FileKey::new("job", StreamKind::Raw), "raw")
            .unwrap();
        rotator
            .write(&FileKey::new("job", StreamKind::Percent), "pct")
            .unwrap();
        rotator.flush_all();

        assert_eq!(list_files(dir.path()), ["job.log", "job.percent.log"]);
    }

    #[test]
    fn test_console_mode_keeps_no_state() {
        let mut rotator = FileRotator::new(None, 2);
        let key = FileKey::new("job", StreamKind::Raw);

        for _ in 0..10 {
            rotator.write(&key, "to console").unwrap();
        }
        assert!(rotator.streams.is_empty());
    }

    #[test]
    fn test_reopens_existing_file_for_append() {
        let dir = TempDir::new().unwrap();
        let key = FileKey::new("job", StreamKind::Raw);

        {
            let mut rotator = FileRotator::new(Some(dir.path().to_path_buf()), 100);
            rotator.write(&key, "first run").unwrap();
            rotator.flush_all();
        }
        {
            let mut rotator = FileRotator::new(Some(dir.path().to_path_buf()), 100);
            rotator.write(&key, "second run").unwrap();
            rotator.flush_all();
        }

        let content = fs::read_to_string(dir.path().join("job.log")).unwrap();
        assert_eq!(content, "first run\nsecond run\n");
    }
}
