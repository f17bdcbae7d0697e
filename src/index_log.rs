//! Append-only JSON-lines operation log backing a store index.
//!
//! Each line is one operation:
//!
//! ```text
//! {"op":"put","entry":{...}}
//! {"op":"delete","id":"..."}
//! {"op":"clear"}
//! ```
//!
//! Opening a log replays it into an insertion-ordered map. A `put` of an
//! existing id moves that id to the end. An unparsable final line is a torn
//! write from an interrupted append; it is skipped with a warning. An
//! unparsable line anywhere else is corruption.
//!
//! Compaction rewrites the log as one `put` per live entry into a
//! temporary file, then renames it over the original.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use osint_harness_core::store::{DocumentEntry, VectorEntry};

use crate::error::StoreError;

/// Minimum number of logged operations before compaction is considered.
const COMPACT_MIN_OPS: usize = 64;

/// An index entry with a stable key.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for DocumentEntry {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for VectorEntry {
    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LogOp<T> {
    Put { entry: T },
    Delete { id: String },
    Clear,
}

/// Apply one operation to an in-memory index.
pub fn apply<T: Keyed>(index: &mut IndexMap<String, T>, op: LogOp<T>) {
    match op {
        LogOp::Put { entry } => {
            let key = entry.key().to_string();
            index.shift_remove(&key);
            index.insert(key, entry);
        }
        LogOp::Delete { id } => {
            index.shift_remove(&id);
        }
        LogOp::Clear => index.clear(),
    }
}

pub struct IndexLog<T> {
    path: PathBuf,
    file: File,
    ops: usize,
    _entry: PhantomData<T>,
}

impl<T> IndexLog<T>
where
    T: Keyed + Clone + Serialize + DeserializeOwned,
{
    /// Open (creating if needed) the log at `path` and replay it.
    ///
    /// A log with a torn final line is compacted straight away so later
    /// appends start on a fresh line.
    pub fn open(path: &Path) -> Result<(Self, IndexMap<String, T>), StoreError> {
        let (index, ops, torn) = replay(path)?;
        let file = open_append(path)?;
        let mut log = Self {
            path: path.to_path_buf(),
            file,
            ops,
            _entry: PhantomData,
        };
        if torn {
            log.compact(&index)?;
        }
        Ok((log, index))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of operations currently in the log file.
    pub fn ops(&self) -> usize {
        self.ops
    }

    /// Append and flush one operation.
    pub fn append(&mut self, op: &LogOp<T>) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(op).map_err(|e| StoreError::json(&self.path, e))?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.ops += 1;
        Ok(())
    }

    /// Whether dead operations outnumber live entries enough to compact.
    pub fn should_compact(&self, live: usize) -> bool {
        self.ops >= COMPACT_MIN_OPS && self.ops > live.saturating_mul(2)
    }

    /// Rewrite the log to hold exactly `live`, atomically.
    pub fn compact(&mut self, live: &IndexMap<String, T>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("log.tmp");
        {
            let mut out = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            for entry in live.values() {
                let op = LogOp::Put {
                    entry: entry.clone(),
                };
                let mut line = serde_json::to_string(&op).map_err(|e| StoreError::json(&tmp, e))?;
                line.push('\n');
                out.write_all(line.as_bytes())
                    .map_err(|e| StoreError::io(&tmp, e))?;
            }
            out.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        self.file = open_append(&self.path)?;
        tracing::debug!(path = %self.path.display(), before = self.ops, after = live.len(), "compacted index log");
        self.ops = live.len();
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))
}

fn replay<T>(path: &Path) -> Result<(IndexMap<String, T>, usize, bool), StoreError>
where
    T: Keyed + DeserializeOwned,
{
    let mut index = IndexMap::new();
    if !path.exists() {
        return Ok((index, 0, false));
    }

    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<Result<_, _>>()
        .map_err(|e| StoreError::io(path, e))?;

    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let mut ops = 0;
    let mut torn = false;
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogOp<T>>(line) {
            Ok(op) => {
                apply(&mut index, op);
                ops += 1;
            }
            Err(e) if Some(i) == last => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring torn final line in index log");
                torn = true;
            }
            Err(e) => {
                return Err(StoreError::CorruptLog {
                    path: path.display().to_string(),
                    line: i + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok((index, ops, torn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(id: &str) -> DocumentEntry {
        DocumentEntry {
            id: id.to_string(),
            source_type: "report".to_string(),
            source_name: "test".to_string(),
            ingested_at: Utc::now(),
            path: format!("documents/{}.json", id),
        }
    }

    fn keys(index: &IndexMap<String, DocumentEntry>) -> Vec<&str> {
        index.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_replay_applies_ops_in_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("documents.log");
        {
            let (mut log, index) = IndexLog::<DocumentEntry>::open(&path).unwrap();
            assert!(index.is_empty());
            log.append(&LogOp::Put { entry: entry("a") }).unwrap();
            log.append(&LogOp::Put { entry: entry("b") }).unwrap();
            log.append(&LogOp::Put { entry: entry("c") }).unwrap();
            log.append(&LogOp::Delete { id: "b".into() }).unwrap();
            log.append(&LogOp::Put { entry: entry("a") }).unwrap();
        }
        let (log, index) = IndexLog::<DocumentEntry>::open(&path).unwrap();
        assert_eq!(keys(&index), vec!["c", "a"]);
        assert_eq!(log.ops(), 5);
    }

    #[test]
    fn test_clear_op() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.log");
        {
            let (mut log, _) = IndexLog::<DocumentEntry>::open(&path).unwrap();
            log.append(&LogOp::Put { entry: entry("a") }).unwrap();
            log.append(&LogOp::Clear).unwrap();
            log.append(&LogOp::Put { entry: entry("z") }).unwrap();
        }
        let (_, index) = IndexLog::<DocumentEntry>::open(&path).unwrap();
        assert_eq!(keys(&index), vec!["z"]);
    }

    #[test]
    fn test_torn_final_line_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("documents.log");
        {
            let (mut log, _) = IndexLog::<DocumentEntry>::open(&path).unwrap();
            log.append(&LogOp::Put { entry: entry("a") }).unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"op\":\"put\",\"entry\":{\"id\":\"b").unwrap();
        drop(f);

        let (mut log, index) = IndexLog::<DocumentEntry>::open(&path).unwrap();
        assert_eq!(keys(&index), vec!["a"]);

        log.append(&LogOp::Put { entry: entry("c") }).unwrap();
        drop(log);
        let (_, index) = IndexLog::<DocumentEntry>::open(&path).unwrap();
        assert_eq!(keys(&index), vec!["a", "c"]);
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("documents.log");
        let good = serde_json::to_string(&LogOp::Put { entry: entry("a") }).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n{}\n", good, good)).unwrap();

        let err = IndexLog::<DocumentEntry>::open(&path).err().unwrap();
        assert!(matches!(err, StoreError::CorruptLog { line: 2, .. }));
    }

    #[test]
    fn test_compaction_rewrites_live_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("documents.log");
        let (mut log, mut index) = IndexLog::<DocumentEntry>::open(&path).unwrap();
        for i in 0..100 {
            let op = LogOp::Put {
                entry: entry(&format!("d{}", i % 3)),
            };
            log.append(&op).unwrap();
            apply(&mut index, op);
        }
        assert!(log.should_compact(index.len()));
        log.compact(&index).unwrap();
        assert_eq!(log.ops(), 3);
        assert!(!log.should_compact(index.len()));

        log.append(&LogOp::Delete { id: "d0".into() }).unwrap();
        drop(log);
        let (_, replayed) = IndexLog::<DocumentEntry>::open(&path).unwrap();
        assert_eq!(keys(&replayed), vec!["d1", "d2"]);
    }
}
