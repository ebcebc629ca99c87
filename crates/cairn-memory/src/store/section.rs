//! One append-only JSONL section file and its in-memory fold.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::types::{Record, RecordId, RecordKind};

/// One line of a section file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub(crate) enum Entry {
    /// A newly created record.
    Record(Record),
    /// Topics added to an existing record.
    Topics {
        id: RecordId,
        topics: BTreeSet<String>,
        at: DateTime<Utc>,
    },
    /// A revised confidence for an existing knowledge record.
    Confidence {
        id: RecordId,
        confidence: f32,
        at: DateTime<Utc>,
    },
}

/// Parsed view of a section file, advanced incrementally by byte offset.
#[derive(Debug)]
pub(crate) struct SectionState {
    path: PathBuf,
    /// Bytes consumed so far; always sits just past a `\n`.
    offset: u64,
    records: Vec<Record>,
    by_id: HashMap<RecordId, usize>,
    by_hash: HashMap<(RecordKind, String), usize>,
    skipped: usize,
}

impl SectionState {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            records: Vec::new(),
            by_id: HashMap::new(),
            by_hash: HashMap::new(),
            skipped: 0,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<&Record> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    pub(crate) fn find_by_hash(&self, kind: RecordKind, hash: &str) -> Option<&Record> {
        self.by_hash
            .get(&(kind, hash.to_string()))
            .map(|&idx| &self.records[idx])
    }

    /// Number of complete lines that could not be parsed.
    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.records.clear();
        self.by_id.clear();
        self.by_hash.clear();
        self.skipped = 0;
    }

    /// Read whatever complete lines were appended since the last refresh.
    ///
    /// An unterminated trailing fragment is left unread; it is either a write
    /// in progress or a torn write that the next writer will terminate.
    pub(crate) fn refresh(&mut self) -> Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.offset > 0 {
                    warn!(path = %self.path.display(), "Section file disappeared, resetting");
                    self.reset();
                }
                return Ok(());
            }
            Err(e) => return Err(MemoryError::storage(&self.path)(e)),
        };

        let len = file
            .metadata()
            .map_err(MemoryError::storage(&self.path))?
            .len();
        if len < self.offset {
            warn!(path = %self.path.display(), "Section file shrank, rereading from start");
            self.reset();
        }
        if len == self.offset {
            return Ok(());
        }

        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.seek(SeekFrom::Start(self.offset))
            .and_then(|_| file.take(len - self.offset).read_to_end(&mut buf))
            .map_err(MemoryError::storage(&self.path))?;

        let mut consumed = 0usize;
        while let Some(pos) = buf[consumed..].iter().position(|&b| b == b'\n') {
            let line_no_offset = self.offset + consumed as u64;
            self.apply_line(&buf[consumed..consumed + pos], line_no_offset);
            consumed += pos + 1;
        }
        self.offset += consumed as u64;

        Ok(())
    }

    fn apply_line(&mut self, line: &[u8], at_byte: u64) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match serde_json::from_slice::<Entry>(line) {
            Ok(entry) => self.apply(entry),
            Err(e) => {
                self.skipped += 1;
                warn!(
                    path = %self.path.display(),
                    at_byte,
                    error = %e,
                    "Skipping unparseable line"
                );
            }
        }
    }

    fn apply(&mut self, entry: Entry) {
        match entry {
            Entry::Record(record) => {
                if self.by_id.contains_key(&record.id) {
                    debug!(id = %record.id, "Ignoring repeated record id");
                    return;
                }
                let key = (record.kind, record.content_hash.clone());
                if self.by_hash.contains_key(&key) {
                    // Only reachable through hand edits; the first line wins.
                    warn!(id = %record.id, kind = %record.kind, "Ignoring duplicate content");
                    return;
                }
                let idx = self.records.len();
                self.by_id.insert(record.id, idx);
                self.by_hash.insert(key, idx);
                self.records.push(record);
            }
            Entry::Topics { id, topics, .. } => match self.by_id.get(&id) {
                Some(&idx) => self.records[idx].topics.extend(topics),
                None => warn!(%id, "Topic annotation for unknown record"),
            },
            Entry::Confidence { id, confidence, .. } => match self.by_id.get(&id) {
                Some(&idx) if self.records[idx].kind.is_knowledge() => {
                    self.records[idx].confidence = Some(confidence);
                }
                Some(_) => warn!(%id, "Confidence annotation on a non-knowledge record"),
                None => warn!(%id, "Confidence annotation for unknown record"),
            },
        }
    }

    /// Append one entry as a single line. Caller must hold the store lock.
    ///
    /// Fails closed: if the write or sync fails, the file is truncated back to
    /// its previous length before the error is returned.
    pub(crate) fn append(&mut self, entry: &Entry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let storage = MemoryError::storage;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(storage(&self.path))?;

        let original_len = file.metadata().map_err(storage(&self.path))?.len();
        let torn = original_len > 0
            && !ends_with_newline(&mut file, original_len).map_err(storage(&self.path))?;
        if torn {
            warn!(path = %self.path.display(), "Terminating torn trailing line before append");
            line.insert(0, b'\n');
        }

        if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
            if let Err(trunc) = file.set_len(original_len) {
                warn!(
                    path = %self.path.display(),
                    error = %trunc,
                    "Failed to roll back partial append"
                );
            }
            return Err(storage(&self.path)(e));
        }

        debug!(path = %self.path.display(), bytes = line.len(), "Appended entry");
        Ok(())
    }
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
