//! Append-only, content-addressed record store.
//!
//! Records live in two JSONL files under the store directory, one per
//! [`Section`]. Every line is a self-contained entry: a record or an
//! annotation on an earlier record. Nothing is ever rewritten in place.
//!
//! Writers take the advisory `store.lock` for the duration of a single
//! append; readers tail the files without locking and only ever consume
//! complete (newline-terminated) lines.

mod section;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::lock::StoreLock;
use crate::types::{Record, RecordId, RecordKind, Section, content_hash, topic_set};
use crate::validation::{
    ValidationError, validate_confidence, validate_required, validate_session_id, validate_topic,
    validate_unit_score,
};

use section::{Entry, SectionState};

/// Default time to wait for the store lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Insert Input
// ─────────────────────────────────────────────────────────────────────────────

/// Fields of a record about to be inserted.
///
/// The store assigns `id`, `content_hash` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub text: String,
    pub kind: RecordKind,
    pub topics: BTreeSet<String>,
    pub session_id: String,
    pub turn: u32,
    pub quality: f32,
    pub confidence: Option<f32>,
    pub agent_role: Option<String>,
}

impl NewRecord {
    /// Minimal record; topics, confidence and role default to empty.
    pub fn new(
        text: impl Into<String>,
        kind: RecordKind,
        session_id: impl Into<String>,
        turn: u32,
        quality: f32,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            topics: BTreeSet::new(),
            session_id: session_id.into(),
            turn,
            quality,
            confidence: None,
            agent_role: None,
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.topics = topic_set(topics);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_required("text", &self.text)?;
        validate_session_id(&self.session_id)?;
        for topic in &self.topics {
            validate_topic(topic)?;
        }
        validate_unit_score("quality", self.quality)?;
        validate_confidence(self.kind, self.confidence)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// List Filter
// ─────────────────────────────────────────────────────────────────────────────

/// Filter for [`RecordStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub kinds: Vec<RecordKind>,
    pub session_id: Option<String>,
    /// Matches records carrying at least one of these topics.
    pub topics: Vec<String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = RecordKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &Record) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && self
                .session_id
                .as_deref()
                .is_none_or(|s| record.session_id == s)
            && record.has_any_topic(&self.topics)
    }

    fn wants(&self, section: Section) -> bool {
        self.kinds.is_empty() || self.kinds.iter().any(|k| k.section() == section)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Store
// ─────────────────────────────────────────────────────────────────────────────

/// Durable record store rooted at one directory.
pub struct RecordStore {
    dir: PathBuf,
    lock_timeout: Duration,
    /// Hard cutoff for lock waits, set by callers running under a deadline.
    lock_deadline: Option<Instant>,
    conversation: Mutex<SectionState>,
    knowledge: Mutex<SectionState>,
}

impl RecordStore {
    /// Open (or create) a store directory and load both sections.
    pub fn open(dir: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(MemoryError::storage(&dir))?;

        let store = Self {
            conversation: Mutex::new(SectionState::new(
                dir.join(Section::Conversation.file_name()),
            )),
            knowledge: Mutex::new(SectionState::new(dir.join(Section::Knowledge.file_name()))),
            dir,
            lock_timeout,
            lock_deadline: None,
        };
        store.refresh()?;

        info!(
            dir = %store.dir.display(),
            records = store.len(),
            "Opened record store"
        );
        Ok(store)
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Never wait for the lock past `deadline`, whatever the configured
    /// timeout.
    pub fn with_lock_deadline(mut self, deadline: Instant) -> Self {
        self.lock_deadline = Some(deadline);
        self
    }

    /// How long the next lock wait may take: the configured timeout, cut
    /// short by the lock deadline when one is set.
    pub fn lock_timeout(&self) -> Duration {
        match self.lock_deadline {
            Some(deadline) => self
                .lock_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.lock_timeout,
        }
    }

    fn section(&self, section: Section) -> &Mutex<SectionState> {
        match section {
            Section::Conversation => &self.conversation,
            Section::Knowledge => &self.knowledge,
        }
    }

    /// Pick up appends made by other processes.
    pub fn refresh(&self) -> Result<()> {
        for section in Section::ALL {
            self.section(section).lock().refresh()?;
        }
        Ok(())
    }

    /// Insert a record, returning the existing one if the same content is
    /// already stored for that kind.
    pub fn insert(&self, new: NewRecord) -> Result<Record> {
        self.insert_or_get(new).map(|(record, _)| record)
    }

    /// Like [`insert`](Self::insert), also reporting whether a new record was
    /// created.
    pub fn insert_or_get(&self, new: NewRecord) -> Result<(Record, bool)> {
        new.validate()?;
        let hash = content_hash(&new.text);

        let mut state = self.section(new.kind.section()).lock();
        state.refresh()?;
        if let Some(existing) = state.find_by_hash(new.kind, &hash) {
            debug!(id = %existing.id, kind = %new.kind, "Duplicate content, returning existing");
            return Ok((existing.clone(), false));
        }

        let _lock = StoreLock::acquire(&self.dir, self.lock_timeout())?;
        // Another process may have written the same content while we waited.
        state.refresh()?;
        if let Some(existing) = state.find_by_hash(new.kind, &hash) {
            debug!(id = %existing.id, kind = %new.kind, "Duplicate content, returning existing");
            return Ok((existing.clone(), false));
        }

        let record = Record {
            id: RecordId::new(),
            content_hash: hash,
            text: new.text,
            kind: new.kind,
            topics: new.topics,
            session_id: new.session_id,
            turn: new.turn,
            quality: new.quality,
            created_at: Utc::now(),
            confidence: new.confidence,
            agent_role: new.agent_role,
        };
        state.append(&Entry::Record(record.clone()))?;
        state.refresh()?;

        debug!(id = %record.id, kind = %record.kind, "Inserted record");
        Ok((record, true))
    }

    /// Fetch a record by id.
    pub fn get(&self, id: &RecordId) -> Result<Record> {
        for section in Section::ALL {
            let mut state = self.section(section).lock();
            state.refresh()?;
            if let Some(record) = state.get(id) {
                return Ok(record.clone());
            }
        }
        Err(MemoryError::NotFound(format!("record {id}")))
    }

    /// List records matching `filter` in insertion order.
    ///
    /// Each section keeps its file order; the two sections are interleaved by
    /// `created_at`.
    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut per_section = Vec::with_capacity(2);
        for section in Section::ALL {
            if !filter.wants(section) {
                continue;
            }
            let mut state = self.section(section).lock();
            state.refresh()?;
            per_section.push(
                state
                    .records()
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect::<Vec<_>>(),
            );
        }

        let mut sections = per_section.into_iter();
        let first = sections.next().unwrap_or_default();
        Ok(match sections.next() {
            Some(second) => merge_by_created(first, second),
            None => first,
        })
    }

    /// Every record in the store.
    pub fn all_records(&self) -> Result<Vec<Record>> {
        self.list(&RecordFilter::default())
    }

    /// Add topics to a record. Existing topics are never removed.
    ///
    /// Returns the record unchanged (and writes nothing) when every topic is
    /// already present.
    pub fn annotate_topics<S: AsRef<str>>(&self, id: &RecordId, topics: &[S]) -> Result<Record> {
        for topic in topics {
            validate_topic(topic.as_ref())?;
        }
        let requested = topic_set(topics);

        let section = self.locate(id)?;
        let mut state = self.section(section).lock();
        let _lock = StoreLock::acquire(&self.dir, self.lock_timeout())?;
        state.refresh()?;

        let current = state
            .get(id)
            .ok_or_else(|| MemoryError::NotFound(format!("record {id}")))?;
        let added: BTreeSet<String> = requested.difference(&current.topics).cloned().collect();
        if added.is_empty() {
            return Ok(current.clone());
        }

        state.append(&Entry::Topics {
            id: *id,
            topics: added,
            at: Utc::now(),
        })?;
        state.refresh()?;
        state
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(format!("record {id}")))
    }

    /// Revise the confidence of a knowledge record.
    pub fn revise_confidence(&self, id: &RecordId, confidence: f32) -> Result<Record> {
        validate_unit_score("confidence", confidence)?;

        let section = self.locate(id)?;
        let mut state = self.section(section).lock();
        let _lock = StoreLock::acquire(&self.dir, self.lock_timeout())?;
        state.refresh()?;

        let kind = state
            .get(id)
            .map(|r| r.kind)
            .ok_or_else(|| MemoryError::NotFound(format!("record {id}")))?;
        validate_confidence(kind, Some(confidence))?;

        state.append(&Entry::Confidence {
            id: *id,
            confidence,
            at: Utc::now(),
        })?;
        state.refresh()?;
        state
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(format!("record {id}")))
    }

    fn locate(&self, id: &RecordId) -> Result<Section> {
        for section in Section::ALL {
            let mut state = self.section(section).lock();
            state.refresh()?;
            if state.get(id).is_some() {
                return Ok(section);
            }
        }
        Err(MemoryError::NotFound(format!("record {id}")))
    }

    /// Record count per kind (kinds with no records are omitted).
    pub fn counts(&self) -> Result<BTreeMap<RecordKind, usize>> {
        let mut counts = BTreeMap::new();
        for record in self.all_records()? {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Total records loaded so far (no refresh).
    pub fn len(&self) -> usize {
        Section::ALL
            .iter()
            .map(|s| self.section(*s).lock().records().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Complete lines skipped as unparseable across both sections.
    pub fn skipped_lines(&self) -> usize {
        Section::ALL
            .iter()
            .map(|s| self.section(*s).lock().skipped())
            .sum()
    }

    /// Path of the JSONL file backing `section`.
    pub fn section_path(&self, section: Section) -> PathBuf {
        self.section(section).lock().path().to_path_buf()
    }
}

/// Merge two insertion-ordered lists by `created_at`, keeping each list's
/// internal order.
fn merge_by_created(a: Vec<Record>, b: Vec<Record>) -> Vec<Record> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.created_at <= y.created_at,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        merged.extend(next);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        (dir, store)
    }

    fn rec(text: &str, kind: RecordKind) -> NewRecord {
        NewRecord::new(text, kind, "session-1", 1, 0.5)
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, store) = temp_store();
        let record = store
            .insert(rec("Use tokio", RecordKind::Decision).with_topics(["async"]))
            .unwrap();

        let fetched = store.get(&record.id).unwrap();
        assert_eq!(fetched, record);
        assert_eq!(fetched.content_hash, content_hash("Use tokio"));
        assert!(fetched.topics.contains("async"));
    }

    #[test]
    fn test_get_missing() {
        let (_dir, store) = temp_store();
        let err = store.get(&RecordId::new()).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn test_dedup_idempotent() {
        let (_dir, store) = temp_store();
        let (first, created) = store
            .insert_or_get(rec("Prefer   explicit errors", RecordKind::Convention))
            .unwrap();
        assert!(created);

        let (second, created) = store
            .insert_or_get(rec("Prefer explicit errors\n", RecordKind::Convention))
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.counts().unwrap()[&RecordKind::Convention], 1);
    }

    #[test]
    fn test_dedup_is_per_kind() {
        let (_dir, store) = temp_store();
        let a = store.insert(rec("same text", RecordKind::Learning)).unwrap();
        let b = store.insert(rec("same text", RecordKind::Decision)).unwrap();
        let c = store
            .insert(rec("same text", RecordKind::UserMessage))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_eq!(store.all_records().unwrap().len(), 3);
    }

    #[test]
    fn test_validation_rejects_before_write() {
        let (dir, store) = temp_store();

        let err = store.insert(rec("   ", RecordKind::Learning)).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let bad_session = NewRecord::new("text", RecordKind::Learning, "bad id", 0, 0.5);
        assert!(store.insert(bad_session).is_err());

        let bad_conf = rec("hello", RecordKind::UserMessage).with_confidence(0.5);
        assert!(store.insert(bad_conf).is_err());

        assert!(!dir.path().join("knowledge.jsonl").exists());
        assert!(!dir.path().join("conversation.jsonl").exists());
    }

    #[test]
    fn test_sections_are_separate_files() {
        let (dir, store) = temp_store();
        store.insert(rec("hi", RecordKind::UserMessage)).unwrap();
        store.insert(rec("decided", RecordKind::Decision)).unwrap();

        let conversation = std::fs::read_to_string(dir.path().join("conversation.jsonl")).unwrap();
        let knowledge = std::fs::read_to_string(dir.path().join("knowledge.jsonl")).unwrap();
        assert_eq!(conversation.lines().count(), 1);
        assert_eq!(knowledge.lines().count(), 1);
        assert!(conversation.contains("\"entry\":\"record\""));
        assert!(knowledge.contains("\"kind\":\"decision\""));
    }

    #[test]
    fn test_list_filters_and_order() {
        let (_dir, store) = temp_store();
        let a = store
            .insert(rec("one", RecordKind::UserMessage).with_topics(["x"]))
            .unwrap();
        let b = store.insert(rec("two", RecordKind::Decision)).unwrap();
        let c = store
            .insert(NewRecord::new("three", RecordKind::UserMessage, "session-2", 1, 0.5))
            .unwrap();

        let all = store.all_records().unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);

        let users = store
            .list(&RecordFilter::new().with_kinds([RecordKind::UserMessage]))
            .unwrap();
        assert_eq!(users.len(), 2);

        let session2 = store
            .list(&RecordFilter::new().with_session("session-2"))
            .unwrap();
        assert_eq!(session2.len(), 1);
        assert_eq!(session2[0].id, c.id);

        let topical = store.list(&RecordFilter::new().with_topics(["x"])).unwrap();
        assert_eq!(topical.len(), 1);
        assert_eq!(topical[0].id, a.id);
    }

    #[test]
    fn test_reopen_sees_records() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
            store.insert(rec("persisted", RecordKind::Learning)).unwrap().id
        };
        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert_eq!(store.get(&id).unwrap().text, "persisted");
    }

    #[test]
    fn test_second_handle_observes_appends() {
        let dir = TempDir::new().unwrap();
        let reader = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        let writer = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();

        assert!(reader.all_records().unwrap().is_empty());
        writer.insert(rec("from elsewhere", RecordKind::Artifact)).unwrap();
        assert_eq!(reader.all_records().unwrap().len(), 1);

        // Dedup sees the other handle's write
        let (_, created) = reader
            .insert_or_get(rec("from elsewhere", RecordKind::Artifact))
            .unwrap();
        assert!(!created);
    }

    #[test]
    fn test_torn_trailing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.jsonl");
        {
            let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
            store.insert(rec("intact", RecordKind::Learning)).unwrap();
        }
        // Simulate a crash halfway through a write
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"entry":"record","id":"#).unwrap();
        drop(file);

        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert_eq!(store.all_records().unwrap().len(), 1);
        assert_eq!(store.skipped_lines(), 0);

        // The next writer terminates the fragment and its own line stays intact
        store.insert(rec("after crash", RecordKind::Learning)).unwrap();

        let reopened = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        let texts: Vec<_> = reopened
            .all_records()
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["intact", "after crash"]);
        assert_eq!(reopened.skipped_lines(), 1);
    }

    #[test]
    fn test_corrupt_complete_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("conversation.jsonl"), "not json\n\n").unwrap();

        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.skipped_lines(), 1);

        store.insert(rec("fine", RecordKind::UserMessage)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_annotate_topics_extends() {
        let (dir, store) = temp_store();
        let record = store
            .insert(rec("Use rustls", RecordKind::Decision).with_topics(["security"]))
            .unwrap();

        let updated = store
            .annotate_topics(&record.id, &["security", "tls"])
            .unwrap();
        assert_eq!(updated.topics.len(), 2);
        assert!(updated.topics.contains("tls"));

        // No-op when nothing new
        let lines_before = std::fs::read_to_string(dir.path().join("knowledge.jsonl"))
            .unwrap()
            .lines()
            .count();
        store.annotate_topics(&record.id, &["tls"]).unwrap();
        let lines_after = std::fs::read_to_string(dir.path().join("knowledge.jsonl"))
            .unwrap()
            .lines()
            .count();
        assert_eq!(lines_before, lines_after);

        // Folded back in on reload
        let reopened = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert!(reopened.get(&record.id).unwrap().topics.contains("tls"));
    }

    #[test]
    fn test_revise_confidence() {
        let (dir, store) = temp_store();
        let learning = store
            .insert(rec("cargo caches builds", RecordKind::Learning).with_confidence(0.5))
            .unwrap();
        let revised = store.revise_confidence(&learning.id, 0.9).unwrap();
        assert_eq!(revised.confidence, Some(0.9));
        assert_eq!(revised.quality, learning.quality);

        let reopened = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert_eq!(reopened.get(&learning.id).unwrap().confidence, Some(0.9));

        let message = store.insert(rec("hello", RecordKind::UserMessage)).unwrap();
        assert!(matches!(
            store.revise_confidence(&message.id, 0.5),
            Err(MemoryError::Validation(
                ValidationError::ConfidenceNotAllowed(_)
            ))
        ));
        assert!(store.revise_confidence(&learning.id, 1.5).is_err());
    }

    #[test]
    fn test_lock_wait_stops_at_deadline() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path(), Duration::from_secs(5))
            .unwrap()
            .with_lock_deadline(Instant::now() + Duration::from_millis(100));
        assert!(store.lock_timeout() <= Duration::from_millis(100));

        let _held = StoreLock::acquire(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        let start = Instant::now();
        let err = store
            .insert(rec("blocked", RecordKind::UserMessage))
            .unwrap_err();

        assert!(matches!(err, MemoryError::LockTimeout(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(store.all_records().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers_dedup() {
        let dir = TempDir::new().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let store = RecordStore::open(&path, Duration::from_secs(10)).unwrap();
                    for i in 0..10 {
                        store
                            .insert(rec(&format!("shared {i}"), RecordKind::Learning))
                            .unwrap();
                        store
                            .insert(rec(&format!("own {worker}-{i}"), RecordKind::Learning))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = RecordStore::open(dir.path(), DEFAULT_LOCK_TIMEOUT).unwrap();
        assert_eq!(store.all_records().unwrap().len(), 10 + 4 * 10);
        assert_eq!(store.skipped_lines(), 0);
    }
}
