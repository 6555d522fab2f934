//! Append-only event journal plus a lagging state snapshot, one directory
//! per session: `state.json` (latest snapshot) and `events.ndjson`
//! (every event ever appended). The snapshot is refreshed explicitly by
//! the caller and implicitly on `run_complete`; between those points the
//! event log can run ahead of the snapshot by the events of one in-flight
//! round. Loading a session therefore returns the snapshot plus whatever
//! trailing events follow it — the crash window a caller replays to catch
//! the in-memory state back up.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use push_types::{Event, EventKind, EventSeq, RunId, SessionId, SessionIdError, SessionState};
use push_utils::atomic_write;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed session id: {0}")]
    SessionId(#[from] SessionIdError),
    #[error("corrupt state.json for session {0}: {1}")]
    CorruptState(String, serde_json::Error),
}

/// Root directory holding one subdirectory per session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

/// Base-36 digits used for both the epoch and the random suffix of a
/// session id.
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base36 alphabet is ASCII")
}

fn random_base36_suffix(len: usize) -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut out = String::with_capacity(len);
    while out.len() < len {
        let seed = RandomState::new().build_hasher().finish();
        out.push_str(&to_base36(seed));
    }
    out.truncate(len);
    out
}

impl SessionStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn state_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("state.json")
    }

    fn events_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("events.ndjson")
    }

    fn lock_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("events.ndjson.lock")
    }

    /// `sess_<base36 epoch seconds>_<6 random base36 chars>`.
    pub fn make_session_id(&self) -> Result<SessionId, SessionStoreError> {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Ok(SessionId::new(&to_base36(epoch), &random_base36_suffix(6))?)
    }

    /// Create the on-disk layout for a brand new session and write its
    /// first snapshot and `session_started` event.
    pub fn create(&self, state: &SessionState) -> Result<(), SessionStoreError> {
        fs::create_dir_all(self.session_dir(&state.session_id))?;
        self.save_session_state(state)?;
        Ok(())
    }

    /// `None` if the session directory (or its `state.json`) doesn't exist.
    pub fn load_session_state(&self, id: &SessionId) -> Result<Option<SessionState>, SessionStoreError> {
        let path = self.state_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|err| SessionStoreError::CorruptState(id.as_str().to_string(), err))?;
        Ok(Some(state))
    }

    /// Atomic rename into place.
    pub fn save_session_state(&self, state: &SessionState) -> Result<(), SessionStoreError> {
        fs::create_dir_all(self.session_dir(&state.session_id))?;
        let bytes = serde_json::to_vec_pretty(state).expect("SessionState serializes infallibly");
        atomic_write(self.state_path(&state.session_id), &bytes)?;
        Ok(())
    }

    /// `[]` if the session (or its event log) doesn't exist yet.
    pub fn load_session_events(&self, id: &SessionId) -> Result<Vec<Event>, SessionStoreError> {
        let path = self.events_path(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let reader = io::BufReader::new(file);
        let lines: Vec<String> = reader.lines().collect::<io::Result<_>>()?;
        let mut events = Vec::with_capacity(lines.len());
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // A partial line at EOF (truncated mid-write by a crash) is
            // dropped rather than treated as corruption.
            if let Ok(event) = serde_json::from_str(line) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Newest-first by `updatedAt`.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>, SessionStoreError> {
        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(id) = SessionId::parse(name) else {
                continue;
            };
            match self.load_session_state(&id) {
                Ok(Some(state)) => entries.push((state.updated_at, id)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(session = id.as_str(), %err, "skipping session with unreadable state.json");
                }
            }
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    /// Assigns `seq = state.event_seq + 1`, writes one NDJSON line under
    /// an advisory lock, and (only for `run_complete`) also saves the
    /// snapshot. The caller is responsible for saving the snapshot at
    /// other points it wants the crash window narrowed.
    pub fn append_session_event(
        &self,
        state: &mut SessionState,
        kind: EventKind,
        run_id: Option<RunId>,
    ) -> Result<Event, SessionStoreError> {
        let _lock = AdvisoryLock::acquire(self.lock_path(&state.session_id))?;

        let seq = state.event_seq.next();
        let event = Event { seq, timestamp: SystemTime::now(), run_id, kind };

        fs::create_dir_all(self.session_dir(&state.session_id))?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.events_path(&state.session_id))?;
        let line = serde_json::to_string(&event).expect("Event serializes infallibly");
        writeln!(file, "{line}")?;
        file.sync_all()?;

        state.event_seq = seq;
        state.updated_at = event.timestamp;

        if matches!(event.kind, EventKind::RunComplete { .. }) {
            drop(_lock);
            self.save_session_state(state)?;
        }

        Ok(event)
    }

    /// Load a session's snapshot plus whatever events follow it (the
    /// crash window), in one call.
    pub fn resume(&self, id: &SessionId) -> Result<Option<(SessionState, Vec<Event>)>, SessionStoreError> {
        let Some(state) = self.load_session_state(id)? else { return Ok(None) };
        let all_events = self.load_session_events(id)?;
        let tail = all_events
            .into_iter()
            .filter(|event| event.seq > state.event_seq)
            .collect();
        Ok(Some((state, tail)))
    }
}

/// A lock file created with `create_new`, removed on drop. Single-writer
/// is assumed; this only guards against this process's own concurrent
/// callers racing the event log.
struct AdvisoryLock {
    path: PathBuf,
}

impl AdvisoryLock {
    fn acquire(path: PathBuf) -> Result<Self, SessionStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Best-effort: a stale lock from a crashed process is reclaimed
        // rather than wedging every future append.
        if path.exists() {
            tracing::debug!(path = %path.display(), "reclaiming stale session lock file");
            let _ = fs::remove_file(&path);
        }
        File::create(&path)?;
        Ok(Self { path })
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_types::{ModelName, Provider, RunOutcomeKind};

    fn fresh_state(store: &SessionStore) -> SessionState {
        let id = store.make_session_id().unwrap();
        let now = SystemTime::now();
        SessionState {
            session_id: id,
            created_at: now,
            updated_at: now,
            provider: Provider::Claude,
            model: Provider::Claude.default_model(),
            cwd: "/workspace".into(),
            rounds: 0,
            event_seq: EventSeq::new(0),
            messages: Vec::new(),
            title: None,
        }
    }

    #[test]
    fn make_session_id_produces_parseable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = store.make_session_id().unwrap();
        assert!(SessionId::parse(id.as_str().to_string()).is_ok());
    }

    #[test]
    fn create_then_load_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let state = fresh_state(&store);
        store.create(&state).unwrap();

        let loaded = store.load_session_state(&state.session_id).unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
    }

    #[test]
    fn load_session_state_returns_none_for_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let missing = SessionId::parse("sess_abc123_def456").unwrap();
        assert!(store.load_session_state(&missing).unwrap().is_none());
    }

    #[test]
    fn load_session_events_returns_empty_for_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let missing = SessionId::parse("sess_abc123_def456").unwrap();
        assert_eq!(store.load_session_events(&missing).unwrap().len(), 0);
    }

    #[test]
    fn append_session_event_assigns_strictly_increasing_seq() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut state = fresh_state(&store);
        store.create(&state).unwrap();

        let e1 = store
            .append_session_event(&mut state, EventKind::UserMessage { message_id: push_types::MessageId::new("m1") }, None)
            .unwrap();
        let e2 = store
            .append_session_event(&mut state, EventKind::AssistantDone { message_id: push_types::MessageId::new("m2") }, None)
            .unwrap();

        assert_eq!(e1.seq.value(), 1);
        assert_eq!(e2.seq.value(), 2);
        assert_eq!(state.event_seq.value(), 2);
    }

    #[test]
    fn run_complete_refreshes_snapshot_but_other_events_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut state = fresh_state(&store);
        store.create(&state).unwrap();

        store
            .append_session_event(&mut state, EventKind::UserMessage { message_id: push_types::MessageId::new("m1") }, None)
            .unwrap();
        let on_disk = store.load_session_state(&state.session_id).unwrap().unwrap();
        assert_eq!(on_disk.event_seq.value(), 0);

        store
            .append_session_event(
                &mut state,
                EventKind::RunComplete { outcome: RunOutcomeKind::Success },
                Some(RunId::new("run_1")),
            )
            .unwrap();
        let on_disk = store.load_session_state(&state.session_id).unwrap().unwrap();
        assert_eq!(on_disk.event_seq.value(), 2);
    }

    #[test]
    fn resume_returns_trailing_events_past_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut state = fresh_state(&store);
        store.create(&state).unwrap();

        store
            .append_session_event(&mut state, EventKind::UserMessage { message_id: push_types::MessageId::new("m1") }, None)
            .unwrap();
        store
            .append_session_event(&mut state, EventKind::AssistantDone { message_id: push_types::MessageId::new("m2") }, None)
            .unwrap();

        let (resumed_state, tail) = store.resume(&state.session_id).unwrap().unwrap();
        assert_eq!(resumed_state.event_seq.value(), 0);
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn list_sessions_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let mut older = fresh_state(&store);
        older.updated_at = UNIX_EPOCH + std::time::Duration::from_secs(100);
        store.create(&older).unwrap();

        let mut newer = fresh_state(&store);
        newer.updated_at = UNIX_EPOCH + std::time::Duration::from_secs(200);
        store.create(&newer).unwrap();

        let ids = store.list_sessions().unwrap();
        assert_eq!(ids, vec![newer.session_id, older.session_id]);
    }

    #[test]
    fn load_session_events_ignores_truncated_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut state = fresh_state(&store);
        store.create(&state).unwrap();
        store
            .append_session_event(&mut state, EventKind::UserMessage { message_id: push_types::MessageId::new("m1") }, None)
            .unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(store.events_path(&state.session_id))
            .unwrap();
        write!(file, "{{\"seq\":2,\"trunc").unwrap();

        let events = store.load_session_events(&state.session_id).unwrap();
        assert_eq!(events.len(), 1);
    }
}
