//! Persistence of election state.
//!
//! Safety depends on one rule: a vote must be durable before the response
//! that announces it leaves the node. The [`Log`] trait captures the minimum
//! contract for that, plus the freshness comparison used to veto candidates
//! with stale logs.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BallotError, Result};

/// State recovered from a log at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogState {
    pub term: u64,
    pub voted_for: Option<String>,
    pub last_index: u64,
    pub last_info: Vec<u8>,
}

/// Durable store for `(term, voted_for)` and the log-freshness comparison.
pub trait Log: Send + 'static {
    /// Returns the persisted state.
    ///
    /// A fresh store reports [`BallotError::LogNoState`]; a store whose
    /// integrity check fails reports [`BallotError::LogCorrupt`].
    fn latest_entry(&mut self) -> Result<LogState>;

    /// Persists `(term, voted_for)`.
    ///
    /// `index` and `entry` are advisory for history-keeping implementations;
    /// stores without history ignore them.
    fn append_entry(
        &mut self,
        term: u64,
        voted_for: Option<&str>,
        index: u64,
        entry: &[u8],
    ) -> Result<()>;

    /// Whether a candidate's log is at least as fresh as the local log.
    fn log_up_to_date(
        &self,
        index: u64,
        info: &[u8],
        candidate_index: u64,
        candidate_info: &[u8],
    ) -> bool;

    /// Releases resources held by the store. Idempotent.
    fn close(&mut self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    current_term: u64,
    voted_for: Option<String>,
}

/// Framed on-disk record: `digest` is the SHA-256 of `payload`, recomputed on
/// every read to detect torn or tampered writes.
#[derive(Serialize, Deserialize)]
struct Envelope {
    digest: Vec<u8>,
    payload: Vec<u8>,
}

/// Single-slot file-backed log for election-only deployments.
///
/// Persists only `(term, voted_for)` as a JSON envelope. It carries no
/// history, so [`Log::log_up_to_date`] never vetoes a candidate. The backing
/// file is created with mode 0660 and removed on [`Log::close`].
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        // Group-readable but not world-readable, independent of the umask.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o660))?;
        }
        Ok(())
    }
}

impl Log for FileLog {
    fn latest_entry(&mut self) -> Result<LogState> {
        let buf = match std::fs::read(&self.path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BallotError::LogNoState)
            }
            Err(e) => return Err(e.into()),
        };
        if buf.is_empty() {
            return Err(BallotError::LogNoState);
        }

        let envelope: Envelope =
            serde_json::from_slice(&buf).map_err(|_| BallotError::LogCorrupt)?;

        let digest = Sha256::digest(&envelope.payload);
        if digest.as_slice() != envelope.digest.as_slice() {
            return Err(BallotError::LogCorrupt);
        }

        let persisted: PersistedState =
            serde_json::from_slice(&envelope.payload).map_err(|_| BallotError::LogCorrupt)?;

        Ok(LogState {
            term: persisted.current_term,
            voted_for: persisted.voted_for,
            last_index: 0,
            last_info: Vec::new(),
        })
    }

    fn append_entry(
        &mut self,
        term: u64,
        voted_for: Option<&str>,
        _index: u64,
        _entry: &[u8],
    ) -> Result<()> {
        let payload = serde_json::to_vec(&PersistedState {
            current_term: term,
            voted_for: voted_for.map(str::to_string),
        })?;
        let envelope = Envelope {
            digest: Sha256::digest(&payload).to_vec(),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.write_atomic(&bytes)?;
        Ok(())
    }

    fn log_up_to_date(
        &self,
        _index: u64,
        _info: &[u8],
        _candidate_index: u64,
        _candidate_info: &[u8],
    ) -> bool {
        // No history to compare against.
        true
    }

    fn close(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory log that carries a synthetic history position.
///
/// Useful for tests and for seeding a cluster where nodes start with known
/// log positions. Freshness compares indexes only: a candidate is acceptable
/// when its last index is at least the local one. The opaque info bytes are
/// stored and exchanged but take no part in the comparison.
#[derive(Debug, Default)]
pub struct MemoryLog {
    term: u64,
    voted_for: Option<String>,
    last_index: u64,
    last_info: Vec<u8>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(last_index: u64, last_info: impl Into<Vec<u8>>) -> Self {
        Self {
            term: 0,
            voted_for: None,
            last_index,
            last_info: last_info.into(),
        }
    }
}

impl Log for MemoryLog {
    fn latest_entry(&mut self) -> Result<LogState> {
        Ok(LogState {
            term: self.term,
            voted_for: self.voted_for.clone(),
            last_index: self.last_index,
            last_info: self.last_info.clone(),
        })
    }

    fn append_entry(
        &mut self,
        term: u64,
        voted_for: Option<&str>,
        _index: u64,
        _entry: &[u8],
    ) -> Result<()> {
        self.term = term;
        self.voted_for = voted_for.map(str::to_string);
        Ok(())
    }

    fn log_up_to_date(
        &self,
        index: u64,
        _info: &[u8],
        candidate_index: u64,
        _candidate_info: &[u8],
    ) -> bool {
        candidate_index >= index
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_file_log_reports_no_state() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::new(dir.path().join("ballot.log"));

        let err = log.latest_entry().unwrap_err();
        assert!(matches!(err, BallotError::LogNoState));
    }

    #[test]
    fn test_file_log_round_trips_term_and_vote() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ballot.log");

        let mut log = FileLog::new(&path);
        log.append_entry(7, Some("node-b"), 0, &[]).unwrap();

        // Reopen as a separate instance, as after a process restart.
        let mut reopened = FileLog::new(&path);
        let state = reopened.latest_entry().unwrap();
        assert_eq!(state.term, 7);
        assert_eq!(state.voted_for, Some("node-b".to_string()));
        assert_eq!(state.last_index, 0);
    }

    #[test]
    fn test_file_log_persists_empty_vote() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::new(dir.path().join("ballot.log"));

        log.append_entry(3, None, 0, &[]).unwrap();

        let state = log.latest_entry().unwrap();
        assert_eq!(state.term, 3);
        assert_eq!(state.voted_for, None);
    }

    #[test]
    fn test_file_log_overwrites_previous_entry() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::new(dir.path().join("ballot.log"));

        log.append_entry(1, Some("x"), 0, &[]).unwrap();
        log.append_entry(2, Some("y"), 0, &[]).unwrap();

        let state = log.latest_entry().unwrap();
        assert_eq!(state.term, 2);
        assert_eq!(state.voted_for, Some("y".to_string()));
    }

    #[test]
    fn test_file_log_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ballot.log");

        let mut log = FileLog::new(&path);
        log.append_entry(5, Some("node-b"), 0, &[]).unwrap();

        // Flip a payload byte behind the log's back.
        let mut bytes = std::fs::read(&path).unwrap();
        let victim = bytes
            .iter()
            .rposition(|&b| b.is_ascii_digit())
            .expect("payload contains digits");
        bytes[victim] = if bytes[victim] == b'5' { b'6' } else { b'5' };
        std::fs::write(&path, &bytes).unwrap();

        let err = log.latest_entry().unwrap_err();
        assert!(matches!(err, BallotError::LogCorrupt));
    }

    #[test]
    fn test_file_log_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ballot.log");
        std::fs::write(&path, b"not an envelope").unwrap();

        let mut log = FileLog::new(&path);
        let err = log.latest_entry().unwrap_err();
        assert!(matches!(err, BallotError::LogCorrupt));
    }

    #[test]
    fn test_file_log_close_removes_file_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ballot.log");

        let mut log = FileLog::new(&path);
        log.append_entry(1, None, 0, &[]).unwrap();
        assert!(path.exists());

        log.close().unwrap();
        assert!(!path.exists());
        log.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_log_mode_is_0660() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("ballot.log");
        let mut log = FileLog::new(&path);
        log.append_entry(1, None, 0, &[]).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
    }

    #[test]
    fn test_file_log_always_considers_candidates_fresh() {
        let log = FileLog::new("/nonexistent");
        assert!(log.log_up_to_date(99, b"zzz", 0, b""));
    }

    #[test]
    fn test_memory_log_compares_indexes_only() {
        let log = MemoryLog::with_history(10, b"9".to_vec());
        assert!(log.log_up_to_date(10, b"9", 10, b"1"));
        assert!(log.log_up_to_date(10, b"9", 11, b""));
        assert!(!log.log_up_to_date(10, b"9", 9, b"99"));
    }

    #[test]
    fn test_memory_log_keeps_history_position_across_appends() {
        let mut log = MemoryLog::with_history(42, b"info".to_vec());
        log.append_entry(3, Some("a"), 0, &[]).unwrap();

        let state = log.latest_entry().unwrap();
        assert_eq!(state.term, 3);
        assert_eq!(state.voted_for, Some("a".to_string()));
        assert_eq!(state.last_index, 42);
        assert_eq!(state.last_info, b"info".to_vec());
    }
}
