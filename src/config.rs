use crate::error::{BallotError, Result};

/// Default lower bound for the randomized election timeout, in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 750;

/// Default upper bound for the randomized election timeout, in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 1500;

/// Default heartbeat period. Must stay well under half the minimum election
/// timeout so followers never time out under a healthy leader.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = DEFAULT_ELECTION_TIMEOUT_MIN_MS / 5;

/// Identity and timing parameters shared by every member of a cluster.
///
/// The cluster size is fixed at construction; quorum is derived from it.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub size: usize,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            election_timeout_min_ms: DEFAULT_ELECTION_TIMEOUT_MIN_MS,
            election_timeout_max_ms: DEFAULT_ELECTION_TIMEOUT_MAX_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }

    pub fn with_election_timeouts(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.election_timeout_min_ms = min_ms;
        self.election_timeout_max_ms = max_ms;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Minimum number of votes required to win an election.
    pub fn quorum(&self) -> usize {
        self.size / 2 + 1
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BallotError::ClusterName);
        }
        if self.size < 1 {
            return Err(BallotError::ClusterSize);
        }
        Ok(())
    }
}
