use serde::{Deserialize, Serialize};

/// Solicitation for a vote, broadcast by a candidate to every peer.
///
/// Carries the candidate's log position so voters can refuse candidates whose
/// log is behind their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub cluster: String,
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_info: Vec<u8>,
}

/// A voter's answer, sent back to the requesting candidate only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub cluster: String,
    pub term: u64,
    pub voter_id: String,
    pub granted: bool,
}

/// Periodic leader liveness broadcast; suppresses follower election timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub cluster: String,
    pub term: u64,
    pub leader_id: String,
}
