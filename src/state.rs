use std::collections::HashSet;

/// Sentinel returned by leader accessors while no leader is known.
pub const NO_LEADER: &str = "";

/// Election role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Passive state: listens for heartbeats, votes when asked.
    Follower,
    /// Transitional state: soliciting votes to become leader.
    Candidate,
    /// Active state: emits periodic heartbeats.
    Leader,
    /// Terminal state after shutdown; no further events are processed.
    Closed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Follower => write!(f, "Follower"),
            State::Candidate => write!(f, "Candidate"),
            State::Leader => write!(f, "Leader"),
            State::Closed => write!(f, "Closed"),
        }
    }
}

/// Mutable election state of a single node.
///
/// Owned exclusively by the node's event-loop task; every transition runs
/// there, so no field needs its own lock.
///
/// Invariants:
/// - `term` never decreases.
/// - `vote` is cleared whenever `term` advances; at most one vote per term.
/// - `votes` is meaningful only while `state == Candidate`.
#[derive(Debug, Clone)]
pub struct ElectionState {
    pub id: String,
    pub state: State,
    pub term: u64,
    pub vote: Option<String>,
    pub leader: Option<String>,
    pub votes: HashSet<String>,
    pub last_index: u64,
    pub last_info: Vec<u8>,
}

impl ElectionState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: State::Follower,
            term: 0,
            vote: None,
            leader: None,
            votes: HashSet::new(),
            last_index: 0,
            last_info: Vec::new(),
        }
    }

    /// Adopt `term` and demote to follower.
    ///
    /// The vote is cleared only when the term strictly advances: a candidate
    /// demoted by an equal-term heartbeat already spent its vote on itself in
    /// that term and must not regain it.
    pub fn step_down(&mut self, term: u64) {
        if term > self.term {
            self.term = term;
            self.vote = None;
        }
        self.state = State::Follower;
        self.votes.clear();
    }

    /// Enter a new election: bump the term, vote for self, forget the leader.
    pub fn become_candidate(&mut self) {
        self.state = State::Candidate;
        self.term += 1;
        self.vote = Some(self.id.clone());
        self.votes.clear();
        self.votes.insert(self.id.clone());
        self.leader = None;
    }

    /// Assume leadership of the current term.
    pub fn become_leader(&mut self) {
        self.state = State::Leader;
        self.leader = Some(self.id.clone());
        self.votes.clear();
    }

    /// Record a supporting vote; returns the updated tally.
    pub fn record_vote(&mut self, voter: &str) -> usize {
        self.votes.insert(voter.to_string());
        self.votes.len()
    }
}
