//! Pure election transition rules.
//!
//! Each handler mutates an [`ElectionState`] and reports the side effects the
//! event loop must carry out (persistence, timer re-arm, outbound sends).
//! Keeping the rules free of I/O makes every interleaving testable without a
//! running cluster.

use crate::message::{Heartbeat, VoteRequest, VoteResponse};
use crate::state::{ElectionState, State};

/// Effects of processing a [`VoteRequest`].
#[derive(Debug)]
pub struct VoteRequestOutcome {
    pub response: VoteResponse,
    /// `(term, vote)` changed and must be durable before the response leaves.
    pub persist: bool,
    pub reset_election_timer: bool,
}

/// Effects of processing a [`VoteResponse`].
#[derive(Debug)]
pub struct VoteResponseOutcome {
    pub persist: bool,
    pub became_leader: bool,
}

/// Effects of processing a [`Heartbeat`].
#[derive(Debug)]
pub struct HeartbeatOutcome {
    pub persist: bool,
    pub reset_election_timer: bool,
}

/// Decide whether to grant a vote.
///
/// A vote is granted iff the request's term is current or newer, this node
/// has not voted for anyone else in that term, and the candidate's log is at
/// least as fresh as ours (`candidate_log_fresh`, precomputed by the caller
/// from its [`Log`](crate::log::Log) implementation).
pub fn handle_vote_request(
    state: &mut ElectionState,
    req: &VoteRequest,
    candidate_log_fresh: bool,
) -> VoteRequestOutcome {
    let mut persist = false;

    if req.term > state.term {
        state.step_down(req.term);
        persist = true;
    }

    let granted = if req.term < state.term {
        false
    } else if state
        .vote
        .as_deref()
        .is_some_and(|v| v != req.candidate_id)
    {
        false
    } else if !candidate_log_fresh {
        false
    } else {
        if state.vote.is_none() {
            persist = true;
        }
        state.vote = Some(req.candidate_id.clone());
        true
    };

    tracing::debug!(
        id = %state.id,
        candidate = %req.candidate_id,
        term = req.term,
        granted,
        "vote request"
    );

    VoteRequestOutcome {
        response: VoteResponse {
            cluster: req.cluster.clone(),
            term: state.term,
            voter_id: state.id.clone(),
            granted,
        },
        persist,
        reset_election_timer: granted,
    }
}

/// Tally a vote response while campaigning.
///
/// Responses from stale terms, duplicate voters, or after the campaign ended
/// are ignored. Reaching quorum promotes the node to leader.
pub fn handle_vote_response(
    state: &mut ElectionState,
    resp: &VoteResponse,
    quorum: usize,
) -> VoteResponseOutcome {
    if resp.term > state.term {
        state.step_down(resp.term);
        return VoteResponseOutcome {
            persist: true,
            became_leader: false,
        };
    }

    if state.state != State::Candidate || resp.term != state.term || !resp.granted {
        return VoteResponseOutcome {
            persist: false,
            became_leader: false,
        };
    }

    let tally = state.record_vote(&resp.voter_id);
    tracing::debug!(id = %state.id, voter = %resp.voter_id, term = resp.term, tally, "vote received");

    if tally >= quorum {
        state.become_leader();
        return VoteResponseOutcome {
            persist: false,
            became_leader: true,
        };
    }

    VoteResponseOutcome {
        persist: false,
        became_leader: false,
    }
}

/// Accept or ignore a leader heartbeat.
///
/// A current-term or newer heartbeat demotes candidates, records the sender
/// as leader, and extends the follower grace period. Receiving the same
/// heartbeat twice is indistinguishable from receiving it once.
pub fn handle_heartbeat(state: &mut ElectionState, hb: &Heartbeat) -> HeartbeatOutcome {
    if hb.term < state.term {
        tracing::trace!(id = %state.id, term = hb.term, local_term = state.term, "stale heartbeat dropped");
        return HeartbeatOutcome {
            persist: false,
            reset_election_timer: false,
        };
    }

    let mut persist = false;
    if hb.term > state.term {
        state.step_down(hb.term);
        persist = true;
    }

    match state.state {
        State::Follower => {
            state.leader = Some(hb.leader_id.clone());
            HeartbeatOutcome {
                persist,
                reset_election_timer: true,
            }
        }
        State::Candidate => {
            // An established leader in our term ends the campaign.
            state.step_down(hb.term);
            state.leader = Some(hb.leader_id.clone());
            HeartbeatOutcome {
                persist,
                reset_election_timer: true,
            }
        }
        State::Leader => {
            if hb.leader_id != state.id {
                // Two leaders in one term cannot happen when votes are
                // persisted correctly; keep our role and surface the anomaly.
                tracing::warn!(
                    id = %state.id,
                    other = %hb.leader_id,
                    term = hb.term,
                    "heartbeat from another leader in current term"
                );
            }
            HeartbeatOutcome {
                persist,
                reset_election_timer: false,
            }
        }
        State::Closed => HeartbeatOutcome {
            persist: false,
            reset_election_timer: false,
        },
    }
}
