//! The node: construction, observable surface, and the event loop that owns
//! all election state.
//!
//! Exactly one tokio task runs per node. Every transition happens inside that
//! task, so per-event steps are atomic without locking the election state;
//! outside callers only ever read a published snapshot.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClusterConfig;
use crate::error::{BallotError, Result};
use crate::handler::Handler;
use crate::log::{FileLog, Log};
use crate::message::{Heartbeat, VoteRequest, VoteResponse};
use crate::rpc;
use crate::state::{ElectionState, State, NO_LEADER};
use crate::timer::{heartbeat_interval, random_election_timeout};
use crate::transport::{MessageSink, Transport};

const INBOUND_BUFFER: usize = 256;

/// Point-in-time view published by the event loop for outside readers.
#[derive(Debug, Clone)]
struct Snapshot {
    state: State,
    term: u64,
    leader: Option<String>,
    last_index: u64,
}

/// Handle to a running cluster member.
///
/// Cheap accessors read the latest published snapshot; [`Node::close`] tears
/// the member down and waits for its event loop to finish.
#[derive(Debug)]
pub struct Node {
    id: String,
    cluster: ClusterConfig,
    snapshot: Arc<RwLock<Snapshot>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Starts a node with the default file-backed log at `log_path`.
    pub async fn new(
        cluster: ClusterConfig,
        handler: Arc<dyn Handler>,
        transport: impl Transport,
        log_path: impl Into<PathBuf>,
    ) -> Result<Node> {
        Node::builder(cluster)
            .handler(handler)
            .transport(transport)
            .log_path(log_path)
            .start()
            .await
    }

    /// Starts a node with a caller-supplied log implementation.
    pub async fn with_log(
        cluster: ClusterConfig,
        handler: Arc<dyn Handler>,
        transport: impl Transport,
        log: impl Log,
    ) -> Result<Node> {
        Node::builder(cluster)
            .handler(handler)
            .transport(transport)
            .log(log)
            .start()
            .await
    }

    pub fn builder(cluster: ClusterConfig) -> NodeBuilder {
        NodeBuilder {
            cluster,
            id: None,
            handler: None,
            transport: None,
            log: None,
            log_path: None,
        }
    }

    /// Unique identity of this node within its cluster.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> State {
        self.snapshot.read().unwrap().state
    }

    pub fn current_term(&self) -> u64 {
        self.snapshot.read().unwrap().term
    }

    /// Known leader for the current term, or [`NO_LEADER`] if none is known.
    pub fn leader(&self) -> String {
        self.snapshot
            .read()
            .unwrap()
            .leader
            .clone()
            .unwrap_or_else(|| NO_LEADER.to_string())
    }

    pub fn last_index(&self) -> u64 {
        self.snapshot.read().unwrap().last_index
    }

    pub fn cluster_info(&self) -> ClusterConfig {
        self.cluster.clone()
    }

    /// Shuts the node down: signals the event loop, waits for it to exit,
    /// and leaves the node in the terminal [`State::Closed`].
    ///
    /// Idempotent; once it returns, no task of this node is running and the
    /// transport and log have been closed.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        // Hold the lock across the join so a concurrent close cannot return
        // while the event loop is still shutting down.
        let mut task = self.task.lock().await;
        if let Some(task) = task.take() {
            if let Err(e) = task.await {
                tracing::error!(id = %self.id, error = %e, "event loop task failed");
            }
        }
        Ok(())
    }
}

/// Assembles a [`Node`], validating each required input.
pub struct NodeBuilder {
    cluster: ClusterConfig,
    id: Option<String>,
    handler: Option<Arc<dyn Handler>>,
    transport: Option<Box<dyn Transport>>,
    log: Option<Box<dyn Log>>,
    log_path: Option<PathBuf>,
}

impl NodeBuilder {
    /// Overrides the generated UUID identity.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Uses a caller-supplied log; takes precedence over [`NodeBuilder::log_path`].
    pub fn log(mut self, log: impl Log) -> Self {
        self.log = Some(Box::new(log));
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Validates inputs, restores persisted state, binds the transport, and
    /// spawns the event loop.
    pub async fn start(self) -> Result<Node> {
        self.cluster.validate()?;
        let handler = self.handler.ok_or(BallotError::HandlerRequired)?;
        let mut transport = self.transport.ok_or(BallotError::TransportRequired)?;
        let mut log: Box<dyn Log> = match (self.log, self.log_path) {
            (Some(log), _) => log,
            (None, Some(path)) if !path.as_os_str().is_empty() => Box::new(FileLog::new(path)),
            _ => return Err(BallotError::LogRequired),
        };

        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = ElectionState::new(id.clone());
        match log.latest_entry() {
            Ok(persisted) => {
                state.term = persisted.term;
                state.vote = persisted.voted_for;
                state.last_index = persisted.last_index;
                state.last_info = persisted.last_info;
            }
            // A fresh store simply means a first boot.
            Err(BallotError::LogNoState) => {}
            Err(e) => return Err(e),
        }

        let (req_tx, req_rx) = mpsc::channel(INBOUND_BUFFER);
        let (resp_tx, resp_rx) = mpsc::channel(INBOUND_BUFFER);
        let (hb_tx, hb_rx) = mpsc::channel(INBOUND_BUFFER);
        if let Err(e) = transport.init(MessageSink {
            cluster: self.cluster.name.clone(),
            node_id: id.clone(),
            vote_requests: req_tx,
            vote_responses: resp_tx,
            heartbeats: hb_tx,
        }) {
            // The log was already opened; release it before aborting.
            if let Err(close_err) = log.close() {
                tracing::warn!(
                    id = %id,
                    error = %close_err,
                    "error closing log after transport init failure"
                );
            }
            return Err(e);
        }

        let snapshot = Arc::new(RwLock::new(Snapshot {
            state: state.state,
            term: state.term,
            leader: state.leader.clone(),
            last_index: state.last_index,
        }));
        let cancel = CancellationToken::new();

        tracing::info!(
            id = %id,
            cluster = %self.cluster.name,
            size = self.cluster.size,
            term = state.term,
            "node starting"
        );

        let worker = EventLoop {
            cluster: self.cluster.clone(),
            state,
            log,
            transport,
            handler,
            snapshot: snapshot.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(req_rx, resp_rx, hb_rx));

        Ok(Node {
            id,
            cluster: self.cluster,
            snapshot,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }
}

/// Timer and leadership consequences of one processed event.
#[derive(Debug, Default)]
struct Step {
    reset_election: bool,
    became_leader: bool,
}

struct EventLoop {
    cluster: ClusterConfig,
    state: ElectionState,
    log: Box<dyn Log>,
    transport: Box<dyn Transport>,
    handler: Arc<dyn Handler>,
    snapshot: Arc<RwLock<Snapshot>>,
    cancel: CancellationToken,
}

impl EventLoop {
    async fn run(
        mut self,
        mut vote_requests: mpsc::Receiver<VoteRequest>,
        mut vote_responses: mpsc::Receiver<VoteResponse>,
        mut heartbeats: mpsc::Receiver<Heartbeat>,
    ) {
        let cancel = self.cancel.clone();
        let mut election_deadline = self.next_election_deadline();
        let mut heartbeat_deadline = self.next_heartbeat_deadline();

        loop {
            let is_leader = self.state.state == State::Leader;

            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = time::sleep_until(election_deadline), if !is_leader => {
                    let step = self.on_election_timeout();
                    election_deadline = self.next_election_deadline();
                    if step.became_leader {
                        heartbeat_deadline = self.next_heartbeat_deadline();
                    }
                }

                _ = time::sleep_until(heartbeat_deadline), if is_leader => {
                    self.broadcast_heartbeat();
                    heartbeat_deadline = self.next_heartbeat_deadline();
                }

                Some(req) = vote_requests.recv() => {
                    if self.accepts(&req.cluster) {
                        let step = self.on_vote_request(req);
                        if step.reset_election {
                            election_deadline = self.next_election_deadline();
                        }
                    }
                }

                Some(resp) = vote_responses.recv() => {
                    if self.accepts(&resp.cluster) {
                        let step = self.on_vote_response(resp);
                        if step.became_leader {
                            heartbeat_deadline = self.next_heartbeat_deadline();
                        }
                        if step.reset_election {
                            election_deadline = self.next_election_deadline();
                        }
                    }
                }

                Some(hb) = heartbeats.recv() => {
                    if self.accepts(&hb.cluster) {
                        let step = self.on_heartbeat(hb);
                        if step.reset_election {
                            election_deadline = self.next_election_deadline();
                        }
                    }
                }
            }
        }

        self.shutdown();
    }

    fn next_election_deadline(&self) -> Instant {
        Instant::now()
            + random_election_timeout(
                self.cluster.election_timeout_min_ms,
                self.cluster.election_timeout_max_ms,
            )
    }

    fn next_heartbeat_deadline(&self) -> Instant {
        Instant::now() + heartbeat_interval(self.cluster.heartbeat_interval_ms)
    }

    fn accepts(&self, cluster: &str) -> bool {
        if cluster == self.cluster.name {
            true
        } else {
            tracing::trace!(
                id = %self.state.id,
                cluster,
                local = %self.cluster.name,
                "message from foreign cluster dropped"
            );
            false
        }
    }

    fn on_election_timeout(&mut self) -> Step {
        let before = self.state.state;
        let saved = self.state.clone();
        self.state.become_candidate();
        if !self.persist(saved) {
            self.commit(before);
            return Step::default();
        }

        tracing::info!(
            id = %self.state.id,
            term = self.state.term,
            "election timeout, soliciting votes"
        );

        let mut became_leader = false;
        if self.cluster.size == 1 {
            // A cluster of one is its own quorum.
            self.state.become_leader();
            self.broadcast_heartbeat();
            became_leader = true;
        } else {
            let req = VoteRequest {
                cluster: self.cluster.name.clone(),
                term: self.state.term,
                candidate_id: self.state.id.clone(),
                last_log_index: self.state.last_index,
                last_log_info: self.state.last_info.clone(),
            };
            if let Err(e) = self.transport.send_vote_request(req) {
                tracing::warn!(id = %self.state.id, error = %e, "vote request broadcast failed");
            }
        }

        self.commit(before);
        Step {
            reset_election: true,
            became_leader,
        }
    }

    fn on_vote_request(&mut self, req: VoteRequest) -> Step {
        let before = self.state.state;
        let candidate_log_fresh = self.log.log_up_to_date(
            self.state.last_index,
            &self.state.last_info,
            req.last_log_index,
            &req.last_log_info,
        );
        let saved = self.state.clone();
        let outcome = rpc::handle_vote_request(&mut self.state, &req, candidate_log_fresh);
        if outcome.persist && !self.persist(saved) {
            self.commit(before);
            return Step::default();
        }

        if let Err(e) = self
            .transport
            .send_vote_response(&req.candidate_id, outcome.response)
        {
            tracing::warn!(id = %self.state.id, error = %e, "vote response send failed");
        }

        self.commit(before);
        Step {
            reset_election: outcome.reset_election_timer || self.demoted(before),
            became_leader: false,
        }
    }

    fn on_vote_response(&mut self, resp: VoteResponse) -> Step {
        let before = self.state.state;
        let saved = self.state.clone();
        let outcome = rpc::handle_vote_response(&mut self.state, &resp, self.cluster.quorum());
        if outcome.persist && !self.persist(saved) {
            self.commit(before);
            return Step::default();
        }

        if outcome.became_leader {
            tracing::info!(
                id = %self.state.id,
                term = self.state.term,
                "election won, assuming leadership"
            );
            self.broadcast_heartbeat();
        }

        self.commit(before);
        Step {
            reset_election: self.demoted(before),
            became_leader: outcome.became_leader,
        }
    }

    fn on_heartbeat(&mut self, hb: Heartbeat) -> Step {
        let before = self.state.state;
        let saved = self.state.clone();
        let outcome = rpc::handle_heartbeat(&mut self.state, &hb);
        if outcome.persist && !self.persist(saved) {
            self.commit(before);
            return Step::default();
        }

        self.commit(before);
        Step {
            reset_election: outcome.reset_election_timer,
            became_leader: false,
        }
    }

    fn broadcast_heartbeat(&self) {
        let hb = Heartbeat {
            cluster: self.cluster.name.clone(),
            term: self.state.term,
            leader_id: self.state.id.clone(),
        };
        if let Err(e) = self.transport.send_heartbeat(hb) {
            tracing::warn!(id = %self.state.id, error = %e, "heartbeat broadcast failed");
        }
    }

    /// Makes `(term, vote)` durable. An unrecorded vote could be granted
    /// twice after a restart, so on failure the whole in-memory transition is
    /// rolled back and the error surfaced through the handler.
    fn persist(&mut self, saved: ElectionState) -> bool {
        match self
            .log
            .append_entry(self.state.term, self.state.vote.as_deref(), 0, &[])
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    id = %self.state.id,
                    error = %e,
                    "failed to persist term and vote, rolling back transition"
                );
                self.state = saved;
                self.handler.error(&e);
                false
            }
        }
    }

    fn demoted(&self, before: State) -> bool {
        before != State::Follower && self.state.state == State::Follower
    }

    /// Publishes the snapshot and notifies the handler of any transition.
    fn commit(&mut self, before: State) {
        {
            let mut snap = self.snapshot.write().unwrap();
            snap.state = self.state.state;
            snap.term = self.state.term;
            snap.leader = self.state.leader.clone();
            snap.last_index = self.state.last_index;
        }
        if before != self.state.state {
            tracing::info!(
                id = %self.state.id,
                from = %before,
                to = %self.state.state,
                term = self.state.term,
                "state change"
            );
            self.handler.state_change(before, self.state.state);
        }
    }

    fn shutdown(mut self) {
        let before = self.state.state;
        self.transport.close();
        if let Err(e) = self.log.close() {
            tracing::warn!(id = %self.state.id, error = %e, "error closing log");
            self.handler.error(&e);
        }
        self.state.state = State::Closed;
        self.state.leader = None;
        self.commit(before);
        tracing::debug!(id = %self.state.id, "event loop exited");
    }
}
