//! Pluggable delivery of election messages.
//!
//! A node never hands a transport its full surface; the transport only gets a
//! [`MessageSink`], the capability to push inbound messages into the node's
//! event loop. Sends are best-effort: loss, reordering, and duplication are
//! all tolerated by the transition rules, and correctness is recovered by
//! re-broadcast on the next timer tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{BallotError, Result};
use crate::message::{Heartbeat, VoteRequest, VoteResponse};

/// Inbound half of a node: the three streams its event loop consumes.
#[derive(Debug, Clone)]
pub struct MessageSink {
    pub cluster: String,
    pub node_id: String,
    pub vote_requests: mpsc::Sender<VoteRequest>,
    pub vote_responses: mpsc::Sender<VoteResponse>,
    pub heartbeats: mpsc::Sender<Heartbeat>,
}

/// Message delivery driver bound to a single node.
pub trait Transport: Send + 'static {
    /// One-time binding to a node's inbound sink. Failure aborts node
    /// construction.
    fn init(&mut self, sink: MessageSink) -> Result<()>;

    /// Broadcasts a vote solicitation to every peer.
    fn send_vote_request(&self, req: VoteRequest) -> Result<()>;

    /// Sends a vote answer to the requesting candidate only.
    fn send_vote_response(&self, to: &str, resp: VoteResponse) -> Result<()>;

    /// Broadcasts a leader heartbeat to every peer.
    fn send_heartbeat(&self, hb: Heartbeat) -> Result<()>;

    /// Releases the binding and any sockets. Idempotent.
    fn close(&mut self);

    /// Advisory peer count, mainly a test hook.
    fn peer_count(&self) -> usize;
}

#[derive(Debug)]
struct Peer {
    sink: MessageSink,
    group: usize,
}

#[derive(Debug, Default)]
struct NetworkInner {
    peers: HashMap<String, Peer>,
}

/// In-process message bus connecting [`ChannelTransport`] instances.
///
/// One network is one broadcast domain; inject a clone wherever a node is
/// built instead of sharing process globals. Supports carving the registered
/// peers into partition groups to exercise split-brain scenarios.
#[derive(Debug, Clone, Default)]
pub struct ChannelNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a transport to hand to one node.
    pub fn transport(&self) -> ChannelTransport {
        ChannelTransport {
            network: self.clone(),
            local: None,
        }
    }

    /// Splits the network in two: `island` on one side, everyone else on the
    /// other. Messages cross between groups only after [`ChannelNetwork::heal`].
    pub fn split(&self, island: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        for (id, peer) in inner.peers.iter_mut() {
            peer.group = usize::from(island.contains(&id.as_str()));
        }
    }

    /// Restores full connectivity.
    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        for peer in inner.peers.values_mut() {
            peer.group = 0;
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    fn register(&self, sink: MessageSink) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.insert(sink.node_id.clone(), Peer { sink, group: 0 });
    }

    fn deregister(&self, node_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.remove(node_id);
    }

    /// Delivers to every peer reachable from `from`: same cluster, same
    /// partition group, not the sender itself. Full inbound buffers drop the
    /// message, as a lossy wire would.
    fn each_reachable(&self, from: &str, cluster: &str, mut deliver: impl FnMut(&MessageSink)) {
        let inner = self.inner.lock().unwrap();
        let from_group = match inner.peers.get(from) {
            Some(peer) => peer.group,
            None => return,
        };
        for (id, peer) in inner.peers.iter() {
            if id != from && peer.group == from_group && peer.sink.cluster == cluster {
                deliver(&peer.sink);
            }
        }
    }

    fn unicast(&self, from: &str, to: &str, mut deliver: impl FnMut(&MessageSink)) {
        let inner = self.inner.lock().unwrap();
        let from_group = match inner.peers.get(from) {
            Some(peer) => peer.group,
            None => return,
        };
        if let Some(peer) = inner.peers.get(to) {
            if peer.group == from_group {
                deliver(&peer.sink);
            }
        }
    }
}

/// [`Transport`] implementation backed by a [`ChannelNetwork`].
#[derive(Debug)]
pub struct ChannelTransport {
    network: ChannelNetwork,
    local: Option<String>,
}

impl ChannelTransport {
    fn local(&self) -> Result<&str> {
        self.local
            .as_deref()
            .ok_or_else(|| BallotError::Transport("transport not initialized".to_string()))
    }
}

impl Transport for ChannelTransport {
    fn init(&mut self, sink: MessageSink) -> Result<()> {
        self.local = Some(sink.node_id.clone());
        self.network.register(sink);
        Ok(())
    }

    fn send_vote_request(&self, req: VoteRequest) -> Result<()> {
        let from = self.local()?;
        self.network.each_reachable(from, &req.cluster, |sink| {
            let _ = sink.vote_requests.try_send(req.clone());
        });
        Ok(())
    }

    fn send_vote_response(&self, to: &str, resp: VoteResponse) -> Result<()> {
        let from = self.local()?;
        self.network.unicast(from, to, |sink| {
            let _ = sink.vote_responses.try_send(resp.clone());
        });
        Ok(())
    }

    fn send_heartbeat(&self, hb: Heartbeat) -> Result<()> {
        let from = self.local()?;
        self.network.each_reachable(from, &hb.cluster, |sink| {
            let _ = sink.heartbeats.try_send(hb.clone());
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(local) = self.local.take() {
            self.network.deregister(&local);
        }
    }

    fn peer_count(&self) -> usize {
        self.network.peer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(cluster: &str, id: &str) -> (MessageSink, mpsc::Receiver<VoteRequest>) {
        let (req_tx, req_rx) = mpsc::channel(16);
        let (resp_tx, _resp_rx) = mpsc::channel(16);
        let (hb_tx, _hb_rx) = mpsc::channel(16);
        (
            MessageSink {
                cluster: cluster.to_string(),
                node_id: id.to_string(),
                vote_requests: req_tx,
                vote_responses: resp_tx,
                heartbeats: hb_tx,
            },
            req_rx,
        )
    }

    fn request(cluster: &str, candidate: &str) -> VoteRequest {
        VoteRequest {
            cluster: cluster.to_string(),
            term: 1,
            candidate_id: candidate.to_string(),
            last_log_index: 0,
            last_log_info: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let network = ChannelNetwork::new();
        let mut ta = network.transport();
        let mut tb = network.transport();

        let (sink_a, mut rx_a) = sink("foo", "a");
        let (sink_b, mut rx_b) = sink("foo", "b");
        ta.init(sink_a).unwrap();
        tb.init(sink_b).unwrap();

        ta.send_vote_request(request("foo", "a")).unwrap();

        assert_eq!(rx_b.recv().await.unwrap().candidate_id, "a");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cluster_mismatch_not_delivered() {
        let network = ChannelNetwork::new();
        let mut ta = network.transport();
        let mut tb = network.transport();

        let (sink_a, _rx_a) = sink("foo", "a");
        let (sink_b, mut rx_b) = sink("bar", "b");
        ta.init(sink_a).unwrap();
        tb.init(sink_b).unwrap();

        ta.send_vote_request(request("foo", "a")).unwrap();

        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_split_blocks_and_heal_restores_delivery() {
        let network = ChannelNetwork::new();
        let mut ta = network.transport();
        let mut tb = network.transport();

        let (sink_a, _rx_a) = sink("foo", "a");
        let (sink_b, mut rx_b) = sink("foo", "b");
        ta.init(sink_a).unwrap();
        tb.init(sink_b).unwrap();

        network.split(&["a"]);
        ta.send_vote_request(request("foo", "a")).unwrap();
        assert!(rx_b.try_recv().is_err());

        network.heal();
        ta.send_vote_request(request("foo", "a")).unwrap();
        assert_eq!(rx_b.recv().await.unwrap().candidate_id, "a");
    }

    #[tokio::test]
    async fn test_close_deregisters_peer() {
        let network = ChannelNetwork::new();
        let mut ta = network.transport();
        let (sink_a, _rx_a) = sink("foo", "a");
        ta.init(sink_a).unwrap();
        assert_eq!(network.peer_count(), 1);

        ta.close();
        assert_eq!(network.peer_count(), 0);
        ta.close();
        assert_eq!(network.peer_count(), 0);
    }

    #[test]
    fn test_send_before_init_fails() {
        let network = ChannelNetwork::new();
        let transport = network.transport();

        let err = transport.send_vote_request(request("foo", "a")).unwrap_err();
        assert!(matches!(err, BallotError::Transport(_)));
    }
}
