//! Raft-style leader election over pluggable transports.
//!
//! A cluster of fixed, known size elects at most one leader per term. The
//! elected leader broadcasts periodic heartbeats; losing them triggers a new
//! randomized-timeout election. Votes are persisted through a [`Log`] before
//! they are announced, so a restart can never hand out a second vote for the
//! same term.
//!
//! This crate does election only: no log replication, no command
//! application, no runtime membership changes.

pub mod config;
pub mod error;
pub mod handler;
pub mod log;
pub mod message;
pub mod node;
pub mod rpc;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::ClusterConfig;
pub use error::{BallotError, Result};
pub use handler::Handler;
pub use log::{FileLog, Log, LogState, MemoryLog};
pub use message::{Heartbeat, VoteRequest, VoteResponse};
pub use node::{Node, NodeBuilder};
pub use state::{State, NO_LEADER};
pub use transport::{ChannelNetwork, ChannelTransport, MessageSink, Transport};
