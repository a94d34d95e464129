#![allow(clippy::uninlined_format_args)]

pub use crate::command::{Command, LogCommand};
pub use crate::config::{ConfigError, RaftConfig, ServerAddress};
pub use crate::index_term::IndexTerm;
pub use crate::log_array::{Index, LogEntry, ValidationError};
pub use crate::messages::*;
pub use crate::raft::{Peer, Raft, RaftJoinHandle, StartError, Term};
pub use crate::remote_raft::RemoteRaft;
pub use crate::state_machine::{ApplyResult, StateMachine};
pub use crate::submission::{SubmitError, SubmitResult, Submission};

pub(crate) use crate::context::RaftContext;

mod apply_command;
mod candidate;
mod command;
mod config;
mod context;
mod daemon_env;
mod daemon_watch;
mod election_timer;
mod follower;
mod index_term;
mod leader;
mod log_array;
mod messages;
mod mode;
mod mode_manager;
mod peer_progress;
mod persistent_state;
mod process_append_entries;
mod process_request_vote;
mod raft;
mod raft_log;
mod remote_raft;
mod rpc_client;
mod run_signal;
mod state_machine;
pub mod storage;
mod submission;
mod sync_log_entries;
mod utils;
mod volatile_state;
