use thiserror::Error;

/// Typed outcomes of operations that callers (typically the administrative surface) are
///  expected to react to individually.
#[derive(Debug, Error)]
pub enum HaError {
    #[error("write operations are only allowed on the leader, leader is {}", .leader.as_deref().unwrap_or("unknown"))]
    NotLeader {
        leader: Option<String>,
    },
    #[error("key {0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("replicated log: {0}")]
    Log(String),
    #[error("gossip: {0}")]
    Gossip(String),
    #[error("there is currently no leader")]
    NoLeader,
    #[error("log members {log_members:?} and gossip members {gossip_members:?} differ")]
    MembershipMismatch {
        log_members: Vec<String>,
        gossip_members: Vec<String>,
    },
    #[error("this node has no failure detector diagnostics")]
    DiagnosticsUnavailable,
}

pub type HaResult<T> = Result<T, HaError>;
