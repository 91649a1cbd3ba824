//! The seam to the replicated log. The log totally orders commands and applies them to every
//!  replica's [StateMachine]; election, persistence and snapshot transfer are the log
//!  implementation's business.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::watch;
use tracing::warn;

use crate::error::{HaError, HaResult};
use crate::replication::log_entry::LogEntry;

pub mod kv_store;
pub mod log_entry;
pub mod memory;
pub mod state_machine;


#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplicatedLog: Debug + Send + Sync + 'static {
    /// Appends an entry and waits until it is committed and applied locally. Only the leader
    ///  can append.
    async fn apply(&self, data: Vec<u8>, timeout: Duration) -> anyhow::Result<()>;

    /// waits until all entries committed before the call were applied locally
    async fn barrier(&self, timeout: Duration) -> anyhow::Result<()>;

    fn leader(&self) -> Option<String>;

    /// `true` while this node is the leader
    fn leadership_changes(&self) -> watch::Receiver<bool>;

    async fn add_voter(&self, addr: &str, timeout: Duration) -> anyhow::Result<()>;

    async fn remove_server(&self, addr: &str, timeout: Duration) -> anyhow::Result<()>;

    async fn members(&self) -> anyhow::Result<Vec<String>>;
}


/// Deterministic consumer of committed log entries. Every replica applies the same entries in
///  the same order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateMachine: Send + Sync + 'static {
    async fn apply(&self, data: &[u8]);

    async fn snapshot(&self) -> anyhow::Result<Vec<u8>>;

    async fn restore(&self, data: &[u8]) -> anyhow::Result<()>;
}


/// Set while this node is the leader of the replicated log. All log writes check it first.
#[derive(Clone, Debug, Default)]
pub struct WritePermission(Arc<AtomicBool>);
impl WritePermission {
    pub fn new() -> WritePermission {
        WritePermission::default()
    }

    pub fn is_granted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, granted: bool) {
        self.0.store(granted, Ordering::Release);
    }
}


/// Writes commands to the replicated log, rejecting writes while this node is not the leader
#[derive(Clone, Debug)]
pub struct LogWriter {
    log: Arc<dyn ReplicatedLog>,
    permission: WritePermission,
}
impl LogWriter {
    pub fn new(log: Arc<dyn ReplicatedLog>, permission: WritePermission) -> LogWriter {
        LogWriter { log, permission }
    }

    pub fn check_permission(&self) -> HaResult<()> {
        if self.permission.is_granted() {
            Ok(())
        }
        else {
            Err(HaError::NotLeader { leader: self.log.leader() })
        }
    }

    pub async fn write(&self, entry: &LogEntry, timeout: Duration) -> HaResult<()> {
        self.check_permission()?;

        let data = entry.to_bytes()
            .map_err(|e| HaError::Log(format!("failed to serialize {:?}: {}", entry, e)))?;
        self.log.apply(data, timeout).await
            .map_err(|e| {
                warn!("applying {:?} to the replicated log failed: {}", entry, e);
                HaError::Log(e.to_string())
            })
    }
}
