use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::consensus::status::Status;
use crate::consensus::GossipConsensusStore;
use crate::replication::kv_store::KeyValueStore;
use crate::replication::log_entry::{LogCommand, LogEntry};
use crate::replication::StateMachine;


/// Applies committed log entries: data commands go to the key-value store, quorum decisions go
///  to the consensus store. Snapshots contain only the key-value store; the consensus store is
///  rebuilt from gossip and subsequent decisions.
pub struct ReplicatedStateMachine {
    kv: Arc<KeyValueStore>,
    consensus: Arc<GossipConsensusStore>,
}

impl ReplicatedStateMachine {
    pub fn new(kv: Arc<KeyValueStore>, consensus: Arc<GossipConsensusStore>) -> ReplicatedStateMachine {
        ReplicatedStateMachine { kv, consensus }
    }

    pub async fn apply_entry(&self, entry: &LogEntry) {
        match entry.cmd {
            LogCommand::Set => self.kv.set(&entry.key, &entry.value).await,
            LogCommand::Delete => self.kv.delete(&entry.key).await,
            LogCommand::NotifyStatus => {
                self.consensus.record_previous_consensus(&entry.key, Status::from(entry.value.as_str())).await
            }
            LogCommand::NotifyTime => match entry.value.parse::<i64>() {
                Ok(nanos) => self.consensus.record_previous_event_time(&entry.key, nanos).await,
                Err(e) => warn!("skipping {:?}: invalid timestamp: {}", entry, e),
            }
            LogCommand::NotifyEmpty => match entry.value.parse::<bool>() {
                Ok(empty) => self.consensus.record_empty(&entry.key, empty).await,
                Err(e) => warn!("skipping {:?}: invalid flag: {}", entry, e),
            }
            LogCommand::NotifyEmptyTime => match entry.value.parse::<i64>() {
                Ok(nanos) => self.consensus.record_previous_empty_time(&entry.key, nanos).await,
                Err(e) => warn!("skipping {:?}: invalid timestamp: {}", entry, e),
            }
            LogCommand::Unknown => {
                debug!("ignoring unknown log command for key {}", entry.key);
            }
        }
    }
}

#[async_trait]
impl StateMachine for ReplicatedStateMachine {
    /// Panics if the entry can not be decoded: all replicas apply the same entries, so an
    ///  undecodable entry means this replica is corrupt, and continuing would let it diverge.
    async fn apply(&self, data: &[u8]) {
        let entry = match LogEntry::try_from_bytes(data) {
            Ok(entry) => entry,
            Err(e) => panic!("failed to decode replicated log entry {:?}: {}", String::from_utf8_lossy(data), e),
        };
        self.apply_entry(&entry).await;
        debug!("applied log entry {:?}", entry);
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<u8>> {
        self.kv.to_json().await
    }

    async fn restore(&self, data: &[u8]) -> anyhow::Result<()> {
        self.kv.restore_json(data).await
    }
}
