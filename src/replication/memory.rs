//! In-process replicated log: a single ordered entry list shared by all replicas, with the
//!  leader picked explicitly. Entries are applied to every member's state machine before
//!  `apply` returns.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::replication::{ReplicatedLog, StateMachine};


pub struct MemoryLogCluster {
    /// serializes appends, and holds all entries in log order
    entries: tokio::sync::Mutex<Vec<Vec<u8>>>,
    meta: Mutex<ClusterMeta>,
}

#[derive(Default)]
struct ClusterMeta {
    replicas: BTreeMap<String, Replica>,
    members: Vec<String>,
    leader: Option<String>,
}

struct Replica {
    state_machine: Arc<dyn StateMachine>,
    leadership: watch::Sender<bool>,
}

impl MemoryLogCluster {
    pub fn new() -> Arc<MemoryLogCluster> {
        Arc::new(MemoryLogCluster {
            entries: Default::default(),
            meta: Default::default(),
        })
    }

    fn meta(&self) -> MutexGuard<'_, ClusterMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a replica and makes it a member. A replica joining late receives a snapshot
    ///  of the first member's state machine.
    pub async fn replica(self: &Arc<Self>, addr: &str, state_machine: Arc<dyn StateMachine>) -> anyhow::Result<Arc<MemoryReplicatedLog>> {
        let entries = self.entries.lock().await;

        let existing = {
            let meta = self.meta();
            meta.members.first()
                .and_then(|m| meta.replicas.get(m))
                .map(|r| r.state_machine.clone())
        };
        if let Some(existing) = existing {
            if !entries.is_empty() {
                let snapshot = existing.snapshot().await?;
                state_machine.restore(&snapshot).await?;
            }
        }

        let (leadership, _) = watch::channel(false);
        let mut meta = self.meta();
        meta.replicas.insert(addr.to_string(), Replica { state_machine, leadership });
        if !meta.members.iter().any(|m| m == addr) {
            meta.members.push(addr.to_string());
        }

        Ok(Arc::new(MemoryReplicatedLog {
            addr: addr.to_string(),
            cluster: self.clone(),
        }))
    }

    /// Makes a member the leader (or leaves the cluster without a leader), notifying every
    ///  replica of its leadership status
    pub fn set_leader(&self, addr: Option<&str>) {
        let mut meta = self.meta();
        meta.leader = addr.map(|a| a.to_string());
        info!("log leader is now {:?}", meta.leader);

        for (replica_addr, replica) in &meta.replicas {
            replica.leadership.send_replace(Some(replica_addr.as_str()) == addr);
        }
    }

    /// all entries appended so far, in log order
    pub async fn entries(&self) -> Vec<Vec<u8>> {
        self.entries.lock().await
            .clone()
    }

    async fn append(&self, sender: &str, data: Vec<u8>) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;

        let state_machines = {
            let meta = self.meta();
            if meta.leader.as_deref() != Some(sender) {
                bail!("node is not the leader");
            }
            meta.members.iter()
                .filter_map(|m| meta.replicas.get(m))
                .map(|r| r.state_machine.clone())
                .collect::<Vec<_>>()
        };

        for state_machine in state_machines {
            state_machine.apply(&data).await;
        }
        entries.push(data);
        Ok(())
    }
}


pub struct MemoryReplicatedLog {
    addr: String,
    cluster: Arc<MemoryLogCluster>,
}

impl std::fmt::Debug for MemoryReplicatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryReplicatedLog{{addr:{}}}", self.addr)
    }
}

#[async_trait]
impl ReplicatedLog for MemoryReplicatedLog {
    async fn apply(&self, data: Vec<u8>, _timeout: Duration) -> anyhow::Result<()> {
        self.cluster.append(&self.addr, data).await
    }

    async fn barrier(&self, _timeout: Duration) -> anyhow::Result<()> {
        if self.leader().as_deref() != Some(self.addr.as_str()) {
            bail!("node is not the leader");
        }
        // appends are applied synchronously, so waiting for the append lock is sufficient
        let _ = self.cluster.entries.lock().await;
        Ok(())
    }

    fn leader(&self) -> Option<String> {
        self.cluster.meta().leader.clone()
    }

    fn leadership_changes(&self) -> watch::Receiver<bool> {
        match self.cluster.meta().replicas.get(&self.addr) {
            Some(replica) => replica.leadership.subscribe(),
            None => watch::channel(false).1,
        }
    }

    async fn add_voter(&self, addr: &str, _timeout: Duration) -> anyhow::Result<()> {
        let mut meta = self.cluster.meta();
        if meta.leader.as_deref() != Some(self.addr.as_str()) {
            bail!("node is not the leader");
        }
        if !meta.replicas.contains_key(addr) {
            return Err(anyhow!("unknown replica {}", addr));
        }
        if !meta.members.iter().any(|m| m == addr) {
            meta.members.push(addr.to_string());
        }
        Ok(())
    }

    async fn remove_server(&self, addr: &str, _timeout: Duration) -> anyhow::Result<()> {
        let mut meta = self.cluster.meta();
        if meta.leader.as_deref() != Some(self.addr.as_str()) {
            bail!("node is not the leader");
        }
        meta.members.retain(|m| m != addr);
        Ok(())
    }

    async fn members(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.cluster.meta().members.clone())
    }
}
