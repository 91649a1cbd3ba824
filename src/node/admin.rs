//! Administrative operations of a node. Reads serve this node's (possibly stale) local state;
//!  writes go through the replicated log and are only accepted on the leader.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::HaConfig;
use crate::consensus::status::Status;
use crate::consensus::{ConsensusEntry, GossipConsensusStore};
use crate::detector::FailureDetector;
use crate::error::{HaError, HaResult};
use crate::gossip::{host_part, GossipNode};
use crate::replication::kv_store::KeyValueStore;
use crate::replication::log_entry::LogEntry;
use crate::replication::{LogWriter, ReplicatedLog};
use crate::util::clock::{format_nanos, format_system_time};
use crate::util::windowed::Sample;


#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ObservationView {
    pub status: Status,
    pub timestamp: String,
}

/// A consensus entry with human-readable times
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConsensusView {
    pub previous_consensus: Option<Status>,
    pub previous_event_time: String,
    pub previous_empty_time: String,
    pub empty: bool,
    pub observations: BTreeMap<String, ObservationView>,
}
impl From<&ConsensusEntry> for ConsensusView {
    fn from(entry: &ConsensusEntry) -> Self {
        ConsensusView {
            previous_consensus: entry.previous_consensus.clone(),
            previous_event_time: format_watermark(entry.previous_event_time),
            previous_empty_time: format_watermark(entry.previous_empty_time),
            empty: entry.empty,
            observations: entry.observations.iter()
                .map(|(node, o)| (node.clone(), ObservationView {
                    status: o.status.clone(),
                    timestamp: format_nanos(o.timestamp),
                }))
                .collect(),
        }
    }
}

fn format_watermark(nanos: i64) -> String {
    if nanos == 0 {
        "never".to_string()
    }
    else {
        format_nanos(nanos)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SampleView {
    pub status: String,
    pub time: String,
}
impl From<&Sample> for SampleView {
    fn from(sample: &Sample) -> Self {
        SampleView {
            status: sample.status.clone(),
            time: format_system_time(sample.time),
        }
    }
}


pub struct AdminApi {
    kv: Arc<KeyValueStore>,
    consensus: Arc<GossipConsensusStore>,
    detector: Option<Arc<FailureDetector>>,
    gossip: Arc<dyn GossipNode>,
    log: Arc<dyn ReplicatedLog>,
    writer: LogWriter,
    data_command_timeout: Duration,
    membership_command_timeout: Duration,
    gossip_leave_timeout: Duration,
}

fn require_non_empty(what: &str, value: &str) -> HaResult<()> {
    if value.trim().is_empty() {
        return Err(HaError::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(())
}

impl AdminApi {
    pub fn new(
        config: &HaConfig,
        kv: Arc<KeyValueStore>,
        consensus: Arc<GossipConsensusStore>,
        detector: Option<Arc<FailureDetector>>,
        gossip: Arc<dyn GossipNode>,
        log: Arc<dyn ReplicatedLog>,
        writer: LogWriter,
    ) -> AdminApi {
        AdminApi {
            kv,
            consensus,
            detector,
            gossip,
            log,
            writer,
            data_command_timeout: config.data_command_timeout,
            membership_command_timeout: config.membership_command_timeout,
            gossip_leave_timeout: config.gossip_leave_timeout,
        }
    }

    pub async fn get(&self, key: &str) -> HaResult<String> {
        self.kv.get(key).await
            .ok_or_else(|| HaError::NotFound(key.to_string()))
    }

    /// the full key-value table
    pub async fn status(&self) -> BTreeMap<String, String> {
        self.kv.snapshot().await
    }

    pub async fn status_for_key(&self, key: &str) -> HaResult<BTreeMap<String, String>> {
        let value = self.get(key).await?;
        Ok(BTreeMap::from([(key.to_string(), value)]))
    }

    pub async fn consensus(&self) -> BTreeMap<String, ConsensusView> {
        self.consensus.snapshot().await
            .iter()
            .map(|(key, entry)| (key.clone(), ConsensusView::from(entry)))
            .collect()
    }

    pub async fn consensus_for_key(&self, key: &str) -> HaResult<ConsensusView> {
        self.consensus.entry(key).await
            .map(|entry| ConsensusView::from(&entry))
            .ok_or_else(|| HaError::NotFound(key.to_string()))
    }

    fn detector(&self) -> HaResult<&FailureDetector> {
        self.detector.as_deref()
            .ok_or(HaError::DiagnosticsUnavailable)
    }

    pub async fn detector_data(&self) -> HaResult<BTreeMap<String, Vec<SampleView>>> {
        Ok(self.detector()?.windows().await
            .iter()
            .map(|(key, samples)| (key.clone(), samples.iter().map(SampleView::from).collect()))
            .collect())
    }

    pub async fn detector_data_for_key(&self, key: &str) -> HaResult<Vec<SampleView>> {
        self.detector()?.window(key).await
            .map(|samples| samples.iter().map(SampleView::from).collect())
            .ok_or_else(|| HaError::NotFound(key.to_string()))
    }

    pub fn gossip_members(&self) -> Vec<String> {
        let mut members = self.gossip.members();
        members.sort();
        members
    }

    pub async fn log_members(&self) -> HaResult<Vec<String>> {
        let mut members = self.log.members().await
            .map_err(|e| HaError::Log(e.to_string()))?;
        members.sort();
        Ok(members)
    }

    pub fn leader(&self) -> HaResult<String> {
        self.log.leader()
            .ok_or(HaError::NoLeader)
    }

    /// Checks that log members and gossip members run on the same set of hosts
    pub async fn members_consensus(&self) -> HaResult<()> {
        let log_members = hosts(&self.log_members().await?);
        let gossip_members = hosts(&self.gossip_members());

        if log_members != gossip_members {
            warn!("log members {:?} and gossip members {:?} differ", log_members, gossip_members);
            return Err(HaError::MembershipMismatch { log_members, gossip_members });
        }
        Ok(())
    }

    pub async fn set(&self, key: &str, value: &str) -> HaResult<()> {
        require_non_empty("key", key)?;
        require_non_empty("value", value)?;
        self.writer.write(&LogEntry::set(key, value), self.data_command_timeout).await?;
        info!("set {} to {}", key, value);
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> HaResult<()> {
        require_non_empty("key", key)?;
        self.writer.write(&LogEntry::delete(key), self.data_command_timeout).await?;
        info!("deleted {}", key);
        Ok(())
    }

    /// adds a node to the replicated log as a voter
    pub async fn join(&self, peer: &str) -> HaResult<()> {
        require_non_empty("peer", peer)?;
        self.writer.check_permission()?;
        self.log.add_voter(peer, self.membership_command_timeout).await
            .map_err(|e| HaError::Log(format!("adding {} failed: {}", peer, e)))?;
        info!("{} joined the replicated log", peer);
        Ok(())
    }

    pub async fn leave(&self, peer: &str) -> HaResult<()> {
        require_non_empty("peer", peer)?;
        self.writer.check_permission()?;
        self.log.remove_server(peer, self.membership_command_timeout).await
            .map_err(|e| HaError::Log(format!("removing {} failed: {}", peer, e)))?;
        info!("{} left the replicated log", peer);
        Ok(())
    }

    /// Joins a comma-separated list of gossip peers, failing unless every one of them was
    ///  contacted
    pub async fn gossip_join(&self, nodes: &str) -> HaResult<usize> {
        let peers = nodes.split(',')
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .collect::<Vec<_>>();
        if peers.is_empty() {
            return Err(HaError::InvalidInput("no gossip peers given".to_string()));
        }
        self.writer.check_permission()?;

        let num_joined = self.gossip.join(&peers).await
            .map_err(|e| HaError::Gossip(format!("joining {:?} failed: {}", peers, e)))?;
        if num_joined != peers.len() {
            return Err(HaError::Gossip(format!("joined {} of {} peers {:?}", num_joined, peers.len(), peers)));
        }
        info!("joined gossip peers {:?}", peers);
        Ok(num_joined)
    }

    pub async fn gossip_leave(&self) -> HaResult<()> {
        self.writer.check_permission()?;
        self.gossip.leave(self.gossip_leave_timeout).await
            .map_err(|e| HaError::Gossip(e.to_string()))?;
        info!("left the gossip cluster");
        Ok(())
    }
}

fn hosts(addrs: &[String]) -> Vec<String> {
    let mut result = addrs.iter()
        .map(|a| host_part(a).unwrap_or(a).to_string())
        .collect::<Vec<_>>();
    result.sort();
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use rstest::rstest;
    use crate::gossip::memory::{MemoryGossipNetwork, MemoryGossipNode};
    use crate::gossip::MockGossipNode;
    use crate::replication::memory::{MemoryLogCluster, MemoryReplicatedLog};
    use crate::replication::state_machine::ReplicatedStateMachine;
    use crate::replication::{MockReplicatedLog, WritePermission};
    use crate::test_util::clock::ManualClock;
    use crate::test_util::shell::ScriptedShellRunner;
    use crate::util::clock::NANOS_PER_SEC;
    use super::*;

    struct Fixture {
        admin: AdminApi,
        kv: Arc<KeyValueStore>,
        consensus: Arc<GossipConsensusStore>,
        network: Arc<MemoryGossipNetwork>,
        cluster: Arc<MemoryLogCluster>,
        permission: WritePermission,
    }

    async fn fixture(detector: Option<Arc<FailureDetector>>) -> Fixture {
        let network = MemoryGossipNetwork::new();
        let gossip = network.node("10.0.0.1:8000");
        let kv = Arc::new(KeyValueStore::new());
        let consensus = Arc::new(GossipConsensusStore::new(gossip.clone()));

        let cluster = MemoryLogCluster::new();
        let state_machine = Arc::new(ReplicatedStateMachine::new(kv.clone(), consensus.clone()));
        let log: Arc<MemoryReplicatedLog> = cluster.replica("10.0.0.1:7000", state_machine).await.unwrap();
        cluster.set_leader(Some("10.0.0.1:7000"));

        let permission = WritePermission::new();
        permission.set(true);
        let writer = LogWriter::new(log.clone(), permission.clone());
        let admin = AdminApi::new(&HaConfig::new("10.0.0.1:8000"), kv.clone(), consensus.clone(), detector, gossip, log, writer);
        Fixture { admin, kv, consensus, network, cluster, permission }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let f = fixture(None).await;

        f.admin.set("db", "10.1.1.1:11210").await.unwrap();
        assert_eq!(f.admin.get("db").await.unwrap(), "10.1.1.1:11210");
        assert_eq!(f.admin.status().await, BTreeMap::from([("db".to_string(), "10.1.1.1:11210".to_string())]));
        assert_eq!(f.admin.status_for_key("db").await.unwrap().get("db").map(|s| s.as_str()), Some("10.1.1.1:11210"));

        f.admin.delete("db").await.unwrap();
        assert!(matches!(f.admin.get("db").await, Err(HaError::NotFound(k)) if k == "db"));
        assert_eq!(f.cluster.entries().await.len(), 2);
    }

    #[rstest]
    #[case("", "v")]
    #[case("db", "")]
    #[case("  ", "v")]
    #[tokio::test]
    async fn test_set_rejects_empty_input(#[case] key: &str, #[case] value: &str) {
        let f = fixture(None).await;

        assert!(matches!(f.admin.set(key, value).await, Err(HaError::InvalidInput(_))));
        assert!(f.cluster.entries().await.is_empty());
        assert!(f.kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_writes_require_leadership() {
        let f = fixture(None).await;
        f.permission.set(false);

        match f.admin.set("db", "v").await {
            Err(HaError::NotLeader { leader }) => assert_eq!(leader.as_deref(), Some("10.0.0.1:7000")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(f.admin.delete("db").await, Err(HaError::NotLeader { .. })));
        assert!(matches!(f.admin.join("10.0.0.2:7000").await, Err(HaError::NotLeader { .. })));
        assert!(matches!(f.admin.leave("10.0.0.2:7000").await, Err(HaError::NotLeader { .. })));
        assert!(matches!(f.admin.gossip_join("10.0.0.2:8000").await, Err(HaError::NotLeader { .. })));
        assert!(matches!(f.admin.gossip_leave().await, Err(HaError::NotLeader { .. })));
        assert!(f.cluster.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_consensus_view() {
        let f = fixture(None).await;
        f.consensus.record_observation("db", "10.0.0.2:8000", Status::Down, 1_700_000_000 * NANOS_PER_SEC, "v").await;
        f.consensus.record_previous_consensus("db", Status::Up).await;

        let view = f.admin.consensus_for_key("db").await.unwrap();
        assert_eq!(view.previous_consensus, Some(Status::Up));
        assert_eq!(view.previous_event_time, "never");
        assert_eq!(view.observations.get("10.0.0.2:8000"), Some(&ObservationView {
            status: Status::Down,
            timestamp: "2023-11-14 22:13:20".to_string(),
        }));
        assert_eq!(f.admin.consensus().await.len(), 1);
        assert!(matches!(f.admin.consensus_for_key("other").await, Err(HaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_detector_data() {
        let f = fixture(None).await;
        assert!(matches!(f.admin.detector_data().await, Err(HaError::DiagnosticsUnavailable)));

        let shell = Arc::new(ScriptedShellRunner::new());
        shell.respond("./verification_script db", "UP\n");
        let detector = Arc::new(FailureDetector::new(&HaConfig::new("10.0.0.1:8000"), shell, Arc::new(ManualClock::new(5 * NANOS_PER_SEC))));
        detector.probe("db", "v").await;

        let f = fixture(Some(detector)).await;
        let expected = vec![SampleView { status: "UP".to_string(), time: "1970-01-01 00:00:05".to_string() }];
        assert_eq!(f.admin.detector_data_for_key("db").await.unwrap(), expected);
        assert_eq!(f.admin.detector_data().await.unwrap().get("db"), Some(&expected));
        assert!(matches!(f.admin.detector_data_for_key("other").await, Err(HaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_membership_reads() {
        let f = fixture(None).await;
        assert_eq!(f.admin.leader().unwrap(), "10.0.0.1:7000");
        assert_eq!(f.admin.log_members().await.unwrap(), vec!["10.0.0.1:7000".to_string()]);
        assert_eq!(f.admin.gossip_members(), vec!["10.0.0.1:8000".to_string()]);
        assert!(f.admin.members_consensus().await.is_ok());

        let _n2: Arc<MemoryGossipNode> = f.network.node("10.0.0.2:8000");
        match f.admin.members_consensus().await {
            Err(HaError::MembershipMismatch { log_members, gossip_members }) => {
                assert_eq!(log_members, vec!["10.0.0.1".to_string()]);
                assert_eq!(gossip_members, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }

        f.cluster.set_leader(None);
        assert!(matches!(f.admin.leader(), Err(HaError::NoLeader)));
    }

    #[tokio::test]
    async fn test_log_membership_writes() {
        let f = fixture(None).await;
        let state_machine = Arc::new(ReplicatedStateMachine::new(Arc::new(KeyValueStore::new()), f.consensus.clone()));
        let _log2 = f.cluster.replica("10.0.0.2:7000", state_machine).await.unwrap();

        f.admin.leave("10.0.0.2:7000").await.unwrap();
        assert_eq!(f.admin.log_members().await.unwrap(), vec!["10.0.0.1:7000".to_string()]);
        f.admin.join("10.0.0.2:7000").await.unwrap();
        assert_eq!(f.admin.log_members().await.unwrap().len(), 2);

        assert!(matches!(f.admin.join("10.0.0.9:7000").await, Err(HaError::Log(_))));
        assert!(matches!(f.admin.join("").await, Err(HaError::InvalidInput(_))));
    }

    fn admin_with_gossip(gossip: MockGossipNode) -> AdminApi {
        let mut log = MockReplicatedLog::new();
        log.expect_leader()
            .return_const(Some("10.0.0.1:7000".to_string()));
        let log: Arc<dyn ReplicatedLog> = Arc::new(log);
        let gossip: Arc<dyn GossipNode> = Arc::new(gossip);

        let permission = WritePermission::new();
        permission.set(true);
        let kv = Arc::new(KeyValueStore::new());
        let consensus = Arc::new(GossipConsensusStore::new(gossip.clone()));
        AdminApi::new(&HaConfig::new("10.0.0.1:8000"), kv, consensus, None, gossip, log.clone(), LogWriter::new(log, permission))
    }

    #[rstest]
    #[case("10.0.0.2:8000,10.0.0.3:8000", 2, true)]
    #[case(" 10.0.0.2:8000 , 10.0.0.3:8000 ,", 2, true)]
    #[case("10.0.0.2:8000,10.0.0.3:8000", 1, false)]
    #[tokio::test]
    async fn test_gossip_join(#[case] nodes: &str, #[case] num_contacted: usize, #[case] expected_ok: bool) {
        let mut gossip = MockGossipNode::new();
        gossip.expect_join()
            .withf(|peers| peers.to_vec() == vec!["10.0.0.2:8000".to_string(), "10.0.0.3:8000".to_string()])
            .returning(move |_| Ok(num_contacted));

        let admin = admin_with_gossip(gossip);
        let result = admin.gossip_join(nodes).await;
        assert_eq!(result.is_ok(), expected_ok);
        if !expected_ok {
            assert!(matches!(result, Err(HaError::Gossip(_))));
        }
    }

    #[tokio::test]
    async fn test_gossip_join_rejects_empty_list() {
        let mut gossip = MockGossipNode::new();
        gossip.expect_join().never();

        let admin = admin_with_gossip(gossip);
        assert!(matches!(admin.gossip_join(" , ").await, Err(HaError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_gossip_leave() {
        let mut gossip = MockGossipNode::new();
        gossip.expect_leave()
            .withf(|timeout| *timeout == Duration::from_secs(3))
            .times(1)
            .returning(|_| Ok(()));

        let admin = admin_with_gossip(gossip);
        admin.gossip_leave().await.unwrap();
    }
}
