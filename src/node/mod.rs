//! An HA node: owns the stores and pipelines of one cluster member and runs its background
//!  loops until cancelled.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::bail;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::bridge::{run_fanout, run_gossip_consumer, Bridge};
use crate::config::HaConfig;
use crate::consensus::GossipConsensusStore;
use crate::detector::verifier::{run_verification, ScriptVerifier, VerifyRequest, VerifyResult};
use crate::detector::FailureDetector;
use crate::gossip::{host_part, GossipNode};
use crate::node::admin::AdminApi;
use crate::quorum::{run_notifications, run_quorum_checks, NotificationRequest, NotificationResult, QuorumChecker};
use crate::replication::kv_store::KeyValueStore;
use crate::replication::state_machine::ReplicatedStateMachine;
use crate::replication::{LogWriter, ReplicatedLog, WritePermission};
use crate::scavenger::{run_scavenger, Scavenger};
use crate::shell::ShellRunner;
use crate::util::clock::Clock;

pub mod admin;


/// The replicated and gossiped state of a node. It exists before the node itself, because the
///  replicated log needs the state machine when the node connects to it.
#[derive(Clone)]
pub struct HaStores {
    pub kv: Arc<KeyValueStore>,
    pub consensus: Arc<GossipConsensusStore>,
}
impl HaStores {
    pub fn new(gossip: Arc<dyn GossipNode>) -> HaStores {
        HaStores {
            kv: Arc::new(KeyValueStore::new()),
            consensus: Arc::new(GossipConsensusStore::new(gossip)),
        }
    }

    pub fn state_machine(&self) -> Arc<ReplicatedStateMachine> {
        Arc::new(ReplicatedStateMachine::new(self.kv.clone(), self.consensus.clone()))
    }
}


/// receiving ends of the queues between pipeline stages, handed to the loops by [HaNode::run]
struct Pipelines {
    verify_requests: mpsc::Receiver<VerifyRequest>,
    verify_results_send: mpsc::Sender<VerifyResult>,
    verify_results: mpsc::Receiver<VerifyResult>,
    notification_requests: mpsc::Receiver<NotificationRequest>,
    notification_results_send: mpsc::Sender<NotificationResult>,
    notification_results: mpsc::Receiver<NotificationResult>,
}

pub struct HaNode {
    config: HaConfig,
    stores: HaStores,
    gossip: Arc<dyn GossipNode>,
    log: Arc<dyn ReplicatedLog>,
    shell: Arc<dyn ShellRunner>,
    permission: WritePermission,
    detector: Arc<FailureDetector>,
    bridge: Arc<Bridge>,
    quorum: Arc<QuorumChecker>,
    scavenger: Arc<Scavenger>,
    admin: Arc<AdminApi>,
    pipelines: Mutex<Option<Pipelines>>,
}

impl HaNode {
    pub fn new(
        config: HaConfig,
        stores: HaStores,
        gossip: Arc<dyn GossipNode>,
        log: Arc<dyn ReplicatedLog>,
        shell: Arc<dyn ShellRunner>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<HaNode> {
        config.validate()?;

        let permission = WritePermission::new();
        let writer = LogWriter::new(log.clone(), permission.clone());
        let detector = Arc::new(FailureDetector::new(&config, shell.clone(), clock.clone()));

        let (verify_requests_send, verify_requests) = mpsc::channel(config.queue_capacity);
        let (verify_results_send, verify_results) = mpsc::channel(config.queue_capacity);
        let (notification_requests_send, notification_requests) = mpsc::channel(config.queue_capacity);
        let (notification_results_send, notification_results) = mpsc::channel(config.queue_capacity);

        let bridge = Arc::new(Bridge::new(stores.kv.clone(), stores.consensus.clone(), gossip.clone(), verify_requests_send, clock.clone()));
        let quorum = Arc::new(QuorumChecker::new(&config, stores.kv.clone(), stores.consensus.clone(), log.clone(), permission.clone(), clock, notification_requests_send));
        let scavenger = Arc::new(Scavenger::new(stores.kv.clone(), stores.consensus.clone(), gossip.clone(), Some(detector.clone())));
        let admin = Arc::new(AdminApi::new(&config, stores.kv.clone(), stores.consensus.clone(), Some(detector.clone()), gossip.clone(), log.clone(), writer));

        Ok(HaNode {
            config,
            stores,
            gossip,
            log,
            shell,
            permission,
            detector,
            bridge,
            quorum,
            scavenger,
            admin,
            pipelines: Mutex::new(Some(Pipelines {
                verify_requests,
                verify_results_send,
                verify_results,
                notification_requests,
                notification_results_send,
                notification_results,
            })),
        })
    }

    pub fn stores(&self) -> &HaStores {
        &self.stores
    }

    pub fn admin(&self) -> Arc<AdminApi> {
        self.admin.clone()
    }

    pub fn detector(&self) -> Arc<FailureDetector> {
        self.detector.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.permission.is_granted()
    }

    /// Joins every host that is a member of the replicated log but missing from the gossip
    ///  cluster. Gossip members are never removed: other nodes can not be made to leave.
    pub async fn reconcile_membership(&self) {
        let log_members = match self.log.members().await {
            Ok(members) => members,
            Err(e) => {
                warn!("failed to read log members: {}", e);
                return;
            }
        };
        let gossip_members = self.gossip.members();
        let gossip_hosts = gossip_members.iter()
            .filter_map(|m| host_part(m))
            .collect::<BTreeSet<_>>();

        let missing = log_members.iter()
            .filter_map(|m| host_part(m))
            .filter(|host| !gossip_hosts.contains(host))
            .collect::<BTreeSet<_>>();

        for host in missing {
            info!("{} is a log member but not a gossip member, joining it", host);
            match self.gossip.join(&[host.to_string()]).await {
                Ok(1) => {}
                Ok(n) => warn!("joining gossip member {} contacted {} nodes", host, n),
                Err(e) => warn!("joining gossip member {} failed: {}", host, e),
            }
        }
    }

    /// Runs all background loops of the node until `cancel` is triggered. A node can only be
    ///  run once.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let pipelines = self.pipelines.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(pipelines) = pipelines else {
            bail!("node {} is already running", self.config.node_name);
        };

        info!("starting HA node {} (gossip {}, log {})", self.config.node_name, self.gossip.addr(), self.config.log_bind_addr);
        if let Some(join_addr) = &self.config.gossip_join_addr {
            if let Err(e) = self.gossip.join(&[join_addr.clone()]).await {
                warn!("joining the gossip cluster through {} failed: {}", join_addr, e);
            }
        }

        let config = &self.config;
        let tracker = TaskTracker::new();

        tracker.spawn(run_leadership_listener(self.log.leadership_changes(), self.permission.clone(), cancel.clone()));

        tracker.spawn(run_fanout(self.bridge.clone(), config.fanout_min_interval, config.fanout_max_interval, cancel.clone()));
        tracker.spawn(run_verification(
            Arc::new(ScriptVerifier::new(self.detector.clone())),
            pipelines.verify_requests,
            pipelines.verify_results_send,
            config.verification_pool_size,
            cancel.clone(),
        ));
        {
            let bridge = self.bridge.clone();
            let cancel = cancel.clone();
            let results = pipelines.verify_results;
            tracker.spawn(async move { bridge.absorb(results, cancel).await });
        }
        tracker.spawn(run_gossip_consumer(self.bridge.clone(), config.gossip_consume_interval, cancel.clone()));

        tracker.spawn(run_quorum_checks(self.quorum.clone(), config.quorum_check_interval, cancel.clone()));
        tracker.spawn(run_notifications(
            self.shell.clone(),
            pipelines.notification_requests,
            pipelines.notification_results_send,
            config.notification_pool_size,
            config.script_timeout,
            self.permission.clone(),
            cancel.clone(),
        ));
        {
            let quorum = self.quorum.clone();
            let cancel = cancel.clone();
            let results = pipelines.notification_results;
            tracker.spawn(async move { quorum.quorum_check2(results, cancel).await });
        }

        tracker.spawn(run_scavenger(self.scavenger.clone(), config.scavenge_interval, cancel.clone()));
        {
            let node = self.clone();
            let cancel = cancel.clone();
            let interval = config.membership_reconcile_interval;
            tracker.spawn(async move { run_membership_reconciliation(node, interval, cancel).await });
        }

        tracker.close();
        tracker.wait().await;
        info!("HA node {} stopped", self.config.node_name);
        Ok(())
    }
}

/// Grants write permission while this node leads the replicated log
async fn run_leadership_listener(mut changes: watch::Receiver<bool>, permission: WritePermission, cancel: CancellationToken) {
    loop {
        let is_leader = *changes.borrow_and_update();
        if is_leader != permission.is_granted() {
            if is_leader {
                info!("became leader, enabling writes");
            }
            else {
                info!("became follower, disabling writes");
            }
            permission.set(is_leader);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    permission.set(false);
}

async fn run_membership_reconciliation(node: Arc<HaNode>, interval: Duration, cancel: CancellationToken) {
    let mut ticks = time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                node.reconcile_membership().await;
            }
        }
    }
}
