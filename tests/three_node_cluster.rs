use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use haconsensus::config::HaConfig;
use haconsensus::consensus::status::Status;
use haconsensus::gossip::memory::MemoryGossipNetwork;
use haconsensus::node::{HaNode, HaStores};
use haconsensus::replication::log_entry::{LogCommand, LogEntry};
use haconsensus::replication::memory::MemoryLogCluster;
use haconsensus::replication::ReplicatedLog;
use haconsensus::shell::{ShellOutput, ShellRunner};
use haconsensus::test_util::clock::TokioClock;
use haconsensus::test_util::shell::ScriptedShellRunner;
use haconsensus::util::clock::NANOS_PER_SEC;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

const VALUE: &str = "10.1.1.1:11210";

/// Answers like the wrapped runner, but notification scripts take `delay` to finish
#[derive(Debug)]
struct SlowNotificationRunner {
    inner: Arc<ScriptedShellRunner>,
    delay: Duration,
}

#[async_trait]
impl ShellRunner for SlowNotificationRunner {
    async fn run(&self, command: &str, timeout: Duration) -> ShellOutput {
        if command.starts_with("./notification_script") {
            sleep(self.delay).await;
        }
        self.inner.run(command, timeout).await
    }
}

struct TestCluster {
    log_cluster: Arc<MemoryLogCluster>,
    shell: Arc<ScriptedShellRunner>,
    nodes: Vec<Arc<HaNode>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TestCluster {
    async fn start(shell: Arc<ScriptedShellRunner>) -> TestCluster {
        TestCluster::start_with_runner(shell.clone(), shell).await
    }

    /// `shell` records the commands, `runner` is what the nodes run them with
    async fn start_with_runner(shell: Arc<ScriptedShellRunner>, runner: Arc<dyn ShellRunner>) -> TestCluster {
        let network = MemoryGossipNetwork::new();
        let log_cluster = MemoryLogCluster::new();
        let clock = Arc::new(TokioClock::new(1_700_000_000 * NANOS_PER_SEC));

        let mut nodes = Vec::new();
        let mut logs = Vec::new();
        for i in 1..=3 {
            let mut config = HaConfig::new(format!("10.0.0.{}:8000", i));
            config.node_name = format!("node{}", i);
            config.log_bind_addr = format!("10.0.0.{}:7000", i);

            let gossip = network.node(&config.gossip_bind_addr);
            let stores = HaStores::new(gossip.clone());
            let log = log_cluster.replica(&config.log_bind_addr, stores.state_machine()).await.unwrap();
            logs.push(log.clone());
            nodes.push(Arc::new(HaNode::new(config, stores, gossip, log, runner.clone(), clock.clone()).unwrap()));
        }

        // the key is tracked and known to be UP before the nodes start
        log_cluster.set_leader(Some("10.0.0.1:7000"));
        logs[0].apply(LogEntry::set("db1", VALUE).to_bytes().unwrap(), Duration::from_secs(5)).await.unwrap();
        logs[0].apply(LogEntry::notify_status("db1", &Status::Up).to_bytes().unwrap(), Duration::from_secs(5)).await.unwrap();

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for node in &nodes {
            handles.push(tokio::spawn(node.clone().run(cancel.clone())));
        }
        {
            let network = network.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                network.run(Duration::from_secs(1), cancel).await;
                Ok::<(), anyhow::Error>(())
            }));
        }

        TestCluster { log_cluster, shell, nodes, cancel, handles }
    }

    async fn decided_statuses(&self) -> Vec<String> {
        self.log_cluster.entries().await
            .iter()
            .map(|data| LogEntry::try_from_bytes(data).unwrap())
            .filter(|e| e.cmd == LogCommand::NotifyStatus)
            .map(|e| e.value)
            .collect()
    }

    async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            handle.await.unwrap().unwrap();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_down_is_notified_exactly_once() {
    let shell = Arc::new(ScriptedShellRunner::new());
    shell.respond("./verification_script db1", "DOWN\n");
    shell.respond("./notification_script", "ok\n");

    let cluster = TestCluster::start(shell).await;
    sleep(Duration::from_secs(200)).await;

    assert_eq!(cluster.shell.commands_starting_with("./notification_script"), vec![format!("./notification_script db1 {} DOWN", VALUE)]);
    // recorded when the change is decided, and confirmed when the notification finished
    assert_eq!(cluster.decided_statuses().await, vec!["UP".to_string(), "DOWN".to_string(), "DOWN".to_string()]);
    for node in &cluster.nodes {
        assert_eq!(node.stores().consensus.previous_consensus("db1").await, Some(Some(Status::Down)));
        assert_eq!(node.stores().consensus.observation_status("db1", "10.0.0.2:8000").await, Status::Down);
        assert_eq!(node.detector().window("db1").await.map(|w| w.len()), Some(5));
    }

    // a new leader continues from the replicated decision instead of notifying again
    cluster.log_cluster.set_leader(Some("10.0.0.2:7000"));
    sleep(Duration::from_secs(200)).await;
    assert!(cluster.nodes[1].is_leader());
    assert!(!cluster.nodes[0].is_leader());
    assert_eq!(cluster.shell.commands_starting_with("./notification_script").len(), 1);
    assert_eq!(cluster.decided_statuses().await.len(), 3);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_notification_slower_than_event_interval_is_sent_once() {
    let shell = Arc::new(ScriptedShellRunner::new());
    shell.respond("./verification_script db1", "DOWN\n");
    shell.respond("./notification_script", "ok\n");
    let runner = Arc::new(SlowNotificationRunner {
        inner: shell.clone(),
        delay: Duration::from_secs(61),
    });

    let cluster = TestCluster::start_with_runner(shell, runner).await;
    sleep(Duration::from_secs(400)).await;

    assert_eq!(cluster.shell.commands_starting_with("./notification_script"), vec![format!("./notification_script db1 {} DOWN", VALUE)]);
    assert_eq!(cluster.decided_statuses().await, vec!["UP".to_string(), "DOWN".to_string(), "DOWN".to_string()]);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_agreeing_status_is_not_notified() {
    let shell = Arc::new(ScriptedShellRunner::new());
    shell.respond("./verification_script db1", "UP\n");

    let cluster = TestCluster::start(shell).await;
    sleep(Duration::from_secs(200)).await;

    assert!(cluster.shell.commands_starting_with("./notification_script").is_empty());
    assert_eq!(cluster.decided_statuses().await, vec!["UP".to_string()]);
    assert_eq!(cluster.nodes[0].admin().members_consensus().await.ok(), Some(()));

    cluster.stop().await;
}
