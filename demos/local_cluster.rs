use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use haconsensus::config::HaConfig;
use haconsensus::gossip::memory::MemoryGossipNetwork;
use haconsensus::node::{HaNode, HaStores};
use haconsensus::replication::memory::MemoryLogCluster;
use haconsensus::shell::ProcessShellRunner;
use haconsensus::util::clock::SystemClock;

/// Runs a three node cluster in a single process, with real verification and notification
///  scripts
#[derive(Parser)]
struct Args {
    /// tracked keys as `key=value`
    #[clap(long, required = true)]
    key: Vec<String>,

    #[clap(long, default_value = "./verification_script")]
    verification_script: String,

    #[clap(long, default_value = "./notification_script")]
    notification_script: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut keys = Vec::new();
    for k in &args.key {
        let (key, value) = k.split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, was {}", k))?;
        keys.push((key.to_string(), value.to_string()));
    }

    let network = MemoryGossipNetwork::new();
    let log_cluster = MemoryLogCluster::new();
    let shell = Arc::new(ProcessShellRunner::default());
    let clock = Arc::new(SystemClock::default());

    let mut nodes = Vec::new();
    for i in 1..=3 {
        let mut config = HaConfig::new(format!("127.0.0.{}:8000", i));
        config.node_name = format!("node{}", i);
        config.log_bind_addr = format!("127.0.0.{}:7000", i);
        config.verification_script = args.verification_script.clone();
        config.notification_script = args.notification_script.clone();

        let gossip = network.node(&config.gossip_bind_addr);
        let stores = HaStores::new(gossip.clone());
        let log = log_cluster.replica(&config.log_bind_addr, stores.state_machine()).await?;
        nodes.push(Arc::new(HaNode::new(config, stores, gossip, log, shell.clone(), clock.clone())?));
    }
    log_cluster.set_leader(Some("127.0.0.1:7000"));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    for node in &nodes {
        handles.push(tokio::spawn(node.clone().run(cancel.clone())));
    }
    tokio::spawn(network.clone().run(Duration::from_secs(1), cancel.clone()));

    // wait for the leadership listener before writing
    sleep(Duration::from_millis(100)).await;
    let admin = nodes[0].admin();
    for (key, value) in &keys {
        admin.set(key, value).await?;
    }

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep(Duration::from_secs(30)) => {
                info!("consensus: {}", serde_json::to_string_pretty(&admin.consensus().await)?);
            }
        }
    }

    cancel.cancel();
    for handle in handles {
        handle.await??;
    }
    Ok(())
}
