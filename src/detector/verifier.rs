use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::consensus::status::Status;
use crate::detector::FailureDetector;


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifyRequest {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifyResult {
    pub key: String,
    pub value: String,
    pub status: Status,
}

/// Determines this node's current status of a tracked key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Verifier: Debug + Send + Sync + 'static {
    async fn verify(&self, request: &VerifyRequest) -> Status;
}


/// Probes a key with the verification script and derives the status from its sample window
#[derive(Debug)]
pub struct ScriptVerifier {
    detector: Arc<FailureDetector>,
}
impl ScriptVerifier {
    pub fn new(detector: Arc<FailureDetector>) -> ScriptVerifier {
        ScriptVerifier { detector }
    }

    pub fn detector(&self) -> Arc<FailureDetector> {
        self.detector.clone()
    }
}

#[async_trait]
impl Verifier for ScriptVerifier {
    async fn verify(&self, request: &VerifyRequest) -> Status {
        self.detector.probe(&request.key, &request.value).await;
        self.detector.derive(&request.key).await
    }
}


/// Verifies incoming requests with at most `pool_size` verifications in flight. On
///  cancellation, no new requests are accepted, and the function returns after verifications
///  in flight finished.
pub async fn run_verification(
    verifier: Arc<dyn Verifier>,
    mut requests: mpsc::Receiver<VerifyRequest>,
    results: mpsc::Sender<VerifyResult>,
    pool_size: usize,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(pool_size));
    let tracker = TaskTracker::new();

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let verifier = verifier.clone();
        let results = results.clone();
        tracker.spawn(async move {
            let status = verifier.verify(&request).await;
            debug!("verified {}: {}", request.key, status);
            if results.send(VerifyResult { key: request.key, value: request.value, status }).await.is_err() {
                warn!("verification result is dropped because the consumer stopped");
            }
            drop(permit);
        });
    }

    tracker.close();
    tracker.wait().await;
    info!("verification workers stopped");
}
