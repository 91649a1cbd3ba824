//! Turns the noisy outcomes of the verification script into a stable per-node status: the
//!  detector only reports a status once the most recent samples agree unanimously.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::HaConfig;
use crate::consensus::status::Status;
use crate::shell::ShellRunner;
use crate::util::clock::Clock;
use crate::util::windowed::{Sample, WindowedSampler};

pub mod verifier;

/// the outcome recorded for a verification run that printed nothing
pub const EMPTY_OUTCOME: &str = "EMPTY";


#[derive(Debug)]
pub struct FailureDetector {
    verification_script: String,
    script_timeout: Duration,
    window_size: usize,
    min_samples: usize,
    shell: Arc<dyn ShellRunner>,
    clock: Arc<dyn Clock>,
    /// one lock per key's window, the map lock is only held to look windows up
    windows: RwLock<FxHashMap<String, Arc<Mutex<WindowedSampler>>>>,
}

impl FailureDetector {
    pub fn new(config: &HaConfig, shell: Arc<dyn ShellRunner>, clock: Arc<dyn Clock>) -> FailureDetector {
        let window_size = config.window_size.max(1);
        FailureDetector {
            verification_script: config.verification_script.clone(),
            script_timeout: config.script_timeout,
            window_size,
            min_samples: config.min_samples.clamp(1, window_size),
            shell,
            clock,
            windows: Default::default(),
        }
    }

    /// Runs the verification script for a key and records its outcome as a new sample.
    ///  Script failures are logged: whatever the script printed is still the outcome.
    pub async fn probe(&self, key: &str, value: &str) {
        let command = format!("{} {} {}", self.verification_script, key, value);
        let output = self.shell.run(&command, self.script_timeout).await;

        if !output.stderr.is_empty() {
            warn!("verification of {} printed to stderr: {}", key, output.stderr.trim_end());
        }
        if let Some(error) = &output.error {
            warn!("verification of {} failed: {}", key, error);
        }

        let outcome = output.stdout.strip_suffix('\n')
            .unwrap_or(&output.stdout);
        let outcome = if outcome.is_empty() { EMPTY_OUTCOME } else { outcome };
        debug!("probed {}: {}", key, outcome);

        let sample = Sample::new(outcome, self.clock.now());
        self.window_for_update(key).await
            .lock().await
            .push(sample);
    }

    async fn window_lock(&self, key: &str) -> Option<Arc<Mutex<WindowedSampler>>> {
        self.windows.read().await
            .get(key)
            .cloned()
    }

    async fn window_for_update(&self, key: &str) -> Arc<Mutex<WindowedSampler>> {
        if let Some(window) = self.window_lock(key).await {
            return window;
        }
        self.windows.write().await
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(WindowedSampler::new(self.window_size))))
            .clone()
    }

    /// The status of a key based on its most recent `min_samples` samples: their common outcome
    ///  if they all agree, otherwise a marker for the kind of disagreement.
    pub async fn derive(&self, key: &str) -> Status {
        let Some(window) = self.window_lock(key).await else {
            return Status::LessThanMinSample;
        };
        let recent = {
            let window = window.lock().await;
            if window.len() < self.min_samples {
                return Status::LessThanMinSample;
            }
            window.last_n(self.min_samples)
        };

        let first = &recent[0].status;
        if recent.iter().all(|s| &s.status == first) {
            return Status::from(first.as_str());
        }

        if recent.iter().any(|s| s.status == EMPTY_OUTCOME) {
            Status::NotFillSamples
        }
        else {
            Status::NoEmptyInSamples
        }
    }

    pub async fn windows(&self) -> BTreeMap<String, Vec<Sample>> {
        let windows = self.windows.read().await
            .iter()
            .map(|(k, w)| (k.clone(), w.clone()))
            .collect::<Vec<_>>();

        let mut result = BTreeMap::new();
        for (key, window) in windows {
            result.insert(key, window.lock().await.samples());
        }
        result
    }

    pub async fn window(&self, key: &str) -> Option<Vec<Sample>> {
        let window = self.window_lock(key).await?;
        let samples = window.lock().await.samples();
        Some(samples)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.windows.read().await
            .keys()
            .cloned()
            .collect()
    }

    pub async fn remove_key(&self, key: &str) {
        if self.windows.write().await.remove(key).is_some() {
            debug!("removed sample window for {}", key);
        }
    }
}
