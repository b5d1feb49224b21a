//! Per-job control signals.
//!
//! Control operations only *request* a transition: they flip the job's
//! signal, and the dispatcher loop observes whichever value is current at
//! its next batch boundary. Signal reads never block, and concurrent
//! control calls on the same job race safely (last write wins).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};

/// The operator intent currently requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    /// Keep dispatching.
    #[default]
    Run,
    /// Stop at the next batch boundary, keep the checkpoint.
    Pause,
    /// Stop at the next batch boundary, terminally.
    Cancel,
}

/// Registry of control channels, one per job.
#[derive(Clone, Default)]
pub struct ControlRegistry {
    channels: Arc<RwLock<HashMap<String, watch::Sender<ControlSignal>>>>,
}

impl ControlRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and get its signal receiver, resetting any prior
    /// signal to `Run`. Called when a dispatcher task is spawned.
    pub async fn register(&self, job_id: &str) -> watch::Receiver<ControlSignal> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(job_id) {
            let _ = sender.send(ControlSignal::Run);
            return sender.subscribe();
        }

        let (sender, receiver) = watch::channel(ControlSignal::Run);
        channels.insert(job_id.to_string(), sender);
        receiver
    }

    /// Request a signal for a job. A no-op when the job was never
    /// registered (the caller validates status first).
    pub async fn signal(&self, job_id: &str, signal: ControlSignal) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(job_id) {
            let _ = sender.send(signal);
        }
    }

    /// The signal currently requested for a job.
    pub async fn current(&self, job_id: &str) -> ControlSignal {
        let channels = self.channels.read().await;
        channels
            .get(job_id)
            .map_or(ControlSignal::Run, |sender| *sender.borrow())
    }

    /// Drop a job's channel once it is deleted.
    pub async fn remove(&self, job_id: &str) {
        self.channels.write().await.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_signal() {
        let registry = ControlRegistry::new();
        let rx = registry.register("j1").await;
        assert_eq!(*rx.borrow(), ControlSignal::Run);

        registry.signal("j1", ControlSignal::Pause).await;
        assert_eq!(*rx.borrow(), ControlSignal::Pause);
        assert_eq!(registry.current("j1").await, ControlSignal::Pause);
    }

    #[tokio::test]
    async fn test_reregister_resets_to_run() {
        let registry = ControlRegistry::new();
        let _rx = registry.register("j1").await;
        registry.signal("j1", ControlSignal::Pause).await;

        // Resume re-registers; the stale pause must not leak into the new run.
        let rx = registry.register("j1").await;
        assert_eq!(*rx.borrow(), ControlSignal::Run);
    }

    #[tokio::test]
    async fn test_last_signal_wins() {
        let registry = ControlRegistry::new();
        let rx = registry.register("j1").await;

        registry.signal("j1", ControlSignal::Pause).await;
        registry.signal("j1", ControlSignal::Cancel).await;
        assert_eq!(*rx.borrow(), ControlSignal::Cancel);
    }

    #[tokio::test]
    async fn test_unknown_job_defaults_to_run() {
        let registry = ControlRegistry::new();
        assert_eq!(registry.current("nope").await, ControlSignal::Run);
    }
}
