//! Shutdown coordination for the broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Broadcast stop signal shared by the server and every background task.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe before spawning the task that needs it; a receiver created
    /// after `trigger` never sees the signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::AcqRel) {
            tracing::info!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Await background tasks after shutdown, logging any that panicked or were
/// cancelled. Returns how many did not exit cleanly.
pub async fn drain_tasks(tasks: Vec<JoinHandle<()>>, what: &str) -> usize {
    let mut failed = 0;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(task = %what, error = %e, "Background task did not exit cleanly");
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_all_subscribers_once() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();

        shutdown.trigger();
        shutdown.trigger();

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
        assert!(a.try_recv().is_err());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_drain_reports_panicked_task() {
        let ok = tokio::spawn(async {});
        let panicked = tokio::spawn(async { panic!("worker blew up") });

        assert_eq!(drain_tasks(vec![ok, panicked], "workers").await, 1);
        assert_eq!(drain_tasks(Vec::new(), "none").await, 0);
    }
}
