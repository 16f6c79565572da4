//! Main Coordinator task implementation

use std::future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::CoordinatorConfig;
use super::handle::CoordinatorHandle;
use super::messages::CoordRequest;
use super::shared::Shared;

/// The Coordinator drives the timers of one shared [`Machine`](crate::machine::Machine)
///
/// One instance per UI root. Instances never share state.
pub struct Coordinator {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<CoordRequest>,
    rx: mpsc::UnboundedReceiver<CoordRequest>,
}

impl Coordinator {
    /// Create a new Coordinator with the given configuration
    pub fn new(config: CoordinatorConfig) -> Self {
        debug!(?config, "Coordinator::new: called");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared::new(&config)),
            tx,
            rx,
        }
    }

    /// Create a Coordinator and spawn it on the current runtime
    pub fn spawn(config: CoordinatorConfig) -> (CoordinatorHandle, JoinHandle<()>) {
        let coordinator = Self::new(config);
        let handle = coordinator.handle();
        let task = tokio::spawn(coordinator.run());
        (handle, task)
    }

    /// Create a handle for callers
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.tx.clone(), self.shared.clone())
    }

    /// Run the Coordinator task
    ///
    /// This consumes the Coordinator and runs until shutdown is requested.
    pub async fn run(self) {
        let Self { shared, tx, mut rx } = self;
        // Only handles and guards keep the channel open from here on
        drop(tx);

        info!("Coordinator started");

        loop {
            let deadline = shared.fire_due(Instant::now());

            // Pending messages win over timers
            tokio::select! {
                biased;

                req = rx.recv() => match req {
                    Some(CoordRequest::Flush { reply_tx }) => {
                        shared.fire_due(Instant::now());
                        let _ = reply_tx.send(());
                    }
                    Some(CoordRequest::GetMetrics { reply_tx }) => {
                        shared.fire_due(Instant::now());
                        let _ = reply_tx.send(shared.metrics());
                    }
                    Some(CoordRequest::Shutdown) => {
                        info!("Coordinator shutdown requested");
                        break;
                    }
                    None => {
                        debug!("Coordinator::run: all senders dropped");
                        break;
                    }
                },

                _ = shared.rearmed() => {
                    debug!("Coordinator::run: deadlines moved");
                }

                _ = next_deadline(deadline) => {}
            }
        }

        info!("Coordinator stopped");
    }
}

async fn next_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}
