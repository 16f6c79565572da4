//! CoordinatorHandle - Client interface for submitting busy/idle requests

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::messages::{CoordRequest, CoordinatorError, CoordinatorMetrics};
use super::shared::Shared;
use crate::machine::Event;
use crate::request::Request;
use crate::state::VisibleState;

/// Handle for callers to interact with the Coordinator
///
/// This handle is cloneable and is passed down to whatever starts async work.
/// Submitting never blocks on the Coordinator task or awaits.
#[derive(Clone)]
pub struct CoordinatorHandle {
    /// Sender to the Coordinator task
    tx: mpsc::UnboundedSender<CoordRequest>,

    shared: Arc<Shared>,

    /// Latest visible state
    state_rx: watch::Receiver<VisibleState>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CoordRequest>, shared: Arc<Shared>) -> Self {
        debug!("CoordinatorHandle::new: called");
        let state_rx = shared.subscribe();
        Self { tx, shared, state_rx }
    }

    /// Submit a request
    ///
    /// A quiet coordinator applies it before this returns, so
    /// [`current_state`](Self::current_state) already reflects it.
    pub fn submit(&self, request: Request) -> Result<(), CoordinatorError> {
        debug!(?request, "CoordinatorHandle::submit: called");
        self.ensure_running()?;
        self.shared.handle(Event::Submit(request));
        Ok(())
    }

    /// Submit a busy request with a description
    pub fn busy(&self, meta: impl Into<String>) -> Result<(), CoordinatorError> {
        self.submit(Request::busy(meta))
    }

    /// Submit an idle request
    pub fn idle(&self) -> Result<(), CoordinatorError> {
        self.submit(Request::idle())
    }

    /// Submit a busy request and return a guard that submits idle when dropped
    ///
    /// The coordinator does not count overlapping guards: whichever request is
    /// submitted last wins, exactly as with paired `busy`/`idle` calls.
    pub fn begin(&self, meta: impl Into<String>) -> Result<BusyGuard, CoordinatorError> {
        self.begin_with(Request::busy(meta))
    }

    /// Like [`begin`](Self::begin) with an explicit busy request
    pub fn begin_with(&self, request: Request) -> Result<BusyGuard, CoordinatorError> {
        debug!(?request, "CoordinatorHandle::begin_with: called");
        self.submit(request)?;
        Ok(BusyGuard {
            handle: self.clone(),
            released: false,
        })
    }

    /// Snapshot of the visible state
    pub fn current_state(&self) -> VisibleState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to visible state changes
    pub fn subscribe(&self) -> watch::Receiver<VisibleState> {
        debug!("CoordinatorHandle::subscribe: called");
        self.state_rx.clone()
    }

    /// Reset the pending queue for a new owning context
    pub fn reattach(&self) -> Result<(), CoordinatorError> {
        debug!("CoordinatorHandle::reattach: called");
        self.ensure_running()?;
        self.shared.handle(Event::Reattach);
        Ok(())
    }

    /// Wait until the Coordinator has fired every timer already due
    pub async fn flush(&self) -> Result<(), CoordinatorError> {
        debug!("CoordinatorHandle::flush: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::Flush { reply_tx })
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    /// Get current coordinator metrics
    pub async fn metrics(&self) -> Result<CoordinatorMetrics, CoordinatorError> {
        debug!("CoordinatorHandle::metrics: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::GetMetrics { reply_tx })
            .map_err(|_| CoordinatorError::ChannelClosed)?;

        debug!("CoordinatorHandle::metrics: waiting for reply");
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    /// Request shutdown of the Coordinator
    pub fn shutdown(&self) -> Result<(), CoordinatorError> {
        debug!("CoordinatorHandle::shutdown: called");
        self.tx
            .send(CoordRequest::Shutdown)
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    fn ensure_running(&self) -> Result<(), CoordinatorError> {
        if self.tx.is_closed() {
            return Err(CoordinatorError::ChannelClosed);
        }
        Ok(())
    }
}

/// Scoped busy period: submits the matching idle request when dropped
#[must_use = "dropping the guard immediately submits idle"]
pub struct BusyGuard {
    handle: CoordinatorHandle,
    released: bool,
}

impl BusyGuard {
    /// Submit the idle request now
    pub fn release(mut self) -> Result<(), CoordinatorError> {
        self.released = true;
        self.handle.idle()
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.handle.idle().is_err() {
            warn!("BusyGuard::drop: coordinator gone, idle request dropped");
        }
    }
}
