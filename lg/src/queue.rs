//! Deduplicating pending queue

use std::collections::VecDeque;

use tracing::debug;

use crate::request::Request;

/// Ordered buffer of requests not yet applied to the visible state
///
/// A new request is dropped when it equals the queue tail, or, with the queue
/// empty, the last request applied to the visible state.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    entries: VecDeque<Request>,
    last_applied: Request,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            last_applied: Request::Idle,
        }
    }

    /// Enqueue a request, returning false if it was a duplicate
    pub fn push(&mut self, request: Request) -> bool {
        let reference = self.entries.back().unwrap_or(&self.last_applied);
        if *reference == request {
            debug!(?request, "PendingQueue::push: duplicate of tail, dropping");
            return false;
        }
        self.entries.push_back(request);
        debug!(depth = self.entries.len(), "PendingQueue::push: enqueued");
        true
    }

    /// Pop the head request
    pub fn pop(&mut self) -> Option<Request> {
        self.entries.pop_front()
    }

    /// Skip ahead to the nearest busy request
    ///
    /// Discards every entry in front of it and pops it. Returns the busy request
    /// and how many entries were discarded, or None if no busy entry is queued
    /// (the queue is left untouched in that case).
    pub fn skip_to_busy(&mut self) -> Option<(Request, usize)> {
        let position = self.entries.iter().position(Request::is_busy)?;
        let discarded = self.entries.drain(..position).count();
        let request = self.entries.pop_front()?;
        debug!(discarded, "PendingQueue::skip_to_busy: found busy entry");
        Some((request, discarded))
    }

    /// Record the request whose transition reached the visible state
    pub fn mark_applied(&mut self, request: Request) {
        self.last_applied = request;
    }

    pub fn last_applied(&self) -> &Request {
        &self.last_applied
    }

    /// Drop all queued entries, returning how many there were
    pub fn reset(&mut self) -> usize {
        let dropped = std::mem::take(&mut self.entries).len();
        debug!(dropped, "PendingQueue::reset: called");
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.entries.iter()
    }
}
