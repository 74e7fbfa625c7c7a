// src/interception/correlation.rs
//! Request/response correlation
//!
//! Pending requests are keyed by their unique [`RequestId`], never by URL, so
//! concurrent requests to the same URL keep independent timings. The table is
//! safe to share between sources delivering events from different threads.

use crate::interception::source::{RequestEvent, RequestId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A request that has started but not yet completed
#[derive(Debug, Clone)]
pub struct PendingCorrelation {
    pub request: Arc<RequestEvent>,
    pub started_at: Instant,
}

impl PendingCorrelation {
    pub fn new(request: Arc<RequestEvent>) -> Self {
        Self {
            request,
            started_at: Instant::now(),
        }
    }

    /// Milliseconds from start to `now`
    pub fn elapsed_ms(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started_at).as_secs_f64() * 1000.0
    }
}

#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<RequestId, PendingCorrelation>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started request; a live entry with the same id is replaced
    pub fn insert(&self, request: Arc<RequestEvent>) {
        let id = request.id.clone();
        if self
            .pending
            .insert(id.clone(), PendingCorrelation::new(request))
            .is_some()
        {
            debug!("Replaced pending correlation for request {}", id);
        }
    }

    /// Remove and return the entry for `id`
    pub fn take(&self, id: &RequestId) -> Option<PendingCorrelation> {
        self.pending.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
