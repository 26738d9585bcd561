//! Sliding window of recent call outcomes for a single breaker.
//!
//! The window is bounded two ways: records older than the monitoring period are
//! dropped, then the oldest records beyond the size cap are dropped. Mutation only
//! happens on insert and on explicit pruning; reads filter by the same cutoff without
//! touching the buffer.

use crate::resilience::context::CallContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Outcome of one completed call
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Monotonic insertion time used for pruning
    #[serde(skip)]
    pub recorded_at: Instant,
    pub success: bool,
    pub duration: Duration,
    pub is_slow_call: bool,
    pub error: Option<String>,
    pub context: Option<CallContext>,
}

impl CallRecord {
    pub fn new(
        success: bool,
        duration: Duration,
        slow_call_threshold: Duration,
        error: Option<String>,
        context: Option<CallContext>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            recorded_at: Instant::now(),
            success,
            duration,
            is_slow_call: duration >= slow_call_threshold,
            error,
            context,
        }
    }
}

#[derive(Debug, Default)]
pub struct SlidingWindow {
    records: VecDeque<CallRecord>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, then prune by age and size
    pub fn record(&mut self, record: CallRecord, monitoring_period: Duration, max_size: usize) {
        self.records.push_back(record);
        self.prune(monitoring_period, max_size);
    }

    /// Drop records older than `monitoring_period`, then the oldest beyond `max_size`
    pub fn prune(&mut self, monitoring_period: Duration, max_size: usize) -> usize {
        let before = self.records.len();

        if let Some(cutoff) = Instant::now().checked_sub(monitoring_period) {
            while self
                .records
                .front()
                .is_some_and(|record| record.recorded_at < cutoff)
            {
                self.records.pop_front();
            }
        }

        while self.records.len() > max_size {
            self.records.pop_front();
        }

        before - self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records still inside the monitoring period, without pruning
    pub fn within(&self, monitoring_period: Duration) -> impl Iterator<Item = &CallRecord> {
        let cutoff = Instant::now().checked_sub(monitoring_period);
        self.records
            .iter()
            .filter(move |record| cutoff.map_or(true, |cutoff| record.recorded_at >= cutoff))
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.iter().cloned().collect()
    }
}
