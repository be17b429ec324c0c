//! Test utilities for blocks
//!
//! [`CollectingNotifier`] stands in for the pipeline and records every batch
//! a block notifies, so tests can assert on output order and content.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::block::SignalNotifier;
use crate::signal::Signal;

/// Notifier that records every notified batch
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    batches: Mutex<Vec<Vec<Signal>>>,
}

impl CollectingNotifier {
    /// Create an empty notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches in notification order
    pub fn batches(&self) -> Vec<Vec<Signal>> {
        self.batches.lock().clone()
    }

    /// All notified signals, flattened
    pub fn signals(&self) -> Vec<Signal> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of notify calls
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

#[async_trait]
impl SignalNotifier for CollectingNotifier {
    async fn notify_signals(&self, signals: Vec<Signal>) {
        self.batches.lock().push(signals);
    }
}
