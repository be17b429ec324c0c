//! Block and pipeline traits
//!
//! A block receives batches of signals from the pipeline and hands its
//! output back through a [`SignalNotifier`]. Everything a block needs from
//! its host is passed once, at configuration time, in a [`BlockContext`].

use async_trait::async_trait;
use docdb::ConnectionFactory;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::BlockResult;
use crate::signal::Signal;

/// Downstream side of the pipeline
#[async_trait]
pub trait SignalNotifier: Send + Sync {
    /// Deliver a batch downstream; order within the batch is preserved
    async fn notify_signals(&self, signals: Vec<Signal>);
}

/// Notifier forwarding batches over a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Vec<Signal>>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<Signal>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Wrap an existing sender
    pub fn from_sender(tx: mpsc::Sender<Vec<Signal>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SignalNotifier for ChannelNotifier {
    async fn notify_signals(&self, signals: Vec<Signal>) {
        let count = signals.len();
        if self.tx.send(signals).await.is_err() {
            warn!(signals = count, "Downstream receiver closed, dropping signals");
        }
    }
}

/// What a block gets from its host when configured
#[derive(Clone)]
pub struct BlockContext {
    /// Block instance name, used in logs
    pub name: String,
    /// Where output signals go
    pub notifier: Arc<dyn SignalNotifier>,
    /// How database connections are opened
    pub factory: Arc<dyn ConnectionFactory>,
}

impl BlockContext {
    /// Create a context
    pub fn new(
        name: impl Into<String>,
        notifier: Arc<dyn SignalNotifier>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            notifier,
            factory,
        }
    }
}

/// A configured pipeline block
#[async_trait]
pub trait Block: Send + Sync {
    /// Block type identifier (e.g. `docdb-delete`)
    fn block_type(&self) -> &'static str;

    /// Instance name
    fn name(&self) -> &str;

    /// Process one batch delivered by the pipeline
    async fn process_signals(&self, signals: Vec<Signal>) -> BlockResult<()>;

    /// Release resources held across batches
    async fn stop(&self) -> BlockResult<()> {
        Ok(())
    }
}
