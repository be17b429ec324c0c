//! Connection acquisition policy
//!
//! Blocks never open connections themselves; they lease them from a
//! [`ConnectionManager`]. The manager either opens a fresh connection for
//! every lease and closes it on release ([`ConnectionMode::PerRecord`]), or
//! hands out one long-lived connection that is re-established when it stops
//! being valid ([`ConnectionMode::Shared`]).

use docdb::{Connection, ConnectionConfig, ConnectionFactory};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{BlockError, BlockResult};

/// How connections are acquired for each record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Open a new connection per record and close it afterwards
    PerRecord,
    /// Reuse one connection across records and batches
    Shared,
}

/// A connection borrowed from a [`ConnectionManager`]
///
/// Per-record leases own their connection and close it when released. A
/// lease dropped without [`Lease::release`] (the record future was cancelled
/// or panicked) still closes it, on a spawned task. Shared leases never close.
pub struct Lease {
    conn: Option<Arc<dyn Connection>>,
    scoped: bool,
}

impl Lease {
    fn scoped(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            scoped: true,
        }
    }

    fn shared(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            scoped: false,
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &dyn Connection {
        &**self
    }

    /// Return the connection, closing it if the lease is per-record
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.scoped {
            close_quietly(conn).await;
        }
    }
}

impl Deref for Lease {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // only `release` and `drop` take the connection, and both consume the lease
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("lease used after release"),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !self.scoped {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Lease dropped before release, closing connection");
                handle.spawn(close_quietly(conn));
            }
            Err(_) => warn!("Lease dropped outside a runtime, connection left open"),
        }
    }
}

async fn close_quietly(conn: Arc<dyn Connection>) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close connection");
    }
}

/// Hands out connections according to a [`ConnectionMode`]
pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    mode: ConnectionMode,
    shared: Mutex<Option<Arc<dyn Connection>>>,
}

impl ConnectionManager {
    /// Create a manager; no connection is opened until the first lease
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        config: ConnectionConfig,
        mode: ConnectionMode,
    ) -> Self {
        Self {
            factory,
            config,
            mode,
            shared: Mutex::new(None),
        }
    }

    /// Acquisition mode
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Connection settings
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Lease a connection
    pub async fn acquire(&self) -> BlockResult<Lease> {
        match self.mode {
            ConnectionMode::PerRecord => Ok(Lease::scoped(Arc::from(self.connect().await?))),
            ConnectionMode::Shared => {
                let mut shared = self.shared.lock().await;
                if let Some(conn) = shared.as_ref() {
                    if conn.is_valid().await {
                        return Ok(Lease::shared(conn.clone()));
                    }
                    debug!(address = %self.config.address(), "Shared connection lost, reconnecting");
                }

                let conn: Arc<dyn Connection> = Arc::from(self.connect().await?);
                *shared = Some(conn.clone());
                Ok(Lease::shared(conn))
            }
        }
    }

    /// Close the shared connection, if one is open
    pub async fn close(&self) -> BlockResult<()> {
        let conn = self.shared.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await?;
        }
        Ok(())
    }

    async fn connect(&self) -> BlockResult<Box<dyn Connection>> {
        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.factory.connect(&self.config)).await {
            Ok(Ok(conn)) => {
                debug!(
                    address = %self.config.address(),
                    database = %self.config.database,
                    backend = self.factory.backend(),
                    "Connected"
                );
                Ok(conn)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BlockError::Timeout(format!(
                "connecting to {} timed out after {}ms",
                self.config.address(),
                self.config.connect_timeout_ms
            ))),
        }
    }
}
