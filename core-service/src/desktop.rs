//! Desktop bootstrap: HTTP source, in-process broker and a SQLite file or memory database.

use std::sync::Arc;

use bridge_desktop::{HttpFaultSource, InMemoryBroker};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{CoreError, FaultSyncConfig, FaultSyncService, Result, SyncDependencies};

/// Connections for file databases; in-memory databases are private per connection
const FILE_DATABASE_CONNECTIONS: u32 = 5;

/// A desktop pipeline whose broker dispatchers run in the background.
pub struct DesktopSync {
    service: FaultSyncService,
    broker: Arc<InMemoryBroker>,
    shutdown: CancellationToken,
    dispatchers: Vec<JoinHandle<()>>,
}

impl DesktopSync {
    pub fn service(&self) -> &FaultSyncService {
        &self.service
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    /// Stop the worker pool and the broker dispatchers.
    pub async fn shutdown(self) {
        self.service.shutdown().await;
        self.shutdown.cancel();
        for dispatcher in self.dispatchers {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Broker dispatcher ended abnormally");
            }
        }
    }
}

/// Bootstrap the pipeline with desktop bridges.
///
/// Requires `source_base_url` in the config.
pub async fn bootstrap_desktop(config: FaultSyncConfig) -> Result<DesktopSync> {
    let base_url = config
        .source_base_url
        .clone()
        .ok_or_else(|| CoreError::CapabilityMissing {
            capability: "fault_source".to_string(),
            message: "source_base_url is not configured".to_string(),
        })?;

    let source = Arc::new(HttpFaultSource::new(base_url, config.source_timeout())?);
    let broker = Arc::new(InMemoryBroker::new());

    let max_connections = if config.database_url.contains(":memory:") {
        1
    } else {
        FILE_DATABASE_CONNECTIONS
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| CoreError::InitializationFailed(format!("Database connection failed: {}", e)))?;

    let service =
        FaultSyncService::bootstrap(config, SyncDependencies::new(source, broker.clone(), pool))
            .await?;

    let shutdown = CancellationToken::new();
    let dispatchers = broker.start(shutdown.clone());
    info!(dispatchers = dispatchers.len(), "Desktop sync pipeline started");

    Ok(DesktopSync {
        service,
        broker,
        shutdown,
        dispatchers,
    })
}
