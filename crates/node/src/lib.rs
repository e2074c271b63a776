//! Node assembly.
//!
//! Wires the store, application, and background tasks together. The
//! consensus engine and any RPC surface are external collaborators: they
//! attach to the [`ember_app::ConsensusApp`] interface this node exposes.

pub mod telemetry;

use ember_app::{AppError, Application, Config, ConfigError, Metrics};
use ember_mempool::Mempool;
use ember_store::{KvStore, RocksStore, StoreError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    App(#[from] AppError),
}

/// A fully assembled node: durable store plus application layer.
pub struct Node {
    store: Arc<dyn KvStore>,
    app: Application,
}

impl Node {
    /// Open the store under `config.data_dir` and recover the application
    /// on top of it.
    pub fn build(config: Config) -> Result<Node, NodeError> {
        let store: Arc<dyn KvStore> = Arc::new(RocksStore::open(&config.data_dir)?);
        let app = Application::new(config, store.clone(), Metrics::new())?;
        Ok(Node { store, app })
    }

    /// Build over an existing store (tests, alternate backends).
    pub fn with_store(config: Config, store: Arc<dyn KvStore>) -> Result<Node, NodeError> {
        let app = Application::new(config, store.clone(), Metrics::new())?;
        Ok(Node { store, app })
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut Application {
        &mut self.app
    }

    /// Spawn the periodic mempool sweep (expiry, replay-window cleanup,
    /// stale rate-limiter buckets). The task's lifetime is explicit: it
    /// runs until the returned handle shuts it down.
    pub fn start_mempool_sweep(&self, interval: Duration) -> ShutdownHandle {
        let mempool: Arc<Mempool> = self.app.mempool().clone();
        let (tx, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        mempool.sweep(unix_ms());
                        tracing::trace!(pending = mempool.len(), "mempool sweep");
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("mempool sweep stopped");
        });
        ShutdownHandle {
            tx: Some(tx),
            task: Some(task),
        }
    }

    /// Flush and close the store. The node is unusable afterwards.
    pub fn close(self) -> Result<(), StoreError> {
        self.store.close()
    }
}

/// Stops a background task when asked, aborts it when dropped.
pub struct ShutdownHandle {
    tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ShutdownHandle {
    /// Signal the task to stop and detach.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(true);
        }
        self.task.take();
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_app::ConsensusApp;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::new("ember-test");
        config.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn build_over_rocksdb_and_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let node = Node::build(test_config(dir.path())).unwrap();
            assert_eq!(node.app().info().last_height, 0);
            node.close().unwrap();
        }
        {
            let node = Node::build(test_config(dir.path())).unwrap();
            assert_eq!(node.app().info().last_height, 0);
            node.close().unwrap();
        }
    }

    #[tokio::test]
    async fn mempool_sweep_starts_and_stops() {
        let dir = tempfile::TempDir::new().unwrap();
        let node = Node::build(test_config(dir.path())).unwrap();
        let handle = node.start_mempool_sweep(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown();
        node.close().unwrap();
    }
}
