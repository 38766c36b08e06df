//! Connection pool management.
//!
//! # Responsibilities
//! - Hold at most one connection per destination id
//! - Create connections lazily, single-flight per id
//! - Evict connections whose process has exited
//! - Tear connections down individually or all at once
//! - Refuse new connections once the pool is shut down

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};

use crate::config::{CircuitBreakerConfig, DestinationConfig};
use crate::observability::metrics;
use crate::pool::connection::DownstreamConnection;
use crate::protocol::{ClientError, Connector};

type ConnectResult = Result<Arc<DownstreamConnection>, ClientError>;
type SharedConnect = Shared<BoxFuture<'static, ConnectResult>>;

enum Slot {
    Ready(Arc<DownstreamConnection>),
    /// A creation in flight; every caller for the id awaits the same future.
    Connecting { generation: u64, future: SharedConnect },
}

/// Registry of downstream connections keyed by destination id.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    slots: DashMap<String, Slot>,
    next_generation: AtomicU64,
    closing: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("active", &self.active_connection_count())
            .field("tracked", &self.slots.len())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            next_generation: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        }
    }

    /// Return the connection for `destination`, creating it if needed.
    ///
    /// Concurrent first calls share one spawn + handshake. A failed
    /// creation stores nothing, so the next call tries again.
    pub async fn create_connection(
        &self,
        destination: &DestinationConfig,
        breaker_config: &CircuitBreakerConfig,
    ) -> ConnectResult {
        let id = destination.id.as_str();
        if self.is_closing() {
            return Err(ClientError::Closed {
                server: id.to_string(),
            });
        }
        let mut dead: Option<Arc<DownstreamConnection>> = None;

        let (generation, future) = match self.slots.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Slot::Connecting { generation, future } = occupied.get() {
                    (*generation, future.clone())
                } else {
                    if let Slot::Ready(conn) = occupied.get() {
                        if conn.is_alive() {
                            return Ok(Arc::clone(conn));
                        }
                        dead = Some(Arc::clone(conn));
                    }
                    let (generation, future) = self.begin_connect(destination, breaker_config);
                    occupied.insert(Slot::Connecting {
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
            Entry::Vacant(vacant) => {
                let (generation, future) = self.begin_connect(destination, breaker_config);
                vacant.insert(Slot::Connecting {
                    generation,
                    future: future.clone(),
                });
                (generation, future)
            }
        };

        if let Some(conn) = dead {
            tracing::warn!(destination = %id, age = ?conn.age(), "Downstream process exited, reconnecting");
            conn.close().await;
        }

        let outcome = future.await;
        self.settle(id, generation, outcome).await
    }

    fn begin_connect(
        &self,
        destination: &DestinationConfig,
        breaker_config: &CircuitBreakerConfig,
    ) -> (u64, SharedConnect) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let connector = Arc::clone(&self.connector);
        let destination = destination.clone();
        let breaker_config = breaker_config.clone();

        let future = async move {
            tracing::info!(
                destination = %destination.id,
                command = %destination.command,
                args = ?destination.args,
                "Connecting to downstream server"
            );
            let client = connector.connect(&destination).await?;
            Ok(Arc::new(DownstreamConnection::new(
                destination.id.clone(),
                client,
                breaker_config,
            )))
        }
        .boxed()
        .shared();

        (generation, future)
    }

    /// Publish the outcome of creation `generation` for `id`.
    ///
    /// Every waiter calls this; only the first one changes the slot. A
    /// connection whose slot was closed while it was being created is
    /// torn down instead of published.
    async fn settle(&self, id: &str, generation: u64, outcome: ConnectResult) -> ConnectResult {
        let conn = match outcome {
            Ok(conn) => conn,
            Err(e) => {
                let removed = self.slots.remove_if(id, |_, slot| {
                    matches!(slot, Slot::Connecting { generation: g, .. } if *g == generation)
                });
                if removed.is_some() {
                    tracing::error!(destination = %id, error = %e, "Failed to connect to downstream server");
                }
                return Err(e);
            }
        };

        if self.is_closing() {
            self.slots.remove_if(id, |_, slot| {
                matches!(slot, Slot::Connecting { generation: g, .. } if *g == generation)
            });
        }

        let published = match self.slots.get_mut(id) {
            Some(mut slot) => {
                let ours = matches!(&*slot, Slot::Connecting { generation: g, .. } if *g == generation);
                if ours {
                    *slot = Slot::Ready(Arc::clone(&conn));
                    tracing::info!(destination = %id, "Downstream server connected");
                    true
                } else if let Slot::Ready(existing) = &*slot {
                    Arc::ptr_eq(existing, &conn)
                } else {
                    false
                }
            }
            None => false,
        };
        metrics::set_active_connections(self.active_connection_count());

        if published {
            Ok(conn)
        } else {
            tracing::debug!(destination = %id, "Connection closed while it was being created");
            conn.close().await;
            Err(ClientError::Closed {
                server: id.to_string(),
            })
        }
    }

    /// Cached connection for `id`, without creating one.
    pub fn get_connection(&self, id: &str) -> Option<Arc<DownstreamConnection>> {
        match self.slots.get(id).as_deref() {
            Some(Slot::Ready(conn)) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    /// Close and forget the connection for `id`. Does nothing if absent.
    pub async fn close_connection(&self, id: &str) {
        let Some((_, slot)) = self.slots.remove(id) else {
            return;
        };

        match slot {
            Slot::Ready(conn) => {
                conn.close().await;
                tracing::info!(destination = %id, "Downstream connection closed");
            }
            Slot::Connecting { .. } => {
                tracing::debug!(destination = %id, "Abandoned in-flight connection");
            }
        }
        metrics::set_active_connections(self.active_connection_count());
    }

    /// Close every tracked connection concurrently and stop creating new ones.
    pub async fn close_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        tracing::info!(count = ids.len(), "Closing all downstream connections");
        join_all(ids.iter().map(|id| self.close_connection(id))).await;
    }

    /// Whether [`close_all`](Self::close_all) has run.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Number of established connections.
    pub fn active_connection_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready(_)))
            .count()
    }

    /// Ids of established connections.
    pub fn all_server_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready(_)))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of established connections.
    pub fn connections(&self) -> Vec<Arc<DownstreamConnection>> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(conn) => Some(Arc::clone(conn)),
                Slot::Connecting { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeServer};
    use std::time::Duration;

    fn destination(id: &str) -> DestinationConfig {
        DestinationConfig::new(id, "fake")
    }

    fn pool_with(connector: &Arc<FakeConnector>) -> ConnectionPool {
        ConnectionPool::new(Arc::clone(connector) as Arc<dyn Connector>)
    }

    #[tokio::test]
    async fn test_create_twice_returns_same_instance() {
        let connector = Arc::new(FakeConnector::new().with_server("a", FakeServer::default()));
        let pool = pool_with(&connector);
        let breaker = CircuitBreakerConfig::default();

        let first = pool.create_connection(&destination("a"), &breaker).await.unwrap();
        let second = pool.create_connection(&destination("a"), &breaker).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_count("a"), 1);
        assert_eq!(pool.active_connection_count(), 1);
        assert_eq!(pool.all_server_ids(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_creation_is_single_flight() {
        let connector = Arc::new(
            FakeConnector::new()
                .with_server("a", FakeServer::default())
                .with_connect_delay(Duration::from_millis(200)),
        );
        let pool = pool_with(&connector);
        let breaker = CircuitBreakerConfig::default();
        let dest = destination("a");

        let results = join_all((0..8).map(|_| pool.create_connection(&dest, &breaker))).await;

        let conns: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
        assert_eq!(connector.connect_count("a"), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_stores_nothing() {
        let connector = Arc::new(FakeConnector::new().with_failing_connect("a"));
        let pool = pool_with(&connector);
        let breaker = CircuitBreakerConfig::default();

        assert!(pool.create_connection(&destination("a"), &breaker).await.is_err());
        assert!(pool.get_connection("a").is_none());
        assert_eq!(pool.active_connection_count(), 0);

        assert!(pool.create_connection(&destination("a"), &breaker).await.is_err());
        assert_eq!(connector.connect_count("a"), 2, "next call retries");
    }

    #[tokio::test]
    async fn test_close_connection_is_idempotent() {
        let connector = Arc::new(FakeConnector::new().with_server("a", FakeServer::default()));
        let pool = pool_with(&connector);
        let conn = pool
            .create_connection(&destination("a"), &CircuitBreakerConfig::default())
            .await
            .unwrap();

        pool.close_connection("a").await;
        pool.close_connection("a").await;
        pool.close_connection("never-created").await;

        assert!(!conn.is_connected());
        assert!(pool.get_connection("a").is_none());
        assert_eq!(connector.close_count("a"), 1);
    }

    #[tokio::test]
    async fn test_dead_connection_is_replaced() {
        let connector = Arc::new(FakeConnector::new().with_server("a", FakeServer::default()));
        let pool = pool_with(&connector);
        let breaker = CircuitBreakerConfig::default();

        let first = pool.create_connection(&destination("a"), &breaker).await.unwrap();
        connector.kill("a");
        assert!(!first.is_alive());

        let second = pool.create_connection(&destination("a"), &breaker).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.is_connected());
        assert_eq!(connector.connect_count("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_creation_discards_result() {
        let connector = Arc::new(
            FakeConnector::new()
                .with_server("a", FakeServer::default())
                .with_connect_delay(Duration::from_millis(100)),
        );
        let pool = Arc::new(pool_with(&connector));

        let creating = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.create_connection(&destination("a"), &CircuitBreakerConfig::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.close_connection("a").await;

        let result = creating.await.unwrap();
        assert!(matches!(result, Err(ClientError::Closed { .. })));
        assert_eq!(pool.active_connection_count(), 0);
        assert_eq!(connector.close_count("a"), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let connector = Arc::new(
            FakeConnector::new()
                .with_server("a", FakeServer::default())
                .with_server("b", FakeServer::default()),
        );
        let pool = pool_with(&connector);
        let breaker = CircuitBreakerConfig::default();
        pool.create_connection(&destination("a"), &breaker).await.unwrap();
        pool.create_connection(&destination("b"), &breaker).await.unwrap();
        assert_eq!(pool.connections().len(), 2);

        pool.close_all().await;
        assert_eq!(pool.active_connection_count(), 0);
        assert_eq!(connector.close_count("a"), 1);
        assert_eq!(connector.close_count("b"), 1);
    }

    #[tokio::test]
    async fn test_no_connections_after_close_all() {
        let connector = Arc::new(FakeConnector::new().with_server("a", FakeServer::default()));
        let pool = pool_with(&connector);
        let breaker = CircuitBreakerConfig::default();
        pool.create_connection(&destination("a"), &breaker).await.unwrap();

        pool.close_all().await;
        assert!(pool.is_closing());

        let err = pool.create_connection(&destination("a"), &breaker).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed { .. }));
        assert_eq!(connector.connect_count("a"), 1);
        assert_eq!(pool.active_connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_in_flight_at_close_all_is_discarded() {
        let connector = Arc::new(
            FakeConnector::new()
                .with_server("a", FakeServer::default())
                .with_connect_delay(Duration::from_millis(100)),
        );
        let pool = Arc::new(pool_with(&connector));

        let creating = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.create_connection(&destination("a"), &CircuitBreakerConfig::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.close_all().await;

        assert!(creating.await.unwrap().is_err());
        assert_eq!(pool.active_connection_count(), 0);
        assert_eq!(connector.close_count("a"), 1);
    }
}
