//! Integration tests for the distributed pool, driven by a mock client
//! factory and the in-memory registry. No network involved: reconciliation,
//! selection and shutdown semantics are what is under test.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use distmcp_client::{ClientFactory, DistributedMcpClient, McpAsyncClient, McpTransport};
use distmcp_common::{DistmcpError, Implementation, Result};
use distmcp_discovery::{McpEndpoint, ServerEndpoint, StaticRegistry, PROTOCOL_STREAMABLE};

const SERVER: &str = "test-server";
const VERSION: &str = "1.0.0";

struct MockTransport {
    closed: Arc<AtomicBool>,
    fail_close: bool,
}

#[async_trait]
impl McpTransport for MockTransport {
    async fn request(&self, _method: &str, _params: Value) -> Result<Value> {
        Ok(json!({}))
    }

    async fn notify(&self, _method: &str, _params: Value) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            Err(DistmcpError::Transport("close exploded".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Factory producing offline clients and recording, per network location,
/// how many were built and whether their transport was closed.
#[derive(Default)]
struct MockFactory {
    builds: AtomicUsize,
    closed_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
    fail_close_for: Mutex<Vec<String>>,
    fail_build_for: Mutex<Vec<String>>,
}

impl MockFactory {
    fn location(endpoint: &McpEndpoint) -> String {
        format!("{}:{}", endpoint.address, endpoint.port)
    }

    fn fail_close(&self, location: &str) {
        self.fail_close_for.lock().unwrap().push(location.to_string());
    }

    fn fail_build(&self, location: &str) {
        self.fail_build_for.lock().unwrap().push(location.to_string());
    }

    fn closed(&self, location: &str) -> bool {
        self.closed_flags
            .lock()
            .unwrap()
            .get(location)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn closed_flag(&self, location: &str) -> Arc<AtomicBool> {
        self.closed_flags
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .expect("no client was built for location")
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn build_client(
        &self,
        endpoint: &McpEndpoint,
        _export_path: &str,
    ) -> Result<Arc<McpAsyncClient>> {
        let location = Self::location(endpoint);
        if self.fail_build_for.lock().unwrap().contains(&location) {
            return Err(DistmcpError::ClientConstruction(format!(
                "unreachable endpoint: {}",
                location
            )));
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::new(AtomicBool::new(false));
        self.closed_flags
            .lock()
            .unwrap()
            .insert(location.clone(), closed.clone());

        let fail_close = self.fail_close_for.lock().unwrap().contains(&location);
        let transport = Arc::new(MockTransport { closed, fail_close });
        Ok(Arc::new(McpAsyncClient::new(
            transport,
            Implementation {
                name: format!("mock-{}", location),
                version: "0.0.0".to_string(),
            },
            Duration::from_secs(1),
        )))
    }
}

fn snapshot(locations: &[(&str, u16)]) -> ServerEndpoint {
    snapshot_with(locations, "/mcp", VERSION, PROTOCOL_STREAMABLE)
}

fn snapshot_with(
    locations: &[(&str, u16)],
    export_path: &str,
    version: &str,
    protocol: &str,
) -> ServerEndpoint {
    let endpoints = locations
        .iter()
        .map(|(address, port)| McpEndpoint::new(*address, *port))
        .collect();
    ServerEndpoint::new(endpoints, export_path, protocol, version)
}

async fn pool_with(
    initial: ServerEndpoint,
) -> (DistributedMcpClient, Arc<StaticRegistry>, Arc<MockFactory>) {
    let registry = Arc::new(StaticRegistry::new());
    registry.register(SERVER, VERSION, initial).await;
    let factory = Arc::new(MockFactory::default());
    let pool = DistributedMcpClient::builder(SERVER, VERSION)
        .registry(registry.clone())
        .factory(factory.clone())
        .build()
        .await
        .unwrap();
    (pool, registry, factory)
}

/// Polls `cond` until it holds or ~2 seconds elapse.
async fn eventually<F, Fut>(mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn client_names(clients: &[Arc<McpAsyncClient>]) -> Vec<String> {
    let mut names: Vec<String> = clients
        .iter()
        .map(|client| client.client_info().name.clone())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_init_builds_one_client_per_endpoint() {
    let (pool, _registry, factory) = pool_with(snapshot(&[("a", 1), ("b", 2), ("c", 3)])).await;
    let clients = pool.init().await.unwrap();
    assert_eq!(clients.len(), 3);
    assert_eq!(factory.builds.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_init_is_idempotent_for_duplicate_endpoints() {
    // Same (address, port) twice in the snapshot: one client per key.
    let (pool, _registry, factory) = pool_with(snapshot(&[("a", 1), ("a", 1), ("b", 2)])).await;
    let clients = pool.init().await.unwrap();
    assert_eq!(clients.len(), 2);

    // A second init sees every key present and builds nothing new.
    let clients = pool.init().await.unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_init_fails_fast_on_construction_error() {
    let (pool, _registry, factory) = pool_with(snapshot(&[("bad", 666), ("a", 1)])).await;
    factory.fail_build("bad:666");
    let result = pool.init().await;
    assert!(matches!(result, Err(DistmcpError::ClientConstruction(_))));
}

#[tokio::test]
async fn test_unknown_server_fails_with_discovery_error() {
    let registry = Arc::new(StaticRegistry::new());
    let result = DistributedMcpClient::builder("ghost", VERSION)
        .registry(registry)
        .build()
        .await;
    assert!(matches!(result, Err(DistmcpError::Discovery(_))));
}

#[tokio::test]
async fn test_foreign_protocol_fails_before_building_clients() {
    let registry = Arc::new(StaticRegistry::new());
    registry
        .register(
            SERVER,
            VERSION,
            snapshot_with(&[("a", 1)], "/mcp", VERSION, "mcp-sse"),
        )
        .await;
    let factory = Arc::new(MockFactory::default());
    let result = DistributedMcpClient::builder(SERVER, VERSION)
        .registry(registry)
        .factory(factory.clone())
        .build()
        .await;
    assert!(matches!(
        result,
        Err(DistmcpError::ProtocolMismatch { .. })
    ));
    assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_round_robin_cycles_through_all_clients() {
    let (pool, _registry, _factory) = pool_with(snapshot(&[("a", 1), ("b", 2), ("c", 3)])).await;
    pool.init().await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(pool.select_client().await.unwrap());
    }
    // Three consecutive selections hit three distinct clients.
    for i in 0..seen.len() {
        for j in (i + 1)..seen.len() {
            assert!(!Arc::ptr_eq(&seen[i], &seen[j]));
        }
    }
    // The fourth wraps around to the first.
    let fourth = pool.select_client().await.unwrap();
    assert!(Arc::ptr_eq(&fourth, &seen[0]));
}

#[tokio::test]
async fn test_selection_on_empty_pool_fails() {
    let (pool, _registry, _factory) = pool_with(snapshot(&[])).await;
    pool.init().await.unwrap();
    assert!(matches!(
        pool.select_client().await,
        Err(DistmcpError::NoClientsAvailable(_))
    ));
}

#[tokio::test]
async fn test_incremental_diff_reuses_matching_clients() {
    let (pool, registry, factory) = pool_with(snapshot(&[("a", 1), ("b", 2), ("c", 3)])).await;
    pool.init().await.unwrap();
    pool.subscribe().await.unwrap();

    let before: HashMap<String, Arc<McpAsyncClient>> = pool
        .client_list()
        .await
        .into_iter()
        .map(|client| (client.client_info().name.clone(), client))
        .collect();

    registry
        .publish(SERVER, VERSION, snapshot(&[("b", 2), ("c", 3), ("d", 4)]))
        .await;

    assert!(
        eventually(|| async {
            pool.client_count().await == 3 && factory.closed("a:1")
        })
        .await,
        "reconciliation did not converge"
    );

    let after: HashMap<String, Arc<McpAsyncClient>> = pool
        .client_list()
        .await
        .into_iter()
        .map(|client| (client.client_info().name.clone(), client))
        .collect();

    // b and c kept their exact client instances; a is gone; d is new.
    assert!(Arc::ptr_eq(&before["mock-b:2"], &after["mock-b:2"]));
    assert!(Arc::ptr_eq(&before["mock-c:3"], &after["mock-c:3"]));
    assert!(!after.contains_key("mock-a:1"));
    assert!(after.contains_key("mock-d:4"));
    assert!(!factory.closed("b:2"));
    assert!(!factory.closed("c:3"));
}

#[tokio::test]
async fn test_export_path_change_rebuilds_every_client() {
    let (pool, registry, factory) = pool_with(snapshot(&[("a", 1), ("b", 2)])).await;
    pool.init().await.unwrap();
    pool.subscribe().await.unwrap();

    let before = pool.client_list().await;
    let old_a = factory.closed_flag("a:1");
    let old_b = factory.closed_flag("b:2");

    // Same endpoints, new export path: nothing survives.
    registry
        .publish(
            SERVER,
            VERSION,
            snapshot_with(&[("a", 1), ("b", 2)], "/v2/mcp", VERSION, PROTOCOL_STREAMABLE),
        )
        .await;

    assert!(
        eventually(|| async {
            old_a.load(Ordering::SeqCst) && old_b.load(Ordering::SeqCst)
        })
        .await,
        "old clients were not closed"
    );
    assert_eq!(pool.client_count().await, 2);
    let after = pool.client_list().await;
    assert_eq!(client_names(&after), client_names(&before));
    for old in &before {
        for new in &after {
            assert!(!Arc::ptr_eq(old, new));
        }
    }
    assert_eq!(pool.server_endpoint().await.export_path, "/v2/mcp");
}

#[tokio::test]
async fn test_version_change_rebuilds_every_client() {
    let (pool, registry, factory) = pool_with(snapshot(&[("a", 1)])).await;
    pool.init().await.unwrap();
    pool.subscribe().await.unwrap();

    let old_a = factory.closed_flag("a:1");
    registry
        .publish(
            SERVER,
            VERSION,
            snapshot_with(&[("a", 1)], "/mcp", "2.0.0", PROTOCOL_STREAMABLE),
        )
        .await;

    assert!(eventually(|| async { old_a.load(Ordering::SeqCst) }).await);
    assert_eq!(pool.client_count().await, 1);
    assert_eq!(pool.server_endpoint().await.version, "2.0.0");
}

#[tokio::test]
async fn test_reconciler_ignores_foreign_protocol_snapshots() {
    let (pool, registry, _factory) = pool_with(snapshot(&[("a", 1)])).await;
    pool.init().await.unwrap();
    pool.subscribe().await.unwrap();

    registry
        .publish(
            SERVER,
            VERSION,
            snapshot_with(&[("x", 9)], "/mcp", VERSION, "mcp-sse"),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pool.client_count().await, 1);
    let names = client_names(&pool.client_list().await);
    assert_eq!(names, vec!["mock-a:1".to_string()]);
    // The foreign snapshot must not become current either.
    assert_eq!(pool.server_endpoint().await.version, VERSION);
}

#[tokio::test]
async fn test_failed_endpoint_does_not_abort_reconciliation() {
    let (pool, registry, factory) = pool_with(snapshot(&[("a", 1)])).await;
    pool.init().await.unwrap();
    pool.subscribe().await.unwrap();

    factory.fail_build("bad:666");
    registry
        .publish(SERVER, VERSION, snapshot(&[("a", 1), ("bad", 666), ("b", 2)]))
        .await;

    assert!(
        eventually(|| async { pool.client_count().await == 2 }).await,
        "healthy endpoint was not added"
    );
    let names = client_names(&pool.client_list().await);
    assert_eq!(names, vec!["mock-a:1".to_string(), "mock-b:2".to_string()]);
}

#[tokio::test]
async fn test_subscribe_is_idempotent() {
    let (pool, registry, _factory) = pool_with(snapshot(&[("a", 1)])).await;
    pool.init().await.unwrap();
    pool.subscribe().await.unwrap();
    pool.subscribe().await.unwrap();

    registry
        .publish(SERVER, VERSION, snapshot(&[("a", 1), ("b", 2)]))
        .await;
    assert!(eventually(|| async { pool.client_count().await == 2 }).await);
}

#[tokio::test]
async fn test_close_empties_pool_and_selection_fails() {
    let (pool, _registry, factory) = pool_with(snapshot(&[("a", 1), ("b", 2)])).await;
    pool.init().await.unwrap();

    pool.close().await;

    assert_eq!(pool.client_count().await, 0);
    assert!(factory.closed("a:1"));
    assert!(factory.closed("b:2"));
    assert!(matches!(
        pool.select_client().await,
        Err(DistmcpError::NoClientsAvailable(_))
    ));
}

#[tokio::test]
async fn test_one_failing_close_does_not_block_the_rest() {
    let (pool, _registry, factory) = pool_with(snapshot(&[("a", 1), ("b", 2), ("c", 3)])).await;
    factory.fail_close("b:2");
    pool.init().await.unwrap();

    pool.close_gracefully().await;

    assert_eq!(pool.client_count().await, 0);
    // Every close was attempted, including the failing one.
    assert!(factory.closed("a:1"));
    assert!(factory.closed("b:2"));
    assert!(factory.closed("c:3"));
}

#[tokio::test]
async fn test_fan_out_reaches_every_client() {
    let (pool, _registry, _factory) = pool_with(snapshot(&[("a", 1), ("b", 2)])).await;
    pool.init().await.unwrap();

    pool.add_root(distmcp_common::Root {
        uri: "file:///srv".to_string(),
        name: Some("srv".to_string()),
    })
    .await
    .unwrap();

    for client in pool.client_list().await {
        assert_eq!(client.roots().len(), 1);
    }
}
