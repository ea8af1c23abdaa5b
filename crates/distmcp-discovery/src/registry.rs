use async_trait::async_trait;
use distmcp_common::{DistmcpError, Result};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::endpoint::ServerEndpoint;

/// Capacity of a subscription channel. Snapshots are small and pushes are
/// rare; a slow reconciler only ever delays newer snapshots, it cannot
/// deadlock the registry.
const SUBSCRIPTION_BUFFER: usize = 16;

/// Discovery collaborator: the source of server-endpoint snapshots.
///
/// `get_server_endpoint` is the synchronous initial fetch; `subscribe`
/// registers a push listener for replacement snapshots. There is no
/// unsubscribe: a subscription lives as long as its receiver. Retry and
/// backoff against a flaky backing registry are the implementation's
/// concern, never the pool's.
#[async_trait]
pub trait McpRegistry: Send + Sync {
    /// Fetches the current snapshot for `server_name`/`version`.
    ///
    /// Fails with [`DistmcpError::Discovery`] when the server or version
    /// is unknown.
    async fn get_server_endpoint(
        &self,
        server_name: &str,
        version: &str,
    ) -> Result<ServerEndpoint>;

    /// Registers a push listener for `server_name`/`version`.
    ///
    /// Every future snapshot update is delivered on the returned channel.
    async fn subscribe(
        &self,
        server_name: &str,
        version: &str,
    ) -> Result<mpsc::Receiver<ServerEndpoint>>;
}

fn server_key(server_name: &str, version: &str) -> String {
    format!("{}::{}", server_name, version)
}

struct RegistryInner {
    servers: HashMap<String, ServerEndpoint>,
    subscribers: HashMap<String, Vec<mpsc::Sender<ServerEndpoint>>>,
}

/// In-memory [`McpRegistry`] holding snapshots registered by hand.
///
/// Used by tests and by local wiring where the endpoint list is known up
/// front. [`publish`](StaticRegistry::publish) replaces a snapshot and
/// pushes it to every live subscriber, which makes it a convenient stand-in
/// for a real discovery backend in integration tests.
pub struct StaticRegistry {
    inner: Mutex<RegistryInner>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                servers: HashMap::new(),
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Registers (or replaces) a snapshot without notifying subscribers.
    pub async fn register(&self, server_name: &str, version: &str, endpoint: ServerEndpoint) {
        let mut inner = self.inner.lock().await;
        inner
            .servers
            .insert(server_key(server_name, version), endpoint);
    }

    /// Replaces a snapshot and pushes it to every live subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned here.
    pub async fn publish(&self, server_name: &str, version: &str, endpoint: ServerEndpoint) {
        let key = server_key(server_name, version);
        let mut inner = self.inner.lock().await;
        inner.servers.insert(key.clone(), endpoint.clone());

        let Some(senders) = inner.subscribers.get_mut(&key) else {
            return;
        };
        let mut live = Vec::with_capacity(senders.len());
        for sender in senders.drain(..) {
            if sender.send(endpoint.clone()).await.is_ok() {
                live.push(sender);
            } else {
                debug!(server = %key, "dropping closed subscription");
            }
        }
        *senders = live;
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl McpRegistry for StaticRegistry {
    async fn get_server_endpoint(
        &self,
        server_name: &str,
        version: &str,
    ) -> Result<ServerEndpoint> {
        let inner = self.inner.lock().await;
        inner
            .servers
            .get(&server_key(server_name, version))
            .cloned()
            .ok_or_else(|| {
                DistmcpError::Discovery(format!(
                    "no mcp server registered: {}, version: {}",
                    server_name, version
                ))
            })
    }

    async fn subscribe(
        &self,
        server_name: &str,
        version: &str,
    ) -> Result<mpsc::Receiver<ServerEndpoint>> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut inner = self.inner.lock().await;
        inner
            .subscribers
            .entry(server_key(server_name, version))
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}
