//! Distributed client pool.
//!
//! [`DistributedMcpClient`] owns one [`McpAsyncClient`] per backend
//! endpoint of a logical MCP server, keyed by endpoint identity. The pool
//! is seeded from a discovery snapshot at `init()`, kept in sync by a
//! background reconciler fed from the registry subscription, and exposes
//! round-robin selection plus fan-out operations over all members.
//!
//! # Reconciliation
//!
//! Every pushed snapshot is handled one of two ways:
//!
//! - **Incremental diff** when export path and version are unchanged:
//!   endpoints are matched by (address, port); unmatched new endpoints get
//!   a fresh client, unmatched current endpoints have theirs removed and
//!   closed, matched endpoints keep their existing client untouched.
//! - **Full rebuild** when the export path or version changed: a complete
//!   new map is built off-lock, swapped in with one write, and every old
//!   client is closed afterwards. Readers see the old map or the new map,
//!   never a mix.
//!
//! Per-endpoint failures during reconciliation are logged and skipped so
//! one bad endpoint cannot wedge the rest of the update.

use futures::future::{join_all, try_join_all};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use distmcp_common::{
    CallToolRequest, CallToolResult, CompleteRequest, CompleteResult, DistmcpError,
    GetPromptRequest, GetPromptResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, LoggingLevel, ReadResourceRequest, ReadResourceResult,
    Result, Root, SubscribeRequest, UnsubscribeRequest,
};
use distmcp_discovery::{
    endpoint_key, McpEndpoint, McpRegistry, ServerEndpoint, PROTOCOL_STREAMABLE,
};

use crate::client::{ClientConfig, ClientFactory, HttpClientFactory, McpAsyncClient};

/// Shared pool state. Lives behind an `Arc` so the background reconciler
/// task and the public handle mutate the same map and snapshot.
struct PoolCore {
    server_name: String,
    version: String,
    factory: Arc<dyn ClientFactory>,
    /// Endpoint key -> live client. Construction and teardown happen
    /// outside the write lock; only map mutation happens under it.
    clients: RwLock<HashMap<String, Arc<McpAsyncClient>>>,
    /// The snapshot currently reflected by `clients`.
    endpoint: RwLock<ServerEndpoint>,
    /// Round-robin cursor. Size may change between increment and modulo
    /// under concurrent mutation; eventual fairness, not strict rotation.
    cursor: AtomicUsize,
}

impl PoolCore {
    /// Builds a client for `endpoint` and inserts it under its key.
    ///
    /// A key that is already present wins: the freshly built duplicate is
    /// closed and discarded, which makes duplicate endpoints in a snapshot
    /// and racing pushes both idempotent.
    async fn add_endpoint(&self, endpoint: &McpEndpoint, export_path: &str) -> Result<()> {
        let key = endpoint_key(endpoint, export_path);
        if self.clients.read().await.contains_key(&key) {
            return Ok(());
        }

        let client = self.factory.build_client(endpoint, export_path).await?;

        let duplicate = {
            let mut clients = self.clients.write().await;
            if clients.contains_key(&key) {
                Some(client)
            } else {
                debug!(server = %self.server_name, %key, "inserted mcp client");
                clients.insert(key.clone(), client);
                None
            }
        };
        if let Some(client) = duplicate {
            debug!(server = %self.server_name, %key, "lost insert race, discarding duplicate client");
            if let Err(e) = client.close_gracefully().await {
                warn!(%key, error = %e, "failed to close duplicate client");
            }
        }
        Ok(())
    }

    /// Removes the client for `endpoint` and closes it gracefully.
    /// Unknown keys are a no-op.
    async fn remove_endpoint(&self, endpoint: &McpEndpoint, export_path: &str) {
        let key = endpoint_key(endpoint, export_path);
        let removed = self.clients.write().await.remove(&key);
        if let Some(client) = removed {
            info!(server = %self.server_name, %key, "removing mcp client");
            if let Err(e) = client.close_gracefully().await {
                warn!(%key, error = %e, "close failed for removed client");
            }
        }
    }

    /// Builds a whole new client map for `snapshot`, swaps it in as the
    /// active map, then closes every client from the previous map.
    async fn rebuild_all(&self, snapshot: &ServerEndpoint) {
        let mut new_clients = HashMap::new();
        for endpoint in &snapshot.endpoints {
            let key = endpoint_key(endpoint, &snapshot.export_path);
            if new_clients.contains_key(&key) {
                continue;
            }
            match self.factory.build_client(endpoint, &snapshot.export_path).await {
                Ok(client) => {
                    new_clients.insert(key, client);
                }
                Err(e) => {
                    warn!(server = %self.server_name, %key, error = %e,
                        "client construction failed during rebuild, skipping endpoint");
                }
            }
        }

        let old_clients = std::mem::replace(&mut *self.clients.write().await, new_clients);
        for (key, client) in old_clients {
            if let Err(e) = client.close_gracefully().await {
                warn!(%key, error = %e, "close failed for replaced client");
            } else {
                info!(server = %self.server_name, %key, "closed replaced mcp client");
            }
        }
    }

    /// Reconciles the pool against a pushed snapshot, then stores it as
    /// current.
    async fn apply_snapshot(&self, snapshot: ServerEndpoint) {
        // Filtered upstream, re-checked here.
        if snapshot.protocol != PROTOCOL_STREAMABLE {
            debug!(server = %self.server_name, protocol = %snapshot.protocol,
                "ignoring snapshot for unsupported protocol");
            return;
        }

        let current = self.endpoint.read().await.clone();
        if current.export_path != snapshot.export_path || current.version != snapshot.version {
            info!(server = %self.server_name,
                export_path = %snapshot.export_path, version = %snapshot.version,
                "export path or version changed, rebuilding all clients");
            self.rebuild_all(&snapshot).await;
        } else {
            let added = snapshot.missing_from(&current);
            let removed = current.missing_from(&snapshot);
            if !added.is_empty() {
                info!(server = %self.server_name, count = added.len(), "endpoints to add");
            }
            for endpoint in &added {
                if let Err(e) = self.add_endpoint(endpoint, &snapshot.export_path).await {
                    warn!(server = %self.server_name,
                        address = %endpoint.address, port = endpoint.port, error = %e,
                        "failed to add endpoint, continuing reconciliation");
                }
            }
            if !removed.is_empty() {
                info!(server = %self.server_name, count = removed.len(), "endpoints to remove");
            }
            for endpoint in &removed {
                self.remove_endpoint(endpoint, &snapshot.export_path).await;
            }
        }

        *self.endpoint.write().await = snapshot;
    }

    /// Point-in-time snapshot of the member clients.
    async fn client_list(&self) -> Vec<Arc<McpAsyncClient>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Round-robin selection over the current members.
    async fn select(&self) -> Result<Arc<McpAsyncClient>> {
        let clients = self.client_list().await;
        if clients.is_empty() {
            return Err(DistmcpError::NoClientsAvailable(self.server_name.clone()));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % clients.len();
        Ok(clients[index].clone())
    }

    /// Drains the map for shutdown. Clients are closed by the caller,
    /// outside the write lock.
    async fn drain(&self) -> Vec<(String, Arc<McpAsyncClient>)> {
        self.clients.write().await.drain().collect()
    }
}

/// Builder for [`DistributedMcpClient`].
pub struct DistributedMcpClientBuilder {
    server_name: String,
    version: String,
    registry: Option<Arc<dyn McpRegistry>>,
    factory: Option<Arc<dyn ClientFactory>>,
    config: ClientConfig,
}

impl DistributedMcpClientBuilder {
    pub fn registry(mut self, registry: Arc<dyn McpRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides the client factory; defaults to [`HttpClientFactory`]
    /// over the builder's config.
    pub fn factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Fetches the initial snapshot and constructs the pool.
    ///
    /// Fails with [`DistmcpError::Discovery`] when the server/version is
    /// unknown and with [`DistmcpError::ProtocolMismatch`] before any
    /// client is built when the snapshot protocol is not the supported
    /// family.
    pub async fn build(self) -> Result<DistributedMcpClient> {
        let registry = self.registry.ok_or_else(|| {
            DistmcpError::ClientConstruction("registry is required".to_string())
        })?;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(HttpClientFactory::new(self.config.clone())));

        let endpoint = registry
            .get_server_endpoint(&self.server_name, &self.version)
            .await?;
        if endpoint.protocol != PROTOCOL_STREAMABLE {
            return Err(DistmcpError::ProtocolMismatch {
                server: self.server_name,
                expected: PROTOCOL_STREAMABLE.to_string(),
                actual: endpoint.protocol,
            });
        }

        Ok(DistributedMcpClient {
            core: Arc::new(PoolCore {
                server_name: self.server_name,
                version: self.version,
                factory,
                clients: RwLock::new(HashMap::new()),
                endpoint: RwLock::new(endpoint),
                cursor: AtomicUsize::new(0),
            }),
            registry,
            subscription: Mutex::new(None),
        })
    }
}

/// Distributed MCP client: a dynamic pool of per-endpoint clients with
/// round-robin dispatch and discovery-driven reconciliation.
pub struct DistributedMcpClient {
    core: Arc<PoolCore>,
    registry: Arc<dyn McpRegistry>,
    subscription: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DistributedMcpClient {
    pub fn builder(
        server_name: impl Into<String>,
        version: impl Into<String>,
    ) -> DistributedMcpClientBuilder {
        DistributedMcpClientBuilder {
            server_name: server_name.into(),
            version: version.into(),
            registry: None,
            factory: None,
            config: ClientConfig::default(),
        }
    }

    /// Builds one client per endpoint of the initial snapshot and returns
    /// the resulting map.
    ///
    /// Insertion is idempotent against duplicate endpoints. Construction
    /// is fail-fast: the first per-endpoint error propagates and already
    /// built clients stay in the map for a later retry of `init`.
    pub async fn init(&self) -> Result<HashMap<String, Arc<McpAsyncClient>>> {
        let snapshot = self.core.endpoint.read().await.clone();
        for endpoint in &snapshot.endpoints {
            self.core
                .add_endpoint(endpoint, &snapshot.export_path)
                .await?;
        }
        info!(server = %self.core.server_name, version = %self.core.version,
            clients = snapshot.endpoints.len(), "mcp client pool initialized");
        Ok(self.core.clients.read().await.clone())
    }

    /// Registers the reconciler with the registry and spawns the
    /// background task consuming pushed snapshots. Idempotent.
    pub async fn subscribe(&self) -> Result<()> {
        let mut subscription = self.subscription.lock().await;
        if subscription.is_some() {
            return Ok(());
        }

        let updates = self
            .registry
            .subscribe(&self.core.server_name, &self.core.version)
            .await?;
        let core = Arc::clone(&self.core);
        *subscription = Some(tokio::spawn(reconcile_loop(core, updates)));
        info!(server = %self.core.server_name, version = %self.core.version,
            "subscribed to mcp server updates");
        Ok(())
    }

    pub fn server_name(&self) -> &str {
        &self.core.server_name
    }

    pub fn version(&self) -> &str {
        &self.core.version
    }

    /// The snapshot the pool currently reflects.
    pub async fn server_endpoint(&self) -> ServerEndpoint {
        self.core.endpoint.read().await.clone()
    }

    /// Selects one client round-robin.
    ///
    /// Selection runs against a point-in-time snapshot of the map's
    /// values; a client added or removed concurrently may or may not be
    /// seen by this call.
    pub async fn select_client(&self) -> Result<Arc<McpAsyncClient>> {
        self.core.select().await
    }

    /// All current clients, for fan-out.
    pub async fn client_list(&self) -> Vec<Arc<McpAsyncClient>> {
        self.core.client_list().await
    }

    pub async fn client_count(&self) -> usize {
        self.core.clients.read().await.len()
    }

    // ------------------------------------------------------------------
    // Single-client delegation
    // ------------------------------------------------------------------

    pub async fn ping(&self) -> Result<Value> {
        self.select_client().await?.ping().await
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.select_client().await?.list_tools(cursor).await
    }

    pub async fn call_tool(&self, request: CallToolRequest) -> Result<CallToolResult> {
        self.select_client().await?.call_tool(request).await
    }

    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.select_client().await?.list_resources(cursor).await
    }

    pub async fn read_resource(
        &self,
        request: ReadResourceRequest,
    ) -> Result<ReadResourceResult> {
        self.select_client().await?.read_resource(request).await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        self.select_client()
            .await?
            .list_resource_templates(cursor)
            .await
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.select_client().await?.list_prompts(cursor).await
    }

    pub async fn get_prompt(&self, request: GetPromptRequest) -> Result<GetPromptResult> {
        self.select_client().await?.get_prompt(request).await
    }

    pub async fn complete(&self, request: CompleteRequest) -> Result<CompleteResult> {
        self.select_client().await?.complete(request).await
    }

    // ------------------------------------------------------------------
    // Fan-out: one unit of work per current client, joined; the first
    // failure aborts the join and surfaces to the caller.
    // ------------------------------------------------------------------

    pub async fn add_root(&self, root: Root) -> Result<()> {
        let clients = self.client_list().await;
        try_join_all(clients.iter().map(|client| client.add_root(root.clone()))).await?;
        Ok(())
    }

    pub async fn remove_root(&self, root_uri: &str) -> Result<()> {
        let clients = self.client_list().await;
        try_join_all(clients.iter().map(|client| client.remove_root(root_uri))).await?;
        Ok(())
    }

    pub async fn roots_list_changed(&self) -> Result<()> {
        let clients = self.client_list().await;
        try_join_all(clients.iter().map(|client| client.roots_list_changed())).await?;
        Ok(())
    }

    pub async fn subscribe_resource(&self, request: SubscribeRequest) -> Result<()> {
        let clients = self.client_list().await;
        try_join_all(
            clients
                .iter()
                .map(|client| client.subscribe_resource(request.clone())),
        )
        .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, request: UnsubscribeRequest) -> Result<()> {
        let clients = self.client_list().await;
        try_join_all(
            clients
                .iter()
                .map(|client| client.unsubscribe_resource(request.clone())),
        )
        .await?;
        Ok(())
    }

    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        let clients = self.client_list().await;
        try_join_all(
            clients
                .iter()
                .map(|client| client.set_logging_level(level)),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Closes every client sequentially and empties the map.
    ///
    /// Close failures are logged and skipped; shutdown always completes
    /// with an empty map, after which selection fails with
    /// `NoClientsAvailable`.
    pub async fn close(&self) {
        for (key, client) in self.core.drain().await {
            match client.close().await {
                Ok(()) => info!(%key, "closed and removed mcp client"),
                Err(e) => warn!(%key, error = %e, "close failed, client removed anyway"),
            }
        }
    }

    /// Closes every client concurrently, each bounded by the client's
    /// close timeout. Same failure policy as [`close`](Self::close).
    pub async fn close_gracefully(&self) {
        let drained = self.core.drain().await;
        let closes = drained.into_iter().map(|(key, client)| async move {
            match client.close_gracefully().await {
                Ok(()) => info!(%key, "closed and removed mcp client"),
                Err(e) => warn!(%key, error = %e, "graceful close failed, client removed anyway"),
            }
        });
        join_all(closes).await;
    }
}

/// Background reconciler: consumes pushed snapshots until the registry
/// drops the channel.
async fn reconcile_loop(core: Arc<PoolCore>, mut updates: mpsc::Receiver<ServerEndpoint>) {
    while let Some(snapshot) = updates.recv().await {
        core.apply_snapshot(snapshot).await;
    }
    debug!(server = %core.server_name, "subscription channel closed, reconciler stopping");
}
