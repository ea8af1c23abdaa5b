//! Per-endpoint MCP client handle.
//!
//! [`McpAsyncClient`] wraps one [`McpTransport`] and exposes the typed MCP
//! client surface. Handles are built by a [`ClientFactory`]; the pool never
//! constructs them directly, which is what lets tests swap in mock
//! transports.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use distmcp_common::{
    CallToolRequest, CallToolResult, ClientCapabilities, CompleteRequest, CompleteResult,
    DistmcpError, GetPromptRequest, GetPromptResult, Implementation, InitializeRequest,
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, LoggingLevel, ReadResourceRequest, ReadResourceResult, Result, Root,
    RootsCapability, SubscribeRequest, UnsubscribeRequest, MCP_PROTOCOL_VERSION,
};
use distmcp_discovery::McpEndpoint;

use crate::transport::{McpTransport, StreamableHttpTransport};

/// Client-side configuration shared by every handle a pool builds.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base client name; the endpoint identity is appended per handle.
    pub name: String,
    /// Client version reported during initialize.
    pub version: String,
    /// Run the initialize handshake eagerly when a client is built.
    pub initialized: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Upper bound on one graceful close; a hung endpoint must not stall
    /// shutdown of the remaining clients.
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "distmcp-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: true,
            request_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Builds one client handle per endpoint.
///
/// Fails with [`DistmcpError::ClientConstruction`] when the endpoint is
/// unreachable or the handshake fails.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn build_client(
        &self,
        endpoint: &McpEndpoint,
        export_path: &str,
    ) -> Result<Arc<McpAsyncClient>>;
}

/// Production factory: streamable-HTTP transport per endpoint, optional
/// eager initialize per [`ClientConfig::initialized`].
pub struct HttpClientFactory {
    config: ClientConfig,
}

impl HttpClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    async fn build_client(
        &self,
        endpoint: &McpEndpoint,
        export_path: &str,
    ) -> Result<Arc<McpAsyncClient>> {
        let base_url = format!("http://{}:{}", endpoint.address, endpoint.port);
        let transport = Arc::new(StreamableHttpTransport::new(
            &base_url,
            export_path,
            self.config.request_timeout,
        ));
        let client_info = Implementation {
            name: format!("{} - {}:{}", self.config.name, endpoint.address, endpoint.port),
            version: self.config.version.clone(),
        };
        let client = Arc::new(McpAsyncClient::new(
            transport,
            client_info,
            self.config.close_timeout,
        ));

        if self.config.initialized {
            client.initialize().await.map_err(|e| {
                DistmcpError::ClientConstruction(format!(
                    "initialize failed for {}:{}: {}",
                    endpoint.address, endpoint.port, e
                ))
            })?;
        }
        info!(client = %client.client_info().name, "added mcp client");
        Ok(client)
    }
}

/// One live connection to one MCP server endpoint.
///
/// Owns its transport and is closed exactly once; closing an already
/// closed handle is a no-op.
pub struct McpAsyncClient {
    client_info: Implementation,
    transport: Arc<dyn McpTransport>,
    init_result: RwLock<Option<InitializeResult>>,
    roots: RwLock<Vec<Root>>,
    closed: AtomicBool,
    close_timeout: Duration,
}

impl McpAsyncClient {
    pub fn new(
        transport: Arc<dyn McpTransport>,
        client_info: Implementation,
        close_timeout: Duration,
    ) -> Self {
        Self {
            client_info,
            transport,
            init_result: RwLock::new(None),
            roots: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_timeout,
        }
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = self.transport.request(method, params).await?;
        serde_json::from_value(result).map_err(DistmcpError::from)
    }

    /// Runs the initialize handshake and records the server's answer.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let request = InitializeRequest {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: self.client_capabilities(),
            client_info: self.client_info.clone(),
        };
        let result: InitializeResult = self
            .request_as("initialize", serde_json::to_value(&request)?)
            .await?;
        self.transport
            .notify("notifications/initialized", json!(null))
            .await?;
        *self.init_result.write().unwrap() = Some(result.clone());
        debug!(
            client = %self.client_info.name,
            server = %result.server_info.name,
            "initialize handshake complete"
        );
        Ok(result)
    }

    pub fn client_info(&self) -> &Implementation {
        &self.client_info
    }

    pub fn client_capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            roots: Some(RootsCapability {
                list_changed: Some(true),
            }),
            sampling: None,
        }
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.init_result
            .read()
            .unwrap()
            .as_ref()
            .map(|r| r.server_info.clone())
    }

    pub fn server_capabilities(&self) -> Option<distmcp_common::ServerCapabilities> {
        self.init_result
            .read()
            .unwrap()
            .as_ref()
            .map(|r| r.capabilities.clone())
    }

    pub fn server_instructions(&self) -> Option<String> {
        self.init_result
            .read()
            .unwrap()
            .as_ref()
            .and_then(|r| r.instructions.clone())
    }

    pub async fn ping(&self) -> Result<Value> {
        self.transport.request("ping", json!({})).await
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.request_as("tools/list", cursor_params(cursor)).await
    }

    pub async fn call_tool(&self, request: CallToolRequest) -> Result<CallToolResult> {
        self.request_as("tools/call", serde_json::to_value(&request)?)
            .await
    }

    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.request_as("resources/list", cursor_params(cursor))
            .await
    }

    pub async fn read_resource(
        &self,
        request: ReadResourceRequest,
    ) -> Result<ReadResourceResult> {
        self.request_as("resources/read", serde_json::to_value(&request)?)
            .await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        self.request_as("resources/templates/list", cursor_params(cursor))
            .await
    }

    pub async fn subscribe_resource(&self, request: SubscribeRequest) -> Result<()> {
        self.transport
            .request("resources/subscribe", serde_json::to_value(&request)?)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, request: UnsubscribeRequest) -> Result<()> {
        self.transport
            .request("resources/unsubscribe", serde_json::to_value(&request)?)
            .await?;
        Ok(())
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.request_as("prompts/list", cursor_params(cursor)).await
    }

    pub async fn get_prompt(&self, request: GetPromptRequest) -> Result<GetPromptResult> {
        self.request_as("prompts/get", serde_json::to_value(&request)?)
            .await
    }

    pub async fn complete(&self, request: CompleteRequest) -> Result<CompleteResult> {
        self.request_as("completion/complete", serde_json::to_value(&request)?)
            .await
    }

    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        self.transport
            .request("logging/setLevel", json!({ "level": level }))
            .await?;
        Ok(())
    }

    /// Adds a root to this client's exposed set and notifies the server.
    pub async fn add_root(&self, root: Root) -> Result<()> {
        {
            let mut roots = self.roots.write().unwrap();
            if !roots.iter().any(|existing| existing.uri == root.uri) {
                roots.push(root);
            }
        }
        self.roots_list_changed().await
    }

    /// Removes a root by uri and notifies the server.
    pub async fn remove_root(&self, root_uri: &str) -> Result<()> {
        {
            let mut roots = self.roots.write().unwrap();
            roots.retain(|existing| existing.uri != root_uri);
        }
        self.roots_list_changed().await
    }

    pub fn roots(&self) -> Vec<Root> {
        self.roots.read().unwrap().clone()
    }

    pub async fn roots_list_changed(&self) -> Result<()> {
        self.transport
            .notify("notifications/roots/list_changed", json!(null))
            .await
    }

    /// Closes the handle, releasing the transport. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.close().await
    }

    /// Like [`close`](Self::close) but bounded by the configured close
    /// timeout, so a hung endpoint cannot stall its caller indefinitely.
    pub async fn close_gracefully(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tokio::time::timeout(self.close_timeout, self.transport.close())
            .await
            .map_err(|_| {
                DistmcpError::CloseFailed(format!(
                    "close of {} timed out after {}ms",
                    self.client_info.name,
                    self.close_timeout.as_millis()
                ))
            })?
    }
}

fn cursor_params(cursor: Option<String>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => json!({}),
    }
}
