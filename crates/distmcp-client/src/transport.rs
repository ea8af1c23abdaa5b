//! MCP client transport.
//!
//! [`McpTransport`] is the seam between a client handle and the wire; the
//! production implementation is [`StreamableHttpTransport`], which speaks
//! MCP streamable HTTP: JSON-RPC over HTTP POST with an optional
//! `Mcp-Session-Id` header assigned by the server.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

use distmcp_common::{DistmcpError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Result};

/// Session header used by MCP streamable HTTP.
pub const MCP_SESSION_HEADER: &str = "Mcp-Session-Id";

/// Wire seam of one client handle.
///
/// `request` performs a JSON-RPC call and returns the result value;
/// `notify` sends a one-way notification; `close` releases the server-side
/// session and any network resources. Implementations must be safe to call
/// from multiple tasks.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    async fn notify(&self, method: &str, params: Value) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// MCP streamable-HTTP transport over hyper.
///
/// One transport per endpoint. The server may assign a session id on the
/// first response; it is echoed on every subsequent request and released
/// with an HTTP DELETE on close.
pub struct StreamableHttpTransport {
    endpoint_url: String,
    request_timeout: Duration,
    session_id: RwLock<Option<String>>,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl StreamableHttpTransport {
    /// Creates a transport for `{base_url}{export_path}`.
    ///
    /// `base_url` is scheme://address:port; `export_path` is the shared
    /// export path from the server snapshot.
    pub fn new(base_url: &str, export_path: &str, request_timeout: Duration) -> Self {
        Self {
            endpoint_url: format!("{}{}", base_url, export_path),
            request_timeout,
            session_id: RwLock::new(None),
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    fn current_session(&self) -> Option<String> {
        self.session_id.read().unwrap().clone()
    }

    /// POSTs a serialized JSON-RPC message, enforcing the request timeout
    /// and capturing any session id the server assigns.
    async fn post(&self, body: Vec<u8>) -> Result<Bytes> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(session) = self.current_session() {
            builder = builder.header(MCP_SESSION_HEADER, session);
        }
        let http_request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| DistmcpError::Transport(format!("failed to build request: {}", e)))?;

        let response_future = self.client.request(http_request);
        let response = tokio::time::timeout(self.request_timeout, response_future)
            .await
            .map_err(|_| DistmcpError::Timeout(self.request_timeout.as_millis() as u64))?
            .map_err(|e| DistmcpError::Transport(format!("HTTP request failed: {}", e)))?;

        if let Some(session) = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().unwrap() = Some(session.to_string());
        }

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| DistmcpError::Transport(format!("failed to read response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(DistmcpError::Transport(format!(
                "HTTP status {} from {}",
                status, self.endpoint_url
            )));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(method, params);
        let body = serde_json::to_vec(&request)?;
        let bytes = self.post(body).await?;
        let response: JsonRpcResponse = serde_json::from_slice(&bytes)?;
        response.into_result()
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let body = serde_json::to_vec(&notification)?;
        self.post(body).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Stateless endpoints never assign a session; nothing to release.
        let Some(session) = self.session_id.write().unwrap().take() else {
            return Ok(());
        };
        debug!(url = %self.endpoint_url, "releasing mcp session");

        let http_request = Request::builder()
            .method("DELETE")
            .uri(&self.endpoint_url)
            .header(MCP_SESSION_HEADER, session)
            .body(Full::new(Bytes::new()))
            .map_err(|e| DistmcpError::Transport(format!("failed to build request: {}", e)))?;

        let response_future = self.client.request(http_request);
        tokio::time::timeout(self.request_timeout, response_future)
            .await
            .map_err(|_| DistmcpError::Timeout(self.request_timeout.as_millis() as u64))?
            .map_err(|e| DistmcpError::CloseFailed(format!("session delete failed: {}", e)))?;
        Ok(())
    }
}
