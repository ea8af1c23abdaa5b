//! distmcp Client Pool
//!
//! The distributed MCP client: one async client per backend endpoint of a
//! logical MCP server, kept in sync with a service-discovery registry and
//! balanced with round-robin selection.
//!
//! # Overview
//!
//! A [`DistributedMcpClient`] is built against a server name/version pair
//! and a [`McpRegistry`](distmcp_discovery::McpRegistry):
//!
//! 1. `init()` fetches the initial endpoint snapshot and builds one
//!    [`McpAsyncClient`] per endpoint
//! 2. `subscribe()` spawns a background reconciler that diffs every pushed
//!    snapshot against the current one, adding and removing clients
//!    incrementally (or rebuilding the whole set when the export path or
//!    version changed)
//! 3. MCP operations either go to one round-robin-selected client
//!    (tools, resources, prompts, completion) or fan out to every client
//!    (roots, logging level, resource subscriptions)
//!
//! # Components
//!
//! - [`transport`] - The [`McpTransport`] seam and the streamable-HTTP
//!   implementation
//! - [`client`] - The per-endpoint [`McpAsyncClient`] handle and the
//!   [`ClientFactory`] seam
//! - [`pool`] - The distributed pool itself
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use distmcp_client::DistributedMcpClient;
//! use distmcp_discovery::StaticRegistry;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(StaticRegistry::new());
//! let pool = DistributedMcpClient::builder("search-server", "1.0.0")
//!     .registry(registry)
//!     .build()
//!     .await?;
//! pool.init().await?;
//! pool.subscribe().await?;
//!
//! let tools = pool.list_tools(None).await?;
//! println!("{} tools available", tools.tools.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod pool;
pub mod transport;

pub use client::{ClientConfig, ClientFactory, HttpClientFactory, McpAsyncClient};
pub use pool::{DistributedMcpClient, DistributedMcpClientBuilder};
pub use transport::{McpTransport, StreamableHttpTransport};
