//! distmcp Service Discovery
//!
//! Data model and collaborator trait for the discovery side of the
//! distributed MCP client pool.
//!
//! # Components
//!
//! - [`endpoint`] - Endpoint and server-snapshot types plus key derivation
//! - [`registry`] - The [`McpRegistry`] trait and an in-memory
//!   [`StaticRegistry`] for tests and local wiring
//!
//! A registry hands out [`ServerEndpoint`] snapshots: the full descriptor
//! of one logical MCP server (protocol, version, export path, member
//! endpoints) at one point in time. The pool fetches one snapshot at
//! startup and then receives replacement snapshots over a subscription
//! channel.

pub mod endpoint;
pub mod registry;

pub use endpoint::{endpoint_key, McpEndpoint, ServerEndpoint, PROTOCOL_STREAMABLE};
pub use registry::{McpRegistry, StaticRegistry};
