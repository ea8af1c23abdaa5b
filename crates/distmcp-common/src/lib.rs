//! distmcp Common Protocol Types
//!
//! This crate provides the wire-level protocol definitions shared by all
//! distmcp components.
//!
//! # Overview
//!
//! distmcp is a distributed Model Context Protocol (MCP) client pool: it
//! keeps one async client per backend endpoint of a logical MCP server and
//! balances calls across them. This crate contains the pieces every
//! component agrees on:
//!
//! - **JSON-RPC layer**: request/response/notification envelopes and the
//!   standard error codes
//! - **MCP schema**: the client-facing subset of the MCP schema (tools,
//!   resources, prompts, roots, logging, completion)
//! - **Error handling**: the [`DistmcpError`] enum and `Result` alias
//!
//! # Example
//!
//! ```
//! use distmcp_common::JsonRpcRequest;
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new("tools/call", json!({
//!     "name": "echo",
//!     "arguments": {"text": "hi"},
//! }));
//! assert_eq!(request.jsonrpc, "2.0");
//! ```

pub mod protocol;

pub use protocol::*;
