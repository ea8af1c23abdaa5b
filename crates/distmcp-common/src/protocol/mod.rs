pub mod error;
pub mod jsonrpc;
pub mod schema;

#[cfg(test)]
mod tests;

pub use error::{DistmcpError, Result};
pub use jsonrpc::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};
pub use schema::*;
