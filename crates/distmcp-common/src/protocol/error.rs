use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistmcpError {
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Protocol mismatch for server {server}: expected {expected}, got {actual}")]
    ProtocolMismatch {
        server: String,
        expected: String,
        actual: String,
    },

    #[error("Client construction failed: {0}")]
    ClientConstruction(String),

    #[error("No clients available for server: {0}")]
    NoClientsAvailable(String),

    #[error("Close failed: {0}")]
    CloseFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DistmcpError>;
