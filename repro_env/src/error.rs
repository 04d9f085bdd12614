//! Error types for the simulator abstraction.

use crate::types::ActorId;
use thiserror::Error;

/// Errors that can occur while talking to the simulator.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Could not reach the simulator (or the bridge in front of it)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The simulator did not answer in time
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The simulator answered with an error
    #[error("Simulator error: {0}")]
    RpcError(String),

    /// Request/response could not be encoded or decoded
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The actor no longer exists in the world
    #[error("Unknown actor: {0}")]
    UnknownActor(ActorId),

    /// The client connection was already shut down
    #[error("Client disconnected")]
    Disconnected,
}

impl EnvError {
    /// Creates a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Creates an RPC error.
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::RpcError(msg.into())
    }

    /// Creates a protocol error.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::ProtocolError(msg.to_string())
    }
}
