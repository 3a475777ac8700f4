//! Error type for the remote query driver.

use thiserror::Error;

use crate::packet::ReplicaException;

pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("unknown packet {kind} from one of the following replicas: {addresses}")]
    UnknownPacket { kind: String, addresses: String },
    #[error("found duplicate uuids while processing query")]
    DuplicatedPartUuids,
    #[error("logic error: {0}")]
    Logic(String),
    #[error("system error: {0}")]
    System(String),
    #[error("received from replica: {0}")]
    Replica(ReplicaException),
    #[error("connection: {0}")]
    Connection(String),
    #[error("block structure mismatch: {0}")]
    BlockStructure(String),
    #[error("query timeout: {0}")]
    Timeout(String),
}

impl From<arrow_schema::ArrowError> for RemoteError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        RemoteError::BlockStructure(e.to_string())
    }
}
