//! Client-side driver for koradb distributed queries.
//!
//! Ships a query to one or more remote shards, multiplexes packet-level
//! traffic with them, adapts inbound result blocks to the expected header,
//! services server-initiated requests mid-flight (work stealing, parallel
//! replicas), and coordinates cooperative cancellation and draining.
//!
//! The socket/TLS transport and the packet codec live elsewhere; this crate
//! consumes them through the [`connection::Connection`] trait.

pub mod adapter;
pub mod block;
pub mod connection;
pub mod connections;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod external;
pub mod packet;
pub mod read_context;
pub mod settings;

pub use adapter::adapt_block;
pub use block::{Block, BlockColumn, BlockInfo, ColumnData, Scalars};
pub use connection::{
    Connection, ConnectionPool, ProcessingStage, QualifiedTableName, QueryKind, ReplicaInfo,
};
pub use connections::{
    create_connections, ConnectionInput, Connections, MultiplexedConnections, SingleConnection,
};
#[cfg(target_os = "linux")]
pub use connections::HedgedConnections;
pub use context::{
    attach_thread_log_queue, attach_thread_profile_queue, thread_log_queue, thread_profile_queue,
    BoundedBlockQueue, PartUuidRegistry, QueryContext,
};
pub use coordinator::{
    InitialRangesAnnouncement, MarkRange, ParallelReadRequest, ParallelReadResponse,
    ParallelReplicasCoordinator, PartRanges, TaskIterator,
};
pub use error::{RemoteError, Result};
pub use executor::{Extension, ReadResult, RemoteQueryExecutor};
pub use external::{
    build_external_tables_data, ExternalTableEntry, ExternalTables, MemoryTable, StreamLimits,
    TemporaryTableStorage, DEFAULT_BLOCK_SIZE,
};
pub use packet::{Packet, ProfileInfo, Progress, ReplicaException};
pub use read_context::ReadContext;
pub use settings::{ConnectionTimeouts, OverflowMode, Settings};
