//! The transport interface consumed by the driver.
//!
//! A [`Connection`] is one established replica link. The socket/TLS layer
//! and the packet codec behind it live elsewhere; this crate only drives the
//! capability set below. Fan-outs over several connections are built in
//! [`crate::connections`].

#[cfg(unix)]
use std::os::unix::io::RawFd;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::block::Block;
use crate::coordinator::ParallelReadResponse;
use crate::error::Result;
use crate::packet::Packet;
use crate::settings::{ConnectionTimeouts, Settings};

/// Who issued the query: the user-facing initiator or another server node
/// fanning the query out further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    Initial,
    Secondary,
}

/// Up to which stage the remote side should process the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStage {
    /// Stop after partial aggregation; the initiator merges.
    Intermediate,
    /// Produce the final result.
    Complete,
}

/// Position of one replica inside a parallel-replicas group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub all_replicas_count: usize,
    pub number_of_current_replica: usize,
}

/// Database-qualified table name, used as a hint to failover pools so they
/// can prefer replicas whose copy of the table is fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedTableName {
    pub database: String,
    pub table: String,
}

impl std::fmt::Display for QualifiedTableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// One established replica link.
///
/// Send methods run to completion or fail; they never park. `receive_packet`
/// blocks until a packet is decoded, `try_receive_packet` returns `None`
/// when no complete packet is buffered. Implementations that can expose a
/// readiness descriptor (`readable_fd`) enable the suspend/resume read path;
/// `wake` must make that descriptor readable spuriously so a blocked poller
/// re-checks state after a cancellation.
pub trait Connection: Send {
    #[allow(clippy::too_many_arguments)]
    fn send_query(
        &mut self,
        timeouts: &ConnectionTimeouts,
        query: &str,
        query_id: &str,
        stage: ProcessingStage,
        kind: QueryKind,
        replica_info: Option<&ReplicaInfo>,
    ) -> Result<()>;

    /// Sends one block of out-of-band data (a scalar result or an external
    /// table). An empty block with an empty table name terminates the
    /// outbound data sequence.
    fn send_data(&mut self, block: &Block, table_name: &str) -> Result<()>;

    fn send_cancel(&mut self) -> Result<()>;

    fn send_ignored_part_uuids(&mut self, uuids: &[Uuid]) -> Result<()>;

    fn send_read_task_response(&mut self, response: &str) -> Result<()>;

    fn send_merge_tree_read_task_response(&mut self, response: &ParallelReadResponse) -> Result<()>;

    fn receive_packet(&mut self) -> Result<Packet>;

    fn try_receive_packet(&mut self) -> Result<Option<Packet>>;

    /// Waits up to `timeout` for inbound data. `Ok(true)` means a receive
    /// will likely make progress.
    fn poll_readable(&self, timeout: Duration) -> Result<bool>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);

    fn address(&self) -> String;

    #[cfg(unix)]
    fn readable_fd(&self) -> Option<RawFd> {
        None
    }

    fn wake(&self) {}
}

/// Pool with failover, consumed by the connection factory. The pool decides
/// which and how many replicas to dial; `table_hint` lets it prefer replicas
/// with an up-to-date copy of the table.
pub trait ConnectionPool: Send + Sync {
    fn get_many(
        &self,
        timeouts: &ConnectionTimeouts,
        settings: &Settings,
        table_hint: Option<&QualifiedTableName>,
    ) -> Result<Vec<Box<dyn Connection>>>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory connection used across this crate's tests.

    use super::*;
    use crate::error::RemoteError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    #[cfg(unix)]
    use std::io::{Read, Write};
    #[cfg(unix)]
    use std::os::unix::io::AsRawFd;
    #[cfg(unix)]
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SentEvent {
        Query { query: String, query_id: String, kind: QueryKind, replica_number: Option<usize> },
        Data { table: String, rows: usize },
        Cancel,
        IgnoredPartUuids(Vec<Uuid>),
        ReadTaskResponse(String),
        MergeTreeReadTaskResponse(ParallelReadResponse),
    }

    /// Shared view of a scripted connection, usable after the connection
    /// itself has been moved into an executor.
    #[derive(Clone)]
    pub(crate) struct ScriptedHandle {
        inbound: Arc<Mutex<VecDeque<Packet>>>,
        sent: Arc<Mutex<Vec<SentEvent>>>,
        #[cfg(unix)]
        writer: Option<Arc<UnixStream>>,
    }

    impl ScriptedHandle {
        pub fn push_packet(&self, packet: Packet) {
            self.inbound.lock().push_back(packet);
            #[cfg(unix)]
            if let Some(writer) = &self.writer {
                let _ = (&**writer).write(b"p");
            }
        }

        pub fn sent(&self) -> Vec<SentEvent> {
            self.sent.lock().clone()
        }

        pub fn cancel_count(&self) -> usize {
            self.sent.lock().iter().filter(|e| matches!(e, SentEvent::Cancel)).count()
        }

        pub fn query_count(&self) -> usize {
            self.sent.lock().iter().filter(|e| matches!(e, SentEvent::Query { .. })).count()
        }
    }

    pub(crate) struct ScriptedConnection {
        address: String,
        inbound: Arc<Mutex<VecDeque<Packet>>>,
        sent: Arc<Mutex<Vec<SentEvent>>>,
        connected: bool,
        #[cfg(unix)]
        reader: Option<UnixStream>,
        #[cfg(unix)]
        writer: Option<Arc<UnixStream>>,
    }

    impl ScriptedConnection {
        pub fn new(address: &str, packets: Vec<Packet>) -> Self {
            ScriptedConnection {
                address: address.to_string(),
                inbound: Arc::new(Mutex::new(packets.into())),
                sent: Arc::new(Mutex::new(Vec::new())),
                connected: true,
                #[cfg(unix)]
                reader: None,
                #[cfg(unix)]
                writer: None,
            }
        }

        /// Adds a readiness descriptor backed by a socketpair, one byte per
        /// pending packet.
        #[cfg(unix)]
        pub fn with_fd(mut self) -> Self {
            let (writer, reader) = UnixStream::pair().expect("socketpair");
            writer.set_nonblocking(true).unwrap();
            reader.set_nonblocking(true).unwrap();
            for _ in 0..self.inbound.lock().len() {
                let _ = (&writer).write(b"p");
            }
            self.reader = Some(reader);
            self.writer = Some(Arc::new(writer));
            self
        }

        pub fn handle(&self) -> ScriptedHandle {
            ScriptedHandle {
                inbound: self.inbound.clone(),
                sent: self.sent.clone(),
                #[cfg(unix)]
                writer: self.writer.clone(),
            }
        }

        fn check_connected(&self) -> Result<()> {
            if self.connected {
                Ok(())
            } else {
                Err(RemoteError::Connection(format!("{} is disconnected", self.address)))
            }
        }
    }

    impl Connection for ScriptedConnection {
        fn send_query(
            &mut self,
            _timeouts: &ConnectionTimeouts,
            query: &str,
            query_id: &str,
            _stage: ProcessingStage,
            kind: QueryKind,
            replica_info: Option<&ReplicaInfo>,
        ) -> Result<()> {
            self.check_connected()?;
            self.sent.lock().push(SentEvent::Query {
                query: query.to_string(),
                query_id: query_id.to_string(),
                kind,
                replica_number: replica_info.map(|r| r.number_of_current_replica),
            });
            Ok(())
        }

        fn send_data(&mut self, block: &Block, table_name: &str) -> Result<()> {
            self.check_connected()?;
            self.sent
                .lock()
                .push(SentEvent::Data { table: table_name.to_string(), rows: block.rows() });
            Ok(())
        }

        fn send_cancel(&mut self) -> Result<()> {
            self.check_connected()?;
            self.sent.lock().push(SentEvent::Cancel);
            Ok(())
        }

        fn send_ignored_part_uuids(&mut self, uuids: &[Uuid]) -> Result<()> {
            self.check_connected()?;
            self.sent.lock().push(SentEvent::IgnoredPartUuids(uuids.to_vec()));
            Ok(())
        }

        fn send_read_task_response(&mut self, response: &str) -> Result<()> {
            self.check_connected()?;
            self.sent.lock().push(SentEvent::ReadTaskResponse(response.to_string()));
            Ok(())
        }

        fn send_merge_tree_read_task_response(
            &mut self,
            response: &ParallelReadResponse,
        ) -> Result<()> {
            self.check_connected()?;
            self.sent.lock().push(SentEvent::MergeTreeReadTaskResponse(response.clone()));
            Ok(())
        }

        fn receive_packet(&mut self) -> Result<Packet> {
            self.check_connected()?;
            let packet = self.inbound.lock().pop_front().ok_or_else(|| {
                RemoteError::Connection(format!("no scripted packets left for {}", self.address))
            })?;
            #[cfg(unix)]
            if let Some(reader) = &self.reader {
                let mut byte = [0u8; 1];
                let _ = (&mut &*reader).read(&mut byte);
            }
            Ok(packet)
        }

        fn try_receive_packet(&mut self) -> Result<Option<Packet>> {
            self.check_connected()?;
            match self.inbound.lock().pop_front() {
                Some(packet) => {
                    #[cfg(unix)]
                    if let Some(reader) = &self.reader {
                        let mut byte = [0u8; 1];
                        let _ = (&mut &*reader).read(&mut byte);
                    }
                    Ok(Some(packet))
                }
                None => Ok(None),
            }
        }

        fn poll_readable(&self, _timeout: Duration) -> Result<bool> {
            Ok(!self.inbound.lock().is_empty())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn address(&self) -> String {
            self.address.clone()
        }

        #[cfg(unix)]
        fn readable_fd(&self) -> Option<RawFd> {
            self.reader.as_ref().map(|r| r.as_raw_fd())
        }

        fn wake(&self) {
            #[cfg(unix)]
            if let Some(writer) = &self.writer {
                let _ = (&**writer).write(b"w");
            }
        }
    }

    /// Pool that hands out pre-scripted connection sets, one per attempt.
    pub(crate) struct ScriptedPool {
        attempts: Mutex<VecDeque<Vec<Box<dyn Connection>>>>,
    }

    impl ScriptedPool {
        pub fn new(attempts: Vec<Vec<Box<dyn Connection>>>) -> Self {
            ScriptedPool { attempts: Mutex::new(attempts.into()) }
        }
    }

    impl ConnectionPool for ScriptedPool {
        fn get_many(
            &self,
            _timeouts: &ConnectionTimeouts,
            _settings: &Settings,
            _table_hint: Option<&QualifiedTableName>,
        ) -> Result<Vec<Box<dyn Connection>>> {
            self.attempts
                .lock()
                .pop_front()
                .ok_or_else(|| RemoteError::Connection("pool exhausted".to_string()))
        }
    }
}
