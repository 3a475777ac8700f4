//! Fan-outs over replica connections.
//!
//! The executor is polymorphic over a capability set; the concrete shape is
//! a tagged dispatch with three variants: a single connection, a multiplexed
//! fan-out over N static connections, and a hedged fan-out where the
//! platform supports interruptible socket reads (elsewhere hedged requests
//! fall back to the multiplexed variant). The executor never picks a
//! variant; [`create_connections`] does.

#[cfg(unix)]
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::block::{Block, Scalars};
use crate::connection::{
    Connection, ConnectionPool, ProcessingStage, QualifiedTableName, QueryKind, ReplicaInfo,
};
use crate::coordinator::ParallelReadResponse;
use crate::error::{RemoteError, Result};
use crate::external::ExternalTableEntry;
use crate::packet::Packet;
use crate::settings::{ConnectionTimeouts, Settings};

/// Inputs the connection factory recognizes.
pub enum ConnectionInput {
    /// One pre-established connection.
    Single(Box<dyn Connection>),
    /// A fixed set of pre-established connections.
    Pooled(Vec<Box<dyn Connection>>),
    /// A failover pool that dials replicas on demand. The only input that
    /// survives a duplicate-UUID retry, since it can re-acquire.
    Failover { pool: Arc<dyn ConnectionPool>, table_hint: Option<QualifiedTableName> },
}

/// Builds the fan-out for one query attempt. Timeouts are derived from
/// `settings` here, at invocation time.
pub fn create_connections(
    input: ConnectionInput,
    settings: &Settings,
    replica_info: Option<ReplicaInfo>,
) -> Result<Connections> {
    let timeouts = ConnectionTimeouts::with_failover(settings);
    match input {
        ConnectionInput::Single(connection) => {
            Ok(Connections::Single(SingleConnection::new(connection, replica_info)))
        }
        ConnectionInput::Pooled(connections) => {
            Ok(Connections::Multiplexed(MultiplexedConnections::new(connections, replica_info)))
        }
        ConnectionInput::Failover { pool, table_hint } => {
            let connections = pool.get_many(&timeouts, settings, table_hint.as_ref())?;
            #[cfg(target_os = "linux")]
            if settings.use_hedged_requests {
                return Ok(Connections::Hedged(HedgedConnections::new(connections, replica_info)));
            }
            Ok(Connections::Multiplexed(MultiplexedConnections::new(connections, replica_info)))
        }
    }
}

/// The fan-out handed to the executor.
pub enum Connections {
    Single(SingleConnection),
    Multiplexed(MultiplexedConnections),
    #[cfg(target_os = "linux")]
    Hedged(HedgedConnections),
}

impl Connections {
    fn inner(&self) -> &MultiplexedConnections {
        match self {
            Connections::Single(c) => &c.inner,
            Connections::Multiplexed(c) => c,
            #[cfg(target_os = "linux")]
            Connections::Hedged(c) => &c.inner,
        }
    }

    fn inner_mut(&mut self) -> &mut MultiplexedConnections {
        match self {
            Connections::Single(c) => &mut c.inner,
            Connections::Multiplexed(c) => c,
            #[cfg(target_os = "linux")]
            Connections::Hedged(c) => &mut c.inner,
        }
    }

    pub fn send_query(
        &mut self,
        timeouts: &ConnectionTimeouts,
        query: &str,
        query_id: &str,
        stage: ProcessingStage,
        kind: QueryKind,
    ) -> Result<()> {
        self.inner_mut().send_query(timeouts, query, query_id, stage, kind)
    }

    pub fn send_scalars(&mut self, scalars: &Scalars) -> Result<()> {
        self.inner_mut().send_scalars(scalars)
    }

    pub fn send_external_tables(&mut self, data: &mut [Vec<ExternalTableEntry>]) -> Result<()> {
        self.inner_mut().send_external_tables(data)
    }

    pub fn send_cancel(&mut self) -> Result<()> {
        self.inner_mut().send_cancel()
    }

    pub fn send_ignored_part_uuids(&mut self, uuids: &[Uuid]) -> Result<()> {
        self.inner_mut().send_ignored_part_uuids(uuids)
    }

    pub fn send_read_task_response(&mut self, response: &str) -> Result<()> {
        self.inner_mut().send_read_task_response(response)
    }

    pub fn send_merge_tree_read_task_response(
        &mut self,
        response: &ParallelReadResponse,
    ) -> Result<()> {
        self.inner_mut().send_merge_tree_read_task_response(response)
    }

    pub fn receive_packet(&mut self) -> Result<Packet> {
        self.inner_mut().receive_packet()
    }

    pub fn try_receive_packet(&mut self) -> Result<Option<Packet>> {
        self.inner_mut().try_receive_packet()
    }

    pub fn drain(&mut self) -> Result<Packet> {
        self.inner_mut().drain()
    }

    pub fn has_active_connections(&self) -> bool {
        self.inner().has_active_connections()
    }

    pub fn size(&self) -> usize {
        self.inner().size()
    }

    pub fn disconnect(&mut self) {
        self.inner_mut().disconnect()
    }

    pub fn dump_addresses(&self) -> String {
        self.inner().dump_addresses()
    }

    /// A descriptor that becomes readable when a receive can make progress.
    /// Only available while a single replica is still live; the suspend
    /// path degrades to blocking receives otherwise.
    #[cfg(unix)]
    pub fn readable_fd(&self) -> Option<RawFd> {
        self.inner().readable_fd()
    }

    pub fn wake(&self) {
        self.inner().wake()
    }
}

struct Replica {
    connection: Box<dyn Connection>,
    done: bool,
}

impl Replica {
    fn is_active(&self) -> bool {
        !self.done && self.connection.is_connected()
    }
}

/// Fan-out over N static connections. Receives round-robin from whichever
/// replica has a packet ready and tracks per-replica end-of-stream.
pub struct MultiplexedConnections {
    replicas: Vec<Replica>,
    replica_info: Option<ReplicaInfo>,
    next_receive: usize,
    last_received: Option<usize>,
}

impl MultiplexedConnections {
    pub fn new(connections: Vec<Box<dyn Connection>>, replica_info: Option<ReplicaInfo>) -> Self {
        MultiplexedConnections {
            replicas: connections
                .into_iter()
                .map(|connection| Replica { connection, done: false })
                .collect(),
            replica_info,
            next_receive: 0,
            last_received: None,
        }
    }

    pub fn send_query(
        &mut self,
        timeouts: &ConnectionTimeouts,
        query: &str,
        query_id: &str,
        stage: ProcessingStage,
        kind: QueryKind,
    ) -> Result<()> {
        let base = self.replica_info;
        for (index, replica) in self.replicas.iter_mut().enumerate() {
            let info = base.map(|info| ReplicaInfo {
                all_replicas_count: info.all_replicas_count,
                number_of_current_replica: info.number_of_current_replica + index,
            });
            replica.connection.send_query(timeouts, query, query_id, stage, kind, info.as_ref())?;
        }
        Ok(())
    }

    pub fn send_scalars(&mut self, scalars: &Scalars) -> Result<()> {
        for replica in &mut self.replicas {
            for (name, block) in scalars {
                replica.connection.send_data(block, name)?;
            }
        }
        Ok(())
    }

    /// Streams the per-connection external tables, then terminates each
    /// replica's outbound data sequence with an empty block.
    pub fn send_external_tables(&mut self, data: &mut [Vec<ExternalTableEntry>]) -> Result<()> {
        if data.len() != self.replicas.len() {
            return Err(RemoteError::Logic(format!(
                "external tables prepared for {} connections, fan-out has {}",
                data.len(),
                self.replicas.len()
            )));
        }
        for (replica, entries) in self.replicas.iter_mut().zip(data.iter_mut()) {
            for entry in entries.iter_mut() {
                while let Some(block) = entry.stream.next() {
                    let block = block?;
                    if entry.is_cancelled() {
                        break;
                    }
                    replica.connection.send_data(&block, &entry.table_name)?;
                }
            }
            replica.connection.send_data(&Block::empty(), "")?;
        }
        Ok(())
    }

    pub fn send_cancel(&mut self) -> Result<()> {
        for replica in &mut self.replicas {
            if replica.connection.is_connected() {
                replica.connection.send_cancel()?;
            }
        }
        Ok(())
    }

    pub fn send_ignored_part_uuids(&mut self, uuids: &[Uuid]) -> Result<()> {
        for replica in &mut self.replicas {
            replica.connection.send_ignored_part_uuids(uuids)?;
        }
        Ok(())
    }

    /// Work-steal responses go to the replica whose request we last read.
    pub fn send_read_task_response(&mut self, response: &str) -> Result<()> {
        let index = self.last_received.ok_or_else(|| {
            RemoteError::Logic("no replica to answer: nothing was received yet".to_string())
        })?;
        self.replicas[index].connection.send_read_task_response(response)
    }

    pub fn send_merge_tree_read_task_response(
        &mut self,
        response: &ParallelReadResponse,
    ) -> Result<()> {
        let index = self.last_received.ok_or_else(|| {
            RemoteError::Logic("no replica to answer: nothing was received yet".to_string())
        })?;
        self.replicas[index].connection.send_merge_tree_read_task_response(response)
    }

    pub fn receive_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.try_receive_packet()? {
                return Ok(packet);
            }
            let active: Vec<usize> =
                (0..self.replicas.len()).filter(|&i| self.replicas[i].is_active()).collect();
            match active.len() {
                0 => {
                    return Err(RemoteError::Connection(
                        "no active connections to receive from".to_string(),
                    ))
                }
                1 => {
                    let index = active[0];
                    let packet = self.replicas[index].connection.receive_packet()?;
                    self.note_received(index, &packet);
                    return Ok(packet);
                }
                _ => {
                    for index in active {
                        if self.replicas[index]
                            .connection
                            .poll_readable(Duration::from_millis(10))?
                        {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One non-blocking round-robin pass over the live replicas.
    pub fn try_receive_packet(&mut self) -> Result<Option<Packet>> {
        let count = self.replicas.len();
        for step in 0..count {
            let index = (self.next_receive + step) % count;
            if !self.replicas[index].is_active() {
                continue;
            }
            if let Some(packet) = self.replicas[index].connection.try_receive_packet()? {
                self.next_receive = (index + 1) % count;
                self.note_received(index, &packet);
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    fn note_received(&mut self, index: usize, packet: &Packet) {
        if matches!(packet, Packet::EndOfStream) {
            self.replicas[index].done = true;
        }
        self.last_received = Some(index);
    }

    /// Consumes leftover packets after a cancel, discarding result data.
    /// Returns the first packet the caller still has to act on: `Log`,
    /// `ProfileEvents`, `Exception`, an unknown tag, or the final
    /// `EndOfStream` once every replica is exhausted.
    pub fn drain(&mut self) -> Result<Packet> {
        loop {
            if !self.has_active_connections() {
                return Ok(Packet::EndOfStream);
            }
            let packet = self.receive_packet()?;
            match packet {
                Packet::Data(_)
                | Packet::Totals(_)
                | Packet::Extremes(_)
                | Packet::Progress(_)
                | Packet::ProfileInfo(_)
                | Packet::PartUuids(_)
                | Packet::ReadTaskRequest
                | Packet::MergeTreeReadTaskRequest(_)
                | Packet::MergeTreeAllRangesAnnouncement(_) => continue,
                Packet::EndOfStream => {
                    if !self.has_active_connections() {
                        return Ok(Packet::EndOfStream);
                    }
                }
                other => return Ok(other),
            }
        }
    }

    pub fn has_active_connections(&self) -> bool {
        self.replicas.iter().any(|r| r.is_active())
    }

    pub fn size(&self) -> usize {
        self.replicas.len()
    }

    pub fn disconnect(&mut self) {
        for replica in &mut self.replicas {
            replica.connection.disconnect();
        }
    }

    pub fn dump_addresses(&self) -> String {
        self.replicas
            .iter()
            .map(|r| r.connection.address())
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[cfg(unix)]
    pub fn readable_fd(&self) -> Option<RawFd> {
        let mut live = self.replicas.iter().filter(|r| r.is_active());
        let first = live.next()?;
        if live.next().is_some() {
            return None;
        }
        first.connection.readable_fd()
    }

    pub fn wake(&self) {
        for replica in &self.replicas {
            replica.connection.wake();
        }
    }
}

/// One replica, no fan-out bookkeeping.
pub struct SingleConnection {
    inner: MultiplexedConnections,
}

impl SingleConnection {
    pub fn new(connection: Box<dyn Connection>, replica_info: Option<ReplicaInfo>) -> Self {
        SingleConnection { inner: MultiplexedConnections::new(vec![connection], replica_info) }
    }
}

/// Hedged fan-out. The hedging policy (when to race a second replica, which
/// one wins) lives in the pool that produced these connections; what this
/// variant adds over multiplexed is that its connections expose readiness
/// descriptors, so receives can be interrupted mid-flight.
#[cfg(target_os = "linux")]
pub struct HedgedConnections {
    inner: MultiplexedConnections,
}

#[cfg(target_os = "linux")]
impl HedgedConnections {
    pub fn new(connections: Vec<Box<dyn Connection>>, replica_info: Option<ReplicaInfo>) -> Self {
        HedgedConnections { inner: MultiplexedConnections::new(connections, replica_info) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::fake::{ScriptedConnection, SentEvent};
    use crate::packet::Progress;

    fn timeouts() -> ConnectionTimeouts {
        ConnectionTimeouts::with_failover(&Settings::default())
    }

    #[test]
    fn round_robin_receive_and_end_of_stream_tracking() {
        let a = ScriptedConnection::new(
            "shard-a:9000",
            vec![Packet::Progress(Progress::default()), Packet::EndOfStream],
        );
        let b = ScriptedConnection::new("shard-b:9000", vec![Packet::EndOfStream]);
        let mut connections =
            MultiplexedConnections::new(vec![Box::new(a), Box::new(b)], None);

        assert_eq!(connections.size(), 2);
        assert!(matches!(connections.receive_packet().unwrap(), Packet::Progress(_)));
        assert!(matches!(connections.receive_packet().unwrap(), Packet::EndOfStream));
        assert!(connections.has_active_connections());
        assert!(matches!(connections.receive_packet().unwrap(), Packet::EndOfStream));
        assert!(!connections.has_active_connections());
    }

    #[test]
    fn query_fans_out_with_replica_numbers() {
        let a = ScriptedConnection::new("a:9000", vec![]);
        let b = ScriptedConnection::new("b:9000", vec![]);
        let (ha, hb) = (a.handle(), b.handle());
        let info = ReplicaInfo { all_replicas_count: 2, number_of_current_replica: 0 };
        let mut connections =
            MultiplexedConnections::new(vec![Box::new(a), Box::new(b)], Some(info));

        connections
            .send_query(&timeouts(), "SELECT 1", "q-1", ProcessingStage::Complete, QueryKind::Secondary)
            .unwrap();

        match &ha.sent()[0] {
            SentEvent::Query { replica_number, .. } => assert_eq!(*replica_number, Some(0)),
            other => panic!("unexpected event {other:?}"),
        }
        match &hb.sent()[0] {
            SentEvent::Query { replica_number, .. } => assert_eq!(*replica_number, Some(1)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn task_response_goes_to_last_received_replica() {
        let a = ScriptedConnection::new("a:9000", vec![]);
        let b = ScriptedConnection::new("b:9000", vec![Packet::ReadTaskRequest]);
        let (ha, hb) = (a.handle(), b.handle());
        let mut connections = MultiplexedConnections::new(vec![Box::new(a), Box::new(b)], None);

        assert!(matches!(connections.receive_packet().unwrap(), Packet::ReadTaskRequest));
        connections.send_read_task_response("part_0_1").unwrap();

        assert!(ha.sent().is_empty());
        assert_eq!(hb.sent(), vec![SentEvent::ReadTaskResponse("part_0_1".to_string())]);
    }

    #[test]
    fn task_response_without_receive_is_a_logic_error() {
        let a = ScriptedConnection::new("a:9000", vec![]);
        let mut connections = MultiplexedConnections::new(vec![Box::new(a)], None);
        assert!(matches!(
            connections.send_read_task_response("x"),
            Err(RemoteError::Logic(_))
        ));
    }

    #[test]
    fn drain_skips_result_data_and_surfaces_logs() {
        let a = ScriptedConnection::new(
            "a:9000",
            vec![
                Packet::Data(Block::empty()),
                Packet::Progress(Progress::default()),
                Packet::Log(Block::empty()),
                Packet::EndOfStream,
            ],
        );
        let mut connections = MultiplexedConnections::new(vec![Box::new(a)], None);

        assert!(matches!(connections.drain().unwrap(), Packet::Log(_)));
        assert!(matches!(connections.drain().unwrap(), Packet::EndOfStream));
        // Exhausted fan-outs keep reporting end-of-stream.
        assert!(matches!(connections.drain().unwrap(), Packet::EndOfStream));
    }

    #[test]
    fn dump_addresses_lists_every_replica() {
        let a = ScriptedConnection::new("a:9000", vec![]);
        let b = ScriptedConnection::new("b:9000", vec![]);
        let connections = MultiplexedConnections::new(vec![Box::new(a), Box::new(b)], None);
        assert_eq!(connections.dump_addresses(), "a:9000, b:9000");
    }

    #[cfg(unix)]
    #[test]
    fn readable_fd_only_with_one_live_replica() {
        let a = ScriptedConnection::new("a:9000", vec![Packet::EndOfStream]).with_fd();
        let b = ScriptedConnection::new("b:9000", vec![]).with_fd();
        let mut connections = MultiplexedConnections::new(vec![Box::new(a), Box::new(b)], None);

        assert!(connections.readable_fd().is_none());
        assert!(matches!(connections.receive_packet().unwrap(), Packet::EndOfStream));
        assert!(connections.readable_fd().is_some());
    }
}
