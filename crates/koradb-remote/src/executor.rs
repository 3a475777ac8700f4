//! The remote query executor: one instance per remote query.
//!
//! Drives the whole exchange with a fan-out of replica connections: ships
//! the query (plus scalars and external tables), dispatches inbound packets,
//! answers server-initiated work-steal and parallel-replica requests,
//! retries once when two replicas claim the same data part, and coordinates
//! cancellation with the non-preemptible send path.
//!
//! The executor is driven by one consumer thread at a time, but `cancel` is
//! safe from any thread; everything that touches the wire is serialized by
//! one internal mutex, which also guarantees that a `Cancel` packet can
//! never interleave into the middle of the outbound query sequence.

#[cfg(unix)]
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::adapter::adapt_block;
use crate::block::{Block, Scalars};
use crate::connection::{ProcessingStage, QueryKind, ReplicaInfo};
use crate::connections::{create_connections, ConnectionInput, Connections};
use crate::context::{thread_log_queue, thread_profile_queue, QueryContext};
use crate::coordinator::{ParallelReplicasCoordinator, TaskIterator};
use crate::error::{RemoteError, Result};
use crate::external::{build_external_tables_data, ExternalTables, StreamLimits};
use crate::packet::{Packet, ProfileInfo, Progress};
use crate::read_context::ReadContext;
use crate::settings::ConnectionTimeouts;

// ============================================================================
// Read results & extensions
// ============================================================================

/// What one call to `read`/`read_async` produced.
#[derive(Debug)]
pub enum ReadResult {
    /// An adapted result block. An empty block is the terminal marker:
    /// the stream ended or the shard was skipped.
    Data(Block),
    /// A parallel-replica request was serviced; the caller may yield back
    /// to its scheduler, no user-visible block was produced.
    ParallelReplicasToken,
    /// Async path only: no packet was ready. Wait for this descriptor to
    /// become readable and call again.
    #[cfg(unix)]
    FileDescriptor(RawFd),
    /// A packet was consumed without producing anything for the caller.
    Nothing,
}

impl ReadResult {
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            ReadResult::Data(block) => Some(block),
            _ => None,
        }
    }

    pub fn into_block(self) -> Option<Block> {
        match self {
            ReadResult::Data(block) => Some(block),
            _ => None,
        }
    }
}

/// Optional collaborators wired in at construction.
#[derive(Default)]
pub struct Extension {
    pub task_iterator: Option<TaskIterator>,
    pub parallel_reading_coordinator: Option<Arc<dyn ParallelReplicasCoordinator>>,
    pub replica_info: Option<ReplicaInfo>,
}

type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;
type ProfileInfoCallback = Box<dyn Fn(&ProfileInfo) + Send + Sync>;

// ============================================================================
// Executor
// ============================================================================

/// State that must never be touched concurrently with a send, a receive, or
/// a cancel: the live fan-out and the async read context.
struct Guarded {
    connections: Option<Connections>,
    read_context: Option<ReadContext>,
}

pub struct RemoteQueryExecutor {
    query: String,
    query_id: String,
    header: Block,
    context: Arc<QueryContext>,
    scalars: Scalars,
    external_tables: ExternalTables,
    stage: ProcessingStage,

    task_iterator: Mutex<Option<TaskIterator>>,
    coordinator: Option<Arc<dyn ParallelReplicasCoordinator>>,
    replica_info: Option<ReplicaInfo>,

    /// Consumed by the connection factory on first send; replenished only
    /// for failover pools, which can re-acquire after a retry.
    connection_input: Mutex<Option<ConnectionInput>>,
    guarded: Mutex<Guarded>,

    sent_query: AtomicBool,
    established: AtomicBool,
    was_cancelled: AtomicBool,
    finished: AtomicBool,
    resent_query: AtomicBool,
    recreate_read_context: AtomicBool,
    got_duplicated_part_uuids: AtomicBool,
    got_exception_from_replica: AtomicBool,
    got_unknown_packet_from_replica: AtomicBool,

    duplicated_part_uuids: Mutex<Vec<Uuid>>,
    external_table_flags: Mutex<Vec<Arc<AtomicBool>>>,

    totals: Mutex<Option<Block>>,
    extremes: Mutex<Option<Block>>,
    progress_callback: Mutex<Option<ProgressCallback>>,
    profile_info_callback: Mutex<Option<ProfileInfoCallback>>,
}

impl RemoteQueryExecutor {
    /// `header` describes the expected result schema; an empty header
    /// accepts whatever the replicas send.
    pub fn new(
        input: ConnectionInput,
        query: impl Into<String>,
        header: Block,
        context: Arc<QueryContext>,
    ) -> Self {
        RemoteQueryExecutor {
            query: query.into(),
            query_id: Uuid::new_v4().to_string(),
            header,
            context,
            scalars: Scalars::new(),
            external_tables: ExternalTables::new(),
            stage: ProcessingStage::Complete,
            task_iterator: Mutex::new(None),
            coordinator: None,
            replica_info: None,
            connection_input: Mutex::new(Some(input)),
            guarded: Mutex::new(Guarded { connections: None, read_context: None }),
            sent_query: AtomicBool::new(false),
            established: AtomicBool::new(false),
            was_cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            resent_query: AtomicBool::new(false),
            recreate_read_context: AtomicBool::new(false),
            got_duplicated_part_uuids: AtomicBool::new(false),
            got_exception_from_replica: AtomicBool::new(false),
            got_unknown_packet_from_replica: AtomicBool::new(false),
            duplicated_part_uuids: Mutex::new(Vec::new()),
            external_table_flags: Mutex::new(Vec::new()),
            totals: Mutex::new(None),
            extremes: Mutex::new(None),
            progress_callback: Mutex::new(None),
            profile_info_callback: Mutex::new(None),
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn with_stage(mut self, stage: ProcessingStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_scalars(mut self, scalars: Scalars) -> Self {
        self.scalars = scalars;
        self
    }

    pub fn with_external_tables(mut self, external_tables: ExternalTables) -> Self {
        self.external_tables = external_tables;
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        *self.task_iterator.get_mut() = extension.task_iterator;
        self.coordinator = extension.parallel_reading_coordinator;
        self.replica_info = extension.replica_info;
        self
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Ships the query. Idempotent per attempt: a second call is a no-op.
    ///
    /// Connections are built here on first use (timeouts are derived from
    /// the settings current at this moment). Ignored part UUIDs accumulated
    /// by a previous attempt go out first, then the query; scalars and
    /// external tables follow once the cancel mutex has been released, each
    /// re-checking for cancellation before touching the wire.
    pub fn send_query(&self, kind: QueryKind) -> Result<()> {
        if self.sent_query.load(Ordering::Acquire) {
            return Ok(());
        }

        let settings = self.context.settings();
        {
            let mut guarded = self.guarded.lock();
            if guarded.connections.is_none() {
                guarded.connections = Some(self.build_connections()?);
            }
            if self.need_to_skip_unavailable_shard(&guarded) {
                return Ok(());
            }
            if self.was_cancelled.load(Ordering::Acquire) {
                return Ok(());
            }

            let connections = guarded.connections.as_mut().ok_or_else(|| {
                RemoteError::Logic("connections disappeared while sending".to_string())
            })?;

            // The query sequence must hit the wire uninterrupted: a Cancel
            // packet in the middle would desync the replica. The cancel
            // mutex is held until the query itself is fully written.
            self.established.store(true, Ordering::Release);
            self.was_cancelled.store(false, Ordering::Release);

            let timeouts = ConnectionTimeouts::with_failover(&settings);
            {
                let uuids = self.duplicated_part_uuids.lock();
                if !uuids.is_empty() {
                    connections.send_ignored_part_uuids(&uuids)?;
                }
            }
            connections.send_query(&timeouts, &self.query, &self.query_id, self.stage, kind)?;

            self.established.store(false, Ordering::Release);
            self.sent_query.store(true, Ordering::Release);
        }

        if settings.enable_scalar_subquery_optimization {
            self.send_scalars()?;
        }
        self.send_external_tables()?;
        Ok(())
    }

    /// Async variant used before a suspend/resume read loop: sends the
    /// query (sends never suspend) and hands back a descriptor to wait on
    /// for the first inbound packet, or `None` when the query was already
    /// sent or no descriptor is available.
    #[cfg(unix)]
    pub fn send_query_async(&self) -> Result<Option<RawFd>> {
        {
            let mut guarded = self.guarded.lock();
            if guarded.read_context.is_none() {
                guarded.read_context = Some(ReadContext::new(true));
            }
            // `sent_query` is not enough here: scalars or external tables
            // may still be outstanding; the read context tracks all three.
            if let Some(context) = guarded.read_context.as_ref() {
                if context.is_query_sent() {
                    return Ok(None);
                }
            }
        }

        self.send_query(QueryKind::Secondary)?;

        let guarded = self.guarded.lock();
        if let Some(context) = guarded.read_context.as_ref() {
            context.set_query_sent();
        }
        Ok(guarded.connections.as_ref().and_then(|c| c.readable_fd()))
    }

    /// Reads until a data block arrives; the terminal empty block means the
    /// stream ended.
    pub fn read_block(&self) -> Result<Block> {
        loop {
            if let ReadResult::Data(block) = self.read()? {
                return Ok(block);
            }
        }
    }

    /// Receives and dispatches packets until one produces a result for the
    /// caller. Implicitly sends the query first if nobody did.
    pub fn read(&self) -> Result<ReadResult> {
        if !self.sent_query.load(Ordering::Acquire) {
            self.send_query(QueryKind::Secondary)?;
            let guarded = self.guarded.lock();
            if self.need_to_skip_unavailable_shard(&guarded) {
                return Ok(ReadResult::Data(Block::empty()));
            }
        }
        if self.finished.load(Ordering::Acquire) {
            return Ok(ReadResult::Data(Block::empty()));
        }

        loop {
            let mut guarded = self.guarded.lock();
            if self.was_cancelled.load(Ordering::Acquire) {
                return Ok(ReadResult::Data(Block::empty()));
            }
            let connections = guarded.connections.as_mut().ok_or_else(|| {
                RemoteError::Logic("reading before connections are established".to_string())
            })?;
            let packet = connections.receive_packet()?;
            let result = self.process_packet(connections, packet)?;
            drop(guarded);

            match result {
                ReadResult::Data(_) | ReadResult::ParallelReplicasToken => return Ok(result),
                _ => {}
            }
            if self.got_duplicated_part_uuids.load(Ordering::Acquire) {
                return self.restart_without_duplicated_parts();
            }
        }
    }

    /// Same semantics as [`read`](Self::read), but instead of blocking on a
    /// packet it may return [`ReadResult::FileDescriptor`]; the caller waits
    /// for readability and calls again.
    pub fn read_async(&self) -> Result<ReadResult> {
        {
            let mut guarded = self.guarded.lock();
            let recreate = self.resent_query.load(Ordering::Acquire)
                && self.recreate_read_context.load(Ordering::Acquire);
            if guarded.read_context.is_none() || recreate {
                guarded.read_context = Some(ReadContext::new(false));
                self.recreate_read_context.store(false, Ordering::Release);
            }
        }

        if !self.sent_query.load(Ordering::Acquire) {
            self.send_query(QueryKind::Secondary)?;
            let guarded = self.guarded.lock();
            if self.need_to_skip_unavailable_shard(&guarded) {
                return Ok(ReadResult::Data(Block::empty()));
            }
            if let Some(context) = guarded.read_context.as_ref() {
                context.set_query_sent();
            }
        }
        if self.finished.load(Ordering::Acquire) {
            return Ok(ReadResult::Data(Block::empty()));
        }

        loop {
            let mut guarded = self.guarded.lock();
            let Guarded { connections, read_context } = &mut *guarded;
            let connections = connections.as_mut().ok_or_else(|| {
                RemoteError::Logic("reading before connections are established".to_string())
            })?;
            let context = read_context.as_mut().ok_or_else(|| {
                RemoteError::Logic("async read without a read context".to_string())
            })?;

            context.resume(connections)?;
            if context.is_cancelled() {
                return Ok(ReadResult::Data(Block::empty()));
            }
            if context.is_in_progress() {
                #[cfg(unix)]
                if let Some(fd) = connections.readable_fd() {
                    return Ok(ReadResult::FileDescriptor(fd));
                }
                continue;
            }
            // Re-check: a cancel may have landed while the packet was being
            // completed.
            if self.was_cancelled.load(Ordering::Acquire) {
                return Ok(ReadResult::Data(Block::empty()));
            }
            let Some(packet) = context.take_packet() else { continue };
            let result = self.process_packet(connections, packet)?;
            drop(guarded);

            match result {
                ReadResult::Data(_) | ReadResult::ParallelReplicasToken => return Ok(result),
                _ => {}
            }
            if self.got_duplicated_part_uuids.load(Ordering::Acquire) {
                return self.restart_without_duplicated_parts();
            }
        }
    }

    /// Drains the fan-out after the caller is done with the data: sends a
    /// cancel (idempotently), then consumes leftover packets so the
    /// connections come back in sync. Logs and profile events are still
    /// forwarded; a replica exception is re-raised.
    pub fn finish(&self) -> Result<()> {
        if !self.is_query_pending() || self.has_thrown_exception() {
            return Ok(());
        }

        self.try_cancel("cancelling query because enough data has been read")?;

        let mut guarded = self.guarded.lock();
        let Some(connections) = guarded.connections.as_mut() else { return Ok(()) };
        if !self.sent_query.load(Ordering::Acquire) {
            return Ok(());
        }

        loop {
            let packet = connections.drain()?;
            match packet {
                Packet::EndOfStream => {
                    self.finished.store(true, Ordering::Release);
                    return Ok(());
                }
                Packet::Log(block) => {
                    if let Some(queue) = thread_log_queue() {
                        if !queue.try_push(block) {
                            tracing::warn!("thread log queue is full, dropping a log block");
                        }
                    }
                }
                Packet::ProfileEvents(block) => {
                    if let Some(queue) = thread_profile_queue() {
                        if !queue.try_push(block) {
                            return Err(RemoteError::System(
                                "could not push into profile queue".to_string(),
                            ));
                        }
                    }
                }
                Packet::Exception(exception) => {
                    self.got_exception_from_replica.store(true, Ordering::Release);
                    return Err(RemoteError::Replica(exception));
                }
                other => {
                    self.got_unknown_packet_from_replica.store(true, Ordering::Release);
                    return Err(RemoteError::UnknownPacket {
                        kind: unknown_kind(&other),
                        addresses: connections.dump_addresses(),
                    });
                }
            }
        }
    }

    /// Stops external-table producers and, if a query is in flight, asks
    /// the replicas to abort it. Safe from any thread. `finish` must still
    /// run afterwards to drain the wire.
    pub fn cancel(&self) -> Result<()> {
        {
            let flags = self.external_table_flags.lock();
            for flag in flags.iter() {
                flag.store(true, Ordering::Relaxed);
            }
        }

        if !self.is_query_pending() || self.has_thrown_exception() {
            return Ok(());
        }
        self.try_cancel("cancelling query")
    }

    /// True between a successful query send and stream exhaustion.
    pub fn is_query_pending(&self) -> bool {
        self.sent_query.load(Ordering::Acquire) && !self.finished.load(Ordering::Acquire)
    }

    /// True once a replica exception or an unknown packet was seen; after
    /// that nothing more is read or sent.
    pub fn has_thrown_exception(&self) -> bool {
        self.got_exception_from_replica.load(Ordering::Acquire)
            || self.got_unknown_packet_from_replica.load(Ordering::Acquire)
    }

    /// Latest totals block, adapted to the header.
    pub fn totals(&self) -> Option<Block> {
        self.totals.lock().clone()
    }

    /// Latest extremes block, adapted to the header.
    pub fn extremes(&self) -> Option<Block> {
        self.extremes.lock().clone()
    }

    pub fn set_progress_callback(&self, callback: impl Fn(&Progress) + Send + Sync + 'static) {
        *self.progress_callback.lock() = Some(Box::new(callback));
    }

    pub fn set_profile_info_callback(
        &self,
        callback: impl Fn(&ProfileInfo) + Send + Sync + 'static,
    ) {
        *self.profile_info_callback.lock() = Some(Box::new(callback));
    }

    fn build_connections(&self) -> Result<Connections> {
        let mut input_slot = self.connection_input.lock();
        let input = input_slot.take().ok_or_else(|| {
            RemoteError::Connection(
                "connections were already consumed and cannot be re-acquired".to_string(),
            )
        })?;
        if let ConnectionInput::Failover { pool, table_hint } = &input {
            *input_slot = Some(ConnectionInput::Failover {
                pool: pool.clone(),
                table_hint: table_hint.clone(),
            });
        }
        drop(input_slot);

        let settings = self.context.settings();
        create_connections(input, &settings, self.replica_info)
    }

    fn need_to_skip_unavailable_shard(&self, guarded: &Guarded) -> bool {
        self.context.settings().skip_unavailable_shards
            && guarded.connections.as_ref().map(|c| c.size() == 0).unwrap_or(false)
    }

    fn send_scalars(&self) -> Result<()> {
        if self.scalars.is_empty() {
            return Ok(());
        }
        let mut guarded = self.guarded.lock();
        if self.was_cancelled.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(connections) = guarded.connections.as_mut() {
            connections.send_scalars(&self.scalars)?;
        }
        Ok(())
    }

    /// Runs exactly once per attempt, between the query and the first read.
    /// Each replica connection gets its own copies of the memory-backed
    /// temporary tables; the terminating empty block is sent even when
    /// there are none, closing the outbound data sequence.
    fn send_external_tables(&self) -> Result<()> {
        let settings = self.context.settings();
        let limits = StreamLimits::from_settings(&settings);

        let mut guarded = self.guarded.lock();
        let Some(connections) = guarded.connections.as_mut() else { return Ok(()) };
        let count = connections.size();

        let mut data = {
            let mut flags = self.external_table_flags.lock();
            let (data, new_flags) =
                build_external_tables_data(count, &self.external_tables, &limits);
            *flags = new_flags;
            data
        };

        if self.was_cancelled.load(Ordering::Acquire) {
            return Ok(());
        }
        connections.send_external_tables(&mut data)
    }

    fn try_cancel(&self, reason: &str) -> Result<()> {
        let mut guarded = self.guarded.lock();
        if self.was_cancelled.load(Ordering::Acquire) {
            return Ok(());
        }
        self.was_cancelled.store(true, Ordering::Release);

        if let Some(context) = guarded.read_context.as_ref() {
            context.cancel();
        }
        if self.sent_query.load(Ordering::Acquire) {
            if let Some(connections) = guarded.connections.as_mut() {
                connections.send_cancel()?;
                connections.wake();
                tracing::trace!(addresses = %connections.dump_addresses(), "{reason}");
            }
        }
        Ok(())
    }

    fn process_packet(&self, connections: &mut Connections, packet: Packet) -> Result<ReadResult> {
        match packet {
            Packet::MergeTreeReadTaskRequest(request) => {
                let coordinator = self.coordinator.as_ref().ok_or_else(|| {
                    RemoteError::Logic(
                        "coordinator for parallel reading from replicas is not initialized"
                            .to_string(),
                    )
                })?;
                let response = coordinator.handle_request(request);
                connections.send_merge_tree_read_task_response(&response)?;
                Ok(ReadResult::ParallelReplicasToken)
            }
            Packet::MergeTreeAllRangesAnnouncement(announcement) => {
                let coordinator = self.coordinator.as_ref().ok_or_else(|| {
                    RemoteError::Logic(
                        "coordinator for parallel reading from replicas is not initialized"
                            .to_string(),
                    )
                })?;
                coordinator.handle_initial_all_ranges_announcement(announcement);
                Ok(ReadResult::ParallelReplicasToken)
            }
            Packet::ReadTaskRequest => {
                let mut iterator = self.task_iterator.lock();
                let iterator = iterator.as_mut().ok_or_else(|| {
                    RemoteError::Logic("distributed task iterator is not initialized".to_string())
                })?;
                let response = iterator();
                connections.send_read_task_response(&response)?;
                Ok(ReadResult::Nothing)
            }
            Packet::PartUuids(uuids) => {
                let duplicates = self.context.part_uuids().add(&uuids);
                if !duplicates.is_empty() {
                    self.duplicated_part_uuids.lock().extend(duplicates);
                    self.got_duplicated_part_uuids.store(true, Ordering::Release);
                }
                Ok(ReadResult::Nothing)
            }
            Packet::Data(block) => {
                // A zero-row block is the header echo; real data and then
                // EndOfStream follow.
                if !block.is_empty() && block.rows() > 0 {
                    Ok(ReadResult::Data(adapt_block(&block, &self.header)?))
                } else {
                    Ok(ReadResult::Nothing)
                }
            }
            Packet::Exception(exception) => {
                self.got_exception_from_replica.store(true, Ordering::Release);
                Err(RemoteError::Replica(exception))
            }
            Packet::EndOfStream => {
                if !connections.has_active_connections() {
                    self.finished.store(true, Ordering::Release);
                    return Ok(ReadResult::Data(Block::empty()));
                }
                Ok(ReadResult::Nothing)
            }
            Packet::Progress(progress) => {
                if let Some(callback) = self.progress_callback.lock().as_ref() {
                    callback(&progress);
                }
                Ok(ReadResult::Nothing)
            }
            Packet::ProfileInfo(info) => {
                if let Some(callback) = self.profile_info_callback.lock().as_ref() {
                    callback(&info);
                }
                Ok(ReadResult::Nothing)
            }
            Packet::Totals(block) => {
                let block =
                    if block.is_empty() { block } else { adapt_block(&block, &self.header)? };
                *self.totals.lock() = Some(block);
                Ok(ReadResult::Nothing)
            }
            Packet::Extremes(block) => {
                let block =
                    if block.is_empty() { block } else { adapt_block(&block, &self.header)? };
                *self.extremes.lock() = Some(block);
                Ok(ReadResult::Nothing)
            }
            Packet::Log(block) => {
                if let Some(queue) = thread_log_queue() {
                    if !queue.try_push(block) {
                        tracing::warn!("thread log queue is full, dropping a log block");
                    }
                }
                Ok(ReadResult::Nothing)
            }
            Packet::ProfileEvents(block) => {
                if let Some(queue) = thread_profile_queue() {
                    if !queue.try_push(block) {
                        return Err(RemoteError::System(
                            "could not push into profile queue".to_string(),
                        ));
                    }
                }
                Ok(ReadResult::Nothing)
            }
            Packet::Unknown(tag) => {
                self.got_unknown_packet_from_replica.store(true, Ordering::Release);
                Err(RemoteError::UnknownPacket {
                    kind: tag.to_string(),
                    addresses: connections.dump_addresses(),
                })
            }
        }
    }

    /// One-shot recovery when two replicas claimed the same data part:
    /// cancel and drop the current fan-out, then re-enter the read path so
    /// the query is re-sent carrying the collided parts as ignored. A second
    /// duplicate event exhausts the budget.
    fn restart_without_duplicated_parts(&self) -> Result<ReadResult> {
        self.cancel()?;
        {
            let mut guarded = self.guarded.lock();
            if let Some(connections) = guarded.connections.as_mut() {
                connections.disconnect();
            }
            guarded.connections = None;
        }

        if self.resent_query.swap(true, Ordering::AcqRel) {
            return Err(RemoteError::DuplicatedPartUuids);
        }

        tracing::debug!("found duplicate part uuids, retrying the query without those parts");
        self.recreate_read_context.store(true, Ordering::Release);
        self.sent_query.store(false, Ordering::Release);
        self.got_duplicated_part_uuids.store(false, Ordering::Release);
        // The new attempt starts here; the cancellation belonged to the old
        // one.
        self.was_cancelled.store(false, Ordering::Release);

        let has_read_context = self.guarded.lock().read_context.is_some();
        if has_read_context {
            self.read_async()
        } else {
            self.read()
        }
    }
}

fn unknown_kind(packet: &Packet) -> String {
    match packet {
        Packet::Unknown(tag) => tag.to_string(),
        other => other.kind().to_string(),
    }
}

impl Drop for RemoteQueryExecutor {
    /// Interrupting mid-conversation leaves connections out of sync; they
    /// must not be returned to a pool in that state.
    fn drop(&mut self) {
        let pending = self.is_query_pending();
        let established = self.established.load(Ordering::Acquire);
        if let Some(connections) = self.guarded.get_mut().connections.as_mut() {
            if established || pending {
                connections.disconnect();
            }
        }
    }
}
