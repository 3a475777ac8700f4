//! Streaming temporary tables to remote replicas.
//!
//! Only in-memory temporary tables ship; other storages are skipped
//! silently. Each connection of the fan-out gets its own set of entries so
//! replicas receive independent copies. An entry carries a stream builder
//! that can be re-invoked if the connection layer needs to re-stream, the
//! first-built stream, and a cancel flag shared with the executor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::block::Block;
use crate::error::{RemoteError, Result};
use crate::settings::{OverflowMode, Settings};

/// Rows per block when re-chunking a snapshot for the wire.
pub const DEFAULT_BLOCK_SIZE: usize = 65_409;

/// Named temporary tables attached to a query.
pub type ExternalTables = Vec<(String, Arc<dyn TemporaryTableStorage>)>;

/// Storage behind a temporary table. The driver only ever asks whether the
/// storage is the in-memory variant; everything else stays behind its own
/// engine and is not shipped.
pub trait TemporaryTableStorage: Send + Sync {
    fn as_memory(&self) -> Option<&MemoryTable> {
        None
    }
}

/// In-memory temporary table: a header plus appended blocks.
pub struct MemoryTable {
    header: Block,
    blocks: RwLock<Vec<Block>>,
}

impl MemoryTable {
    pub fn new(header: Block) -> Self {
        MemoryTable { header, blocks: RwLock::new(Vec::new()) }
    }

    pub fn header(&self) -> &Block {
        &self.header
    }

    pub fn write(&self, block: Block) -> Result<()> {
        if block.column_names() != self.header.column_names() {
            return Err(RemoteError::BlockStructure(format!(
                "block columns {:?} do not match table columns {:?}",
                block.column_names(),
                self.header.column_names()
            )));
        }
        self.blocks.write().push(block);
        Ok(())
    }

    /// Copy of the current contents; later writes are not visible.
    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    pub fn total_rows(&self) -> usize {
        self.blocks.read().iter().map(|b| b.rows()).sum()
    }
}

impl TemporaryTableStorage for MemoryTable {
    fn as_memory(&self) -> Option<&MemoryTable> {
        Some(self)
    }
}

/// Pull-based stream of blocks headed for one replica.
pub type BlockStream = Box<dyn Iterator<Item = Result<Block>> + Send>;

/// Limits enforced while streaming, mirroring the server-side execution
/// budget of the query the tables belong to.
#[derive(Debug, Clone)]
pub struct StreamLimits {
    pub max_execution_time_ms: Option<u64>,
    pub overflow_mode: OverflowMode,
}

impl StreamLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        StreamLimits {
            max_execution_time_ms: settings.max_execution_time_ms,
            overflow_mode: settings.timeout_overflow_mode,
        }
    }
}

/// Snapshot re-chunked to at most `max_block_size` rows per block.
struct ChunkedSnapshotStream {
    pending: VecDeque<Block>,
}

impl ChunkedSnapshotStream {
    fn new(blocks: Vec<Block>, max_block_size: usize) -> Self {
        let mut pending = VecDeque::new();
        for block in blocks {
            let rows = block.rows();
            if rows <= max_block_size {
                pending.push_back(block);
                continue;
            }
            let mut offset = 0;
            while offset < rows {
                let length = max_block_size.min(rows - offset);
                pending.push_back(block.slice(offset, length));
                offset += length;
            }
        }
        ChunkedSnapshotStream { pending }
    }
}

impl Iterator for ChunkedSnapshotStream {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pending.pop_front().map(Ok)
    }
}

/// Enforces the execution-time budget and the shared cancel flag on top of
/// an inner stream.
struct LimitCheckedStream {
    inner: BlockStream,
    deadline: Option<Instant>,
    overflow_mode: OverflowMode,
    cancelled: Arc<AtomicBool>,
    done: bool,
}

impl LimitCheckedStream {
    fn new(inner: BlockStream, limits: &StreamLimits, cancelled: Arc<AtomicBool>) -> Self {
        LimitCheckedStream {
            inner,
            deadline: limits
                .max_execution_time_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
            overflow_mode: limits.overflow_mode,
            cancelled,
            done: false,
        }
    }
}

impl Iterator for LimitCheckedStream {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cancelled.load(Ordering::Relaxed) {
            return None;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.done = true;
                return match self.overflow_mode {
                    OverflowMode::Break => None,
                    OverflowMode::Throw => Some(Err(RemoteError::Timeout(
                        "max_execution_time exceeded while sending external tables".to_string(),
                    ))),
                };
            }
        }
        self.inner.next()
    }
}

/// One temporary table prepared for one replica connection.
pub struct ExternalTableEntry {
    pub table_name: String,
    /// Rebuilds the stream from a fresh snapshot; invoked again when the
    /// connection layer needs to re-stream the table.
    pub creating_stream: Box<dyn Fn() -> BlockStream + Send + Sync>,
    pub stream: BlockStream,
    cancelled: Arc<AtomicBool>,
}

impl ExternalTableEntry {
    /// Returns `None` for storages that are not memory-backed.
    pub fn new(
        table_name: &str,
        storage: Arc<dyn TemporaryTableStorage>,
        limits: StreamLimits,
        cancelled: Arc<AtomicBool>,
    ) -> Option<Self> {
        storage.as_memory()?;

        let creating_stream: Box<dyn Fn() -> BlockStream + Send + Sync> = {
            let storage = storage.clone();
            let limits = limits.clone();
            let cancelled = cancelled.clone();
            Box::new(move || {
                let blocks =
                    storage.as_memory().map(|table| table.snapshot()).unwrap_or_default();
                let chunked = ChunkedSnapshotStream::new(blocks, DEFAULT_BLOCK_SIZE);
                Box::new(LimitCheckedStream::new(Box::new(chunked), &limits, cancelled.clone()))
            })
        };
        let stream = creating_stream();

        Some(ExternalTableEntry {
            table_name: table_name.to_string(),
            creating_stream,
            stream,
            cancelled,
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Restarts the stream from a fresh snapshot.
    pub fn restream(&mut self) {
        self.stream = (self.creating_stream)();
    }
}

/// Builds the per-connection external-tables matrix: `fan_out` rows, one
/// entry per memory-backed table. Returns the entries together with their
/// cancel flags so the owner can stop all producers at once.
pub fn build_external_tables_data(
    fan_out: usize,
    tables: &ExternalTables,
    limits: &StreamLimits,
) -> (Vec<Vec<ExternalTableEntry>>, Vec<Arc<AtomicBool>>) {
    let mut data = Vec::with_capacity(fan_out);
    let mut flags = Vec::new();
    for _ in 0..fan_out {
        let mut entries = Vec::new();
        for (name, storage) in tables {
            let flag = Arc::new(AtomicBool::new(false));
            if let Some(entry) =
                ExternalTableEntry::new(name, storage.clone(), limits.clone(), flag.clone())
            {
                flags.push(flag);
                entries.push(entry);
            }
        }
        data.push(entries);
    }
    (data, flags)
}
