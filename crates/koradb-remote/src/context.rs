//! Query-wide context: settings, the part-UUID registry shared by all
//! executors of one query, and the ambient per-thread log/profile queues.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::block::Block;
use crate::settings::Settings;

/// Ambient state shared by every executor participating in one query.
pub struct QueryContext {
    settings: RwLock<Settings>,
    part_uuids: PartUuidRegistry,
}

impl QueryContext {
    pub fn new(settings: Settings) -> Self {
        QueryContext { settings: RwLock::new(settings), part_uuids: PartUuidRegistry::new() }
    }

    /// Snapshot of the current settings. Callers that need a consistent view
    /// across several reads should take one snapshot and reuse it.
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    pub fn part_uuids(&self) -> &PartUuidRegistry {
        &self.part_uuids
    }
}

/// Registry of data-part UUIDs claimed by executors of this query. Two
/// replicas claiming the same part is the signal for the duplicate-UUID
/// retry protocol.
#[derive(Default)]
pub struct PartUuidRegistry {
    seen: Mutex<HashSet<Uuid>>,
}

impl PartUuidRegistry {
    pub fn new() -> Self {
        PartUuidRegistry::default()
    }

    /// Registers `uuids` and returns the ones that were already claimed.
    pub fn add(&self, uuids: &[Uuid]) -> Vec<Uuid> {
        let mut seen = self.seen.lock();
        let mut duplicates = Vec::new();
        for uuid in uuids {
            if !seen.insert(*uuid) {
                duplicates.push(*uuid);
            }
        }
        duplicates
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// Bounded FIFO of blocks. Push is non-blocking: a full queue rejects.
pub struct BoundedBlockQueue {
    capacity: usize,
    queue: Mutex<VecDeque<Block>>,
}

impl BoundedBlockQueue {
    pub fn new(capacity: usize) -> Self {
        BoundedBlockQueue { capacity, queue: Mutex::new(VecDeque::new()) }
    }

    pub fn try_push(&self, block: Block) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(block);
        true
    }

    pub fn pop(&self) -> Option<Block> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

thread_local! {
    static THREAD_LOG_QUEUE: RefCell<Option<Arc<BoundedBlockQueue>>> = const { RefCell::new(None) };
    static THREAD_PROFILE_QUEUE: RefCell<Option<Arc<BoundedBlockQueue>>> = const { RefCell::new(None) };
}

/// Routes remote server logs received on this thread into `queue`.
/// Pass `None` to detach.
pub fn attach_thread_log_queue(queue: Option<Arc<BoundedBlockQueue>>) {
    THREAD_LOG_QUEUE.with(|q| *q.borrow_mut() = queue);
}

pub fn thread_log_queue() -> Option<Arc<BoundedBlockQueue>> {
    THREAD_LOG_QUEUE.with(|q| q.borrow().clone())
}

/// Routes remote profile-events blocks received on this thread into `queue`.
pub fn attach_thread_profile_queue(queue: Option<Arc<BoundedBlockQueue>>) {
    THREAD_PROFILE_QUEUE.with(|q| *q.borrow_mut() = queue);
}

pub fn thread_profile_queue() -> Option<Arc<BoundedBlockQueue>> {
    THREAD_PROFILE_QUEUE.with(|q| q.borrow().clone())
}
