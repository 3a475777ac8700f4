//! Wire packets received from remote replicas.
//!
//! The framing codec lives in the transport layer; by the time a packet
//! reaches this crate it is already decoded into one of the variants below.
//! Tags the codec does not recognize are surfaced as [`Packet::Unknown`] so
//! the executor can fail with the offending tag and the replica addresses.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::block::Block;
use crate::coordinator::{InitialRangesAnnouncement, ParallelReadRequest};

/// One decoded inbound packet.
#[derive(Debug, Clone)]
pub enum Packet {
    /// A result block.
    Data(Block),
    /// Totals row of a GROUP BY WITH TOTALS.
    Totals(Block),
    /// Extremes (min/max) of the result.
    Extremes(Block),
    /// Execution progress delta.
    Progress(Progress),
    /// Final profile counters of the remote pipeline.
    ProfileInfo(ProfileInfo),
    /// Block of profile events rows.
    ProfileEvents(Block),
    /// Block of remote log rows.
    Log(Block),
    /// Remote execution failed.
    Exception(ReplicaException),
    /// The replica finished sending.
    EndOfStream,
    /// Identifiers of the data parts the replica is about to read.
    PartUuids(Vec<Uuid>),
    /// The replica asks for the next work-steal item.
    ReadTaskRequest,
    /// The replica asks the parallel-reading coordinator for ranges.
    MergeTreeReadTaskRequest(ParallelReadRequest),
    /// Initial announcement of all ranges a replica can read.
    MergeTreeAllRangesAnnouncement(InitialRangesAnnouncement),
    /// The codec saw a tag it does not recognize.
    Unknown(u8),
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Data(_) => "Data",
            Packet::Totals(_) => "Totals",
            Packet::Extremes(_) => "Extremes",
            Packet::Progress(_) => "Progress",
            Packet::ProfileInfo(_) => "ProfileInfo",
            Packet::ProfileEvents(_) => "ProfileEvents",
            Packet::Log(_) => "Log",
            Packet::Exception(_) => "Exception",
            Packet::EndOfStream => "EndOfStream",
            Packet::PartUuids(_) => "PartUUIDs",
            Packet::ReadTaskRequest => "ReadTaskRequest",
            Packet::MergeTreeReadTaskRequest(_) => "MergeTreeReadTaskRequest",
            Packet::MergeTreeAllRangesAnnouncement(_) => "MergeTreeAllRangesAnnouncement",
            Packet::Unknown(_) => "Unknown",
        }
    }
}

/// Progress delta reported by a replica. Values are cumulative only after
/// [`Progress::add`]; each packet carries the increment since the last one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub read_rows: u64,
    pub read_bytes: u64,
    pub total_rows_to_read: u64,
    pub written_rows: u64,
    pub written_bytes: u64,
}

impl Progress {
    pub fn add(&mut self, other: &Progress) {
        self.read_rows += other.read_rows;
        self.read_bytes += other.read_bytes;
        self.total_rows_to_read = self.total_rows_to_read.max(other.total_rows_to_read);
        self.written_rows += other.written_rows;
        self.written_bytes += other.written_bytes;
    }
}

/// Profile counters of the remote pipeline, sent once near the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

/// An error raised on a replica and shipped back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaException {
    pub code: i32,
    pub message: String,
    pub stack_trace: String,
}

impl ReplicaException {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        ReplicaException { code, message: message.into(), stack_trace: String::new() }
    }
}

impl fmt::Display for ReplicaException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, message: {}", self.code, self.message)
    }
}

impl std::error::Error for ReplicaException {}
