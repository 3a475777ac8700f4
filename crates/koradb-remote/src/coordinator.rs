//! Server-initiated coordination: work-stealing task requests and
//! parallel-replica range assignment.

use serde::{Deserialize, Serialize};

/// Producer of work-steal responses. Called each time a replica asks for the
/// next unit of work; an empty string tells the replica there is no more.
pub type TaskIterator = Box<dyn FnMut() -> String + Send>;

/// Half-open range of index marks inside one data part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRange {
    pub begin: u64,
    pub end: u64,
}

/// Mark ranges of a single data part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRanges {
    pub part_name: String,
    pub ranges: Vec<MarkRange>,
}

/// A replica asking the coordinator which ranges it should read next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelReadRequest {
    pub replica_num: usize,
    pub min_marks: u64,
    pub description: Vec<PartRanges>,
}

/// Ranges granted to the asking replica; `finish` tells it to stop asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelReadResponse {
    pub finish: bool,
    pub description: Vec<PartRanges>,
}

/// First packet of the parallel-replica handshake: everything the replica
/// could read, before any assignment has been made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialRangesAnnouncement {
    pub replica_num: usize,
    pub description: Vec<PartRanges>,
}

impl ParallelReadRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

impl ParallelReadResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

impl InitialRangesAnnouncement {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// Oracle that assigns non-overlapping ranges to parallel replicas.
/// `handle_request` answers a replica synchronously; the announcement is
/// one-way and seeds the coordinator's view of what exists.
pub trait ParallelReplicasCoordinator: Send + Sync {
    fn handle_request(&self, request: ParallelReadRequest) -> ParallelReadResponse;
    fn handle_initial_all_ranges_announcement(&self, announcement: InitialRangesAnnouncement);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_roundtrip() {
        let request = ParallelReadRequest {
            replica_num: 2,
            min_marks: 8,
            description: vec![PartRanges {
                part_name: "all_1_1_0".to_string(),
                ranges: vec![MarkRange { begin: 0, end: 16 }],
            }],
        };
        let decoded = ParallelReadRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(decoded, request);
        assert!(ParallelReadRequest::from_bytes(b"not json").is_none());
    }
}
