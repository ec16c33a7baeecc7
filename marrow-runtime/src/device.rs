//! # Device Boundary
//!
//! The runtime core does no I/O. Device backends hand the heap a pending
//! request (the port frame driving it plus an optional transfer buffer)
//! and complete it later. While a request is pending, both series are
//! part of the collector's root set: an async read's buffer must not be
//! swept just because no evaluated code holds it yet.

use std::fmt;

use crate::series::SeriesId;

/// Identifier of a pending device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request:{}", self.0)
    }
}

/// One in-flight device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    /// This request's id.
    pub id: RequestId,
    /// Port frame the request belongs to.
    pub port: SeriesId,
    /// Transfer buffer, if the operation carries one.
    pub buffer: Option<SeriesId>,
}

/// Registry of pending device requests.
#[derive(Debug, Default)]
pub struct DeviceQueue {
    pending: Vec<DeviceRequest>,
    next_id: u64,
}

impl DeviceQueue {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, rooting `port` and `buffer` until completion.
    pub fn queue(&mut self, port: SeriesId, buffer: Option<SeriesId>) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.pending.push(DeviceRequest { id, port, buffer });
        id
    }

    /// Complete and remove a request. Returns `None` when the id is
    /// unknown or already completed.
    pub fn complete(&mut self, id: RequestId) -> Option<DeviceRequest> {
        let at = self.pending.iter().position(|request| request.id == id)?;
        Some(self.pending.swap_remove(at))
    }

    /// The requests currently pending.
    pub fn pending(&self) -> &[DeviceRequest] {
        &self.pending
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
