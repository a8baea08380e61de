//! Per-profile write/read history.
//!
//! Tracks where the next write goes and which time range is known to hold
//! only correctly written data. The history is owned by the run loop of a
//! single profile and is only changed by write outcomes and, once at
//! startup, by recovery.

use crate::model::Timestamp;

/// Inclusive time range that can be queried and must verify cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRange {
    /// Oldest verifiable timestamp.
    pub min: Timestamp,
    /// Newest verifiable timestamp.
    pub max: Timestamp,
}

/// Write cursor and queryable range of one profile.
///
/// Invariant: `query_range.min <= query_range.max <= last_written` whenever
/// the fields are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReadHistory {
    last_written: Option<Timestamp>,
    query_range: Option<QueryRange>,
}

impl WriteReadHistory {
    /// Creates an empty history: nothing written, nothing to query.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_written: None,
            query_range: None,
        }
    }

    /// Creates a history resuming from a recovered range.
    ///
    /// The cursor is placed on the newest recovered point.
    #[must_use]
    pub const fn recovered(from: Timestamp, to: Timestamp) -> Self {
        Self {
            last_written: Some(to),
            query_range: Some(QueryRange { min: from, max: to }),
        }
    }

    /// Returns the timestamp of the last write, successful or rejected.
    #[must_use]
    pub const fn last_written(&self) -> Option<Timestamp> {
        self.last_written
    }

    /// Returns the range that can be queried, if any.
    #[must_use]
    pub const fn query_range(&self) -> Option<QueryRange> {
        self.query_range
    }

    /// Records a successful write at `ts`, extending the queryable range.
    pub fn record_write_ok(&mut self, ts: Timestamp) {
        self.last_written = Some(ts);
        self.query_range = Some(match self.query_range {
            Some(range) => QueryRange {
                min: range.min,
                max: ts,
            },
            None => QueryRange { min: ts, max: ts },
        });
    }

    /// Records a write at `ts` rejected as a client error.
    ///
    /// The data may be missing or partial, so nothing written so far can be
    /// asserted on anymore. The cursor still moves on.
    pub fn record_write_rejected(&mut self, ts: Timestamp) {
        self.last_written = Some(ts);
        self.query_range = None;
    }
}
