//! Restrictions and trackers for splittable processing.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Half-open range of positions `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetRange {
    pub from: u64,
    pub to: u64,
}

impl OffsetRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits into consecutive pieces of at most `chunk` positions.
    pub fn split(&self, chunk: u64) -> Vec<OffsetRange> {
        if chunk == 0 || self.len() <= chunk {
            return vec![*self];
        }
        let mut pieces = Vec::new();
        let mut from = self.from;
        while from < self.to {
            let to = self.to.min(from.saturating_add(chunk));
            pieces.push(OffsetRange::new(from, to));
            from = to;
        }
        pieces
    }
}

impl fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// Tracks claimed progress through a restriction.
pub trait RestrictionTracker: Send {
    /// Attempts to claim `position`. A `false` return means processing must stop.
    fn try_claim(&mut self, position: u64) -> bool;

    fn current_restriction(&self) -> OffsetRange;

    /// Shrinks the current restriction to the claimed prefix and returns the unclaimed rest.
    fn checkpoint(&mut self) -> OffsetRange;

    /// Last claimed position, if any.
    fn last_claimed(&self) -> Option<u64>;

    /// Whether every position of the restriction has been processed.
    fn is_done(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct OffsetRangeTracker {
    range: OffsetRange,
    last_attempted: Option<u64>,
    last_claimed: Option<u64>,
}

impl OffsetRangeTracker {
    pub fn new(range: OffsetRange) -> Self {
        Self {
            range,
            last_attempted: None,
            last_claimed: None,
        }
    }
}

impl RestrictionTracker for OffsetRangeTracker {
    fn try_claim(&mut self, position: u64) -> bool {
        if let Some(last) = self.last_attempted {
            if position <= last {
                return false;
            }
        }
        if position < self.range.from {
            return false;
        }
        self.last_attempted = Some(position);
        if position >= self.range.to {
            return false;
        }
        self.last_claimed = Some(position);
        true
    }

    fn current_restriction(&self) -> OffsetRange {
        self.range
    }

    fn checkpoint(&mut self) -> OffsetRange {
        let split_at = match self.last_attempted {
            Some(last) => last.saturating_add(1).min(self.range.to),
            None => self.range.from,
        };
        let residual = OffsetRange::new(split_at, self.range.to);
        self.range = OffsetRange::new(self.range.from, split_at);
        residual
    }

    fn last_claimed(&self) -> Option<u64> {
        self.last_claimed
    }

    fn is_done(&self) -> bool {
        if self.range.is_empty() {
            return true;
        }
        matches!(self.last_attempted, Some(last) if last.saturating_add(1) >= self.range.to)
    }
}

/// What a splittable process-element invocation asks for when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessContinuation {
    /// The element is fully consumed.
    #[default]
    Stop,
    /// Reschedule the unclaimed remainder of the restriction.
    Resume { delay: Duration },
}

impl ProcessContinuation {
    pub fn resume() -> Self {
        Self::Resume {
            delay: Duration::ZERO,
        }
    }

    pub fn should_resume(&self) -> bool {
        matches!(self, Self::Resume { .. })
    }
}
