//! Recognition cycle throttle
//!
//! Allows at most one recognition in flight and enforces a minimum spacing
//! between cycle starts. Frames offered while busy or inside the cool-down
//! are dropped by the caller.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Proof that a cycle was started; must be handed back to [`RecognitionThrottle::end_cycle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleTicket(u64);

impl CycleTicket {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct RecognitionThrottle {
    min_interval: Duration,
    last_cycle_start: Option<Instant>,
    in_flight: Option<CycleTicket>,
    next_ticket: u64,
}

impl RecognitionThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_cycle_start: None,
            in_flight: None,
            next_ticket: 0,
        }
    }

    /// Start a cycle if none is running and the cool-down has elapsed
    pub fn try_start_cycle(&mut self, now: Instant) -> Option<CycleTicket> {
        if self.in_flight.is_some() {
            return None;
        }
        if let Some(last) = self.last_cycle_start
            && now.saturating_duration_since(last) < self.min_interval
        {
            return None;
        }

        self.next_ticket += 1;
        let ticket = CycleTicket(self.next_ticket);
        self.in_flight = Some(ticket);
        self.last_cycle_start = Some(now);
        Some(ticket)
    }

    /// Clear the busy flag for `ticket`
    ///
    /// Returns false when the ticket is stale (already released by a timeout
    /// or shutdown), in which case its result must be ignored.
    pub fn end_cycle(&mut self, ticket: CycleTicket) -> bool {
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
            true
        } else {
            debug!(ticket = ticket.id(), "Ignoring end of stale recognition cycle");
            false
        }
    }

    /// Release the busy flag regardless of which cycle holds it
    pub fn force_release(&mut self) {
        if let Some(ticket) = self.in_flight.take() {
            warn!(ticket = ticket.id(), "Force-released in-flight recognition cycle");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }
}
