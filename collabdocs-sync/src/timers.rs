//! Named, cancellable timers owned by a session.
//!
//! At most one deadline per [`TimerKind`]. Re-arming replaces the previous
//! deadline, and teardown cancels them all at once.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Next connect attempt
    Reconnect,
    /// Debounced "reconnecting" advisory
    SoftFailure,
    /// Local typing flips back to false
    TypingIdle,
    /// Periodic full-state broadcast
    Snapshot,
}

#[derive(Debug, Default)]
pub struct Timers {
    deadlines: HashMap<TimerKind, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `kind` after `after`, replacing any pending deadline.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.arm_at(kind, Instant::now() + after);
    }

    pub fn arm_at(&mut self, kind: TimerKind, deadline: Instant) {
        log::trace!("Timer {kind:?} armed");
        self.deadlines.insert(kind, deadline);
    }

    /// Returns `true` if the timer was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines.get(&kind).copied()
    }

    /// Number of pending timers.
    pub fn armed(&self) -> usize {
        self.deadlines.len()
    }

    /// Wait for the earliest deadline and disarm it.
    ///
    /// Pends forever when nothing is armed. Cancellation safe: the timer is
    /// only removed once it has actually elapsed, so dropping this future
    /// inside `select!` loses nothing.
    pub async fn fired(&mut self) -> TimerKind {
        let next = self
            .deadlines
            .iter()
            .map(|(kind, deadline)| (*deadline, *kind))
            .min();

        match next {
            Some((deadline, kind)) => {
                tokio::time::sleep_until(deadline).await;
                self.deadlines.remove(&kind);
                kind
            }
            None => std::future::pending().await,
        }
    }
}
