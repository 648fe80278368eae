//! Deferred callbacks for the viewer event loop

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use super::tier::Tier;
use super::token::{JobId, RunId};

/// Something the viewer asked to be told about later
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Timer {
    /// Load the first page shortly after the document opens
    InitialLoad,

    /// Start (or retry) an attempt at `tier` for an escalation run
    StartAttempt { page: u32, run: RunId, tier: Tier },

    /// Give up on an attempt still in flight
    AttemptDeadline { job: JobId },

    /// Reclaim tiers below `kept` once the display has swapped to it
    DropLowerTiers { page: u32, kept: Tier },

    /// Preview-only preload of a neighbour of `origin`
    Preload { page: u32, origin: u32 },
}

#[derive(Debug)]
struct Scheduled {
    deadline: Instant,
    seq: u64,
    timer: Timer,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Deadline-ordered timer queue; ties fire in scheduling order
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, timer: Timer) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled {
            deadline: now + delay,
            seq,
            timer,
        }));
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.deadline)
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due = Vec::new();
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(s)| s.deadline <= now)
        {
            if let Some(Reverse(scheduled)) = self.heap.pop() {
                due.push(scheduled.timer);
            }
        }
        due
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_timer(page: u32) -> Timer {
        Timer::DropLowerTiers {
            page,
            kept: Tier::Final,
        }
    }

    #[test]
    fn pops_in_deadline_order() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(now, Duration::from_millis(300), drop_timer(3));
        queue.schedule(now, Duration::from_millis(100), drop_timer(1));
        queue.schedule(now, Duration::from_millis(200), drop_timer(2));

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(100)));
        assert!(queue.pop_due(now).is_empty());

        let due = queue.pop_due(now + Duration::from_millis(250));
        assert_eq!(due, vec![drop_timer(1), drop_timer(2)]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn ties_fire_in_scheduling_order() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(now, Duration::from_millis(500), drop_timer(7));
        queue.schedule(now, Duration::from_millis(500), Timer::InitialLoad);
        queue.schedule(now, Duration::from_millis(500), drop_timer(1));

        let due = queue.pop_due(now + Duration::from_millis(500));
        assert_eq!(due, vec![drop_timer(7), Timer::InitialLoad, drop_timer(1)]);
        assert!(queue.is_empty());
    }
}
