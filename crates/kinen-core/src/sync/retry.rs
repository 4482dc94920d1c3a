//! Backoff scheduling for failed mutations

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::MutationId;

/// Source of "now" for retry scheduling
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    fn guard(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.guard();
        *now = add_std(*now, by);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.guard() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.guard()
    }
}

/// `at + by`, saturating at the latest representable time
pub(super) fn add_std(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `base * 2^(retry_count - 1)`; the first retry waits `base`.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(31);
    base.saturating_mul(1_u32 << exponent)
}

#[derive(Default)]
struct Schedule {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, MutationId)>>,
    due_at: HashMap<MutationId, DateTime<Utc>>,
}

/// Priority queue of retry due-times, keyed by mutation.
///
/// Rescheduling a mutation replaces its previous due time.
pub struct RetryScheduler {
    clock: Arc<dyn Clock>,
    schedule: Mutex<Schedule>,
}

impl RetryScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            schedule: Mutex::new(Schedule::default()),
        }
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Schedule `id` to run after `delay`; returns the due time.
    pub fn schedule_after(&self, id: MutationId, delay: Duration) -> DateTime<Utc> {
        let due = add_std(self.now(), delay);
        self.schedule_at(id, due);
        due
    }

    /// Schedule `id` to run at `due`.
    pub fn schedule_at(&self, id: MutationId, due: DateTime<Utc>) {
        let mut schedule = self.schedule();
        schedule.due_at.insert(id, due);
        schedule.heap.push(Reverse((due, id)));
    }

    pub fn is_scheduled(&self, id: MutationId) -> bool {
        self.schedule().due_at.contains_key(&id)
    }

    pub fn cancel(&self, id: MutationId) -> bool {
        self.schedule().due_at.remove(&id).is_some()
    }

    /// Remove and return every mutation whose due time has passed, earliest first.
    pub fn take_due(&self) -> Vec<MutationId> {
        let now = self.now();
        let mut schedule = self.schedule();
        let mut due = Vec::new();

        while let Some(Reverse((at, id))) = schedule.heap.peek().copied() {
            if at > now {
                break;
            }
            schedule.heap.pop();
            // Skip entries superseded by a later reschedule or a cancel
            if schedule.due_at.get(&id) == Some(&at) {
                schedule.due_at.remove(&id);
                due.push(id);
            }
        }
        due
    }

    /// Whether anything is due right now.
    pub fn has_due(&self) -> bool {
        self.next_due().is_some_and(|at| at <= self.now())
    }

    /// Earliest live due time.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.schedule().due_at.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.schedule().due_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut schedule = self.schedule();
        schedule.heap.clear();
        schedule.due_at.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(Duration::MAX, 40), Duration::MAX);
    }

    #[test]
    fn due_entries_follow_the_clock() {
        let clock = ManualClock::default();
        let scheduler = RetryScheduler::new(Arc::new(clock.clone()));

        scheduler.schedule_after(1, Duration::from_secs(2));
        scheduler.schedule_after(2, Duration::from_secs(1));
        assert!(scheduler.take_due().is_empty());
        assert!(!scheduler.has_due());

        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.take_due(), vec![2]);

        clock.advance(Duration::from_secs(5));
        assert_eq!(scheduler.take_due(), vec![1]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn rescheduling_replaces_due_time() {
        let clock = ManualClock::default();
        let scheduler = RetryScheduler::new(Arc::new(clock.clone()));

        scheduler.schedule_after(7, Duration::from_secs(1));
        let due = scheduler.schedule_after(7, Duration::from_secs(10));
        assert_eq!(scheduler.next_due(), Some(due));

        clock.advance(Duration::from_secs(2));
        assert!(scheduler.take_due().is_empty());
        assert!(scheduler.is_scheduled(7));

        assert!(scheduler.cancel(7));
        clock.advance(Duration::from_secs(20));
        assert!(scheduler.take_due().is_empty());
    }
}
