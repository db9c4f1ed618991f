//! Deferred work scheduling
//!
//! Debounced saves, debounced recounts and idle-time cache invalidation all
//! reduce to "run this keyed task at or after some deadline". [`WorkQueue`]
//! keeps those deadlines; the host drives it by asking for due work.
//!
//! The policy decides how eager the queue is:
//!
//! - `Immediate`: every task is due as soon as it is scheduled (tests)
//! - `Idle`: tasks may run early whenever the host reports idle time, and
//!   run at their deadline at the latest, so idle work cannot starve
//! - `Timer`: tasks run at their deadline only

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicyKind {
    Immediate,
    #[default]
    Idle,
    Timer,
}

/// Keyed deadlines for deferred work
#[derive(Debug, Clone)]
pub struct WorkQueue<K: Ord + Clone> {
    policy: SchedulePolicyKind,
    deadlines: BTreeMap<K, Instant>,
}

impl<K: Ord + Clone> WorkQueue<K> {
    pub fn new(policy: SchedulePolicyKind) -> Self {
        Self {
            policy,
            deadlines: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> SchedulePolicyKind {
        self.policy
    }

    /// Trailing debounce: (re)arm `key` to run `delay` from now
    pub fn schedule(&mut self, key: K, delay: Duration) {
        let deadline = self.deadline_for(delay);
        self.deadlines.insert(key, deadline);
    }

    /// Arm `key` unless it is already pending; an earlier deadline is kept
    pub fn schedule_once(&mut self, key: K, delay: Duration) {
        let deadline = self.deadline_for(delay);
        self.deadlines
            .entry(key)
            .and_modify(|d| *d = (*d).min(deadline))
            .or_insert(deadline);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Remove and return every task whose deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let due: Vec<K> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &due {
            self.deadlines.remove(key);
        }
        due
    }

    /// Remove and return the tasks that may run now that the host is idle
    pub fn take_idle(&mut self, now: Instant) -> Vec<K> {
        match self.policy {
            SchedulePolicyKind::Immediate | SchedulePolicyKind::Idle => {
                std::mem::take(&mut self.deadlines).into_keys().collect()
            }
            SchedulePolicyKind::Timer => self.take_due(now),
        }
    }

    /// Remove and return everything, regardless of deadline
    pub fn drain(&mut self) -> Vec<K> {
        std::mem::take(&mut self.deadlines).into_keys().collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    fn deadline_for(&self, delay: Duration) -> Instant {
        let now = Instant::now();
        match self.policy {
            SchedulePolicyKind::Immediate => now,
            SchedulePolicyKind::Idle | SchedulePolicyKind::Timer => now + delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_trailing_debounce_rearms() {
        let mut queue = WorkQueue::new(SchedulePolicyKind::Timer);
        queue.schedule("save", Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(400)).await;
        queue.schedule("save", Duration::from_millis(500));
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(queue.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(queue.take_due(Instant::now()), vec!["save"]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_keeps_earliest_deadline() {
        let mut queue = WorkQueue::new(SchedulePolicyKind::Timer);
        queue.schedule_once("toc", Duration::from_millis(1000));
        tokio::time::advance(Duration::from_millis(600)).await;
        queue.schedule_once("toc", Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(queue.take_due(Instant::now()), vec!["toc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_policy_is_always_due() {
        let mut queue = WorkQueue::new(SchedulePolicyKind::Immediate);
        queue.schedule(1u32, Duration::from_secs(60));
        assert_eq!(queue.take_due(Instant::now()), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_runs_early_timer_does_not() {
        let mut idle = WorkQueue::new(SchedulePolicyKind::Idle);
        idle.schedule("a", Duration::from_secs(1));
        assert_eq!(idle.take_idle(Instant::now()), vec!["a"]);

        let mut timer = WorkQueue::new(SchedulePolicyKind::Timer);
        timer.schedule("a", Duration::from_secs(1));
        assert!(timer.take_idle(Instant::now()).is_empty());
        assert!(timer.is_pending(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_next_deadline() {
        let mut queue = WorkQueue::new(SchedulePolicyKind::Timer);
        let start = Instant::now();
        queue.schedule(2u8, Duration::from_millis(200));
        queue.schedule(1u8, Duration::from_millis(100));
        assert_eq!(queue.next_deadline(), Some(start + Duration::from_millis(100)));

        assert!(queue.cancel(&1));
        assert!(!queue.cancel(&1));
        assert_eq!(queue.len(), 1);
    }
}
