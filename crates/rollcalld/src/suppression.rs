//! Per-(session, student) cooldown that keeps consecutive frames from
//! re-attempting the same attendance write.
//!
//! Entries expire after the cooldown and the buffer never holds more than
//! `capacity` keys; the oldest entry is evicted first.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuppressionKey {
    pub session_id: i64,
    pub student_id: i64,
}

impl SuppressionKey {
    pub fn new(session_id: i64, student_id: i64) -> Self {
        Self {
            session_id,
            student_id,
        }
    }
}

pub struct SuppressionBuffer {
    cooldown: Duration,
    capacity: usize,
    last_marked: HashMap<SuppressionKey, Instant>,
    /// Insertion order; may hold stale pairs for keys refreshed since.
    order: VecDeque<(Instant, SuppressionKey)>,
}

impl SuppressionBuffer {
    pub fn new(cooldown: Duration, capacity: usize) -> Self {
        Self {
            cooldown,
            capacity: capacity.max(1),
            last_marked: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// True when no attempt for `key` happened within the cooldown.
    pub fn should_mark(&self, key: SuppressionKey, now: Instant) -> bool {
        match self.last_marked.get(&key) {
            Some(&last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Note an attempt for `key` at `now`.
    pub fn record(&mut self, key: SuppressionKey, now: Instant) {
        self.last_marked.insert(key, now);
        self.order.push_back((now, key));
        self.sweep(now);

        while self.last_marked.len() > self.capacity {
            let Some((at, oldest)) = self.order.pop_front() else {
                break;
            };
            if self.last_marked.get(&oldest) == Some(&at) {
                self.last_marked.remove(&oldest);
            }
        }
    }

    /// Drop every entry whose cooldown has elapsed.
    pub fn sweep(&mut self, now: Instant) {
        while let Some(&(at, key)) = self.order.front() {
            if now.saturating_duration_since(at) < self.cooldown {
                break;
            }
            self.order.pop_front();
            if self.last_marked.get(&key) == Some(&at) {
                self.last_marked.remove(&key);
            }
        }
    }

    /// Forget every entry for one session.
    pub fn forget_session(&mut self, session_id: i64) {
        self.last_marked.retain(|k, _| k.session_id != session_id);
        self.order.retain(|(_, k)| k.session_id != session_id);
    }

    pub fn len(&self) -> usize {
        self.last_marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_marked.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
