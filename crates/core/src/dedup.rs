use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::envelope::EnvelopeKey;

/// Default number of keys retained before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default horizon after which a key is considered safe to forget: Slack
/// redelivers only around reconnects, which resolve well inside this window.
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(15 * 60);

/// Bounded recency set of envelope keys seen by the process.
///
/// Shared by the listener (marks every forwarded envelope) and the delivery
/// agent (marks its own sends so a fast echo cannot be re-forwarded). A single
/// mutex is sufficient at chat-message volume.
#[derive(Debug)]
pub struct DedupWindow {
    inner: Mutex<WindowState>,
    capacity: usize,
    horizon: Duration,
}

#[derive(Debug, Default)]
struct WindowState {
    seen: HashSet<EnvelopeKey>,
    order: VecDeque<(EnvelopeKey, Instant)>,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_HORIZON)
    }
}

impl DedupWindow {
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self { inner: Mutex::new(WindowState::default()), capacity: capacity.max(1), horizon }
    }

    /// Records `key`, returning `true` if it was fresh and `false` if it was
    /// already inside the window (a redelivery).
    pub fn insert(&self, key: EnvelopeKey) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        Self::expire(&mut state, now, self.horizon);

        if state.seen.contains(&key) {
            return false;
        }

        if state.order.len() >= self.capacity {
            if let Some((oldest, _)) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }

        state.seen.insert(key.clone());
        state.order.push_back((key, now));
        true
    }

    pub fn contains(&self, key: &EnvelopeKey) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        Self::expire(&mut state, now, self.horizon);
        state.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(state: &mut WindowState, now: Instant, horizon: Duration) {
        while let Some((key, inserted)) = state.order.front() {
            if now.duration_since(*inserted) < horizon {
                break;
            }
            let key = key.clone();
            state.order.pop_front();
            state.seen.remove(&key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        // Lock poisoning would mean a panic while holding the guard; the set
        // is still structurally valid, so recover rather than cascade.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::DedupWindow;
    use crate::envelope::EnvelopeKey;

    fn key(channel: &str, ts: &str) -> EnvelopeKey {
        EnvelopeKey::new(channel, ts)
    }

    #[test]
    fn first_insert_is_fresh_second_is_duplicate() {
        let window = DedupWindow::default();
        assert!(window.insert(key("C1", "100")));
        assert!(!window.insert(key("C1", "100")));
        assert!(window.contains(&key("C1", "100")));
    }

    #[test]
    fn same_timestamp_in_different_channels_is_distinct() {
        let window = DedupWindow::default();
        assert!(window.insert(key("C1", "100")));
        assert!(window.insert(key("C2", "100")));
    }

    #[test]
    fn capacity_evicts_oldest_key() {
        let window = DedupWindow::new(2, Duration::from_secs(600));
        assert!(window.insert(key("C1", "1")));
        assert!(window.insert(key("C1", "2")));
        assert!(window.insert(key("C1", "3")));

        assert!(!window.contains(&key("C1", "1")));
        assert!(window.contains(&key("C1", "2")));
        assert!(window.contains(&key("C1", "3")));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn horizon_expires_old_keys() {
        let window = DedupWindow::new(16, Duration::ZERO);
        assert!(window.insert(key("C1", "1")));
        // With a zero horizon every key is immediately expirable, so the same
        // key reads as fresh again.
        assert!(window.insert(key("C1", "1")));
    }
}
