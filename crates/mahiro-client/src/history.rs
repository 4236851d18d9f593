//! Per-target history of sent messages.
//!
//! Keeps the last N control-plane payloads for every conversation so that
//! interceptors can look at recent traffic without the pipeline keeping
//! unbounded history.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use mahiro_core::{SendApiPayload, Target};

/// Default number of entries kept per target.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// One sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Unix time in milliseconds when the send was accepted.
    pub timestamp_ms: u64,
    pub request: SendApiPayload,
}

impl HistoryEntry {
    pub fn now(request: SendApiPayload) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            timestamp_ms,
            request,
        }
    }
}

/// Bounded, insertion-ordered history keyed by target.
#[derive(Debug)]
pub struct MessageHistory {
    capacity: usize,
    targets: HashMap<Target, VecDeque<HistoryEntry>>,
}

impl MessageHistory {
    /// Create a history keeping at most `capacity` entries per target.
    /// A capacity of 0 records nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            targets: HashMap::new(),
        }
    }

    /// Append an entry, evicting the oldest one for that target if full.
    pub fn push(&mut self, target: Target, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        let entries = self.targets.entry(target).or_default();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of a target's entries, oldest first.
    pub fn snapshot(&self, target: &Target) -> Vec<HistoryEntry> {
        self.targets
            .get(target)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, target: &Target) -> usize {
        self.targets.get(target).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.values().all(VecDeque::is_empty)
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mahiro_core::{MessagePayload, SendRequest};

    fn entry(target: Target, text: &str) -> HistoryEntry {
        HistoryEntry::now(SendApiPayload::for_request(&SendRequest::new(
            target,
            MessagePayload::text(text),
        )))
    }

    fn texts(history: &MessageHistory, target: &Target) -> Vec<String> {
        history
            .snapshot(target)
            .iter()
            .filter_map(|e| e.request.text().map(str::to_string))
            .collect()
    }

    #[test]
    fn keeps_insertion_order() {
        let mut history = MessageHistory::new(10);
        let g = Target::group(1);
        for text in ["a", "b", "c"] {
            history.push(g, entry(g, text));
        }
        assert_eq!(texts(&history, &g), ["a", "b", "c"]);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = MessageHistory::new(2);
        let g = Target::group(1);
        for text in ["a", "b", "c"] {
            history.push(g, entry(g, text));
        }
        assert_eq!(texts(&history, &g), ["b", "c"]);
        assert_eq!(history.len(&g), 2);
    }

    #[test]
    fn targets_are_separate() {
        let mut history = MessageHistory::new(1);
        let g = Target::group(1);
        let f = Target::friend(1);
        history.push(g, entry(g, "to group"));
        history.push(f, entry(f, "to friend"));
        assert_eq!(texts(&history, &g), ["to group"]);
        assert_eq!(texts(&history, &f), ["to friend"]);
    }

    #[test]
    fn zero_capacity() {
        let mut history = MessageHistory::new(0);
        let g = Target::group(1);
        history.push(g, entry(g, "x"));
        assert!(history.is_empty());
        assert!(history.snapshot(&g).is_empty());
    }
}
