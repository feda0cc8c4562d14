//! Bounded, ordered per-panel event storage.
//!
//! Entries from the initial bulk load, the push channel and the poller are
//! appended in arrival order; once the cap is exceeded the oldest entries
//! are evicted. Entries are never modified after insertion.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Initial,
    Push,
    Poll,
}

/// Ordering key: arrival order for pushed entries, server offset for polled ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OrderKey {
    Arrival(u64),
    /// One item of a pushed frame that carries several.
    Batch { arrival: u64, index: u32 },
    Offset(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferEntry<T> {
    source: SourceTag,
    order: OrderKey,
    dedup_key: Option<String>,
    payload: T,
}

impl<T> BufferEntry<T> {
    pub fn initial(position: u64, payload: T) -> Self {
        Self {
            source: SourceTag::Initial,
            order: OrderKey::Arrival(position),
            dedup_key: None,
            payload,
        }
    }

    pub fn pushed(arrival: u64, payload: T) -> Self {
        Self {
            source: SourceTag::Push,
            order: OrderKey::Arrival(arrival),
            dedup_key: None,
            payload,
        }
    }

    /// Item `index` of the multi-item frame that arrived at `arrival`.
    pub fn pushed_item(arrival: u64, index: u32, payload: T) -> Self {
        Self {
            source: SourceTag::Push,
            order: OrderKey::Batch { arrival, index },
            dedup_key: None,
            payload,
        }
    }

    pub fn polled(offset: u64, payload: T) -> Self {
        Self {
            source: SourceTag::Poll,
            order: OrderKey::Offset(offset),
            dedup_key: None,
            payload,
        }
    }

    /// Attach the server-side identity used by [`DedupPolicy::ByKey`].
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn source(&self) -> SourceTag {
        self.source
    }

    pub fn order(&self) -> OrderKey {
        self.order
    }

    pub fn dedup_key(&self) -> Option<&str> {
        self.dedup_key.as_deref()
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// How a buffer treats an entry whose key is already retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// Append everything (both sources are trusted not to overlap).
    #[default]
    None,
    /// Drop an entry whose `dedup_key` matches one currently retained.
    /// Entries without a key are always appended.
    ByKey,
}

#[derive(Debug, Clone)]
pub struct EventBuffer<T> {
    entries: VecDeque<BufferEntry<T>>,
    cap: usize,
    dedup: DedupPolicy,
    retained_keys: HashMap<String, usize>,
}

impl<T> EventBuffer<T> {
    /// A buffer holding at most `cap` entries (a cap of 0 is treated as 1).
    pub fn new(cap: usize) -> Self {
        Self::with_dedup(cap, DedupPolicy::None)
    }

    pub fn with_dedup(cap: usize, dedup: DedupPolicy) -> Self {
        let cap = cap.max(1);
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
            dedup,
            retained_keys: HashMap::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    /// Replace the contents with a bulk load, keeping the newest `cap` entries.
    pub fn initialize(&mut self, entries: impl IntoIterator<Item = BufferEntry<T>>) {
        self.entries.clear();
        self.retained_keys.clear();
        self.append(entries);
    }

    /// Append in arrival order, then evict from the front down to the cap.
    /// Returns how many entries were accepted.
    pub fn append(&mut self, entries: impl IntoIterator<Item = BufferEntry<T>>) -> usize {
        let mut accepted = 0;
        for entry in entries {
            if self.is_duplicate(&entry) {
                continue;
            }
            if let Some(key) = entry.dedup_key.as_ref() {
                *self.retained_keys.entry(key.clone()).or_insert(0) += 1;
            }
            self.entries.push_back(entry);
            accepted += 1;
            while self.entries.len() > self.cap {
                self.evict_front();
            }
        }
        accepted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.retained_keys.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry<T>> {
        self.entries.iter()
    }

    fn is_duplicate(&self, entry: &BufferEntry<T>) -> bool {
        match (self.dedup, entry.dedup_key.as_ref()) {
            (DedupPolicy::ByKey, Some(key)) => self.retained_keys.contains_key(key),
            _ => false,
        }
    }

    fn evict_front(&mut self) {
        let Some(evicted) = self.entries.pop_front() else {
            return;
        };
        if let Some(key) = evicted.dedup_key {
            if let Some(count) = self.retained_keys.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.retained_keys.remove(&key);
                }
            }
        }
    }
}

impl<T: Clone> EventBuffer<T> {
    /// Ordered copy of the retained entries.
    pub fn snapshot(&self) -> Vec<BufferEntry<T>> {
        self.entries.iter().cloned().collect()
    }

    pub fn payloads(&self) -> Vec<T> {
        self.entries.iter().map(|entry| entry.payload.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn pushed(items: &[&'static str], start: u64) -> Vec<BufferEntry<&'static str>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| BufferEntry::pushed(start + i as u64, *item))
            .collect()
    }

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let mut buffer = EventBuffer::new(3);
        buffer.append(pushed(&["a", "b", "c", "d", "e"], 0));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.payloads(), vec!["c", "d", "e"]);

        buffer.append(pushed(&["f"], 5));
        assert_eq!(buffer.payloads(), vec!["d", "e", "f"]);
    }

    #[test]
    fn initialize_replaces_and_truncates_to_newest() {
        let mut buffer = EventBuffer::new(2);
        buffer.append(pushed(&["x"], 0));
        buffer.initialize(
            ["a", "b", "c"]
                .iter()
                .enumerate()
                .map(|(i, item)| BufferEntry::initial(i as u64, *item)),
        );
        assert_eq!(buffer.payloads(), vec!["b", "c"]);
        assert!(buffer.iter().all(|e| e.source() == SourceTag::Initial));
    }

    #[test]
    fn initial_load_then_pushes_evicts_oldest() {
        let mut buffer = EventBuffer::new(5);
        buffer.initialize(
            ["a", "b", "c"]
                .iter()
                .enumerate()
                .map(|(i, item)| BufferEntry::initial(i as u64, *item)),
        );

        buffer.append(pushed(&["d"], 0));
        assert_eq!(buffer.payloads(), vec!["a", "b", "c", "d"]);
        buffer.append(pushed(&["e"], 1));
        assert_eq!(buffer.payloads(), vec!["a", "b", "c", "d", "e"]);
        buffer.append(pushed(&["f"], 2));
        assert_eq!(buffer.payloads(), vec!["b", "c", "d", "e", "f"]);
    }

    #[test]
    fn zero_cap_is_clamped() {
        let mut buffer = EventBuffer::new(0);
        buffer.append(pushed(&["a", "b"], 0));
        assert_eq!(buffer.cap(), 1);
        assert_eq!(buffer.payloads(), vec!["b"]);
    }

    #[test]
    fn without_dedup_same_key_is_kept_twice() {
        let mut buffer = EventBuffer::new(10);
        buffer.append([BufferEntry::pushed(0, "x").with_key("7")]);
        buffer.append([BufferEntry::polled(7, "x").with_key("7")]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn dedup_by_key_drops_cross_source_duplicates() {
        let mut buffer = EventBuffer::with_dedup(10, DedupPolicy::ByKey);
        assert_eq!(buffer.append([BufferEntry::pushed(0, "line 7").with_key("7")]), 1);
        assert_eq!(buffer.append([BufferEntry::polled(7, "line 7").with_key("7")]), 0);
        assert_eq!(buffer.append([BufferEntry::polled(8, "line 8").with_key("8")]), 1);
        assert_eq!(buffer.append([BufferEntry::pushed(1, "unkeyed")]), 1);
        assert_eq!(buffer.append([BufferEntry::pushed(2, "unkeyed")]), 1);

        let sources: Vec<SourceTag> = buffer.iter().map(|e| e.source()).collect();
        assert_eq!(
            sources,
            vec![SourceTag::Push, SourceTag::Poll, SourceTag::Push, SourceTag::Push]
        );
    }

    #[test]
    fn evicted_keys_may_reappear() {
        let mut buffer = EventBuffer::with_dedup(2, DedupPolicy::ByKey);
        buffer.append([
            BufferEntry::polled(1, "one").with_key("1"),
            BufferEntry::polled(2, "two").with_key("2"),
            BufferEntry::polled(3, "three").with_key("3"),
        ]);
        assert_eq!(buffer.payloads(), vec!["two", "three"]);
        assert_eq!(buffer.append([BufferEntry::pushed(9, "one again").with_key("1")]), 1);
        assert_eq!(buffer.payloads(), vec!["three", "one again"]);
    }

    #[test]
    fn items_of_one_frame_keep_distinct_keys_in_order() {
        let mut buffer = EventBuffer::new(4);
        buffer.append([
            BufferEntry::pushed_item(7, 0, "x"),
            BufferEntry::pushed_item(7, 1, "y"),
            BufferEntry::pushed_item(8, 0, "z"),
        ]);
        let keys: Vec<OrderKey> = buffer.iter().map(|e| e.order()).collect();
        assert_eq!(
            keys,
            vec![
                OrderKey::Batch { arrival: 7, index: 0 },
                OrderKey::Batch { arrival: 7, index: 1 },
                OrderKey::Batch { arrival: 8, index: 0 },
            ]
        );
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut buffer = EventBuffer::new(4);
        buffer.append(pushed(&["a", "b"], 0));
        let before = buffer.snapshot();
        buffer.append(pushed(&["c"], 2));
        assert_eq!(before.len(), 2);
        assert_eq!(buffer.snapshot().len(), 3);
        assert_eq!(before[1].order(), OrderKey::Arrival(1));
    }
}
