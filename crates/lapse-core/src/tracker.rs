//! Liveness tracker: last-activity bookkeeping for every live workload.
//!
//! A binary min-heap ordered by `(last_touch, seq)` plus an
//! identity → heap position index. Touching is `O(log n)`, existence
//! lookup is `O(1)`, and expiring `k` idle records costs `O(k log n)`
//! with an `O(1)` check of the root to know when to stop.
//!
//! `seq` is a counter bumped on every touch, so records with identical
//! timestamps expire in the order they were last touched.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A single heap entry.
#[derive(Debug, Clone)]
struct Record {
    identity: String,
    last_touch: Instant,
    seq: u64,
}

impl Record {
    fn key(&self) -> (Instant, u64) {
        (self.last_touch, self.seq)
    }
}

/// Heap array and index, always mutated together.
#[derive(Debug, Default)]
struct Heap {
    entries: Vec<Record>,
    /// identity → position in `entries`.
    index: HashMap<String, usize>,
    next_seq: u64,
}

impl Heap {
    fn touch(&mut self, identity: &str, at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;

        match self.index.get(identity) {
            Some(&pos) => {
                let record = &mut self.entries[pos];
                record.last_touch = record.last_touch.max(at);
                record.seq = seq;
                // The key only ever grows, so the record can only sink.
                self.sift_down(pos);
            }
            None => {
                let pos = self.entries.len();
                self.entries.push(Record {
                    identity: identity.to_string(),
                    last_touch: at,
                    seq,
                });
                self.index.insert(identity.to_string(), pos);
                self.sift_up(pos);
            }
        }
        debug_assert_eq!(self.entries.len(), self.index.len());
    }

    fn expire(&mut self, cutoff: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some(root) = self.entries.first() {
            if root.last_touch >= cutoff {
                break;
            }
            expired.push(self.pop_root().identity);
        }
        expired
    }

    fn pop_root(&mut self) -> Record {
        let record = self.entries.swap_remove(0);
        self.index.remove(&record.identity);
        if !self.entries.is_empty() {
            self.index.insert(self.entries[0].identity.clone(), 0);
            self.sift_down(0);
        }
        debug_assert_eq!(self.entries.len(), self.index.len());
        record
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.entries[parent].key() <= self.entries[pos].key() {
                break;
            }
            self.swap(parent, pos);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;

            if left < len && self.entries[left].key() < self.entries[smallest].key() {
                smallest = left;
            }
            if right < len && self.entries[right].key() < self.entries[smallest].key() {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.index.insert(self.entries[a].identity.clone(), a);
        self.index.insert(self.entries[b].identity.clone(), b);
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.entries.len(), self.index.len());
        for (pos, record) in self.entries.iter().enumerate() {
            assert_eq!(self.index.get(&record.identity), Some(&pos));
            if pos > 0 {
                let parent = (pos - 1) / 2;
                assert!(self.entries[parent].key() <= record.key());
            }
        }
    }
}

/// Tracks the last activity time of each workload identity.
///
/// One mutex guards the heap and its index; every operation is pure
/// in-memory work, so the lock is never held across I/O.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    heap: Mutex<Heap>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity for `identity` at the current instant.
    pub fn touch(&self, identity: &str) {
        self.touch_at(identity, Instant::now());
    }

    /// Record activity for `identity` at `at`.
    ///
    /// Inserts a fresh record when the identity is unknown. An `at`
    /// older than the stored touch leaves the timestamp unchanged.
    pub fn touch_at(&self, identity: &str, at: Instant) {
        let mut heap = self.heap.lock().expect("tracker lock");
        heap.touch(identity, at);
    }

    /// Pop every record idle for longer than `ttl` as of `now`, oldest first.
    ///
    /// A record is expired when `last_touch < now - ttl`. Returns an
    /// empty vector when nothing qualifies.
    pub fn expire_batch(&self, now: Instant, ttl: Duration) -> Vec<String> {
        let Some(cutoff) = now.checked_sub(ttl) else {
            return Vec::new();
        };
        let mut heap = self.heap.lock().expect("tracker lock");
        heap.expire(cutoff)
    }

    /// Whether `identity` currently has a record.
    pub fn contains(&self, identity: &str) -> bool {
        let heap = self.heap.lock().expect("tracker lock");
        heap.index.contains_key(identity)
    }

    /// Last recorded activity for `identity`.
    pub fn last_touch(&self, identity: &str) -> Option<Instant> {
        let heap = self.heap.lock().expect("tracker lock");
        heap.index
            .get(identity)
            .map(|&pos| heap.entries[pos].last_touch)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().expect("tracker lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tracked identities with their last touch, oldest first.
    pub fn snapshot(&self) -> Vec<(String, Instant)> {
        let mut records = {
            let heap = self.heap.lock().expect("tracker lock");
            heap.entries.clone()
        };
        records.sort_by_key(Record::key);
        records
            .into_iter()
            .map(|r| (r.identity, r.last_touch))
            .collect()
    }
}
