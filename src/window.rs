use crate::models::VitalSample;
use std::collections::VecDeque;

/// Bounded, insertion-ordered history of samples for one subject.
///
/// Oldest samples are evicted first once `capacity` is reached. Each sample
/// also gets an arrival ordinal: its position in the stream of samples the
/// window has accepted since it was created. Ordinals never repeat within
/// one window, even after eviction.
#[derive(Debug, Clone)]
pub struct VitalsWindow {
    samples: VecDeque<(u64, VitalSample)>,
    capacity: usize,
    next_ordinal: u64,
}

impl VitalsWindow {
    /// Create an empty window. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            next_ordinal: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append one sample, evicting the oldest on overflow.
    pub fn push(&mut self, sample: VitalSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((self.next_ordinal, sample));
        self.next_ordinal += 1;
    }

    /// Replace the contents with a fetched history. Only the newest
    /// `capacity` entries are kept. The replacement samples get fresh
    /// ordinals, so nothing in the new contents shares an ordinal with a
    /// sample that was there before.
    pub fn replace(&mut self, history: Vec<VitalSample>) {
        self.samples.clear();
        let skip = history.len().saturating_sub(self.capacity);
        for sample in history.into_iter().skip(skip) {
            self.samples.push_back((self.next_ordinal, sample));
            self.next_ordinal += 1;
        }
    }

    pub fn latest(&self) -> Option<&VitalSample> {
        self.samples.back().map(|(_, s)| s)
    }

    /// The newest sample together with its arrival ordinal.
    pub fn latest_with_ordinal(&self) -> Option<(u64, &VitalSample)> {
        self.samples.back().map(|(ordinal, s)| (*ordinal, s))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VitalSample> {
        self.samples.iter().map(|(_, s)| s)
    }

    pub fn to_vec(&self) -> Vec<VitalSample> {
        self.iter().cloned().collect()
    }
}
