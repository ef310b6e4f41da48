//! # Bounded Min-Heap
//!
//! Capacity-limited min-heap used by the top-N accumulators. The smallest
//! ranked item sits at the root, so deciding whether a newcomer belongs in
//! the top N is a single comparison against the root. Items carry a stable
//! id so a later observation can overwrite an earlier one in place.

/// Item that can live in a [`BoundedMinHeap`]
pub trait Ranked {
    type Rank: Ord + Copy;

    /// Ordering value; larger ranks survive displacement.
    fn rank(&self) -> Self::Rank;

    /// Stable identity used for in-place updates.
    fn id(&self) -> i64;
}

/// Min-heap that never grows past its capacity
#[derive(Debug, Clone)]
pub struct BoundedMinHeap<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T: Ranked> BoundedMinHeap<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Smallest-ranked item currently held.
    pub fn peek_min(&self) -> Option<&T> {
        self.items.first()
    }

    /// Replace the item with the same id if present, otherwise [`offer`]
    /// the newcomer. Replacement is literal: the stored rank becomes the
    /// newcomer's rank even when it is lower.
    ///
    /// [`offer`]: BoundedMinHeap::offer
    pub fn upsert(&mut self, item: T) -> bool {
        match self.position(item.id()) {
            Some(index) => {
                self.items[index] = item;
                self.fix(index);
                true
            }
            None => self.offer(item),
        }
    }

    /// Insert while below capacity; at capacity, displace the root only
    /// when the newcomer outranks it. Returns whether the item was kept.
    pub fn offer(&mut self, item: T) -> bool {
        if self.items.len() < self.capacity {
            self.items.push(item);
            self.sift_up(self.items.len() - 1);
            true
        } else if self
            .items
            .first()
            .is_some_and(|min| item.rank() > min.rank())
        {
            self.items[0] = item;
            self.sift_down(0);
            true
        } else {
            false
        }
    }

    /// Empty the heap, largest rank first.
    pub fn drain_descending(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.items.len());
        while let Some(min) = self.pop_min() {
            drained.push(min);
        }
        drained.reverse();
        drained
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    fn pop_min(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let min = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// Restore heap order around `index` after its item changed rank.
    fn fix(&mut self, index: usize) {
        self.sift_down(index);
        self.sift_up(index);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.items[index].rank() < self.items[parent].rank() {
                self.items.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < len && self.items[right].rank() < self.items[left].rank() {
                smallest = right;
            }
            if self.items[smallest].rank() < self.items[index].rank() {
                self.items.swap(index, smallest);
                index = smallest;
            } else {
                break;
            }
        }
    }
}
