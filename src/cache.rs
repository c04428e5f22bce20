use std::collections::VecDeque;

use crate::tensor::Tensor;

pub const CACHE_SIZE: usize = 16;

/// Bounded FIFO of the most recent items. Pushing into a full cache drops
/// the oldest item first.
#[derive(Debug, Clone)]
pub struct Cache<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Cache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.is_full() {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Drops every cached item.
    pub fn reset(&mut self) {
        self.items.clear();
    }

    /// Blending against a cache that is not full is not allowed.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self::new(CACHE_SIZE)
    }
}

impl<'a, T> IntoIterator for &'a Cache<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// (button, output class)
pub type ButtonCache = Cache<(usize, usize)>;

/// (owned representative-state snapshot `(batch, units)`, output class per
/// batch item). Snapshots are released on eviction, reset or drop.
pub type NeuralCache = Cache<(Tensor, Vec<usize>)>;

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_push_evicts_oldest() {
        let mut cache = Cache::new(4);
        for i in 0..10 {
            cache.push(i);
            assert!(cache.len() <= 4);
        }
        assert!(cache.is_full());
        assert_eq!(cache.iter().copied().collect::<Vec<_>>(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_fills_up() {
        let mut cache: ButtonCache = Cache::default();
        assert_eq!(cache.capacity(), CACHE_SIZE);
        for i in 0..CACHE_SIZE - 1 {
            cache.push((i % 8, i));
        }
        assert!(!cache.is_full());
        cache.push((0, 0));
        assert!(cache.is_full());
        cache.reset();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshots_released_exactly_once() {
        let snapshots: Vec<Rc<Tensor>> = (0..CACHE_SIZE + 5)
            .map(|_| Rc::new(Tensor::zeros(&[1, 4])))
            .collect();

        let mut cache: Cache<(Rc<Tensor>, Vec<usize>)> = Cache::default();
        for s in &snapshots {
            cache.push((Rc::clone(s), vec![0]));
        }

        // the five oldest were evicted, the rest are still held once
        for (i, s) in snapshots.iter().enumerate() {
            let expected = if i < 5 { 1 } else { 2 };
            assert_eq!(Rc::strong_count(s), expected);
        }

        cache.reset();
        assert!(snapshots.iter().all(|s| Rc::strong_count(s) == 1));

        for s in &snapshots[..3] {
            cache.push((Rc::clone(s), vec![1]));
        }
        drop(cache);
        assert!(snapshots.iter().all(|s| Rc::strong_count(s) == 1));
    }
}
