//! Round-robin ring with removal during iteration.
//!
//! Elements come back out of `ring()` in insertion order, wrapping at the
//! end. A traversal from `iter()` can remove the element it just yielded
//! without disturbing the rest of the traversal or the round-robin cursor.
//!
//! Every slot is stamped with an id that only grows, so slots are always
//! sorted by id. An iterator remembers the id it last yielded instead of an
//! index; it survives concurrent removals by other callers and can never
//! hand out an element that has already left the ring.
//!
//! The ring is guarded by its own lock. Callers never hold it across calls.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("ring is empty")]
    Empty,
}

struct Slot<T> {
    id: u64,
    item: T,
}

struct RingInner<T> {
    slots: Vec<Slot<T>>,
    /// Index of the slot `ring()` returns next.
    cursor: usize,
    next_id: u64,
}

impl<T> RingInner<T> {
    fn remove_at(&mut self, index: usize) {
        self.slots.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.slots.len() {
            self.cursor = 0;
        }
    }
}

/// Circular, ordered collection with fair round-robin retrieval.
pub struct Ring<T> {
    inner: Mutex<RingInner<T>>,
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Ring<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RingInner {
                slots: Vec::new(),
                cursor: 0,
                next_id: 0,
            }),
        }
    }

    /// Append at the logical end. No uniqueness check.
    pub fn insert(&self, item: T) {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.push(Slot { id, item });
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Lazy traversal over the current elements, front to back.
    pub fn iter(&self) -> RingIter<'_, T> {
        RingIter {
            ring: self,
            last: None,
        }
    }
}

impl<T: Clone> Ring<T> {
    /// Next element in round-robin order.
    pub fn ring(&self) -> Result<T, RingError> {
        let mut inner = self.inner.lock();
        let len = inner.slots.len();
        if len == 0 {
            return Err(RingError::Empty);
        }
        if inner.cursor >= len {
            inner.cursor = 0;
        }
        let item = inner.slots[inner.cursor].item.clone();
        inner.cursor = (inner.cursor + 1) % len;
        Ok(item)
    }

    /// Current elements in ring order.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner
            .lock()
            .slots
            .iter()
            .map(|s| s.item.clone())
            .collect()
    }
}

/// Traversal handle returned by [`Ring::iter`].
pub struct RingIter<'a, T> {
    ring: &'a Ring<T>,
    /// Slot id of the element yielded last.
    last: Option<u64>,
}

impl<T> RingIter<'_, T> {
    /// Remove the element just yielded.
    ///
    /// Returns false if nothing has been yielded yet, or if the element
    /// already left the ring (removed twice, or by another caller).
    pub fn remove(&mut self) -> bool {
        let Some(id) = self.last else {
            return false;
        };
        let mut inner = self.ring.inner.lock();
        match inner.slots.binary_search_by_key(&id, |s| s.id) {
            Ok(index) => {
                inner.remove_at(index);
                true
            }
            Err(_) => false,
        }
    }
}

impl<T: Clone> Iterator for RingIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let inner = self.ring.inner.lock();
        let start = match self.last {
            None => 0,
            Some(id) => inner.slots.partition_point(|s| s.id <= id),
        };
        let slot = inner.slots.get(start)?;
        self.last = Some(slot.id);
        Some(slot.item.clone())
    }
}
