//! A bounded circular FIFO queue
//!
//! [RingQueue] is the single ordering primitive of the thread runtime: the
//! ready queue, the kill queue and every wait queue are ring queues of thread
//! ids.

use alloc::boxed::Box;
use core::fmt;

/// A bounded circular FIFO queue.
///
/// The backing buffer has one slot more than [Self::capacity]. That slot is
/// never filled, which is how a full queue is told apart from an empty one.
pub struct RingQueue<T> {
    slots: Box<[Option<T>]>,
    /// index of the front element
    start: usize,
    /// index of the next free slot
    end: usize,
}

impl<T: Copy + PartialEq> RingQueue<T> {
    /// Creates an empty [RingQueue] that can hold `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity + 1).map(|_| None).collect();
        Self {
            slots,
            start: 0,
            end: 0,
        }
    }

    /// The maximum number of elements in the queue
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// `true` if the queue contains no elements
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `true` if [Self::enqueue] would fail
    pub fn is_full(&self) -> bool {
        self.start == self.next(self.end)
    }

    /// The number of elements in the queue
    pub fn len(&self) -> usize {
        (self.end + self.slots.len() - self.start) % self.slots.len()
    }

    /// Appends `value` at the back of the queue.
    ///
    /// # Panics
    ///
    /// if the queue is full
    pub fn enqueue(&mut self, value: T) {
        assert!(!self.is_full(), "enqueue on a full ring queue");

        self.slots[self.end] = Some(value);
        self.end = self.next(self.end);
    }

    /// Removes the front element of the queue.
    ///
    /// # Panics
    ///
    /// if the queue is empty
    pub fn dequeue(&mut self) -> T {
        assert!(!self.is_empty(), "dequeue on an empty ring queue");

        let value = self.slots[self.start]
            .take()
            .expect("slots in the live range are always occupied");
        self.start = self.next(self.start);
        value
    }

    /// Removes the front element of the queue, or returns `None` if the
    /// queue is empty.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            None
        } else {
            Some(self.dequeue())
        }
    }

    /// The front element, without removing it
    pub fn front(&self) -> Option<T> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.start]
        }
    }

    /// Iterates the queue from front to back
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            index: self.start,
        }
    }

    /// `true` if the queue contains `value`
    pub fn contains(&self, value: T) -> bool {
        self.position(value).is_some()
    }

    /// Swaps the first element equal to `from` for `to`, keeping its position.
    ///
    /// Returns `false` if `from` is not in the queue.
    pub fn replace_first(&mut self, from: T, to: T) -> bool {
        match self.position(from) {
            Some(index) => {
                self.slots[index] = Some(to);
                true
            }
            None => false,
        }
    }

    /// Removes the first element equal to `value`.
    ///
    /// The removed element is overwritten with the current front element, which
    /// is dequeued. This does not keep the relative order of the queue.
    ///
    /// Returns `false` if `value` is not in the queue.
    pub fn remove_first(&mut self, value: T) -> bool {
        let Some(index) = self.position(value) else {
            return false;
        };
        let front = self.dequeue();
        if index != self.prev(self.start) {
            self.slots[index] = Some(front);
        }
        true
    }

    /// Removes the first element equal to `value`, keeping the order of the
    /// remaining elements.
    ///
    /// Every element behind the removed one moves one slot forward.
    ///
    /// Returns `false` if `value` is not in the queue.
    pub fn remove_ordered(&mut self, value: T) -> bool {
        let Some(mut index) = self.position(value) else {
            return false;
        };
        let mut next = self.next(index);
        while next != self.end {
            self.slots[index] = self.slots[next];
            index = next;
            next = self.next(next);
        }
        self.slots[index] = None;
        self.end = index;
        true
    }

    /// Removes all elements
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }

    fn position(&self, value: T) -> Option<usize> {
        let mut index = self.start;
        while index != self.end {
            if self.slots[index] == Some(value) {
                return Some(index);
            }
            index = self.next(index);
        }
        None
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    fn prev(&self, index: usize) -> usize {
        (index + self.slots.len() - 1) % self.slots.len()
    }
}

impl<T: Copy + PartialEq + fmt::Debug> fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Front to back iterator over a [RingQueue]
pub struct Iter<'q, T> {
    queue: &'q RingQueue<T>,
    index: usize,
}

impl<T: Copy + PartialEq> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == self.queue.end {
            return None;
        }
        let value = self.queue.slots[self.index];
        self.index = self.queue.next(self.index);
        value
    }
}
