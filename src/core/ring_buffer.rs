//! Growable circular queue used as the task queue of every executor.
//!
//! Indexing is relative to a head offset that wraps around the storage. Because `head == tail`
//! holds both when the buffer is empty and when it is completely full, a `wrapped` flag records
//! whether the tail has wrapped past the end of storage and disambiguates the two cases.
//!
//! Accessors never fail loudly: an out of range index or an empty buffer yields `None`.

/// A growable FIFO ring buffer that also supports insertion at the head.
#[derive(Debug)]
pub struct RingBuffer<T> {
    elements: Vec<Option<T>>,
    head: usize,
    tail: usize,
    wrapped: bool,
}

impl<T> RingBuffer<T> {
    /// Create a buffer with the specified initial capacity (at least one slot).
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        let mut elements = Vec::with_capacity(capacity);
        elements.resize_with(capacity, || None);
        Self {
            elements,
            head: 0,
            tail: 0,
            wrapped: false,
        }
    }

    /// Current storage capacity. Only grows unless [`RingBuffer::truncate`] is called.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.elements.len()
    }

    /// Number of live elements.
    #[must_use]
    pub fn size(&self) -> usize {
        if self.wrapped {
            self.elements.len() - self.head + self.tail
        } else {
            self.tail - self.head
        }
    }

    /// True when no elements are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Append an item at the tail, growing storage if the buffer is full.
    pub fn push(&mut self, item: T) {
        self.grow_if_full();
        self.elements[self.tail] = Some(item);
        self.tail += 1;
        if self.tail >= self.elements.len() {
            self.tail = 0;
            self.wrapped = true;
        }
    }

    /// Insert an item at the head, growing storage if the buffer is full.
    pub fn push_front(&mut self, item: T) {
        self.grow_if_full();
        if self.head == 0 {
            self.head = self.elements.len() - 1;
            self.wrapped = true;
        } else {
            self.head -= 1;
        }
        self.elements[self.head] = Some(item);
    }

    /// Remove and return the head item, clearing its slot.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.elements[self.head].take();
        self.head += 1;
        if self.head >= self.elements.len() {
            self.head = 0;
            self.wrapped = false;
        }
        item
    }

    /// The head item without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            self.elements[self.head].as_ref()
        }
    }

    /// The item `index` positions behind the head, bounds-checked against the current size.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.size() {
            return None;
        }
        let offset = (self.head + index) % self.elements.len();
        self.elements[offset].as_ref()
    }

    /// Iterate over live items in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.size()).filter_map(move |index| self.get(index))
    }

    /// Linear scan for an equal item. Intended for invariant checks and diagnostics only.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|candidate| candidate == item)
    }

    /// Drop every element and reset the indices. Capacity is unchanged.
    pub fn clear(&mut self) {
        for slot in &mut self.elements {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.wrapped = false;
    }

    /// Shrink storage towards `target_capacity`, never below the number of live elements.
    pub fn truncate(&mut self, target_capacity: usize) {
        let capacity = target_capacity.max(self.size()).max(1);
        if self.elements.len() > capacity {
            self.resize(capacity);
        }
    }

    fn grow_if_full(&mut self) {
        if self.size() + 1 > self.elements.len() {
            let capacity = (self.elements.len().saturating_sub(1).max(1) * 2) + 1;
            self.resize(capacity);
        }
    }

    /// Move live elements into fresh storage starting at index 0.
    fn resize(&mut self, capacity: usize) {
        let size = self.size();
        debug_assert!(capacity >= size);
        let mut elements: Vec<Option<T>> = Vec::with_capacity(capacity);
        let old_capacity = self.elements.len();
        for index in 0..size {
            elements.push(self.elements[(self.head + index) % old_capacity].take());
        }
        elements.resize_with(capacity, || None);
        self.elements = elements;
        self.head = 0;
        self.tail = size % capacity;
        self.wrapped = size == capacity;
    }
}
