//! Bounded FIFO overflow buffer for access events.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::event::AccessEvent;

/// Bounded FIFO queue holding events the intake channel could not accept.
///
/// `add` refuses new events when full (drop-newest); the caller is
/// responsible for counting the drop. All operations take the internal mutex,
/// so size checks reflect a consistent snapshot.
#[derive(Debug)]
pub struct RingBuffer {
    queue: Mutex<VecDeque<AccessEvent>>,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a buffer bounded at `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends an event. Returns false when the buffer is full.
    pub fn add(&self, event: AccessEvent) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(event);
        true
    }

    /// Removes and returns the oldest event.
    pub fn get(&self) -> Option<AccessEvent> {
        self.queue.lock().pop_front()
    }

    /// Removes and returns up to `max` events in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<AccessEvent> {
        let mut queue = self.queue.lock();
        let count = queue.len().min(max);
        queue.drain(..count).collect()
    }

    /// Empties the buffer, returning all events in FIFO order.
    pub fn drain_all(&self) -> Vec<AccessEvent> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    /// Current number of buffered events.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// True when the buffer cannot accept another event.
    pub fn is_full(&self) -> bool {
        self.queue.lock().len() >= self.capacity
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ip: &str) -> AccessEvent {
        AccessEvent::new(
            ip,
            &std::collections::HashMap::new(),
            "device",
            "blocklist",
            false,
            403,
        )
    }

    #[test]
    fn test_buffer_starts_empty() {
        let buffer = RingBuffer::new(10);

        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 10);
    }

    #[test]
    fn test_add_and_get_fifo() {
        let buffer = RingBuffer::new(10);

        assert!(buffer.add(event("10.0.0.1")));
        assert!(buffer.add(event("10.0.0.2")));

        assert_eq!(buffer.get().unwrap().client.ip, "10.0.0.1");
        assert_eq!(buffer.get().unwrap().client.ip, "10.0.0.2");
        assert!(buffer.get().is_none());
    }

    #[test]
    fn test_add_refuses_when_full() {
        let buffer = RingBuffer::new(2);

        assert!(buffer.add(event("10.0.0.1")));
        assert!(buffer.add(event("10.0.0.2")));
        assert!(buffer.is_full());

        // Drop-newest: the third event is refused, existing ones stay.
        assert!(!buffer.add(event("10.0.0.3")));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get().unwrap().client.ip, "10.0.0.1");
    }

    #[test]
    fn test_drain_respects_max_and_order() {
        let buffer = RingBuffer::new(10);
        for i in 0..5 {
            buffer.add(event(&format!("10.0.0.{i}")));
        }

        let drained = buffer.drain(3);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].client.ip, "10.0.0.0");
        assert_eq!(drained[2].client.ip, "10.0.0.2");
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_drain_more_than_available() {
        let buffer = RingBuffer::new(10);
        buffer.add(event("10.0.0.1"));

        let drained = buffer.drain(100);
        assert_eq!(drained.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_all_empties() {
        let buffer = RingBuffer::new(10);
        for i in 0..7 {
            buffer.add(event(&format!("10.0.0.{i}")));
        }

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 7);
        assert!(buffer.is_empty());
        assert_eq!(drained[6].client.ip, "10.0.0.6");
    }

    #[test]
    fn test_size_accounting_invariant() {
        let buffer = RingBuffer::new(5);

        let mut added = 0usize;
        for i in 0..8 {
            if buffer.add(event(&format!("10.0.0.{i}"))) {
                added += 1;
            }
        }
        assert_eq!(added, 5);

        let mut removed = 0usize;
        removed += buffer.drain(2).len();
        removed += usize::from(buffer.get().is_some());
        assert_eq!(buffer.len(), added - removed);
    }
}
