//! Command queue
//!
//! A concurrent min-priority queue of [`Command`]s ordered by timestamp.
//! Any number of producer threads may [`put`](CommandQueue::put); a single
//! consumer (the service thread) takes the oldest command with
//! [`poll`](CommandQueue::poll).
//!
//! Listeners registered with [`add_data_listener`](CommandQueue::add_data_listener)
//! are called synchronously on the producer's thread after every insert. They
//! must return quickly and must not call back into `put`.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command::Command;

/// Callback fired when new data lands in the queue
pub trait DataListener: Send + Sync {
    fn on_data_available(&self);
}

impl<F> DataListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_data_available(&self) {
        self()
    }
}

/// Heap entry: reversed timestamp order turns the max-heap into a min-heap
struct Entry {
    command: Command,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .command
            .cmp_timestamp(&self.command)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Heap {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
}

/// Thread-safe priority queue of pending motion commands
#[derive(Default)]
pub struct CommandQueue {
    heap: Mutex<Heap>,
    available: Condvar,
    listeners: Mutex<Vec<Arc<dyn DataListener>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command and notify listeners. Never blocks on consumers.
    pub fn put(&self, command: Command) {
        {
            let mut heap = self.heap.lock();
            let seq = heap.next_seq;
            heap.next_seq = heap.next_seq.wrapping_add(1);
            heap.entries.push(Entry { command, seq });
        }
        self.available.notify_one();
        self.notify_listeners();
    }

    /// Take the oldest command, waiting up to `timeout` for one to arrive
    pub fn poll(&self, timeout: Duration) -> Option<Command> {
        let deadline = Instant::now() + timeout;
        let mut heap = self.heap.lock();
        loop {
            if let Some(entry) = heap.entries.pop() {
                return Some(entry.command);
            }
            if self.available.wait_until(&mut heap, deadline).timed_out() {
                return heap.entries.pop().map(|e| e.command);
            }
        }
    }

    /// Instantaneous number of queued commands; may be stale by the time it is read
    pub fn len(&self) -> usize {
        self.heap.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued command
    pub fn clear(&self) {
        self.heap.lock().entries.clear();
    }

    pub fn add_data_listener(&self, listener: Arc<dyn DataListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify_listeners(&self) {
        // Snapshot so a listener may register others without deadlocking
        let listeners: Vec<Arc<dyn DataListener>> = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_data_available();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::thread;

    #[test]
    fn test_poll_returns_oldest_first() {
        let queue = CommandQueue::new();
        queue.put(Command::vector(3, 3, 300));
        queue.put(Command::vector(1, 1, 100));
        queue.put(Command::tractor(2, 2, 200));

        let order: Vec<i64> = (0..3)
            .filter_map(|_| queue.poll(Duration::from_millis(10)))
            .map(|c| c.timestamp_millis())
            .collect();
        assert_eq!(order, vec![100, 200, 300]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_poll_times_out_on_empty_queue() {
        let queue = CommandQueue::new();
        let start = Instant::now();
        assert!(queue.poll(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_poll_wakes_on_put() {
        let queue = Arc::new(CommandQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.put(Command::vector(5, 5, 1));
            })
        };
        let command = queue.poll(Duration::from_secs(2));
        producer.join().unwrap();
        assert_eq!(command, Some(Command::vector(5, 5, 1)));
    }

    #[test]
    fn test_listeners_called_on_put() {
        let queue = CommandQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        queue.add_data_listener(Arc::new(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        }));

        queue.put(Command::vector_stop(1));
        queue.put(Command::vector_stop(2));
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);

        queue.remove_all_listeners();
        queue.put(Command::vector_stop(3));
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(CommandQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.put(Command::tractor(p, i, (i * 4 + p) as i64));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 200);

        let mut last = i64::MIN;
        while let Some(c) = queue.poll(Duration::from_millis(1)) {
            assert!(c.timestamp_millis() >= last);
            last = c.timestamp_millis();
        }
    }
}
