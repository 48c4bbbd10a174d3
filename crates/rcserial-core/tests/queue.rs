use rcserial_core::command::Command;
use rcserial_core::queue::CommandQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_listener_runs_on_inserting_thread() {
    let queue = Arc::new(CommandQueue::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    queue.add_data_listener(Arc::new(move || {
        sink.lock().unwrap().push(thread::current().id());
    }));

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            queue.put(Command::vector(1, 1, 1));
            thread::current().id()
        })
    };
    let producer_id = producer.join().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![producer_id]);
}

#[test]
fn test_remove_all_listeners() {
    let queue = CommandQueue::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let calls = calls.clone();
        queue.add_data_listener(Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }

    queue.put(Command::tractor(1, 1, 1));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    queue.remove_all_listeners();
    assert_eq!(queue.listener_count(), 0);
    queue.put(Command::tractor(2, 2, 2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_mixed_variants_ordered_by_timestamp() {
    let queue = CommandQueue::new();
    queue.put(Command::tractor(5, 5, 30));
    queue.put(Command::vector(1, 0, 10));
    queue.put(Command::tractor(7, 7, 20));

    let order: Vec<i64> = std::iter::from_fn(|| queue.poll(Duration::ZERO))
        .map(|c| c.timestamp_millis())
        .collect();
    assert_eq!(order, vec![10, 20, 30]);
}

#[test]
fn test_equal_timestamps_keep_insertion_order() {
    let queue = CommandQueue::new();
    queue.put(Command::vector(1, 0, 5));
    queue.put(Command::vector(2, 0, 5));
    queue.put(Command::vector(3, 0, 5));

    let xs: Vec<i32> = std::iter::from_fn(|| queue.poll(Duration::ZERO))
        .map(|c| match c {
            Command::Vector { x, .. } => x,
            Command::Tractor { .. } => unreachable!(),
        })
        .collect();
    assert_eq!(xs, vec![1, 2, 3]);
}
