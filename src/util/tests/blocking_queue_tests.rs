//! Tests for the monitor-protected FIFO.

use super::BlockingQueue;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_values_pop_in_push_order() {
    let queue = BlockingQueue::new();
    queue.push_back("a");
    queue.push_back("b");
    queue.push_back("c");
    assert_eq!(queue.pop_front(), "a");
    assert_eq!(queue.pop_front(), "b");
    assert_eq!(queue.pop_front(), "c");
    assert!(queue.is_empty());
}

#[test]
fn test_pop_front_blocks_until_a_value_arrives() {
    let queue = Arc::new(BlockingQueue::new());

    let consumer_queue = queue.clone();
    let consumer = std::thread::spawn(move || consumer_queue.pop_front());

    std::thread::sleep(Duration::from_millis(20));
    queue.push_back(99u32);
    assert_eq!(consumer.join().expect("consumer panicked"), 99);
}

#[test]
fn test_pop_all_but_most_recent_keeps_the_newest() {
    let queue = BlockingQueue::new();
    for n in 1..=5 {
        queue.push_back(n);
    }
    assert_eq!(queue.pop_all_but_most_recent(), 5);
    // The newest value stays queued.
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop_front(), 5);
}

#[test]
fn test_clear_discards_everything() {
    let queue = BlockingQueue::new();
    queue.push_back(1);
    queue.push_back(2);
    queue.clear();
    assert!(queue.is_empty());
    assert_eq!(queue.len(), 0);
}

#[test]
fn test_every_pushed_value_is_popped_exactly_once() {
    let queue = Arc::new(BlockingQueue::new());
    let producers = 4;
    let per_producer = 250;

    let mut threads = Vec::new();
    for p in 0..producers {
        let queue = queue.clone();
        threads.push(std::thread::spawn(move || {
            for n in 0..per_producer {
                queue.push_back(p * per_producer + n);
            }
        }));
    }
    for thread in threads {
        thread.join().expect("producer panicked");
    }

    let mut seen: Vec<i32> = (0..producers * per_producer)
        .map(|_| queue.pop_front())
        .collect();
    seen.sort_unstable();
    let expected: Vec<i32> = (0..producers * per_producer).collect();
    assert_eq!(seen, expected);
}

proptest! {
    #[test]
    fn prop_single_producer_order_is_preserved(values in proptest::collection::vec(any::<u32>(), 0..64)) {
        let queue = BlockingQueue::new();
        for value in &values {
            queue.push_back(*value);
        }
        let popped: Vec<u32> = (0..values.len()).map(|_| queue.pop_front()).collect();
        prop_assert_eq!(popped, values);
    }
}
