// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use log_piler::{
    config::PilerConfig,
    constants::{LINE_SEPARATOR, RESPONSE_FAILURE_KEY},
    errors::PilerError,
    piler::Piler,
    queue::{ChannelQueue, MessageQueue, QueueItem, QueueReceiver},
    statistics::Statistics,
};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, timeout, Duration};

fn start_pipeline(interval_ms: u64, pile_max: usize) -> (Piler, QueueReceiver, Arc<Statistics>) {
    let stats = Arc::new(Statistics::new());
    let (queue, receiver) = ChannelQueue::new(Arc::clone(&stats));
    let config = PilerConfig {
        interval_ms,
        pile_max,
        ..Default::default()
    };
    let piler = Piler::new(Arc::new(queue), Arc::clone(&stats), &config);
    (piler, receiver, stats)
}

fn drain(receiver: &mut QueueReceiver) -> Vec<QueueItem> {
    let mut items = Vec::new();
    while let Some(item) = receiver.try_recv() {
        items.push(item);
    }
    items.sort_by(|a, b| a.key().cmp(b.key()));
    items
}

/// Stands in for the HTTP sender: consumes items and records request and
/// response outcomes the way a delivery worker would.
async fn run_sender(mut receiver: QueueReceiver, stats: Arc<Statistics>) -> Vec<QueueItem> {
    let mut delivered = Vec::new();
    while let Some(item) = receiver.recv().await {
        let size = item.message().len() as u64;
        stats.record_request(size, size / 2);
        if item.key() == "unreachable" {
            stats.record_response_failure();
        } else {
            stats.record_response_success(200);
        }
        delivered.push(item);
    }
    delivered
}

#[tokio::test]
async fn piler_ships_piles_through_channel_queue() {
    let (piler, receiver, stats) = start_pipeline(50, 1_000);
    let sender = tokio::spawn(run_sender(receiver, Arc::clone(&stats)));

    piler.start().expect("failed to start piler");
    piler.input("a-1".to_string(), "app-a").unwrap();
    piler.input("b-1".to_string(), "app-b").unwrap();
    piler.input("a-2".to_string(), "app-a").unwrap();
    piler.input("down".to_string(), "unreachable").unwrap();

    sleep(Duration::from_millis(300)).await;
    piler.stop().await.expect("failed to stop piler");
    drop(piler);

    let mut delivered = timeout(Duration::from_secs(5), sender)
        .await
        .expect("sender did not finish")
        .expect("sender task failed");
    delivered.sort_by(|a, b| a.key().cmp(b.key()));

    assert_eq!(
        delivered,
        vec![
            QueueItem::new("a-1\na-2".to_string(), "app-a".to_string()),
            QueueItem::new("b-1".to_string(), "app-b".to_string()),
            QueueItem::new("down".to_string(), "unreachable".to_string()),
        ]
    );

    assert_eq!(stats.total_input_events(), 4);
    assert_eq!(stats.total_input_bytes(), 13);
    assert_eq!(stats.current_pile_items(), 0);
    assert_eq!(stats.current_pile_bytes(), 0);
    assert_eq!(stats.total_enqueue_times(), 3);
    assert_eq!(stats.total_dequeue_times(), 3);
    assert_eq!(stats.current_queue_items(), 0);
    assert_eq!(stats.current_queue_bytes(), 0);
    assert_eq!(stats.total_output_requests(), 3);
    assert_eq!(stats.total_response_success(), 2);
    assert_eq!(stats.response_count("200"), 2);
    assert_eq!(stats.response_count(RESPONSE_FAILURE_KEY), 1);
}

#[tokio::test]
async fn pass_through_forwards_without_delay() {
    let (piler, mut receiver, stats) = start_pipeline(0, 1_000);
    piler.start().unwrap();

    piler.input("one".to_string(), "k").unwrap();
    piler.input("two".to_string(), "k").unwrap();

    let first = receiver.try_recv().expect("first item not forwarded");
    let second = receiver.try_recv().expect("second item not forwarded");
    assert_eq!(first.message(), "one");
    assert_eq!(second.message(), "two");
    assert_eq!(stats.total_enqueue_times(), 2);

    piler.stop().await.unwrap();
}

#[tokio::test]
async fn size_trigger_scenario() {
    let (piler, mut receiver, stats) = start_pipeline(3_600_000, 100);
    piler.start().unwrap();

    piler.input("a".repeat(60), "k").unwrap();
    piler.input("b".repeat(50), "k").unwrap();

    let items = drain(&mut receiver);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].message(), "a".repeat(60));
    assert_eq!(piler.pile_bytes(), 50);
    assert_eq!(stats.current_pile_bytes(), 50);

    piler.stop().await.unwrap();
    let items = drain(&mut receiver);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].message(), "b".repeat(50));
}

#[tokio::test]
async fn two_keys_timer_scenario() {
    let (piler, mut receiver, stats) = start_pipeline(3_600_000, 1_000);

    piler.input("x".repeat(10), "a").unwrap();
    piler.input("y".repeat(20), "b").unwrap();
    assert_eq!(piler.flush().unwrap(), 2);

    let items = drain(&mut receiver);
    assert_eq!(
        items,
        vec![
            QueueItem::new("x".repeat(10), "a".to_string()),
            QueueItem::new("y".repeat(20), "b".to_string()),
        ]
    );
    assert_eq!(stats.current_pile_items(), 0);
    assert_eq!(stats.current_pile_bytes(), 0);
}

#[tokio::test]
async fn stop_rejects_input_and_keeps_counters() {
    let (piler, mut receiver, stats) = start_pipeline(1_000, 1_000);
    piler.start().unwrap();
    piler.input("kept".to_string(), "k").unwrap();
    piler.stop().await.unwrap();

    let events_before = stats.total_input_events();
    assert_eq!(
        piler.input("dropped".to_string(), "k"),
        Err(PilerError::ShuttingDown)
    );
    assert_eq!(stats.total_input_events(), events_before);

    let items = drain(&mut receiver);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].message(), "kept");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_nothing() {
    let (piler, _receiver, stats) = start_pipeline(3_600_000, 1_000_000);
    let piler = Arc::new(piler);
    piler.start().unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let piler = Arc::clone(&piler);
        tasks.push(tokio::spawn(async move {
            for _ in 0..100 {
                piler.input("x".to_string(), "shared").unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(stats.current_pile_bytes(), 1000);
    assert_eq!(stats.current_pile_items(), 1000);

    piler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timer_and_size_flushes_under_contention_lose_nothing() {
    const PRODUCERS: usize = 8;
    const INPUTS_PER_PRODUCER: usize = 2_000;
    const PILE_MAX: usize = 50;

    let (piler, mut receiver, stats) = start_pipeline(1, PILE_MAX);
    let piler = Arc::new(piler);
    piler.start().unwrap();

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let piler = Arc::clone(&piler);
        producers.push(tokio::task::spawn_blocking(move || {
            for i in 0..INPUTS_PER_PRODUCER {
                let key = format!("k{}", i % 3);
                piler.input(format!("p{p}-{i}"), &key).unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    piler.stop().await.unwrap();

    let items = drain(&mut receiver);
    let mut lines = Vec::new();
    for item in &items {
        assert!(!item.message().is_empty(), "empty item for key {}", item.key());
        let piled: usize = item.message().split(LINE_SEPARATOR).map(str::len).sum();
        assert!(piled <= PILE_MAX, "item of {piled} bytes exceeds the pile limit");
        for line in item.message().split(LINE_SEPARATOR) {
            assert!(!line.is_empty());
            lines.push(line.to_string());
        }
    }

    let total = PRODUCERS * INPUTS_PER_PRODUCER;
    assert_eq!(lines.len(), total);
    lines.sort();
    lines.dedup();
    assert_eq!(lines.len(), total);
    assert_eq!(stats.total_input_events(), total as u64);
    assert_eq!(stats.current_pile_items(), 0);
    assert_eq!(stats.current_pile_bytes(), 0);
    assert_eq!(piler.pile_items(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_response_recording() {
    let stats = Arc::new(Statistics::new());

    let mut tasks = Vec::new();
    for i in 0..16 {
        let stats = Arc::clone(&stats);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                if i < 10 {
                    stats.record_response_success(200);
                } else {
                    stats.record_response_failure();
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(stats.total_response_success(), 500);
    assert_eq!(stats.response_count(RESPONSE_FAILURE_KEY), 300);
    assert_eq!(stats.total_response_times(), 500);
}

#[derive(Default)]
struct VecQueue(Mutex<Vec<QueueItem>>);

impl MessageQueue for VecQueue {
    fn enqueue(&self, item: QueueItem) {
        self.0.lock().unwrap().push(item);
    }
}

fn piler_with_vec_queue(interval_ms: u64, pile_max: usize) -> (Piler, Arc<VecQueue>) {
    let queue = Arc::new(VecQueue::default());
    let config = PilerConfig {
        interval_ms,
        pile_max,
        ..Default::default()
    };
    let piler = Piler::new(queue.clone(), Arc::new(Statistics::new()), &config);
    (piler, queue)
}

proptest! {
    #[test]
    fn pass_through_preserves_every_entry(
        entries in prop::collection::vec(("[a-z ]{0,40}", "[a-c]"), 0..50)
    ) {
        let (piler, queue) = piler_with_vec_queue(0, 0);

        for (entry, key) in &entries {
            piler.input(entry.clone(), key).unwrap();
        }

        let expected: Vec<QueueItem> = entries
            .iter()
            .map(|(entry, key)| QueueItem::new(entry.clone(), key.clone()))
            .collect();
        prop_assert_eq!(queue.0.lock().unwrap().clone(), expected);
    }

    #[test]
    fn same_key_entries_join_in_order(
        entries in prop::collection::vec("[a-z0-9]{1,20}", 1..40)
    ) {
        let (piler, queue) = piler_with_vec_queue(1_000, 1_000_000);

        for entry in &entries {
            piler.input(entry.clone(), "key").unwrap();
        }
        prop_assert_eq!(piler.flush().unwrap(), 1);

        let items = queue.0.lock().unwrap().clone();
        prop_assert_eq!(items.len(), 1);
        prop_assert_eq!(items[0].message(), entries.join(LINE_SEPARATOR));
        prop_assert_eq!(piler.pile_bytes(), 0);
        prop_assert_eq!(piler.pile_items(), 0);
    }

    #[test]
    fn pile_bounded_by_max_unless_single_entry(
        sizes in prop::collection::vec(1usize..80, 1..100),
        pile_max in 10usize..200,
    ) {
        let (piler, _queue) = piler_with_vec_queue(1_000, pile_max);

        for (i, size) in sizes.iter().enumerate() {
            piler.input("z".repeat(*size), &format!("k{}", i % 4)).unwrap();
            let piled = piler.pile_bytes();
            prop_assert!(piled <= pile_max || piler.pile_items() == 1);
        }
    }
}
