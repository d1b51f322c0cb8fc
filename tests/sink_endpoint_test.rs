//! End-to-end tests for the sink endpoint
//!
//! These tests drive the endpoint through its public API: a mock AMQP
//! sender stands in for the transport, and the tests play the Kafka
//! consumer worker through the handoff ends recorded by the no-op
//! launcher (staging map plus notification channel).

use std::sync::Arc;
use std::time::Duration;

use streambridge::amqp::{
    AMQP_KEY_ANNOTATION, AMQP_OFFSET_ANNOTATION, AMQP_PARTITION_ANNOTATION,
};
use streambridge::test_utils::{test_bridge_config, LaunchRecord};
use streambridge::{
    AmqpValue, DeliveryOutcome, DeliveryQos, DeliveryTag, EndpointState, KafkaRecord, LinkEvent,
    MockAmqpSender, NoopWorkerLauncher, Notification, SinkEndpoint, Source,
};

fn record(partition: i32, offset: i64) -> KafkaRecord {
    KafkaRecord {
        topic: "orders".to_string(),
        partition,
        offset,
        key: Some(b"key".to_vec()),
        value: format!("value-{offset}").into_bytes(),
    }
}

/// Play the worker: stage a record and post its send notification
fn worker_send(worker: &LaunchRecord, tag: u64, rec: KafkaRecord) -> DeliveryTag {
    let tag = DeliveryTag::new(tag);
    worker.staging.insert(tag, rec);
    worker.notifications.send(Notification::Send(tag));
    tag
}

/// Wait until `condition` holds or fail the test
async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn happy_path_at_most_once() {
    let sender = MockAmqpSender::new(
        Some(Source::new("orders/group.id/g1")),
        DeliveryQos::AtMostOnce,
    )
    .with_credit(16);
    let launcher = Arc::new(NoopWorkerLauncher::new());
    let mut endpoint = SinkEndpoint::new(test_bridge_config(), sender.clone(), launcher.clone());

    endpoint.attach().unwrap();
    let handle = endpoint.handle();
    let task = tokio::spawn(endpoint.run());

    let worker = launcher.record().unwrap();
    worker.notifications.send(Notification::Assigned);
    for (tag, offset) in [(1u64, 10i64), (2, 11), (3, 12)] {
        worker_send(&worker, tag, record(0, offset));
    }

    wait_until(|| sender.sent().len() == 3, "three transfers").await;

    handle.close();
    task.await.unwrap();

    let sent = sender.sent();
    for (transfer, offset) in sent.iter().zip([10i64, 11, 12]) {
        assert!(transfer.settled);
        assert_eq!(
            transfer.message.annotation(AMQP_OFFSET_ANNOTATION),
            Some(&AmqpValue::Long(offset))
        );
        assert_eq!(
            transfer.message.annotation(AMQP_PARTITION_ANNOTATION),
            Some(&AmqpValue::Int(0))
        );
        assert_eq!(
            transfer.message.annotation(AMQP_KEY_ANNOTATION),
            Some(&AmqpValue::Bytes(b"key".to_vec()))
        );
        assert_eq!(transfer.message.address.as_deref(), Some("orders/group.id/g1"));
    }

    // pre-settled links never produce commits
    assert!(worker.context.tracker().commits().is_empty());
}

#[tokio::test]
async fn at_least_once_commits_follow_settlement() {
    let sender = MockAmqpSender::new(
        Some(Source::new("orders/group.id/g2")),
        DeliveryQos::AtLeastOnce,
    )
    .with_credit(16);
    let launcher = Arc::new(NoopWorkerLauncher::new());
    let mut endpoint = SinkEndpoint::new(test_bridge_config(), sender.clone(), launcher.clone());

    endpoint.attach().unwrap();
    let handle = endpoint.handle();
    let task = tokio::spawn(endpoint.run());

    let worker = launcher.record().unwrap();
    worker.notifications.send(Notification::Assigned);
    let tags: Vec<DeliveryTag> = [(1u64, 5i64), (2, 6), (3, 7)]
        .into_iter()
        .map(|(tag, offset)| worker_send(&worker, tag, record(0, offset)))
        .collect();

    wait_until(|| sender.sent().len() == 3, "three transfers").await;
    assert!(sender.sent().iter().all(|t| !t.settled));

    // nothing is committable until the lowest offset settles
    handle.link_event(LinkEvent::Settled {
        tag: tags[1],
        outcome: DeliveryOutcome::Accepted,
    });
    handle.link_event(LinkEvent::Settled {
        tag: tags[0],
        outcome: DeliveryOutcome::Accepted,
    });
    handle.link_event(LinkEvent::Settled {
        tag: tags[2],
        outcome: DeliveryOutcome::Accepted,
    });

    // the worker-side view: commits eventually reach offset 8
    let tracker = worker.context.tracker().clone();
    wait_until(
        || tracker.commits().get(&0).copied() == Some(8),
        "commit point at offset 8",
    )
    .await;

    handle.close();
    task.await.unwrap();
}

#[tokio::test]
async fn credit_exhaustion_pauses_and_drain_recovers() {
    let sender = MockAmqpSender::new(
        Some(Source::new("orders/group.id/g1")),
        DeliveryQos::AtMostOnce,
    )
    .with_credit(2);
    let launcher = Arc::new(NoopWorkerLauncher::new());
    let mut endpoint = SinkEndpoint::new(test_bridge_config(), sender.clone(), launcher.clone());

    endpoint.attach().unwrap();
    let handle = endpoint.handle();
    let task = tokio::spawn(endpoint.run());

    let worker = launcher.record().unwrap();
    worker.notifications.send(Notification::Assigned);
    for (tag, offset) in [(1u64, 1i64), (2, 2), (3, 3)] {
        worker_send(&worker, tag, record(0, offset));
    }

    // two credits are spent, the third delivery waits and the worker
    // observes the full queue
    wait_until(|| sender.sent().len() == 2, "two transfers").await;
    let context = worker.context.clone();
    wait_until(|| context.send_queue_full(), "queue-full flag set").await;

    sender.grant_credit(2);
    handle.link_event(LinkEvent::SendQueueDrain);

    wait_until(|| sender.sent().len() == 3, "third transfer after drain").await;
    wait_until(|| !context.send_queue_full(), "queue-full flag cleared").await;

    handle.close();
    task.await.unwrap();
}

#[tokio::test]
async fn remote_detach_tears_down_worker_and_tracker() {
    let sender = MockAmqpSender::new(
        Some(Source::new("orders/group.id/g2")),
        DeliveryQos::AtLeastOnce,
    )
    .with_credit(16);
    let launcher = Arc::new(NoopWorkerLauncher::new());
    let mut endpoint = SinkEndpoint::new(test_bridge_config(), sender.clone(), launcher.clone());

    let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let close_count = Arc::clone(&closes);
    endpoint.on_close(move || {
        close_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    });

    endpoint.attach().unwrap();
    let handle = endpoint.handle();
    let task = tokio::spawn(endpoint.run());

    let worker = launcher.record().unwrap();
    worker.notifications.send(Notification::Assigned);
    let tag = worker_send(&worker, 1, record(0, 5));

    wait_until(|| sender.sent().len() == 1, "one transfer").await;

    // peer detaches with the delivery unsettled
    handle.link_event(LinkEvent::RemoteDetach);
    task.await.unwrap();

    assert!(launcher.shutdown_requested());
    assert!(sender.is_closed());
    assert_eq!(closes.load(std::sync::atomic::Ordering::Relaxed), 1);

    // a straggling settlement commits nothing
    worker.context.tracker().delivered(tag);
    assert!(worker.context.tracker().commits().is_empty());
}

#[tokio::test]
async fn malformed_address_rejects_without_consumer() {
    let sender = MockAmqpSender::new(Some(Source::new("orders")), DeliveryQos::AtMostOnce);
    let launcher = Arc::new(NoopWorkerLauncher::new());
    let mut endpoint = SinkEndpoint::new(test_bridge_config(), sender.clone(), launcher.clone());

    endpoint.attach().unwrap();
    assert_eq!(endpoint.state(), EndpointState::Closed);

    // run returns immediately for a rejected endpoint
    endpoint.run().await;

    assert_eq!(launcher.launch_count(), 0);
    assert!(sender.is_closed());
    assert_eq!(sender.local_source().unwrap(), None);
    assert_eq!(sender.condition().unwrap().condition, "no-group-id");
}

#[tokio::test]
async fn double_close_invokes_listener_once() {
    let sender = MockAmqpSender::new(
        Some(Source::new("orders/group.id/g1")),
        DeliveryQos::AtMostOnce,
    );
    let launcher = Arc::new(NoopWorkerLauncher::new());
    let mut endpoint = SinkEndpoint::new(test_bridge_config(), sender.clone(), launcher);

    let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let close_count = Arc::clone(&closes);
    endpoint.on_close(move || {
        close_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    });

    endpoint.attach().unwrap();
    let handle = endpoint.handle();
    let task = tokio::spawn(endpoint.run());

    handle.close();
    handle.close();
    task.await.unwrap();

    assert_eq!(closes.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(sender.close_count(), 1);
}
