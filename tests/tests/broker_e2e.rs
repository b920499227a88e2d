//! End-to-end broker scenarios through the public API.

use std::time::Duration;

use broker_core::Error;
use integration_tests::setup::{Collected, TestContext};

const SETTLE: Duration = Duration::from_millis(550);

/// Extra wait after the expected count is reached, to catch duplicate
/// deliveries that would arrive on a later poll tick.
async fn assert_exactly(collected: &Collected, expected: usize) {
    collected.wait_for(expected, SETTLE).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collected.len(), expected);
}

#[tokio::test]
async fn test_write_only_topic_then_shutdown() {
    let ctx = TestContext::new();

    ctx.broker.create_topic("rainbow_II", 2).await.unwrap();
    for i in 1..=10 {
        ctx.broker.write("rainbow_II", format!("msg_{i}")).await;
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    ctx.broker.shutdown().await.unwrap();

    let persisted =
        ctx.partition_lines("rainbow_II", 1) + ctx.partition_lines("rainbow_II", 2);
    assert_eq!(persisted, 10);

    // Round-robin: both partitions took an equal share.
    assert_eq!(ctx.partition_lines("rainbow_II", 1), 5);
    assert_eq!(ctx.partition_lines("rainbow_II", 2), 5);

    // The global counters are shared across tests, so only a floor holds.
    assert!(telemetry::metrics().snapshot().messages_flushed >= 10);
}

#[tokio::test]
async fn test_consumer_group_shares_partitions() {
    let ctx = TestContext::new();
    ctx.broker.create_topic("rainbow_II", 2).await.unwrap();

    let publisher = ctx.broker.publish("rainbow_II").unwrap();

    // All members of the group feed one collector; set equality across
    // members is what matters, not which member got which partition.
    let collected = Collected::default();
    let _sub_a = ctx
        .broker
        .subscribe("rainbow_II", "SOAP", collected.callback())
        .await
        .unwrap();
    let _sub_b = ctx
        .broker
        .subscribe("rainbow_II", "SOAP", collected.callback())
        .await
        .unwrap();

    publisher.send("first").await;
    publisher.send("second").await;

    assert_exactly(&collected, 2).await;
    assert_eq!(collected.sorted(), vec!["first".to_string(), "second".to_string()]);

    // A third member of a two-partition topic ends up with an empty
    // assignment; the group as a whole still sees every message once.
    let _sub_c = ctx
        .broker
        .subscribe("rainbow_II", "SOAP", collected.callback())
        .await
        .unwrap();

    publisher.send("third").await;
    publisher.send("four").await;
    publisher.send("five").await;
    publisher.send("six").await;

    assert_exactly(&collected, 6).await;

    publisher.send("seven").await;
    assert_exactly(&collected, 7).await;

    publisher.send("8").await;
    publisher.send("9").await;
    assert_exactly(&collected, 9).await;

    let mut expected: Vec<String> = [
        "first", "second", "third", "four", "five", "six", "seven", "8", "9",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    expected.sort();
    assert_eq!(collected.sorted(), expected);

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_partition_preserves_publish_order() {
    let ctx = TestContext::new();
    ctx.broker.create_topic("ordered", 1).await.unwrap();

    let publisher = ctx.broker.publish("ordered").unwrap();

    let collected = Collected::default();
    let _sub = ctx
        .broker
        .subscribe("ordered", "SOAP", collected.callback())
        .await
        .unwrap();

    for i in 1..=20 {
        publisher.send(format!("msg_{i}")).await;
    }

    assert_exactly(&collected, 20).await;
    assert_eq!(
        collected.snapshot(),
        (1..=20).map(|i| format!("msg_{i}")).collect::<Vec<_>>()
    );

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_create_and_delete_topic() {
    let ctx = TestContext::new();

    ctx.broker.create_topic("tmp", 2).await.unwrap();
    assert!(ctx.broker.has_topic("tmp"));

    ctx.broker.delete_topic("tmp").unwrap();
    assert!(!ctx.broker.has_topic("tmp"));

    let err = ctx.broker.delete_topic("tmp").unwrap_err();
    assert!(matches!(err, Error::TopicNotFound(_)));

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_topic_name_must_not_be_empty() {
    let ctx = TestContext::new();

    let err = ctx.broker.create_topic("", 1).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_zero_partitions_normalises_to_one() {
    let ctx = TestContext::new();

    ctx.broker.create_topic("single", 0).await.unwrap();
    ctx.broker.write("single", "only line").await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(ctx.partition_lines("single", 1), 1);
    assert!(!ctx.partition_file("single", 2).exists());

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_create_topic_fails() {
    let ctx = TestContext::new();

    ctx.broker.create_topic("rainbow_II", 2).await.unwrap();
    let err = ctx.broker.create_topic("rainbow_II", 2).await.unwrap_err();
    assert!(matches!(err, Error::TopicAlreadyExists(_)));

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publish_and_subscribe_require_known_topic() {
    let ctx = TestContext::new();

    let err = ctx.broker.publish("nowhere").unwrap_err();
    assert!(matches!(err, Error::TopicNotFound(_)));

    let err = ctx
        .broker
        .subscribe("nowhere", "SOAP", Box::new(|_| {}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TopicNotFound(_)));

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_removes_group_and_its_offsets() {
    let ctx = TestContext::new();
    ctx.broker.create_topic("rainbow_II", 2).await.unwrap();

    let publisher = ctx.broker.publish("rainbow_II").unwrap();

    let first_run = Collected::default();
    let sub = ctx
        .broker
        .subscribe("rainbow_II", "ghost", first_run.callback())
        .await
        .unwrap();

    publisher.send("one").await;
    assert_exactly(&first_run, 1).await;

    sub.unsubscribe();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The group died with its last member, so a reborn group restarts
    // from offset zero and sees the message again.
    let second_run = Collected::default();
    let _sub = ctx
        .broker
        .subscribe("rainbow_II", "ghost", second_run.callback())
        .await
        .unwrap();

    assert_exactly(&second_run, 1).await;
    assert_eq!(second_run.snapshot(), vec!["one".to_string()]);

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_member_beyond_partition_count_gets_nothing() {
    let ctx = TestContext::new();
    ctx.broker.create_topic("narrow", 1).await.unwrap();

    let publisher = ctx.broker.publish("narrow").unwrap();

    let collected = Collected::default();
    let _sub_a = ctx
        .broker
        .subscribe("narrow", "SOAP", collected.callback())
        .await
        .unwrap();
    let _sub_b = ctx
        .broker
        .subscribe("narrow", "SOAP", collected.callback())
        .await
        .unwrap();

    publisher.send("a").await;
    publisher.send("b").await;
    publisher.send("c").await;

    // Exactly once despite two members: only one owns the partition.
    assert_exactly(&collected, 3).await;

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropping_subscription_unsubscribes() {
    let ctx = TestContext::new();
    ctx.broker.create_topic("rainbow_II", 1).await.unwrap();

    let publisher = ctx.broker.publish("rainbow_II").unwrap();

    let collected = Collected::default();
    {
        let _sub = ctx
            .broker
            .subscribe("rainbow_II", "SOAP", collected.callback())
            .await
            .unwrap();
        // Dropped here.
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    publisher.send("late").await;
    tokio::time::sleep(SETTLE).await;
    assert!(collected.is_empty());

    ctx.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_completes_within_deadline() {
    let ctx = TestContext::new();
    ctx.broker.create_topic("rainbow_II", 2).await.unwrap();

    let collected = Collected::default();
    let _sub = ctx
        .broker
        .subscribe("rainbow_II", "SOAP", collected.callback())
        .await
        .unwrap();

    let start = std::time::Instant::now();
    ctx.broker.shutdown().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}
