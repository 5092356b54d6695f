//! Stream integration tests: ordering, commit-after-handler, redelivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use trackpulse_bus::{BusError, Consumer, Publisher};

const TOPIC: &str = "tracking.updated";

async fn setup(pool: &PgPool) -> Publisher {
    trackpulse_bus::bootstrap_schema(pool).await.unwrap();
    Publisher::new(pool.clone(), 16)
}

/// Consume until `expected` messages were handled, then cancel.
async fn collect_messages(
    pool: &PgPool,
    expected: usize,
) -> Vec<(String, Vec<u8>)> {
    let consumer = Consumer::new(pool.clone(), TOPIC, 16);
    let cancel = CancellationToken::new();
    let seen: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    let handler_seen = Arc::clone(&seen);
    let handler_cancel = cancel.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(10),
        consumer.consume(&cancel, move |key, value| {
            let seen = Arc::clone(&handler_seen);
            let cancel = handler_cancel.clone();
            async move {
                let mut seen = seen.lock().unwrap();
                seen.push((String::from_utf8(key).unwrap(), value));
                if seen.len() >= expected {
                    cancel.cancel();
                }
                Ok(())
            }
        }),
    )
    .await
    .expect("consumer timed out")
    .expect("consumer failed");

    Arc::try_unwrap(seen).unwrap().into_inner().unwrap()
}

#[sqlx::test]
async fn publishes_and_consumes_in_order(pool: PgPool) {
    let publisher = setup(&pool).await;
    for i in 0..5 {
        publisher
            .publish(TOPIC, "42", format!("payload-{i}").as_bytes())
            .await
            .unwrap();
    }

    let seen = collect_messages(&pool, 5).await;
    assert_eq!(seen.len(), 5);
    for (i, (key, value)) in seen.iter().enumerate() {
        assert_eq!(key, "42");
        assert_eq!(value, format!("payload-{i}").as_bytes());
    }
}

#[sqlx::test]
async fn same_key_lands_on_one_partition(pool: PgPool) {
    let publisher = setup(&pool).await;
    publisher.publish(TOPIC, "42", b"a").await.unwrap();
    publisher.publish(TOPIC, "42", b"b").await.unwrap();
    publisher.publish(TOPIC, "7", b"c").await.unwrap();

    let partitions: Vec<(String, i16)> =
        sqlx::query_as("SELECT partition_key, partition_no FROM bus_messages ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(partitions[0].1, partitions[1].1);
    assert!((0..16).contains(&partitions[0].1));
    assert!((0..16).contains(&partitions[2].1));
}

#[sqlx::test]
async fn handler_error_stops_consumption_and_leaves_message_pending(pool: PgPool) {
    let publisher = setup(&pool).await;
    publisher.publish(TOPIC, "1", b"poison").await.unwrap();

    let consumer = Consumer::new(pool.clone(), TOPIC, 16);
    let cancel = CancellationToken::new();
    let result = consumer
        .consume(&cancel, |_key, _value| async move {
            Err("handler exploded".into())
        })
        .await;
    assert!(matches!(result, Err(BusError::Handler(_))));

    // The message was not committed and is redelivered to the next consumer.
    let seen = collect_messages(&pool, 1).await;
    assert_eq!(seen[0].1, b"poison");

    // Now it is committed and gone.
    let (pending,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM bus_messages WHERE consumed_at IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(pending, 0);
}

#[sqlx::test]
async fn handler_is_retried_per_message_not_skipped(pool: PgPool) {
    let publisher = setup(&pool).await;
    publisher.publish(TOPIC, "1", b"first").await.unwrap();
    publisher.publish(TOPIC, "1", b"second").await.unwrap();

    // Fail the first delivery, then succeed; "first" must be delivered
    // again before "second".
    let attempts = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(pool.clone(), TOPIC, 16);
    let cancel = CancellationToken::new();
    let handler_attempts = Arc::clone(&attempts);
    let result = consumer
        .consume(&cancel, move |_key, value| {
            let attempts = Arc::clone(&handler_attempts);
            async move {
                assert_eq!(value, b"first");
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("not yet".into())
            }
        })
        .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let seen = collect_messages(&pool, 2).await;
    assert_eq!(seen[0].1, b"first");
    assert_eq!(seen[1].1, b"second");
}

#[sqlx::test]
async fn cancellation_ends_the_loop_without_error(pool: PgPool) {
    setup(&pool).await;
    let consumer = Consumer::new(pool.clone(), TOPIC, 16);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = consumer
        .consume(&cancel, |_key, _value| async move { Ok(()) })
        .await;
    assert!(result.is_ok());
}
