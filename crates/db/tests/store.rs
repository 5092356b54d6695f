//! Store integration tests: upsert, leasing, and the apply state machine.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use trackpulse_db::models::{NewTrackingEvent, Tracking, TrackingCreateInput, TrackingUpdate};
use trackpulse_db::repositories::{TrackingEventRepo, TrackingRepo};

const LEASE: Duration = Duration::from_secs(120);

/// Postgres stores microseconds; chrono carries nanoseconds. Compare with
/// a millisecond of slack.
fn approx_eq(a: chrono::DateTime<Utc>, b: chrono::DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= 1
}

fn input(carrier: &str, track: &str) -> TrackingCreateInput {
    TrackingCreateInput {
        carrier_code: carrier.to_string(),
        track_number: track.to_string(),
    }
}

async fn setup(pool: &PgPool) {
    trackpulse_db::bootstrap_schema(pool).await.unwrap();
}

async fn register_one(pool: &PgPool, carrier: &str, track: &str) -> Tracking {
    TrackingRepo::create_or_get(pool, &[input(carrier, track)])
        .await
        .unwrap()
        .remove(0)
}

fn success_update(tracking_id: i64, events: Vec<NewTrackingEvent>) -> TrackingUpdate {
    let now = Utc::now();
    TrackingUpdate {
        tracking_id,
        checked_at: now,
        status: "IN_TRANSIT".into(),
        status_raw: "В пути".into(),
        status_at: Some(now),
        next_check_at: now + chrono::Duration::minutes(45),
        events,
        error: None,
    }
}

fn event_at(seconds: i64) -> NewTrackingEvent {
    NewTrackingEvent {
        status: "IN_TRANSIT".into(),
        status_raw: "Принято".into(),
        event_time: Utc::now() - chrono::Duration::seconds(seconds),
        location: Some("Moscow".into()),
        message: Some("accepted".into()),
        payload: Some(serde_json::json!({"hub": 1})),
    }
}

#[sqlx::test]
async fn bootstrap_is_idempotent(pool: PgPool) {
    setup(&pool).await;
    // Second run must not fail.
    trackpulse_db::bootstrap_schema(&pool).await.unwrap();
    trackpulse_db::health_check(&pool).await.unwrap();
}

#[sqlx::test]
async fn register_initializes_scheduling_fields(pool: PgPool) {
    setup(&pool).await;
    let before = Utc::now();
    let tracking = register_one(&pool, "CDEK", "A1").await;

    assert_eq!(tracking.status, "UNKNOWN");
    assert_eq!(tracking.status_raw, "UNKNOWN");
    assert_eq!(tracking.check_fail_count, 0);
    assert!(tracking.last_error.is_none());
    assert!(tracking.last_checked_at.is_none());
    // Immediately due.
    assert!(tracking.next_check_at <= Utc::now());
    assert!(tracking.next_check_at >= before - chrono::Duration::seconds(1));
}

#[sqlx::test]
async fn re_register_preserves_existing_row(pool: PgPool) {
    setup(&pool).await;
    let first = register_one(&pool, "CDEK", "A1").await;

    // Mutate the row so a stomping upsert would be visible.
    TrackingRepo::apply_update(&pool, &success_update(first.id, vec![]))
        .await
        .unwrap();

    let second = register_one(&pool, "CDEK", "A1").await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.status, "IN_TRANSIT");
    assert_eq!(second.created_at, first.created_at);
}

#[sqlx::test]
async fn create_or_get_returns_rows_in_input_order(pool: PgPool) {
    setup(&pool).await;
    let rows = TrackingRepo::create_or_get(
        &pool,
        &[input("POST_RU", "Z9"), input("CDEK", "A1"), input("CDEK", "B2")],
    )
    .await
    .unwrap();

    let tracks: Vec<&str> = rows.iter().map(|t| t.track_number.as_str()).collect();
    assert_eq!(tracks, ["Z9", "A1", "B2"]);
}

#[sqlx::test]
async fn claim_leases_due_rows(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;

    let now = Utc::now();
    let claimed = TrackingRepo::claim_due(&pool, now, 10, LEASE).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, tracking.id);
    assert!(approx_eq(
        claimed[0].next_check_at,
        now + chrono::Duration::seconds(120)
    ));

    // Leased rows are excluded until the lease expires.
    let again = TrackingRepo::claim_due(&pool, Utc::now(), 10, LEASE).await.unwrap();
    assert!(again.is_empty());
}

#[sqlx::test]
async fn refresh_makes_leased_row_due_again(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;
    TrackingRepo::claim_due(&pool, Utc::now(), 10, LEASE).await.unwrap();

    TrackingRepo::refresh(&pool, tracking.id).await.unwrap();
    let claimed = TrackingRepo::claim_due(&pool, Utc::now(), 10, LEASE).await.unwrap();
    assert_eq!(claimed.len(), 1);
}

#[sqlx::test]
async fn delivered_is_never_claimed(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;

    sqlx::query("UPDATE trackings SET status = 'DELIVERED', next_check_at = NOW() WHERE id = $1")
        .bind(tracking.id)
        .execute(&pool)
        .await
        .unwrap();

    let claimed = TrackingRepo::claim_due(&pool, Utc::now(), 10, LEASE).await.unwrap();
    assert!(claimed.is_empty());
}

#[sqlx::test]
async fn concurrent_claims_never_overlap(pool: PgPool) {
    setup(&pool).await;
    let items: Vec<TrackingCreateInput> =
        (0..10).map(|i| input("CDEK", &format!("T{i}"))).collect();
    TrackingRepo::create_or_get(&pool, &items).await.unwrap();

    let now = Utc::now();
    let (a, b) = tokio::join!(
        TrackingRepo::claim_due(&pool, now, 5, LEASE),
        TrackingRepo::claim_due(&pool, now, 5, LEASE),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let mut union: HashSet<i64> = HashSet::new();
    for tracking in a.iter().chain(b.iter()) {
        assert!(union.insert(tracking.id), "tracking {} claimed twice", tracking.id);
    }
    assert_eq!(union.len(), 10);
}

#[sqlx::test]
async fn oldest_cursor_is_claimed_first(pool: PgPool) {
    setup(&pool).await;
    let older = register_one(&pool, "CDEK", "OLD").await;
    let newer = register_one(&pool, "CDEK", "NEW").await;

    sqlx::query("UPDATE trackings SET next_check_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(older.id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE trackings SET next_check_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(newer.id)
        .execute(&pool)
        .await
        .unwrap();

    let claimed = TrackingRepo::claim_due(&pool, Utc::now(), 1, LEASE).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, older.id);
}

#[sqlx::test]
async fn apply_success_overwrites_state_and_inserts_events(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;

    let update = success_update(tracking.id, vec![event_at(60), event_at(30)]);
    TrackingRepo::apply_update(&pool, &update).await.unwrap();

    let row = TrackingRepo::get_by_ids(&pool, &[tracking.id])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(row.status, "IN_TRANSIT");
    assert_eq!(row.status_raw, "В пути");
    assert_eq!(row.check_fail_count, 0);
    assert!(row.last_error.is_none());
    assert!(row.last_checked_at.is_some());
    assert!(approx_eq(row.next_check_at, update.next_check_at));

    let events = TrackingEventRepo::list(&pool, tracking.id, 100, 0).await.unwrap();
    assert_eq!(events.len(), 2);
    // Newest event_time first.
    assert!(events[0].event_time >= events[1].event_time);
    assert_eq!(events[0].payload, Some(serde_json::json!({"hub": 1})));
}

#[sqlx::test]
async fn apply_success_is_idempotent(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;

    let update = success_update(tracking.id, vec![event_at(60)]);
    TrackingRepo::apply_update(&pool, &update).await.unwrap();
    let first = TrackingRepo::get_by_ids(&pool, &[tracking.id]).await.unwrap().remove(0);

    TrackingRepo::apply_update(&pool, &update).await.unwrap();
    let second = TrackingRepo::get_by_ids(&pool, &[tracking.id]).await.unwrap().remove(0);

    assert_eq!(second.status, first.status);
    assert_eq!(second.status_raw, first.status_raw);
    assert_eq!(second.status_at, first.status_at);
    assert_eq!(second.next_check_at, first.next_check_at);
    assert_eq!(second.check_fail_count, 0);

    let events = TrackingEventRepo::list(&pool, tracking.id, 100, 0).await.unwrap();
    assert_eq!(events.len(), 1, "replay must not duplicate events");
}

#[sqlx::test]
async fn apply_error_does_not_stomp_status(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;
    TrackingRepo::apply_update(&pool, &success_update(tracking.id, vec![event_at(60)]))
        .await
        .unwrap();

    let now = Utc::now();
    let error_update = TrackingUpdate {
        tracking_id: tracking.id,
        checked_at: now,
        status: String::new(),
        status_raw: String::new(),
        status_at: None,
        next_check_at: now + chrono::Duration::minutes(5),
        events: vec![event_at(1)],
        error: Some("boom".into()),
    };
    TrackingRepo::apply_update(&pool, &error_update).await.unwrap();

    let row = TrackingRepo::get_by_ids(&pool, &[tracking.id]).await.unwrap().remove(0);
    assert_eq!(row.status, "IN_TRANSIT", "error must not change status");
    assert_eq!(row.status_raw, "В пути");
    assert_eq!(row.check_fail_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("boom"));
    assert!(approx_eq(row.next_check_at, error_update.next_check_at));

    // The error branch inserts no events.
    let events = TrackingEventRepo::list(&pool, tracking.id, 100, 0).await.unwrap();
    assert_eq!(events.len(), 1);

    // A second failure keeps counting up.
    TrackingRepo::apply_update(&pool, &error_update).await.unwrap();
    let row = TrackingRepo::get_by_ids(&pool, &[tracking.id]).await.unwrap().remove(0);
    assert_eq!(row.check_fail_count, 2);
}

#[sqlx::test]
async fn apply_success_clears_fail_state(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;

    let now = Utc::now();
    TrackingRepo::apply_update(
        &pool,
        &TrackingUpdate {
            tracking_id: tracking.id,
            checked_at: now,
            status: String::new(),
            status_raw: String::new(),
            status_at: None,
            next_check_at: now + chrono::Duration::minutes(5),
            events: vec![],
            error: Some("boom".into()),
        },
    )
    .await
    .unwrap();

    TrackingRepo::apply_update(&pool, &success_update(tracking.id, vec![])).await.unwrap();
    let row = TrackingRepo::get_by_ids(&pool, &[tracking.id]).await.unwrap().remove(0);
    assert_eq!(row.check_fail_count, 0);
    assert!(row.last_error.is_none());
}

#[sqlx::test]
async fn list_events_clamps_paging(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;
    let events: Vec<NewTrackingEvent> = (0..5).map(|i| event_at(i * 10)).collect();
    TrackingRepo::apply_update(&pool, &success_update(tracking.id, events)).await.unwrap();

    // Out-of-range limits fall back to the default of 100.
    let all = TrackingEventRepo::list(&pool, tracking.id, 0, 0).await.unwrap();
    assert_eq!(all.len(), 5);
    let all = TrackingEventRepo::list(&pool, tracking.id, 501, -3).await.unwrap();
    assert_eq!(all.len(), 5);

    let page = TrackingEventRepo::list(&pool, tracking.id, 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    let rest = TrackingEventRepo::list(&pool, tracking.id, 100, 4).await.unwrap();
    assert_eq!(rest.len(), 1);
}

#[sqlx::test]
async fn deleting_a_tracking_cascades_to_events(pool: PgPool) {
    setup(&pool).await;
    let tracking = register_one(&pool, "CDEK", "A1").await;
    TrackingRepo::apply_update(&pool, &success_update(tracking.id, vec![event_at(60)]))
        .await
        .unwrap();

    sqlx::query("DELETE FROM trackings WHERE id = $1")
        .bind(tracking.id)
        .execute(&pool)
        .await
        .unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tracking_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
