use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use slotguard::calendar::{CalendarEvent, MemoryCalendar, Tag, parse_tag};
use slotguard::clock::ManualClock;
use slotguard::dedup::DedupGate;
use slotguard::error::BookingError;
use slotguard::model::*;
use slotguard::orchestrator::Orchestrator;
use slotguard::store::Store;

/// 2030-01-01T00:00:00Z
const DAY0: Ms = 1_893_456_000_000;
const H: Ms = 3_600_000;
const TTL: Ms = 5 * 60_000;
const SHARED: &str = "clinic@example.com";

// ── Test infrastructure ──────────────────────────────────────

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotguard_int_flow");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Harness {
    orch: Orchestrator,
    store: Arc<Store>,
    calendar: Arc<MemoryCalendar>,
    clock: Arc<ManualClock>,
}

async fn register(store: &Store) {
    store
        .register_tenant(Tenant {
            id: 1,
            name: "Clinic".into(),
            shared_calendar: SHARED.into(),
        })
        .await
        .unwrap();
    for (id, name) in [(1, "Dr. A"), (2, "Dr. B")] {
        store
            .register_resource(Resource {
                id,
                tenant_id: 1,
                name: name.into(),
                external_calendar_ref: None,
            })
            .await
            .unwrap();
    }
}

async fn harness(name: &str) -> Harness {
    let store = Arc::new(Store::open(wal_path(name)).unwrap());
    register(&store).await;
    let calendar = Arc::new(MemoryCalendar::new());
    let clock = Arc::new(ManualClock::new(DAY0));
    let orch = Orchestrator::new(store.clone(), calendar.clone(), clock.clone(), TTL);
    Harness {
        orch,
        store,
        calendar,
        clock,
    }
}

fn at(from_h: Ms, to_h: Ms) -> Span {
    Span::new(DAY0 + from_h * H, DAY0 + to_h * H)
}

fn customer(name: &str) -> Customer {
    Customer {
        name: name.into(),
        phone: "+5511999990000".into(),
    }
}

// ── Properties ───────────────────────────────────────────────

#[tokio::test]
async fn active_booking_makes_slot_busy() {
    let h = harness("busy.wal").await;
    let pending = assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Ana")).await);
    assert!(!assert_ok!(h.orch.is_free(1, 1, at(9, 10)).await));

    assert_ok!(h.orch.confirm(1, pending.id).await);
    assert!(!assert_ok!(h.orch.is_free(1, 1, at(9, 10)).await));
    // Partial overlap is still busy.
    assert!(!assert_ok!(
        h.orch
            .is_free(1, 1, Span::new(DAY0 + 9 * H + 30 * 60_000, DAY0 + 11 * H))
            .await
    ));
}

#[tokio::test]
async fn confirm_twice_projects_once() {
    let h = harness("confirm_twice.wal").await;
    let b = assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Ana")).await);
    let first = assert_ok!(h.orch.confirm(1, b.id).await);
    let second = assert_ok!(h.orch.confirm(1, b.id).await);

    assert_eq!(first, second);
    assert_eq!(h.calendar.created_count(), 1);
    assert_eq!(h.calendar.events(SHARED).len(), 1);
}

#[tokio::test]
async fn cancel_twice_deletes_once() {
    let h = harness("cancel_twice.wal").await;
    let b = assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Ana")).await);
    assert_ok!(h.orch.confirm(1, b.id).await);

    let first = assert_ok!(h.orch.cancel(1, b.id).await);
    let second = assert_ok!(h.orch.cancel(1, b.id).await);
    assert_eq!(first.status, BookingStatus::Cancelled);
    assert_eq!(second.status, BookingStatus::Cancelled);
    assert_eq!(h.calendar.deleted_count(), 1);
}

#[tokio::test]
async fn back_to_back_slots_do_not_conflict() {
    let h = harness("back_to_back.wal").await;
    let first = assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Ana")).await);
    assert_ok!(h.orch.confirm(1, first.id).await);
    let second = assert_ok!(h.orch.reserve(1, 1, at(10, 11), customer("Bruno")).await);
    assert_eq!(second.status, BookingStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_admit_exactly_one() {
    let h = Arc::new(harness("concurrent.wal").await);
    let attempts = (0..12).map(|i| {
        let h = h.clone();
        async move {
            tokio::spawn(async move { h.orch.reserve(1, 1, at(9, 10), customer(&format!("Customer {i}"))).await })
                .await
                .unwrap()
        }
    });
    let results = join_all(attempts).await;

    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 1);
    for r in &results {
        if let Err(e) = r {
            assert!(e.is_slot_taken(), "unexpected error: {e}");
        }
    }
    let rows = h
        .store
        .list(
            &BookingFilter {
                resource_id: Some(1),
                ..Default::default()
            },
            DAY0,
        )
        .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, won[0].id);
}

#[tokio::test]
async fn lapsed_hold_frees_slot_and_confirm_expires() {
    let h = harness("lapsed.wal").await;
    let b = assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Ana")).await);

    h.clock.advance(TTL - 1);
    assert!(!assert_ok!(h.orch.is_free(1, 1, at(9, 10)).await));
    h.clock.advance(1);
    assert!(assert_ok!(h.orch.is_free(1, 1, at(9, 10)).await));
    assert_eq!(assert_ok!(h.orch.get(1, b.id).await).effective_status(h.orch.now()), BookingStatus::Expired);

    let err = assert_err!(h.orch.confirm(1, b.id).await);
    assert_eq!(err, BookingError::Expired(b.id));
    assert_eq!(assert_ok!(h.orch.get(1, b.id).await).status, BookingStatus::Cancelled);

    // Someone else can take it now.
    assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Bruno")).await);
}

#[test]
fn dedup_evicts_oldest_after_capacity() {
    let gate = DedupGate::default();
    assert!(!gate.seen("wamid.first"));
    assert!(gate.seen("wamid.first"));
    for i in 0..1000 {
        assert!(!gate.seen(&format!("wamid.{i}")));
    }
    assert!(!gate.seen("wamid.first"));
}

#[tokio::test]
async fn shared_calendar_tags_disambiguate_resources() {
    let h = harness("shared_tags.wal").await;
    h.calendar.insert_event(
        SHARED,
        CalendarEvent {
            id: "booked-elsewhere".into(),
            summary: Some("Dr. A - walk-in".into()),
            span: at(9, 10),
            description: Some("Walk-in\n\nResourceID: 1".into()),
        },
    );
    h.calendar.insert_event(
        SHARED,
        CalendarEvent {
            id: "staff-meeting".into(),
            summary: Some("Staff meeting".into()),
            span: at(12, 13),
            description: None,
        },
    );
    h.calendar.insert_event(
        SHARED,
        CalendarEvent {
            id: "garbled".into(),
            summary: None,
            span: at(15, 16),
            description: Some("ResourceID: 1\nResourceID: 2".into()),
        },
    );

    assert!(!assert_ok!(h.orch.is_free(1, 1, at(9, 10)).await));
    assert!(assert_ok!(h.orch.is_free(1, 2, at(9, 10)).await));
    assert!(!assert_ok!(h.orch.is_free(1, 1, at(12, 13)).await));
    assert!(!assert_ok!(h.orch.is_free(1, 2, at(12, 13)).await));
    assert!(!assert_ok!(h.orch.is_free(1, 2, at(15, 16)).await));
}

#[tokio::test]
async fn confirmed_booking_is_tagged_on_shared_calendar() {
    let h = harness("projection_tag.wal").await;
    let b = assert_ok!(h.orch.reserve(1, 2, at(9, 10), customer("Ana")).await);
    let confirmed = assert_ok!(h.orch.confirm(1, b.id).await);

    let events = h.calendar.events(SHARED);
    assert_eq!(events.len(), 1);
    assert_eq!(Some(events[0].id.clone()), confirmed.external_event_ref);
    assert_eq!(parse_tag(events[0].description.as_deref()), Tag::Resource(2));

    // The projected event must not block the other resource.
    assert!(assert_ok!(h.orch.is_free(1, 1, at(9, 10)).await));
}

#[tokio::test]
async fn calendar_outage_reserves_on_local_truth() {
    let h = harness("outage.wal").await;
    h.calendar.set_fail_reads(true);
    h.calendar.set_fail_writes(true);

    let b = assert_ok!(h.orch.reserve(1, 1, at(9, 10), customer("Ana")).await);
    let confirmed = assert_ok!(h.orch.confirm(1, b.id).await);
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.external_event_ref, None);

    // Local truth still blocks.
    assert_eq!(
        h.orch.reserve(1, 1, at(9, 10), customer("Bruno")).await,
        Err(BookingError::SlotUnavailable(1))
    );
}

#[tokio::test]
async fn replay_restores_bookings_and_statuses() {
    let path = wal_path("replay.wal");
    let (confirmed, cancelled, pending) = {
        let store = Arc::new(Store::open(path.clone()).unwrap());
        register(&store).await;
        let orch = Orchestrator::new(
            store,
            Arc::new(MemoryCalendar::new()),
            Arc::new(ManualClock::new(DAY0)),
            TTL,
        );
        let a = assert_ok!(orch.reserve(1, 1, at(9, 10), customer("Ana")).await);
        let b = assert_ok!(orch.reserve(1, 1, at(10, 11), customer("Bruno")).await);
        let c = assert_ok!(orch.reserve(1, 2, at(9, 10), customer("Carla")).await);
        let a = assert_ok!(orch.confirm(1, a.id).await);
        let b = assert_ok!(orch.cancel(1, b.id).await);
        (a, b, c)
    };

    let reopened = Store::open(path).unwrap();
    assert_eq!(reopened.get(&confirmed.id).await, Some(confirmed));
    assert_eq!(reopened.get(&cancelled.id).await, Some(cancelled));
    assert_eq!(reopened.get(&pending.id).await, Some(pending));
    assert!(reopened.tenant(&1).is_some());
    assert_eq!(reopened.resource_count(), 2);
}
