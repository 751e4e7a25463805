use std::sync::Arc;

use crate::availability::Resolver;
use crate::calendar::CalendarProvider;
use crate::clock::Clock;
use crate::error::BookingError;
use crate::ledger::Ledger;
use crate::model::*;
use crate::observability::{
    CANCELLATIONS_TOTAL, CONFIRMATIONS_TOTAL, HOLDS_SWEPT_TOTAL, RESERVATIONS_TOTAL, reserve_outcome,
};
use crate::store::{Store, Transition, validate_customer, validate_span};
use crate::sync::Synchronizer;

/// Reserve, confirm and cancel over the ledger, resolver and synchronizer.
///
/// Holds no lock of its own. Each step is one atomic store write or one
/// calendar call, so concurrent calls for the same booking settle in the
/// store and the loser cleans up whatever it put in the calendar.
pub struct Orchestrator {
    ledger: Ledger,
    resolver: Resolver,
    sync: Synchronizer,
    clock: Arc<dyn Clock>,
    hold_ttl_ms: Ms,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        calendar: Arc<dyn CalendarProvider>,
        clock: Arc<dyn Clock>,
        hold_ttl_ms: Ms,
    ) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            resolver: Resolver::new(store.clone(), calendar.clone(), clock.clone()),
            sync: Synchronizer::new(store, calendar),
            clock,
            hold_ttl_ms,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<Store> {
        self.ledger.store()
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub async fn is_free(&self, tenant_id: TenantId, resource_id: ResourceId, span: Span) -> Result<bool, BookingError> {
        validate_span(&span)?;
        self.resolver.is_free(tenant_id, resource_id, span).await
    }

    /// Place a soft hold on `span` if the resource is free there.
    pub async fn reserve(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        span: Span,
        customer: Customer,
    ) -> Result<Booking, BookingError> {
        let result = self.try_reserve(tenant_id, resource_id, span, customer).await;
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => reserve_outcome(&result)).increment(1);
        result
    }

    async fn try_reserve(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        span: Span,
        customer: Customer,
    ) -> Result<Booking, BookingError> {
        validate_span(&span)?;
        validate_customer(&customer)?;

        let verdict = self.resolver.check(tenant_id, resource_id, span).await?;
        if !verdict.is_free() {
            tracing::info!(tenant_id, resource_id, ?verdict, "reserve rejected, slot unavailable");
            return Err(BookingError::SlotUnavailable(resource_id));
        }

        // The store re-checks under the resource lock; a reserve that raced
        // past the resolver ends here as `Conflict`.
        let now = self.clock.now_ms();
        let booking = Booking::pending(tenant_id, resource_id, customer, span, now, self.hold_ttl_ms);
        self.ledger.insert_pending(booking, now).await
    }

    /// Confirm a live hold and project it to the calendar.
    ///
    /// Confirming twice returns the confirmed booking without a second
    /// projection. A lapsed hold is cancelled and reported as `Expired`.
    /// A failed projection still confirms, just without an event ref.
    pub async fn confirm(&self, tenant_id: TenantId, id: BookingId) -> Result<Booking, BookingError> {
        let booking = self.get(tenant_id, id).await?;
        match booking.status {
            BookingStatus::Confirmed => return Ok(booking),
            BookingStatus::Cancelled | BookingStatus::Expired => {
                return Err(BookingError::InvalidState {
                    id,
                    status: booking.status,
                });
            }
            BookingStatus::Pending if booking.is_lapsed(self.clock.now_ms()) => {
                return self.expire(id).await;
            }
            BookingStatus::Pending => {}
        }

        let event_ref = self.sync.project_confirmed(&booking).await.ok();

        // Re-read the clock: the projection may have outlived the hold.
        let now = self.clock.now_ms();
        let outcome = self.ledger.mark_confirmed(id, event_ref.clone(), now).await;
        match outcome {
            Ok(Transition::Applied(confirmed)) => {
                let projected = if event_ref.is_some() { "yes" } else { "no" };
                metrics::counter!(CONFIRMATIONS_TOTAL, "projected" => projected).increment(1);
                Ok(confirmed)
            }
            Ok(Transition::Unchanged(winner)) => {
                // A concurrent confirm got there first; keep only its event.
                if event_ref != winner.external_event_ref {
                    self.discard_event(&booking, event_ref).await;
                }
                Ok(winner)
            }
            Err(BookingError::Expired(_)) => {
                self.discard_event(&booking, event_ref).await;
                self.expire(id).await
            }
            Err(e) => {
                self.discard_event(&booking, event_ref).await;
                Err(e)
            }
        }
    }

    /// Cancel a booking. Cancelling twice is a no-op success and deletes the
    /// calendar event only once.
    pub async fn cancel(&self, tenant_id: TenantId, id: BookingId) -> Result<Booking, BookingError> {
        // Ownership never changes, so checking it before the write is enough.
        self.get(tenant_id, id).await?;
        match self.ledger.mark_cancelled(id).await? {
            Transition::Unchanged(booking) => Ok(booking),
            Transition::Applied(booking) => {
                metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
                // Failures are logged and counted by the synchronizer.
                let _ = self.sync.remove(&booking).await;
                Ok(booking)
            }
        }
    }

    /// A booking of another tenant is reported as not found.
    pub async fn get(&self, tenant_id: TenantId, id: BookingId) -> Result<Booking, BookingError> {
        let booking = self.ledger.get(id).await?;
        if booking.tenant_id != tenant_id {
            tracing::warn!(tenant_id, booking_id = %id, "booking requested by foreign tenant");
            return Err(BookingError::BookingNotFound(id));
        }
        Ok(booking)
    }

    pub async fn list(&self, filter: &BookingFilter) -> Vec<Booking> {
        self.ledger.list(filter, self.clock.now_ms()).await
    }

    /// Rewrite every lapsed hold to cancelled. Returns how many were swept.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut swept = 0;
        for id in self.ledger.stale_pending(now).await {
            match self.ledger.cancel_lapsed(id, now).await {
                Ok(t) if t.was_applied() => swept += 1,
                Ok(_) => {}
                Err(e) => tracing::debug!(booking_id = %id, "sweep skip: {e}"),
            }
        }
        if swept > 0 {
            metrics::counter!(HOLDS_SWEPT_TOTAL).increment(swept as u64);
        }
        swept
    }

    async fn expire(&self, id: BookingId) -> Result<Booking, BookingError> {
        self.ledger.cancel_lapsed(id, self.clock.now_ms()).await?;
        tracing::info!(booking_id = %id, "confirm refused, hold lapsed");
        Err(BookingError::Expired(id))
    }

    async fn discard_event(&self, booking: &Booking, event_ref: Option<String>) {
        if let Some(event_id) = event_ref {
            tracing::info!(booking_id = %booking.id, event_id = %event_id, "removing orphaned calendar event");
            let _ = self.sync.remove_event(booking, &event_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{CalendarError, CalendarEvent, MemoryCalendar, NewEvent};
    use crate::clock::ManualClock;
    use crate::limits::{HOUR_MS as H, MINUTE_MS as M};
    use async_trait::async_trait;

    const DAY0: Ms = 1_893_456_000_000;
    const TTL: Ms = 5 * M;
    const SHARED: &str = "clinic@example.com";

    fn slot(from_h: Ms, to_h: Ms) -> Span {
        Span::new(DAY0 + from_h * H, DAY0 + to_h * H)
    }

    fn customer() -> Customer {
        Customer {
            name: "Ana".into(),
            phone: "+5511999990000".into(),
        }
    }

    async fn open_store(name: &str) -> Arc<Store> {
        let dir = std::env::temp_dir().join("slotguard_test_orchestrator");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let store = Arc::new(Store::open(path).unwrap());
        store
            .register_tenant(Tenant {
                id: 1,
                name: "Clinic".into(),
                shared_calendar: SHARED.into(),
            })
            .await
            .unwrap();
        store
            .register_resource(Resource {
                id: 7,
                tenant_id: 1,
                name: "Dr. Smith".into(),
                external_calendar_ref: None,
            })
            .await
            .unwrap();
        store
    }

    async fn setup(name: &str) -> (Orchestrator, Arc<MemoryCalendar>, Arc<ManualClock>) {
        let store = open_store(name).await;
        let calendar = Arc::new(MemoryCalendar::new());
        let clock = Arc::new(ManualClock::new(DAY0));
        let orch = Orchestrator::new(store, calendar.clone(), clock.clone(), TTL);
        (orch, calendar, clock)
    }

    #[tokio::test]
    async fn reserve_confirm_cancel() {
        let (orch, calendar, _clock) = setup("happy_path.wal").await;
        let b = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();
        assert_eq!(b.status, BookingStatus::Pending);
        assert_eq!(b.expires_at, Some(DAY0 + TTL));
        assert!(!orch.is_free(1, 7, slot(9, 10)).await.unwrap());

        let confirmed = orch.confirm(1, b.id).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.external_event_ref.is_some());
        assert_eq!(calendar.events(SHARED).len(), 1);

        let cancelled = orch.cancel(1, b.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(calendar.events(SHARED).is_empty());
        assert!(orch.is_free(1, 7, slot(9, 10)).await.unwrap());
    }

    #[tokio::test]
    async fn reserve_rejects_inverted_span() {
        let (orch, _calendar, _clock) = setup("inverted.wal").await;
        let span = Span {
            start: DAY0 + H,
            end: DAY0,
        };
        assert!(matches!(
            orch.reserve(1, 7, span, customer()).await,
            Err(BookingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn reserve_blocked_by_calendar_event() {
        let (orch, calendar, _clock) = setup("blocked_external.wal").await;
        calendar.insert_event(
            SHARED,
            CalendarEvent {
                id: "holiday".into(),
                summary: Some("Closed".into()),
                span: slot(0, 24),
                description: None,
            },
        );
        assert_eq!(
            orch.reserve(1, 7, slot(9, 10), customer()).await,
            Err(BookingError::SlotUnavailable(7))
        );
    }

    #[tokio::test]
    async fn lapsed_hold_confirm_expires_and_cancels() {
        let (orch, calendar, clock) = setup("lapsed_confirm.wal").await;
        let b = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();
        clock.advance(TTL);

        assert!(orch.is_free(1, 7, slot(9, 10)).await.unwrap());
        assert_eq!(orch.confirm(1, b.id).await, Err(BookingError::Expired(b.id)));
        assert_eq!(orch.get(1, b.id).await.unwrap().status, BookingStatus::Cancelled);
        assert_eq!(calendar.created_count(), 0);
    }

    #[tokio::test]
    async fn projection_failure_still_confirms() {
        let (orch, calendar, _clock) = setup("projection_fail.wal").await;
        let b = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();
        calendar.set_fail_writes(true);

        let confirmed = orch.confirm(1, b.id).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.external_event_ref, None);

        // No event to delete on cancel.
        orch.cancel(1, b.id).await.unwrap();
        assert_eq!(calendar.deleted_count(), 0);
    }

    #[tokio::test]
    async fn confirm_cancelled_is_invalid_state() {
        let (orch, _calendar, _clock) = setup("confirm_cancelled.wal").await;
        let b = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();
        orch.cancel(1, b.id).await.unwrap();
        assert_eq!(
            orch.confirm(1, b.id).await,
            Err(BookingError::InvalidState {
                id: b.id,
                status: BookingStatus::Cancelled
            })
        );
    }

    #[tokio::test]
    async fn foreign_tenant_cannot_touch_booking() {
        let (orch, calendar, _clock) = setup("foreign_tenant.wal").await;
        orch.store()
            .register_tenant(Tenant {
                id: 2,
                name: "Other clinic".into(),
                shared_calendar: "other@example.com".into(),
            })
            .await
            .unwrap();
        let b = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();

        let not_found = Err(BookingError::BookingNotFound(b.id));
        assert_eq!(orch.get(2, b.id).await, not_found);
        assert_eq!(orch.confirm(2, b.id).await, not_found);
        assert_eq!(orch.cancel(2, b.id).await, not_found);

        assert_eq!(calendar.created_count(), 0);
        assert_eq!(orch.get(1, b.id).await.unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn sweep_cancels_only_lapsed_holds() {
        let (orch, _calendar, clock) = setup("sweep.wal").await;
        let stale = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();
        let kept = orch.reserve(1, 7, slot(10, 11), customer()).await.unwrap();
        orch.confirm(1, kept.id).await.unwrap();

        assert_eq!(orch.sweep_expired().await, 0);
        clock.advance(TTL);
        assert_eq!(orch.sweep_expired().await, 1);
        assert_eq!(orch.sweep_expired().await, 0);
        assert_eq!(orch.get(1, stale.id).await.unwrap().status, BookingStatus::Cancelled);
        assert_eq!(orch.get(1, kept.id).await.unwrap().status, BookingStatus::Confirmed);
    }

    /// Cancels the booking through the store while its event is being
    /// created, as a concurrent `cancel` would.
    struct CancelDuringCreate {
        inner: MemoryCalendar,
        store: Arc<Store>,
        target: parking_lot::Mutex<Option<BookingId>>,
    }

    #[async_trait]
    impl CalendarProvider for CancelDuringCreate {
        async fn list_events(&self, calendar_ref: &str, window: Span) -> Result<Vec<CalendarEvent>, CalendarError> {
            self.inner.list_events(calendar_ref, window).await
        }

        async fn create_event(&self, calendar_ref: &str, event: NewEvent) -> Result<String, CalendarError> {
            let id = self.inner.create_event(calendar_ref, event).await?;
            let target = self.target.lock().take();
            if let Some(booking_id) = target {
                self.store.mark_cancelled(booking_id).await.unwrap();
            }
            Ok(id)
        }

        async fn delete_event(&self, calendar_ref: &str, event_id: &str) -> Result<(), CalendarError> {
            self.inner.delete_event(calendar_ref, event_id).await
        }
    }

    #[tokio::test]
    async fn confirm_losing_to_cancel_removes_its_event() {
        let store = open_store("confirm_race.wal").await;
        let calendar = Arc::new(CancelDuringCreate {
            inner: MemoryCalendar::new(),
            store: store.clone(),
            target: parking_lot::Mutex::new(None),
        });
        let orch = Orchestrator::new(store, calendar.clone(), Arc::new(ManualClock::new(DAY0)), TTL);

        let b = orch.reserve(1, 7, slot(9, 10), customer()).await.unwrap();
        *calendar.target.lock() = Some(b.id);

        assert_eq!(
            orch.confirm(1, b.id).await,
            Err(BookingError::InvalidState {
                id: b.id,
                status: BookingStatus::Cancelled
            })
        );
        assert_eq!(calendar.inner.created_count(), 1);
        assert!(calendar.inner.events(SHARED).is_empty());
    }
}
