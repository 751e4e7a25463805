use std::sync::Arc;

use crate::error::BookingError;
use crate::model::*;
use crate::store::{Store, Transition};

/// Booking-row operations over the local store. Every method is one atomic
/// single-row write or a read.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<Store>,
}

impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn insert_pending(&self, booking: Booking, now: Ms) -> Result<Booking, BookingError> {
        let booking = self.store.insert_pending(booking, now).await?;
        tracing::info!(
            booking_id = %booking.id,
            resource_id = booking.resource_id,
            expires_at = booking.expires_at,
            "hold placed"
        );
        Ok(booking)
    }

    pub async fn get(&self, id: BookingId) -> Result<Booking, BookingError> {
        self.store
            .get(&id)
            .await
            .ok_or(BookingError::BookingNotFound(id))
    }

    pub async fn mark_confirmed(
        &self,
        id: BookingId,
        external_event_ref: Option<String>,
        now: Ms,
    ) -> Result<Transition, BookingError> {
        let transition = self.store.mark_confirmed(id, external_event_ref, now).await?;
        if transition.was_applied() {
            tracing::info!(
                booking_id = %id,
                external_event_ref = transition.booking().external_event_ref.as_deref(),
                "booking confirmed"
            );
        }
        Ok(transition)
    }

    pub async fn mark_cancelled(&self, id: BookingId) -> Result<Transition, BookingError> {
        let transition = self.store.mark_cancelled(id).await?;
        if transition.was_applied() {
            tracing::info!(booking_id = %id, "booking cancelled");
        }
        Ok(transition)
    }

    /// Rewrite a lapsed hold to cancelled. No-op if it was confirmed,
    /// cancelled, or is still live at `now`.
    pub async fn cancel_lapsed(&self, id: BookingId, now: Ms) -> Result<Transition, BookingError> {
        let transition = self.store.cancel_lapsed(id, now).await?;
        if transition.was_applied() {
            tracing::info!(booking_id = %id, "lapsed hold cancelled");
        }
        Ok(transition)
    }

    pub async fn list(&self, filter: &BookingFilter, now: Ms) -> Vec<Booking> {
        self.store.list(filter, now).await
    }

    pub async fn stale_pending(&self, now: Ms) -> Vec<BookingId> {
        self.store.lapsed_holds(now).await
    }
}
