use std::sync::Arc;

use crate::calendar::{CalendarError, CalendarProvider, CalendarTarget, NewEvent, RESOURCE_TAG_MARKER, tag_description};
use crate::model::*;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The booking's tenant or resource is no longer known locally.
    MissingContext(String),
    Calendar(CalendarError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::MissingContext(e) => write!(f, "cannot resolve calendar: {e}"),
            SyncError::Calendar(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<CalendarError> for SyncError {
    fn from(e: CalendarError) -> Self {
        SyncError::Calendar(e)
    }
}

/// Customer-supplied text must never carry something that reads as a tag.
///
/// Matches the marker case-sensitively, exactly as `parse_tag` does. If the
/// parser ever accepts other spellings, this must strip them too.
fn scrub(text: &str) -> String {
    text.replace(RESOURCE_TAG_MARKER, "ResourceID")
}

/// Projects confirmed bookings into the external calendar and removes them
/// again. Failures are logged and counted here; callers decide what to do
/// with the `Err`, and the local store is never rolled back because of one.
pub struct Synchronizer {
    store: Arc<Store>,
    calendar: Arc<dyn CalendarProvider>,
}

impl Synchronizer {
    pub fn new(store: Arc<Store>, calendar: Arc<dyn CalendarProvider>) -> Self {
        Self { store, calendar }
    }

    async fn target_for(&self, booking: &Booking) -> Result<(Resource, CalendarTarget), SyncError> {
        let tenant = self
            .store
            .tenant(&booking.tenant_id)
            .ok_or_else(|| SyncError::MissingContext(format!("tenant {}", booking.tenant_id)))?;
        let resource = self
            .store
            .resource(&booking.resource_id)
            .await
            .ok_or_else(|| SyncError::MissingContext(format!("resource {}", booking.resource_id)))?;
        let target = CalendarTarget::resolve(&resource, &tenant);
        Ok((resource, target))
    }

    fn event_for(resource: &Resource, booking: &Booking) -> NewEvent {
        let customer_name = scrub(&booking.customer.name);
        let details = format!(
            "Customer: {}\nPhone: {}\nBooking: {}",
            customer_name,
            scrub(&booking.customer.phone),
            booking.id
        );
        NewEvent {
            summary: format!("{} - {}", scrub(&resource.name), customer_name),
            description: tag_description(&details, booking.resource_id),
            span: booking.span,
        }
    }

    /// Create the calendar event for a booking; returns the provider's event id.
    pub async fn project_confirmed(&self, booking: &Booking) -> Result<String, SyncError> {
        let result = async {
            let (resource, target) = self.target_for(booking).await?;
            let event = Self::event_for(&resource, booking);
            let event_id = self.calendar.create_event(target.calendar_ref(), event).await?;
            Ok::<_, SyncError>((target, event_id))
        }
        .await;

        match result {
            Ok((target, event_id)) => {
                tracing::info!(
                    booking_id = %booking.id,
                    calendar_ref = target.calendar_ref(),
                    event_id = %event_id,
                    "booking projected to calendar"
                );
                Ok(event_id)
            }
            Err(e) => {
                tracing::error!(booking_id = %booking.id, "calendar projection failed: {e}");
                metrics::counter!(crate::observability::SYNC_FAILURES_TOTAL, "op" => "project").increment(1);
                Err(e)
            }
        }
    }

    /// Delete the booking's calendar event, if it has one.
    pub async fn remove(&self, booking: &Booking) -> Result<(), SyncError> {
        let Some(event_id) = booking.external_event_ref.as_deref() else {
            return Ok(());
        };
        self.remove_event(booking, event_id).await
    }

    /// Delete a specific event projected for `booking`.
    pub async fn remove_event(&self, booking: &Booking, event_id: &str) -> Result<(), SyncError> {
        let result = async {
            let (_, target) = self.target_for(booking).await?;
            self.calendar.delete_event(target.calendar_ref(), event_id).await?;
            Ok::<_, SyncError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(booking_id = %booking.id, event_id, "calendar event removed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(booking_id = %booking.id, event_id, "calendar removal failed: {e}");
                metrics::counter!(crate::observability::SYNC_FAILURES_TOTAL, "op" => "remove").increment(1);
                Err(e)
            }
        }
    }
}
