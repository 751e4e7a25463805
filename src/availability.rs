use std::sync::Arc;

use crate::calendar::{CalendarEvent, CalendarProvider, CalendarTarget, Tag, parse_tag};
use crate::clock::Clock;
use crate::error::BookingError;
use crate::model::*;
use crate::store::Store;

/// Why a slot is or isn't free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Free,
    /// An active local booking overlaps.
    BlockedLocally(BookingId),
    /// An external calendar event overlaps and belongs to (or may belong to) this resource.
    BlockedExternally(String),
}

impl Verdict {
    pub fn is_free(&self) -> bool {
        matches!(self, Verdict::Free)
    }
}

/// First overlapping row that still claims its span at `now`.
pub fn local_blocker(overlapping: &[Booking], now: Ms) -> Option<&Booking> {
    overlapping.iter().find(|b| b.is_active(now))
}

/// Whether an external event blocks `resource_id` over `span`.
///
/// On a dedicated calendar every overlapping event blocks. On a shared
/// calendar an event blocks when it is untagged (a global block), tagged for
/// this resource, or carries a tag that cannot be read.
pub fn external_blocks(target: &CalendarTarget, event: &CalendarEvent, resource_id: ResourceId, span: &Span) -> bool {
    // Providers may return boundary-touching events; intervals are half-open.
    if !event.span.overlaps(span) {
        return false;
    }
    match target {
        CalendarTarget::Dedicated(_) => true,
        CalendarTarget::Shared(_) => match parse_tag(event.description.as_deref()) {
            Tag::Untagged | Tag::Malformed => true,
            Tag::Resource(owner) => owner == resource_id,
        },
    }
}

/// Answers "is this resource free over this span" from local rows first,
/// then the resource's external calendar.
pub struct Resolver {
    store: Arc<Store>,
    calendar: Arc<dyn CalendarProvider>,
    clock: Arc<dyn Clock>,
}

impl Resolver {
    pub fn new(store: Arc<Store>, calendar: Arc<dyn CalendarProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { store, calendar, clock }
    }

    pub async fn is_free(&self, tenant_id: TenantId, resource_id: ResourceId, span: Span) -> Result<bool, BookingError> {
        Ok(self.check(tenant_id, resource_id, span).await?.is_free())
    }

    /// Local rows are authoritative and short-circuit. A calendar outage
    /// degrades to the local verdict.
    pub async fn check(&self, tenant_id: TenantId, resource_id: ResourceId, span: Span) -> Result<Verdict, BookingError> {
        let tenant = self
            .store
            .tenant(&tenant_id)
            .ok_or(BookingError::TenantNotFound(tenant_id))?;

        // Read guard is released inside `overlapping`; nothing is held across
        // the calendar call below.
        let (resource, rows) = self.store.overlapping(&resource_id, &span).await?;
        if resource.tenant_id != tenant_id {
            return Err(BookingError::ResourceNotFound(resource_id));
        }

        let now = self.clock.now_ms();
        if let Some(existing) = local_blocker(&rows, now) {
            tracing::debug!(resource_id, booking_id = %existing.id, "slot held locally");
            return Ok(Verdict::BlockedLocally(existing.id));
        }

        let target = CalendarTarget::resolve(&resource, &tenant);
        let events = match self.calendar.list_events(target.calendar_ref(), span).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    resource_id,
                    calendar_ref = target.calendar_ref(),
                    "calendar read failed, using local availability only: {e}"
                );
                metrics::counter!(crate::observability::CALENDAR_READ_FAILURES_TOTAL).increment(1);
                return Ok(Verdict::Free);
            }
        };

        match events
            .iter()
            .find(|e| external_blocks(&target, e, resource_id, &span))
        {
            Some(event) => {
                tracing::debug!(
                    resource_id,
                    event_id = %event.id,
                    shared = target.is_shared(),
                    "slot blocked by calendar event"
                );
                Ok(Verdict::BlockedExternally(event.id.clone()))
            }
            None => Ok(Verdict::Free),
        }
    }
}
