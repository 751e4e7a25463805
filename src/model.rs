use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type inside the engine.
pub type Ms = i64;

pub type TenantId = u64;
pub type ResourceId = u64;
pub type BookingId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but rejects empty or inverted input instead of asserting.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Calendar shared by every resource without a dedicated one.
    pub shared_calendar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Dedicated external calendar, if this looks like a calendar id.
    pub external_calendar_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    /// Never stored. Readers derive it from a pending row whose deadline passed.
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "expired" => Ok(BookingStatus::Expired),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub customer: Customer,
    pub span: Span,
    /// Stored status. Use `effective_status` for what a reader should see.
    pub status: BookingStatus,
    /// Hold deadline, only meaningful while pending.
    pub expires_at: Option<Ms>,
    /// Event id in the external calendar, once projected.
    pub external_event_ref: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn pending(
        tenant_id: TenantId,
        resource_id: ResourceId,
        customer: Customer,
        span: Span,
        now: Ms,
        hold_ttl_ms: Ms,
    ) -> Self {
        Self {
            id: Ulid::new(),
            tenant_id,
            resource_id,
            customer,
            span,
            status: BookingStatus::Pending,
            expires_at: Some(now + hold_ttl_ms),
            external_event_ref: None,
            created_at: now,
        }
    }

    /// Pending row whose hold deadline is at or before `now`.
    /// A pending row without a deadline never lapses.
    pub fn is_lapsed(&self, now: Ms) -> bool {
        self.status == BookingStatus::Pending && self.expires_at.is_some_and(|e| e <= now)
    }

    /// Whether this row still claims its span on the resource.
    pub fn is_active(&self, now: Ms) -> bool {
        match self.status {
            BookingStatus::Confirmed => true,
            BookingStatus::Pending => !self.is_lapsed(now),
            BookingStatus::Cancelled | BookingStatus::Expired => false,
        }
    }

    pub fn effective_status(&self, now: Ms) -> BookingStatus {
        if self.is_lapsed(now) {
            BookingStatus::Expired
        } else {
            self.status
        }
    }
}

/// Bookings of one resource, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ResourceRows {
    pub resource: Resource,
    pub bookings: Vec<Booking>,
    /// Booking id → span.start, for binary-search lookup by id.
    starts: HashMap<BookingId, Ms>,
}

impl ResourceRows {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            bookings: Vec::new(),
            starts: HashMap::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.starts.insert(booking.id, booking.span.start);
        self.bookings.insert(pos, booking);
    }

    fn position(&self, id: &BookingId) -> Option<usize> {
        let start = *self.starts.get(id)?;
        let from = self.bookings.partition_point(|b| b.span.start < start);
        self.bookings[from..]
            .iter()
            .take_while(|b| b.span.start == start)
            .position(|b| b.id == *id)
            .map(|offset| from + offset)
    }

    pub fn booking(&self, id: &BookingId) -> Option<&Booking> {
        self.position(id).map(|i| &self.bookings[i])
    }

    pub fn booking_mut(&mut self, id: &BookingId) -> Option<&mut Booking> {
        self.position(id).map(|i| &mut self.bookings[i])
    }

    /// Rows still claiming time at or after `now`. Counted against the
    /// per-resource limit; history does not count.
    pub fn live_count(&self, now: Ms) -> usize {
        self.bookings
            .iter()
            .filter(|b| b.span.end > now && b.is_active(now))
            .count()
    }

    /// Drop every row matching `prune`, returning the removed ids.
    pub fn remove_where(&mut self, prune: impl Fn(&Booking) -> bool) -> Vec<BookingId> {
        let mut removed = Vec::new();
        self.bookings.retain(|b| {
            if prune(b) {
                removed.push(b.id);
                false
            } else {
                true
            }
        });
        for id in &removed {
            self.starts.remove(id);
        }
        removed
    }

    /// Rows whose span overlaps the query window, whatever their status.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// First row still claiming part of `span` at `now`.
    pub fn first_active_overlap(&self, span: &Span, now: Ms) -> Option<&Booking> {
        self.overlapping(span).find(|b| b.is_active(now))
    }
}

/// WAL record format. Flat, one variant per single-row write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TenantRegistered {
        tenant: Tenant,
    },
    ResourceRegistered {
        resource: Resource,
    },
    BookingPlaced {
        booking: Booking,
    },
    BookingConfirmed {
        id: BookingId,
        resource_id: ResourceId,
        external_event_ref: Option<String>,
    },
    BookingCancelled {
        id: BookingId,
        resource_id: ResourceId,
    },
}

/// Listing filter. Status is matched against the effective status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub tenant_id: Option<TenantId>,
    pub resource_id: Option<ResourceId>,
    pub status: Option<BookingStatus>,
    pub window: Option<Span>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking, now: Ms) -> bool {
        self.tenant_id.is_none_or(|t| booking.tenant_id == t)
            && self.resource_id.is_none_or(|r| booking.resource_id == r)
            && self.status.is_none_or(|s| booking.effective_status(now) == s)
            && self.window.is_none_or(|w| booking.span.overlaps(&w))
    }
}
