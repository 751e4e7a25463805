//! External calendar boundary: the provider trait, its implementations, and
//! the rules for which calendar a resource's bookings live on.

pub mod google;
pub mod memory;
pub mod tag;

pub use google::GoogleCalendar;
pub use memory::MemoryCalendar;
pub use tag::{RESOURCE_TAG_MARKER, Tag, parse_tag, tag_description};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Resource, Span, Tenant};

/// An event as read back from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub span: Span,
    pub description: Option<String>,
}

/// An event to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
    /// Provider switched off (failure injection, missing client).
    Unavailable(String),
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::Transport(e) => write!(f, "calendar request failed: {e}"),
            CalendarError::Status { status, body } => {
                write!(f, "calendar API error ({status}): {body}")
            }
            CalendarError::Decode(e) => write!(f, "calendar response not understood: {e}"),
            CalendarError::Unavailable(e) => write!(f, "calendar unavailable: {e}"),
        }
    }
}

impl std::error::Error for CalendarError {}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events overlapping `window` on `calendar_ref`.
    async fn list_events(&self, calendar_ref: &str, window: Span) -> Result<Vec<CalendarEvent>, CalendarError>;

    /// Create an event, returning the provider's event id.
    async fn create_event(&self, calendar_ref: &str, event: NewEvent) -> Result<String, CalendarError>;

    /// Delete an event. Deleting an event that is already gone succeeds.
    async fn delete_event(&self, calendar_ref: &str, event_id: &str) -> Result<(), CalendarError>;
}

/// Which calendar a resource's bookings are projected to and checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarTarget {
    /// The resource owns the calendar; every event on it is the resource's.
    Dedicated(String),
    /// The tenant's calendar, shared by resources and told apart by tags.
    Shared(String),
}

impl CalendarTarget {
    pub fn resolve(resource: &Resource, tenant: &Tenant) -> Self {
        match resource.external_calendar_ref.as_deref() {
            Some(r) if is_calendar_ref(r) => CalendarTarget::Dedicated(r.to_string()),
            _ => CalendarTarget::Shared(tenant.shared_calendar.clone()),
        }
    }

    pub fn calendar_ref(&self) -> &str {
        match self {
            CalendarTarget::Dedicated(r) | CalendarTarget::Shared(r) => r,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, CalendarTarget::Shared(_))
    }
}

/// Whether `candidate` has the shape of a calendar id: `primary`, or
/// `local@domain.tld` with no whitespace.
pub fn is_calendar_ref(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
        return false;
    }
    if candidate == "primary" {
        return true;
    }
    match candidate.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && domain.split('.').all(|label| !label.is_empty())
        }
        None => false,
    }
}
