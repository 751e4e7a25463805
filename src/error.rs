use crate::model::{BookingId, BookingStatus, ResourceId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The resolver found the interval occupied, locally or on the calendar.
    SlotUnavailable(ResourceId),
    /// The store's no-overlap guard rejected an insert that raced the resolver.
    Conflict(BookingId),
    BookingNotFound(BookingId),
    ResourceNotFound(ResourceId),
    TenantNotFound(TenantId),
    InvalidState {
        id: BookingId,
        status: BookingStatus,
    },
    /// The hold lapsed before confirm; the booking has been cancelled.
    Expired(BookingId),
    AlreadyExists {
        kind: &'static str,
        id: u64,
    },
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    Storage(String),
}

impl BookingError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::SlotUnavailable(_) => "slot_unavailable",
            BookingError::Conflict(_) => "conflict",
            BookingError::BookingNotFound(_) => "booking_not_found",
            BookingError::ResourceNotFound(_) => "resource_not_found",
            BookingError::TenantNotFound(_) => "tenant_not_found",
            BookingError::InvalidState { .. } => "invalid_state",
            BookingError::Expired(_) => "expired",
            BookingError::AlreadyExists { .. } => "already_exists",
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::Storage(_) => "storage",
        }
    }

    /// Someone else holds the slot. Callers treat both variants alike.
    pub fn is_slot_taken(&self) -> bool {
        matches!(self, BookingError::SlotUnavailable(_) | BookingError::Conflict(_))
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::SlotUnavailable(rid) => {
                write!(f, "slot unavailable on resource {rid}")
            }
            BookingError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            BookingError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            BookingError::TenantNotFound(id) => write!(f, "tenant not found: {id}"),
            BookingError::InvalidState { id, status } => {
                write!(f, "booking {id} is {status}")
            }
            BookingError::Expired(id) => write!(f, "hold expired for booking: {id}"),
            BookingError::AlreadyExists { kind, id } => write!(f, "{kind} already exists: {id}"),
            BookingError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}
