use crate::error::BookingError;
use crate::limits::*;
use crate::model::*;

pub(crate) fn validate_span(span: &Span) -> Result<(), BookingError> {
    if span.start >= span.end {
        return Err(BookingError::InvalidInput("span must end after it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), BookingError> {
    if name.len() > MAX_NAME_LEN {
        return Err(BookingError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_customer(customer: &Customer) -> Result<(), BookingError> {
    validate_name(&customer.name)?;
    if customer.phone.trim().is_empty() {
        return Err(BookingError::InvalidInput("customer phone is required"));
    }
    if customer.phone.len() > MAX_PHONE_LEN {
        return Err(BookingError::LimitExceeded("customer phone too long"));
    }
    Ok(())
}

pub(crate) fn validate_calendar_ref(calendar_ref: &str) -> Result<(), BookingError> {
    if calendar_ref.len() > MAX_CALENDAR_REF_LEN {
        return Err(BookingError::LimitExceeded("calendar reference too long"));
    }
    Ok(())
}

/// The no-overlap guard: any row still claiming part of `span` at `now`
/// rejects the insert. Lapsed holds and cancelled rows are ignored.
pub(super) fn check_no_overlap(rows: &ResourceRows, span: &Span, now: Ms) -> Result<(), BookingError> {
    match rows.first_active_overlap(span, now) {
        Some(existing) => Err(BookingError::Conflict(existing.id)),
        None => Ok(()),
    }
}
