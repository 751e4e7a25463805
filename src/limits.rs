use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Default soft-hold lifetime of a pending booking.
pub const DEFAULT_HOLD_TTL_MS: Ms = 5 * MINUTE_MS;

/// Default number of inbound notification ids remembered by the dedup gate.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_CALENDAR_REF_LEN: usize = 512;
/// Live (not cancelled, not lapsed, not yet ended) rows allowed per resource.
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;
/// Cancelled and lapsed rows are dropped at compaction once their span
/// ended this long ago.
pub const BOOKING_RETENTION_MS: Ms = 30 * DAY_MS;
pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_TENANTS: usize = 1_000;
