//! Line-oriented JSON operator protocol: one request object in, one response
//! object out.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dedup::DedupGate;
use crate::error::BookingError;
use crate::inbound;
use crate::model::*;
use crate::observability::COMMAND_DURATION_SECONDS;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterTenant {
        id: TenantId,
        name: String,
        shared_calendar: String,
    },
    RegisterResource {
        id: ResourceId,
        tenant_id: TenantId,
        name: String,
        #[serde(default)]
        calendar: Option<String>,
    },
    Seen {
        id: String,
    },
    Webhook {
        payload: Value,
    },
    IsFree {
        tenant_id: TenantId,
        resource_id: ResourceId,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },
    Reserve {
        tenant_id: TenantId,
        resource_id: ResourceId,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        customer_name: String,
        customer_phone: String,
    },
    Confirm {
        tenant_id: TenantId,
        booking_id: BookingId,
    },
    Cancel {
        tenant_id: TenantId,
        booking_id: BookingId,
    },
    Get {
        tenant_id: TenantId,
        booking_id: BookingId,
    },
    List {
        #[serde(default)]
        tenant_id: Option<TenantId>,
        #[serde(default)]
        resource_id: Option<ResourceId>,
        #[serde(default)]
        status: Option<BookingStatus>,
        #[serde(default)]
        start: Option<DateTime<FixedOffset>>,
        #[serde(default)]
        end: Option<DateTime<FixedOffset>>,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Request::RegisterTenant { .. } => "register_tenant",
            Request::RegisterResource { .. } => "register_resource",
            Request::Seen { .. } => "seen",
            Request::Webhook { .. } => "webhook",
            Request::IsFree { .. } => "is_free",
            Request::Reserve { .. } => "reserve",
            Request::Confirm { .. } => "confirm",
            Request::Cancel { .. } => "cancel",
            Request::Get { .. } => "get",
            Request::List { .. } => "list",
        }
    }
}

/// Booking as rendered to operators: RFC 3339 times, effective status.
#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: String,
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub status: BookingStatus,
    pub start: String,
    pub end: String,
    pub expires_at: Option<String>,
    pub external_event_ref: Option<String>,
    pub customer: Customer,
}

impl BookingView {
    pub fn new(booking: &Booking, now: Ms) -> Self {
        Self {
            id: booking.id.to_string(),
            tenant_id: booking.tenant_id,
            resource_id: booking.resource_id,
            status: booking.effective_status(now),
            start: rfc3339(booking.span.start),
            end: rfc3339(booking.span.end),
            expires_at: booking
                .expires_at
                .filter(|_| booking.status == BookingStatus::Pending)
                .map(rfc3339),
            external_event_ref: booking.external_event_ref.clone(),
            customer: booking.customer.clone(),
        }
    }
}

fn rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| ms.to_string())
}

fn span(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Span, BookingError> {
    Span::checked(start.timestamp_millis(), end.timestamp_millis())
        .ok_or(BookingError::InvalidInput("start must be before end"))
}

pub fn error_response(code: &str, message: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": code, "message": message.to_string() })
}

pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    gate: Arc<DedupGate>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, gate: Arc<DedupGate>) -> Self {
        Self { orchestrator, gate }
    }

    /// Parse and execute one request line. Never fails; errors become
    /// `{"ok":false,...}` responses.
    pub async fn handle_line(&self, line: &str) -> Value {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return error_response("bad_request", e),
        };
        let label = request.label();
        let started = Instant::now();
        let response = match self.execute(request).await {
            Ok(mut body) => {
                body["ok"] = Value::Bool(true);
                body
            }
            Err(e) => {
                tracing::debug!(command = label, code = e.code(), "command failed: {e}");
                error_response(e.code(), e)
            }
        };
        metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        response
    }

    pub async fn execute(&self, request: Request) -> Result<Value, BookingError> {
        let orch = &self.orchestrator;
        match request {
            Request::RegisterTenant {
                id,
                name,
                shared_calendar,
            } => {
                let tenant = orch
                    .store()
                    .register_tenant(Tenant {
                        id,
                        name,
                        shared_calendar,
                    })
                    .await?;
                Ok(json!({ "tenant": tenant }))
            }
            Request::RegisterResource {
                id,
                tenant_id,
                name,
                calendar,
            } => {
                let resource = orch
                    .store()
                    .register_resource(Resource {
                        id,
                        tenant_id,
                        name,
                        external_calendar_ref: calendar,
                    })
                    .await?;
                Ok(json!({ "resource": resource }))
            }
            Request::Seen { id } => Ok(json!({ "seen": self.gate.seen(&id) })),
            Request::Webhook { payload } => {
                let admitted = inbound::admit(&self.gate, &payload).map_err(|e| {
                    tracing::warn!("rejecting webhook payload: {e}");
                    BookingError::InvalidInput("malformed webhook payload")
                })?;
                Ok(json!({ "messages": admitted }))
            }
            Request::IsFree {
                tenant_id,
                resource_id,
                start,
                end,
            } => {
                let free = orch.is_free(tenant_id, resource_id, span(start, end)?).await?;
                Ok(json!({ "free": free }))
            }
            Request::Reserve {
                tenant_id,
                resource_id,
                start,
                end,
                customer_name,
                customer_phone,
            } => {
                let customer = Customer {
                    name: customer_name,
                    phone: customer_phone,
                };
                let booking = orch
                    .reserve(tenant_id, resource_id, span(start, end)?, customer)
                    .await?;
                Ok(self.booking_body(&booking))
            }
            Request::Confirm { tenant_id, booking_id } => {
                let booking = orch.confirm(tenant_id, booking_id).await?;
                Ok(self.booking_body(&booking))
            }
            Request::Cancel { tenant_id, booking_id } => {
                let booking = orch.cancel(tenant_id, booking_id).await?;
                Ok(self.booking_body(&booking))
            }
            Request::Get { tenant_id, booking_id } => {
                let booking = orch.get(tenant_id, booking_id).await?;
                Ok(self.booking_body(&booking))
            }
            Request::List {
                tenant_id,
                resource_id,
                status,
                start,
                end,
            } => {
                let window = match (start, end) {
                    (Some(s), Some(e)) => Some(span(s, e)?),
                    (None, None) => None,
                    _ => return Err(BookingError::InvalidInput("list window needs both start and end")),
                };
                let filter = BookingFilter {
                    tenant_id,
                    resource_id,
                    status,
                    window,
                };
                let now = orch.now();
                let bookings: Vec<_> = orch
                    .list(&filter)
                    .await
                    .iter()
                    .map(|b| BookingView::new(b, now))
                    .collect();
                Ok(json!({ "bookings": bookings }))
            }
        }
    }

    fn booking_body(&self, booking: &Booking) -> Value {
        json!({ "booking": BookingView::new(booking, self.orchestrator.now()) })
    }
}
