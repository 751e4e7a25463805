use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};

use crate::error::BookingError;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_calendar_ref, validate_customer, validate_name, validate_span};
use super::{Store, Transition, WalCommand};

impl Store {
    /// Register a tenant. Re-registering the identical record is a no-op.
    pub async fn register_tenant(&self, tenant: Tenant) -> Result<Tenant, BookingError> {
        validate_name(&tenant.name)?;
        validate_calendar_ref(&tenant.shared_calendar)?;
        if tenant.shared_calendar.trim().is_empty() {
            return Err(BookingError::InvalidInput("shared calendar is required"));
        }

        let _registry = self.registry.lock().await;
        if let Some(existing) = self.tenants.get(&tenant.id) {
            return if *existing == tenant {
                Ok(tenant)
            } else {
                Err(BookingError::AlreadyExists {
                    kind: "tenant",
                    id: tenant.id,
                })
            };
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(BookingError::LimitExceeded("too many tenants"));
        }

        let _gate = self.commit_gate.read().await;
        self.wal_append(&Event::TenantRegistered {
            tenant: tenant.clone(),
        })
        .await?;
        self.tenants.insert(tenant.id, tenant.clone());
        tracing::info!(tenant_id = tenant.id, "tenant registered");
        Ok(tenant)
    }

    /// Register a resource under an existing tenant. Resources are immutable:
    /// re-registering the identical record is a no-op, anything else is rejected.
    pub async fn register_resource(&self, resource: Resource) -> Result<Resource, BookingError> {
        validate_name(&resource.name)?;
        if let Some(ref r) = resource.external_calendar_ref {
            validate_calendar_ref(r)?;
        }
        if !self.tenants.contains_key(&resource.tenant_id) {
            return Err(BookingError::TenantNotFound(resource.tenant_id));
        }

        let _registry = self.registry.lock().await;
        if let Some(existing) = self.rows(&resource.id) {
            let guard = existing.read().await;
            return if guard.resource == resource {
                Ok(resource)
            } else {
                Err(BookingError::AlreadyExists {
                    kind: "resource",
                    id: resource.id,
                })
            };
        }
        if self.resources.len() >= MAX_RESOURCES {
            return Err(BookingError::LimitExceeded("too many resources"));
        }

        let _gate = self.commit_gate.read().await;
        self.wal_append(&Event::ResourceRegistered {
            resource: resource.clone(),
        })
        .await?;
        self.resources.insert(
            resource.id,
            Arc::new(RwLock::new(ResourceRows::new(resource.clone()))),
        );
        tracing::info!(
            resource_id = resource.id,
            tenant_id = resource.tenant_id,
            dedicated_calendar = resource.external_calendar_ref.is_some(),
            "resource registered"
        );
        Ok(resource)
    }

    /// Insert a pending row. Fails with `Conflict` if an active row on the
    /// same resource overlaps its span at `now`.
    pub async fn insert_pending(&self, booking: Booking, now: Ms) -> Result<Booking, BookingError> {
        validate_span(&booking.span)?;
        validate_customer(&booking.customer)?;
        if booking.status != BookingStatus::Pending || booking.expires_at.is_none() {
            return Err(BookingError::InvalidInput("only pending bookings with a deadline can be inserted"));
        }
        if self.booking_index.contains_key(&booking.id) {
            return Err(BookingError::InvalidInput("booking id already used"));
        }
        let rows = self
            .rows(&booking.resource_id)
            .ok_or(BookingError::ResourceNotFound(booking.resource_id))?;

        let _gate = self.commit_gate.read().await;
        let mut guard = rows.write().await;
        if guard.resource.tenant_id != booking.tenant_id {
            return Err(BookingError::ResourceNotFound(booking.resource_id));
        }
        if guard.live_count(now) >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(BookingError::LimitExceeded("too many bookings on resource"));
        }

        check_no_overlap(&guard, &booking.span, now)?;

        let event = Event::BookingPlaced {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Pending → confirmed, re-validated under the row lock.
    ///
    /// Already confirmed is `Unchanged`. Cancelled is `InvalidState`. A lapsed
    /// hold is `Expired` and is left for the caller to cancel.
    pub async fn mark_confirmed(
        &self,
        id: BookingId,
        external_event_ref: Option<String>,
        now: Ms,
    ) -> Result<Transition, BookingError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(&id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(id))?;

        match current.status {
            BookingStatus::Confirmed => return Ok(Transition::Unchanged(current)),
            BookingStatus::Cancelled | BookingStatus::Expired => {
                return Err(BookingError::InvalidState {
                    id,
                    status: current.status,
                });
            }
            BookingStatus::Pending if current.is_lapsed(now) => {
                return Err(BookingError::Expired(id));
            }
            BookingStatus::Pending => {}
        }

        let event = Event::BookingConfirmed {
            id,
            resource_id: current.resource_id,
            external_event_ref,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .booking(&id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(id))?;
        Ok(Transition::Applied(updated))
    }

    /// Any non-cancelled state → cancelled. Already cancelled is `Unchanged`.
    pub async fn mark_cancelled(&self, id: BookingId) -> Result<Transition, BookingError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(&id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(id))?;
        if current.status == BookingStatus::Cancelled {
            return Ok(Transition::Unchanged(current));
        }

        let event = Event::BookingCancelled {
            id,
            resource_id: current.resource_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .booking(&id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(id))?;
        Ok(Transition::Applied(updated))
    }

    /// Cancel `id` only if it is still a lapsed hold at `now`; anything else
    /// is `Unchanged`.
    pub async fn cancel_lapsed(&self, id: BookingId, now: Ms) -> Result<Transition, BookingError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(&id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(id))?;
        if !current.is_lapsed(now) {
            return Ok(Transition::Unchanged(current));
        }

        let event = Event::BookingCancelled {
            id,
            resource_id: current.resource_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .booking(&id)
            .cloned()
            .ok_or(BookingError::BookingNotFound(id))?;
        Ok(Transition::Applied(updated))
    }

    /// Rewrite the WAL with the minimal record set for the current state.
    ///
    /// Cancelled and lapsed rows whose span ended more than
    /// `BOOKING_RETENTION_MS` before `now` are dropped from memory and from
    /// the rewritten log.
    pub async fn compact(&self, now: Ms) -> Result<(), BookingError> {
        let _gate = self.commit_gate.write().await;
        let cutoff = now.saturating_sub(BOOKING_RETENTION_MS);

        let mut events: Vec<Event> = self
            .tenants
            .iter()
            .map(|t| Event::TenantRegistered {
                tenant: t.value().clone(),
            })
            .collect();

        let mut pruned = 0usize;
        let all_rows: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        for rows in all_rows {
            let mut guard = rows.write().await;
            let removed = guard.remove_where(|b| !b.is_active(now) && b.span.end <= cutoff);
            for id in &removed {
                self.booking_index.remove(id);
            }
            pruned += removed.len();

            events.push(Event::ResourceRegistered {
                resource: guard.resource.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingPlaced {
                    booking: booking.clone(),
                });
            }
        }

        let record_count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::Storage(e.to_string()))?;
        tracing::info!(records = record_count, pruned, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
