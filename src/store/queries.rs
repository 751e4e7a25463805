use crate::error::BookingError;
use crate::model::*;

use super::Store;

impl Store {
    pub fn tenant(&self, id: &TenantId) -> Option<Tenant> {
        self.tenants.get(id).map(|e| e.value().clone())
    }

    pub async fn resource(&self, id: &ResourceId) -> Option<Resource> {
        let rows = self.rows(id)?;
        let guard = rows.read().await;
        Some(guard.resource.clone())
    }

    pub async fn get(&self, id: &BookingId) -> Option<Booking> {
        let resource_id = self.booking_index.get(id).map(|e| *e.value())?;
        let rows = self.rows(&resource_id)?;
        let guard = rows.read().await;
        guard.booking(id).cloned()
    }

    /// Every row on `resource_id` overlapping `span`, regardless of status,
    /// together with the resource itself (read under one lock).
    pub async fn overlapping(
        &self,
        resource_id: &ResourceId,
        span: &Span,
    ) -> Result<(Resource, Vec<Booking>), BookingError> {
        let rows = self
            .rows(resource_id)
            .ok_or(BookingError::ResourceNotFound(*resource_id))?;
        let guard = rows.read().await;
        let hits = guard.overlapping(span).cloned().collect();
        Ok((guard.resource.clone(), hits))
    }

    /// Bookings matching `filter`, ordered by start time.
    pub async fn list(&self, filter: &BookingFilter, now: Ms) -> Vec<Booking> {
        let targets: Vec<_> = match filter.resource_id {
            Some(rid) => self.rows(&rid).into_iter().collect(),
            None => self.resources.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for rows in targets {
            let guard = rows.read().await;
            match filter.window {
                // Window narrows the scan through the sorted rows.
                Some(w) => out.extend(guard.overlapping(&w).filter(|b| filter.matches(b, now)).cloned()),
                None => out.extend(guard.bookings.iter().filter(|b| filter.matches(b, now)).cloned()),
            }
        }
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    /// Pending rows whose hold has lapsed at `now`.
    pub async fn lapsed_holds(&self, now: Ms) -> Vec<BookingId> {
        let all_rows: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        let mut lapsed = Vec::new();
        for rows in all_rows {
            let guard = rows.read().await;
            lapsed.extend(guard.bookings.iter().filter(|b| b.is_lapsed(now)).map(|b| b.id));
        }
        lapsed
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_index.len()
    }
}
