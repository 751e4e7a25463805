use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CalendarError, CalendarEvent, CalendarProvider, NewEvent};
use crate::model::Span;

/// In-process calendar. Stands in for the real provider when no credentials
/// are configured, and in tests.
#[derive(Default)]
pub struct MemoryCalendar {
    calendars: DashMap<String, Vec<CalendarEvent>>,
    next_id: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    created: AtomicUsize,
    deleted: AtomicUsize,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an event directly, as a person editing the calendar would.
    pub fn insert_event(&self, calendar_ref: &str, event: CalendarEvent) {
        self.calendars
            .entry(calendar_ref.to_string())
            .or_default()
            .push(event);
    }

    pub fn events(&self, calendar_ref: &str) -> Vec<CalendarEvent> {
        self.calendars
            .get(calendar_ref)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `create_event` calls so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Successful `delete_event` calls so far, including already-gone events.
    pub fn deleted_count(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    fn check_writes(&self) -> Result<(), CalendarError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CalendarError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarProvider for MemoryCalendar {
    async fn list_events(&self, calendar_ref: &str, window: Span) -> Result<Vec<CalendarEvent>, CalendarError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CalendarError::Unavailable("reads disabled".into()));
        }
        let mut hits: Vec<CalendarEvent> = self
            .calendars
            .get(calendar_ref)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.span.overlaps(&window))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by_key(|e| e.span.start);
        Ok(hits)
    }

    async fn create_event(&self, calendar_ref: &str, event: NewEvent) -> Result<String, CalendarError> {
        self.check_writes()?;
        let id = format!("evt_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.insert_event(
            calendar_ref,
            CalendarEvent {
                id: id.clone(),
                summary: Some(event.summary),
                span: event.span,
                description: Some(event.description),
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(calendar_ref, event_id = %id, "memory calendar event created");
        Ok(id)
    }

    async fn delete_event(&self, calendar_ref: &str, event_id: &str) -> Result<(), CalendarError> {
        self.check_writes()?;
        if let Some(mut events) = self.calendars.get_mut(calendar_ref) {
            events.retain(|e| e.id != event_id);
        }
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
