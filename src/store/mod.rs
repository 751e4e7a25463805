mod conflict;
mod mutations;
mod queries;

pub(crate) use conflict::{validate_calendar_ref, validate_customer, validate_name, validate_span};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::error::BookingError;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRows = Arc<RwLock<ResourceRows>>;

/// Outcome of a status write. `Unchanged` means the row was already in the
/// target state and nothing was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(Booking),
    Unchanged(Booking),
}

impl Transition {
    pub fn booking(&self) -> &Booking {
        match self {
            Transition::Applied(b) | Transition::Unchanged(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            Transition::Applied(b) | Transition::Unchanged(b) => b,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends that queue up while a flush is in
/// progress are written and fsynced together, then every sender gets the
/// shared result.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes don't leak into
    // the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

/// Apply a booking event to its resource's rows (caller holds the write lock).
fn apply_to_rows(rows: &mut ResourceRows, event: &Event, index: &DashMap<BookingId, ResourceId>) {
    match event {
        Event::BookingPlaced { booking } => {
            index.insert(booking.id, booking.resource_id);
            rows.insert_booking(booking.clone());
        }
        Event::BookingConfirmed {
            id,
            external_event_ref,
            ..
        } => {
            if let Some(b) = rows.booking_mut(id) {
                b.status = BookingStatus::Confirmed;
                b.expires_at = None;
                b.external_event_ref = external_event_ref.clone();
            }
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = rows.booking_mut(id) {
                b.status = BookingStatus::Cancelled;
                b.expires_at = None;
            }
        }
        // Registrations live at the map level.
        Event::TenantRegistered { .. } | Event::ResourceRegistered { .. } => {}
    }
}

fn event_resource_id(event: &Event) -> Option<ResourceId> {
    match event {
        Event::BookingPlaced { booking } => Some(booking.resource_id),
        Event::BookingConfirmed { resource_id, .. } | Event::BookingCancelled { resource_id, .. } => {
            Some(*resource_id)
        }
        Event::TenantRegistered { .. } | Event::ResourceRegistered { .. } => None,
    }
}

/// The local source of truth: booking rows per resource, durable through the WAL.
///
/// Every single-row write takes the resource's write lock, validates against
/// the current rows, appends one WAL record and applies it before releasing.
/// That region is the no-overlap guard for active bookings.
pub struct Store {
    pub(super) tenants: DashMap<TenantId, Tenant>,
    pub(super) resources: DashMap<ResourceId, SharedRows>,
    /// Reverse lookup: booking id → resource id.
    pub(super) booking_index: DashMap<BookingId, ResourceId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serialises tenant/resource registration.
    pub(super) registry: Mutex<()>,
    /// Writers hold it shared; compaction holds it exclusively so its snapshot
    /// cannot miss an in-flight append. Always taken before any rows lock.
    pub(super) commit_gate: RwLock<()>,
}

impl Store {
    /// Replay the WAL at `wal_path`, drop any torn tail, and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::<Event>::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let tenants = DashMap::new();
        let booking_index = DashMap::new();
        let mut rows: HashMap<ResourceId, ResourceRows> = HashMap::new();
        for event in &events {
            match event {
                Event::TenantRegistered { tenant } => {
                    tenants.insert(tenant.id, tenant.clone());
                }
                Event::ResourceRegistered { resource } => {
                    rows.insert(resource.id, ResourceRows::new(resource.clone()));
                }
                other => {
                    if let Some(rid) = event_resource_id(other)
                        && let Some(rs) = rows.get_mut(&rid)
                    {
                        apply_to_rows(rs, other, &booking_index);
                    }
                }
            }
        }

        tracing::info!(
            path = %wal_path.display(),
            records = events.len(),
            tenants = tenants.len(),
            resources = rows.len(),
            bookings = booking_index.len(),
            "store replayed"
        );

        let resources = rows
            .into_iter()
            .map(|(id, rs)| (id, Arc::new(RwLock::new(rs))))
            .collect();

        Ok(Self {
            tenants,
            resources,
            booking_index,
            wal_tx,
            registry: Mutex::new(()),
            commit_gate: RwLock::new(()),
        })
    }

    /// Write an event via the group-commit writer and wait until it is durable.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::Storage(e.to_string()))
    }

    /// WAL-append, then apply to the locked rows.
    pub(super) async fn persist_and_apply(
        &self,
        rows: &mut ResourceRows,
        event: &Event,
    ) -> Result<(), BookingError> {
        self.wal_append(event).await?;
        apply_to_rows(rows, event, &self.booking_index);
        Ok(())
    }

    pub(super) fn rows(&self, resource_id: &ResourceId) -> Option<SharedRows> {
        self.resources.get(resource_id).map(|e| e.value().clone())
    }

    /// Booking id → its resource's rows, write-locked.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &BookingId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceRows>, BookingError> {
        let resource_id = self
            .booking_index
            .get(id)
            .map(|e| *e.value())
            .ok_or(BookingError::BookingNotFound(*id))?;
        let rows = self
            .rows(&resource_id)
            .ok_or(BookingError::ResourceNotFound(resource_id))?;
        Ok(rows.write_owned().await)
    }
}
