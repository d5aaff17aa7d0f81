//! Process registry and admission control.
//!
//! [`ProcessRegistry`] is the single authority on what is running and
//! whether something new may start. It owns, behind one lock:
//!
//! - the live [`ProcessRecord`]s, keyed by their uuid handle,
//! - the [`PortLedger`],
//! - the count of outstanding admission reservations.
//!
//! Every mutation (admit, lease, register, revoke, forget) happens inside one
//! critical section, with marker writes and removals performed under the same
//! lock. Readers therefore never observe a record without its port and
//! marker, or the reverse.
//!
//! Admission is a reservation, not a count check: [`ProcessRegistry::admit`]
//! hands out an [`AdmissionPermit`] that occupies a capacity slot until it is
//! consumed by [`ProcessRegistry::register`] or dropped on a failure path.
//! Ports work the same way through [`PortLease`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::error::CoreError;
use crate::markers::MarkerStore;
use crate::ports::PortLedger;
use crate::signal::{self, SignalOutcome};
use crate::types::{Pid, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of generated services allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Name of the marker directory under the storage root.
pub const MARKER_DIR_NAME: &str = "processes";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One running generated service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// OS process id of the service.
    pub pid: Pid,
    /// Orchestrator-issued handle; callers must present it to kill.
    pub uuid: Uuid,
    /// Port the service is bound to.
    pub port: u16,
    /// Workspace the service runs from.
    pub directory: PathBuf,
    pub started_at: Timestamp,
}

/// Registry construction parameters.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding one marker per live process.
    pub marker_dir: PathBuf,
    /// Concurrency ceiling enforced by [`ProcessRegistry::admit`].
    pub max_concurrent: usize,
}

impl RegistryConfig {
    /// Markers under `<storage_root>/processes`.
    pub fn new(storage_root: impl Into<PathBuf>, max_concurrent: usize) -> Self {
        Self {
            marker_dir: storage_root.into().join(MARKER_DIR_NAME),
            max_concurrent,
        }
    }
}

/// Summary of a startup reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Markers found on disk.
    pub markers: usize,
    /// Processes that received SIGTERM.
    pub terminated: usize,
    /// Markers whose process no longer existed.
    pub already_gone: usize,
    /// Markers whose process could not be signalled (or had no valid pid).
    pub failed: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<Uuid, ProcessRecord>,
    ports: PortLedger,
    reserved: usize,
}

/// Authoritative record of running services.
///
/// Shared as `Arc<ProcessRegistry>`; permits and leases keep a clone so they
/// can give their slot back when dropped.
#[derive(Debug)]
pub struct ProcessRegistry {
    state: Mutex<RegistryState>,
    markers: MarkerStore,
    max_concurrent: usize,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

impl ProcessRegistry {
    /// Open the marker directory and build an empty registry.
    ///
    /// Markers already on disk are left alone until
    /// [`reconcile_on_startup`](Self::reconcile_on_startup) runs.
    pub fn open(config: RegistryConfig) -> Result<Arc<Self>, CoreError> {
        let markers = MarkerStore::open(&config.marker_dir)?;
        Ok(Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            markers,
            max_concurrent: config.max_concurrent,
        }))
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Reserve a capacity slot.
    ///
    /// Succeeds only while live records plus outstanding reservations are
    /// strictly below the ceiling.
    pub fn admit(self: &Arc<Self>) -> Result<AdmissionPermit, CoreError> {
        let mut state = self.lock();
        if state.records.len() + state.reserved >= self.max_concurrent {
            return Err(CoreError::CapacityExceeded {
                ceiling: self.max_concurrent,
            });
        }
        state.reserved += 1;
        tracing::debug!(
            live = state.records.len(),
            reserved = state.reserved,
            "Admission reserved",
        );
        Ok(AdmissionPermit {
            registry: Arc::clone(self),
            armed: true,
        })
    }

    /// Choose the lowest port at or above `from` not in the ledger and
    /// record it immediately.
    pub fn lease_port(self: &Arc<Self>, from: u16) -> Result<PortLease, CoreError> {
        let mut state = self.lock();
        let port = state.ports.next_free(from)?;
        state.ports.insert(port);
        Ok(PortLease {
            registry: Arc::clone(self),
            port,
            armed: true,
        })
    }

    /// Record a freshly spawned service.
    ///
    /// Consumes the admission permit and the port lease. The marker is
    /// written before the record becomes visible; if that write fails the
    /// permit and lease are released and nothing is recorded.
    pub fn register(
        &self,
        mut permit: AdmissionPermit,
        mut lease: PortLease,
        pid: Pid,
        directory: PathBuf,
    ) -> Result<ProcessRecord, CoreError> {
        let record = ProcessRecord {
            pid,
            uuid: Uuid::new_v4(),
            port: lease.port,
            directory,
            started_at: chrono::Utc::now(),
        };

        let mut state = self.lock();
        self.markers.write(&record.uuid.to_string(), pid)?;

        state.reserved = state.reserved.saturating_sub(1);
        state.records.insert(record.uuid, record.clone());
        permit.armed = false;
        lease.armed = false;
        drop(state);

        tracing::info!(
            pid,
            uuid = %record.uuid,
            port = record.port,
            "Process registered",
        );
        Ok(record)
    }

    /// Terminate and forget the record matching both `pid` and `uuid`.
    ///
    /// The record, its marker and its port are removed whether or not the
    /// signal could be delivered. A process that was already gone counts as
    /// success; any other delivery failure is returned after cleanup.
    pub fn revoke(&self, pid: Pid, uuid: &Uuid) -> Result<ProcessRecord, CoreError> {
        let mut state = self.lock();
        let matches = state
            .records
            .get(uuid)
            .is_some_and(|record| record.pid == pid);
        if !matches {
            return Err(CoreError::NotFound {
                pid,
                uuid: uuid.to_string(),
            });
        }

        let outcome = signal::terminate(pid);
        let record = self.remove_locked(&mut state, uuid).ok_or_else(|| {
            CoreError::Internal(format!("record {uuid} vanished under the registry lock"))
        })?;
        drop(state);

        match outcome {
            Ok(SignalOutcome::Delivered) => {
                tracing::info!(pid, %uuid, port = record.port, "Process terminated");
                Ok(record)
            }
            Ok(SignalOutcome::AlreadyGone) => {
                tracing::warn!(pid, %uuid, "Process already exited; registry entry removed");
                Ok(record)
            }
            Err(e) => {
                tracing::error!(pid, %uuid, error = %e, "Signal delivery failed; registry entry removed");
                Err(e)
            }
        }
    }

    /// Remove the record for a process that exited on its own.
    ///
    /// Returns `None` when the record is already gone (e.g. revoked).
    pub fn forget(&self, pid: Pid, uuid: &Uuid) -> Option<ProcessRecord> {
        let mut state = self.lock();
        if !state.records.get(uuid).is_some_and(|r| r.pid == pid) {
            return None;
        }
        self.remove_locked(&mut state, uuid)
    }

    /// Snapshot of live records, ordered by port.
    pub fn list(&self) -> Vec<ProcessRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.port);
        records
    }

    pub fn live_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Outstanding admission reservations not yet registered.
    pub fn reserved_count(&self) -> usize {
        self.lock().reserved
    }

    /// Ports currently in the ledger, ascending.
    pub fn leased_ports(&self) -> Vec<u16> {
        self.lock().ports.ports()
    }

    /// Reap services inherited from a previous orchestrator run.
    ///
    /// Every marker without an in-memory record is signalled and removed,
    /// whether or not its process still existed. Only the named pid is
    /// signalled, never its process group.
    pub fn reconcile_on_startup(&self) -> Result<ReconcileReport, CoreError> {
        let state = self.lock();
        let mut report = ReconcileReport::default();

        for marker in self.markers.scan()? {
            let known = marker
                .handle
                .parse::<Uuid>()
                .is_ok_and(|uuid| state.records.contains_key(&uuid));
            if known {
                continue;
            }
            report.markers += 1;

            match marker.pid.map(signal::terminate_process) {
                Some(Ok(SignalOutcome::Delivered)) => {
                    report.terminated += 1;
                    tracing::info!(pid = ?marker.pid, handle = %marker.handle, "Killed leftover process");
                }
                Some(Ok(SignalOutcome::AlreadyGone)) => {
                    report.already_gone += 1;
                    tracing::debug!(pid = ?marker.pid, handle = %marker.handle, "Leftover process already gone");
                }
                Some(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(handle = %marker.handle, error = %e, "Failed to kill leftover process");
                }
                None => {
                    report.failed += 1;
                    tracing::warn!(path = %marker.path.display(), "Marker without a valid pid");
                }
            }

            if let Err(e) = self.markers.remove_marker(&marker) {
                tracing::error!(path = %marker.path.display(), error = %e, "Failed to remove marker");
            }
        }

        Ok(report)
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the record, free its port and delete its marker.
    fn remove_locked(&self, state: &mut RegistryState, uuid: &Uuid) -> Option<ProcessRecord> {
        let record = state.records.remove(uuid)?;
        state.ports.release(record.port);
        if let Err(e) = self.markers.remove(&uuid.to_string()) {
            tracing::error!(%uuid, error = %e, "Failed to remove process marker");
        }
        Some(record)
    }

    fn release_reservation(&self) {
        let mut state = self.lock();
        state.reserved = state.reserved.saturating_sub(1);
        tracing::debug!(reserved = state.reserved, "Admission reservation released");
    }

    fn release_port(&self, port: u16) {
        self.lock().ports.release(port);
    }
}

// ---------------------------------------------------------------------------
// Permits and leases
// ---------------------------------------------------------------------------

/// A reserved capacity slot. Dropping it without registering frees the slot.
#[derive(Debug)]
#[must_use = "dropping a permit releases the reservation"]
pub struct AdmissionPermit {
    registry: Arc<ProcessRegistry>,
    armed: bool,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_reservation();
        }
    }
}

/// A port recorded in the ledger for a spawn attempt. Dropping it without
/// registering returns the port.
#[derive(Debug)]
#[must_use = "dropping a lease releases the port"]
pub struct PortLease {
    registry: Arc<ProcessRegistry>,
    port: u16,
    armed: bool,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_port(self.port);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
