//! Port bookkeeping for spawned services.
//!
//! The ledger, not the operating system, is the allocator's source of truth.
//! A port enters it the moment it is chosen for a spawn attempt and leaves
//! only when that attempt is abandoned or its process record is destroyed.

use std::collections::BTreeSet;

use crate::error::CoreError;

/// First port the allocator tries.
pub const DEFAULT_BASE_PORT: u16 = 10001;

/// Ports currently considered in use by the orchestrator.
#[derive(Debug, Default, Clone)]
pub struct PortLedger {
    in_use: BTreeSet<u16>,
}

impl PortLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.in_use.contains(&port)
    }

    /// Mark `port` as in use. Returns `false` if it already was.
    pub fn insert(&mut self, port: u16) -> bool {
        self.in_use.insert(port)
    }

    /// Release `port`. Returns `false` if it was not in use.
    pub fn release(&mut self, port: u16) -> bool {
        self.in_use.remove(&port)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }

    /// Ports in ascending order.
    pub fn ports(&self) -> Vec<u16> {
        self.in_use.iter().copied().collect()
    }

    /// Lowest port at or above `from` that is not in the ledger.
    ///
    /// Scans upward in strictly increasing order. Running off the top of the
    /// port space is [`CoreError::PortsExhausted`].
    pub fn next_free(&self, from: u16) -> Result<u16, CoreError> {
        (from..=u16::MAX)
            .find(|port| !self.in_use.contains(port))
            .ok_or(CoreError::PortsExhausted { from })
    }
}
