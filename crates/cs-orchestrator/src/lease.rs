//! Per-incident lease
//!
//! Orchestrator transitions for one incident are strictly sequential:
//! the lease is held for the duration of a processing pass and a
//! second concurrent attempt on the same incident id fails instead of
//! racing. Released on drop.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{OrchestratorError, Result};

#[derive(Debug, Default, Clone)]
pub struct LeaseMap {
    held: Arc<DashMap<String, ()>>,
}

impl LeaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease for `incident_id`, failing if it is held.
    pub fn acquire(&self, incident_id: &str) -> Result<IncidentLease> {
        match self.held.entry(incident_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(OrchestratorError::LeaseHeld(incident_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(IncidentLease {
                    held: Arc::clone(&self.held),
                    incident_id: incident_id.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, incident_id: &str) -> bool {
        self.held.contains_key(incident_id)
    }
}

/// Guard for one incident; releases the lease on drop.
pub struct IncidentLease {
    held: Arc<DashMap<String, ()>>,
    incident_id: String,
}

impl Drop for IncidentLease {
    fn drop(&mut self) {
        self.held.remove(&self.incident_id);
    }
}
