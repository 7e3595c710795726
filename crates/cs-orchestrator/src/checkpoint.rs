//! Checkpoint store
//!
//! One record per incident, keyed by incident id, in an embedded sled
//! tree. `save` flushes before returning: a checkpoint that this method
//! reported durable survives a crash, which is what lets the bus ack
//! trail the checkpoint commit.

use std::path::Path;

use tracing::{debug, info};

use crate::state::IncidentState;
use crate::{OrchestratorError, Result};

pub struct CheckpointStore {
    db: sled::Db,
}

impl CheckpointStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| OrchestratorError::Checkpoint(format!("open {path:?}: {e}")))?;
        info!("checkpoint store open at {path:?}");
        Ok(Self { db })
    }

    /// Persist the full incident state and flush to disk.
    pub async fn save(&self, state: &IncidentState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.db
            .insert(state.incident_id.as_bytes(), bytes)
            .map_err(|e| OrchestratorError::Checkpoint(format!("insert: {e}")))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| OrchestratorError::Checkpoint(format!("flush: {e}")))?;
        debug!(
            "checkpointed incident {} at step {:?}",
            state.incident_id, state.current_step
        );
        Ok(())
    }

    pub fn load(&self, incident_id: &str) -> Result<Option<IncidentState>> {
        let Some(bytes) = self
            .db
            .get(incident_id.as_bytes())
            .map_err(|e| OrchestratorError::Checkpoint(format!("get: {e}")))?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn remove(&self, incident_id: &str) -> Result<()> {
        self.db
            .remove(incident_id.as_bytes())
            .map_err(|e| OrchestratorError::Checkpoint(format!("remove: {e}")))?;
        Ok(())
    }

    /// Incident ids with a stored checkpoint.
    pub fn incident_ids(&self) -> Vec<String> {
        self.db
            .iter()
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| String::from_utf8(key.to_vec()).ok())
            .collect()
    }
}
