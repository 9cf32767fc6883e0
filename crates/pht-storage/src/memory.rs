use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pht_core::{observe, HistoryRecord, ObservationOutcome, ObservedFields};
use tokio::sync::Mutex;

use crate::{HistoryStore, StoreError};

type Slot = Arc<Mutex<Option<HistoryRecord>>>;

/// Process-local history store with one lock per identity.
///
/// Lookups for different identities never contend beyond the brief map lock.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, identity_id: &str) -> Slot {
        let mut map = self.slots.lock().await;
        map.entry(identity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Number of identities with a stored record.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn upsert_observation(
        &self,
        identity_id: &str,
        observed: &ObservedFields,
    ) -> Result<ObservationOutcome, StoreError> {
        let slot = self.slot(identity_id).await;
        let mut stored = slot.lock().await;
        let outcome = observe(stored.take(), identity_id, observed, Utc::now());
        *stored = Some(outcome.record.clone());
        Ok(outcome)
    }

    async fn get(&self, identity_id: &str) -> Result<Option<HistoryRecord>, StoreError> {
        let slot = {
            let map = self.slots.lock().await;
            map.get(identity_id).cloned()
        };
        match slot {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }
}
