//! In-memory geo-cell audit store.

use crate::store::{GeoCellRecord, SurgeCellStore, SurgeCellStoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory [`SurgeCellStore`].
#[derive(Default)]
pub struct InMemorySurgeCellStore {
    cells: Mutex<HashMap<String, GeoCellRecord>>,
}

impl InMemorySurgeCellStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SurgeCellStore for InMemorySurgeCellStore {
    async fn upsert(&self, record: GeoCellRecord) -> Result<(), SurgeCellStoreError> {
        let mut cells = self.cells.lock().expect("cell store poisoned");
        cells.insert(record.cell_id.clone(), record);
        Ok(())
    }

    async fn get(&self, cell_id: &str) -> Result<Option<GeoCellRecord>, SurgeCellStoreError> {
        let cells = self.cells.lock().expect("cell store poisoned");
        Ok(cells.get(cell_id).cloned())
    }
}
