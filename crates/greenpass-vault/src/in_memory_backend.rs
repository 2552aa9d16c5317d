use greenpass_core::{GreenpassError, GreenpassResult, RecordId, StorageBackend};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;

/// Process-local key-value backend. Used by tests and by callers that keep
/// the secret key in memory only.
#[derive(Default)]
pub struct InMemoryBackend {
    records: Mutex<HashMap<RecordId, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> GreenpassResult<MutexGuard<'_, HashMap<RecordId, Vec<u8>>>> {
        self.records
            .lock()
            .map_err(|e| GreenpassError::Storage(format!("lock poisoned: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.records().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, record_id: &RecordId) -> GreenpassResult<Option<Vec<u8>>> {
        Ok(self.records()?.get(record_id).cloned())
    }

    fn put(&self, record_id: &RecordId, data: &[u8]) -> GreenpassResult<()> {
        self.records()?.insert(record_id.clone(), data.to_vec());
        Ok(())
    }

    fn delete(&self, record_id: &RecordId) -> GreenpassResult<bool> {
        Ok(self.records()?.remove(record_id).is_some())
    }

    fn compare_and_swap(
        &self,
        record_id: &RecordId,
        expected: Option<&[u8]>,
        new_value: &[u8],
    ) -> GreenpassResult<bool> {
        let mut records = self.records()?;
        let matches = match (records.get(record_id), expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => current.as_slice().ct_eq(expected).into(),
            _ => false,
        };
        if matches {
            records.insert(record_id.clone(), new_value.to_vec());
        }
        Ok(matches)
    }

    fn exists(&self, record_id: &RecordId) -> GreenpassResult<bool> {
        Ok(self.records()?.contains_key(record_id))
    }
}
