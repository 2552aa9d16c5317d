use crate::error::GreenpassResult;
use crate::model::{EventGroup, GreenCard, IssuedGreenCard};
use crate::types::{EventGroupId, RecordId};

// ---------------------------------------------------------------------------
// StorageBackend: opaque key-value records (secret key, cached blobs)
// ---------------------------------------------------------------------------

pub trait StorageBackend: Send + Sync {
    fn get(&self, record_id: &RecordId) -> GreenpassResult<Option<Vec<u8>>>;
    fn put(&self, record_id: &RecordId, data: &[u8]) -> GreenpassResult<()>;
    fn delete(&self, record_id: &RecordId) -> GreenpassResult<bool>;

    /// Atomic compare-and-swap. Returns true if the swap succeeded
    /// (the stored value matched `expected`, `None` meaning absent).
    fn compare_and_swap(
        &self,
        record_id: &RecordId,
        expected: Option<&[u8]>,
        new_value: &[u8],
    ) -> GreenpassResult<bool>;

    fn exists(&self, record_id: &RecordId) -> GreenpassResult<bool>;
}

// ---------------------------------------------------------------------------
// GreenCardStore: event groups, cards and banner state
//
// Every mutating call is atomic: readers see the state before or after it,
// never a half-applied issuance.
// ---------------------------------------------------------------------------

pub trait GreenCardStore: Send + Sync {
    fn all_green_cards(&self) -> GreenpassResult<Vec<GreenCard>>;
    fn all_event_groups(&self) -> GreenpassResult<Vec<EventGroup>>;

    /// Insert an event group. Returns false if a group with the same id exists.
    fn save_event_group(&self, group: &EventGroup) -> GreenpassResult<bool>;

    /// User-initiated removal. Also removes every origin and credential issued
    /// from the group. Returns false if the group did not exist.
    fn remove_event_group(&self, id: &EventGroupId) -> GreenpassResult<bool>;

    /// Replace everything previously issued from `event_group_id` with `issued`,
    /// upserting cards per [`crate::model::merge_issued_cards`].
    fn replace_issued_cards(
        &self,
        event_group_id: &EventGroupId,
        issued: &[IssuedGreenCard],
    ) -> GreenpassResult<()>;

    /// Insert `group` if it is new and replace what was issued from it, as one
    /// step. On failure neither the group nor its cards are stored.
    fn save_issued_group(
        &self,
        group: &EventGroup,
        issued: &[IssuedGreenCard],
    ) -> GreenpassResult<()>;

    fn has_dismissed_synced_banner(&self) -> GreenpassResult<bool>;
    fn set_dismissed_synced_banner(&self, dismissed: bool) -> GreenpassResult<()>;
}
