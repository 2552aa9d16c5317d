use greenpass_core::{
    merge_issued_cards, remove_event_group_children, EventGroup, EventGroupId, GreenCard,
    GreenCardStore, GreenpassError, GreenpassResult, IssuedGreenCard,
};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct StoreState {
    cards: Vec<GreenCard>,
    event_groups: Vec<EventGroup>,
    dismissed_synced_banner: bool,
}

/// GreenCard store held in process memory.
///
/// Each operation runs under one lock, so an issuance is applied all at once
/// or not at all.
impl StoreState {
    fn insert_event_group(&mut self, group: &EventGroup) -> bool {
        if self.event_groups.iter().any(|g| g.id == group.id) {
            return false;
        }
        self.event_groups.push(group.clone());
        true
    }
}

#[derive(Default)]
pub struct InMemoryGreenCardStore {
    state: Mutex<StoreState>,
}

impl InMemoryGreenCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> GreenpassResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|e| GreenpassError::Storage(format!("lock poisoned: {}", e)))
    }
}

impl GreenCardStore for InMemoryGreenCardStore {
    fn all_green_cards(&self) -> GreenpassResult<Vec<GreenCard>> {
        Ok(self.state()?.cards.clone())
    }

    fn all_event_groups(&self) -> GreenpassResult<Vec<EventGroup>> {
        Ok(self.state()?.event_groups.clone())
    }

    fn save_event_group(&self, group: &EventGroup) -> GreenpassResult<bool> {
        Ok(self.state()?.insert_event_group(group))
    }

    fn remove_event_group(&self, id: &EventGroupId) -> GreenpassResult<bool> {
        let mut state = self.state()?;
        let before = state.event_groups.len();
        state.event_groups.retain(|g| &g.id != id);
        if state.event_groups.len() == before {
            return Ok(false);
        }
        let cards = std::mem::take(&mut state.cards);
        state.cards = remove_event_group_children(cards, id);
        Ok(true)
    }

    fn replace_issued_cards(
        &self,
        event_group_id: &EventGroupId,
        issued: &[IssuedGreenCard],
    ) -> GreenpassResult<()> {
        let mut state = self.state()?;
        let cards = std::mem::take(&mut state.cards);
        state.cards = merge_issued_cards(cards, event_group_id, issued);
        Ok(())
    }

    fn save_issued_group(
        &self,
        group: &EventGroup,
        issued: &[IssuedGreenCard],
    ) -> GreenpassResult<()> {
        let mut state = self.state()?;
        state.insert_event_group(group);
        let cards = std::mem::take(&mut state.cards);
        state.cards = merge_issued_cards(cards, &group.id, issued);
        Ok(())
    }

    fn has_dismissed_synced_banner(&self) -> GreenpassResult<bool> {
        Ok(self.state()?.dismissed_synced_banner)
    }

    fn set_dismissed_synced_banner(&self, dismissed: bool) -> GreenpassResult<()> {
        self.state()?.dismissed_synced_banner = dismissed;
        Ok(())
    }
}
