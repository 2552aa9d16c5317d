//! Which banners and affordances the dashboard shows.
//!
//! Everything here is a pure function of a store snapshot, the clock
//! deviation flag and the dismissed-banner preference.

use greenpass_core::{EventGroup, EventType, GreenCard, GreenCardType, OriginType, Timestamp};
use greenpass_cred::is_expired;

/// Cards shown as one dashboard tile. Several EU vaccination cards collapse
/// into one tile; every other tile holds a single card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardCard {
    pub cards: Vec<GreenCard>,
    /// All cards in the tile are expired.
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardItem {
    Header,
    ClockDeviationBanner,
    Placeholder,
    SyncedBanner,
    SyncUpgradeBanner,
    Cards(DashboardCard),
    AddQrButton,
}

fn all_expired(cards: &[GreenCard], now: Timestamp) -> bool {
    cards.iter().all(|card| is_expired(card, now))
}

/// Cards exist and not all of them are expired.
pub fn show_header(cards: &[GreenCard], now: Timestamp) -> bool {
    !cards.is_empty() && !all_expired(cards, now)
}

pub fn show_clock_deviation_banner(
    cards: &[GreenCard],
    has_deviation: bool,
    now: Timestamp,
) -> bool {
    has_deviation && show_header(cards, now)
}

/// No cards, or every card is expired.
pub fn show_placeholder(cards: &[GreenCard], now: Timestamp) -> bool {
    cards.is_empty() || all_expired(cards, now)
}

pub fn show_add_qr_button(cards: &[GreenCard]) -> bool {
    cards.is_empty()
}

fn eu_vaccination_card_count(cards: &[GreenCard]) -> usize {
    cards.iter().filter(|card| card.is_eu_vaccination()).count()
}

/// At least two vaccination event groups but a single EU vaccination card:
/// a re-sync would produce a more complete proof.
pub fn should_offer_sync_upgrade(cards: &[GreenCard], event_groups: &[EventGroup]) -> bool {
    let vaccination_groups = event_groups
        .iter()
        .filter(|group| group.event_type == EventType::Vaccination)
        .count();
    vaccination_groups >= 2 && eu_vaccination_card_count(cards) == 1
}

pub fn should_show_synced_banner(cards: &[GreenCard], dismissed: bool) -> bool {
    !dismissed && eu_vaccination_card_count(cards) > 1
}

type TileKey = (GreenCardType, Option<OriginType>);

const COMBINED_KEY: TileKey = (GreenCardType::Eu, Some(OriginType::Vaccination));

/// Group cards by `(card type, first origin type)` in order of first
/// appearance. The EU vaccination group becomes one tile; every other group
/// is flattened into a tile per card, kept together.
pub fn combine_eu_vaccination_cards(cards: &[GreenCard], now: Timestamp) -> Vec<DashboardCard> {
    let mut groups: Vec<(TileKey, Vec<GreenCard>)> = Vec::new();
    for card in cards {
        let key = (card.card_type, card.first_origin_type());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(card.clone()),
            None => groups.push((key, vec![card.clone()])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(key, members)| {
            if key == COMBINED_KEY {
                vec![members]
            } else {
                members.into_iter().map(|card| vec![card]).collect()
            }
        })
        .map(|cards| DashboardCard {
            expired: all_expired(&cards, now),
            cards,
        })
        .collect()
}

/// Snapshot the dashboard decisions are taken over.
pub struct DashboardPolicy {
    cards: Vec<GreenCard>,
    event_groups: Vec<EventGroup>,
    has_deviation: bool,
    synced_banner_dismissed: bool,
}

impl DashboardPolicy {
    pub fn new(
        cards: Vec<GreenCard>,
        event_groups: Vec<EventGroup>,
        has_deviation: bool,
        synced_banner_dismissed: bool,
    ) -> Self {
        Self {
            cards,
            event_groups,
            has_deviation,
            synced_banner_dismissed,
        }
    }

    pub fn cards(&self) -> &[GreenCard] {
        &self.cards
    }

    /// Ordered dashboard items at `now`.
    pub fn items(&self, now: Timestamp) -> Vec<DashboardItem> {
        let mut items = Vec::new();
        if show_header(&self.cards, now) {
            items.push(DashboardItem::Header);
        }
        if show_clock_deviation_banner(&self.cards, self.has_deviation, now) {
            items.push(DashboardItem::ClockDeviationBanner);
        }
        if show_placeholder(&self.cards, now) {
            items.push(DashboardItem::Placeholder);
        }
        if should_show_synced_banner(&self.cards, self.synced_banner_dismissed) {
            items.push(DashboardItem::SyncedBanner);
        }
        if should_offer_sync_upgrade(&self.cards, &self.event_groups) {
            items.push(DashboardItem::SyncUpgradeBanner);
        }
        items.extend(
            combine_eu_vaccination_cards(&self.cards, now)
                .into_iter()
                .map(DashboardItem::Cards),
        );
        if show_add_qr_button(&self.cards) {
            items.push(DashboardItem::AddQrButton);
        }
        items
    }
}
