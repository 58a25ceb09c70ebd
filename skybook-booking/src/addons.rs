use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skybook_core::amount;
use std::collections::BTreeMap;

use crate::models::SegmentKey;

/// A priced catalogue item (baggage allowance or meal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddonItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "amount::lenient")]
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatAssignment {
    pub seat_code: String,
    #[serde(default, deserialize_with = "amount::lenient")]
    pub seat_price: Decimal,
    /// Schedule the seat was picked on.
    #[serde(default)]
    pub schedule_id: Option<String>,
}

/// Everything chosen for one passenger on one segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PassengerAddons {
    #[serde(default)]
    pub baggage: Option<AddonItem>,
    #[serde(default)]
    pub meal: Option<AddonItem>,
    /// Mobility assistance is free of charge.
    #[serde(default)]
    pub assistance: Option<String>,
    #[serde(default)]
    pub seat: Option<SeatAssignment>,
}

impl PassengerAddons {
    pub fn is_empty(&self) -> bool {
        self.baggage.is_none() && self.meal.is_none() && self.assistance.is_none() && self.seat.is_none()
    }

    pub fn total(&self) -> Decimal {
        let baggage = self.baggage.as_ref().map(|b| amount::clamp(b.price)).unwrap_or_default();
        let meal = self.meal.as_ref().map(|m| amount::clamp(m.price)).unwrap_or_default();
        let seat = self.seat.as_ref().map(|s| amount::clamp(s.seat_price)).unwrap_or_default();
        baggage.saturating_add(meal).saturating_add(seat)
    }

    fn clear(&mut self, kind: AddonKind) {
        match kind {
            AddonKind::Baggage => self.baggage = None,
            AddonKind::Meal => self.meal = None,
            AddonKind::Assistance => self.assistance = None,
            AddonKind::Seat => self.seat = None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AddonKind {
    Baggage,
    Meal,
    Assistance,
    Seat,
}

/// One add-on choice to apply for a passenger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddonChoice {
    Baggage(AddonItem),
    Meal(AddonItem),
    Assistance { id: String },
    Seat(SeatAssignment),
}

impl AddonChoice {
    pub fn kind(&self) -> AddonKind {
        match self {
            AddonChoice::Baggage(_) => AddonKind::Baggage,
            AddonChoice::Meal(_) => AddonKind::Meal,
            AddonChoice::Assistance { .. } => AddonKind::Assistance,
            AddonChoice::Seat(_) => AddonKind::Seat,
        }
    }
}

/// The single travel insurance plan applied to a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsuranceSelection {
    pub plan_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "amount::lenient")]
    pub price: Decimal,
}

/// segment key → passenger key → add-ons.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AddonSelections(BTreeMap<SegmentKey, BTreeMap<String, PassengerAddons>>);

impl AddonSelections {
    pub fn get(&self, segment: &SegmentKey, passenger: &str) -> Option<&PassengerAddons> {
        self.0.get(segment).and_then(|by_pax| by_pax.get(passenger))
    }

    pub fn segment(&self, segment: &SegmentKey) -> Option<&BTreeMap<String, PassengerAddons>> {
        self.0.get(segment)
    }

    pub fn segment_keys(&self) -> impl Iterator<Item = &SegmentKey> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|by_pax| by_pax.values().all(PassengerAddons::is_empty))
    }

    pub fn apply(&mut self, segment: &SegmentKey, passenger: &str, choice: AddonChoice) {
        let entry = self
            .0
            .entry(segment.clone())
            .or_default()
            .entry(passenger.to_string())
            .or_default();
        match choice {
            AddonChoice::Baggage(item) => entry.baggage = Some(item),
            AddonChoice::Meal(item) => entry.meal = Some(item),
            AddonChoice::Assistance { id } => entry.assistance = Some(id),
            AddonChoice::Seat(seat) => entry.seat = Some(seat),
        }
    }

    pub fn remove(&mut self, segment: &SegmentKey, passenger: &str, kind: AddonKind) {
        let Some(by_pax) = self.0.get_mut(segment) else {
            return;
        };
        if let Some(entry) = by_pax.get_mut(passenger) {
            entry.clear(kind);
            if entry.is_empty() {
                by_pax.remove(passenger);
            }
        }
        if by_pax.is_empty() {
            self.0.remove(segment);
        }
    }

    pub fn clear_segment(&mut self, segment: &SegmentKey) {
        self.0.remove(segment);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Drop every segment not in `active`.
    pub fn retain_segments(&mut self, active: &[SegmentKey]) {
        self.0.retain(|key, _| active.contains(key));
    }

    /// Drop every passenger not in `keys`.
    pub fn retain_passengers(&mut self, keys: &[&str]) {
        for by_pax in self.0.values_mut() {
            by_pax.retain(|key, _| keys.contains(&key.as_str()));
        }
        self.0.retain(|_, by_pax| !by_pax.is_empty());
    }

    /// Copy one segment's selections onto another, re-pointing seats at
    /// `schedule_id`.
    pub fn copy_segment(&mut self, from: &SegmentKey, to: &SegmentKey, schedule_id: Option<&str>) {
        let Some(source) = self.0.get(from).cloned() else {
            return;
        };
        let copied = source
            .into_iter()
            .map(|(pax, mut addons)| {
                if let Some(seat) = addons.seat.as_mut() {
                    seat.schedule_id = schedule_id.map(str::to_string);
                }
                (pax, addons)
            })
            .collect();
        self.0.insert(to.clone(), copied);
    }

    /// Sum of priced add-ons over the given segments only.
    pub fn total_for(&self, active: &[SegmentKey]) -> Decimal {
        active
            .iter()
            .filter_map(|key| self.0.get(key))
            .flat_map(|by_pax| by_pax.values())
            .map(PassengerAddons::total)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }

    pub(crate) fn insert_raw(&mut self, segment: SegmentKey, passenger: String, addons: PassengerAddons) {
        if addons.is_empty() {
            return;
        }
        self.0.entry(segment).or_default().insert(passenger, addons);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(price: i64) -> AddonChoice {
        AddonChoice::Baggage(AddonItem {
            id: "BAG20".to_string(),
            name: "20kg".to_string(),
            price: Decimal::from(price),
        })
    }

    fn seat(code: &str, price: i64) -> AddonChoice {
        AddonChoice::Seat(SeatAssignment {
            seat_code: code.to_string(),
            seat_price: Decimal::from(price),
            schedule_id: Some("S1".to_string()),
        })
    }

    #[test]
    fn test_total_ignores_inactive_segments() {
        let mut addons = AddonSelections::default();
        addons.apply(&SegmentKey::depart(), "pax_1", bag(500));
        addons.apply(&SegmentKey::depart(), "pax_1", seat("12A", 250));
        addons.apply(&SegmentKey::inbound(), "pax_1", bag(700));
        addons.apply(
            &SegmentKey::depart(),
            "pax_1",
            AddonChoice::Assistance { id: "WCHR".to_string() },
        );

        assert_eq!(addons.total_for(&[SegmentKey::depart()]), Decimal::from(750));
        assert_eq!(
            addons.total_for(&[SegmentKey::depart(), SegmentKey::inbound()]),
            Decimal::from(1450)
        );
    }

    #[test]
    fn test_total_saturates_on_huge_prices() {
        let mut addons = AddonSelections::default();
        let huge = AddonChoice::Baggage(AddonItem {
            id: "BAG99".to_string(),
            name: "Freight".to_string(),
            price: Decimal::MAX,
        });
        addons.apply(&SegmentKey::depart(), "pax_1", huge.clone());
        addons.apply(&SegmentKey::depart(), "pax_1", seat("1A", 500));
        addons.apply(&SegmentKey::depart(), "pax_2", huge);

        assert_eq!(addons.total_for(&[SegmentKey::depart()]), Decimal::MAX);
    }

    #[test]
    fn test_remove_prunes_empty_entries() {
        let mut addons = AddonSelections::default();
        addons.apply(&SegmentKey::depart(), "pax_1", bag(500));
        addons.remove(&SegmentKey::depart(), "pax_1", AddonKind::Baggage);
        assert!(addons.segment(&SegmentKey::depart()).is_none());
        assert!(addons.is_empty());
    }

    #[test]
    fn test_copy_segment_repoints_seats() {
        let mut addons = AddonSelections::default();
        addons.apply(&SegmentKey::depart(), "pax_1", seat("3C", 100));
        addons.copy_segment(&SegmentKey::depart(), &SegmentKey::inbound(), Some("S2"));

        let copied = addons.get(&SegmentKey::inbound(), "pax_1").unwrap();
        assert_eq!(copied.seat.as_ref().unwrap().schedule_id.as_deref(), Some("S2"));
        let original = addons.get(&SegmentKey::depart(), "pax_1").unwrap();
        assert_eq!(original.seat.as_ref().unwrap().schedule_id.as_deref(), Some("S1"));
    }

    #[test]
    fn test_retain_segments() {
        let mut addons = AddonSelections::default();
        addons.apply(&SegmentKey::leg(0), "pax_1", bag(1));
        addons.apply(&SegmentKey::leg(2), "pax_1", bag(1));
        addons.retain_segments(&[SegmentKey::leg(0), SegmentKey::leg(1)]);
        assert_eq!(addons.segment_keys().count(), 1);
    }
}
