use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::models::{Passenger, PassengerCount, PassengerDraft, PassengerType};

pub const DEFAULT_NATIONALITY: &str = "Philippines";
const DEFAULT_AGE_YEARS: i32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("duplicate passenger key {0}")]
    DuplicateKey(String),
    #[error("infant {0} has no sponsoring adult")]
    MissingSponsor(String),
    #[error("infant {infant} references unknown passenger {adult}")]
    UnknownSponsor { infant: String, adult: String },
    #[error("passenger {0} is not an adult and cannot sponsor an infant")]
    SponsorNotAdult(String),
    #[error("adult {0} already sponsors an infant")]
    SponsorTaken(String),
    #[error("passenger {0} is not an infant")]
    NotAnInfant(String),
    #[error("{infants} infants but only {adults} adults")]
    TooManyInfants { infants: u32, adults: u32 },
    #[error("at least one adult is required")]
    NoAdult,
}

/// Ordered passengers of a booking, keyed by stable passenger keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PassengerRoster(Vec<Passenger>);

impl PassengerRoster {
    pub fn passengers(&self) -> &[Passenger] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Passenger> {
        self.0.iter().find(|p| p.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.key.as_str()).collect()
    }

    pub fn counts(&self) -> PassengerCount {
        let count = |kind: PassengerType| self.0.iter().filter(|p| p.passenger_type == kind).count() as u32;
        PassengerCount {
            adults: count(PassengerType::Adult),
            children: count(PassengerType::Child),
            infants: count(PassengerType::Infant),
        }
    }

    /// Build a roster from form drafts and derive the infant map from the
    /// sponsors they name.
    ///
    /// Drafts without a key get `pax_{n}` by position. A sponsor may be given
    /// as a passenger key or as a 1-based position.
    pub fn from_drafts(drafts: Vec<PassengerDraft>, today: NaiveDate) -> Result<(Self, InfantAdultMap), RosterError> {
        let default_dob = today
            .with_year(today.year() - DEFAULT_AGE_YEARS)
            .or_else(|| NaiveDate::from_ymd_opt(today.year() - DEFAULT_AGE_YEARS, 2, 28))
            .unwrap_or(today);

        let mut seen = HashSet::new();
        let mut passengers = Vec::with_capacity(drafts.len());
        let mut sponsors = Vec::new();

        for (i, draft) in drafts.into_iter().enumerate() {
            let key = draft
                .key
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| format!("pax_{}", i + 1));
            if !seen.insert(key.clone()) {
                return Err(RosterError::DuplicateKey(key));
            }

            let title = draft.title.filter(|t| !t.is_empty()).unwrap_or_else(|| {
                match draft.passenger_type {
                    PassengerType::Infant => "CHD",
                    _ => "MR",
                }
                .to_string()
            });

            if draft.passenger_type == PassengerType::Infant {
                let sponsor = draft
                    .associated_adult
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(|| RosterError::MissingSponsor(key.clone()))?;
                sponsors.push((key.clone(), sponsor));
            }

            passengers.push(Passenger {
                key,
                first_name: draft.first_name.trim().to_string(),
                middle_name: draft.middle_name.trim().to_string(),
                last_name: draft.last_name.trim().to_string(),
                title,
                date_of_birth: draft.date_of_birth.unwrap_or(default_dob),
                nationality: draft
                    .nationality
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| DEFAULT_NATIONALITY.to_string()),
                document_number: draft.document_number,
                passenger_type: draft.passenger_type,
            });
        }

        let roster = PassengerRoster(passengers);
        let mut map = InfantAdultMap::default();
        for (infant, sponsor) in sponsors {
            let adult = roster.resolve_sponsor(&infant, &sponsor)?;
            if map.infant_for(&adult).is_some() {
                return Err(RosterError::SponsorTaken(adult));
            }
            map.0.insert(infant, adult);
        }

        roster.validate(&map)?;
        Ok((roster, map))
    }

    fn resolve_sponsor(&self, infant: &str, sponsor: &str) -> Result<String, RosterError> {
        let passenger = self.get(sponsor).or_else(|| {
            sponsor
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.0.get(i))
        });
        let passenger = passenger.ok_or_else(|| RosterError::UnknownSponsor {
            infant: infant.to_string(),
            adult: sponsor.to_string(),
        })?;
        if passenger.passenger_type != PassengerType::Adult {
            return Err(RosterError::SponsorNotAdult(passenger.key.clone()));
        }
        Ok(passenger.key.clone())
    }

    /// Every infant has exactly one adult; no adult sponsors two infants.
    pub fn validate(&self, map: &InfantAdultMap) -> Result<(), RosterError> {
        if self.is_empty() {
            return Ok(());
        }
        let counts = self.counts();
        if counts.adults == 0 {
            return Err(RosterError::NoAdult);
        }
        if counts.infants > counts.adults {
            return Err(RosterError::TooManyInfants {
                infants: counts.infants,
                adults: counts.adults,
            });
        }

        let mut sponsors = HashSet::new();
        for infant in self.0.iter().filter(|p| p.passenger_type == PassengerType::Infant) {
            let adult = map
                .adult_for(&infant.key)
                .ok_or_else(|| RosterError::MissingSponsor(infant.key.clone()))?;
            match self.get(adult) {
                Some(p) if p.passenger_type == PassengerType::Adult => {}
                Some(p) => return Err(RosterError::SponsorNotAdult(p.key.clone())),
                None => {
                    return Err(RosterError::UnknownSponsor {
                        infant: infant.key.clone(),
                        adult: adult.to_string(),
                    })
                }
            }
            if !sponsors.insert(adult) {
                return Err(RosterError::SponsorTaken(adult.to_string()));
            }
        }
        if map.len() != counts.infants as usize {
            // Entries for passengers that are no longer infants.
            if let Some((infant, _)) = map.iter().find(|(infant, _)| {
                self.get(infant).map(|p| p.passenger_type) != Some(PassengerType::Infant)
            }) {
                return Err(RosterError::NotAnInfant(infant.to_string()));
            }
        }
        Ok(())
    }
}

/// infant key → sponsoring adult key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct InfantAdultMap(BTreeMap<String, String>);

impl InfantAdultMap {
    pub fn adult_for(&self, infant: &str) -> Option<&str> {
        self.0.get(infant).map(String::as_str)
    }

    pub fn infant_for(&self, adult: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, a)| a.as_str() == adult)
            .map(|(infant, _)| infant.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(i, a)| (i.as_str(), a.as_str()))
    }

    /// Re-home `infant` under `adult`. When `adult` already sponsors another
    /// infant, the two infants trade sponsors.
    pub fn assign(&self, roster: &PassengerRoster, infant: &str, adult: &str) -> Result<InfantAdultMap, RosterError> {
        match roster.get(infant) {
            Some(p) if p.passenger_type == PassengerType::Infant => {}
            Some(_) => return Err(RosterError::NotAnInfant(infant.to_string())),
            None => {
                return Err(RosterError::UnknownSponsor {
                    infant: infant.to_string(),
                    adult: adult.to_string(),
                })
            }
        }
        let adult = roster.resolve_sponsor(infant, adult)?;

        let mut next = self.clone();
        let previous = next.0.insert(infant.to_string(), adult.clone());
        if let Some(other) = self.infant_for(&adult).filter(|other| *other != infant) {
            match previous {
                Some(old_adult) => {
                    next.0.insert(other.to_string(), old_adult);
                }
                None => return Err(RosterError::SponsorTaken(adult)),
            }
        }
        roster.validate(&next)?;
        Ok(next)
    }
}

impl FromIterator<(String, String)> for InfantAdultMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        InfantAdultMap(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn adult(name: &str) -> PassengerDraft {
        PassengerDraft::new(PassengerType::Adult, name, "Santos")
    }

    fn infant(name: &str, sponsor: &str) -> PassengerDraft {
        PassengerDraft::new(PassengerType::Infant, name, "Santos").sponsored_by(sponsor)
    }

    #[test]
    fn test_keys_and_defaults() {
        let (roster, map) = PassengerRoster::from_drafts(vec![adult("Ana"), infant("Lia", "1")], today()).unwrap();

        assert_eq!(roster.keys(), vec!["pax_1", "pax_2"]);
        let baby = roster.get("pax_2").unwrap();
        assert_eq!(baby.title, "CHD");
        assert_eq!(baby.nationality, DEFAULT_NATIONALITY);
        assert_eq!(baby.date_of_birth, NaiveDate::from_ymd_opt(2006, 3, 1).unwrap());
        assert_eq!(roster.get("pax_1").unwrap().title, "MR");
        assert_eq!(map.adult_for("pax_2"), Some("pax_1"));
    }

    #[test]
    fn test_sponsor_by_key() {
        let drafts = vec![adult("Ana").keyed("a"), infant("Lia", "a").keyed("i")];
        let (_, map) = PassengerRoster::from_drafts(drafts, today()).unwrap();
        assert_eq!(map.infant_for("a"), Some("i"));
    }

    #[test]
    fn test_rejects_unsponsored_infant() {
        let mut lone = infant("Lia", "");
        lone.associated_adult = None;
        let err = PassengerRoster::from_drafts(vec![adult("Ana"), lone], today()).unwrap_err();
        assert_eq!(err, RosterError::MissingSponsor("pax_2".to_string()));
    }

    #[test]
    fn test_rejects_double_sponsorship() {
        let drafts = vec![adult("Ana"), adult("Ben"), infant("Lia", "1"), infant("Mia", "1")];
        let err = PassengerRoster::from_drafts(drafts, today()).unwrap_err();
        assert_eq!(err, RosterError::SponsorTaken("pax_1".to_string()));
    }

    #[test]
    fn test_rejects_more_infants_than_adults() {
        let drafts = vec![adult("Ana"), infant("Lia", "1"), infant("Mia", "1")];
        let err = PassengerRoster::from_drafts(drafts, today()).unwrap_err();
        assert!(matches!(err, RosterError::SponsorTaken(_) | RosterError::TooManyInfants { .. }));
    }

    #[test]
    fn test_rejects_child_sponsor() {
        let drafts = vec![
            adult("Ana"),
            PassengerDraft::new(PassengerType::Child, "Tom", "Santos"),
            infant("Lia", "2"),
        ];
        let err = PassengerRoster::from_drafts(drafts, today()).unwrap_err();
        assert_eq!(err, RosterError::SponsorNotAdult("pax_2".to_string()));
    }

    #[test]
    fn test_assign_swaps_sponsors() {
        let drafts = vec![adult("Ana"), adult("Ben"), infant("Lia", "1"), infant("Mia", "2")];
        let (roster, map) = PassengerRoster::from_drafts(drafts, today()).unwrap();

        let swapped = map.assign(&roster, "pax_3", "pax_2").unwrap();
        assert_eq!(swapped.adult_for("pax_3"), Some("pax_2"));
        assert_eq!(swapped.adult_for("pax_4"), Some("pax_1"));
        assert!(roster.validate(&swapped).is_ok());
    }

    #[test]
    fn test_assign_rejects_non_infant() {
        let (roster, map) = PassengerRoster::from_drafts(vec![adult("Ana"), adult("Ben")], today()).unwrap();
        assert_eq!(
            map.assign(&roster, "pax_1", "pax_2").unwrap_err(),
            RosterError::NotAnInfant("pax_1".to_string())
        );
    }
}
