use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skybook_core::amount;

use crate::models::BookingSession;

/// Knobs for the client-side fare estimate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FarePolicy {
    /// Applied to the passenger-weighted base fare
    pub tax_rate: Decimal,

    /// Share of the combined base an infant pays
    pub infant_fare_ratio: Decimal,

    pub currency: String,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(12, 2),
            infant_fare_ratio: Decimal::new(5, 1),
            currency: "PHP".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FareBreakdown {
    /// Sum of selected offer prices over active segments, per traveller
    pub combined_fare: Decimal,
    pub base_fare: Decimal,
    pub taxes: Decimal,
    pub addons: Decimal,
    pub insurance: Decimal,
    pub total: Decimal,
    pub currency: String,
}

impl FarePolicy {
    /// Estimate the fare of the booking as it stands.
    ///
    /// Pure: nothing on the session is touched, and add-ons stored under
    /// segments that are no longer part of the trip are not counted.
    pub fn quote(&self, session: &BookingSession) -> FareBreakdown {
        let segments = session.trip().active_segments();
        let combined = segments
            .iter()
            .fold(Decimal::ZERO, |acc, (_, segment)| acc.saturating_add(segment.price()));

        let counts = session.traveler_counts();
        let paying = Decimal::from(counts.paying());
        let infants = Decimal::from(counts.infants);
        let ratio = amount::clamp(self.infant_fare_ratio);
        // Saturates at Decimal::MAX so absurd prices never fail the quote.
        let base_fare = combined
            .saturating_mul(paying)
            .saturating_add(combined.saturating_mul(ratio).saturating_mul(infants));

        let taxes = base_fare.saturating_mul(amount::clamp(self.tax_rate));

        let active: Vec<_> = segments.into_iter().map(|(key, _)| key).collect();
        let addons = session.addons().total_for(&active);

        let insurance = session
            .insurance()
            .map(|plan| amount::clamp(plan.price))
            .unwrap_or(Decimal::ZERO);

        let total = base_fare
            .saturating_add(taxes)
            .saturating_add(addons)
            .saturating_add(insurance);

        FareBreakdown {
            combined_fare: combined.round_dp(2),
            base_fare: base_fare.round_dp(2),
            taxes: taxes.round_dp(2),
            addons: addons.round_dp(2),
            insurance: insurance.round_dp(2),
            total: total.round_dp(2),
            currency: self.currency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::InsuranceSelection;
    use crate::models::{FlightOffer, PassengerCount, Segment, TripSelection};

    fn offer(price: &str) -> Option<FlightOffer> {
        Some(FlightOffer {
            id: "1".to_string(),
            flight_number: "5J560".to_string(),
            price: price.parse().unwrap(),
            cabin_class: "Economy".to_string(),
            airline_code: None,
            departure_time: None,
        })
    }

    fn segment(price: &str) -> Segment {
        Segment {
            offer: offer(price),
            ..Segment::new("MNL", "CEB", None)
        }
    }

    #[test]
    fn test_empty_session_is_free() {
        let quote = FarePolicy::default().quote(&BookingSession::default());
        assert_eq!(quote.total, Decimal::ZERO);
    }

    #[test]
    fn test_multi_city_uses_combined_base() {
        let mut session = BookingSession::default();
        session.trip = TripSelection::MultiCity {
            segments: vec![segment("1000"), segment("800"), segment("700")],
        };
        session.passenger_count = PassengerCount {
            adults: 2,
            children: 0,
            infants: 2,
        };

        let quote = FarePolicy::default().quote(&session);
        // 2500 * 2 + 2500 * 0.5 * 2
        assert_eq!(quote.base_fare, Decimal::from(7500));
        assert_eq!(quote.taxes, Decimal::from(900));
        assert_eq!(quote.total, Decimal::from(8400));
    }

    #[test]
    fn test_insurance_counted_once() {
        let mut session = BookingSession::default();
        session.trip = TripSelection::OneWay { outbound: segment("1000") };
        session.passenger_count = PassengerCount {
            adults: 3,
            children: 0,
            infants: 0,
        };
        session.insurance = Some(InsuranceSelection {
            plan_id: "TI-BASIC".to_string(),
            name: "Basic".to_string(),
            price: Decimal::from(350),
        });

        let quote = FarePolicy::default().quote(&session);
        assert_eq!(quote.insurance, Decimal::from(350));
        assert_eq!(quote.total, Decimal::from(3360 + 350));
    }

    #[test]
    fn test_huge_price_saturates_instead_of_failing() {
        let mut session = BookingSession::default();
        session.trip = TripSelection::OneWay {
            outbound: segment("79228162514264337593543950335"),
        };
        session.passenger_count = PassengerCount {
            adults: 2,
            children: 0,
            infants: 1,
        };

        let quote = FarePolicy::default().quote(&session);
        assert_eq!(quote.base_fare, Decimal::MAX);
        assert_eq!(quote.total, Decimal::MAX);
    }

    #[test]
    fn test_quote_is_idempotent() {
        let mut session = BookingSession::default();
        session.trip = TripSelection::OneWay { outbound: segment("1234.56") };
        let policy = FarePolicy::default();
        assert_eq!(policy.quote(&session), policy.quote(&session));
    }
}
