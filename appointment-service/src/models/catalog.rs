//! Read-only catalog records owned by other parts of the business
//! (locations, clients, services, staff, products, rented machines).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: Uuid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: Uuid,
    pub full_name: String,
    pub active: bool,
}

/// A bookable service (treatment) offered at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub service_id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub duration_minutes: i32,
    pub price: Decimal,
    /// Rented machine the treatment runs on, if any.
    pub machine_id: Option<Uuid>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Professional {
    pub professional_id: Uuid,
    pub location_id: Uuid,
    pub full_name: String,
    pub monthly_salary: Option<Decimal>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Resale,
    InternalUse,
    Supply,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Resale => "resale",
            ProductKind::InternalUse => "internal_use",
            ProductKind::Supply => "supply",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "resale" => Some(ProductKind::Resale),
            "internal_use" => Some(ProductKind::InternalUse),
            "supply" => Some(ProductKind::Supply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub kind: ProductKind,
    /// Unit of measure used in descriptions ("units", "ml", ...).
    pub unit: String,
    pub list_price: Decimal,
    pub cash_price: Option<Decimal>,
    pub on_offer: bool,
    pub offer_price: Option<Decimal>,
    pub active: bool,
}

/// Sale price chosen for an outgoing movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePrice {
    pub unit_price: Decimal,
    /// Discount against list price, in percent, when the offer price applied.
    pub offer_discount: Option<Decimal>,
}

impl Product {
    /// Offer price when the offer is active and undercuts the list price.
    pub fn active_offer(&self) -> Option<Decimal> {
        match self.offer_price {
            Some(offer) if self.on_offer && offer > Decimal::ZERO && offer < self.list_price => {
                Some(offer)
            }
            _ => None,
        }
    }

    /// Override price, else active offer, else cash price, else list price.
    pub fn effective_price(&self, override_price: Option<Decimal>) -> EffectivePrice {
        if let Some(unit_price) = override_price {
            return EffectivePrice {
                unit_price,
                offer_discount: None,
            };
        }

        if let Some(offer) = self.active_offer() {
            let discount = ((self.list_price - offer) / self.list_price * Decimal::from(100))
                .round_dp(2);
            return EffectivePrice {
                unit_price: offer,
                offer_discount: Some(discount),
            };
        }

        let unit_price = match self.cash_price {
            Some(cash) if cash > Decimal::ZERO => cash,
            _ => self.list_price,
        };
        EffectivePrice {
            unit_price,
            offer_discount: None,
        }
    }
}

/// A machine rented by the day from an outside provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: Uuid,
    pub name: String,
    pub daily_cost: Decimal,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn product() -> Product {
        Product {
            product_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            name: "Serum".to_string(),
            kind: ProductKind::Resale,
            unit: "units".to_string(),
            list_price: dec("100"),
            cash_price: None,
            on_offer: false,
            offer_price: None,
            active: true,
        }
    }

    #[test]
    fn offer_price_wins_when_lower() {
        let mut p = product();
        p.on_offer = true;
        p.offer_price = Some(dec("80"));

        let price = p.effective_price(None);
        assert_eq!(price.unit_price, dec("80"));
        assert_eq!(price.offer_discount, Some(dec("20")));
    }

    #[test]
    fn offer_ignored_when_not_lower_or_inactive() {
        let mut p = product();
        p.offer_price = Some(dec("80"));
        assert_eq!(p.effective_price(None).unit_price, dec("100"));

        p.on_offer = true;
        p.offer_price = Some(dec("120"));
        assert_eq!(p.effective_price(None).unit_price, dec("100"));
    }

    #[test]
    fn override_beats_offer_and_cash_price() {
        let mut p = product();
        p.on_offer = true;
        p.offer_price = Some(dec("80"));
        p.cash_price = Some(dec("90"));
        assert_eq!(p.effective_price(Some(dec("75"))).unit_price, dec("75"));

        p.on_offer = false;
        assert_eq!(p.effective_price(None).unit_price, dec("90"));
    }
}
