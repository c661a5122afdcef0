//! Shipping classification by destination.
//!
//! A destination is free text typed by the customer ("Huehuetenango,
//! Guatemala", "CHIANTLA", "Hüéhuetenango "). It is normalized and matched
//! against an ordered gazetteer of local zones. Local zones are served by our
//! own delivery; everything else goes through the national courier.

use common::Money;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// How an order reaches the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// Delivered by the store inside a local zone.
    LocalDelivery,
    /// Shipped through the external courier.
    Courier,
}

impl DeliveryMethod {
    /// Returns the storage name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::LocalDelivery => "local_delivery",
            DeliveryMethod::Courier => "courier",
        }
    }

    /// Parses a storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local_delivery" => Some(DeliveryMethod::LocalDelivery),
            "courier" => Some(DeliveryMethod::Courier),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingClassification {
    pub is_local_zone: bool,
    pub fee: Money,
    pub requires_courier: bool,
    pub method: DeliveryMethod,
}

/// Business rules for shipping fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingRules {
    /// Local zones in priority order. The first entry contained in the
    /// destination wins.
    pub local_zones: Vec<String>,
    /// Fee charged inside a local zone.
    pub local_fee: Money,
    /// Flat fee for courier delivery anywhere else.
    pub national_fee: Money,
}

impl Default for ShippingRules {
    fn default() -> Self {
        Self {
            local_zones: vec!["chiantla".to_string(), "huehuetenango".to_string()],
            local_fee: Money::zero(),
            national_fee: Money::from_quetzales(36),
        }
    }
}

/// Classifies destinations against a fixed set of [`ShippingRules`].
///
/// Pure and total: every input, including the empty string, yields a
/// classification. One instance is shared by order creation and the
/// pre-checkout estimate so both always agree.
#[derive(Debug, Clone)]
pub struct ShippingClassifier {
    zones: Vec<String>,
    local_fee: Money,
    national_fee: Money,
}

impl ShippingClassifier {
    /// Creates a classifier, normalizing the gazetteer once.
    ///
    /// Entries that normalize to the empty string are dropped, since they
    /// would otherwise match every destination.
    pub fn new(rules: ShippingRules) -> Self {
        let zones = rules
            .local_zones
            .iter()
            .map(|zone| normalize_destination(zone))
            .filter(|zone| !zone.is_empty())
            .collect();

        Self {
            zones,
            local_fee: rules.local_fee,
            national_fee: rules.national_fee,
        }
    }

    /// Returns the first local zone contained in `destination`, if any.
    pub fn matching_zone(&self, destination: &str) -> Option<&str> {
        let normalized = normalize_destination(destination);
        self.zones
            .iter()
            .find(|zone| normalized.contains(zone.as_str()))
            .map(String::as_str)
    }

    /// Classifies a destination.
    pub fn classify(&self, destination: &str) -> ShippingClassification {
        match self.matching_zone(destination) {
            Some(_) => ShippingClassification {
                is_local_zone: true,
                fee: self.local_fee,
                requires_courier: false,
                method: DeliveryMethod::LocalDelivery,
            },
            None => ShippingClassification {
                is_local_zone: false,
                fee: self.national_fee,
                requires_courier: true,
                method: DeliveryMethod::Courier,
            },
        }
    }
}

impl Default for ShippingClassifier {
    fn default() -> Self {
        Self::new(ShippingRules::default())
    }
}

/// Canonically decomposes, strips combining marks, lowercases and trims.
pub fn normalize_destination(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents_case_and_whitespace() {
        assert_eq!(normalize_destination("  Chiantlá "), "chiantla");
        assert_eq!(normalize_destination("HÜÉHUETENANGO"), "huehuetenango");
        assert_eq!(normalize_destination("Quetzaltenango"), "quetzaltenango");
    }

    #[test]
    fn test_classifier_normalization_is_consistent() {
        let classifier = ShippingClassifier::default();
        let a = classifier.classify("Huehuetenango");
        let b = classifier.classify("HUEHUETENANGO");
        let c = classifier.classify("Hüéhuetenango ");

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(a.is_local_zone);
        assert!(!a.requires_courier);
        assert_eq!(a.fee, Money::zero());
        assert_eq!(a.method, DeliveryMethod::LocalDelivery);
    }

    #[test]
    fn test_partial_match_inside_longer_destination() {
        let classifier = ShippingClassifier::default();
        let result = classifier.classify("Huehuetenango, Guatemala");
        assert!(result.is_local_zone);
        assert_eq!(
            classifier.matching_zone("Aldea X, Chiantla, Huehuetenango"),
            Some("chiantla")
        );
    }

    #[test]
    fn test_non_local_destination_requires_courier() {
        let classifier = ShippingClassifier::default();
        let result = classifier.classify("Guatemala City");
        assert!(!result.is_local_zone);
        assert!(result.requires_courier);
        assert_eq!(result.fee, Money::from_cents(3600));
        assert_eq!(result.method, DeliveryMethod::Courier);
    }

    #[test]
    fn test_empty_destination_is_national() {
        let classifier = ShippingClassifier::default();
        assert!(classifier.classify("").requires_courier);
        assert!(classifier.classify("   ").requires_courier);
    }

    #[test]
    fn test_gazetteer_order_is_priority() {
        let classifier = ShippingClassifier::new(ShippingRules {
            local_zones: vec!["zona 1".to_string(), "zona".to_string()],
            local_fee: Money::from_quetzales(10),
            national_fee: Money::from_quetzales(36),
        });
        assert_eq!(classifier.matching_zone("Zona 1, Xela"), Some("zona 1"));
        assert_eq!(classifier.matching_zone("Zona 3"), Some("zona"));
        assert_eq!(classifier.classify("zona 3").fee, Money::from_quetzales(10));
    }

    #[test]
    fn test_blank_gazetteer_entries_are_ignored() {
        let classifier = ShippingClassifier::new(ShippingRules {
            local_zones: vec!["  ".to_string()],
            ..ShippingRules::default()
        });
        assert!(classifier.classify("Antigua").requires_courier);
    }

    #[test]
    fn test_delivery_method_round_trips_storage_name() {
        for method in [DeliveryMethod::LocalDelivery, DeliveryMethod::Courier] {
            assert_eq!(DeliveryMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(DeliveryMethod::parse("drone"), None);
    }
}
