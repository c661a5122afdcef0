//! Order records.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shipping::{DeliveryMethod, ShippingClassification};

use super::{CreateOrder, OrderStatus};

/// Catalog product as seen by order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

/// Whether the parcel goes to the customer's door or waits at a courier branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    #[default]
    HomeDelivery,
    PickupAtBranch,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::HomeDelivery => "home_delivery",
            DeliveryType::PickupAtBranch => "pickup_at_branch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home_delivery" => Some(DeliveryType::HomeDelivery),
            "pickup_at_branch" => Some(DeliveryType::PickupAtBranch),
            _ => None,
        }
    }
}

/// Customer contact data captured with the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Where and how the order is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub address: String,
    pub municipality: String,
    pub department: Option<String>,
    pub delivery_type: DeliveryType,
    pub pickup_branch: Option<String>,
    pub notes: Option<String>,
    pub method: DeliveryMethod,
    pub requires_courier: bool,
}

/// One product line of an order.
///
/// `product_name` and `unit_price` are snapshots taken when the order was
/// placed. They are never re-read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    /// Snapshots a product at its current name and price.
    pub fn snapshot(product: &Product, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: product.id,
            product_name: product.name.clone(),
            quantity,
            unit_price: product.price,
            created_at: Utc::now(),
        }
    }

    /// Returns `unit_price × quantity`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A customer's committed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub status: OrderStatus,
    pub customer: CustomerContact,
    pub shipping: ShippingDetails,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub payment_session_id: Option<String>,
    pub payment_session_url: Option<String>,
    pub tracking_number: Option<String>,
    pub label_url: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order from a validated command, its shipping
    /// classification and the priced item snapshots.
    ///
    /// Subtotal and total are always derived here, never taken from input.
    pub fn pending(
        cmd: &CreateOrder,
        classification: &ShippingClassification,
        items: Vec<OrderItem>,
    ) -> Self {
        let subtotal: Money = items.iter().map(OrderItem::line_total).sum();
        let shipping_fee = classification.fee;
        let now = Utc::now();

        Self {
            id: OrderId::new(),
            user_id: cmd.user_id,
            status: OrderStatus::Pending,
            customer: cmd.customer.clone(),
            shipping: ShippingDetails {
                address: cmd.shipping.address.clone(),
                municipality: cmd.shipping.municipality.clone(),
                department: cmd.shipping.department.clone(),
                delivery_type: cmd.shipping.delivery_type,
                pickup_branch: cmd.shipping.pickup_branch.clone(),
                notes: cmd.shipping.notes.clone(),
                method: classification.method,
                requires_courier: classification.requires_courier,
            },
            subtotal,
            shipping_fee,
            total: subtotal + shipping_fee,
            payment_session_id: None,
            payment_session_url: None,
            tracking_number: None,
            label_url: None,
            items,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the pricing invariants hold.
    pub fn totals_are_consistent(&self) -> bool {
        let items_sum: Money = self.items.iter().map(OrderItem::line_total).sum();
        self.subtotal == items_sum && self.total == self.subtotal + self.shipping_fee
    }

    /// Returns the total number of units across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true once a checkout session has been attached.
    pub fn has_payment_session(&self) -> bool {
        self.payment_session_id.is_some()
    }

    /// Returns true once a courier label has been attached.
    pub fn has_tracking(&self) -> bool {
        self.tracking_number.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{LineItemRequest, ShippingRequest};
    use crate::shipping::ShippingClassifier;

    fn product(id: i64, name: &str, cents: i64) -> Product {
        Product {
            id: ProductId::new(id),
            name: name.to_string(),
            price: Money::from_cents(cents),
            stock: 10,
        }
    }

    fn command(municipality: &str) -> CreateOrder {
        CreateOrder {
            user_id: None,
            customer: CustomerContact {
                name: "Ana López".to_string(),
                email: "ana@example.com".to_string(),
                phone: "+502 5555 0000".to_string(),
            },
            shipping: ShippingRequest {
                address: "4a Calle 5-10 Zona 1".to_string(),
                municipality: municipality.to_string(),
                department: Some("Guatemala".to_string()),
                delivery_type: DeliveryType::HomeDelivery,
                pickup_branch: None,
                notes: None,
            },
            items: vec![
                LineItemRequest::new(ProductId::new(1), 2),
                LineItemRequest::new(ProductId::new(2), 1),
            ],
        }
    }

    #[test]
    fn test_order_item_snapshot_copies_name_and_price() {
        let item = OrderItem::snapshot(&product(1, "Blusa", 1000), 3);
        assert_eq!(item.product_name, "Blusa");
        assert_eq!(item.unit_price, Money::from_cents(1000));
        assert_eq!(item.line_total(), Money::from_cents(3000));
    }

    #[test]
    fn test_pending_order_totals() {
        let classifier = ShippingClassifier::default();
        let cmd = command("Mixco");
        let classification = classifier.classify(&cmd.shipping.municipality);
        let items = vec![
            OrderItem::snapshot(&product(1, "Blusa", 1000), 2),
            OrderItem::snapshot(&product(2, "Bolsa", 500), 1),
        ];

        let order = Order::pending(&cmd, &classification, items);

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal, Money::from_cents(2500));
        assert_eq!(order.shipping_fee, Money::from_cents(3600));
        assert_eq!(order.total, Money::from_cents(6100));
        assert!(order.shipping.requires_courier);
        assert_eq!(order.total_quantity(), 3);
        assert!(order.totals_are_consistent());
        assert!(!order.has_payment_session());
        assert!(!order.has_tracking());
    }

    #[test]
    fn test_local_order_has_no_fee() {
        let classifier = ShippingClassifier::default();
        let cmd = command("Chiantla");
        let classification = classifier.classify(&cmd.shipping.municipality);
        let order = Order::pending(
            &cmd,
            &classification,
            vec![OrderItem::snapshot(&product(1, "Blusa", 1000), 1)],
        );

        assert_eq!(order.total, order.subtotal);
        assert_eq!(order.shipping.method, DeliveryMethod::LocalDelivery);
    }

    #[test]
    fn test_tampered_totals_are_detected() {
        let classifier = ShippingClassifier::default();
        let cmd = command("Mixco");
        let classification = classifier.classify(&cmd.shipping.municipality);
        let mut order = Order::pending(
            &cmd,
            &classification,
            vec![OrderItem::snapshot(&product(1, "Blusa", 1000), 1)],
        );
        order.total = Money::from_cents(1);
        assert!(!order.totals_are_consistent());
    }

    #[test]
    fn test_delivery_type_storage_names() {
        assert_eq!(
            DeliveryType::parse("pickup_at_branch"),
            Some(DeliveryType::PickupAtBranch)
        );
        assert_eq!(DeliveryType::HomeDelivery.as_str(), "home_delivery");
        assert_eq!(DeliveryType::parse("mail"), None);
    }
}
