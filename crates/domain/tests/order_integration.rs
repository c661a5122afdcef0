//! Integration tests for the order model.
//!
//! These tests exercise the public domain API end to end: validating a
//! command, classifying its destination, snapshotting items and walking the
//! resulting order through its status lifecycle.

use domain::{
    CreateOrder, CustomerContact, DeliveryMethod, DeliveryType, LineItemRequest, Money, Order,
    OrderError, OrderItem, OrderStatus, Product, ProductId, ShippingClassifier, ShippingRequest,
};

fn product(id: i64, name: &str, cents: i64) -> Product {
    Product {
        id: ProductId::new(id),
        name: name.to_string(),
        price: Money::from_cents(cents),
        stock: 5,
    }
}

fn command(municipality: &str) -> CreateOrder {
    CreateOrder {
        user_id: None,
        customer: CustomerContact {
            name: "María Pérez".to_string(),
            email: "maria@example.com".to_string(),
            phone: "4444-1111".to_string(),
        },
        shipping: ShippingRequest {
            address: "Avenida Reforma 10-00".to_string(),
            municipality: municipality.to_string(),
            department: None,
            delivery_type: DeliveryType::HomeDelivery,
            pickup_branch: None,
            notes: Some("Tocar el timbre".to_string()),
        },
        items: vec![
            LineItemRequest::new(ProductId::new(1), 2),
            LineItemRequest::new(ProductId::new(2), 1),
        ],
    }
}

fn place(municipality: &str) -> Order {
    let cmd = command(municipality);
    cmd.validate().unwrap();
    let classification = ShippingClassifier::default().classify(&cmd.shipping.municipality);
    let items = vec![
        OrderItem::snapshot(&product(1, "Huipil", 1000), 2),
        OrderItem::snapshot(&product(2, "Faja", 500), 1),
    ];
    Order::pending(&cmd, &classification, items)
}

mod pricing {
    use super::*;

    #[test]
    fn national_order_end_to_end_totals() {
        let order = place("Quetzaltenango");

        assert_eq!(order.subtotal, Money::from_cents(2500));
        assert_eq!(order.shipping_fee, Money::from_cents(3600));
        assert_eq!(order.total, Money::from_cents(6100));
        assert!(order.shipping.requires_courier);
        assert_eq!(order.shipping.method, DeliveryMethod::Courier);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.totals_are_consistent());
    }

    #[test]
    fn local_order_is_free_and_needs_no_courier() {
        let order = place("Chiantla, Huehuetenango");

        assert_eq!(order.shipping_fee, Money::zero());
        assert_eq!(order.total, order.subtotal);
        assert!(!order.shipping.requires_courier);
    }

    #[test]
    fn snapshots_do_not_follow_catalog_changes() {
        let mut catalog = product(1, "Huipil", 1000);
        let item = OrderItem::snapshot(&catalog, 1);

        catalog.name = "Huipil bordado".to_string();
        catalog.price = Money::from_cents(9999);

        assert_eq!(item.product_name, "Huipil");
        assert_eq!(item.unit_price, Money::from_cents(1000));
    }

    #[test]
    fn orders_get_distinct_ids() {
        assert_ne!(place("Mixco").id, place("Mixco").id);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn full_happy_path() {
        let mut status = place("Mixco").status;
        for next in [
            OrderStatus::Processing,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            status = status.transition_to(next).unwrap();
        }
        assert_eq!(status, OrderStatus::Delivered);
        assert!(status.is_terminal());
    }

    #[test]
    fn delivered_cannot_go_back_to_pending() {
        let result = OrderStatus::Delivered.transition_to(OrderStatus::Pending);
        assert!(matches!(
            result,
            Err(OrderError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn pending_can_be_cancelled_and_then_nothing() {
        let cancelled = OrderStatus::Pending
            .transition_to(OrderStatus::Cancelled)
            .unwrap();
        for next in OrderStatus::ALL {
            assert!(cancelled.transition_to(next).is_err());
        }
    }

    #[test]
    fn unknown_status_names_are_rejected_at_parse_time() {
        assert!(matches!(
            "returned".parse::<OrderStatus>(),
            Err(OrderError::UnknownStatus(_))
        ));
    }
}
