//! Order commands and their input validation.

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{CustomerContact, DeliveryType, OrderError};

/// Minimum length of a street address for home delivery.
pub const MIN_ADDRESS_LEN: usize = 10;

/// A requested product line. Carries no price: prices come from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl LineItemRequest {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Destination data supplied by the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRequest {
    pub address: String,
    pub municipality: String,
    pub department: Option<String>,
    pub delivery_type: DeliveryType,
    pub pickup_branch: Option<String>,
    pub notes: Option<String>,
}

/// Command to turn a cart into an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    /// Owning account, if the customer is signed in.
    pub user_id: Option<UserId>,
    pub customer: CustomerContact,
    pub shipping: ShippingRequest,
    pub items: Vec<LineItemRequest>,
}

impl CreateOrder {
    /// Checks the command shape. Never touches the datastore.
    pub fn validate(&self) -> Result<(), OrderError> {
        require("customer_name", &self.customer.name)?;
        require("customer_email", &self.customer.email)?;
        if !is_plausible_email(self.customer.email.trim()) {
            return Err(OrderError::InvalidEmail(self.customer.email.clone()));
        }
        require("customer_phone", &self.customer.phone)?;
        require("shipping_municipality", &self.shipping.municipality)?;

        match self.shipping.delivery_type {
            DeliveryType::HomeDelivery => {
                if self.shipping.address.trim().chars().count() < MIN_ADDRESS_LEN {
                    return Err(OrderError::AddressTooShort {
                        min: MIN_ADDRESS_LEN,
                    });
                }
            }
            DeliveryType::PickupAtBranch => {
                let branch = self.shipping.pickup_branch.as_deref().unwrap_or("");
                if branch.trim().is_empty() {
                    return Err(OrderError::PickupBranchRequired);
                }
            }
        }

        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(line) = self.items.iter().find(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }

        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), OrderError> {
    if value.trim().is_empty() {
        Err(OrderError::MissingField(field))
    } else {
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CreateOrder {
        CreateOrder {
            user_id: Some(UserId::new()),
            customer: CustomerContact {
                name: "Ana López".to_string(),
                email: "ana@example.com".to_string(),
                phone: "5555-0000".to_string(),
            },
            shipping: ShippingRequest {
                address: "4a Calle 5-10 Zona 1".to_string(),
                municipality: "Huehuetenango".to_string(),
                department: None,
                delivery_type: DeliveryType::HomeDelivery,
                pickup_branch: None,
                notes: None,
            },
            items: vec![LineItemRequest::new(ProductId::new(1), 1)],
        }
    }

    #[test]
    fn test_valid_command_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_fields() {
        let mut cmd = valid();
        cmd.customer.name = "  ".to_string();
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::MissingField("customer_name"))
        ));

        let mut cmd = valid();
        cmd.customer.phone.clear();
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::MissingField("customer_phone"))
        ));

        let mut cmd = valid();
        cmd.shipping.municipality.clear();
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::MissingField("shipping_municipality"))
        ));
    }

    #[test]
    fn test_invalid_email() {
        for email in ["ana", "ana@", "@example.com", "ana@example", "a b@example.com"] {
            let mut cmd = valid();
            cmd.customer.email = email.to_string();
            assert!(
                matches!(cmd.validate(), Err(OrderError::InvalidEmail(_))),
                "{email}"
            );
        }
    }

    #[test]
    fn test_home_delivery_needs_full_address() {
        let mut cmd = valid();
        cmd.shipping.address = "Zona 1".to_string();
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::AddressTooShort { min: MIN_ADDRESS_LEN })
        ));
    }

    #[test]
    fn test_pickup_needs_branch_but_not_address() {
        let mut cmd = valid();
        cmd.shipping.delivery_type = DeliveryType::PickupAtBranch;
        cmd.shipping.address.clear();
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::PickupBranchRequired)
        ));

        cmd.shipping.pickup_branch = Some("Sucursal Zona 4".to_string());
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_items_required_and_positive() {
        let mut cmd = valid();
        cmd.items.clear();
        assert!(matches!(cmd.validate(), Err(OrderError::NoItems)));

        let mut cmd = valid();
        cmd.items.push(LineItemRequest::new(ProductId::new(7), 0));
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
    }
}
