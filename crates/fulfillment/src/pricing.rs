//! Pricing and stock validation inside an open order transaction.

use std::collections::BTreeMap;

use domain::{LineItemRequest, Money, OrderItem, ProductId};
use order_store::OrderTransaction;

use crate::error::Result;

/// Item snapshots priced from the catalog, with their subtotal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedItems {
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
}

/// Decrements stock for every product and snapshots it as it was.
///
/// Lines for the same product are decremented together, and products are
/// locked in ascending id order so concurrent orders never wait on each
/// other in a cycle. Items keep request order. Prices come only from the
/// store. The first failing product aborts; the caller drops the
/// transaction so earlier decrements are rolled back.
pub async fn price_items(
    tx: &mut dyn OrderTransaction,
    lines: &[LineItemRequest],
) -> Result<PricedItems> {
    let mut requested: BTreeMap<ProductId, u32> = BTreeMap::new();
    for line in lines {
        let total = requested.entry(line.product_id).or_default();
        // No stock level reaches u32::MAX, so saturating still fails the decrement.
        *total = total.saturating_add(line.quantity);
    }

    let mut products = BTreeMap::new();
    for (product_id, quantity) in requested {
        let product = tx.decrement_stock(product_id, quantity).await?;
        products.insert(product_id, product);
    }

    let mut items = Vec::with_capacity(lines.len());
    let mut subtotal = Money::zero();
    for line in lines {
        let Some(product) = products.get(&line.product_id) else {
            continue;
        };
        let item = OrderItem::snapshot(product, line.quantity);
        subtotal += item.line_total();
        items.push(item);
    }

    Ok(PricedItems { items, subtotal })
}
