//! Cart validation for order creation.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    app_error::AppError,
    models::MenuItemEntity,
    payment::{PaymentGateway, PaymentMethod, PaymentReceipt},
    snapshot::hash_item_snapshot,
};

/// One line of a customer's cart as submitted with the order.
#[derive(Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub item_id: Uuid,
    pub quantity: i32,
    /// Snapshot hash the client received with the menu.
    pub version_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrozenLine {
    pub name: String,
    pub price: f64,
    pub quantity: i32,
    pub is_veg: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrozenCart {
    pub lines: Vec<FrozenLine>,
    pub total_amount: f64,
}

/// Checks every cart line against the live menu, in order, stopping at the first bad line.
pub fn freeze_cart(
    lines: &[CartLine],
    vendor_id: Uuid,
    menu: &HashMap<Uuid, MenuItemEntity>,
) -> Result<FrozenCart, AppError> {
    if lines.is_empty() {
        return Err(AppError::BadRequest("items must be a non-empty list".into()));
    }

    let mut frozen = Vec::with_capacity(lines.len());
    let mut total_amount = 0.0;

    for line in lines {
        if line.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "Quantity for item {} must be at least 1",
                line.item_id
            )));
        }

        let item = match menu.get(&line.item_id) {
            Some(item) if item.is_available => item,
            _ => {
                warn!("Cart line {} is missing or unavailable", line.item_id);
                return Err(AppError::MenuStale(format!(
                    "item {} is no longer available",
                    line.item_id
                )));
            }
        };

        if item.vendor_id != vendor_id {
            return Err(AppError::BadRequest(format!(
                "Item {} does not belong to vendor {}",
                line.item_id, vendor_id
            )));
        }

        if hash_item_snapshot(item) != line.version_hash {
            warn!("Cart line {} carries a stale snapshot hash", line.item_id);
            return Err(AppError::MenuStale(format!(
                "item {} has changed",
                line.item_id
            )));
        }

        total_amount += item.price * f64::from(line.quantity);
        frozen.push(FrozenLine {
            name: item.name.clone(),
            price: item.price,
            quantity: line.quantity,
            is_veg: item.is_veg,
        });
    }

    Ok(FrozenCart {
        lines: frozen,
        total_amount,
    })
}

/// Charges the cart total, turning a declined receipt into `PaymentFailed`.
pub async fn charge(
    gateway: &dyn PaymentGateway,
    amount: f64,
    method: PaymentMethod,
) -> Result<PaymentReceipt, AppError> {
    let receipt = gateway.process_payment(amount, method).await?;

    if !receipt.success {
        warn!("Payment {} declined", receipt.transaction_id);
        return Err(AppError::PaymentFailed(format!(
            "transaction {} was declined",
            receipt.transaction_id
        )));
    }

    Ok(receipt)
}
