//! Menu snapshot fingerprints.
//!
//! A fingerprint covers exactly `name`, `price`, `isVeg` and `isAvailable`, serialized
//! as compact JSON with that fixed key order and hashed with SHA-256. Clients store the
//! hex digest next to each cart line; order creation recomputes it from the live menu
//! and rejects the line when the two differ.

use serde::Serialize;
use serde_json::Number;
use sha2::{Digest, Sha256};

use crate::models::MenuItemEntity;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Fingerprint<'a> {
    name: &'a str,
    price: Number,
    is_veg: bool,
    is_available: bool,
}

/// Hex-encoded SHA-256 over the price-relevant fields of a menu item.
pub fn hash_item_snapshot(item: &MenuItemEntity) -> String {
    fingerprint(&item.name, item.price, item.is_veg, item.is_available)
}

fn fingerprint(name: &str, price: f64, is_veg: bool, is_available: bool) -> String {
    let canonical = serde_json::to_vec(&Fingerprint {
        name,
        price: js_number(price),
        is_veg,
        is_available,
    })
    .unwrap_or_default();

    format!("{:x}", Sha256::digest(&canonical))
}

/// Formats a price the way a JavaScript client does: `100` rather than `100.0`.
fn js_number(value: f64) -> Number {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        Number::from(value as i64)
    } else {
        // Non-finite prices cannot be stored in menu_items.
        Number::from_f64(value).unwrap_or_else(|| Number::from(0))
    }
}
