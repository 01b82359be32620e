//! Order status machine.
//!
//! ```text
//! pending ─► accepted ─► preparing ─► ready ─► delivered            (vendor)
//!    │           │            │          │
//!    └───────────┴────────────┴──────────┴─► cancelled              (vendor)
//!
//! ready ─► out_for_delivery ─► picked_up ─► on_the_way ─► delivered (delivery staff)
//! ```
//!
//! Both actors may skip forward along their own path, never back. `delivered` and
//! `cancelled` are terminal.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app_error::AppError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    Ready,
    OutForDelivery,
    PickedUp,
    OnTheWay,
    Delivered,
    Cancelled,
}

/// Who is moving the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Vendor,
    DeliveryStaff,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OutForDelivery,
        OrderStatus::PickedUp,
        OrderStatus::OnTheWay,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Statuses a vendor may write through the status endpoint.
    pub const VENDOR_SETTABLE: [OrderStatus; 5] = [
        OrderStatus::Accepted,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Statuses delivery staff may write through the delivery status endpoint.
    pub const DELIVERY_SETTABLE: [OrderStatus; 3] = [
        OrderStatus::PickedUp,
        OrderStatus::OnTheWay,
        OrderStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::OnTheWay => "on_the_way",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Legal successors of `self` when moved by `actor`.
    pub fn successors(&self, actor: Actor) -> &'static [OrderStatus] {
        use OrderStatus::*;

        match (actor, self) {
            (Actor::Vendor, Pending) => &[Accepted, Preparing, Ready, Cancelled],
            (Actor::Vendor, Accepted) => &[Preparing, Ready, Cancelled],
            (Actor::Vendor, Preparing) => &[Ready, Cancelled],
            (Actor::Vendor, Ready) => &[Delivered, Cancelled],
            (Actor::DeliveryStaff, Ready) => &[OutForDelivery],
            (Actor::DeliveryStaff, OutForDelivery) => &[PickedUp, OnTheWay, Delivered],
            (Actor::DeliveryStaff, PickedUp) => &[OnTheWay, Delivered],
            (Actor::DeliveryStaff, OnTheWay) => &[Delivered],
            _ => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus, actor: Actor) -> bool {
        self.successors(actor).contains(&next)
    }

    /// Validates a move, naming both states on failure.
    pub fn transition(self, next: OrderStatus, actor: Actor) -> Result<OrderStatus, AppError> {
        if self.can_transition_to(next, actor) {
            Ok(next)
        } else {
            Err(AppError::BadRequest(format!(
                "Cannot move order from {} to {}",
                self, next
            )))
        }
    }

    /// Parses `raw` and checks it against `allowed`.
    pub fn parse_one_of(raw: &str, allowed: &[OrderStatus]) -> Result<OrderStatus, AppError> {
        raw.parse::<OrderStatus>()
            .ok()
            .filter(|status| allowed.contains(status))
            .ok_or_else(|| {
                let allowed: Vec<&str> = allowed.iter().map(OrderStatus::as_str).collect();
                AppError::BadRequest(format!(
                    "Invalid status {raw:?}, expected one of: {}",
                    allowed.join(", ")
                ))
            })
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown order status {s:?}"))
    }
}
