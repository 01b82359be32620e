//! Payment gateway seam. Order code only sees [`PaymentGateway`]; the mock below
//! stands in for a real provider client.

use std::{fmt, str::FromStr, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            other => Err(format!("{other} is not a valid payment method")),
        }
    }
}

/// What the gateway reports back for a charge attempt.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub success: bool,
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` using `method`. `Err` means the gateway could not be reached;
    /// a declined charge is an `Ok` receipt with `success == false`.
    fn process_payment(
        &self,
        amount: f64,
        method: PaymentMethod,
    ) -> BoxFuture<'_, Result<PaymentReceipt>>;
}

/// Simulated gateway: waits a fixed delay, then approves every charge.
#[derive(Debug, Clone)]
pub struct MockPaymentGateway {
    delay: Duration,
}

impl MockPaymentGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn process_payment(
        &self,
        amount: f64,
        method: PaymentMethod,
    ) -> BoxFuture<'_, Result<PaymentReceipt>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;

            let receipt = PaymentReceipt {
                success: true,
                transaction_id: format!("TXN-{}", Uuid::new_v4().simple()),
                method,
                amount,
                timestamp: Utc::now(),
            };
            info!(
                "Mock payment {} approved: {:.2} via {}",
                receipt.transaction_id, amount, method
            );

            Ok(receipt)
        })
    }
}
