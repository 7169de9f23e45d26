//! Shared gateway wire types
//!
//! Serde representations match the gateway's SCREAMING_SNAKE_CASE constants.
//! Status enums keep an `Unknown` catch-all so a new gateway constant never
//! breaks webhook decoding.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment method for a charge or subscription.
///
/// `Undefined` means "let the customer choose" on the gateway's hosted pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingType {
    #[default]
    Undefined,
    Boleto,
    CreditCard,
    Pix,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Undefined => "UNDEFINED",
            BillingType::Boleto => "BOLETO",
            BillingType::CreditCard => "CREDIT_CARD",
            BillingType::Pix => "PIX",
        }
    }
}

/// Billing period for recurring charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cycle {
    Weekly,
    Biweekly,
    #[default]
    Monthly,
    Quarterly,
    Semiannually,
    Yearly,
}

impl Cycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cycle::Weekly => "WEEKLY",
            Cycle::Biweekly => "BIWEEKLY",
            Cycle::Monthly => "MONTHLY",
            Cycle::Quarterly => "QUARTERLY",
            Cycle::Semiannually => "SEMIANNUALLY",
            Cycle::Yearly => "YEARLY",
        }
    }
}

/// Gateway-reported payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Received,
    Confirmed,
    Overdue,
    Refunded,
    RefundRequested,
    ReceivedInCash,
    ChargebackRequested,
    AwaitingRiskAnalysis,
    Deleted,
    #[serde(other)]
    Unknown,
}

/// Gateway-reported subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Inactive,
    Expired,
    #[serde(other)]
    Unknown,
}

/// Fiscal invoice workflow status. Transitions are one-directional at the
/// gateway; locally we apply whatever the event stream reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    #[default]
    Scheduled,
    Synchronized,
    Authorized,
    Canceled,
    Error,
    ProcessingCancellation,
    CancellationDenied,
    #[serde(other)]
    Unknown,
}

/// Shape of a hosted-checkout charge. Exactly one is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    /// Single one-time charge.
    #[default]
    Detached,
    Installment,
    Recurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    Fixed,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub value: Decimal,
    pub due_date_limit_days: i64,
    #[serde(rename = "type")]
    pub kind: DiscountKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interest {
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fine {
    pub value: Decimal,
}

/// Revenue-split entry: a wallet receives either a fixed amount or a
/// percentage of each charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub wallet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentual_value: Option<Decimal>,
}

impl Split {
    pub fn fixed(wallet_id: impl Into<String>, value: Decimal) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            fixed_value: Some(value),
            percentual_value: None,
        }
    }

    pub fn percentual(wallet_id: impl Into<String>, value: Decimal) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            fixed_value: None,
            percentual_value: Some(value),
        }
    }
}

/// Raw card data for direct credit-card subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCard {
    pub holder_name: String,
    pub number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub ccv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCardHolderInfo {
    pub name: String,
    pub email: String,
    pub cpf_cnpj: String,
    pub postal_code: String,
    pub address_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_complement: Option<String>,
    pub phone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_type_serializes_as_gateway_constant() {
        assert_eq!(
            serde_json::to_value(BillingType::CreditCard).unwrap(),
            serde_json::json!("CREDIT_CARD")
        );
        assert_eq!(BillingType::Pix.as_str(), "PIX");
    }

    #[test]
    fn unknown_payment_status_does_not_fail_decoding() {
        let status: PaymentStatus = serde_json::from_value(serde_json::json!("DUNNING_REQUESTED")).unwrap();
        assert_eq!(status, PaymentStatus::Unknown);
    }

    #[test]
    fn split_serializes_only_the_set_amount() {
        let split = Split::percentual("wal_1", Decimal::new(125, 1));
        let value = serde_json::to_value(&split).unwrap();
        assert!(value.get("fixedValue").is_none());
        assert_eq!(value["percentualValue"], serde_json::json!(12.5));
    }
}
