//! Payments: local records and one-off charges
//!
//! A `PaymentRecord` mirrors one gateway charge. Records are created by an
//! explicit charge or by the webhook router on first sight of a gateway
//! payment id, and are only ever logically deleted (status `Deleted`).

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::AsaasClient;
use crate::customers::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::external_ref::ExternalRef;
use crate::store::{BillingStore, PaymentStore};
use crate::types::{BillingType, Discount, Fine, Interest, PaymentStatus, Split};

/// A single charge as persisted locally.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    /// Local subscription this charge belongs to, when any.
    pub subscription_id: Option<Uuid>,
    pub gateway_id: String,
    pub billing_type: BillingType,
    pub status: PaymentStatus,
    pub value: Decimal,
    /// Value after gateway fees.
    pub net_value: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub confirmed_date: Option<NaiveDate>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub invoice_url: Option<String>,
    pub bank_slip_url: Option<String>,
    /// Base64 QR image for PIX charges.
    pub pix_qr_code: Option<String>,
    /// PIX copy-and-paste code.
    pub pix_copy_paste: Option<String>,
    pub description: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(gateway_id: impl Into<String>, value: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            subscription_id: None,
            gateway_id: gateway_id.into(),
            billing_type: BillingType::Undefined,
            status: PaymentStatus::Pending,
            value,
            net_value: None,
            due_date: None,
            payment_date: None,
            confirmed_date: None,
            refunded_at: None,
            invoice_url: None,
            bank_slip_url: None,
            pix_qr_code: None,
            pix_copy_paste: None,
            description: None,
            metadata: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Settled states: money arrived or the gateway confirmed it will.
    pub fn is_paid(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Received | PaymentStatus::Confirmed | PaymentStatus::ReceivedInCash
        )
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn is_overdue(&self) -> bool {
        self.status == PaymentStatus::Overdue
    }

    /// Either signal counts; the two must agree eventually.
    pub fn is_refunded(&self) -> bool {
        self.status == PaymentStatus::Refunded || self.refunded_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.status == PaymentStatus::Deleted
    }

    pub fn is_pix(&self) -> bool {
        self.billing_type == BillingType::Pix
    }

    pub fn is_boleto(&self) -> bool {
        self.billing_type == BillingType::Boleto
    }

    pub fn is_credit_card(&self) -> bool {
        self.billing_type == BillingType::CreditCard
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// PIX QR data as the gateway reports it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PixQrCode {
    pub encoded_image: Option<String>,
    pub payload: Option<String>,
}

/// Payment object as it appears in gateway responses and webhook payloads.
/// Every field is optional; events carry only what changed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayPayment {
    pub id: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub status: Option<PaymentStatus>,
    pub billing_type: Option<BillingType>,
    pub value: Option<Decimal>,
    pub net_value: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub client_payment_date: Option<NaiveDate>,
    pub confirmed_date: Option<NaiveDate>,
    pub invoice_url: Option<String>,
    pub bank_slip_url: Option<String>,
    pub pix_qr_code: Option<PixQrCode>,
    pub external_reference: Option<String>,
    pub description: Option<String>,
}

impl GatewayPayment {
    /// Full field resync: overwrite every record field the gateway reported.
    pub fn apply_to(&self, record: &mut PaymentRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(billing_type) = self.billing_type {
            record.billing_type = billing_type;
        }
        if let Some(value) = self.value {
            record.value = value;
        }
        if self.net_value.is_some() {
            record.net_value = self.net_value;
        }
        if self.due_date.is_some() {
            record.due_date = self.due_date;
        }
        if self.payment_date.is_some() {
            record.payment_date = self.payment_date;
        }
        if self.confirmed_date.is_some() {
            record.confirmed_date = self.confirmed_date;
        }
        if self.invoice_url.is_some() {
            record.invoice_url = self.invoice_url.clone();
        }
        if self.bank_slip_url.is_some() {
            record.bank_slip_url = self.bank_slip_url.clone();
        }
        if let Some(qr) = &self.pix_qr_code {
            if qr.encoded_image.is_some() {
                record.pix_qr_code = qr.encoded_image.clone();
            }
            if qr.payload.is_some() {
                record.pix_copy_paste = qr.payload.clone();
            }
        }
        if self.description.is_some() {
            record.description = self.description.clone();
        }
        record.touch();
    }
}

/// Parameters for a one-off charge.
#[derive(Debug, Clone)]
pub struct ChargeParams {
    pub billing_type: BillingType,
    pub value: Decimal,
    pub due_date: NaiveDate,
    pub description: Option<String>,
    /// Split a detached charge into N installments of `value / N`.
    pub installment_count: Option<u32>,
    pub discount: Option<Discount>,
    pub interest: Option<Interest>,
    pub fine: Option<Fine>,
    pub splits: Vec<Split>,
    pub metadata: Value,
}

impl ChargeParams {
    pub fn new(billing_type: BillingType, value: Decimal, due_date: NaiveDate) -> Self {
        Self {
            billing_type,
            value,
            due_date,
            description: None,
            installment_count: None,
            discount: None,
            interest: None,
            fine: None,
            splits: Vec::new(),
            metadata: Value::Null,
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    client: AsaasClient,
    store: Arc<dyn BillingStore>,
    customers: CustomerService,
}

impl PaymentService {
    pub fn new(client: AsaasClient, store: Arc<dyn BillingStore>) -> Self {
        let customers = CustomerService::new(client.clone(), store.clone());
        Self {
            client,
            store,
            customers,
        }
    }

    /// Issue a one-off charge for an owner, creating the gateway customer
    /// first when absent, and persist the resulting record.
    pub async fn charge(&self, owner_id: Uuid, params: ChargeParams) -> BillingResult<PaymentRecord> {
        let customer_id = self.customers.ensure_gateway_customer(owner_id).await?;

        let mut payload = json!({
            "customer": customer_id,
            "billingType": params.billing_type,
            "value": params.value,
            "dueDate": params.due_date,
            "externalReference": ExternalRef::for_owner(owner_id).encode(),
        });
        if let Some(map) = payload.as_object_mut() {
            if let Some(description) = &params.description {
                map.insert("description".to_string(), json!(description));
            }
            if let Some(count) = params.installment_count {
                map.insert("installmentCount".to_string(), json!(count));
                map.insert("totalValue".to_string(), json!(params.value));
            }
            if let Some(discount) = &params.discount {
                map.insert("discount".to_string(), json!(discount));
            }
            if let Some(interest) = &params.interest {
                map.insert("interest".to_string(), json!(interest));
            }
            if let Some(fine) = &params.fine {
                map.insert("fine".to_string(), json!(fine));
            }
            if !params.splits.is_empty() {
                map.insert("split".to_string(), json!(params.splits));
            }
        }

        let response = self.client.create_payment(&payload).await?;
        let gateway: GatewayPayment = serde_json::from_value(response.clone())
            .map_err(|e| BillingError::Storage(format!("undecodable payment response: {e}")))?;
        let gateway_id = gateway
            .id
            .clone()
            .ok_or_else(|| BillingError::Storage("gateway payment response without id".into()))?;

        let mut record = PaymentRecord::new(gateway_id, params.value);
        record.owner_id = Some(owner_id);
        record.billing_type = params.billing_type;
        record.due_date = Some(params.due_date);
        record.description = params.description.clone();
        record.metadata = params.metadata.clone();
        gateway.apply_to(&mut record);
        self.store.insert_payment(&record).await?;

        tracing::info!(
            owner_id = %owner_id,
            gateway_payment_id = %record.gateway_id,
            billing_type = record.billing_type.as_str(),
            "Charge created"
        );
        Ok(record)
    }

    /// Refund a charge, fully or partially, and stamp the local record.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        value: Option<Decimal>,
    ) -> BillingResult<PaymentRecord> {
        let mut record = self.require(payment_id).await?;
        let payload = match value {
            Some(value) => json!({ "value": value }),
            None => json!({}),
        };
        let response = self.client.refund_payment(&record.gateway_id, &payload).await?;

        let gateway: GatewayPayment = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable refund response: {e}")))?;
        gateway.apply_to(&mut record);
        record.refunded_at = Some(Utc::now());
        self.store.update_payment(&record).await?;

        tracing::info!(
            gateway_payment_id = %record.gateway_id,
            value = ?value,
            "Payment refunded"
        );
        Ok(record)
    }

    /// Logical delete: the gateway removes the charge, locally the record
    /// survives with a `Deleted` status.
    pub async fn delete(&self, payment_id: Uuid) -> BillingResult<PaymentRecord> {
        let mut record = self.require(payment_id).await?;
        self.client.delete_payment(&record.gateway_id).await?;
        record.status = PaymentStatus::Deleted;
        record.touch();
        self.store.update_payment(&record).await?;
        Ok(record)
    }

    pub async fn restore(&self, payment_id: Uuid) -> BillingResult<PaymentRecord> {
        let mut record = self.require(payment_id).await?;
        let response = self.client.restore_payment(&record.gateway_id).await?;
        let gateway: GatewayPayment = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable restore response: {e}")))?;
        record.status = PaymentStatus::Pending;
        gateway.apply_to(&mut record);
        self.store.update_payment(&record).await?;
        Ok(record)
    }

    /// Fetch PIX QR artifacts for a charge and store them on the record.
    pub async fn pix_qr(&self, payment_id: Uuid) -> BillingResult<PaymentRecord> {
        let mut record = self.require(payment_id).await?;
        let response = self.client.payment_pix_qr_code(&record.gateway_id).await?;
        let qr: PixQrCode = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable pix qr response: {e}")))?;
        if qr.encoded_image.is_some() {
            record.pix_qr_code = qr.encoded_image;
        }
        if qr.payload.is_some() {
            record.pix_copy_paste = qr.payload;
        }
        record.touch();
        self.store.update_payment(&record).await?;
        Ok(record)
    }

    /// Boleto digitable line for a charge.
    pub async fn identification_field(&self, payment_id: Uuid) -> BillingResult<String> {
        let record = self.require(payment_id).await?;
        let response = self
            .client
            .payment_identification_field(&record.gateway_id)
            .await?;
        response
            .get("identificationField")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                BillingError::Storage("identification field response without field".into())
            })
    }

    pub async fn find(&self, payment_id: Uuid) -> BillingResult<Option<PaymentRecord>> {
        self.store.find_payment(payment_id).await
    }

    pub async fn for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<PaymentRecord>> {
        self.store.payments_for_owner(owner_id).await
    }

    async fn require(&self, payment_id: Uuid) -> BillingResult<PaymentRecord> {
        self.store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("payment", payment_id.to_string()))
    }
}
