//! Fiscal invoices (notas fiscais de serviço)
//!
//! Invoices are scheduled against a payment and then walk a gateway-driven
//! workflow: scheduled, synchronized with the city hall, authorized (or
//! errored), possibly cancelled. Local records track that workflow from the
//! event stream; only scheduling and the authorize/cancel verbs originate
//! here.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::AsaasClient;
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, InvoiceStore, OwnerStore, PaymentStore};
use crate::types::InvoiceStatus;

/// Municipal tax figures attached to an invoice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceTaxes {
    pub retain_iss: bool,
    pub iss: Decimal,
    pub cofins: Decimal,
    pub csll: Decimal,
    pub inss: Decimal,
    pub ir: Decimal,
    pub pis: Decimal,
}

#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    /// Local payment this invoice documents, when known.
    pub payment_id: Option<Uuid>,
    pub gateway_id: String,
    pub status: InvoiceStatus,
    pub service_description: String,
    pub value: Decimal,
    pub deductions: Decimal,
    /// Date the invoice is issued at the city hall.
    pub effective_date: Option<NaiveDate>,
    pub observations: Option<String>,
    pub municipal_service_code: Option<String>,
    pub municipal_service_name: Option<String>,
    pub taxes: InvoiceTaxes,
    /// Invoice number assigned on authorization.
    pub number: Option<String>,
    pub validation_code: Option<String>,
    pub pdf_url: Option<String>,
    pub xml_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    pub fn new(gateway_id: impl Into<String>, value: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            payment_id: None,
            gateway_id: gateway_id.into(),
            status: InvoiceStatus::Scheduled,
            service_description: String::new(),
            value,
            deductions: Decimal::ZERO,
            effective_date: None,
            observations: None,
            municipal_service_code: None,
            municipal_service_name: None,
            taxes: InvoiceTaxes::default(),
            number: None,
            validation_code: None,
            pdf_url: None,
            xml_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.status == InvoiceStatus::Authorized
    }

    pub fn is_canceled(&self) -> bool {
        self.status == InvoiceStatus::Canceled
    }

    /// The city hall rejected the issue; the invoice must be fixed and
    /// re-authorized.
    pub fn is_errored(&self) -> bool {
        self.status == InvoiceStatus::Error
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Invoice object from gateway responses and webhook payloads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayInvoice {
    pub id: Option<String>,
    pub status: Option<InvoiceStatus>,
    pub customer: Option<String>,
    pub payment: Option<String>,
    pub value: Option<Decimal>,
    pub deductions: Option<Decimal>,
    pub effective_date: Option<NaiveDate>,
    pub service_description: Option<String>,
    pub observations: Option<String>,
    pub number: Option<String>,
    pub validation_code: Option<String>,
    pub pdf_url: Option<String>,
    pub xml_url: Option<String>,
    pub municipal_service_code: Option<String>,
    pub municipal_service_name: Option<String>,
    pub taxes: Option<InvoiceTaxes>,
    pub external_reference: Option<String>,
}

impl GatewayInvoice {
    pub fn apply_to(&self, record: &mut InvoiceRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(value) = self.value {
            record.value = value;
        }
        if let Some(deductions) = self.deductions {
            record.deductions = deductions;
        }
        if self.effective_date.is_some() {
            record.effective_date = self.effective_date;
        }
        if let Some(description) = &self.service_description {
            record.service_description = description.clone();
        }
        if self.observations.is_some() {
            record.observations = self.observations.clone();
        }
        if self.number.is_some() {
            record.number = self.number.clone();
        }
        if self.validation_code.is_some() {
            record.validation_code = self.validation_code.clone();
        }
        if self.pdf_url.is_some() {
            record.pdf_url = self.pdf_url.clone();
        }
        if self.xml_url.is_some() {
            record.xml_url = self.xml_url.clone();
        }
        if self.municipal_service_code.is_some() {
            record.municipal_service_code = self.municipal_service_code.clone();
        }
        if self.municipal_service_name.is_some() {
            record.municipal_service_name = self.municipal_service_name.clone();
        }
        if let Some(taxes) = &self.taxes {
            record.taxes = taxes.clone();
        }
        record.touch();
    }
}

/// What to put on a scheduled invoice.
#[derive(Debug, Clone)]
pub struct InvoiceParams {
    pub service_description: String,
    pub value: Decimal,
    pub deductions: Decimal,
    pub effective_date: NaiveDate,
    pub observations: Option<String>,
    pub municipal_service_code: Option<String>,
    pub municipal_service_name: Option<String>,
    pub taxes: InvoiceTaxes,
}

impl InvoiceParams {
    pub fn new(
        service_description: impl Into<String>,
        value: Decimal,
        effective_date: NaiveDate,
    ) -> Self {
        Self {
            service_description: service_description.into(),
            value,
            deductions: Decimal::ZERO,
            effective_date,
            observations: None,
            municipal_service_code: None,
            municipal_service_name: None,
            taxes: InvoiceTaxes::default(),
        }
    }
}

#[derive(Clone)]
pub struct InvoiceService {
    client: AsaasClient,
    store: Arc<dyn BillingStore>,
}

impl InvoiceService {
    pub fn new(client: AsaasClient, store: Arc<dyn BillingStore>) -> Self {
        Self { client, store }
    }

    /// Schedule an invoice for an existing payment.
    pub async fn schedule_for_payment(
        &self,
        payment_id: Uuid,
        params: InvoiceParams,
    ) -> BillingResult<InvoiceRecord> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("payment", payment_id.to_string()))?;
        let record = self
            .schedule(
                json!({ "payment": payment.gateway_id }),
                payment.owner_id,
                Some(payment.id),
                params,
            )
            .await?;
        tracing::info!(
            gateway_invoice_id = %record.gateway_id,
            gateway_payment_id = %payment.gateway_id,
            "Invoice scheduled"
        );
        Ok(record)
    }

    /// Schedule an invoice against the owner's gateway customer directly,
    /// with no payment attached.
    pub async fn schedule_for_owner(
        &self,
        owner_id: Uuid,
        params: InvoiceParams,
    ) -> BillingResult<InvoiceRecord> {
        let owner = self
            .store
            .find_owner(owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(owner_id))?;
        let customer_id = owner
            .gateway_id
            .ok_or(BillingError::MissingGatewayId("owner"))?;
        let record = self
            .schedule(json!({ "customer": customer_id }), Some(owner_id), None, params)
            .await?;
        tracing::info!(
            gateway_invoice_id = %record.gateway_id,
            owner_id = %owner_id,
            "Invoice scheduled"
        );
        Ok(record)
    }

    async fn schedule(
        &self,
        mut payload: Value,
        owner_id: Option<Uuid>,
        payment_id: Option<Uuid>,
        params: InvoiceParams,
    ) -> BillingResult<InvoiceRecord> {
        if params.value <= Decimal::ZERO {
            return Err(BillingError::Validation(
                "invoice value must be positive".to_string(),
            ));
        }
        if params.service_description.trim().is_empty() {
            return Err(BillingError::Validation(
                "invoice requires a service description".to_string(),
            ));
        }

        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "serviceDescription".to_string(),
                json!(params.service_description),
            );
            map.insert("value".to_string(), json!(params.value));
            map.insert("deductions".to_string(), json!(params.deductions));
            map.insert("effectiveDate".to_string(), json!(params.effective_date));
            map.insert("taxes".to_string(), json!(params.taxes));
            if let Some(observations) = &params.observations {
                map.insert("observations".to_string(), json!(observations));
            }
            if let Some(code) = &params.municipal_service_code {
                map.insert("municipalServiceCode".to_string(), json!(code));
            }
            if let Some(name) = &params.municipal_service_name {
                map.insert("municipalServiceName".to_string(), json!(name));
            }
        }

        let response = self.client.schedule_invoice(&payload).await?;
        let gateway: GatewayInvoice = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable invoice response: {e}")))?;
        let gateway_id = gateway
            .id
            .clone()
            .ok_or_else(|| BillingError::Storage("gateway invoice response without id".into()))?;

        let mut record = InvoiceRecord::new(gateway_id, params.value);
        record.owner_id = owner_id;
        record.payment_id = payment_id;
        record.service_description = params.service_description.clone();
        record.deductions = params.deductions;
        record.effective_date = Some(params.effective_date);
        record.observations = params.observations.clone();
        record.municipal_service_code = params.municipal_service_code.clone();
        record.municipal_service_name = params.municipal_service_name.clone();
        record.taxes = params.taxes.clone();
        gateway.apply_to(&mut record);
        self.store.insert_invoice(&record).await?;
        Ok(record)
    }

    /// Ask the city hall to issue the invoice now.
    pub async fn authorize(&self, invoice_id: Uuid) -> BillingResult<InvoiceRecord> {
        let mut record = self.require(invoice_id).await?;
        let response = self.client.authorize_invoice(&record.gateway_id).await?;
        let gateway: GatewayInvoice = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable invoice response: {e}")))?;
        gateway.apply_to(&mut record);
        self.store.update_invoice(&record).await?;
        tracing::info!(gateway_invoice_id = %record.gateway_id, "Invoice authorization requested");
        Ok(record)
    }

    pub async fn cancel(&self, invoice_id: Uuid) -> BillingResult<InvoiceRecord> {
        let mut record = self.require(invoice_id).await?;
        let response = self.client.cancel_invoice(&record.gateway_id).await?;
        let gateway: GatewayInvoice = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable invoice response: {e}")))?;
        gateway.apply_to(&mut record);
        self.store.update_invoice(&record).await?;
        tracing::info!(gateway_invoice_id = %record.gateway_id, "Invoice cancellation requested");
        Ok(record)
    }

    /// Update a still-scheduled invoice.
    pub async fn update(
        &self,
        invoice_id: Uuid,
        params: InvoiceParams,
    ) -> BillingResult<InvoiceRecord> {
        let mut record = self.require(invoice_id).await?;
        if record.status != InvoiceStatus::Scheduled {
            return Err(BillingError::Validation(
                "only scheduled invoices can be updated".to_string(),
            ));
        }
        let payload = json!({
            "serviceDescription": params.service_description,
            "value": params.value,
            "deductions": params.deductions,
            "effectiveDate": params.effective_date,
            "observations": params.observations,
            "taxes": params.taxes,
        });
        let response = self
            .client
            .update_invoice(&record.gateway_id, &payload)
            .await?;
        let gateway: GatewayInvoice = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable invoice response: {e}")))?;
        gateway.apply_to(&mut record);
        self.store.update_invoice(&record).await?;
        Ok(record)
    }

    /// Pull the gateway's view of an invoice and resync the record.
    pub async fn sync(&self, invoice_id: Uuid) -> BillingResult<InvoiceRecord> {
        let mut record = self.require(invoice_id).await?;
        let response = self.client.find_invoice(&record.gateway_id).await?;
        let gateway: GatewayInvoice = serde_json::from_value(response)
            .map_err(|e| BillingError::Storage(format!("undecodable invoice response: {e}")))?;
        gateway.apply_to(&mut record);
        self.store.update_invoice(&record).await?;
        Ok(record)
    }

    pub async fn find(&self, invoice_id: Uuid) -> BillingResult<Option<InvoiceRecord>> {
        self.store.find_invoice(invoice_id).await
    }

    pub async fn for_owner(&self, owner_id: Uuid) -> BillingResult<Vec<InvoiceRecord>> {
        self.store.invoices_for_owner(owner_id).await
    }

    async fn require(&self, invoice_id: Uuid) -> BillingResult<InvoiceRecord> {
        self.store
            .find_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("invoice", invoice_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_predicates_follow_status() {
        let mut invoice = InvoiceRecord::new("inv_1", Decimal::new(15000, 2));
        assert!(!invoice.is_authorized());

        invoice.status = InvoiceStatus::Authorized;
        assert!(invoice.is_authorized());

        invoice.status = InvoiceStatus::Error;
        assert!(invoice.is_errored());
    }

    #[test]
    fn resync_fills_authorization_artifacts() {
        let mut invoice = InvoiceRecord::new("inv_1", Decimal::new(15000, 2));
        let gateway: GatewayInvoice = serde_json::from_value(json!({
            "id": "inv_1",
            "status": "AUTHORIZED",
            "number": "2024-000123",
            "validationCode": "abc123",
            "pdfUrl": "https://example.org/nota.pdf",
            "xmlUrl": "https://example.org/nota.xml"
        }))
        .unwrap();
        gateway.apply_to(&mut invoice);

        assert!(invoice.is_authorized());
        assert_eq!(invoice.number.as_deref(), Some("2024-000123"));
        assert!(invoice.pdf_url.is_some());
        assert!(invoice.xml_url.is_some());
    }
}
