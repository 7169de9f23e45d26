//! Webhook event routing
//!
//! The gateway reports everything that happens to charges, subscriptions and
//! invoices as webhook events. This module turns a raw event body into local
//! record updates and typed notifications.
//!
//! Reply policy: only a body we cannot even classify is `Malformed` (the
//! transport should answer 4xx so the gateway retries after the bug is
//! fixed). Failures while processing a well-formed event are logged and
//! swallowed, because a retry storm of a permanently-failing event would
//! block the gateway's delivery queue behind it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, Notifier};
use crate::external_ref::ExternalRef;
use crate::invoices::{GatewayInvoice, InvoiceRecord};
use crate::payments::{GatewayPayment, PaymentRecord};
use crate::store::{
    BillingStore, InvoiceStore, OwnerStore, PaymentStore, SubscriptionStore,
};
use crate::subscriptions::GatewaySubscription;
use crate::types::{InvoiceStatus, PaymentStatus, SubscriptionStatus};

/// Outcome of handling one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookReply {
    /// Recognized and applied; acknowledge with 200.
    Processed { event: String },
    /// Recognized but nothing to do (unknown event name, or an object we do
    /// not track); still acknowledge with 200 so the gateway moves on.
    Ignored { event: String },
    /// The body is not a usable event; answer 400.
    Malformed(String),
}

/// Every gateway event name this handler routes. Anything else falls
/// through [`parse`](Self::parse) as `None` and is acknowledged unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentCreated,
    PaymentUpdated,
    PaymentConfirmed,
    PaymentReceived,
    PaymentReceivedInCash,
    PaymentOverdue,
    PaymentRefunded,
    PaymentDeleted,
    PaymentRestored,
    PaymentBankSlipViewed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionInactivated,
    SubscriptionDeleted,
    InvoiceCreated,
    InvoiceUpdated,
    InvoiceSynchronized,
    InvoiceAuthorized,
    InvoiceCanceled,
    InvoiceCancellationDenied,
    InvoiceError,
    CheckoutPaid,
    CheckoutExpired,
    CheckoutCanceled,
}

impl WebhookEvent {
    pub fn parse(name: &str) -> Option<Self> {
        let event = match name {
            "PAYMENT_CREATED" => Self::PaymentCreated,
            "PAYMENT_UPDATED" => Self::PaymentUpdated,
            "PAYMENT_CONFIRMED" => Self::PaymentConfirmed,
            "PAYMENT_RECEIVED" => Self::PaymentReceived,
            "PAYMENT_RECEIVED_IN_CASH" => Self::PaymentReceivedInCash,
            "PAYMENT_OVERDUE" => Self::PaymentOverdue,
            "PAYMENT_REFUNDED" => Self::PaymentRefunded,
            "PAYMENT_DELETED" => Self::PaymentDeleted,
            "PAYMENT_RESTORED" => Self::PaymentRestored,
            "PAYMENT_BANK_SLIP_VIEWED" => Self::PaymentBankSlipViewed,
            "SUBSCRIPTION_CREATED" => Self::SubscriptionCreated,
            "SUBSCRIPTION_UPDATED" => Self::SubscriptionUpdated,
            "SUBSCRIPTION_INACTIVATED" => Self::SubscriptionInactivated,
            "SUBSCRIPTION_DELETED" => Self::SubscriptionDeleted,
            "INVOICE_CREATED" => Self::InvoiceCreated,
            "INVOICE_UPDATED" => Self::InvoiceUpdated,
            "INVOICE_SYNCHRONIZED" => Self::InvoiceSynchronized,
            "INVOICE_AUTHORIZED" => Self::InvoiceAuthorized,
            "INVOICE_CANCELED" => Self::InvoiceCanceled,
            "INVOICE_CANCELLATION_DENIED" => Self::InvoiceCancellationDenied,
            "INVOICE_ERROR" => Self::InvoiceError,
            "CHECKOUT_PAID" => Self::CheckoutPaid,
            "CHECKOUT_EXPIRED" => Self::CheckoutExpired,
            "CHECKOUT_CANCELED" => Self::CheckoutCanceled,
            _ => return None,
        };
        Some(event)
    }

    fn is_payment(self) -> bool {
        matches!(
            self,
            Self::PaymentCreated
                | Self::PaymentUpdated
                | Self::PaymentConfirmed
                | Self::PaymentReceived
                | Self::PaymentReceivedInCash
                | Self::PaymentOverdue
                | Self::PaymentRefunded
                | Self::PaymentDeleted
                | Self::PaymentRestored
                | Self::PaymentBankSlipViewed
        )
    }

    fn is_subscription(self) -> bool {
        matches!(
            self,
            Self::SubscriptionCreated
                | Self::SubscriptionUpdated
                | Self::SubscriptionInactivated
                | Self::SubscriptionDeleted
        )
    }

    fn is_invoice(self) -> bool {
        matches!(
            self,
            Self::InvoiceCreated
                | Self::InvoiceUpdated
                | Self::InvoiceSynchronized
                | Self::InvoiceAuthorized
                | Self::InvoiceCanceled
                | Self::InvoiceCancellationDenied
                | Self::InvoiceError
        )
    }
}

pub struct WebhookHandler {
    store: Arc<dyn BillingStore>,
    notifier: Notifier,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn BillingStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Handle a raw delivery body.
    pub async fn handle_bytes(&self, body: &[u8]) -> WebhookReply {
        match serde_json::from_slice::<Value>(body) {
            Ok(raw) => self.handle(raw).await,
            Err(_) => WebhookReply::Malformed("Invalid JSON payload".to_string()),
        }
    }

    /// Handle an already-parsed delivery.
    pub async fn handle(&self, raw: Value) -> WebhookReply {
        let Some(event) = raw.get("event").and_then(Value::as_str).map(str::to_string) else {
            return WebhookReply::Malformed("Missing event type".to_string());
        };

        tracing::debug!(event = %event, "Webhook received");
        self.notifier.emit(BillingEvent::WebhookReceived {
            event: event.clone(),
        });

        let Some(kind) = WebhookEvent::parse(&event) else {
            tracing::debug!(event = %event, "Unhandled webhook event");
            return WebhookReply::Ignored { event };
        };

        let result = if kind.is_payment() {
            self.handle_payment_event(kind, &event, &raw).await
        } else if kind.is_subscription() {
            self.handle_subscription_event(kind, &event, &raw).await
        } else if kind.is_invoice() {
            self.handle_invoice_event(kind, &event, &raw).await
        } else {
            self.handle_checkout_event(kind, &event, &raw)
        };

        match result {
            Ok(reply) => reply,
            Err(BillingError::MalformedWebhook(message)) => WebhookReply::Malformed(message),
            Err(error) => {
                // Acknowledge anyway; see the module docs for why.
                tracing::error!(event = %event, error = %error, "Webhook processing failed");
                WebhookReply::Processed { event }
            }
        }
    }

    async fn handle_payment_event(
        &self,
        kind: WebhookEvent,
        event: &str,
        raw: &Value,
    ) -> BillingResult<WebhookReply> {
        let payload = raw
            .get("payment")
            .cloned()
            .ok_or_else(|| BillingError::MalformedWebhook("Missing payment object".to_string()))?;
        let gateway: GatewayPayment = serde_json::from_value(payload)
            .map_err(|e| BillingError::MalformedWebhook(format!("Undecodable payment object: {e}")))?;
        let gateway_id = gateway
            .id
            .clone()
            .ok_or_else(|| BillingError::MalformedWebhook("Payment object without id".to_string()))?;

        let existing = self.store.find_payment_by_gateway_id(&gateway_id).await?;
        let mut record = match existing {
            Some(record) => record,
            // First sight of this charge, e.g. created by a subscription
            // renewal or a hosted checkout rather than through this crate.
            None if kind == WebhookEvent::PaymentCreated => {
                let mut record =
                    PaymentRecord::new(gateway_id.clone(), gateway.value.unwrap_or_default());
                let (owner_id, subscription_id) = self.resolve_payment_owner(&gateway).await?;
                record.owner_id = owner_id;
                record.subscription_id = subscription_id;
                gateway.apply_to(&mut record);
                self.store.insert_payment(&record).await?;
                self.emit_payment_event(kind, &record, raw);
                self.emit_payment_side_events(&record);
                return Ok(WebhookReply::Processed {
                    event: event.to_string(),
                });
            }
            None => {
                tracing::debug!(
                    event = %event,
                    gateway_payment_id = %gateway_id,
                    "Payment event for an untracked charge"
                );
                return Ok(WebhookReply::Ignored {
                    event: event.to_string(),
                });
            }
        };

        gateway.apply_to(&mut record);
        match kind {
            WebhookEvent::PaymentDeleted => {
                record.status = PaymentStatus::Deleted;
            }
            WebhookEvent::PaymentRestored => {
                if record.status == PaymentStatus::Deleted {
                    record.status = gateway.status.unwrap_or(PaymentStatus::Pending);
                }
            }
            WebhookEvent::PaymentRefunded => {
                record.status = PaymentStatus::Refunded;
                if record.refunded_at.is_none() {
                    record.refunded_at = Some(Utc::now());
                }
            }
            _ => {}
        }
        self.store.update_payment(&record).await?;
        self.emit_payment_event(kind, &record, raw);
        Ok(WebhookReply::Processed {
            event: event.to_string(),
        })
    }

    fn emit_payment_event(&self, kind: WebhookEvent, record: &PaymentRecord, raw: &Value) {
        let payment = record.clone();
        let raw = raw.clone();
        let typed = match kind {
            WebhookEvent::PaymentCreated => BillingEvent::PaymentCreated { payment, raw },
            WebhookEvent::PaymentConfirmed => BillingEvent::PaymentConfirmed { payment, raw },
            WebhookEvent::PaymentReceived | WebhookEvent::PaymentReceivedInCash => {
                BillingEvent::PaymentReceived { payment, raw }
            }
            WebhookEvent::PaymentOverdue => BillingEvent::PaymentOverdue { payment, raw },
            WebhookEvent::PaymentRefunded => BillingEvent::PaymentRefunded { payment, raw },
            WebhookEvent::PaymentDeleted => BillingEvent::PaymentDeleted { payment, raw },
            WebhookEvent::PaymentRestored => BillingEvent::PaymentRestored { payment, raw },
            WebhookEvent::PaymentBankSlipViewed => {
                // Only boleto charges have a slip to view.
                if !record.is_boleto() {
                    return;
                }
                BillingEvent::BoletoViewed { payment }
            }
            _ => BillingEvent::PaymentUpdated { payment, raw },
        };
        self.notifier.emit(typed);
    }

    /// PIX and boleto artifacts arriving with a new charge get their own
    /// notifications so applications can surface them to the payer.
    fn emit_payment_side_events(&self, record: &PaymentRecord) {
        if record.is_pix() && record.pix_copy_paste.is_some() {
            self.notifier.emit(BillingEvent::PixGenerated {
                payment: record.clone(),
            });
        }
        if record.is_boleto() && record.bank_slip_url.is_some() {
            self.notifier.emit(BillingEvent::BoletoGenerated {
                payment: record.clone(),
            });
        }
    }

    /// Recover the local owner behind a gateway payment: the linked
    /// subscription first, then the external reference, then the gateway
    /// customer id. A payment that resolves to nothing stays unowned.
    async fn resolve_payment_owner(
        &self,
        gateway: &GatewayPayment,
    ) -> BillingResult<(Option<Uuid>, Option<Uuid>)> {
        if let Some(subscription_gateway_id) = &gateway.subscription {
            if let Some(subscription) = self
                .store
                .find_subscription_by_gateway_id(subscription_gateway_id)
                .await?
            {
                return Ok((Some(subscription.owner_id), Some(subscription.id)));
            }
        }
        if let Some(reference) = gateway
            .external_reference
            .as_deref()
            .and_then(ExternalRef::decode)
        {
            if let Some(owner_id) = reference.owner {
                // The reference may have been written by another system
                // reusing our shape; trust it only for owners we know.
                if self.store.find_owner(owner_id).await?.is_some() {
                    return Ok((Some(owner_id), None));
                }
            }
        }
        if let Some(customer) = &gateway.customer {
            if let Some(owner) = self.store.find_owner_by_gateway_id(customer).await? {
                return Ok((Some(owner.id), None));
            }
        }
        Ok((None, None))
    }

    async fn handle_subscription_event(
        &self,
        kind: WebhookEvent,
        event: &str,
        raw: &Value,
    ) -> BillingResult<WebhookReply> {
        let payload = raw.get("subscription").cloned().ok_or_else(|| {
            BillingError::MalformedWebhook("Missing subscription object".to_string())
        })?;
        let gateway: GatewaySubscription = serde_json::from_value(payload).map_err(|e| {
            BillingError::MalformedWebhook(format!("Undecodable subscription object: {e}"))
        })?;
        let gateway_id = gateway.id.clone().ok_or_else(|| {
            BillingError::MalformedWebhook("Subscription object without id".to_string())
        })?;

        // Subscriptions are never fabricated from an event: the local row
        // exists because this crate created it, and anything else (including
        // a creation event for a subscription made elsewhere) is not ours to
        // track.
        let Some(mut record) = self
            .store
            .find_subscription_by_gateway_id(&gateway_id)
            .await?
        else {
            tracing::debug!(
                event = %event,
                gateway_subscription_id = %gateway_id,
                "Subscription event for an untracked subscription"
            );
            return Ok(WebhookReply::Ignored {
                event: event.to_string(),
            });
        };

        gateway.apply_to(&mut record);
        let typed = match kind {
            WebhookEvent::SubscriptionCreated => BillingEvent::SubscriptionCreated {
                subscription: record.clone(),
                raw: raw.clone(),
            },
            WebhookEvent::SubscriptionDeleted | WebhookEvent::SubscriptionInactivated => {
                record.status = SubscriptionStatus::Inactive;
                // A local cancellation may already have fixed the grace
                // period end; the event must not shorten or extend it.
                if record.ends_at.is_none() {
                    record.ends_at = Some(Utc::now());
                }
                BillingEvent::SubscriptionDeleted {
                    subscription: record.clone(),
                    raw: raw.clone(),
                }
            }
            _ => BillingEvent::SubscriptionUpdated {
                subscription: record.clone(),
                raw: raw.clone(),
            },
        };
        self.store.update_subscription(&record).await?;
        self.notifier.emit(typed);
        Ok(WebhookReply::Processed {
            event: event.to_string(),
        })
    }

    async fn handle_invoice_event(
        &self,
        kind: WebhookEvent,
        event: &str,
        raw: &Value,
    ) -> BillingResult<WebhookReply> {
        let payload = raw
            .get("invoice")
            .cloned()
            .ok_or_else(|| BillingError::MalformedWebhook("Missing invoice object".to_string()))?;
        let gateway: GatewayInvoice = serde_json::from_value(payload)
            .map_err(|e| BillingError::MalformedWebhook(format!("Undecodable invoice object: {e}")))?;
        let gateway_id = gateway
            .id
            .clone()
            .ok_or_else(|| BillingError::MalformedWebhook("Invoice object without id".to_string()))?;

        let existing = self.store.find_invoice_by_gateway_id(&gateway_id).await?;
        let mut record = match existing {
            Some(record) => record,
            None if kind == WebhookEvent::InvoiceCreated => {
                let mut record =
                    InvoiceRecord::new(gateway_id.clone(), gateway.value.unwrap_or_default());
                if let Some(payment_gateway_id) = &gateway.payment {
                    if let Some(payment) = self
                        .store
                        .find_payment_by_gateway_id(payment_gateway_id)
                        .await?
                    {
                        record.payment_id = Some(payment.id);
                        record.owner_id = payment.owner_id;
                    }
                }
                if record.owner_id.is_none() {
                    if let Some(owner_id) = gateway
                        .external_reference
                        .as_deref()
                        .and_then(ExternalRef::decode)
                        .and_then(|reference| reference.owner)
                    {
                        // Same trust rule as payments: only references that
                        // name an owner we actually store count.
                        if self.store.find_owner(owner_id).await?.is_some() {
                            record.owner_id = Some(owner_id);
                        }
                    }
                }
                if record.owner_id.is_none() {
                    if let Some(customer) = &gateway.customer {
                        record.owner_id = self
                            .store
                            .find_owner_by_gateway_id(customer)
                            .await?
                            .map(|owner| owner.id);
                    }
                }
                gateway.apply_to(&mut record);
                self.store.insert_invoice(&record).await?;
                self.notifier.emit(BillingEvent::InvoiceCreated {
                    invoice: record.clone(),
                    raw: raw.clone(),
                });
                return Ok(WebhookReply::Processed {
                    event: event.to_string(),
                });
            }
            None => {
                tracing::debug!(
                    event = %event,
                    gateway_invoice_id = %gateway_id,
                    "Invoice event for an untracked invoice"
                );
                return Ok(WebhookReply::Ignored {
                    event: event.to_string(),
                });
            }
        };

        gateway.apply_to(&mut record);
        self.store.update_invoice(&record).await?;
        let invoice = record.clone();
        let raw = raw.clone();
        let typed = match record.status {
            InvoiceStatus::Authorized => BillingEvent::InvoiceAuthorized { invoice, raw },
            InvoiceStatus::Canceled => BillingEvent::InvoiceCanceled { invoice, raw },
            InvoiceStatus::Error => BillingEvent::InvoiceErrored { invoice, raw },
            _ => BillingEvent::InvoiceUpdated { invoice, raw },
        };
        self.notifier.emit(typed);
        Ok(WebhookReply::Processed {
            event: event.to_string(),
        })
    }

    fn handle_checkout_event(
        &self,
        kind: WebhookEvent,
        event: &str,
        raw: &Value,
    ) -> BillingResult<WebhookReply> {
        let typed = match kind {
            WebhookEvent::CheckoutPaid => BillingEvent::CheckoutPaid { raw: raw.clone() },
            WebhookEvent::CheckoutExpired | WebhookEvent::CheckoutCanceled => {
                BillingEvent::CheckoutExpired { raw: raw.clone() }
            }
            _ => {
                return Ok(WebhookReply::Ignored {
                    event: event.to_string(),
                })
            }
        };
        self.notifier.emit(typed);
        Ok(WebhookReply::Processed {
            event: event.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OwnerRecord};
    use crate::subscriptions::SubscriptionRecord;
    use crate::types::BillingType;
    use rust_decimal::Decimal;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn handler() -> (WebhookHandler, Arc<MemoryStore>, Notifier) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new();
        let handler = WebhookHandler::new(store.clone(), notifier.clone());
        (handler, store, notifier)
    }

    #[tokio::test]
    async fn body_without_event_type_is_malformed() {
        let (handler, _, _) = handler();
        let reply = handler.handle(json!({ "payment": { "id": "pay_1" } })).await;
        assert_eq!(reply, WebhookReply::Malformed("Missing event type".to_string()));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let (handler, _, _) = handler();
        let reply = handler.handle_bytes(b"not json at all").await;
        assert!(matches!(reply, WebhookReply::Malformed(_)));
    }

    #[test]
    fn event_names_parse_to_their_kind() {
        assert_eq!(
            WebhookEvent::parse("PAYMENT_RECEIVED"),
            Some(WebhookEvent::PaymentReceived)
        );
        assert_eq!(
            WebhookEvent::parse("SUBSCRIPTION_DELETED"),
            Some(WebhookEvent::SubscriptionDeleted)
        );
        assert_eq!(WebhookEvent::parse("TRANSFER_DONE"), None);
    }

    #[tokio::test]
    async fn unknown_event_family_is_acknowledged_but_ignored() {
        let (handler, _, _) = handler();
        let reply = handler
            .handle(json!({ "event": "TRANSFER_DONE", "transfer": {} }))
            .await;
        assert_eq!(
            reply,
            WebhookReply::Ignored {
                event: "TRANSFER_DONE".to_string()
            }
        );
    }

    #[tokio::test]
    async fn payment_created_adopts_untracked_charges_via_customer_id() {
        let (handler, store, notifier) = handler();
        let mut owner = OwnerRecord::new(Uuid::new_v4(), "Ana", "ana@example.org");
        owner.gateway_id = Some("cus_1".to_string());
        store.insert_owner(&owner).await.unwrap();
        let mut events = notifier.subscribe();

        let reply = handler
            .handle(json!({
                "event": "PAYMENT_CREATED",
                "payment": {
                    "id": "pay_9",
                    "customer": "cus_1",
                    "status": "PENDING",
                    "billingType": "PIX",
                    "value": 49.9
                }
            }))
            .await;
        assert_eq!(
            reply,
            WebhookReply::Processed {
                event: "PAYMENT_CREATED".to_string()
            }
        );

        let record = store
            .find_payment_by_gateway_id("pay_9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.owner_id, Some(owner.id));
        assert_eq!(record.value, Decimal::new(499, 1));

        assert_eq!(events.try_recv().unwrap().kind(), "WebhookReceived");
        assert_eq!(events.try_recv().unwrap().kind(), "PaymentCreated");
    }

    #[tokio::test]
    async fn payment_event_for_untracked_charge_is_ignored() {
        let (handler, _, _) = handler();
        let reply = handler
            .handle(json!({
                "event": "PAYMENT_RECEIVED",
                "payment": { "id": "pay_missing", "status": "RECEIVED" }
            }))
            .await;
        assert_eq!(
            reply,
            WebhookReply::Ignored {
                event: "PAYMENT_RECEIVED".to_string()
            }
        );
    }

    #[tokio::test]
    async fn subscription_deleted_does_not_move_an_existing_grace_period() {
        let (handler, store, _) = handler();
        let owner_id = Uuid::new_v4();
        store
            .insert_owner(&OwnerRecord::new(owner_id, "Bia", "bia@example.org"))
            .await
            .unwrap();
        let mut subscription = SubscriptionRecord::new(owner_id, "sub_1", "pro");
        let fixed_end = Utc::now() + chrono::Duration::days(10);
        subscription.ends_at = Some(fixed_end);
        store.insert_subscription(&subscription).await.unwrap();

        let reply = handler
            .handle(json!({
                "event": "SUBSCRIPTION_DELETED",
                "subscription": { "id": "sub_1", "status": "INACTIVE" }
            }))
            .await;
        assert_eq!(
            reply,
            WebhookReply::Processed {
                event: "SUBSCRIPTION_DELETED".to_string()
            }
        );

        let stored = store
            .find_subscription_by_gateway_id("sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Inactive);
        assert_eq!(stored.ends_at, Some(fixed_end));
    }

    #[tokio::test]
    async fn bank_slip_viewed_for_a_non_boleto_charge_is_not_announced() {
        let (handler, store, notifier) = handler();
        let mut payment = PaymentRecord::new("pay_1", Decimal::new(4990, 2));
        payment.billing_type = BillingType::Pix;
        store.insert_payment(&payment).await.unwrap();
        let mut events = notifier.subscribe();

        let reply = handler
            .handle(json!({
                "event": "PAYMENT_BANK_SLIP_VIEWED",
                "payment": { "id": "pay_1", "status": "PENDING" }
            }))
            .await;
        assert!(matches!(reply, WebhookReply::Processed { .. }));

        assert_eq!(events.try_recv().unwrap().kind(), "WebhookReceived");
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn bank_slip_viewed_announces_boleto_charges() {
        let (handler, store, notifier) = handler();
        let mut payment = PaymentRecord::new("pay_2", Decimal::new(15000, 2));
        payment.billing_type = BillingType::Boleto;
        store.insert_payment(&payment).await.unwrap();
        let mut events = notifier.subscribe();

        let reply = handler
            .handle(json!({
                "event": "PAYMENT_BANK_SLIP_VIEWED",
                "payment": { "id": "pay_2", "status": "PENDING" }
            }))
            .await;
        assert!(matches!(reply, WebhookReply::Processed { .. }));

        assert_eq!(events.try_recv().unwrap().kind(), "WebhookReceived");
        assert_eq!(events.try_recv().unwrap().kind(), "BoletoViewed");
    }

    #[tokio::test]
    async fn subscription_created_for_an_untracked_subscription_is_ignored() {
        let (handler, store, _) = handler();
        let mut owner = OwnerRecord::new(Uuid::new_v4(), "Ana", "ana@example.org");
        owner.gateway_id = Some("cus_1".to_string());
        store.insert_owner(&owner).await.unwrap();

        let reply = handler
            .handle(json!({
                "event": "SUBSCRIPTION_CREATED",
                "subscription": {
                    "id": "sub_9",
                    "customer": "cus_1",
                    "status": "ACTIVE",
                    "externalReference": ExternalRef::for_owner(owner.id).encode()
                }
            }))
            .await;
        assert_eq!(
            reply,
            WebhookReply::Ignored {
                event: "SUBSCRIPTION_CREATED".to_string()
            }
        );
        assert!(store
            .find_subscription_by_gateway_id("sub_9")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invoice_created_resolves_the_owner_from_the_external_reference() {
        let (handler, store, _) = handler();
        let owner = OwnerRecord::new(Uuid::new_v4(), "Ana", "ana@example.org");
        store.insert_owner(&owner).await.unwrap();

        let reply = handler
            .handle(json!({
                "event": "INVOICE_CREATED",
                "invoice": {
                    "id": "inv_2",
                    "status": "SCHEDULED",
                    "value": 99.0,
                    "externalReference": ExternalRef::for_owner(owner.id).encode()
                }
            }))
            .await;
        assert!(matches!(reply, WebhookReply::Processed { .. }));

        let invoice = store
            .find_invoice_by_gateway_id("inv_2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.owner_id, Some(owner.id));
        assert_eq!(invoice.payment_id, None);
    }

    #[tokio::test]
    async fn invoice_created_links_back_to_the_local_payment() {
        let (handler, store, _) = handler();
        let owner_id = Uuid::new_v4();
        let mut payment = PaymentRecord::new("pay_1", Decimal::new(15000, 2));
        payment.owner_id = Some(owner_id);
        store.insert_payment(&payment).await.unwrap();

        let reply = handler
            .handle(json!({
                "event": "INVOICE_CREATED",
                "invoice": {
                    "id": "inv_1",
                    "payment": "pay_1",
                    "status": "SCHEDULED",
                    "value": 150.0
                }
            }))
            .await;
        assert_eq!(
            reply,
            WebhookReply::Processed {
                event: "INVOICE_CREATED".to_string()
            }
        );

        let invoice = store
            .find_invoice_by_gateway_id("inv_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.payment_id, Some(payment.id));
        assert_eq!(invoice.owner_id, Some(owner_id));
    }
}
