//! Internal billing notifications
//!
//! Every webhook handler emits exactly one typed event for the record it
//! touched, plus payment-method side events (PIX QR, boleto). Events are
//! fan-out only; nothing in this crate consumes them. Duplicate webhook
//! deliveries re-emit events — state updates are idempotent, notifications
//! are not.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::invoices::InvoiceRecord;
use crate::payments::PaymentRecord;
use crate::subscriptions::SubscriptionRecord;

/// Typed internal notification carrying the updated record and, where it
/// exists, the raw gateway payload that produced it.
#[derive(Debug, Clone)]
pub enum BillingEvent {
    /// Emitted unconditionally for every inbound webhook before dispatch.
    WebhookReceived { event: String },

    PaymentCreated { payment: PaymentRecord, raw: Value },
    PaymentUpdated { payment: PaymentRecord, raw: Value },
    PaymentConfirmed { payment: PaymentRecord, raw: Value },
    PaymentReceived { payment: PaymentRecord, raw: Value },
    PaymentOverdue { payment: PaymentRecord, raw: Value },
    PaymentRefunded { payment: PaymentRecord, raw: Value },
    PaymentDeleted { payment: PaymentRecord, raw: Value },
    PaymentRestored { payment: PaymentRecord, raw: Value },

    /// A PIX charge came back with QR data attached.
    PixGenerated { payment: PaymentRecord },
    /// A boleto charge came back with a bank-slip URL attached.
    BoletoGenerated { payment: PaymentRecord },
    /// The customer opened the bank slip.
    BoletoViewed { payment: PaymentRecord },

    SubscriptionCreated { subscription: SubscriptionRecord, raw: Value },
    SubscriptionUpdated { subscription: SubscriptionRecord, raw: Value },
    SubscriptionDeleted { subscription: SubscriptionRecord, raw: Value },

    InvoiceCreated { invoice: InvoiceRecord, raw: Value },
    InvoiceUpdated { invoice: InvoiceRecord, raw: Value },
    InvoiceAuthorized { invoice: InvoiceRecord, raw: Value },
    InvoiceCanceled { invoice: InvoiceRecord, raw: Value },
    InvoiceErrored { invoice: InvoiceRecord, raw: Value },

    CheckoutPaid { raw: Value },
    CheckoutExpired { raw: Value },
}

impl BillingEvent {
    /// Stable name used for logging and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::WebhookReceived { .. } => "WebhookReceived",
            BillingEvent::PaymentCreated { .. } => "PaymentCreated",
            BillingEvent::PaymentUpdated { .. } => "PaymentUpdated",
            BillingEvent::PaymentConfirmed { .. } => "PaymentConfirmed",
            BillingEvent::PaymentReceived { .. } => "PaymentReceived",
            BillingEvent::PaymentOverdue { .. } => "PaymentOverdue",
            BillingEvent::PaymentRefunded { .. } => "PaymentRefunded",
            BillingEvent::PaymentDeleted { .. } => "PaymentDeleted",
            BillingEvent::PaymentRestored { .. } => "PaymentRestored",
            BillingEvent::PixGenerated { .. } => "PixGenerated",
            BillingEvent::BoletoGenerated { .. } => "BoletoGenerated",
            BillingEvent::BoletoViewed { .. } => "BoletoViewed",
            BillingEvent::SubscriptionCreated { .. } => "SubscriptionCreated",
            BillingEvent::SubscriptionUpdated { .. } => "SubscriptionUpdated",
            BillingEvent::SubscriptionDeleted { .. } => "SubscriptionDeleted",
            BillingEvent::InvoiceCreated { .. } => "InvoiceCreated",
            BillingEvent::InvoiceUpdated { .. } => "InvoiceUpdated",
            BillingEvent::InvoiceAuthorized { .. } => "InvoiceAuthorized",
            BillingEvent::InvoiceCanceled { .. } => "InvoiceCanceled",
            BillingEvent::InvoiceErrored { .. } => "InvoiceErrored",
            BillingEvent::CheckoutPaid { .. } => "CheckoutPaid",
            BillingEvent::CheckoutExpired { .. } => "CheckoutExpired",
        }
    }
}

/// Broadcast-based event sink. Cloning shares the channel.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<BillingEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: BillingEvent) {
        tracing::debug!(kind = event.kind(), "Billing event emitted");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_is_fine() {
        let notifier = Notifier::new();
        notifier.emit(BillingEvent::WebhookReceived {
            event: "PAYMENT_CREATED".to_string(),
        });
    }

    #[tokio::test]
    async fn subscribers_observe_emitted_events() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.emit(BillingEvent::CheckoutPaid {
            raw: serde_json::json!({}),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "CheckoutPaid");
    }
}
