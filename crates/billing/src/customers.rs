//! Gateway customer management
//!
//! An owner's gateway customer is created at most once; builders call
//! `ensure_gateway_customer` so the get-or-create step stays separately
//! testable instead of being an implicit builder side effect.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::AsaasClient;
use crate::error::{BillingError, BillingResult};
use crate::external_ref::ExternalRef;
use crate::store::{BillingStore, OwnerRecord, OwnerStore};

#[derive(Clone)]
pub struct CustomerService {
    client: AsaasClient,
    store: Arc<dyn BillingStore>,
}

impl CustomerService {
    pub fn new(client: AsaasClient, store: Arc<dyn BillingStore>) -> Self {
        Self { client, store }
    }

    /// Gateway customer id for an owner, creating the customer if absent.
    pub async fn ensure_gateway_customer(&self, owner_id: Uuid) -> BillingResult<String> {
        let owner = self
            .store
            .find_owner(owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(owner_id))?;

        if let Some(gateway_id) = owner.gateway_id {
            return Ok(gateway_id);
        }

        self.create_from_profile(&owner).await
    }

    /// Explicitly create the gateway customer. Unlike
    /// [`ensure_gateway_customer`](Self::ensure_gateway_customer), an owner
    /// that already has one is an error, not an upsert.
    pub async fn create_gateway_customer(&self, owner_id: Uuid) -> BillingResult<String> {
        let owner = self
            .store
            .find_owner(owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(owner_id))?;

        if owner.gateway_id.is_some() {
            return Err(BillingError::CustomerAlreadyExists(owner_id));
        }

        self.create_from_profile(&owner).await
    }

    async fn create_from_profile(&self, owner: &OwnerRecord) -> BillingResult<String> {
        let payload = customer_payload(owner);
        let response = self.client.create_customer(&payload).await?;
        let gateway_id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::Storage("gateway customer response without id".into()))?
            .to_string();

        self.store
            .set_owner_gateway_id(owner.id, &gateway_id)
            .await?;

        tracing::info!(
            owner_id = %owner.id,
            gateway_customer_id = %gateway_id,
            "Gateway customer created"
        );
        Ok(gateway_id)
    }

    /// Push the owner's current profile to the gateway. `overrides` entries
    /// win over profile-derived fields.
    pub async fn sync_gateway_customer(
        &self,
        owner_id: Uuid,
        overrides: Value,
    ) -> BillingResult<Value> {
        let owner = self
            .store
            .find_owner(owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(owner_id))?;
        let gateway_id = owner
            .gateway_id
            .clone()
            .ok_or(BillingError::MissingGatewayId("owner"))?;

        let mut payload = customer_payload(&owner);
        if let (Some(base), Some(extra)) = (payload.as_object_mut(), overrides.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        self.client.update_customer(&gateway_id, &payload).await
    }

    pub async fn find_gateway_customer(&self, owner_id: Uuid) -> BillingResult<Value> {
        let owner = self
            .store
            .find_owner(owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(owner_id))?;
        let gateway_id = owner
            .gateway_id
            .ok_or(BillingError::MissingGatewayId("owner"))?;
        self.client.find_customer(&gateway_id).await
    }

    pub async fn delete_gateway_customer(&self, owner_id: Uuid) -> BillingResult<Value> {
        let owner = self
            .store
            .find_owner(owner_id)
            .await?
            .ok_or(BillingError::OwnerNotFound(owner_id))?;
        let gateway_id = owner
            .gateway_id
            .ok_or(BillingError::MissingGatewayId("owner"))?;
        self.client.delete_customer(&gateway_id).await
    }
}

fn customer_payload(owner: &OwnerRecord) -> Value {
    let mut payload = json!({
        "name": owner.name,
        "email": owner.email,
        "externalReference": ExternalRef::for_owner(owner.id).encode(),
    });
    if let Some(map) = payload.as_object_mut() {
        if let Some(cpf_cnpj) = &owner.cpf_cnpj {
            map.insert("cpfCnpj".to_string(), json!(cpf_cnpj));
        }
        if let Some(phone) = &owner.phone {
            map.insert("mobilePhone".to_string(), json!(phone));
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AsaasConfig;
    use crate::store::MemoryStore;

    async fn seeded_store(owner_id: Uuid) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut owner = OwnerRecord::new(owner_id, "Maria Silva", "maria@example.com");
        owner.cpf_cnpj = Some("24971563792".to_string());
        store.insert_owner(&owner).await.unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_creates_once_then_reuses() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/customers")
            .with_status(200)
            .with_body(r#"{"id":"cus_000001","name":"Maria Silva"}"#)
            .expect(1)
            .create_async()
            .await;

        let owner_id = Uuid::new_v4();
        let store = seeded_store(owner_id).await;
        let client = AsaasClient::new(AsaasConfig::new("key", true).with_base_url(server.url()));
        let service = CustomerService::new(client, store.clone());

        let first = service.ensure_gateway_customer(owner_id).await.unwrap();
        let second = service.ensure_gateway_customer(owner_id).await.unwrap();
        assert_eq!(first, "cus_000001");
        assert_eq!(second, "cus_000001");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn explicit_create_rejects_existing_customer() {
        let server = mockito::Server::new_async().await;
        let owner_id = Uuid::new_v4();
        let store = seeded_store(owner_id).await;
        store
            .set_owner_gateway_id(owner_id, "cus_existing")
            .await
            .unwrap();

        let client = AsaasClient::new(AsaasConfig::new("key", true).with_base_url(server.url()));
        let service = CustomerService::new(client, store);

        let err = service.create_gateway_customer(owner_id).await.unwrap_err();
        assert!(matches!(err, BillingError::CustomerAlreadyExists(id) if id == owner_id));
    }
}
