//! # Tenant Gate
//!
//! Applies lifecycle notifications to tenant rows and decides whether data
//! events are admitted for a tenant.
//!
//! The gate is the only writer of tenant status. Lifecycle handlers are
//! idempotent: replaying a notification leaves the row in the same state.

use crate::crypto::{CipherError, TokenCipher};
use crate::store::{StorageError, StorePatch, StoreRecord, StoreStatus, TenantRepository};
use crate::webhook::{store_id, LifecycleEvent, TokenGrant};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Access token value of a tenant row created before authorization.
pub const PLACEHOLDER_TOKEN: &str = "pending";

/// Outcome of an admission check
#[derive(Debug, Clone)]
pub struct Admission {
    pub active: bool,
    pub record: StoreRecord,
}

/// Errors raised while applying a lifecycle notification
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Lifecycle payload has no store identifier")]
    MissingStoreId,

    #[error("Authorize payload has no access token")]
    MissingAccessToken,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Token encryption failed: {0}")]
    Cipher(#[from] CipherError),
}

/// Tenant lifecycle handling and admission gate.
#[derive(Clone)]
pub struct TenantGate {
    tenants: Arc<dyn TenantRepository>,
    cipher: Arc<dyn TokenCipher>,
}

impl TenantGate {
    pub fn new(tenants: Arc<dyn TenantRepository>, cipher: Arc<dyn TokenCipher>) -> Self {
        Self { tenants, cipher }
    }

    /// Admit or reject data events for a tenant.
    ///
    /// Unknown tenants get a placeholder row so that a data event arriving
    /// before the install notification is not lost.
    #[instrument(skip(self))]
    pub async fn admit(&self, store_id: &str) -> Result<Admission, StorageError> {
        let record = match self.tenants.find(store_id).await? {
            Some(record) => record,
            None => {
                info!(store_id = %store_id, "Unknown tenant, creating placeholder");
                self.insert_placeholder(store_id).await?
            }
        };

        Ok(Admission {
            active: record.status.admits_events(),
            record,
        })
    }

    /// Apply a lifecycle notification.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::MissingStoreId`] when the payload names no
    /// tenant and [`TenantError::MissingAccessToken`] for an authorize
    /// notification without tokens.
    #[instrument(skip(self, payload), fields(lifecycle = %event))]
    pub async fn handle_lifecycle(
        &self,
        event: LifecycleEvent,
        payload: &Value,
    ) -> Result<(), TenantError> {
        let store_id = store_id(payload);
        if store_id.is_empty() {
            return Err(TenantError::MissingStoreId);
        }

        match event {
            LifecycleEvent::Authorize => {
                let grant =
                    TokenGrant::from_payload(payload).ok_or(TenantError::MissingAccessToken)?;
                self.authorize(&store_id, &grant).await
            }
            LifecycleEvent::Installed => self.mark_installed(&store_id).await,
            LifecycleEvent::Uninstalled => self.mark_uninstalled(&store_id).await,
        }
    }

    /// Store encrypted tokens and mark the tenant active.
    pub async fn authorize(&self, store_id: &str, grant: &TokenGrant) -> Result<(), TenantError> {
        let patch = StorePatch {
            status: Some(StoreStatus::Active),
            access_token: Some(self.cipher.encrypt(&grant.access_token)?),
            refresh_token: Some(
                grant
                    .refresh_token
                    .as_ref()
                    .map(|t| self.cipher.encrypt(t))
                    .transpose()?,
            ),
            scope: Some(grant.scope.clone()),
            token_expires_at: Some(grant.expires),
        };

        if self.tenants.find(store_id).await?.is_none() {
            let mut record = StoreRecord::new(store_id, StoreStatus::Active, String::new());
            record.apply(&patch);
            match self.tenants.insert(record).await {
                Ok(_) => {
                    info!(store_id = %store_id, "Tenant authorized");
                    return Ok(());
                }
                // Created concurrently; fall through to update
                Err(StorageError::Duplicate { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.tenants.update(store_id, &patch).await?;
        info!(store_id = %store_id, "Tenant authorized");
        Ok(())
    }

    /// Record an install or update notification.
    ///
    /// Creates a placeholder row for unknown tenants and reactivates an
    /// uninstalled one. Any other status is left unchanged.
    pub async fn mark_installed(&self, store_id: &str) -> Result<(), TenantError> {
        match self.tenants.find(store_id).await? {
            None => {
                self.insert_placeholder(store_id).await?;
            }
            Some(record) if record.status == StoreStatus::Uninstalled => {
                self.tenants
                    .update(store_id, &StorePatch::status(StoreStatus::Installed))
                    .await?;
                info!(store_id = %store_id, "Tenant reinstalled");
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Mark a tenant uninstalled. Unknown tenants are ignored.
    pub async fn mark_uninstalled(&self, store_id: &str) -> Result<(), TenantError> {
        if self.tenants.find(store_id).await?.is_none() {
            warn!(store_id = %store_id, "Uninstall for unknown tenant ignored");
            return Ok(());
        }

        self.tenants
            .update(store_id, &StorePatch::status(StoreStatus::Uninstalled))
            .await?;
        info!(store_id = %store_id, "Tenant uninstalled");
        Ok(())
    }

    /// Current status of a tenant, if known.
    pub async fn status(&self, store_id: &str) -> Result<Option<StoreStatus>, StorageError> {
        Ok(self.tenants.find(store_id).await?.map(|r| r.status))
    }

    async fn insert_placeholder(&self, store_id: &str) -> Result<StoreRecord, StorageError> {
        let placeholder =
            StoreRecord::new(store_id, StoreStatus::Installed, PLACEHOLDER_TOKEN.to_string());

        match self.tenants.insert(placeholder).await {
            Ok(record) => Ok(record),
            Err(StorageError::Duplicate { .. }) => {
                self.tenants
                    .find(store_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound {
                        key: store_id.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "tenants_tests.rs"]
mod tests;
