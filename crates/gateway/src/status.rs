//! Cached "has a linked account" read model.
//!
//! The linking UI decides its initial view from this query. The cache is
//! shared, read-mostly, and invalidated exactly once when a linking flow
//! reaches its terminal success.

use std::sync::{Arc, RwLock};

use crate::{
    client::VerificationGateway,
    error::{Error, Result},
    types::CallOutcome,
};

/// Snapshot of the current user's linked-account state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub has_credentials: bool,
    pub api_id: Option<i64>,
    pub phone_number: Option<String>,
    pub created_at: Option<String>,
}

/// Read model over the gateway's status endpoint with a shared cache.
pub struct CredentialStatusQuery {
    gateway: Arc<dyn VerificationGateway>,
    // std::sync::RwLock: lookups are synchronous and never held across an
    // `.await` point.
    cache: RwLock<Option<CredentialStatus>>,
}

impl CredentialStatusQuery {
    pub fn new(gateway: Arc<dyn VerificationGateway>) -> Self {
        Self {
            gateway,
            cache: RwLock::new(None),
        }
    }

    /// Return the cached status, fetching it from the gateway on a miss.
    pub async fn get(&self) -> Result<CredentialStatus> {
        if let Some(cached) = self.peek() {
            return Ok(cached);
        }
        self.refresh().await
    }

    /// Fetch a fresh status from the gateway and replace the cache.
    pub async fn refresh(&self) -> Result<CredentialStatus> {
        let status = match self.gateway.credentials_status().await {
            CallOutcome::Success(resp) => CredentialStatus {
                has_credentials: resp.has_credentials,
                api_id: resp.telegram_api_id,
                phone_number: resp.phone_number,
                created_at: resp.created_at,
            },
            CallOutcome::Domain(message) | CallOutcome::Transport(message) => {
                return Err(Error::message(message));
            },
            CallOutcome::RateLimited { message, .. } => return Err(Error::message(message)),
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(status.clone());
        }
        Ok(status)
    }

    /// Current cached value, if any, without touching the gateway.
    pub fn peek(&self) -> Option<CredentialStatus> {
        self.cache.read().ok().and_then(|cache| cache.clone())
    }

    /// Drop the cached value so the next [`get`](Self::get) refetches.
    pub fn invalidate(&self) {
        tracing::debug!("credential status cache invalidated");
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }
}
