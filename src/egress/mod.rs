//! Network egress authorization
//!
//! Crawling through a proxy requires the proxy to accept the crawler's
//! public IP. An [`EgressAuthorizer`] grants and withdraws that permission;
//! an [`EgressGuard`] ties the grant to the lifetime of the fetcher that
//! needs it.

mod http;

pub use http::HttpEgressAuthorizer;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;

/// Errors raised while authorizing or revoking egress
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("Could not determine public IP: {0}")]
    Lookup(String),

    #[error("Egress request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Egress endpoint {endpoint} answered with status {status}")]
    Rejected { endpoint: String, status: u16 },
}

/// External service that allow-lists the crawler's egress IP
///
/// Both `authorize` and `revoke` must be idempotent.
#[async_trait]
pub trait EgressAuthorizer: Send + Sync {
    /// Returns the current public IP of this process
    async fn current_ip(&self) -> Result<String, EgressError>;

    /// Allows traffic from `ip`
    async fn authorize(&self, ip: &str) -> Result<(), EgressError>;

    /// Withdraws the permission for `ip`
    async fn revoke(&self, ip: &str) -> Result<(), EgressError>;
}

/// Scoped egress authorization
///
/// Holds the authorized IP while the grant is active. The grant is withdrawn
/// by [`EgressGuard::release`] or, if that never ran, when the guard is
/// dropped.
pub struct EgressGuard {
    authorizer: Arc<dyn EgressAuthorizer>,
    authorized_ip: Mutex<Option<String>>,
}

impl EgressGuard {
    /// Creates a guard and authorizes the current IP
    ///
    /// An authorization failure is logged and the guard is still returned,
    /// so the crawl can proceed optimistically.
    pub async fn acquire(authorizer: Arc<dyn EgressAuthorizer>) -> Self {
        let guard = Self {
            authorizer,
            authorized_ip: Mutex::new(None),
        };

        if let Err(e) = guard.authorize().await {
            tracing::warn!("Could not authorize egress IP, continuing anyway: {}", e);
        }

        guard
    }

    /// Authorizes the current IP unless this guard already did
    pub async fn authorize(&self) -> Result<(), EgressError> {
        let mut authorized = self.authorized_ip.lock().await;
        if authorized.is_some() {
            return Ok(());
        }

        let ip = self.authorizer.current_ip().await?;
        tracing::info!("Authorizing egress IP {}", ip);
        self.authorizer.authorize(&ip).await?;
        tracing::info!("Egress IP {} authorized", ip);

        *authorized = Some(ip);
        Ok(())
    }

    /// Returns the IP currently authorized by this guard
    pub async fn authorized_ip(&self) -> Option<String> {
        self.authorized_ip.lock().await.clone()
    }

    /// Revokes the grant; later calls are no-ops
    pub async fn release(&self) {
        let ip = self.authorized_ip.lock().await.take();
        if let Some(ip) = ip {
            revoke_logged(self.authorizer.as_ref(), &ip).await;
        }
    }
}

impl Drop for EgressGuard {
    fn drop(&mut self) {
        let Some(ip) = self.authorized_ip.get_mut().take() else {
            return;
        };

        let authorizer = Arc::clone(&self.authorizer);
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| {
                    handle.block_on(revoke_logged(authorizer.as_ref(), &ip))
                });
            }
            _ => {
                // Not inside a runtime we may block: revoke from a helper thread.
                let joined = std::thread::spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(revoke_logged(authorizer.as_ref(), &ip)),
                        Err(e) => tracing::error!("Failed to revoke egress IP {}: {}", ip, e),
                    }
                })
                .join();
                if joined.is_err() {
                    tracing::error!("Egress revocation thread panicked");
                }
            }
        }
    }
}

async fn revoke_logged(authorizer: &dyn EgressAuthorizer, ip: &str) {
    tracing::info!("Revoking egress IP {}", ip);
    match authorizer.revoke(ip).await {
        Ok(()) => tracing::info!("Egress IP {} revoked", ip),
        Err(e) => tracing::error!("Failed to revoke egress IP {}: {}", ip, e),
    }
}
