//! HTTP implementation of the egress authorizer
//!
//! The allow-list service is reached over plain HTTP:
//! `POST <endpoint>` grants and `DELETE <endpoint>` withdraws, both with a
//! JSON body naming the IP and its /32 range.

use crate::config::EgressConfig;
use crate::egress::{EgressAuthorizer, EgressError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::net::IpAddr;

/// Egress authorizer backed by an HTTP allow-list endpoint
pub struct HttpEgressAuthorizer {
    client: Client,
    ip_lookup_url: String,
    endpoint: String,
}

impl HttpEgressAuthorizer {
    pub fn new(config: &EgressConfig) -> Result<Self, EgressError> {
        // Revocation may run on a runtime other than the one that authorized,
        // so no connection is kept for reuse.
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            ip_lookup_url: config.ip_lookup_url.clone(),
            endpoint: config.endpoint.clone(),
        })
    }

    async fn send(&self, method: reqwest::Method, ip: &str) -> Result<(), EgressError> {
        let body = json!({ "ip": ip, "range": format!("{}/32", ip) });
        let response = self
            .client
            .request(method, &self.endpoint)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EgressError::Rejected {
                endpoint: self.endpoint.clone(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl EgressAuthorizer for HttpEgressAuthorizer {
    async fn current_ip(&self) -> Result<String, EgressError> {
        let response = self
            .client
            .get(&self.ip_lookup_url)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        let ip = text.trim();

        ip.parse::<IpAddr>()
            .map_err(|e| EgressError::Lookup(format!("'{}' is not an IP address: {}", ip, e)))?;

        Ok(ip.to_string())
    }

    async fn authorize(&self, ip: &str) -> Result<(), EgressError> {
        self.send(reqwest::Method::POST, ip).await
    }

    async fn revoke(&self, ip: &str) -> Result<(), EgressError> {
        self.send(reqwest::Method::DELETE, ip).await
    }
}
