//! Access to the protected resource once payment is accepted.
//!
//! The paygate does not store content itself: a [`ResourceProvider`] turns an
//! accepted payment into a time-bounded access grant. Provider failures are
//! infrastructure faults and surface as HTTP 500, outside the payment
//! error taxonomy.

use serde::Serialize;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use url::Url;

use crate::timestamp::UnixTimestamp;

/// A time-bounded grant of access to the protected resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGrant {
    /// URL the client may fetch until `expires_at`.
    pub url: Url,
    /// Unix time after which the URL stops working.
    pub expires_at: UnixTimestamp,
    /// Free-form metadata describing the resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Issues access grants for the protected resource.
pub trait ResourceProvider {
    /// The error type returned by this provider.
    type Error: Debug + Display;

    /// Issues a fresh grant for one accepted payment.
    fn grant(&self) -> impl Future<Output = Result<ResourceGrant, Self::Error>> + Send;
}

impl<T: ResourceProvider> ResourceProvider for Arc<T> {
    type Error = T::Error;

    fn grant(&self) -> impl Future<Output = Result<ResourceGrant, Self::Error>> + Send {
        self.as_ref().grant()
    }
}

/// Errors raised while minting a signed access URL.
#[derive(Debug, thiserror::Error)]
pub enum SignedUrlError {
    #[error("Failed to attach expiry to access URL: {0}")]
    UrlRewrite(String),
}

/// A [`ResourceProvider`] that stamps a configured access URL with an expiry.
///
/// Stands in for storage backends issuing signed URLs: the grant carries the
/// upstream URL with an `expires` query parameter bound to the configured TTL.
#[derive(Debug, Clone)]
pub struct SignedUrlProvider {
    access_url: Url,
    ttl_seconds: u64,
    metadata: Option<serde_json::Value>,
}

impl SignedUrlProvider {
    pub fn new(access_url: Url, ttl_seconds: u64, metadata: Option<serde_json::Value>) -> Self {
        Self {
            access_url,
            ttl_seconds,
            metadata,
        }
    }
}

impl ResourceProvider for SignedUrlProvider {
    type Error = SignedUrlError;

    fn grant(&self) -> impl Future<Output = Result<ResourceGrant, Self::Error>> + Send {
        let expires_at = UnixTimestamp::now() + self.ttl_seconds;
        let mut url = self.access_url.clone();
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string());
        let grant = ResourceGrant {
            url,
            expires_at,
            metadata: self.metadata.clone(),
        };
        async move { Ok(grant) }
    }
}
