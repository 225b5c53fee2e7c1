//! Outbound calls to the ad server: ad requests and attribution pixels.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::{error::TransportError, profile::UserProfile};

/// Path of the ad-serving endpoint, relative to the ad server host.
pub const AD_PATH: &str = "/ad/get";

/// A request for an ad, shaped like the visitor it is sent on behalf of.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdRequest {
    /// The visitor, flattened into the request body.
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Fresh for every request.
    pub request_id: Uuid,
    /// Fresh for every request. Pools do not carry user ids.
    pub user_id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl AdRequest {
    /// Build a request for `profile` with freshly generated identifiers.
    pub fn new(profile: UserProfile, timestamp: i64) -> Self {
        Self {
            profile,
            request_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            timestamp,
        }
    }
}

/// An ad served in response to a request, with its attribution pixels.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AdCandidate {
    /// Ad identifier. Numeric or string, depending on the ad server.
    #[serde(default)]
    pub id: serde_json::Value,
    /// Pixel to fire once the ad is shown.
    #[serde(default)]
    pub impression_url: Option<String>,
    /// Pixel to fire on a click.
    #[serde(default)]
    pub click_url: Option<String>,
    /// May contain a value placeholder, substituted before the pixel is scheduled.
    #[serde(default)]
    pub conversion_url: Option<String>,
}

impl AdCandidate {
    /// The identifier as it should appear in a URL.
    pub fn id_string(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// The outcome of an ad request which received a status code.
#[derive(Debug, Clone, PartialEq)]
pub struct AdResponse {
    /// The URL the request was sent to.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Present only for successful responses which served an ad.
    pub candidate: Option<AdCandidate>,
}

impl AdResponse {
    /// Is the status in the 2xx range?
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Deserialize)]
struct AdEnvelope {
    #[serde(default)]
    ad: Option<AdCandidate>,
}

/// Sends requests to the ad server.
///
/// Non-2xx responses are not errors: only failures to get any status at all are.
#[async_trait]
pub trait AdTransport: Debug + Send + Sync + 'static {
    /// Ask the ad server for an ad.
    async fn request_ad(&self, request: &AdRequest) -> Result<AdResponse, TransportError>;

    /// Call an attribution pixel, returning the status code.
    async fn fire_pixel(&self, url: &str, timeout: Duration) -> Result<u16, TransportError>;
}

/// [`AdTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    ad_url: String,
}

impl HttpTransport {
    /// Talk to the ad server at `host`, e.g. `http://localhost:3000`.
    pub fn new(host: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let ad_url = format!("{}{AD_PATH}", host.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| TransportError::Request {
                url: ad_url.clone(),
                source,
            })?;
        Ok(Self { client, ad_url })
    }
}

#[async_trait]
impl AdTransport for HttpTransport {
    async fn request_ad(&self, request: &AdRequest) -> Result<AdResponse, TransportError> {
        let response = self
            .client
            .post(&self.ad_url)
            .json(request)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: self.ad_url.clone(),
                source,
            })?;

        let status = response.status();
        let candidate = if status.is_success() {
            match response.json::<AdEnvelope>().await {
                Ok(envelope) => envelope.ad,
                Err(err) => {
                    debug!(error = %err, "Ad response body was not an ad envelope");
                    None
                }
            }
        } else {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "Ad request rejected");
            None
        };

        Ok(AdResponse {
            url: self.ad_url.clone(),
            status: status.as_u16(),
            candidate,
        })
    }

    async fn fire_pixel(&self, url: &str, timeout: Duration) -> Result<u16, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(response.status().as_u16())
    }
}
