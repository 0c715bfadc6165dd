//! Control plane API client
//!
//! HTTP client for the control plane that owns channels, API tokens and
//! quota. It backs the channel store, the quota ledger and the channel
//! disabler used by the relay.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};

use crate::{
    billing::{QuotaLedger, QuotaRequest, QuotaTicket, Usage},
    channel::{Channel, ChannelId, ChannelStore},
    config::Config,
    error::{AppError, AppResult},
    relay::ChannelDisabler,
};

use super::models::{ApiResponse, DisableChannelRequest, ReservationData, SettleRequest, TokenInfo};

/// Control plane API client
pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ControlPlaneClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self::with_base_url(client, &config.control_plane_url, &config.control_plane_api_key)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Build headers with API key authentication
    fn api_key_headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| AppError::ControlPlane("control plane API key is not a valid header value".to_string()))?;
        headers.insert("x-api-key", key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Read the `data` field of a successful response
    async fn read_data<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> AppResult<T> {
        let body = response.text().await?;
        match serde_json::from_str::<ApiResponse<T>>(&body) {
            Ok(r) => Ok(r.data),
            Err(e) => {
                error!(error = %e, body = %body, "Failed to parse control plane {} response", what);
                Err(AppError::ControlPlane(format!(
                    "Failed to parse {} response: {}",
                    what, e
                )))
            }
        }
    }

    async fn failure(response: reqwest::Response, what: &str) -> AppError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        error!(status = %status, body = %text, "Control plane {} request failed", what);
        AppError::ControlPlane(format!("{} API error {}: {}", what, status, text))
    }

    /// Resolve an API token by its sha256 hash
    #[instrument(skip(self, token_hash), fields(token_prefix = %&token_hash[..token_hash.len().min(8)]))]
    pub async fn resolve_token(&self, token_hash: &str) -> AppResult<TokenInfo> {
        let url = format!("{}/api/v1/tokens/{}", self.base_url, token_hash);
        debug!(url = %url, "Resolving API token");

        let response = self
            .client
            .get(&url)
            .headers(self.api_key_headers()?)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Self::read_data(response, "token").await,
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => {
                warn!("API token rejected by control plane");
                Err(AppError::InvalidToken)
            }
            _ => Err(Self::failure(response, "token").await),
        }
    }
}

#[async_trait]
impl ChannelStore for ControlPlaneClient {
    #[instrument(skip(self))]
    async fn list_enabled_channels(&self) -> AppResult<Vec<Channel>> {
        let url = format!("{}/api/v1/channels?status=enabled", self.base_url);
        debug!(url = %url, "Fetching enabled channels");

        let response = self
            .client
            .get(&url)
            .headers(self.api_key_headers()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "channels").await);
        }

        let channels: Vec<Channel> = Self::read_data(response, "channels").await?;
        debug!(count = channels.len(), "Fetched enabled channels");
        Ok(channels)
    }

    #[instrument(skip(self))]
    async fn get_channel_by_id(&self, id: ChannelId) -> AppResult<Option<Channel>> {
        let url = format!("{}/api/v1/channels/{}", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .headers(self.api_key_headers()?)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(Some(Self::read_data(response, "channel").await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::failure(response, "channel").await),
        }
    }
}

#[async_trait]
impl QuotaLedger for ControlPlaneClient {
    #[instrument(skip(self, request), fields(channel_id = request.channel_id, prompt_tokens = request.prompt_tokens))]
    async fn pre_consume(&self, request: &QuotaRequest) -> AppResult<QuotaTicket> {
        let url = format!("{}/api/v1/quota/reservations", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.api_key_headers()?)
            .json(request)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {
                let data: ReservationData = Self::read_data(response, "reservation").await?;
                debug!(reservation_id = %data.id, "Quota reserved");
                Ok(QuotaTicket {
                    id: data.id,
                    prompt_tokens: request.prompt_tokens,
                })
            }
            StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => {
                let text = response.text().await.unwrap_or_default();
                warn!(body = %text, "Quota reservation refused");
                Err(AppError::Forbidden("insufficient quota".to_string()))
            }
            _ => Err(Self::failure(response, "reservation").await),
        }
    }

    #[instrument(skip(self, ticket, usage), fields(reservation_id = %ticket.id))]
    async fn consume(&self, ticket: QuotaTicket, usage: &Usage, is_stream: bool) -> AppResult<()> {
        let url = format!("{}/api/v1/quota/reservations/{}/settle", self.base_url, ticket.id);
        let request = SettleRequest {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            is_stream,
        };

        let response = self
            .client
            .post(&url)
            .headers(self.api_key_headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "settle").await);
        }
        debug!("Quota settled");
        Ok(())
    }

    #[instrument(skip(self, ticket), fields(reservation_id = %ticket.id))]
    async fn undo(&self, ticket: QuotaTicket) -> AppResult<()> {
        let url = format!("{}/api/v1/quota/reservations/{}", self.base_url, ticket.id);

        let response = self
            .client
            .delete(&url)
            .headers(self.api_key_headers()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "refund").await);
        }
        debug!("Quota reservation refunded");
        Ok(())
    }
}

#[async_trait]
impl ChannelDisabler for ControlPlaneClient {
    #[instrument(skip(self, reason))]
    async fn disable_channel(
        &self,
        channel_id: ChannelId,
        channel_name: &str,
        reason: &str,
        automatic: bool,
    ) -> AppResult<()> {
        let url = format!("{}/api/v1/channels/{}/disable", self.base_url, channel_id);
        let request = DisableChannelRequest {
            name: channel_name.to_string(),
            reason: reason.to_string(),
            automatic,
        };

        let response = self
            .client
            .post(&url)
            .headers(self.api_key_headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "disable").await);
        }
        Ok(())
    }
}
