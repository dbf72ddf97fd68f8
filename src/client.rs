//! Upstream NZTAB HTTP client: one call per race, plus the discovery feed
//! for daily meetings. The only layer in the crate that tolerates untyped
//! JSON before handing off to the typed `transform` stage.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};

use crate::errors::FetchError;
use crate::settings::Upstream;
use crate::transform::types::RaceData;

type DefaultDirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, serde::Deserialize)]
struct MeetingsEnvelope {
    data: MeetingsData,
}

#[derive(Debug, serde::Deserialize)]
struct MeetingsData {
    #[serde(default)]
    meetings: Vec<RawMeetingListing>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawMeetingListing {
    pub meeting_id: String,
    pub meeting_name: String,
    pub country: String,
    pub category: String,
    pub race_type: String,
    pub date: String,
    #[serde(default)]
    pub races: Vec<RawRaceListing>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawRaceListing {
    pub race_id: String,
    pub race_number: i32,
    pub name: String,
    pub start_time_nz: String,
    pub status: String,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_race_data(&self, race_id: &str, timeout: Duration) -> Result<Option<RaceData>, FetchError>;
    async fn fetch_racing_meetings(&self, date: chrono::NaiveDate) -> Result<Vec<RawMeetingListing>, FetchError>;
}

pub struct NzTabClient {
    http: Client,
    limiter: Arc<DefaultDirectRateLimiter>,
    config: Upstream,
}

impl NzTabClient {
    pub fn new(config: Upstream) -> Self {
        let http = Client::builder()
            .build()
            .expect("reqwest client builder never fails with no custom TLS config");
        let quota = Quota::per_second(
            NonZeroU32::new(config.rate_limit_per_sec.max(1)).expect("rate_limit_per_sec clamped to >= 1"),
        );
        Self {
            http,
            limiter: Arc::new(RateLimiter::direct(quota)),
            config,
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Accept", "application/json".parse().unwrap());
        headers.insert("User-Agent", "raceday-ingest".parse().unwrap());
        headers.insert("From", self.config.contact.parse().unwrap());
        headers.insert("X-Partner", self.config.partner.parse().unwrap());
        headers.insert("X-Partner-ID", self.config.partner_id.parse().unwrap());
        headers
    }
}

#[async_trait]
impl UpstreamClient for NzTabClient {
    async fn fetch_race_data(&self, race_id: &str, timeout: Duration) -> Result<Option<RaceData>, FetchError> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/affiliates/v1/racing/events/{}?with_tote_trends_data=true&with_biggest_bet=true&with_money_tracker=true&will_pays=true",
            self.config.base_url, race_id
        );

        let response = self
            .http
            .get(&url)
            .headers(self.headers())
            .timeout(timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(FetchError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(e) => return Err(FetchError::Transport(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: crate::transform::types::RaceDataEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(Some(envelope.data))
    }

    async fn fetch_racing_meetings(&self, date: chrono::NaiveDate) -> Result<Vec<RawMeetingListing>, FetchError> {
        self.limiter.until_ready().await;

        let date_str = date.format("%Y-%m-%d").to_string();
        let url = format!(
            "{}/affiliates/v1/racing/meetings?date_from={}&date_to={}",
            self.config.base_url, date_str, date_str
        );

        let response = self
            .http
            .get(&url)
            .headers(self.headers())
            .timeout(Duration::from_millis(self.config.fetch_timeout_ms_bulk))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        timeout_ms: self.config.fetch_timeout_ms_bulk,
                    }
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: MeetingsEnvelope = response.json().await.map_err(|e| FetchError::Decode(e.to_string()))?;

        // Filter to {AUS, NZ} x {Thoroughbred, Harness}.
        let filtered = envelope
            .data
            .meetings
            .into_iter()
            .filter(|m| {
                let country_ok = matches!(m.country.as_str(), "AUS" | "NZ");
                let category_ok = matches!(
                    m.category.as_str(),
                    "Thoroughbred Horse Racing" | "Harness Horse Racing"
                );
                country_ok && category_ok
            })
            .collect();

        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_retryable_classification_matches_spec() {
        assert!(FetchError::Timeout { timeout_ms: 15_000 }.retryable());
        assert!(FetchError::Transport("connection reset".into()).retryable());
        assert!(FetchError::Http {
            status: 503,
            body: String::new()
        }
        .retryable());
        assert!(!FetchError::Http {
            status: 400,
            body: String::new()
        }
        .retryable());
        assert!(!FetchError::Decode("bad json".into()).retryable());
    }
}
