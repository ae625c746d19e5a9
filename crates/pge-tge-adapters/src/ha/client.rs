// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of PGE TGE.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use crate::ha::errors::{HaError, HaResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SUPERVISOR_URL: &str = "http://supervisor/core";
const LOCAL_HA_URL: &str = "http://localhost:8123";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal Home Assistant REST client: writes sensor states, nothing else
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
    attempts: u32,
    backoff: Duration,
}

impl std::fmt::Debug for HomeAssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantClient")
            .field("base_url", &self.base_url)
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl HomeAssistantClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> HaResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HaError::ConfigError(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            client,
            attempts: 3,
            backoff: Duration::from_millis(500),
        })
    }

    /// Addon mode: the supervisor proxies Core and injects `SUPERVISOR_TOKEN`
    pub fn from_supervisor() -> HaResult<Self> {
        let token = std::env::var("SUPERVISOR_TOKEN")
            .map_err(|_| HaError::ConfigError("SUPERVISOR_TOKEN is not set".to_owned()))?;

        info!("Publishing sensors through the HA supervisor proxy");
        Self::new(SUPERVISOR_URL, token)
    }

    /// Standalone mode. The URL defaults to a local Core; a token is required.
    pub fn from_config(ha_base_url: Option<String>, ha_token: Option<String>) -> HaResult<Self> {
        let Some(token) = ha_token.filter(|t| !t.trim().is_empty()) else {
            return Err(HaError::ConfigError(
                "system.ha_token (or HA_TOKEN) is required outside the addon".to_owned(),
            ));
        };
        let base_url = ha_base_url.unwrap_or_else(|| LOCAL_HA_URL.to_owned());

        info!("Publishing sensors to Home Assistant at {base_url}");
        Self::new(base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of send attempts per request and the initial backoff, doubled
    /// after every transport failure
    pub fn with_retry_config(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// `POST /api/states/{entity_id}`. Core answers 201 for a new entity and
    /// 200 for an update.
    pub async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Map<String, Value>,
    ) -> HaResult<()> {
        if !is_valid_entity_id(entity_id) {
            return Err(HaError::InvalidEntityId(entity_id.to_owned()));
        }

        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let body = json!({ "state": state, "attributes": attributes });
        debug!("📤 {entity_id} = '{state}'");

        let response = self.send(|| self.client.post(&url).json(&body)).await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("❌ Home Assistant rejected the token while writing {entity_id}");
                Err(HaError::AuthenticationFailed)
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                error!("❌ Writing {entity_id} failed with {status}: {message}");
                Err(HaError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// `GET /api/`; transport errors count as "not reachable", not as failures
    pub async fn ping(&self) -> HaResult<bool> {
        let url = format!("{}/api/", self.base_url);
        let reachable = match self.client.get(&url).bearer_auth(&self.token).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Home Assistant ping answered {}", response.status());
                false
            }
            Err(e) => {
                warn!("Home Assistant ping failed: {e}");
                false
            }
        };
        Ok(reachable)
    }

    /// Send with bearer auth, retrying transport errors only; any HTTP status
    /// is returned to the caller
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> HaResult<Response> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().bearer_auth(&self.token).send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= self.attempts => {
                    error!("Giving up after {attempt} attempt(s): {e}");
                    return Err(HaError::HttpError(e));
                }
                Err(e) => {
                    warn!("Attempt {attempt}/{} failed: {e}, retrying in {delay:?}", self.attempts);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

fn is_valid_entity_id(entity_id: &str) -> bool {
    entity_id
        .split_once('.')
        .is_some_and(|(domain, object)| !domain.is_empty() && !object.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn attributes() -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("unit_of_measurement".to_owned(), json!("zł/MWh"));
        attributes
    }

    #[tokio::test]
    async fn test_set_state_created() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/states/sensor.pge_tge_fixing_1_rate")
            .match_header("authorization", "Bearer test_token")
            .match_body(Matcher::Json(json!({
                "state": "412.35",
                "attributes": { "unit_of_measurement": "zł/MWh" }
            })))
            .with_status(201)
            .create_async()
            .await;

        let client = HomeAssistantClient::new(server.url(), "test_token").unwrap();
        let result = client
            .set_state("sensor.pge_tge_fixing_1_rate", "412.35", attributes())
            .await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_state_unauthorized() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/states/sensor.pge_tge_fixing_1_rate")
            .with_status(401)
            .create_async()
            .await;

        let client = HomeAssistantClient::new(server.url(), "bad_token").unwrap();
        let result = client
            .set_state("sensor.pge_tge_fixing_1_rate", "1", Map::new())
            .await;

        assert!(matches!(result, Err(HaError::AuthenticationFailed)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_state_api_error_keeps_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/states/sensor.pge_tge_fixing_1_rate")
            .with_status(400)
            .with_body("Invalid state")
            .create_async()
            .await;

        let client = HomeAssistantClient::new(server.url(), "token").unwrap();
        let result = client
            .set_state("sensor.pge_tge_fixing_1_rate", "1", Map::new())
            .await;

        match result {
            Err(HaError::ApiError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid state");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_state_rejects_malformed_entity_id() {
        let client = HomeAssistantClient::new("http://localhost", "token").unwrap();
        for entity_id in ["pge_tge", ".rate", "sensor."] {
            let result = client.set_state(entity_id, "1", Map::new()).await;
            assert!(matches!(result, Err(HaError::InvalidEntityId(_))));
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/")
            .match_header("authorization", "Bearer test_token")
            .with_status(200)
            .create_async()
            .await;

        let client = HomeAssistantClient::new(server.url(), "test_token").unwrap();
        assert!(client.ping().await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping_unreachable_is_false() {
        let client = HomeAssistantClient::new("http://127.0.0.1:9", "token").unwrap();
        assert!(!client.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_send_gives_up_on_unreachable_host() {
        // Nothing listens on the discard port locally
        let client = HomeAssistantClient::new("http://127.0.0.1:9", "token")
            .unwrap()
            .with_retry_config(2, Duration::from_millis(1));

        let result = client
            .set_state("sensor.pge_tge_fixing_1_rate", "1", Map::new())
            .await;
        assert!(matches!(result, Err(HaError::HttpError(_))));
    }

    #[test]
    fn test_from_config() {
        let client = HomeAssistantClient::from_config(
            Some("http://ha.local:8123/".to_owned()),
            Some("token".to_owned()),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://ha.local:8123");

        let client = HomeAssistantClient::from_config(None, Some("token".to_owned())).unwrap();
        assert_eq!(client.base_url(), LOCAL_HA_URL);

        assert!(matches!(
            HomeAssistantClient::from_config(None, Some(" ".to_owned())),
            Err(HaError::ConfigError(_))
        ));
    }
}
