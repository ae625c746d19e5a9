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

//! Publishes metric states as Home Assistant sensors.

use crate::ha::client::HomeAssistantClient;
use async_trait::async_trait;
use pge_tge_core::MetricPublisher;
use pge_tge_types::{MetricField, MetricState, SeriesPoint};
use serde_json::{Map, Value, json};

const DEFAULT_ENTITY_PREFIX: &str = "sensor.pge_tge";
const DEFAULT_NAME: &str = "PGE TGE";

const STATE_UNAVAILABLE: &str = "unavailable";
const STATE_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone)]
pub struct HaSensorPublisher {
    client: HomeAssistantClient,
    entity_prefix: String,
    name: String,
}

impl HaSensorPublisher {
    pub fn new(client: HomeAssistantClient) -> Self {
        Self {
            client,
            entity_prefix: DEFAULT_ENTITY_PREFIX.to_owned(),
            name: DEFAULT_NAME.to_owned(),
        }
    }

    /// e.g. `sensor.pge_tge_fixing_1_rate`
    pub fn entity_id(&self, field: MetricField) -> String {
        let suffix = match field {
            MetricField::Rate => "fixing_1_rate",
            MetricField::Volume => "fixing_1_volume",
        };
        format!("{}_{}", self.entity_prefix, suffix)
    }

    /// State string and attributes for one metric
    pub fn build_payload(&self, state: &MetricState) -> (String, Map<String, Value>) {
        let state_str = match (state.available, state.value) {
            (false, _) => STATE_UNAVAILABLE.to_owned(),
            (true, None) => STATE_UNKNOWN.to_owned(),
            (true, Some(value)) => value.to_string(),
        };

        let list_name = state.field.attribute_name();
        let item_key = state.field.attribute_parameter_name();
        let series = |points: &[SeriesPoint]| -> Value {
            Value::Array(
                points
                    .iter()
                    .map(|p| {
                        let mut item = Map::new();
                        item.insert("time".to_owned(), json!(p.time.to_rfc3339()));
                        item.insert(item_key.to_owned(), json!(p.value));
                        Value::Object(item)
                    })
                    .collect(),
            )
        };

        let mut attributes = Map::new();
        attributes.insert(format!("{list_name}_today"), series(&state.today));
        attributes.insert(format!("{list_name}_tomorrow"), series(&state.tomorrow));
        attributes.insert(list_name.to_owned(), series(&state.combined));
        attributes.insert("unit_of_measurement".to_owned(), json!(state.unit));
        attributes.insert(
            "friendly_name".to_owned(),
            json!(format!("{} {}", self.name, state.field.display_name())),
        );
        attributes.insert("icon".to_owned(), json!(state.field.icon()));
        attributes.insert("state_class".to_owned(), json!("measurement"));
        if let Some(precision) = state.display_precision {
            attributes.insert("suggested_display_precision".to_owned(), json!(precision));
        }

        (state_str, attributes)
    }
}

#[async_trait]
impl MetricPublisher for HaSensorPublisher {
    fn name(&self) -> &str {
        "home-assistant"
    }

    async fn publish(&self, state: &MetricState) -> anyhow::Result<()> {
        let entity_id = self.entity_id(state.field);
        let (state_str, attributes) = self.build_payload(state);
        self.client
            .set_state(&entity_id, &state_str, attributes)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use mockito::{Matcher, Server};

    fn point(hour: u32, value: f64) -> SeriesPoint {
        SeriesPoint {
            time: FixedOffset::east_opt(2 * 3600)
                .unwrap()
                .with_ymd_and_hms(2025, 6, 10, hour, 0, 0)
                .unwrap(),
            value,
        }
    }

    fn rate_state() -> MetricState {
        MetricState {
            field: MetricField::Rate,
            value: Some(41.235),
            available: true,
            today: vec![point(0, 40.0), point(1, 41.235)],
            tomorrow: Vec::new(),
            combined: vec![point(0, 40.0), point(1, 41.235)],
            unit: "gr/kWh".to_owned(),
            display_precision: Some(3),
        }
    }

    fn publisher(url: &str) -> HaSensorPublisher {
        HaSensorPublisher::new(HomeAssistantClient::new(url, "token").unwrap())
    }

    #[test]
    fn test_entity_ids() {
        let publisher = publisher("http://localhost");
        assert_eq!(publisher.entity_id(MetricField::Rate), "sensor.pge_tge_fixing_1_rate");
        assert_eq!(publisher.entity_id(MetricField::Volume), "sensor.pge_tge_fixing_1_volume");
    }

    #[test]
    fn test_rate_payload() {
        let (state, attributes) = publisher("http://localhost").build_payload(&rate_state());

        assert_eq!(state, "41.235");
        assert_eq!(attributes["prices_today"][1], json!({ "time": "2025-06-10T01:00:00+02:00", "price": 41.235 }));
        assert_eq!(attributes["prices_tomorrow"], json!([]));
        assert_eq!(attributes["prices"].as_array().unwrap().len(), 2);
        assert_eq!(attributes["unit_of_measurement"], "gr/kWh");
        assert_eq!(attributes["friendly_name"], "PGE TGE Fixing 1 Rate");
        assert_eq!(attributes["icon"], "mdi:cash");
        assert_eq!(attributes["state_class"], "measurement");
        assert_eq!(attributes["suggested_display_precision"], 3);
    }

    #[test]
    fn test_volume_payload() {
        let state = MetricState {
            field: MetricField::Volume,
            value: None,
            unit: "MWh".to_owned(),
            display_precision: None,
            ..rate_state()
        };
        let (state_str, attributes) = publisher("http://localhost").build_payload(&state);

        assert_eq!(state_str, "unknown");
        assert_eq!(attributes["volumes_today"][0]["volume"], 40.0);
        assert!(attributes.contains_key("volumes"));
        assert!(!attributes.contains_key("prices"));
        assert!(!attributes.contains_key("suggested_display_precision"));
        assert_eq!(attributes["icon"], "mdi:meter-electric");
    }

    #[test]
    fn test_unavailable_payload() {
        let state = MetricState {
            available: false,
            value: None,
            ..rate_state()
        };
        let (state_str, _) = publisher("http://localhost").build_payload(&state);
        assert_eq!(state_str, "unavailable");
    }

    #[tokio::test]
    async fn test_publish_posts_state() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/states/sensor.pge_tge_fixing_1_rate")
            .match_header("authorization", "Bearer token")
            .match_body(Matcher::PartialJson(json!({
                "state": "41.235",
                "attributes": { "unit_of_measurement": "gr/kWh" }
            })))
            .with_status(200)
            .create_async()
            .await;

        publisher(&server.url()).publish(&rate_state()).await.unwrap();
        mock.assert_async().await;
    }
}
