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

//! TGE Fixing 1 quotes from the PGE datahub API.

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use pge_tge_core::{RemoteDataSource, Result, TgeError};
use pge_tge_types::HourRecord;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_BASE_URL: &str = "https://datahub.gkpge.pl/api/tge/quote";

/// The datahub rejects requests without a client identifier
pub const DEFAULT_USER_AGENT: &str = concat!("pge-tge/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timestamps carry a literal `+00:00` but are market wall-clock time
const QUOTATION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    attributes: Vec<QuoteAttribute>,
}

#[derive(Debug, Deserialize)]
struct QuoteAttribute {
    name: String,
    #[serde(default)]
    value: Value,
}

impl QuoteEntry {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }
}

/// Blocking client for the datahub quote endpoint.
///
/// Must be created and called off the async scheduler; the coordinator
/// already runs fetches on a blocking worker.
#[derive(Debug, Clone)]
pub struct PgeDataHubSource {
    client: Client,
    base_url: String,
    tz: Tz,
}

impl PgeDataHubSource {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
        tz: Tz,
    ) -> Result<Self> {
        if user_agent.trim().is_empty() {
            return Err(TgeError::Config(
                "user agent must not be empty, the datahub rejects anonymous clients".to_owned(),
            ));
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TgeError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            tz,
        })
    }

    pub fn with_defaults(tz: Tz) -> Result<Self> {
        Self::new(DEFAULT_BASE_URL, DEFAULT_USER_AGENT, DEFAULT_TIMEOUT, tz)
    }

    /// Query URL for an inclusive date range
    pub fn quote_url(&self, from: NaiveDate, to: NaiveDate) -> String {
        format!(
            "{}?date_from={}&date_to={}&source=TGE&contract=Fix_1&limit=100&page=1",
            self.base_url.trim_end_matches('/'),
            from.format("%Y-%m-%d+00:00:00"),
            to.format("%Y-%m-%d+23:59:59"),
        )
    }
}

impl RemoteDataSource for PgeDataHubSource {
    fn name(&self) -> &str {
        "PGE datahub"
    }

    fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<HourRecord>> {
        let url = self.quote_url(from, to);
        info!("Downloading PGE TGE data from: {}", url);

        let response = self.client.get(&url).send().map_err(|e| TgeError::Fetch {
            status: e.status().map(|s| s.as_u16()),
            body: None,
            message: format!("Failed to send request to PGE datahub: {e}"),
        })?;

        let status = response.status();
        let body = response.text().map_err(|e| TgeError::Fetch {
            status: Some(status.as_u16()),
            body: None,
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            error!("Failed to download PGE TGE data: HTTP {}", status);
            debug!("PGE TGE response body: {}", body);
            return Err(TgeError::Fetch {
                status: Some(status.as_u16()),
                body: Some(body),
                message: format!("HTTP {status}"),
            });
        }

        parse_quotes(&body, self.tz).inspect_err(|_| {
            debug!("Unparseable PGE TGE response body: {}", body);
        })
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a datahub response body into hourly records in `tz`
pub fn parse_quotes(body: &str, tz: Tz) -> Result<Vec<HourRecord>> {
    let entries: Vec<QuoteEntry> = serde_json::from_str(body)
        .map_err(|e| TgeError::MalformedPayload(format!("unexpected response shape: {e}")))?;

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let missing =
                |name: &str| TgeError::MalformedPayload(format!("entry {idx}: missing or invalid '{name}'"));

            let time_str = entry
                .attribute("quotationDate")
                .and_then(Value::as_str)
                .ok_or_else(|| missing("quotationDate"))?;
            let naive = NaiveDateTime::parse_from_str(time_str, QUOTATION_DATE_FORMAT).map_err(|e| {
                TgeError::MalformedPayload(format!("entry {idx}: bad quotationDate '{time_str}': {e}"))
            })?;
            let time = tz
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| {
                    TgeError::MalformedPayload(format!(
                        "entry {idx}: {naive} does not exist in {tz}"
                    ))
                })?
                .fixed_offset();

            let rate = entry
                .attribute("price")
                .and_then(number)
                .ok_or_else(|| missing("price"))?;
            let volume = entry
                .attribute("volume")
                .and_then(number)
                .ok_or_else(|| missing("volume"))?;

            Ok(HourRecord::new(time, rate, volume))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};
    use chrono_tz::Europe::Warsaw;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn entry(time: &str, price: Value, volume: Value) -> Value {
        json!({
            "id": 1,
            "attributes": [
                { "name": "quotationDate", "value": time },
                { "name": "price", "value": price },
                { "name": "volume", "value": volume },
                { "name": "contract", "value": "Fix_1" }
            ]
        })
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    #[test]
    fn test_parse_quotes_as_local_time() {
        let body = json!([
            entry("2025-06-10T00:00:00+00:00", json!("412.35"), json!("1520.4")),
            entry("2025-06-10T13:00:00+00:00", json!(398.1), json!(1200)),
        ])
        .to_string();

        let records = parse_quotes(&body, Warsaw).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].time.offset(), &FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(records[0].hour(), 0);
        assert_eq!(records[0].date(), date(10));
        assert_eq!(records[0].rate, 412.35);
        assert_eq!(records[0].volume, 1520.4);

        assert_eq!(records[1].time.hour(), 13);
        assert_eq!(records[1].rate, 398.1);
        assert_eq!(records[1].volume, 1200.0);
    }

    #[test]
    fn test_parse_quotes_winter_offset() {
        let body = json!([entry("2025-01-15T07:00:00+00:00", json!("500"), json!("1"))]).to_string();
        let records = parse_quotes(&body, Warsaw).unwrap();
        assert_eq!(records[0].time.to_rfc3339(), "2025-01-15T07:00:00+01:00");
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_quotes("[]", Warsaw).unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        for body in [
            "not json".to_owned(),
            json!({ "data": [] }).to_string(),
            json!([{ "attributes": [{ "name": "price", "value": "1" }] }]).to_string(),
            json!([entry("10.06.2025 00:00", json!("1"), json!("1"))]).to_string(),
            json!([entry("2025-06-10T00:00:00+00:00", json!("abc"), json!("1"))]).to_string(),
            json!([entry("2025-06-10T00:00:00+00:00", json!("1"), Value::Null)]).to_string(),
        ] {
            assert!(
                matches!(parse_quotes(&body, Warsaw), Err(TgeError::MalformedPayload(_))),
                "expected malformed payload for {body}"
            );
        }
    }

    #[test]
    fn test_quote_url() {
        let source = PgeDataHubSource::new("http://localhost/api/tge/quote/", "test", DEFAULT_TIMEOUT, Warsaw).unwrap();
        assert_eq!(
            source.quote_url(date(9), date(10)),
            "http://localhost/api/tge/quote?date_from=2025-06-09+00:00:00&date_to=2025-06-10+23:59:59&source=TGE&contract=Fix_1&limit=100&page=1"
        );
    }

    #[test]
    fn test_rejects_empty_user_agent() {
        let result = PgeDataHubSource::new(DEFAULT_BASE_URL, "  ", DEFAULT_TIMEOUT, Warsaw);
        assert!(matches!(result, Err(TgeError::Config(_))));
    }

    #[test]
    fn test_fetch_success() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/api/tge/quote")
            .match_header("user-agent", "pge-tge-test")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("date_from".into(), "2025-06-09 00:00:00".into()),
                Matcher::UrlEncoded("date_to".into(), "2025-06-10 23:59:59".into()),
                Matcher::UrlEncoded("contract".into(), "Fix_1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!([entry("2025-06-10T05:00:00+00:00", json!("333.3"), json!("10"))]).to_string())
            .create();

        let source = PgeDataHubSource::new(
            format!("{}/api/tge/quote", server.url()),
            "pge-tge-test",
            DEFAULT_TIMEOUT,
            Warsaw,
        )
        .unwrap();
        let records = source.fetch(date(9), date(10)).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rate, 333.3);
        mock.assert();
    }

    #[test]
    fn test_fetch_non_200() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/api/tge/quote")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create();

        let source = PgeDataHubSource::new(
            format!("{}/api/tge/quote", server.url()),
            DEFAULT_USER_AGENT,
            DEFAULT_TIMEOUT,
            Warsaw,
        )
        .unwrap();
        let err = source.fetch(date(9), date(10)).unwrap_err();

        match err {
            TgeError::Fetch { status, body, .. } => {
                assert_eq!(status, Some(403));
                assert_eq!(body.as_deref(), Some("forbidden"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert();
    }

    #[test]
    fn test_fetch_malformed_body() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/api/tge/quote")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create();

        let source = PgeDataHubSource::new(
            format!("{}/api/tge/quote", server.url()),
            DEFAULT_USER_AGENT,
            DEFAULT_TIMEOUT,
            Warsaw,
        )
        .unwrap();
        let err = source.fetch(date(9), date(10)).unwrap_err();
        assert!(err.is_refresh_failure());
        assert!(matches!(err, TgeError::MalformedPayload(_)));
    }
}
