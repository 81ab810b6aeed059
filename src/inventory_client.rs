//! C3 — `LiveInventoryClient`: dereferences an inventory feed URL and
//! parses an integer quantity (spec §4.3).

use serde::Deserialize;

use crate::config::AppConfig;

#[derive(Debug, Deserialize)]
struct InventoryFeedBody {
    value: i64,
}

#[derive(Clone)]
pub struct LiveInventoryClient {
    http: reqwest::Client,
}

impl LiveInventoryClient {
    pub fn new(config: &AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self { http }
    }

    /// Dereferences `url` and parses a JSON object with an integer
    /// `value`. Returns `(Some(value), None)` on success or
    /// `(None, Some(message))` on any failure — timeouts and redirect
    /// handling live in the shared outbound guards (spec §4.3, §5).
    pub async fn fetch_quantity(&self, url: &str) -> (Option<i64>, Option<String>) {
        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => return (None, Some(format!("inventory feed request failed: {e}"))),
        };
        if !response.status().is_success() {
            return (None, Some(format!("inventory feed returned status {}", response.status())));
        }
        match response.json::<InventoryFeedBody>().await {
            Ok(body) => (Some(body.value), None),
            Err(e) => (None, Some(format!("inventory feed returned malformed body: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_value_field() {
        let parsed: InventoryFeedBody = serde_json::from_str(r#"{"value": 42}"#).unwrap();
        assert_eq!(parsed.value, 42);
    }

    #[test]
    fn rejects_missing_value_field() {
        let parsed: Result<InventoryFeedBody, _> = serde_json::from_str(r#"{"qty": 42}"#);
        assert!(parsed.is_err());
    }
}
