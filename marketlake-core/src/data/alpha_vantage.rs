//! Alpha Vantage data provider.
//!
//! Uses the `TIME_SERIES_DAILY` endpoint. The free tier only serves the
//! compact window (last ~100 trading days) and throttles aggressively, so
//! this adapter is a limited-window fallback. The API key is handed in by
//! the caller; a missing key is reported at fetch time.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{ProviderAdapter, ProviderFailure, ProviderResult, RawFrame, RawValue, Reliability};
use crate::domain::Field;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const QUERY_URL: &str = "https://www.alphavantage.co/query";
const SERIES_KEY: &str = "Time Series (Daily)";

const ALIASES: &[(&str, Field)] = &[
    ("1. open", Field::Open),
    ("2. high", Field::High),
    ("3. low", Field::Low),
    ("4. close", Field::Close),
    ("5. volume", Field::Volume),
];

/// `outputsize` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSize {
    #[default]
    Compact,
    Full,
}

impl OutputSize {
    fn as_param(self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlphaVantageSettings {
    pub api_key: Option<String>,
    pub output_size: OutputSize,
    pub timeout: Duration,
    pub priority: u32,
}

impl Default for AlphaVantageSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            output_size: OutputSize::Compact,
            timeout: Duration::from_secs(30),
            priority: 20,
        }
    }
}

pub struct AlphaVantageProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    settings: AlphaVantageSettings,
}

/// Whether a response message is about the API key rather than the symbol.
fn mentions_api_key(message: &str) -> bool {
    let text = message.to_ascii_lowercase();
    text.contains("api key") || text.contains("apikey")
}

impl AlphaVantageProvider {
    pub fn new(
        settings: AlphaVantageSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            circuit_breaker,
            settings,
        })
    }

    /// Parse a decoded JSON body into a raw frame.
    ///
    /// Alpha Vantage answers HTTP 200 for almost everything; errors and
    /// throttling notices come back as top-level `Error Message`, `Note`, or
    /// `Information` keys instead of the series.
    fn parse_response(symbol: &str, body: &Value) -> ProviderResult {
        let obj = body
            .as_object()
            .ok_or_else(|| ProviderFailure::Malformed("response is not a JSON object".into()))?;

        if let Some(message) = obj.get("Error Message") {
            let message = message.as_str().unwrap_or_default();
            if mentions_api_key(message) {
                return Err(ProviderFailure::MissingCredential(message.to_string()));
            }
            return Err(ProviderFailure::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if let Some(note) = obj.get("Note").or_else(|| obj.get("Information")) {
            let message = note.as_str().unwrap_or_default();
            let text = message.to_ascii_lowercase();
            if mentions_api_key(message) && !text.contains("rate limit") && !text.contains("frequency") {
                return Err(ProviderFailure::MissingCredential(message.to_string()));
            }
            return Err(ProviderFailure::RateLimited {
                retry_after_secs: None,
            });
        }

        let series = match obj.get(SERIES_KEY) {
            Some(Value::Object(series)) => series,
            Some(Value::Null) | None if obj.is_empty() => return Err(ProviderFailure::EmptyPayload),
            Some(_) => {
                return Err(ProviderFailure::Malformed(format!(
                    "'{SERIES_KEY}' is not an object"
                )))
            }
            None => return Err(ProviderFailure::MissingColumns(vec![SERIES_KEY.into()])),
        };

        if series.is_empty() {
            return Err(ProviderFailure::EmptyPayload);
        }

        let mut dates = Vec::with_capacity(series.len());
        let mut columns: Vec<Vec<RawValue>> = vec![Vec::with_capacity(series.len()); ALIASES.len()];

        for (date, day) in series {
            dates.push(RawValue::Text(date.clone()));
            for (slot, (native, _)) in columns.iter_mut().zip(ALIASES) {
                slot.push(match day.get(*native) {
                    Some(Value::String(s)) => RawValue::Text(s.clone()),
                    Some(Value::Number(n)) => n
                        .as_i64()
                        .map(RawValue::Int)
                        .or_else(|| n.as_f64().map(RawValue::Float))
                        .unwrap_or(RawValue::Null),
                    _ => RawValue::Null,
                });
            }
        }

        let mut frame = RawFrame::new().with_column("timestamp", dates);
        for ((native, _), values) in ALIASES.iter().zip(columns) {
            frame.push_column(*native, values);
        }
        Ok(frame)
    }

    fn fetch_once(&self, symbol: &str, api_key: &str) -> ProviderResult {
        debug!(provider = "alpha_vantage", symbol, "requesting daily series");

        let resp = self
            .client
            .get(QUERY_URL)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("apikey", api_key),
                ("outputsize", self.settings.output_size.as_param()),
            ])
            .send()
            .map_err(|e| ProviderFailure::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderFailure::RateLimited {
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            return Err(ProviderFailure::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: Value = resp
            .json()
            .map_err(|e| ProviderFailure::Malformed(format!("failed to parse response: {e}")))?;

        Self::parse_response(symbol, &body)
    }
}

impl ProviderAdapter for AlphaVantageProvider {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    fn priority(&self) -> u32 {
        self.settings.priority
    }

    fn reliability(&self) -> Reliability {
        match self.settings.output_size {
            OutputSize::Compact => Reliability::Fallback,
            OutputSize::Full => Reliability::Primary,
        }
    }

    fn column_aliases(&self) -> &[(&'static str, Field)] {
        ALIASES
    }

    fn fetch(&self, symbol: &str) -> ProviderResult {
        let Some(api_key) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(ProviderFailure::MissingCredential(
                "Alpha Vantage API key not configured".into(),
            ));
        };

        let result = self.fetch_once(symbol, api_key);
        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(failure) => self.circuit_breaker.observe(failure),
        }
        result
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
