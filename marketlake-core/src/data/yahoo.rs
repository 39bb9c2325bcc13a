//! Yahoo Finance data provider.
//!
//! Fetches daily OHLCV bars from Yahoo's v8 chart API over the configured
//! window (default: 2015-01-01 through today). Primary adapter: full history.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; every shape problem is reported as a `Malformed` failure so the
//! resolver can fall back.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{ProviderAdapter, ProviderFailure, ProviderResult, RawFrame, RawValue, Reliability};
use crate::domain::day_start;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const CHART_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Settings for the Yahoo adapter.
#[derive(Debug, Clone)]
pub struct YahooSettings {
    pub start_date: NaiveDate,
    /// Inclusive end; `None` means today (UTC) at fetch time.
    pub end_date: Option<NaiveDate>,
    pub timeout: Duration,
    pub priority: u32,
}

impl Default for YahooSettings {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            end_date: None,
            timeout: Duration::from_secs(30),
            priority: 10,
        }
    }
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    settings: YahooSettings,
}

impl YahooProvider {
    pub fn new(
        settings: YahooSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        Ok(Self {
            client,
            circuit_breaker,
            settings,
        })
    }

    /// Build the chart API URL for a symbol and inclusive date range.
    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = day_start(start).timestamp();
        let end_ts = day_start(end).timestamp() + 86_399;
        format!(
            "{CHART_BASE_URL}/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true"
        )
    }

    /// Parse the chart API response into a raw frame.
    ///
    /// Timestamps are shifted by the exchange `gmtoffset` so that the UTC date
    /// of each value is the exchange-local trading day.
    fn parse_response(symbol: &str, resp: ChartResponse) -> ProviderResult {
        let result = match (resp.chart.result, resp.chart.error) {
            (Some(result), _) => result,
            (None, Some(err)) if err.code == "Not Found" => {
                return Err(ProviderFailure::SymbolNotFound {
                    symbol: symbol.to_string(),
                })
            }
            (None, Some(err)) => {
                return Err(ProviderFailure::Malformed(format!(
                    "{}: {}",
                    err.code, err.description
                )))
            }
            (None, None) => return Err(ProviderFailure::EmptyPayload),
        };

        let data = result.into_iter().next().ok_or(ProviderFailure::EmptyPayload)?;
        let timestamps = data.timestamp.ok_or(ProviderFailure::EmptyPayload)?;
        let gmtoffset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| ProviderFailure::MissingColumns(vec!["quote".into()]))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let n = timestamps.len();
        let mut dates = Vec::with_capacity(n);
        let mut opens: Vec<RawValue> = Vec::with_capacity(n);
        let mut highs: Vec<RawValue> = Vec::with_capacity(n);
        let mut lows: Vec<RawValue> = Vec::with_capacity(n);
        let mut closes: Vec<RawValue> = Vec::with_capacity(n);
        let mut volumes: Vec<RawValue> = Vec::with_capacity(n);
        let mut adj: Vec<RawValue> = Vec::with_capacity(n);

        for (i, &ts) in timestamps.iter().enumerate() {
            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip bars where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            let local = ts.checked_add(gmtoffset).ok_or_else(|| {
                ProviderFailure::Malformed(format!("timestamp {ts} out of range for offset {gmtoffset}"))
            })?;
            dates.push(RawValue::Int(local));
            opens.push(open.into());
            highs.push(high.into());
            lows.push(low.into());
            closes.push(close.into());
            volumes.push(volume.into());
            adj.push(
                adj_closes
                    .as_ref()
                    .and_then(|v| v.get(i).copied().flatten())
                    .into(),
            );
        }

        if dates.is_empty() {
            return Err(ProviderFailure::EmptyPayload);
        }

        Ok(RawFrame::new()
            .with_column("Date", dates)
            .with_column("Open", opens)
            .with_column("High", highs)
            .with_column("Low", lows)
            .with_column("Close", closes)
            .with_column("Volume", volumes)
            .with_column("Adj Close", adj))
    }

    /// Execute a single HTTP request. No retries here; the resolver owns retry policy.
    fn fetch_once(&self, symbol: &str) -> ProviderResult {
        let end = self
            .settings
            .end_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let url = Self::chart_url(symbol, self.settings.start_date, end);
        debug!(provider = "yahoo", symbol, %url, "requesting chart");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderFailure::Transport(e.to_string()))?;
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(ProviderFailure::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderFailure::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        if !status.is_success() {
            return Err(ProviderFailure::HttpStatus {
                status: status.as_u16(),
            });
        }

        let chart: ChartResponse = resp
            .json()
            .map_err(|e| ProviderFailure::Malformed(format!("failed to parse response: {e}")))?;

        Self::parse_response(symbol, chart)
    }
}

impl ProviderAdapter for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn priority(&self) -> u32 {
        self.settings.priority
    }

    fn reliability(&self) -> Reliability {
        Reliability::Primary
    }

    fn fetch(&self, symbol: &str) -> ProviderResult {
        let result = self.fetch_once(symbol);
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
