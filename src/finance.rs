//! Yahoo Finance market-data fetcher
//!
//! One outbound quoteSummary call per invocation; no caching, no rate
//! limiting, no retry. Provider values arrive as `{"raw": n, "fmt": "…"}`
//! wrappers and are normalized with [`clean_value`] so every number the
//! model sees is finite.

use crate::error::AgentError;
use crate::models::{FinancialStatementBundle, StatementMetadata, StatementTable, StockSnapshot};
use crate::Result;
use chrono::{Datelike, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; persona-financial-advisor/0.1)";

const SNAPSHOT_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,assetProfile";
const STATEMENT_MODULES: &str = "incomeStatementHistory,balanceSheetHistory,\
cashflowStatementHistory,price,defaultKeyStatistics,calendarEvents";

const SUMMARY_EXCERPT_CHARS: usize = 150;

/// Reusable market-data client (connection-pooled)
pub struct FinanceClient {
    client: reqwest::Client,
    base_url: String,
}

impl FinanceClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: QUOTE_SUMMARY_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn quote_summary(&self, ticker: &str, modules: &str) -> Result<Value> {
        let url = format!("{}/{}?modules={}", self.base_url, ticker, modules);
        debug!(url = %url, "Yahoo Finance quoteSummary");

        let response = self.client.get(&url).send().await.map_err(|e| {
            AgentError::MarketDataError(format!("quote request failed for {}: {}", ticker, e))
        })?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            AgentError::MarketDataError(format!("invalid provider response: {}", e))
        })?;

        if !status.is_success() {
            return Err(AgentError::MarketDataError(format!(
                "provider returned {} for {}",
                status, ticker
            )));
        }

        body.pointer("/quoteSummary/result/0")
            .cloned()
            .ok_or_else(|| {
                AgentError::MarketDataError(format!("no quote data for ticker {}", ticker))
            })
    }

    /// Current quote and valuation summary for one ticker.
    pub async fn fetch_snapshot(&self, ticker: &str) -> Result<StockSnapshot> {
        let result = self.quote_summary(ticker, SNAPSHOT_MODULES).await?;

        let price = &result["price"];
        let detail = &result["summaryDetail"];
        let stats = &result["defaultKeyStatistics"];
        let currency = price["currency"].as_str().unwrap_or("USD");

        let snapshot = StockSnapshot {
            retrieved_at: Utc::now().format("%Y-%m-%d %H:%M").to_string(),
            name: price["shortName"]
                .as_str()
                .or_else(|| price["longName"].as_str())
                .unwrap_or(ticker)
                .to_string(),
            price: format!("{} {}", clean_value(raw(&price["regularMarketPrice"])), currency),
            market_cap: clean_value(raw(&price["marketCap"])),
            per: clean_value(raw(&detail["trailingPE"])),
            pbr: clean_value(raw(&stats["priceToBook"])),
            dividend_yield: format!(
                "{:.2}%",
                clean_value(raw(&detail["dividendYield"])) * 100.0
            ),
            business_summary: excerpt(
                result["assetProfile"]["longBusinessSummary"]
                    .as_str()
                    .unwrap_or(""),
            ),
        };

        info!(ticker = %ticker, name = %snapshot.name, "Snapshot fetched");
        Ok(snapshot)
    }

    /// Multi-year statement tables plus quote metadata for one ticker.
    pub async fn fetch_statements(&self, ticker: &str) -> Result<FinancialStatementBundle> {
        let result = self.quote_summary(ticker, STATEMENT_MODULES).await?;

        let price = &result["price"];

        let earnings_dates = result["calendarEvents"]["earnings"]["earningsDate"]
            .as_array()
            .map(|dates| {
                dates
                    .iter()
                    .filter_map(|d| d["fmt"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let bundle = FinancialStatementBundle {
            metadata: StatementMetadata {
                ticker: ticker.to_string(),
                currency: price["currency"].as_str().unwrap_or("USD").to_string(),
                current_price: clean_value(raw(&price["regularMarketPrice"])),
                eps: clean_value(raw(&result["defaultKeyStatistics"]["trailingEps"])),
                next_earnings_dates: earnings_dates,
                retrieved_at: Utc::now(),
            },
            income_statement: reshape_statements(
                &result["incomeStatementHistory"]["incomeStatementHistory"],
            ),
            balance_sheet: reshape_statements(
                &result["balanceSheetHistory"]["balanceSheetStatements"],
            ),
            cash_flow: reshape_statements(
                &result["cashflowStatementHistory"]["cashflowStatements"],
            ),
        };

        info!(
            ticker = %ticker,
            income_items = bundle.income_statement.len(),
            "Statements fetched"
        );
        Ok(bundle)
    }
}

/// Null, NaN and ±Inf all map to 0; finite values pass through unchanged.
pub fn clean_value(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Unwrap the provider's `{"raw": n}` value wrapper (or a bare number).
fn raw(value: &Value) -> Option<f64> {
    value["raw"].as_f64().or_else(|| value.as_f64())
}

/// Reshape the provider's per-period statement rows into
/// line item -> ISO date -> cleaned value.
pub fn reshape_statements(rows: &Value) -> StatementTable {
    let mut table = StatementTable::new();

    let Some(rows) = rows.as_array() else {
        return table;
    };

    for row in rows {
        let Some(fields) = row.as_object() else {
            continue;
        };
        let Some(date) = fields.get("endDate").and_then(|d| d["fmt"].as_str()) else {
            continue;
        };

        for (item, cell) in fields {
            if item == "endDate" || item == "maxAge" {
                continue;
            }
            table
                .entry(item.clone())
                .or_default()
                .insert(date.to_string(), clean_value(raw(cell)));
        }
    }

    table
}

/// Drop statement columns older than the requested window.
pub fn filter_recent_years(table: &StatementTable, from_year: i32) -> StatementTable {
    table
        .iter()
        .filter_map(|(item, by_date)| {
            let kept: std::collections::BTreeMap<String, f64> = by_date
                .iter()
                .filter(|(date, _)| {
                    date.get(..4)
                        .and_then(|y| y.parse::<i32>().ok())
                        .map(|y| y >= from_year)
                        .unwrap_or(false)
                })
                .map(|(date, value)| (date.clone(), *value))
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some((item.clone(), kept))
            }
        })
        .collect()
}

/// Cutoff year for an N-year lookback ending this year.
pub fn lookback_from_year(years: u32) -> i32 {
    Utc::now().year() - years as i32 + 1
}

/// Business-summary excerpt, char-boundary safe.
fn excerpt(summary: &str) -> String {
    if summary.chars().count() <= SUMMARY_EXCERPT_CHARS {
        return summary.to_string();
    }
    let truncated: String = summary.chars().take(SUMMARY_EXCERPT_CHARS).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_value_non_finite_maps_to_zero() {
        assert_eq!(clean_value(None), 0.0);
        assert_eq!(clean_value(Some(f64::NAN)), 0.0);
        assert_eq!(clean_value(Some(f64::INFINITY)), 0.0);
        assert_eq!(clean_value(Some(f64::NEG_INFINITY)), 0.0);
    }

    #[test]
    fn test_clean_value_finite_unchanged() {
        assert_eq!(clean_value(Some(0.0)), 0.0);
        assert_eq!(clean_value(Some(-12.5)), -12.5);
        assert_eq!(clean_value(Some(2.0e11)), 2.0e11);
    }

    #[test]
    fn test_raw_unwraps_wrapper_and_bare_numbers() {
        assert_eq!(raw(&json!({"raw": 42.5, "fmt": "42.50"})), Some(42.5));
        assert_eq!(raw(&json!(7.0)), Some(7.0));
        assert_eq!(raw(&json!({"fmt": "N/A"})), None);
        assert_eq!(raw(&json!(null)), None);
    }

    #[test]
    fn test_reshape_statements() {
        let rows = json!([
            {
                "endDate": { "raw": 1703980800, "fmt": "2023-12-31" },
                "maxAge": 1,
                "totalRevenue": { "raw": 45754000000.0, "fmt": "45.75B" },
                "netIncome": { "raw": 10714000000.0, "fmt": "10.71B" }
            },
            {
                "endDate": { "raw": 1672444800, "fmt": "2022-12-31" },
                "maxAge": 1,
                "totalRevenue": { "raw": 43004000000.0, "fmt": "43B" },
                "netIncome": null
            }
        ]);

        let table = reshape_statements(&rows);
        assert_eq!(table["totalRevenue"]["2023-12-31"], 45754000000.0);
        assert_eq!(table["totalRevenue"]["2022-12-31"], 43004000000.0);
        // Null provider cell is coerced to the safe default.
        assert_eq!(table["netIncome"]["2022-12-31"], 0.0);
        assert!(!table.contains_key("maxAge"));
        assert!(!table.contains_key("endDate"));
    }

    #[test]
    fn test_reshape_statements_non_array() {
        assert!(reshape_statements(&json!(null)).is_empty());
        assert!(reshape_statements(&json!({"oops": 1})).is_empty());
    }

    #[test]
    fn test_filter_recent_years() {
        let rows = json!([
            { "endDate": { "fmt": "2023-12-31" }, "totalRevenue": { "raw": 3.0 } },
            { "endDate": { "fmt": "2021-12-31" }, "totalRevenue": { "raw": 2.0 } },
            { "endDate": { "fmt": "2018-12-31" }, "totalRevenue": { "raw": 1.0 } }
        ]);
        let table = reshape_statements(&rows);

        let recent = filter_recent_years(&table, 2021);
        let dates: Vec<&String> = recent["totalRevenue"].keys().collect();
        assert_eq!(dates, vec!["2021-12-31", "2023-12-31"]);

        // A window that keeps nothing drops the line item entirely.
        assert!(filter_recent_years(&table, 2030).is_empty());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let short = "A beverage company.";
        assert_eq!(excerpt(short), short);

        let long: String = "버크셔 해서웨이 ".repeat(40);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(
            cut.chars().count(),
            SUMMARY_EXCERPT_CHARS + 3
        );
    }

    #[tokio::test]
    async fn test_fetch_snapshot_provider_unreachable() {
        let client = FinanceClient::with_base_url("http://127.0.0.1:9".to_string());
        let result = client.fetch_snapshot("KO").await;
        assert!(matches!(result, Err(AgentError::MarketDataError(_))));
    }
}
