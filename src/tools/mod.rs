//! Tool trait and registry
//!
//! Tools are the functions the model may call mid-response. They never
//! raise to the orchestrator: any internal failure is caught locally and
//! converted to an `{error}` value, because the persona must produce an
//! in-character answer even when a tool fails.

use crate::finance::{filter_recent_years, lookback_from_year, FinanceClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_TREND_YEARS: u32 = 5;

/// Trait for a single callable tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Gemini function declaration (name, description, parameter schema).
    fn declaration(&self) -> Value;

    /// Execute with the model-supplied arguments. Infallible by contract:
    /// failures come back as `{"error": "..."}` values.
    async fn execute(&self, args: &Value) -> Value;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Function declarations for the model request.
    pub fn declarations(&self) -> Vec<Value> {
        self.tools.values().map(|tool| tool.declaration()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn error_value(message: impl fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}

fn require_ticker(args: &Value) -> Result<&str, Value> {
    args.get("ticker")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| error_value("expected a 'ticker' argument"))
}

/// Current quote and valuation summary for a ticker.
pub struct StockSummaryTool {
    finance: Arc<FinanceClient>,
}

impl StockSummaryTool {
    pub fn new(finance: Arc<FinanceClient>) -> Self {
        Self { finance }
    }
}

#[async_trait::async_trait]
impl Tool for StockSummaryTool {
    fn name(&self) -> &'static str {
        "get_current_stock_summary"
    }

    fn description(&self) -> &'static str {
        "주식의 현재가, 시가총액, 주요 밸류에이션(PER/PBR) 등 최신 요약 정보를 가져옵니다."
    }

    fn declaration(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": {
                "type": "object",
                "properties": {
                    "ticker": {
                        "type": "string",
                        "description": "종목 티커 (예: KO, AAPL)"
                    }
                },
                "required": ["ticker"]
            }
        })
    }

    async fn execute(&self, args: &Value) -> Value {
        let ticker = match require_ticker(args) {
            Ok(ticker) => ticker,
            Err(error) => return error,
        };

        match self.finance.fetch_snapshot(ticker).await {
            Ok(snapshot) => serde_json::to_value(&snapshot)
                .unwrap_or_else(|e| error_value(format!("snapshot serialization: {}", e))),
            Err(e) => {
                warn!(ticker = %ticker, "Snapshot fetch failed: {}", e);
                error_value(e)
            }
        }
    }
}

/// Multi-year statement trends for a ticker.
pub struct FinancialTrendsTool {
    finance: Arc<FinanceClient>,
}

impl FinancialTrendsTool {
    pub fn new(finance: Arc<FinanceClient>) -> Self {
        Self { finance }
    }
}

#[async_trait::async_trait]
impl Tool for FinancialTrendsTool {
    fn name(&self) -> &'static str {
        "get_historical_financial_trends"
    }

    fn description(&self) -> &'static str {
        "지정된 연도(기본 5년) 동안의 손익계산서, 재무상태표, 현금흐름표 추이를 가져옵니다."
    }

    fn declaration(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": {
                "type": "object",
                "properties": {
                    "ticker": {
                        "type": "string",
                        "description": "종목 티커 (예: KO, AAPL)"
                    },
                    "years": {
                        "type": "integer",
                        "description": "조회할 연수 (기본 5년)"
                    }
                },
                "required": ["ticker"]
            }
        })
    }

    async fn execute(&self, args: &Value) -> Value {
        let ticker = match require_ticker(args) {
            Ok(ticker) => ticker,
            Err(error) => return error,
        };
        let years = args
            .get("years")
            .and_then(Value::as_u64)
            .map(|y| y as u32)
            .filter(|&y| y > 0)
            .unwrap_or(DEFAULT_TREND_YEARS);

        match self.finance.fetch_statements(ticker).await {
            Ok(bundle) => {
                let from_year = lookback_from_year(years);
                json!({
                    "대상기간": format!("최근 {}개년", years),
                    "metadata": bundle.metadata,
                    "income_statement": filter_recent_years(&bundle.income_statement, from_year),
                    "balance_sheet": filter_recent_years(&bundle.balance_sheet, from_year),
                    "cash_flow": filter_recent_years(&bundle.cash_flow, from_year),
                })
            }
            Err(e) => {
                warn!(ticker = %ticker, "Statement fetch failed: {}", e);
                error_value(e)
            }
        }
    }
}

/// Registry with the persona's two market-data tools.
pub fn create_default_registry(finance: Arc<FinanceClient>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StockSummaryTool::new(finance.clone())));
    registry.register(Arc::new(FinancialTrendsTool::new(finance)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_finance() -> Arc<FinanceClient> {
        // Unroutable port so any accidental network call fails fast.
        Arc::new(FinanceClient::with_base_url("http://127.0.0.1:9".to_string()))
    }

    #[test]
    fn test_registry_lookup() {
        let registry = create_default_registry(test_finance());

        assert!(registry.get("get_current_stock_summary").is_some());
        assert!(registry.get("get_historical_financial_trends").is_some());
        assert!(registry.get("unknown_tool").is_none());
        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.declarations().len(), 2);
    }

    #[test]
    fn test_declaration_shape() {
        let tool = StockSummaryTool::new(test_finance());
        let declaration = tool.declaration();

        assert_eq!(declaration["name"], "get_current_stock_summary");
        assert_eq!(declaration["parameters"]["required"][0], "ticker");
    }

    #[tokio::test]
    async fn test_missing_ticker_becomes_error_value() {
        let tool = StockSummaryTool::new(test_finance());
        let output = tool.execute(&json!({})).await;
        assert!(output["error"].as_str().unwrap().contains("ticker"));

        let output = tool.execute(&json!({ "ticker": "  " })).await;
        assert!(output.get("error").is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_error_value() {
        let tool = StockSummaryTool::new(test_finance());
        let output = tool.execute(&json!({ "ticker": "KO" })).await;

        // Failure is data, not a panic or an Err.
        assert!(output.get("error").and_then(Value::as_str).is_some());
    }

    #[tokio::test]
    async fn test_trends_default_years() {
        let tool = FinancialTrendsTool::new(test_finance());
        // Provider unreachable: still an error value, never a raised error.
        let output = tool.execute(&json!({ "ticker": "KO", "years": 0 })).await;
        assert!(output.get("error").is_some());
    }
}
