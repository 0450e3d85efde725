//! Core data models for the persona advisor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One turn of the caller-supplied conversation.
///
/// Wire names match the frontend contract:
/// `{"role": "user" | "model", "parts": "..."}`. The last turn of a request
/// is the new question; everything before it is replay context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub parts: String,
}

//
// ================= Market Data =================
//

/// Current quote and valuation for one ticker, derived fresh per call.
///
/// Serialized field names are the Korean labels the persona prompt refers
/// to, so the model sees the same vocabulary its instructions use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    #[serde(rename = "조회시점")]
    pub retrieved_at: String,
    #[serde(rename = "이름")]
    pub name: String,
    #[serde(rename = "현재가")]
    pub price: String,
    #[serde(rename = "시가총액")]
    pub market_cap: f64,
    #[serde(rename = "PER")]
    pub per: f64,
    #[serde(rename = "PBR")]
    pub pbr: f64,
    #[serde(rename = "배당수익률")]
    pub dividend_yield: String,
    #[serde(rename = "비즈니스요약")]
    pub business_summary: String,
}

/// line item -> ISO date -> value. Every leaf is finite; null/NaN/Inf
/// provider cells are coerced to 0 before they get here.
pub type StatementTable = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementMetadata {
    pub ticker: String,
    pub currency: String,
    pub current_price: f64,
    pub eps: f64,
    pub next_earnings_dates: Vec<String>,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialStatementBundle {
    pub metadata: StatementMetadata,
    pub income_statement: StatementTable,
    pub balance_sheet: StatementTable,
    pub cash_flow: StatementTable,
}

//
// ================= Knowledge =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: String,
}

//
// ================= Streaming =================
//

/// Unit of output from the model's streaming session.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    FunctionCall { name: String, args: Value },
}

/// Event emitted by the orchestrator for each unit of model output.
///
/// The HTTP layer forwards `TextDelta` and `Error` to the caller;
/// `ToolInvocation` and `ToolResult` are observational (server-side log).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolInvocation { name: String, args: Value },
    ToolResult { name: String, value: Value },
    Error(String),
    End,
}
