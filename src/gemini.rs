//! Gemini API client
//!
//! Streams model output over SSE (`streamGenerateContent?alt=sse`) and
//! exposes text embedding for the knowledge index.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::AgentError;
use crate::models::ModelEvent;
use crate::Result;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const EMBEDDING_MODEL: &str = "text-embedding-004";
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Seam between the orchestrator and the model provider.
///
/// Implemented by [`GeminiClient`] in production and by fakes in tests, so
/// the streaming loop can be exercised without network access.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Submit the full conversation state and stream back model events.
    async fn stream_generate(
        &self,
        model: &str,
        system_instruction: &str,
        contents: &[Content],
        tools: &[Value],
    ) -> Result<mpsc::Receiver<Result<ModelEvent>>>;
}

/// Text embedding seam for the knowledge index.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    fn ensure_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AgentError::ModelError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChatModel for GeminiClient {
    async fn stream_generate(
        &self,
        model: &str,
        system_instruction: &str,
        contents: &[Content],
        tools: &[Value],
    ) -> Result<mpsc::Receiver<Result<ModelEvent>>> {
        self.ensure_key()?;

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        );

        let request = GenerateRequest {
            contents,
            system_instruction: SystemInstruction {
                parts: vec![Part::text(system_instruction)],
            },
            tools: if tools.is_empty() {
                None
            } else {
                Some(vec![ToolDeclarations {
                    function_declarations: tools.to_vec(),
                }])
            },
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.9,
                max_output_tokens: 2048,
            },
        };

        info!(model = %model, turns = contents.len(), "Calling Gemini streaming API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::ModelError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(AgentError::ModelError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            // Byte buffer so multibyte text split across network chunks is
            // only decoded at complete SSE lines.
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AgentError::StreamError(format!(
                                "model stream interrupted: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(payload) = parse_sse_line(line.trim_end()) else {
                        continue;
                    };

                    match serde_json::from_str::<GenerateContentResponse>(payload) {
                        Ok(parsed) => {
                            for event in events_from_response(&parsed) {
                                if tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(AgentError::StreamError(format!(
                                    "unparseable stream frame: {}",
                                    e
                                ))))
                                .await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait::async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_key()?;

        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, EMBEDDING_MODEL, self.api_key
        );

        let body = serde_json::json!({
            "model": format!("models/{}", EMBEDDING_MODEL),
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ModelError(format!("Gemini embedding error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::ModelError(format!(
                "Gemini embedding error: {}",
                error_text
            )));
        }

        let parsed: EmbedContentResponse = response.json().await.map_err(|e| {
            AgentError::ModelError(format!("Gemini embedding parse error: {}", e))
        })?;

        Ok(parsed.embedding.values)
    }
}

/// Strip the SSE `data:` framing; empty payloads are keep-alives.
fn parse_sse_line(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Extract the events carried by one stream frame: text parts and function
/// calls of the first candidate, in part order.
fn events_from_response(response: &GenerateContentResponse) -> Vec<ModelEvent> {
    let mut events = Vec::new();

    let Some(candidate) = response.candidates.first() else {
        return events;
    };
    let Some(content) = &candidate.content else {
        return events;
    };

    for part in &content.parts {
        if let Some(text) = &part.text {
            if !text.is_empty() {
                events.push(ModelEvent::Text(text.clone()));
            }
        }
        if let Some(call) = &part.function_call {
            events.push(ModelEvent::FunctionCall {
                name: call.name.clone(),
                args: call.args.clone(),
            });
        }
    }

    events
}

//
// ================= Wire Types =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model_function_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part {
                text: None,
                function_call: Some(FunctionCall {
                    name: name.into(),
                    args,
                }),
                function_response: None,
            }],
        }
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part {
                text: None,
                function_call: None,
                function_response: Some(FunctionResponse {
                    name: name.into(),
                    response,
                }),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
            function_response: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let contents = vec![Content::user_text("코카콜라(KO) 주식은 지금 어떤가?")];
        let request = GenerateRequest {
            contents: &contents,
            system_instruction: SystemInstruction {
                parts: vec![Part::text("당신은 워렌 버핏입니다")],
            },
            tools: Some(vec![ToolDeclarations {
                function_declarations: vec![json!({"name": "get_current_stock_summary"})],
            }]),
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.9,
                max_output_tokens: 2048,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(
            json["tools"][0]["functionDeclarations"][0]["name"],
            "get_current_stock_summary"
        );
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("버핏"));
        // Unset part fields must not appear on the wire.
        assert!(json["contents"][0]["parts"][0]
            .as_object()
            .unwrap()
            .get("functionCall")
            .is_none());
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_line("data:"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": comment"), None);
    }

    #[test]
    fn test_events_from_text_frame() {
        let frame: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "코카콜라는 훌륭한 기업이구먼" }] }
            }]
        }))
        .unwrap();

        let events = events_from_response(&frame);
        assert_eq!(
            events,
            vec![ModelEvent::Text("코카콜라는 훌륭한 기업이구먼".to_string())]
        );
    }

    #[test]
    fn test_events_from_function_call_frame() {
        let frame: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "functionCall": {
                            "name": "get_current_stock_summary",
                            "args": { "ticker": "KO" }
                        }
                    }]
                }
            }]
        }))
        .unwrap();

        let events = events_from_response(&frame);
        assert_eq!(
            events,
            vec![ModelEvent::FunctionCall {
                name: "get_current_stock_summary".to_string(),
                args: json!({ "ticker": "KO" }),
            }]
        );
    }

    #[test]
    fn test_events_from_empty_frame() {
        let frame: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(events_from_response(&frame).is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client =
            GeminiClient::with_base_url(String::new(), "http://127.0.0.1:9".to_string());
        let result = client
            .stream_generate("gemini-2.0-flash", "prompt", &[], &[])
            .await;
        assert!(result.is_err());
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("GEMINI_API_KEY"));
    }
}
