//! Knowledge index over the shareholder-letter corpus
//!
//! Chroma-backed similarity search. The index is populated offline by the
//! ingest job and is read-only at request time; request handlers share one
//! instance behind an `Arc`.

use crate::error::AgentError;
use crate::gemini::Embedder;
use crate::models::{ChunkMetadata, KnowledgeChunk};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub const COLLECTION_NAME: &str = "shareholder_letters";
pub const DEFAULT_TOP_N: usize = 3;

/// Seam between the agent and the vector store.
///
/// Implemented by [`ChromaIndex`] in production and by in-memory fakes in
/// tests. Upsert semantics: a chunk id that already exists is overwritten,
/// which is what makes re-ingestion idempotent.
#[async_trait::async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn upsert(&self, chunks: &[KnowledgeChunk]) -> Result<()>;

    /// Top-N most similar chunks, in the store's similarity order.
    async fn search(&self, query: &str, top_n: usize) -> Result<Vec<KnowledgeChunk>>;
}

/// Similarity lookup degraded to best effort: any failure logs and returns
/// an empty context instead of failing the request.
pub async fn retrieve(index: &dyn KnowledgeIndex, query: &str, top_n: usize) -> String {
    match index.search(query, top_n).await {
        Ok(chunks) => chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Err(e) => {
            warn!("Knowledge lookup failed, continuing without context: {}", e);
            String::new()
        }
    }
}

/// HTTP client for a Chroma server, bound to one collection.
pub struct ChromaIndex {
    client: reqwest::Client,
    base_url: String,
    embedder: Arc<dyn Embedder>,
    collection_id: OnceCell<String>,
}

impl ChromaIndex {
    pub fn new(base_url: String, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            embedder,
            collection_id: OnceCell::new(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AgentError::KnowledgeError(format!("Chroma request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            AgentError::KnowledgeError(format!("Invalid Chroma response: {}", e))
        })?;

        if !status.is_success() {
            return Err(AgentError::KnowledgeError(format!(
                "Chroma returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }

    /// Collection id, resolved once per process (get_or_create on first use).
    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = self
                    .post_json(
                        "/api/v1/collections",
                        &json!({ "name": COLLECTION_NAME, "get_or_create": true }),
                    )
                    .await?;

                let id = body["id"].as_str().ok_or_else(|| {
                    AgentError::KnowledgeError("Chroma collection response missing id".to_string())
                })?;

                info!(collection = COLLECTION_NAME, id = %id, "Chroma collection ready");
                Ok::<String, AgentError>(id.to_string())
            })
            .await?;

        Ok(id.as_str())
    }
}

#[async_trait::async_trait]
impl KnowledgeIndex for ChromaIndex {
    async fn upsert(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let collection_id = self.collection_id().await?.to_string();

        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            embeddings.push(self.embedder.embed(&chunk.text).await?);
        }

        let body = json!({
            "ids": chunks.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            "documents": chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            "metadatas": chunks
                .iter()
                .map(|c| json!({ "source": c.metadata.source }))
                .collect::<Vec<_>>(),
            "embeddings": embeddings,
        });

        self.post_json(
            &format!("/api/v1/collections/{}/upsert", collection_id),
            &body,
        )
        .await?;

        Ok(())
    }

    async fn search(&self, query: &str, top_n: usize) -> Result<Vec<KnowledgeChunk>> {
        let collection_id = self.collection_id().await?.to_string();
        let embedding = self.embedder.embed(query).await?;

        let body = self
            .post_json(
                &format!("/api/v1/collections/{}/query", collection_id),
                &json!({
                    "query_embeddings": [embedding],
                    "n_results": top_n,
                    "include": ["documents", "metadatas"],
                }),
            )
            .await?;

        Ok(chunks_from_query_response(&body))
    }
}

/// Flatten Chroma's parallel-array query response into chunks, preserving
/// the store's similarity order.
fn chunks_from_query_response(body: &Value) -> Vec<KnowledgeChunk> {
    let ids = body.pointer("/ids/0").and_then(Value::as_array);
    let documents = body.pointer("/documents/0").and_then(Value::as_array);
    let metadatas = body.pointer("/metadatas/0").and_then(Value::as_array);

    let (Some(ids), Some(documents)) = (ids, documents) else {
        return Vec::new();
    };

    ids.iter()
        .zip(documents.iter())
        .enumerate()
        .filter_map(|(i, (id, document))| {
            let source = metadatas
                .and_then(|m| m.get(i))
                .and_then(|m| m["source"].as_str())
                .unwrap_or_default()
                .to_string();

            Some(KnowledgeChunk {
                id: id.as_str()?.to_string(),
                text: document.as_str()?.to_string(),
                metadata: ChunkMetadata { source },
            })
        })
        .collect()
}
