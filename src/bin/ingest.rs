use persona_financial_advisor::{
    gemini::GeminiClient, ingest::ingest_dir, knowledge::ChromaIndex,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    let chroma_url =
        std::env::var("CHROMA_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let data_dir = PathBuf::from(
        std::env::var("KNOWLEDGE_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
    );

    info!("Ingesting shareholder letters from {}", data_dir.display());

    let gemini = Arc::new(GeminiClient::new(gemini_api_key)?);
    let index = ChromaIndex::new(chroma_url, gemini)?;

    let total = ingest_dir(&index, &data_dir).await?;

    info!("✨ Ingestion complete: {} chunks stored", total);
    Ok(())
}
