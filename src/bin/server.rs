use persona_financial_advisor::{
    api::start_server,
    chat::ChatOrchestrator,
    finance::FinanceClient,
    gemini::GeminiClient,
    knowledge::ChromaIndex,
    persona::Persona,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        String::new()
    });

    let chroma_url =
        std::env::var("CHROMA_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let api_port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Persona Financial Advisor - API Server");
    info!("📍 Port: {}", api_port);

    // Clients are constructed once here and injected; no globals.
    let gemini = Arc::new(GeminiClient::new(gemini_api_key)?);
    let finance = Arc::new(FinanceClient::new()?);
    let knowledge = Arc::new(ChromaIndex::new(chroma_url, gemini.clone())?);
    let registry = Arc::new(create_default_registry(finance));

    let orchestrator = Arc::new(ChatOrchestrator::new(
        gemini,
        registry,
        knowledge,
        Persona::buffett(),
    ));

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
