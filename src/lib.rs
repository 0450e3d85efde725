//! Persona Financial Advisor
//!
//! A conversational financial-advisor agent that answers in the voice of a
//! public figure (Warren Buffett ships by default), combining:
//! - a streaming Gemini chat session with explicit tool mediation
//! - on-demand market data from Yahoo Finance
//! - a RAG knowledge base of shareholder letters in Chroma
//!
//! REQUEST FLOW:
//! history → retrieve context → session → stream → (tool call → result)* → done

pub mod api;
pub mod chat;
pub mod error;
pub mod finance;
pub mod gemini;
pub mod ingest;
pub mod knowledge;
pub mod models;
pub mod persona;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use persona::Persona;
