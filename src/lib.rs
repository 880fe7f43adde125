//! Veo Studio: a backend that wraps the Veo 3 and Gemini APIs, plus the client
//! side that drives a generation to completion and consumes the chat stream.

pub mod backend;
pub mod chat;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gemini;
pub mod media;
pub mod models;
pub mod operation;
pub mod orchestrator;
pub mod routes;
pub mod sse;

pub use error::VeoError;
