//! Conversation analysis backend: embedding-backed semantic search over chat
//! history, plus heuristic message prioritization.

pub mod config;
pub mod lock;
pub mod message;
pub mod priority;
pub mod semantic;
#[cfg(test)]
mod tests;
