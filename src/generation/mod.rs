//! Text generation as an external collaborator.
//!
//! A stage may call [`TextGenerator::generate`] at most once per attempt and
//! gets back text or a [`GenerationError`]. Nothing else about the model is
//! assumed.

pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use client::AnthropicClient;
pub use error::GenerationError;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
