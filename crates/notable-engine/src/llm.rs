//! The language model collaborator.
//!
//! Text generation lives outside the engine; the engine only needs an
//! opaque prompt-in, text-out capability.

use async_trait::async_trait;

use crate::error::BoxError;

/// A text-generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String, BoxError>;
}
