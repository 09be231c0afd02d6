//! Text generators: prompt in, text out (streamed or in one piece)

mod ollama;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};

pub use ollama::OllamaGenerator;

use crate::{call::CallContext, error::GenerationError};

/// Chunks of generated text in arrival order
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    /// Start generating; chunks arrive as the model produces them
    async fn generate_stream(
        &self,
        prompt: &str,
        ctx: &CallContext,
    ) -> Result<TextStream, GenerationError>;

    /// Generate the full answer
    ///
    /// The default drains [`generate_stream`](Generator::generate_stream).
    async fn generate(&self, prompt: &str, ctx: &CallContext) -> Result<String, GenerationError> {
        let stream = self.generate_stream(prompt, ctx).await?;
        collect_stream(stream, ctx).await
    }
}

/// Concatenate a stream in arrival order, bounded by the caller's context
pub async fn collect_stream(
    mut stream: TextStream,
    ctx: &CallContext,
) -> Result<String, GenerationError> {
    ctx.run(async move {
        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            answer.push_str(&chunk?);
        }
        Ok(answer)
    })
    .await?
}
