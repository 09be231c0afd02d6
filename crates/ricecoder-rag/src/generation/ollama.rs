//! Ollama text generation client (`POST /api/generate`)

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{collect_stream, Generator, TextStream};
use crate::{
    call::CallContext, embeddings::http_client, error::GenerationError, RagError, Result,
};

/// Generator backed by an Ollama server
pub struct OllamaGenerator {
    client: Arc<Client>,
    base_url: String,
    model: String,
    stream: bool,
}

impl OllamaGenerator {
    /// Create a streaming generator for `model` at `base_url`
    ///
    /// # Errors
    /// Returns `RagError::Config` if the URL or model name is empty
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::new_with_client(base_url, model, Arc::new(http_client()?))
    }

    pub fn new_with_client(
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: Arc<Client>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let model = model.into();
        if base_url.is_empty() {
            return Err(RagError::Config("Ollama base URL is required".to_string()));
        }
        if model.is_empty() {
            return Err(RagError::Config(
                "Generation model name is required".to_string(),
            ));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            stream: true,
        })
    }

    /// Ask Ollama for one response body instead of NDJSON chunks
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    async fn send(&self, prompt: &str, stream: bool) -> std::result::Result<Response, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream,
        };
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama generation model {} not found: {}", self.model, error_text);
            return Err(GenerationError::InvalidModel(self.model.clone()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama generate API error ({}): {}", status, error_text);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response)
    }

    async fn generate_once(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
        let response = self.send(prompt, false).await?;
        let body: OllamaGenerateChunk = response.json().await?;
        if let Some(message) = body.error {
            return Err(GenerationError::Stream(message));
        }
        Ok(body.response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        ctx: &CallContext,
    ) -> std::result::Result<TextStream, GenerationError> {
        debug!(
            "Starting streaming generation with Ollama model {} ({} prompt chars)",
            self.model,
            prompt.len()
        );
        let response = ctx.run(self.send(prompt, true)).await??;
        Ok(ndjson_chunks(response))
    }

    async fn generate(
        &self,
        prompt: &str,
        ctx: &CallContext,
    ) -> std::result::Result<String, GenerationError> {
        if self.stream {
            let stream = self.generate_stream(prompt, ctx).await?;
            return collect_stream(stream, ctx).await;
        }
        debug!("Sending generation request to Ollama model {}", self.model);
        ctx.run(self.generate_once(prompt)).await?
    }
}

/// Split an NDJSON body into response chunks as bytes arrive
fn ndjson_chunks(response: Response) -> TextStream {
    let stream = async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(err) => {
                    yield Err(GenerationError::from(err));
                    return;
                }
            }
            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match parse_line(&line) {
                    Ok(Some(text)) => yield Ok(text),
                    Ok(None) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }
        match parse_line(&buffer) {
            Ok(Some(text)) => yield Ok(text),
            Ok(None) => {}
            Err(err) => yield Err(err),
        }
    };
    stream.boxed()
}

fn parse_line(line: &[u8]) -> std::result::Result<Option<String>, GenerationError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chunk: OllamaGenerateChunk = serde_json::from_str(line).map_err(|e| {
        debug!("Failed to parse streaming response line: {}", e);
        GenerationError::InvalidResponse(format!("Failed to parse streaming response: {}", e))
    })?;
    if let Some(message) = chunk.error {
        return Err(GenerationError::Stream(message));
    }
    if chunk.response.is_empty() {
        return Ok(None);
    }
    Ok(Some(chunk.response))
}

/// Ollama API generate request format
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One NDJSON line (or the whole body when not streaming)
#[derive(Debug, Deserialize)]
struct OllamaGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_lines() {
        assert_eq!(
            parse_line(br#"{"response":"Hel","done":false}"#).unwrap(),
            Some("Hel".to_string())
        );
        assert_eq!(parse_line(br#"{"response":"","done":true}"#).unwrap(), None);
        assert_eq!(parse_line(b"   \n").unwrap(), None);
    }

    #[test]
    fn surfaces_error_lines() {
        assert_eq!(
            parse_line(br#"{"error":"out of memory"}"#).unwrap_err(),
            GenerationError::Stream("out of memory".into())
        );
        assert!(matches!(
            parse_line(b"not json"),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn rejects_empty_configuration() {
        assert!(OllamaGenerator::new("", "llama3.2").is_err());
        assert!(OllamaGenerator::new("http://localhost:11434", "").is_err());
        let generator = OllamaGenerator::new("http://localhost:11434", "llama3.2")
            .unwrap()
            .with_streaming(false);
        assert!(!generator.is_streaming());
    }
}
