//! Top-level question answering
//!
//! [`RagOrchestrator`] runs four strictly sequential stages for each query:
//! embed the query, retrieve passages, assemble the prompt, generate. It never
//! returns an error. A failing stage yields that stage's apology text and the
//! cause goes to the log.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    call::{CallContext, DEFAULT_CALL_TIMEOUT_SECS},
    context::ContextAssembler,
    error::{GenerationError, RetrievalError},
    generation::Generator,
    retrieval::Retriever,
    types::RetrievedPassage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    EmbedQuery,
    Retrieve,
    Assemble,
    Generate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::EmbedQuery => "embed_query",
            Stage::Retrieve => "retrieve",
            Stage::Assemble => "assemble",
            Stage::Generate => "generate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Cancelled,
    TimedOut,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answered,
    Failed { stage: Stage, kind: FailureKind },
}

/// Result of one query; `text` is either the generated answer or an apology
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub outcome: Outcome,
    /// Passages the answer was grounded on, most relevant first
    pub passages: Vec<RetrievedPassage>,
}

impl Answer {
    pub fn is_answered(&self) -> bool {
        self.outcome == Outcome::Answered
    }
}

/// User-facing apology text per failing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackMessages {
    pub embedding: String,
    pub retrieval: String,
    pub generation: String,
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self {
            embedding: "Sorry, an error occurred while processing your query.".to_string(),
            retrieval: "Sorry, an error occurred while searching for relevant information."
                .to_string(),
            generation: "Sorry, an error occurred while generating the answer.".to_string(),
        }
    }
}

impl FallbackMessages {
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::EmbedQuery => &self.embedding,
            Stage::Retrieve | Stage::Assemble => &self.retrieval,
            Stage::Generate => &self.generation,
        }
    }
}

pub struct RagOrchestrator {
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: Arc<dyn Generator>,
    fallbacks: FallbackMessages,
    timeout: Duration,
}

impl RagOrchestrator {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            assembler: ContextAssembler::default(),
            generator,
            fallbacks: FallbackMessages::default(),
            timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackMessages) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Budget for one `answer` call, all stages included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Answer `query` within the configured budget
    pub async fn answer(&self, query: &str) -> String {
        let ctx = CallContext::with_timeout(self.timeout);
        self.answer_with(query, &ctx).await.text
    }

    /// Answer `query` under the caller's cancellation and deadline
    pub async fn answer_with(&self, query: &str, ctx: &CallContext) -> Answer {
        debug!("Stage {}: embedding query ({} chars)", Stage::EmbedQuery, query.len());
        let vector = match self.retriever.embed_query(query, ctx).await {
            Ok(vector) => vector,
            Err(err) => return self.fallback(Stage::EmbedQuery, retrieval_kind(&err), &err),
        };

        debug!("Stage {}: searching", Stage::Retrieve);
        let limit = self.retriever.settings().limit;
        let passages = match self.retriever.retrieve_by_vector(vector, limit, ctx).await {
            Ok(passages) => passages,
            Err(err) => return self.fallback(Stage::Retrieve, retrieval_kind(&err), &err),
        };

        debug!("Stage {}: {} passages", Stage::Assemble, passages.len());
        let context = self.assembler.assemble(&passages);
        let prompt = self.assembler.prompt(&context, query);

        debug!(
            "Stage {}: prompting {} ({} chars)",
            Stage::Generate,
            self.generator.model(),
            prompt.len()
        );
        match self.generator.generate(&prompt, ctx).await {
            Ok(text) => {
                info!(
                    "Answered query from {} passages ({} chars)",
                    passages.len(),
                    text.len()
                );
                Answer {
                    text,
                    outcome: Outcome::Answered,
                    passages,
                }
            }
            Err(err) => {
                let mut answer = self.fallback(Stage::Generate, generation_kind(&err), &err);
                answer.passages = passages;
                answer
            }
        }
    }

    fn fallback(
        &self,
        stage: Stage,
        kind: FailureKind,
        cause: &(dyn std::error::Error + 'static),
    ) -> Answer {
        error!(
            stage = stage.as_str(),
            kind = ?kind,
            "Pipeline failed: {}",
            error_chain(cause)
        );
        Answer {
            text: self.fallbacks.for_stage(stage).to_string(),
            outcome: Outcome::Failed { stage, kind },
            passages: Vec::new(),
        }
    }
}

fn retrieval_kind(err: &RetrievalError) -> FailureKind {
    if err.is_cancelled() {
        FailureKind::Cancelled
    } else if err.is_timeout() {
        FailureKind::TimedOut
    } else {
        FailureKind::Error
    }
}

fn generation_kind(err: &GenerationError) -> FailureKind {
    match err {
        GenerationError::Cancelled => FailureKind::Cancelled,
        GenerationError::Timeout(_) => FailureKind::TimedOut,
        _ => FailureKind::Error,
    }
}

/// "outer: inner: root" rendering of an error and its sources
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
