//! Direct retrieve-and-answer.
//!
//! The lighter alternative to the agent: retrieve the top chunks for a
//! question, lay them out as a numbered context block, and make a single
//! language model call. No tools, no iterations.
//!
//! ```text
//! query ──▶ KnowledgeStore::query ──▶ context block ──▶ LanguageModel::generate
//!              (top_k, source_type)     (system + user)        (one call)
//! ```
//!
//! Retrieval failures are errors. Generation failures are reported in
//! [`RagResult::error`] next to the documents that were retrieved, so the
//! caller still sees what the answer would have been based on.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use osint_harness_core::models::SearchResult;

use crate::config::{Config, LlmConfig, RagConfig};
use crate::llm::{create_model, LanguageModel};
use crate::manager::KnowledgeStore;
use crate::tools::truncate_chars;

pub const SYSTEM_PROMPT: &str = "You are an expert OSINT (Open Source Intelligence) analyst \
specializing in cybersecurity intelligence. Analyze the provided intelligence and answer \
queries accurately.

Guidelines:
1. Analyze the given context thoroughly before responding
2. Always cite your sources when using information from the context
3. Maintain a professional and analytical tone
4. If the context is insufficient, acknowledge the limitations
5. Prioritize accuracy over comprehensiveness
6. Focus on factual information rather than speculation
7. Highlight connections between pieces of information when relevant
8. Provide actionable insights when applicable";

const NO_CONTEXT: &str = "No relevant documents were found in the knowledge base.";

/// A chunk handed to the model as context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub source_type: String,
    pub source_name: String,
    pub similarity: f32,
    pub text: String,
}

impl From<SearchResult> for RetrievedDocument {
    fn from(r: SearchResult) -> Self {
        let chunk = r.chunk;
        Self {
            chunk_id: r.chunk_id,
            doc_id: chunk.original_doc_id,
            title: chunk.content.title,
            source_type: chunk.source_type,
            source_name: chunk.source_name,
            similarity: r.similarity,
            text: chunk.content.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagPrompt {
    pub system: String,
    pub user: String,
}

impl RagPrompt {
    /// System and user parts joined for a plain completion call.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RagResult {
    pub query: String,
    pub retrieved_documents: Vec<RetrievedDocument>,
    pub prompt: RagPrompt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Format retrieved documents as the numbered context block.
///
/// Each entry shows title, source, relevance, and at most `max_chars`
/// characters of text (followed by `...` when cut).
pub fn format_context(docs: &[RetrievedDocument], max_chars: usize) -> String {
    if docs.is_empty() {
        return NO_CONTEXT.to_string();
    }
    docs.iter()
        .enumerate()
        .map(|(i, d)| {
            let (text, truncated) = truncate_chars(&d.text, max_chars);
            format!(
                "[Document {}: {}]\nSource: {} ({})\nRelevance: {:.2}\nContent:\n{}{}\n",
                i + 1,
                d.title,
                d.source_name,
                d.source_type,
                d.similarity,
                text,
                if truncated { "..." } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_prompt(query: &str, context: &str) -> RagPrompt {
    RagPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!(
            "I need information about the following query:\n\n\
             Query: {}\n\n\
             Here is the relevant context from the knowledge base:\n\n\
             {}\n\n\
             Based on this context, provide a comprehensive and accurate response to the query. \
             Include relevant information from the context and cite your sources. \
             If the context does not contain enough information, acknowledge the limitations \
             and give the best response the available information supports.",
            query, context
        ),
    }
}

pub struct RagPipeline {
    store: Arc<KnowledgeStore>,
    model: Option<Arc<dyn LanguageModel>>,
    top_k: usize,
    context_chars: usize,
    max_tokens: u32,
    temperature: f32,
}

impl RagPipeline {
    /// A pipeline that only retrieves and builds prompts until a model is
    /// attached with [`with_model`](Self::with_model).
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        let rag = RagConfig::default();
        let llm = LlmConfig::default();
        Self {
            store,
            model: None,
            top_k: rag.top_k,
            context_chars: rag.context_chars,
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_config(mut self, rag: &RagConfig, llm: &LlmConfig) -> Self {
        self.top_k = rag.top_k;
        self.context_chars = rag.context_chars;
        self.max_tokens = llm.max_tokens;
        self.temperature = llm.temperature;
        self
    }

    /// Top chunks for `query`, optionally restricted to one source type.
    pub fn retrieve(&self, query: &str, source_type: Option<&str>) -> Result<Vec<RetrievedDocument>> {
        let docs: Vec<RetrievedDocument> = self
            .store
            .query(query, self.top_k, source_type)?
            .into_iter()
            .map(RetrievedDocument::from)
            .collect();
        tracing::info!(query, retrieved = docs.len(), "retrieved context");
        Ok(docs)
    }

    /// Retrieve, build the prompt, and generate an answer when a model is
    /// attached.
    pub fn process_query(&self, query: &str, source_type: Option<&str>) -> Result<RagResult> {
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let retrieved_documents = self.retrieve(query, source_type)?;
        let prompt = format_prompt(query, &format_context(&retrieved_documents, self.context_chars));

        let mut result = RagResult {
            query: query.to_string(),
            retrieved_documents,
            prompt,
            response: None,
            error: None,
        };
        if let Some(model) = &self.model {
            match model.generate(&result.prompt.render(), self.max_tokens, self.temperature) {
                Ok(text) => result.response = Some(text.trim().to_string()),
                Err(e) => {
                    tracing::error!(error = %e, "generation failed");
                    result.error = Some(format!("Error generating response: {}", e));
                }
            }
        }
        Ok(result)
    }
}

/// Run the rag command. `prompt_only` skips generation and prints the
/// prompt instead of an answer.
pub fn run_rag(
    config: &Config,
    query: &str,
    source_type: Option<&str>,
    prompt_only: bool,
    json: bool,
) -> Result<()> {
    let store = Arc::new(KnowledgeStore::open(config)?);
    let mut pipeline = RagPipeline::new(store).with_config(&config.rag, &config.llm);

    let mut unavailable = None;
    if !prompt_only {
        match create_model(&config.llm) {
            Ok(model) => {
                let model: Arc<dyn LanguageModel> = Arc::from(model);
                pipeline = pipeline.with_model(model);
            }
            Err(e) => unavailable = Some(e),
        }
    }

    let mut result = pipeline.process_query(query, source_type)?;
    if let Some(e) = unavailable {
        result.error = Some(format!("Language model unavailable: {}", e));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render(&result, prompt_only));
    }
    if let Some(err) = &result.error {
        bail!("{}", err);
    }
    Ok(())
}

fn render(result: &RagResult, prompt_only: bool) -> String {
    let mut out = String::new();
    if prompt_only {
        out.push_str(&result.prompt.render());
        out.push_str("\n\n");
    } else if let Some(response) = &result.response {
        out.push_str(response);
        out.push_str("\n\n");
    }

    if result.retrieved_documents.is_empty() {
        out.push_str("Sources: none\n");
    } else {
        out.push_str("Sources:\n");
        for (i, d) in result.retrieved_documents.iter().enumerate() {
            out.push_str(&format!(
                "  [{}] {} ({} / {}) similarity {:.2}\n",
                i + 1,
                d.title,
                d.source_type,
                d.source_name,
                d.similarity
            ));
        }
    }
    out
}
