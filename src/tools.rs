//! Tool trait, registry, and the knowledge base search tool.
//!
//! Tools are the agent's only way to act. Each one takes a single string
//! input (free text or a JSON object, depending on the tool) and returns a
//! [`ToolOutput`]: text for the model, plus structured citations when the
//! tool consulted the knowledge base.
//!
//! # Built-in Tools
//!
//! | Tool | Input | Consults the knowledge base |
//! |------|-------|-----------------------------|
//! | `search_kb` | query text or `{"query", "limit", "source_type"}` | yes |
//! | `extract_entities` | text | no |
//! | `analyze_relationships` | `{"entities": [...], "text": "..."}` | no |
//! | `create_timeline` | `{"events": [{"date", "description"}]}` | no |
//!
//! # Custom Tools
//!
//! ```rust
//! use osint_harness::tools::ToolRegistry;
//!
//! let mut tools = ToolRegistry::new();
//! tools.register_fn("echo", "Repeat the input", |input| Ok(input.to_string()));
//! assert_eq!(tools.invoke("echo", "hi").unwrap().text, "hi");
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use osint_harness_core::models::SearchResult;

use crate::error::ToolError;
use crate::manager::KnowledgeStore;
use crate::osint_tools::{AnalyzeRelationshipsTool, CreateTimelineTool, ExtractEntitiesTool};

/// Characters of chunk text shown per search hit.
const SNIPPET_CHARS: usize = 300;

/// Default number of hits returned by `search_kb`.
pub const DEFAULT_SEARCH_LIMIT: usize = 3;

/// A knowledge base chunk an answer can point back to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub source_type: String,
    pub source_name: String,
    pub similarity: f32,
    pub snippet: String,
}

impl Citation {
    pub fn from_result(result: &SearchResult) -> Self {
        let chunk = &result.chunk;
        let (snippet, _) = truncate_chars(chunk.text(), SNIPPET_CHARS);
        Self {
            chunk_id: result.chunk_id.clone(),
            doc_id: chunk.original_doc_id.clone(),
            title: chunk.content.title.clone(),
            source_type: chunk.source_type.clone(),
            source_name: chunk.source_name.clone(),
            similarity: result.similarity,
            snippet: snippet.to_string(),
        }
    }
}

/// What a tool hands back to the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }
}

/// A callable tool.
pub trait Tool: Send + Sync {
    /// Unique, lowercase identifier with underscores (e.g. `"search_kb"`).
    fn name(&self) -> &str;

    /// One-line description shown to the model in the tool catalog.
    fn description(&self) -> &str;

    /// Run the tool. Errors become observations, never aborts.
    fn invoke(&self, input: &str) -> Result<ToolOutput>;
}

/// Adapter for closure-based tools.
struct FnTool<F> {
    name: String,
    description: String,
    f: F,
}

impl<F> Tool for FnTool<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn invoke(&self, input: &str) -> Result<ToolOutput> {
        (self.f)(input).map(ToolOutput::text)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Name-keyed tool registry. The catalog lists tools in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the four built-in tools.
    pub fn with_builtins(store: Arc<KnowledgeStore>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Box::new(SearchKbTool::new(store)));
        registry.register(Box::new(ExtractEntitiesTool::new()?));
        registry.register(Box::new(AnalyzeRelationshipsTool));
        registry.register(Box::new(CreateTimelineTool));
        Ok(registry)
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "tool already registered, overwriting");
        }
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
    }

    pub fn register_fn<F>(&mut self, name: &str, description: &str, f: F)
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.register(Box::new(FnTool {
            name: name.to_string(),
            description: description.to_string(),
            f,
        }));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn invoke(&self, name: &str, input: &str) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tracing::info!(tool = name, "executing tool");
        tool.invoke(input).map_err(|e| {
            tracing::error!(tool = name, error = %e, "tool failed");
            ToolError::Execution {
                tool: name.to_string(),
                message: format!("{:#}", e),
            }
        })
    }

    /// `(name, description)` pairs in registration order.
    pub fn catalog(&self) -> Vec<(&str, &str)> {
        self.tools
            .values()
            .map(|t| (t.name(), t.description()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Cut `s` to at most `max` characters. Returns whether anything was cut.
pub(crate) fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((byte, _)) => (&s[..byte], true),
        None => (s, false),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// search_kb
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct SearchKbInput {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    source_type: Option<String>,
}

impl SearchKbInput {
    /// A JSON object is read field by field; anything else is the query.
    fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(parsed) = serde_json::from_str::<SearchKbInput>(trimmed) {
                return parsed;
            }
        }
        Self {
            query: trimmed.to_string(),
            limit: None,
            source_type: None,
        }
    }
}

/// Semantic search over the knowledge base.
pub struct SearchKbTool {
    store: Arc<KnowledgeStore>,
}

impl SearchKbTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

impl Tool for SearchKbTool {
    fn name(&self) -> &str {
        "search_kb"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for documents relevant to a query. Input should be a \
         search query string. Use this FIRST to find information before attempting analysis."
    }

    fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let params = SearchKbInput::parse(input);
        if params.query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let results = self
            .store
            .query(&params.query, limit, params.source_type.as_deref())?;

        if results.is_empty() {
            return Ok(ToolOutput::text("No relevant documents found."));
        }

        let mut text = format!("Found {} relevant documents:\n\n", results.len());
        for (i, result) in results.iter().enumerate() {
            let chunk = &result.chunk;
            let (content, cut) = truncate_chars(chunk.text(), SNIPPET_CHARS);
            text.push_str(&format!("Document {}:\n", i + 1));
            text.push_str(&format!("Title: {}\n", chunk.content.title));
            text.push_str(&format!("Source: {}\n", chunk.source_name));
            text.push_str(&format!("Type: {}\n", chunk.source_type));
            text.push_str(&format!("Similarity: {:.3}\n", result.similarity));
            text.push_str(&format!(
                "Content: {}{}\n\n",
                content,
                if cut { "..." } else { "" }
            ));
        }

        Ok(ToolOutput {
            text,
            citations: results.iter().map(Citation::from_result).collect(),
        })
    }
}
