//! Language model service.
//!
//! The agent depends only on the [`LanguageModel`] trait. [`AnthropicClient`]
//! is the bundled implementation; tests script their own.
//!
//! # Emulated Tool Use
//!
//! [`LanguageModel::generate_with_tools`] has a default implementation that
//! needs nothing beyond plain text generation: the tool catalog and an
//! instruction to announce choices as `Using tool: <name>` are appended to
//! the prompt, and the reply is scanned for those markers. The text after a
//! marker, up to the next marker, becomes that call's input.

use std::time::Duration;

use serde::Serialize;

use crate::config::LlmConfig;
use crate::error::LlmError;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Marker that introduces an emulated tool call.
pub const TOOL_MARKER: &str = "Using tool: ";

/// A tool offered to [`LanguageModel::generate_with_tools`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub input: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolCallResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` and return the generated text.
    fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32)
        -> Result<String, LlmError>;

    /// Complete `prompt` with a tool catalog and report the tools chosen.
    fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ToolCallResponse, LlmError> {
        let text = self.generate(&tool_prompt(prompt, tools), max_tokens, temperature)?;
        let tool_calls = parse_tool_calls(&text, tools);
        tracing::debug!(calls = tool_calls.len(), "parsed emulated tool calls");
        Ok(ToolCallResponse { text, tool_calls })
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        (**self).generate(prompt, max_tokens, temperature)
    }

    fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ToolCallResponse, LlmError> {
        (**self).generate_with_tools(prompt, tools, max_tokens, temperature)
    }
}

fn tool_prompt(prompt: &str, tools: &[ToolSpec]) -> String {
    let mut out = String::from(prompt);
    out.push_str("\n\n# Available Tools:\n");
    for (i, tool) in tools.iter().enumerate() {
        out.push_str(&format!("{}. **{}**: {}\n", i + 1, tool.name, tool.description));
    }
    out.push_str(
        "\n# Instructions for Analysis\n\
         1. Analyze the request carefully.\n\
         2. Identify which tool would be most appropriate for this task.\n\
         3. Show your reasoning for selecting the tool.\n\
         4. Indicate each tool you use on its own line in this format: \"Using tool: [tool_name]\"\n\
         5. Follow the marker with exactly the input for that tool.\n",
    );
    out
}

/// Extract `Using tool: <name>` calls from `text`, in order of appearance.
///
/// Only names in `tools` count; a marker naming anything else is ignored
/// but still ends the previous call's input.
pub fn parse_tool_calls(text: &str, tools: &[ToolSpec]) -> Vec<ToolCall> {
    let mut markers: Vec<(usize, usize, Option<&str>)> = Vec::new();
    let mut from = 0;
    while let Some(pos) = text[from..].find(TOOL_MARKER) {
        let start = from + pos;
        let name_start = start + TOOL_MARKER.len();
        let bracket = usize::from(text[name_start..].starts_with('['));
        let rest = &text[name_start + bracket..];
        // Longest registered name wins so `search` never shadows `search_kb`.
        let name = tools
            .iter()
            .map(|t| t.name.as_str())
            .filter(|n| {
                rest.starts_with(n)
                    && !rest[n.len()..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_alphanumeric() || c == '_')
            })
            .max_by_key(|n| n.len());
        let body_start = name_start + bracket + name.map_or(0, str::len);
        markers.push((start, body_start, name));
        from = name_start;
    }

    let mut calls = Vec::new();
    for (i, (_, body_start, name)) in markers.iter().enumerate() {
        let Some(name) = name else {
            continue;
        };
        let end = markers.get(i + 1).map_or(text.len(), |m| m.0);
        let input = text[*body_start..end]
            .trim_start_matches(|c: char| c == ']' || c == '"' || c == ':')
            .trim();
        calls.push(ToolCall {
            name: name.to_string(),
            input: input.to_string(),
        });
    }
    calls
}

// ============ Anthropic ============

/// Anthropic Messages API client. Reads `ANTHROPIC_API_KEY`.
pub struct AnthropicClient {
    model: String,
    api_key: String,
    url: String,
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("ANTHROPIC_API_KEY"))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_MESSAGES_URL.to_string()),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LanguageModel for AnthropicClient {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        tracing::info!(model = %self.model, max_tokens, temperature, "calling language model");
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json()?;
        let text = extract_text(&json).ok_or(LlmError::EmptyResponse)?;
        tracing::debug!(chars = text.len(), "language model responded");
        Ok(text)
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn extract_text(json: &serde_json::Value) -> Option<String> {
    let blocks = json.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Build the configured language model.
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicClient::new(config)?)),
        other => Err(LlmError::Other(format!("Unknown llm provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(names: &[&str]) -> Vec<ToolSpec> {
        names
            .iter()
            .map(|n| ToolSpec {
                name: n.to_string(),
                description: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_parse_tool_calls_splits_on_markers() {
        let tools = specs(&["search_kb", "extract_entities"]);
        let text = "I should search first.\nUsing tool: search_kb\nlog4j exploitation\n\
                    Then pull indicators.\nUsing tool: extract_entities\nCVE-2021-44228 at 10.0.0.1";
        let calls = parse_tool_calls(text, &tools);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search_kb");
        assert_eq!(calls[0].input, "log4j exploitation\nThen pull indicators.");
        assert_eq!(calls[1].name, "extract_entities");
        assert_eq!(calls[1].input, "CVE-2021-44228 at 10.0.0.1");
    }

    #[test]
    fn test_parse_tool_calls_longest_name_and_unknown() {
        let tools = specs(&["search", "search_kb"]);
        let calls = parse_tool_calls(
            "Using tool: [search_kb] ransomware\nUsing tool: web_lookup foo",
            &tools,
        );
        assert_eq!(
            calls,
            vec![ToolCall {
                name: "search_kb".into(),
                input: "ransomware".into()
            }]
        );
        assert!(parse_tool_calls("no tools here", &tools).is_empty());
    }

    #[test]
    fn test_extract_text_joins_text_blocks() {
        let resp = json!({
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(extract_text(&resp).as_deref(), Some("Hello world"));
        assert_eq!(extract_text(&json!({"content": []})), None);
    }

    #[test]
    fn test_default_generate_with_tools_uses_prompt_protocol() {
        struct Echo;
        impl LanguageModel for Echo {
            fn generate(&self, prompt: &str, _: u32, _: f32) -> Result<String, LlmError> {
                assert!(prompt.contains("1. **search_kb**"));
                assert!(prompt.contains("Using tool: [tool_name]"));
                Ok("Using tool: search_kb apt29".to_string())
            }
        }
        let resp = Echo
            .generate_with_tools("find apt29", &specs(&["search_kb"]), 100, 0.0)
            .unwrap();
        assert_eq!(resp.tool_calls[0].input, "apt29");
    }
}
