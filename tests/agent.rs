use std::collections::VecDeque;
use std::sync::Arc;

use osint_harness::agent::{Agent, AgentStatus, Grounding, TranscriptEntry};
use osint_harness::config::{AgentConfig, LlmConfig};
use osint_harness::error::LlmError;
use osint_harness::llm::LanguageModel;
use osint_harness::manager::KnowledgeStore;
use osint_harness::tools::ToolRegistry;
use osint_harness_core::chunk::{Chunker, ChunkerConfig};
use osint_harness_core::embedding::HashingProvider;
use osint_harness_core::models::DocumentContent;
use osint_harness_core::store::memory::{InMemoryDocumentStore, InMemoryVectorStore};
use parking_lot::Mutex;
use serde_json::json;

/// Replays canned replies in order and records every prompt it sees.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn ok(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, prompt: &str, _: u32, _: f32) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Other("script exhausted".into())))
    }
}

fn knowledge_store() -> Arc<KnowledgeStore> {
    let store = KnowledgeStore::new(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(HashingProvider::new(256)),
        Chunker::new(ChunkerConfig::default()).unwrap(),
    );
    store
        .ingest(
            DocumentContent::from_value(json!({
                "title": "SQL Injection in Login Form",
                "description": "An SQL injection vulnerability in the login form allows remote attackers to bypass authentication."
            })),
            "vulnerability",
            "nvd",
        )
        .unwrap();
    store
        .ingest(
            DocumentContent::titled("Garden notes", "Tomatoes need full sun and regular watering."),
            "misc",
            "notes",
        )
        .unwrap();
    Arc::new(store)
}

fn agent(model: &Arc<ScriptedModel>) -> Agent {
    let tools = ToolRegistry::with_builtins(knowledge_store()).unwrap();
    Agent::new(model.clone(), tools)
}

#[test]
fn test_final_answer_completes_without_tools() {
    let model = ScriptedModel::ok(&["Thought: just a greeting\nFinal Answer: Hello! Ask me about threats."]);
    let result = agent(&model).run("hello");

    assert_eq!(result.status, AgentStatus::Completed);
    assert_eq!(result.final_response, "Hello! Ask me about threats.");
    assert_eq!(result.iteration_count, 1);
    assert!(result.actions.is_empty());
    assert!(result.cited_chunks.is_empty());
    assert_eq!(result.grounding, Grounding::GeneralKnowledge);
    assert_eq!(result.notice, None);
    assert_eq!(model.prompts().len(), 1);
}

#[test]
fn test_forced_search_collects_citations() {
    let model = ScriptedModel::ok(&["The first document covers it.\nFinal Answer: It allows authentication bypass."]);
    let result = agent(&model).run("What does the SQL injection vulnerability allow?");

    assert_eq!(result.status, AgentStatus::Completed);
    assert_eq!(result.iteration_count, 2);
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].action, "search_kb");
    assert!(matches!(
        result.transcript.get(1),
        Some(TranscriptEntry::ForcedAction { action, .. }) if action == "search_kb"
    ));

    let top = &result.cited_chunks[0];
    assert_eq!(top.source_type, "vulnerability");
    assert!(top.similarity >= 0.2);
    assert_eq!(result.grounding, Grounding::KnowledgeBase);

    // The model only saw the prompt after the search had run.
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Action: search_kb"));
    assert!(prompts[0].contains("Observation: Found"));
    assert!(prompts[0].ends_with("Thought: "));
}

#[test]
fn test_repeated_search_does_not_duplicate_citations() {
    let model = ScriptedModel::ok(&[
        "Thought: search again\nAction: search_kb\nAction Input: SQL injection vulnerability",
        "Final Answer: done",
    ]);
    let result = agent(&model).run("SQL injection vulnerability");

    assert_eq!(result.status, AgentStatus::Completed);
    assert_eq!(result.actions.len(), 2);
    let mut ids: Vec<&str> = result.cited_chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    let before = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), before);
    assert_eq!(before, 2);
}

#[test]
fn test_iteration_limit_forces_completion() {
    let step = "Thought: keep digging\nAction: extract_entities\nAction Input: 10.0.0.1";
    let model = ScriptedModel::ok(&[step, step, step, step, step, "Final Answer: 10.0.0.1 is the only indicator."]);
    let result = agent(&model).run("/scan");

    assert_eq!(result.status, AgentStatus::MaxIterationsReached);
    assert_eq!(result.iteration_count, 5);
    assert_eq!(result.actions.len(), 5);
    assert_eq!(result.final_response, "10.0.0.1 is the only indicator.");
    assert!(result.notice.is_some());

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 6);
    assert!(prompts[5].contains("maximum number of analysis steps"));
}

#[test]
fn test_forced_completion_without_marker_uses_raw_text() {
    let model = ScriptedModel::ok(&["Thought: hmm", "Thought: still thinking", "My best guess is APT29."]);
    let tools = ToolRegistry::with_builtins(knowledge_store()).unwrap();
    let config = AgentConfig {
        max_iterations: 2,
        ..Default::default()
    };
    let result = Agent::new(model.clone(), tools)
        .with_config(&config, &LlmConfig::default())
        .run("/who");

    assert_eq!(result.status, AgentStatus::MaxIterationsReached);
    assert_eq!(result.final_response, "My best guess is APT29.");
    assert_eq!(result.thoughts, vec!["hmm", "still thinking", "My best guess is APT29."]);
}

#[test]
fn test_unknown_tool_becomes_observation() {
    let model = ScriptedModel::ok(&[
        "Thought: scan it\nAction: nmap_scan\nAction Input: 10.0.0.1",
        "Thought: no scanner\nFinal Answer: I cannot scan hosts.",
    ]);
    let result = agent(&model).run("/scan 10.0.0.1");

    assert_eq!(result.status, AgentStatus::Completed);
    let observation = result
        .transcript
        .iter()
        .find_map(|e| match e {
            TranscriptEntry::Observation { tool, text } if tool == "nmap_scan" => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(observation.contains("Tool 'nmap_scan' not found"));
    assert!(observation.contains("search_kb"));
    assert!(model.prompts()[1].contains("Observation: Error: Tool 'nmap_scan' not found"));
}

#[test]
fn test_model_failure_ends_turn_with_error() {
    let model = ScriptedModel::new(vec![Err(LlmError::Api {
        status: 500,
        body: "overloaded".into(),
    })]);
    let result = agent(&model).run("/status");

    assert_eq!(result.status, AgentStatus::Error);
    assert!(result.final_response.starts_with("Language model request failed"));
    assert!(result.final_response.contains("overloaded"));
    assert!(result.notice.is_some());
    assert_eq!(model.prompts().len(), 1);
}

#[test]
fn test_long_observation_is_truncated() {
    let model = ScriptedModel::ok(&[
        "Thought: dump\nAction: dump\nAction Input: all",
        "Final Answer: ok",
    ]);
    let mut tools = ToolRegistry::new();
    tools.register_fn("dump", "Returns a lot of text.", |_| Ok("x".repeat(5000)));
    let config = AgentConfig {
        observation_limit: 100,
        ..Default::default()
    };
    let result = Agent::new(model.clone(), tools)
        .with_config(&config, &LlmConfig::default())
        .run("/dump");

    let observation = result
        .transcript
        .iter()
        .find_map(|e| match e {
            TranscriptEntry::Observation { text, .. } => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(observation.ends_with("... [truncated]"));
    assert_eq!(observation.chars().count(), 100 + "... [truncated]".len());
}

#[test]
fn test_tool_calling_round() {
    let model = ScriptedModel::ok(&[
        "I will pull the indicators.\nUsing tool: extract_entities\nCVE-2021-44228 was exploited from 203.0.113.7",
        "The activity is Log4Shell exploitation from 203.0.113.7.",
    ]);
    let result = agent(&model).run_tool_calling("Summarise CVE-2021-44228 activity from 203.0.113.7");

    assert_eq!(result.status, AgentStatus::Completed);
    assert_eq!(result.iteration_count, 2);
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].action, "extract_entities");
    assert_eq!(result.final_response, "The activity is Log4Shell exploitation from 203.0.113.7.");

    let prompts = model.prompts();
    assert!(prompts[0].contains("Using tool: [tool_name]"));
    assert!(prompts[1].contains("# Tool Results"));
    assert!(prompts[1].contains("CVE-2021-44228"));
}

#[test]
fn test_tool_calling_without_calls_answers_directly() {
    let model = ScriptedModel::ok(&["No tools needed: phishing is social engineering."]);
    let result = agent(&model).run_tool_calling("What is phishing?");

    assert_eq!(result.status, AgentStatus::Completed);
    assert!(result.actions.is_empty());
    assert_eq!(result.final_response, "No tools needed: phishing is social engineering.");
    assert_eq!(model.prompts().len(), 1);
}
