//! ReAct agent loop.
//!
//! One [`Agent::run`] call answers one query. State lives only for that call.
//!
//! ```text
//! should_force_initial_search? ──yes──▶ iteration 0 = search_kb(query)
//!            │ no
//!            ▼
//! ┌─▶ prompt ──▶ LanguageModel::generate ──▶ parse_response
//! │                                  │
//! │         Final Answer ◀───────────┤──────────▶ Completed
//! │                                  │ action
//! │   observation ◀── ToolRegistry::invoke
//! └──────┘   (max_iterations)
//!            ▼
//!   forced completion prompt ──▶ MaxIterationsReached
//! ```
//!
//! Tool failures, including unknown tool names, come back to the model as
//! observations. A language model failure ends the turn with
//! [`AgentStatus::Error`]; it is not retried.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::{AgentConfig, LlmConfig};
use crate::error::{LlmError, ToolError};
use crate::llm::{LanguageModel, ToolSpec};
use crate::react::{parse_response, ActionStep};
use crate::tools::{truncate_chars, Citation, ToolRegistry};

/// Default bound on loop iterations.
pub const MAX_ITER: usize = 5;

const SEARCH_TOOL: &str = "search_kb";
const TRUNCATION_MARKER: &str = "... [truncated]";
const FORCED_SEARCH_THOUGHT: &str =
    "I should search the knowledge base for information relevant to this query.";
const MAX_ITERATIONS_NOTICE: &str =
    "I've reached the maximum number of analysis steps. Here's my current understanding:";
const NO_CONCLUSION: &str =
    "Based on the information gathered, I cannot provide a definitive answer at this time.";
const ERROR_NOTICE: &str = "The analysis could not be completed.";

/// Words that on their own make a query small talk rather than a question.
const SMALL_TALK: &[&str] = &[
    "hi", "hello", "hey", "hiya", "yo", "greetings", "there", "good", "morning", "afternoon",
    "evening", "thanks", "thank", "you", "thx", "ty", "much", "very", "a", "lot", "ok", "okay",
    "cheers", "bye", "goodbye", "great", "cool",
];

/// Whether iteration 0 should search the knowledge base without asking the
/// model.
///
/// False for empty input, slash commands, and bare greetings or thanks.
pub fn should_force_initial_search(query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() || query.starts_with('/') {
        return false;
    }
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return false;
    }
    !(words.len() <= 6 && words.iter().all(|w| SMALL_TALK.contains(w)))
}

/// `search_kb` input for the forced initial search.
fn forced_search_input(query: &str, limit: usize) -> String {
    serde_json::json!({ "query": query.trim(), "limit": limit }).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Completed,
    MaxIterationsReached,
    Error,
}

/// Whether an answer rests on the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    /// At least one citation reached the similarity threshold.
    KnowledgeBase,
    GeneralKnowledge,
}

/// One entry in the running transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Prompt { text: String },
    Response { text: String },
    /// An action taken without consulting the model.
    ForcedAction { thought: String, action: String, input: String },
    Observation { tool: String, text: String },
}

/// Mutable state of one turn.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub query: String,
    pub transcript: Vec<TranscriptEntry>,
    pub thoughts: Vec<String>,
    pub actions: Vec<ActionStep>,
    pub iteration_count: usize,
    pub cited_chunks: IndexMap<String, Citation>,
    pub status: AgentStatus,
    pub final_response: String,
}

impl AgentState {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            transcript: Vec::new(),
            thoughts: Vec::new(),
            actions: Vec::new(),
            iteration_count: 0,
            cited_chunks: IndexMap::new(),
            status: AgentStatus::Running,
            final_response: String::new(),
        }
    }

    fn merge_citations(&mut self, citations: Vec<Citation>) {
        for citation in citations {
            self.cited_chunks.insert(citation.chunk_id.clone(), citation);
        }
    }

    fn fail(mut self, err: &LlmError) -> Self {
        tracing::error!(error = %err, iteration = self.iteration_count, "language model request failed");
        self.status = AgentStatus::Error;
        self.final_response = format!("Language model request failed: {}", err);
        self
    }
}

/// The finished turn, as handed to a formatter.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub query: String,
    pub status: AgentStatus,
    pub final_response: String,
    /// Display text for a turn that did not complete normally.
    pub notice: Option<String>,
    pub thoughts: Vec<String>,
    pub actions: Vec<ActionStep>,
    pub cited_chunks: Vec<Citation>,
    pub transcript: Vec<TranscriptEntry>,
    pub iteration_count: usize,
    pub grounding: Grounding,
}

pub struct Agent {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    config: AgentConfig,
    max_tokens: u32,
    temperature: f32,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry) -> Self {
        let llm = LlmConfig::default();
        Self {
            model,
            tools,
            config: AgentConfig::default(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    pub fn with_config(mut self, agent: &AgentConfig, llm: &LlmConfig) -> Self {
        self.config = agent.clone();
        self.max_tokens = llm.max_tokens;
        self.temperature = llm.temperature;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer `query` with the ReAct loop.
    pub fn run(&self, query: &str) -> AgentResult {
        tracing::info!(query, "starting agent turn");
        let state = self.run_loop(query);
        self.finish(state)
    }

    fn run_loop(&self, query: &str) -> AgentState {
        let mut state = AgentState::new(query);
        let base = self.react_prompt(query);
        state.transcript.push(TranscriptEntry::Prompt { text: base.clone() });
        let force_search = should_force_initial_search(query);

        for iteration in 0..self.config.max_iterations {
            state.iteration_count = iteration + 1;

            let step = if iteration == 0 && force_search {
                let step = ActionStep {
                    thought: FORCED_SEARCH_THOUGHT.to_string(),
                    action: SEARCH_TOOL.to_string(),
                    input: forced_search_input(query, self.config.search_limit),
                };
                tracing::debug!("forcing initial knowledge base search");
                state.thoughts.push(step.thought.clone());
                state.transcript.push(TranscriptEntry::ForcedAction {
                    thought: step.thought.clone(),
                    action: step.action.clone(),
                    input: step.input.clone(),
                });
                Some(step)
            } else {
                let prompt = render_prompt(&base, &state.transcript);
                let text = match self.generate(&prompt) {
                    Ok(text) => text,
                    Err(e) => return state.fail(&e),
                };
                state.transcript.push(TranscriptEntry::Response { text: text.clone() });

                let parsed = parse_response(&text);
                state.thoughts.extend(parsed.thoughts);
                if let Some(answer) = parsed.final_answer {
                    tracing::info!(iteration = state.iteration_count, "agent reached a final answer");
                    state.status = AgentStatus::Completed;
                    state.final_response = answer;
                    return state;
                }
                if parsed.action.is_none() {
                    tracing::debug!(iteration = state.iteration_count, "no action parsed, continuing");
                }
                parsed.action
            };

            if let Some(step) = step {
                self.dispatch(&mut state, step);
            }
        }

        self.force_completion(state, &base)
    }

    /// One last prompt demanding a final answer.
    fn force_completion(&self, mut state: AgentState, base: &str) -> AgentState {
        tracing::warn!(iterations = state.iteration_count, "iteration limit reached, forcing completion");
        let mut prompt = render_prompt(base, &state.transcript);
        prompt.push_str(
            "\n\nYou have reached the maximum number of analysis steps. Do not call any more \
             tools. Based on the information gathered so far, respond now with \
             \"Final Answer:\" followed by your complete answer.",
        );

        let text = match self.generate(&prompt) {
            Ok(text) => text,
            Err(e) => return state.fail(&e),
        };
        state.transcript.push(TranscriptEntry::Response { text: text.clone() });

        let parsed = parse_response(&text);
        state.thoughts.extend(parsed.thoughts);
        state.final_response = match parsed.final_answer {
            Some(answer) if !answer.is_empty() => answer,
            _ if !text.trim().is_empty() => text.trim().to_string(),
            _ => NO_CONCLUSION.to_string(),
        };
        state.status = AgentStatus::MaxIterationsReached;
        state
    }

    /// Answer `query` with one emulated tool-calling round.
    ///
    /// The model picks tools in a single call; they run, and a follow-up
    /// call turns the results into the answer.
    pub fn run_tool_calling(&self, query: &str) -> AgentResult {
        tracing::info!(query, "starting tool-calling turn");
        let mut state = AgentState::new(query);
        let prompt = self.analysis_prompt(query);
        state.transcript.push(TranscriptEntry::Prompt { text: prompt.clone() });
        state.iteration_count = 1;

        let specs: Vec<ToolSpec> = self
            .tools
            .catalog()
            .into_iter()
            .map(|(name, description)| ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect();

        let response = match self.model.generate_with_tools(
            &prompt,
            &specs,
            self.max_tokens,
            self.temperature,
        ) {
            Ok(r) => r,
            Err(e) => return self.finish(state.fail(&e)),
        };
        state.transcript.push(TranscriptEntry::Response {
            text: response.text.clone(),
        });

        if response.tool_calls.is_empty() {
            state.status = AgentStatus::Completed;
            state.final_response = response.text.trim().to_string();
            return self.finish(state);
        }

        let mut results = String::from("# Tool Results\n\n");
        for call in response.tool_calls {
            let step = ActionStep {
                thought: String::new(),
                action: call.name,
                input: call.input,
            };
            let observation = self.dispatch(&mut state, step.clone());
            results.push_str(&format!(
                "## {}\nInput: {}\nResult: {}\n\n",
                step.action, step.input, observation
            ));
        }

        state.iteration_count = 2;
        let follow_up = format!(
            "{}\n\n{}\nBased on the query and the tool results, please provide your final analysis.",
            prompt, results
        );
        match self.generate(&follow_up) {
            Ok(text) => {
                state.transcript.push(TranscriptEntry::Response { text: text.clone() });
                state.status = AgentStatus::Completed;
                state.final_response = text.trim().to_string();
                self.finish(state)
            }
            Err(e) => self.finish(state.fail(&e)),
        }
    }

    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.model
            .generate(prompt, self.max_tokens, self.temperature)
    }

    /// Run one action and record its observation. Returns the observation.
    fn dispatch(&self, state: &mut AgentState, step: ActionStep) -> String {
        tracing::info!(tool = %step.action, iteration = state.iteration_count, "dispatching action");
        let observation = match self.tools.invoke(&step.action, &step.input) {
            Ok(output) => {
                state.merge_citations(output.citations);
                output.text
            }
            Err(ToolError::NotFound(name)) => {
                let available: Vec<&str> = self.tools.catalog().into_iter().map(|(n, _)| n).collect();
                format!(
                    "Error: Tool '{}' not found. Please use one of the available tools: {}.",
                    name,
                    available.join(", ")
                )
            }
            Err(e) => format!("Error: {}", e),
        };

        let observation = match truncate_chars(&observation, self.config.observation_limit) {
            (kept, true) => format!("{}{}", kept, TRUNCATION_MARKER),
            (kept, false) => kept.to_string(),
        };
        state.transcript.push(TranscriptEntry::Observation {
            tool: step.action.clone(),
            text: observation.clone(),
        });
        state.actions.push(step);
        observation
    }

    fn finish(&self, state: AgentState) -> AgentResult {
        let grounding = if state
            .cited_chunks
            .values()
            .any(|c| c.similarity >= self.config.min_grounding_similarity)
        {
            Grounding::KnowledgeBase
        } else {
            Grounding::GeneralKnowledge
        };
        let notice = match state.status {
            AgentStatus::MaxIterationsReached => Some(MAX_ITERATIONS_NOTICE.to_string()),
            AgentStatus::Error => Some(ERROR_NOTICE.to_string()),
            AgentStatus::Completed | AgentStatus::Running => None,
        };
        tracing::info!(
            status = ?state.status,
            iterations = state.iteration_count,
            citations = state.cited_chunks.len(),
            grounding = ?grounding,
            "agent turn finished"
        );
        AgentResult {
            query: state.query,
            status: state.status,
            final_response: state.final_response,
            notice,
            thoughts: state.thoughts,
            actions: state.actions,
            cited_chunks: state.cited_chunks.into_values().collect(),
            transcript: state.transcript,
            iteration_count: state.iteration_count,
            grounding,
        }
    }

    fn tool_catalog(&self) -> String {
        self.tools
            .catalog()
            .iter()
            .enumerate()
            .map(|(i, (name, description))| format!("{}. {}: {}\n", i + 1, name, description))
            .collect()
    }

    fn react_prompt(&self, query: &str) -> String {
        format!(
            "You are an expert OSINT analyst specializing in cybersecurity intelligence.\n\
             Your task is to analyze intelligence information and answer security-related questions.\n\
             \n\
             # Available Tools\n\
             {tools}\n\
             # Instructions for Tool Use\n\
             Always search the knowledge base with {search} before relying on your own knowledge.\n\
             To use a tool, follow this format exactly:\n\
             Thought: [your reasoning about what needs to be done]\n\
             Action: [tool_name]\n\
             Action Input: [input for the tool]\n\
             \n\
             Then stop and wait. The Observation will be provided to you.\n\
             Use one tool per response. Never write an Observation yourself.\n\
             \n\
             When you have enough information, respond with:\n\
             Thought: [your final reasoning]\n\
             Final Answer: [your complete answer, citing the documents you used]\n\
             \n\
             If the knowledge base has nothing relevant, say so in your Final Answer before \
             drawing on general knowledge.\n\
             \n\
             # Intelligence Query\n\
             {query}\n\
             \n\
             Let's analyze this systematically:\n\
             Thought: ",
            tools = self.tool_catalog(),
            search = SEARCH_TOOL,
            query = query.trim(),
        )
    }

    fn analysis_prompt(&self, query: &str) -> String {
        format!(
            "You are an expert OSINT (Open Source Intelligence) analyst specializing in \
             cybersecurity intelligence.\n\
             Your task is to analyze intelligence information and answer security-related questions.\n\
             \n\
             # Analysis Process\n\
             1. Carefully think about the query and what intelligence you need\n\
             2. Use appropriate tools when necessary to gather and analyze information\n\
             3. Consider multiple perspectives and potential connections\n\
             4. Provide a comprehensive and nuanced analysis\n\
             5. Cite specific sources and evidence for your conclusions\n\
             6. Express appropriate confidence levels based on the available evidence\n\
             \n\
             # Intelligence Query\n\
             {}\n",
            query.trim()
        )
    }
}

/// The base prompt followed by the transcript so far, ending on an open
/// `Thought:` for the model to continue.
fn render_prompt(base: &str, transcript: &[TranscriptEntry]) -> String {
    let mut out = base.to_string();
    let mut entries = transcript
        .iter()
        .filter(|e| !matches!(e, TranscriptEntry::Prompt { .. }))
        .peekable();
    while let Some(entry) = entries.next() {
        match entry {
            TranscriptEntry::Prompt { .. } => {}
            TranscriptEntry::Response { text } => {
                out.push_str(text.trim_end());
                if !matches!(entries.peek(), Some(TranscriptEntry::Observation { .. })) {
                    out.push_str("\nThought: ");
                }
            }
            TranscriptEntry::ForcedAction {
                thought,
                action,
                input,
            } => {
                out.push_str(&format!(
                    "{}\nAction: {}\nAction Input: {}",
                    thought, action, input
                ));
            }
            TranscriptEntry::Observation { text, .. } => {
                out.push_str(&format!("\nObservation: {}\nThought: ", text));
            }
        }
    }
    out
}
