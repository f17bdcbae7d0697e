//! `osint ask`: answer one question with the analyst agent.

use std::sync::Arc;

use anyhow::Result;

use crate::agent::{Agent, AgentResult, AgentStatus, Grounding};
use crate::config::Config;
use crate::llm::{create_model, LanguageModel};
use crate::manager::KnowledgeStore;
use crate::tools::ToolRegistry;

/// Build the agent for `config`: file-backed store, built-in tools, and the
/// configured language model.
pub fn build_agent(config: &Config) -> Result<Agent> {
    let store = Arc::new(KnowledgeStore::open(config)?);
    let tools = ToolRegistry::with_builtins(store)?;
    let model: Arc<dyn LanguageModel> = Arc::from(create_model(&config.llm)?);
    Ok(Agent::new(model, tools).with_config(&config.agent, &config.llm))
}

/// Run the ask command. `json` prints the whole result instead of the
/// formatted answer.
pub fn run_ask(config: &Config, query: &str, tool_calling: bool, json: bool) -> Result<()> {
    let agent = build_agent(config)?;
    let result = if tool_calling {
        agent.run_tool_calling(query)
    } else {
        agent.run(query)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render(&result));
    }
    Ok(())
}

fn render(result: &AgentResult) -> String {
    let mut out = String::new();
    if let Some(notice) = &result.notice {
        out.push_str(notice);
        out.push_str("\n\n");
    }
    out.push_str(result.final_response.trim());
    out.push_str("\n\n");

    if !result.cited_chunks.is_empty() {
        out.push_str("Sources:\n");
        for (i, c) in result.cited_chunks.iter().enumerate() {
            out.push_str(&format!(
                "  [{}] {} ({} / {}) similarity {:.2}\n",
                i + 1,
                c.title,
                c.source_type,
                c.source_name,
                c.similarity
            ));
        }
        out.push('\n');
    }

    let grounding = match result.grounding {
        Grounding::KnowledgeBase => "knowledge base",
        Grounding::GeneralKnowledge => "general knowledge (no relevant knowledge base matches)",
    };
    let status = match result.status {
        AgentStatus::Completed => "completed",
        AgentStatus::MaxIterationsReached => "stopped at the step limit",
        AgentStatus::Error => "failed",
        AgentStatus::Running => "running",
    };
    out.push_str(&format!(
        "Status: {}. Answered from {} in {} step{}.\n",
        status,
        grounding,
        result.iteration_count,
        if result.iteration_count == 1 { "" } else { "s" }
    ));
    out
}
