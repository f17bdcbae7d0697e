//! Text analysis tools that work on their input alone.
//!
//! None of these consult the knowledge base; the agent is expected to pass
//! them text or entities it already gathered with `search_kb`.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate};
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{Tool, ToolOutput};

// ═══════════════════════════════════════════════════════════════════════
// extract_entities
// ═══════════════════════════════════════════════════════════════════════

/// Entity kinds in output order: `(label, pattern)`.
const ENTITY_PATTERNS: [(&str, &str); 7] = [
    ("IP Address", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
    ("Email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    ("URL", r"https?://(?:[-\w.]|%[0-9a-fA-F]{2})+[/\w.-]*"),
    ("CVE", r"CVE-\d{4}-\d{4,7}"),
    ("MD5 Hash", r"\b[a-fA-F0-9]{32}\b"),
    ("SHA1 Hash", r"\b[a-fA-F0-9]{40}\b"),
    ("SHA256 Hash", r"\b[a-fA-F0-9]{64}\b"),
];

/// Pattern-based extraction of indicators from free text.
pub struct ExtractEntitiesTool {
    patterns: Vec<(&'static str, Regex)>,
}

impl ExtractEntitiesTool {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = ENTITY_PATTERNS
            .iter()
            .map(|(label, pattern)| Regex::new(pattern).map(|re| (*label, re)))
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// Distinct matches per entity kind, in first-seen order. Kinds with no
    /// match are absent.
    pub fn extract(&self, text: &str) -> IndexMap<&'static str, Vec<String>> {
        let mut found = IndexMap::new();
        for (label, re) in &self.patterns {
            let matches: IndexSet<&str> = re.find_iter(text).map(|m| m.as_str()).collect();
            if !matches.is_empty() {
                found.insert(*label, matches.into_iter().map(str::to_string).collect());
            }
        }
        found
    }
}

impl Tool for ExtractEntitiesTool {
    fn name(&self) -> &str {
        "extract_entities"
    }

    fn description(&self) -> &str {
        "Extract specific security-related entities (IPs, emails, URLs, CVEs, file hashes) \
         from a given block of text. Input MUST be the text to analyze."
    }

    fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let entities = self.extract(input);
        if entities.is_empty() {
            return Ok(ToolOutput::text(
                "No security-related entities found in the text.",
            ));
        }

        let mut text = String::from("Extracted security-related entities:\n\n");
        for (label, items) in &entities {
            text.push_str(label);
            text.push_str(":\n");
            for item in items {
                text.push_str(&format!("- {}\n", item));
            }
            text.push('\n');
        }
        Ok(ToolOutput::text(text))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// analyze_relationships
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct RelationshipInput {
    entities: Vec<Value>,
    #[serde(default)]
    text: Option<String>,
}

/// Render a JSON scalar without quotes.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', '\n'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Sentence-level co-occurrence of entity pairs.
pub struct AnalyzeRelationshipsTool;

impl Tool for AnalyzeRelationshipsTool {
    fn name(&self) -> &str {
        "analyze_relationships"
    }

    fn description(&self) -> &str {
        "Analyze relationships between entities provided in the input. Input MUST be a JSON \
         string containing an 'entities' list and optionally the 'text' to analyze (e.g., \
         {\"entities\": [\"CVE-2021-44228\", \"APT41\"], \"text\": \"...\"}). Does NOT search \
         the knowledge base."
    }

    fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let Ok(parsed) = serde_json::from_str::<RelationshipInput>(input.trim()) else {
            bail!("Input must be a JSON string with an 'entities' list.");
        };
        let entities: Vec<String> = parsed
            .entities
            .iter()
            .map(plain)
            .filter(|e| !e.trim().is_empty())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        if entities.is_empty() {
            return Ok(ToolOutput::text(
                "No entities provided for relationship analysis.",
            ));
        }

        let mut text = format!(
            "Relationship Analysis:\n\nIdentified {} entities for analysis.\n",
            entities.len()
        );

        let Some(body) = parsed.text.filter(|t| !t.trim().is_empty()) else {
            text.push_str("No text supplied; co-occurrence cannot be measured.\n\nEntities:\n");
            for (i, entity) in entities.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, entity));
            }
            return Ok(ToolOutput::text(text));
        };

        let sentences = sentences(&body);
        let lowered: Vec<String> = entities.iter().map(|e| e.to_lowercase()).collect();

        let mut pairs = Vec::new();
        for i in 0..entities.len() {
            for j in (i + 1)..entities.len() {
                let count = sentences
                    .iter()
                    .filter(|s| s.contains(&lowered[i]) && s.contains(&lowered[j]))
                    .count();
                if count > 0 {
                    pairs.push((i, j, count));
                }
            }
        }
        // Most frequent first; stable so equal counts keep input order.
        pairs.sort_by(|a, b| b.2.cmp(&a.2));

        if pairs.is_empty() {
            text.push_str("\nNo entity pairs co-occur in the supplied text.\n");
        } else {
            text.push_str("\nCo-occurring pairs:\n");
            for (i, j, count) in &pairs {
                text.push_str(&format!(
                    "- {} <-> {}: {} sentence{}\n",
                    entities[*i],
                    entities[*j],
                    count,
                    if *count == 1 { "" } else { "s" }
                ));
            }
        }

        let absent: Vec<&str> = entities
            .iter()
            .zip(&lowered)
            .filter(|(_, l)| !sentences.iter().any(|s| s.contains(l.as_str())))
            .map(|(e, _)| e.as_str())
            .collect();
        if !absent.is_empty() {
            text.push_str(&format!("\nNot mentioned in text: {}\n", absent.join(", ")));
        }

        Ok(ToolOutput::text(text))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// create_timeline
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct TimelineInput {
    events: Vec<Value>,
}

/// Best-effort date parse for ordering.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d") {
        return Some(d);
    }
    raw.parse::<i32>()
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
}

/// Chronological ordering of dated events.
pub struct CreateTimelineTool;

impl Tool for CreateTimelineTool {
    fn name(&self) -> &str {
        "create_timeline"
    }

    fn description(&self) -> &str {
        "Create a chronological timeline from a list of events provided in the input. Input \
         MUST be a JSON string containing an 'events' list, where each event has 'date' and \
         'description'. Does NOT search the knowledge base."
    }

    fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let Ok(parsed) = serde_json::from_str::<TimelineInput>(input.trim()) else {
            bail!(
                "Input must be a JSON string with an 'events' list. \
                 Each event should have 'date' and 'description' fields."
            );
        };
        if parsed.events.is_empty() {
            return Ok(ToolOutput::text("No events provided for timeline creation."));
        }

        let mut events: Vec<(String, String)> = parsed
            .events
            .iter()
            .filter_map(|e| {
                let date = e.get("date")?;
                let description = e.get("description")?;
                Some((plain(date), plain(description)))
            })
            .collect();
        if events.is_empty() {
            return Ok(ToolOutput::text(
                "No valid events found. Each event must have 'date' and 'description' fields.",
            ));
        }

        // Parsed dates first in calendar order, then the rest by raw text.
        events.sort_by(|a, b| match (parse_date(&a.0), parse_date(&b.0)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.0.cmp(&b.0),
        });

        let mut text = String::from("Timeline of Events:\n\n");
        for (date, description) in &events {
            text.push_str(&format!("{}: {}\n", date, description));
        }
        Ok(ToolOutput::text(text))
    }
}
