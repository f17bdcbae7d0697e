//! ReAct response parser.
//!
//! Model output is read line by line. A line opening with one of the labels
//! below starts a new section; any other line continues the current one.
//! Labels count only at the start of a line (after indentation), so
//! `Thought: done. Final Answer: x` is a thought and a decorated
//! `**Final Answer:**` is plain text.
//! Text before the first label belongs to an implicit `Thought:` because
//! the prompt itself ends with one.
//!
//! ```text
//! Thought:       reasoning, recorded
//! Action:        tool name
//! Action Input:  tool input, completes a block when an action is pending
//! Observation:   written by the model itself; discarded
//! Final Answer:  everything after it, to the end of the text
//! ```
//!
//! Precedence:
//! 1. The first `Final Answer:` wins. Nothing after it is parsed and no
//!    action is taken, even if a complete block came before it.
//! 2. Otherwise the last complete `Thought / Action / Action Input` block is
//!    the action. Earlier blocks are superseded.
//! 3. Otherwise only the thoughts are recorded.

use serde::Serialize;

const FINAL_ANSWER: &str = "Final Answer:";
const THOUGHT: &str = "Thought:";
const ACTION_INPUT: &str = "Action Input:";
const ACTION: &str = "Action:";
const OBSERVATION: &str = "Observation:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Thought,
    Action,
    ActionInput,
    Observation,
    FinalAnswer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    /// A labelled line and the text after its label.
    Start(Label, &'a str),
    /// An unlabelled line.
    Text(&'a str),
}

/// One input line and its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Line<'a> {
    raw: &'a str,
    token: Token<'a>,
}

/// Classify one line. `Action Input:` is tested before `Action:`.
fn classify(line: &str) -> Token<'_> {
    let trimmed = line.trim_start();
    for (prefix, label) in [
        (FINAL_ANSWER, Label::FinalAnswer),
        (THOUGHT, Label::Thought),
        (ACTION_INPUT, Label::ActionInput),
        (ACTION, Label::Action),
        (OBSERVATION, Label::Observation),
    ] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Token::Start(label, rest);
        }
    }
    Token::Text(line)
}

fn tokenize(text: &str) -> Vec<Line<'_>> {
    text.lines()
        .map(|raw| Line {
            raw,
            token: classify(raw),
        })
        .collect()
}

/// A tool call chosen by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionStep {
    pub thought: String,
    pub action: String,
    pub input: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub thoughts: Vec<String>,
    pub action: Option<ActionStep>,
    pub final_answer: Option<String>,
}

#[derive(Default)]
struct Block {
    thought: String,
    action: Option<String>,
}

struct Parser {
    section: Label,
    buf: Vec<String>,
    block: Block,
    out: ParsedResponse,
}

impl Parser {
    fn new() -> Self {
        Self {
            section: Label::Thought,
            buf: Vec::new(),
            block: Block::default(),
            out: ParsedResponse::default(),
        }
    }

    fn take_buf(&mut self) -> String {
        let text = self.buf.join("\n").trim().to_string();
        self.buf.clear();
        text
    }

    /// Close the current section.
    fn flush(&mut self) {
        let text = self.take_buf();
        match self.section {
            Label::Thought => {
                if !text.is_empty() {
                    self.out.thoughts.push(text.clone());
                    self.block = Block {
                        thought: text,
                        action: None,
                    };
                }
            }
            Label::Action => {
                let name = clean_action(&text);
                self.block.action = (!name.is_empty()).then_some(name);
            }
            Label::ActionInput => {
                if let Some(action) = self.block.action.take() {
                    self.out.action = Some(ActionStep {
                        thought: std::mem::take(&mut self.block.thought),
                        action,
                        input: clean_input(&text),
                    });
                }
            }
            Label::Observation | Label::FinalAnswer => {}
        }
    }

    fn run(mut self, lines: &[Line<'_>]) -> ParsedResponse {
        for (i, line) in lines.iter().enumerate() {
            match line.token {
                Token::Start(Label::FinalAnswer, rest) => {
                    self.flush();
                    // Labels after the marker are part of the answer.
                    let mut answer = vec![rest];
                    answer.extend(lines[i + 1..].iter().map(|l| l.raw));
                    self.out.final_answer = Some(answer.join("\n").trim().to_string());
                    self.out.action = None;
                    return self.out;
                }
                Token::Start(label, rest) => {
                    self.flush();
                    self.section = label;
                    self.buf.push(rest.to_string());
                }
                Token::Text(text) => self.buf.push(text.to_string()),
            }
        }
        self.flush();
        self.out
    }
}

fn clean_action(text: &str) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    first
        .trim_matches(|c: char| c == '[' || c == ']' || c == '`' || c == '*')
        .trim()
        .to_string()
}

fn clean_input(text: &str) -> String {
    let t = text.trim();
    let unquoted = t
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|s| !s.contains('"'));
    unquoted.unwrap_or(t).trim().to_string()
}

/// Parse one model response.
pub fn parse_response(text: &str) -> ParsedResponse {
    Parser::new().run(&tokenize(text))
}
