//! Per-query records: the iteration state, the trace and the final response.
//! Nothing here outlives one query.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::Serialize;

use crate::models::{SearchResult, SearchResults, ToolCall, ToolResult};

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Retrieving,
    Evaluating,
    ToolCalling,
    Answering,
}

/// How a query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The policy judged the context sufficient.
    Done,
    /// Iteration budget exhausted; the context gathered so far is returned.
    MaxIterationsReached,
    /// Wall-clock budget exhausted; the context gathered so far is returned.
    DeadlineExceeded,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Done => write!(f, "done"),
            AgentStatus::MaxIterationsReached => write!(f, "max iterations reached"),
            AgentStatus::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// What the sufficiency policy decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Answer,
    CallTool { call: ToolCall },
}

/// One accumulated piece of context.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextEntry {
    Retrieval { iteration: u32, results: SearchResults },
    Tool { iteration: u32, result: ToolResult },
}

/// Observable steps of one query.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Retrieved {
        iteration: u32,
        query: String,
        results: usize,
        degraded: bool,
        top_score: Option<f32>,
    },
    Evaluated {
        iteration: u32,
        decision: Decision,
        #[serde(skip_serializing_if = "Option::is_none")]
        refined_query: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    PolicyFailed {
        iteration: u32,
        error: String,
    },
    ToolSucceeded {
        iteration: u32,
        tool: String,
    },
    ToolFailed {
        iteration: u32,
        tool: String,
        error: String,
    },
    DuplicateSuppressed {
        iteration: u32,
        tool: String,
    },
    MaxIterationsReached {
        iteration: u32,
    },
    DeadlineExceeded {
        elapsed_ms: u64,
    },
}

/// Mutable record of one query's progress.
#[derive(Debug, Clone)]
pub struct IterationState {
    pub question: String,
    pub current_query: String,
    /// Completed tool-calling rounds.
    pub iteration: u32,
    pub retrieval_passes: u32,
    pub context: Vec<ContextEntry>,
    pub decision: Option<Decision>,
    /// Tool call selected by the last evaluation, not yet executed.
    pub pending_call: Option<ToolCall>,
    attempted: HashSet<String>,
}

impl IterationState {
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            current_query: question.clone(),
            question,
            iteration: 0,
            retrieval_passes: 0,
            context: Vec::new(),
            decision: None,
            pending_call: None,
            attempted: HashSet::new(),
        }
    }

    pub fn record_retrieval(&mut self, results: SearchResults) {
        self.retrieval_passes += 1;
        self.context.push(ContextEntry::Retrieval {
            iteration: self.iteration,
            results,
        });
    }

    pub fn record_tool(&mut self, result: ToolResult) {
        self.context.push(ContextEntry::Tool {
            iteration: self.iteration,
            result,
        });
    }

    /// Remember `call`; false if an identical call was already made.
    pub fn mark_attempted(&mut self, call: &ToolCall) -> bool {
        self.attempted.insert(call.canonical_key())
    }

    pub fn has_attempted(&self, call: &ToolCall) -> bool {
        self.attempted.contains(&call.canonical_key())
    }

    pub fn latest_results(&self) -> Option<&SearchResults> {
        self.context.iter().rev().find_map(|entry| match entry {
            ContextEntry::Retrieval { results, .. } => Some(results),
            ContextEntry::Tool { .. } => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.context.iter().filter_map(|entry| match entry {
            ContextEntry::Tool { result, .. } => Some(result),
            ContextEntry::Retrieval { .. } => None,
        })
    }
}

/// Final output of the agentic loop.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub question: String,
    pub final_query: String,
    pub status: AgentStatus,
    pub iterations: u32,
    pub retrieval_passes: u32,
    pub context: Vec<ContextEntry>,
    pub trace: Vec<TraceEvent>,
    pub elapsed_ms: u64,
}

impl AgentResponse {
    /// Retrieved chunks across all passes, first occurrence of each chunk wins.
    pub fn results(&self) -> Vec<&SearchResult> {
        let mut seen = HashSet::new();
        self.context
            .iter()
            .filter_map(|entry| match entry {
                ContextEntry::Retrieval { results, .. } => Some(results.results.iter()),
                ContextEntry::Tool { .. } => None,
            })
            .flatten()
            .filter(|r| seen.insert(r.chunk.id.as_str()))
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.context
            .iter()
            .filter_map(|entry| match entry {
                ContextEntry::Tool { result, .. } => Some(result),
                ContextEntry::Retrieval { .. } => None,
            })
            .collect()
    }

    /// Context handed to the language model: ranked chunks, then successful
    /// tool output.
    pub fn context_text(&self) -> String {
        let mut out = String::new();
        for (i, result) in self.results().iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} (score {:.3})\n{}\n",
                i + 1,
                result.chunk.location(),
                result.score(),
                result.chunk.content.trim_end()
            );
        }

        let tool_texts: Vec<(&str, &str)> = self
            .tool_results()
            .into_iter()
            .filter_map(|r| r.text().map(|t| (r.call.name.as_str(), t)))
            .collect();
        if !tool_texts.is_empty() {
            out.push_str("Additional information from external sources:\n");
            for (tool, text) in tool_texts {
                let _ = writeln!(out, "- {tool}: {}", text.trim());
            }
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn call(query: &str) -> ToolCall {
        let mut args = Map::new();
        args.insert("query".to_string(), Value::String(query.to_string()));
        ToolCall::new("search_web", args)
    }

    #[test]
    fn test_mark_attempted_detects_duplicates() {
        let mut state = IterationState::new("q");
        assert!(state.mark_attempted(&call("a")));
        assert!(state.has_attempted(&call("a")));
        assert!(!state.mark_attempted(&call("a")));
        assert!(state.mark_attempted(&call("b")));
    }

    #[test]
    fn test_context_text_lists_tools_after_chunks() {
        let mut state = IterationState::new("q");
        state.record_retrieval(SearchResults {
            query: "q".to_string(),
            collection: "docs".to_string(),
            results: Vec::new(),
            degraded: false,
            duration_ms: 0,
        });
        state.record_tool(ToolResult::success(call("q"), "sunny".to_string(), json!({})));
        state.record_tool(ToolResult::failure(call("r"), "timeout"));

        let response = AgentResponse {
            question: "q".to_string(),
            final_query: "q".to_string(),
            status: AgentStatus::Done,
            iterations: 1,
            retrieval_passes: 1,
            context: state.context.clone(),
            trace: Vec::new(),
            elapsed_ms: 0,
        };
        let text = response.context_text();
        assert_eq!(
            text,
            "Additional information from external sources:\n- search_web: sunny"
        );
        assert_eq!(response.tool_results().len(), 2);
        assert!(state.latest_results().is_some());
    }
}
