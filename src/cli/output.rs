use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{OutputFormat, SearchResults, ToolSpec};
use crate::services::AgentResponse;
use crate::services::agent::{ContextEntry, Decision, TraceEvent};
use crate::utils::text::preview;

const PREVIEW_CHARS: usize = 200;

pub trait Formatter {
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_agent_response(&self, response: &AgentResponse) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_index_stats(&self, stats: &IndexStats) -> String;
    fn format_tools(&self, tools: &[ToolSpec]) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding: EmbeddingStatus,
    pub vector_store: VectorStoreStatus,
    pub tool_servers: Vec<ToolServerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStatus {
    pub provider: String,
    pub url: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorStoreStatus {
    pub driver: String,
    pub url: String,
    pub connected: bool,
    pub collection: String,
    pub points: u64,
    pub dimension: Option<usize>,
    pub lexical_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolServerStatus {
    pub name: String,
    pub url: String,
    pub reachable: bool,
    pub tools: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub files_scanned: u64,
    pub files_indexed: u64,
    /// Unchanged since the last run.
    pub files_unchanged: u64,
    pub files_failed: u64,
    pub chunks_created: u64,
    pub fallback_chunks: u64,
    pub duration_ms: u64,
}

fn to_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> String {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

fn mark(ok: bool) -> &'static str {
    if ok { "[OK]" } else { "[UNAVAILABLE]" }
}

fn trace_line(event: &TraceEvent) -> String {
    match event {
        TraceEvent::Retrieved {
            iteration,
            query,
            results,
            degraded,
            top_score,
        } => {
            let top = top_score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "-".to_string());
            let note = if *degraded { " (lexical only)" } else { "" };
            format!("#{iteration} retrieved {results} for \"{query}\", top {top}{note}")
        }
        TraceEvent::Evaluated {
            iteration,
            decision,
            refined_query,
            reasoning,
        } => {
            let mut line = match decision {
                Decision::Answer => format!("#{iteration} answer"),
                Decision::CallTool { call } => {
                    format!("#{iteration} call {}", call.name)
                }
            };
            if let Some(q) = refined_query {
                let _ = write!(line, ", query -> \"{q}\"");
            }
            if let Some(r) = reasoning {
                let _ = write!(line, " ({r})");
            }
            line
        }
        TraceEvent::PolicyFailed { iteration, error } => format!("#{iteration} policy failed: {error}"),
        TraceEvent::ToolSucceeded { iteration, tool } => format!("#{iteration} {tool} ok"),
        TraceEvent::ToolFailed { iteration, tool, error } => format!("#{iteration} {tool} failed: {error}"),
        TraceEvent::DuplicateSuppressed { iteration, tool } => {
            format!("#{iteration} {tool} duplicate suppressed")
        }
        TraceEvent::MaxIterationsReached { iteration } => format!("#{iteration} iteration budget reached"),
        TraceEvent::DeadlineExceeded { elapsed_ms } => format!("query budget exceeded after {elapsed_ms}ms"),
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("No results found for: {}\n", results.query);
        }

        let mut output = String::new();
        let _ = writeln!(output, "Search results for: \"{}\"", results.query);
        let _ = writeln!(output, "Found {} results in {}ms", results.len(), results.duration_ms);
        if results.degraded {
            let _ = writeln!(output, "(query embedding failed, lexical results only)");
        }
        let _ = writeln!(output);

        for result in &results.results {
            let _ = writeln!(output, "{}. [Score: {:.3}]", result.rank, result.score());
            let _ = writeln!(output, "   Location: {}", result.chunk.location());
            let _ = writeln!(output, "   ---");
            for line in preview(&result.chunk.content, PREVIEW_CHARS).lines() {
                let _ = writeln!(output, "   {line}");
            }
            let _ = writeln!(output);
        }

        output
    }

    fn format_agent_response(&self, response: &AgentResponse) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Question: {}", response.question);
        if response.final_query != response.question {
            let _ = writeln!(output, "Final query: {}", response.final_query);
        }
        let _ = writeln!(
            output,
            "Status: {} ({} passes, {} tool rounds, {}ms)\n",
            response.status, response.retrieval_passes, response.iterations, response.elapsed_ms
        );

        let context = response.context_text();
        if context.is_empty() {
            let _ = writeln!(output, "No context found.");
        } else {
            let _ = writeln!(output, "{context}");
        }

        let _ = writeln!(output, "\nTrace");
        let _ = writeln!(output, "-----");
        for event in &response.trace {
            let _ = writeln!(output, "  {}", trace_line(event));
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Status");
        let _ = writeln!(output, "------");

        let e = &status.embedding;
        let _ = writeln!(output, "Embedding:     {} {}", e.provider, mark(e.healthy));
        if let Some(url) = &e.url {
            let _ = writeln!(output, "  URL:         {url}");
        }
        let _ = writeln!(output, "  Model:       {} ({} dims)", e.model, e.dimension);
        if let Some(err) = &e.error {
            let _ = writeln!(output, "  Error:       {err}");
        }
        let _ = writeln!(output);

        let v = &status.vector_store;
        let _ = writeln!(output, "Vector Store:  {} {}", v.driver, mark(v.connected));
        let _ = writeln!(output, "  URL:         {}", v.url);
        let _ = writeln!(output, "  Collection:  {}", v.collection);
        if v.connected {
            let _ = writeln!(output, "  Points:      {}", v.points);
            if let Some(dim) = v.dimension {
                let _ = writeln!(output, "  Dimension:   {dim}");
            }
        }
        let _ = writeln!(output, "  Lexical:     {} chunks", v.lexical_chunks);
        if let Some(err) = &v.error {
            let _ = writeln!(output, "  Error:       {err}");
        }

        if !status.tool_servers.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "Tool Servers");
            for server in &status.tool_servers {
                let _ = writeln!(
                    output,
                    "  {} {} {} ({} tools)",
                    mark(server.reachable),
                    server.name,
                    server.url,
                    server.tools
                );
                if let Some(err) = &server.error {
                    let _ = writeln!(output, "    Error: {err}");
                }
            }
        }

        output
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Indexing Complete ({})", stats.collection);
        let _ = writeln!(output, "-----------------");
        let _ = writeln!(output, "Files scanned:   {}", stats.files_scanned);
        let _ = writeln!(output, "Files indexed:   {}", stats.files_indexed);
        let _ = writeln!(output, "Files unchanged: {}", stats.files_unchanged);
        let _ = writeln!(output, "Files failed:    {}", stats.files_failed);
        let _ = writeln!(output, "Chunks created:  {}", stats.chunks_created);
        if stats.fallback_chunks > 0 {
            let _ = writeln!(output, "Lexical fallback chunks: {}", stats.fallback_chunks);
        }
        let _ = writeln!(output, "Duration: {}ms", stats.duration_ms);
        output
    }

    fn format_tools(&self, tools: &[ToolSpec]) -> String {
        if tools.is_empty() {
            return "No tools available.\n".to_string();
        }
        let mut output = String::new();
        let _ = writeln!(output, "Available Tools");
        let _ = writeln!(output, "---------------");
        for tool in tools {
            let server = tool.server.as_deref().unwrap_or("-");
            let _ = writeln!(output, "  {} [{server}] - {}", tool.name, tool.description);
            let required = tool.required_arguments();
            if !required.is_empty() {
                let _ = writeln!(output, "    required: {}", required.join(", "));
            }
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {error}\n")
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        to_json(results, self.pretty)
    }

    fn format_agent_response(&self, response: &AgentResponse) -> String {
        let json = serde_json::json!({
            "response": response,
            "context_text": response.context_text(),
        });
        to_json(&json, self.pretty)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        to_json(status, self.pretty)
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        to_json(stats, self.pretty)
    }

    fn format_tools(&self, tools: &[ToolSpec]) -> String {
        to_json(&serde_json::json!({ "tools": tools }), self.pretty)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("## No results found\n\nQuery: `{}`\n", results.query);
        }

        let mut output = String::new();
        let _ = writeln!(output, "## Search Results\n");
        let _ = writeln!(output, "**Query:** `{}`\n", results.query);
        let _ = writeln!(output, "Found {} results in {}ms\n", results.len(), results.duration_ms);

        for result in &results.results {
            let _ = writeln!(output, "### {}. Score: {:.3}\n", result.rank, result.score());
            let _ = writeln!(output, "**Location:** `{}`\n", result.chunk.location());
            let _ = writeln!(output, "```");
            let _ = writeln!(output, "{}", result.chunk.content.trim_end());
            let _ = writeln!(output, "```\n");
        }

        output
    }

    fn format_agent_response(&self, response: &AgentResponse) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## {}\n", response.question);
        let _ = writeln!(
            output,
            "**Status:** {} · **Passes:** {} · **Tool rounds:** {} · **Elapsed:** {}ms\n",
            response.status, response.retrieval_passes, response.iterations, response.elapsed_ms
        );

        let results = response.results();
        if !results.is_empty() {
            let _ = writeln!(output, "### Passages\n");
            for (i, result) in results.iter().enumerate() {
                let _ = writeln!(output, "{}. `{}` ({:.3})", i + 1, result.chunk.location(), result.score());
                let _ = writeln!(output, "   > {}", preview(&result.chunk.content, PREVIEW_CHARS));
            }
            let _ = writeln!(output);
        }

        let tools: Vec<_> = response
            .context
            .iter()
            .filter_map(|e| match e {
                ContextEntry::Tool { result, .. } => Some(result),
                ContextEntry::Retrieval { .. } => None,
            })
            .collect();
        if !tools.is_empty() {
            let _ = writeln!(output, "### Tool Results\n");
            for result in tools {
                match result.text() {
                    Some(text) => {
                        let _ = writeln!(output, "- **{}**: {}", result.call.name, preview(text, PREVIEW_CHARS));
                    }
                    None => {
                        let _ = writeln!(output, "- **{}**: *failed*", result.call.name);
                    }
                }
            }
            let _ = writeln!(output);
        }

        let _ = writeln!(output, "### Trace\n");
        for event in &response.trace {
            let _ = writeln!(output, "- {}", trace_line(event));
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let ok = |b: bool| if b { "✅" } else { "❌" };
        let mut output = String::new();
        let _ = writeln!(output, "## Status\n");

        let e = &status.embedding;
        let _ = writeln!(output, "### Embedding ({}) {}\n", e.provider, ok(e.healthy));
        if let Some(url) = &e.url {
            let _ = writeln!(output, "- **URL:** `{url}`");
        }
        let _ = writeln!(output, "- **Model:** {} ({} dims)\n", e.model, e.dimension);

        let v = &status.vector_store;
        let _ = writeln!(output, "### Vector Store ({}) {}\n", v.driver, ok(v.connected));
        let _ = writeln!(output, "- **URL:** `{}`", v.url);
        let _ = writeln!(output, "- **Collection:** {}", v.collection);
        let _ = writeln!(output, "- **Points:** {}", v.points);
        let _ = writeln!(output, "- **Lexical chunks:** {}\n", v.lexical_chunks);

        if !status.tool_servers.is_empty() {
            let _ = writeln!(output, "### Tool Servers\n");
            let _ = writeln!(output, "| Server | URL | Tools | Status |");
            let _ = writeln!(output, "|--------|-----|-------|--------|");
            for s in &status.tool_servers {
                let _ = writeln!(output, "| `{}` | `{}` | {} | {} |", s.name, s.url, s.tools, ok(s.reachable));
            }
        }
        output
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Indexing Complete\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Collection | `{}` |", stats.collection);
        let _ = writeln!(output, "| Files scanned | {} |", stats.files_scanned);
        let _ = writeln!(output, "| Files indexed | {} |", stats.files_indexed);
        let _ = writeln!(output, "| Files unchanged | {} |", stats.files_unchanged);
        let _ = writeln!(output, "| Files failed | {} |", stats.files_failed);
        let _ = writeln!(output, "| Chunks created | {} |", stats.chunks_created);
        let _ = writeln!(output, "| Lexical fallback chunks | {} |", stats.fallback_chunks);
        let _ = writeln!(output, "| Duration | {}ms |", stats.duration_ms);
        output
    }

    fn format_tools(&self, tools: &[ToolSpec]) -> String {
        if tools.is_empty() {
            return "## Tools\n\n*No tools available.*\n".to_string();
        }
        let mut output = String::new();
        let _ = writeln!(output, "## Tools\n");
        let _ = writeln!(output, "| Tool | Server | Description |");
        let _ = writeln!(output, "|------|--------|-------------|");
        for tool in tools {
            let _ = writeln!(
                output,
                "| `{}` | {} | {} |",
                tool.name,
                tool.server.as_deref().unwrap_or("-"),
                tool.description
            );
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {error}\n")
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> IndexStats {
        IndexStats {
            collection: "docs".to_string(),
            files_scanned: 3,
            files_indexed: 2,
            files_unchanged: 1,
            chunks_created: 7,
            ..Default::default()
        }
    }

    #[test]
    fn test_json_index_stats() {
        let out = JsonFormatter::new(false).format_index_stats(&stats());
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["chunks_created"], 7);
        assert_eq!(value["collection"], "docs");
    }

    #[test]
    fn test_text_and_markdown_empty_results() {
        let results = SearchResults {
            query: "nothing".to_string(),
            collection: "docs".to_string(),
            results: Vec::new(),
            degraded: false,
            duration_ms: 0,
        };
        assert_eq!(TextFormatter.format_search_results(&results), "No results found for: nothing\n");
        assert!(MarkdownFormatter.format_search_results(&results).contains("`nothing`"));
        assert!(TextFormatter.format_index_stats(&stats()).contains("Chunks created:  7"));
    }

    #[test]
    fn test_trace_line() {
        let line = trace_line(&TraceEvent::ToolFailed {
            iteration: 1,
            tool: "search_web".to_string(),
            error: "timeout".to_string(),
        });
        assert_eq!(line, "#1 search_web failed: timeout");
    }
}
