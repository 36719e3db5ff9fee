//! Sufficiency policies: given the latest retrieval pass, answer now or call
//! a tool first.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::state::{Decision, IterationState};
use crate::error::PolicyError;
use crate::models::{AgenticConfig, Config, LlmConfig, PolicyKind, SearchResults, ToolCall, ToolSpec};
use crate::utils::text::preview;

const PREVIEW_CHARS: usize = 200;
const PROMPT_RESULTS: usize = 5;

/// Everything a policy may look at.
pub struct PolicyInput<'a> {
    pub question: &'a str,
    pub current_query: &'a str,
    pub iteration: u32,
    pub latest: &'a SearchResults,
    pub state: &'a IterationState,
    /// Tools advertised by the bridge; empty when none could be listed.
    pub tools: &'a [ToolSpec],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    /// Query for the next retrieval pass, if the policy rewrote it.
    pub refined_query: Option<String>,
    pub reasoning: Option<String>,
}

impl Evaluation {
    pub fn answer() -> Self {
        Self {
            decision: Decision::Answer,
            refined_query: None,
            reasoning: None,
        }
    }

    pub fn call(call: ToolCall) -> Self {
        Self {
            decision: Decision::CallTool { call },
            refined_query: None,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

#[async_trait]
pub trait SufficiencyPolicy: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, input: &PolicyInput<'_>) -> Result<Evaluation, PolicyError>;
}

/// Build the policy selected by configuration.
pub fn create_policy(config: &Config) -> Result<Arc<dyn SufficiencyPolicy>, PolicyError> {
    match config.agentic.policy {
        PolicyKind::Heuristic => Ok(Arc::new(ScoreThresholdPolicy::from(&config.agentic))),
        PolicyKind::Llm => Ok(Arc::new(ChatCompletionPolicy::new(&config.llm)?)),
    }
}

/// Answers once the best hit is similar enough; otherwise asks the fallback
/// tool with the current query, once.
#[derive(Debug, Clone)]
pub struct ScoreThresholdPolicy {
    pub min_top_score: f32,
    pub fallback_tool: String,
    pub query_arg: String,
}

impl From<&AgenticConfig> for ScoreThresholdPolicy {
    fn from(config: &AgenticConfig) -> Self {
        Self {
            min_top_score: config.min_top_score,
            fallback_tool: config.fallback_tool.clone(),
            query_arg: config.fallback_query_arg.clone(),
        }
    }
}

impl ScoreThresholdPolicy {
    /// Best raw vector similarity of the pass; the best fused score when the
    /// pass carries no vector scores.
    pub fn top_score(results: &SearchResults) -> Option<f32> {
        let vector_best = results
            .results
            .iter()
            .filter_map(|r| r.vector_score)
            .max_by(f32::total_cmp);
        match vector_best {
            Some(score) if !results.degraded => Some(score),
            _ => results
                .results
                .iter()
                .map(|r| r.fused_score)
                .max_by(f32::total_cmp),
        }
    }
}

#[async_trait]
impl SufficiencyPolicy for ScoreThresholdPolicy {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn evaluate(&self, input: &PolicyInput<'_>) -> Result<Evaluation, PolicyError> {
        let top = Self::top_score(input.latest);
        if let Some(score) = top
            && score >= self.min_top_score
        {
            return Ok(Evaluation::answer().with_reasoning(format!(
                "top score {score:.3} meets threshold {:.3}",
                self.min_top_score
            )));
        }

        if !input.tools.is_empty() {
            let Some(spec) = input.tools.iter().find(|t| t.name == self.fallback_tool) else {
                return Ok(Evaluation::answer()
                    .with_reasoning(format!("{} is not available", self.fallback_tool)));
            };
            if !spec.accepts_argument(&self.query_arg) {
                return Ok(Evaluation::answer().with_reasoning(format!(
                    "{} takes no {} argument",
                    self.fallback_tool, self.query_arg
                )));
            }
        }

        let mut arguments = Map::new();
        arguments.insert(
            self.query_arg.clone(),
            Value::String(input.current_query.to_string()),
        );
        let call = ToolCall::new(self.fallback_tool.clone(), arguments);
        if input.state.has_attempted(&call) {
            return Ok(Evaluation::answer().with_reasoning("fallback already tried"));
        }

        let reasoning = match top {
            Some(score) => format!(
                "top score {score:.3} below threshold {:.3}",
                self.min_top_score
            ),
            None => "no results".to_string(),
        };
        Ok(Evaluation::call(call).with_reasoning(reasoning))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default = "default_needs_data")]
    needs_additional_data: bool,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Map<String, Value>,
    #[serde(default)]
    tools_to_use: Vec<PlannedCall>,
    #[serde(default)]
    rewritten_query: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedCall {
    #[serde(alias = "name")]
    tool_name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

fn default_needs_data() -> bool {
    true
}

const SYSTEM_PROMPT: &str = "You decide whether retrieved passages are enough to answer a question. \
Reply with a single JSON object: {\"needs_additional_data\": bool, \"tool_name\": string or null, \
\"arguments\": object, \"rewritten_query\": string or null, \"reasoning\": string}. \
Only name a tool from the list. Never repeat a previous call.";

/// Asks an OpenAI-compatible chat completion endpoint for the decision.
pub struct ChatCompletionPolicy {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionPolicy {
    pub fn new(config: &LlmConfig) -> Result<Self, PolicyError> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| PolicyError::ServerError("llm.url is not configured".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

/// User message: question, tools, passages, previous calls.
pub fn build_prompt(input: &PolicyInput<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Question: {}", input.question);
    if input.current_query != input.question {
        let _ = writeln!(out, "Current search query: {}", input.current_query);
    }

    out.push_str("\nAvailable tools:\n");
    if input.tools.is_empty() {
        out.push_str("(none)\n");
    }
    for tool in input.tools {
        let _ = writeln!(out, "- {}: {} schema={}", tool.name, tool.description, tool.input_schema);
    }

    out.push_str("\nRetrieved passages:\n");
    if input.latest.is_empty() {
        out.push_str("(none)\n");
    }
    for r in input.latest.results.iter().take(PROMPT_RESULTS) {
        let _ = writeln!(
            out,
            "[{}] score={:.3} {}",
            r.rank,
            r.score(),
            preview(&r.chunk.content, PREVIEW_CHARS)
        );
    }

    let previous: Vec<String> = input
        .state
        .tool_results()
        .map(|r| {
            let status = if r.is_success() { "ok" } else { "failed" };
            format!("- {} {} ({status})", r.call.name, Value::Object(r.call.arguments.clone()))
        })
        .collect();
    if !previous.is_empty() {
        out.push_str("\nPrevious tool calls:\n");
        out.push_str(&previous.join("\n"));
        out.push('\n');
    }
    out
}

/// Read a verdict from model output, tolerating prose around the JSON object.
pub fn parse_decision(content: &str, current_query: &str) -> Result<Evaluation, PolicyError> {
    let (start, end) = content
        .find('{')
        .zip(content.rfind('}'))
        .filter(|(s, e)| s < e)
        .ok_or_else(|| PolicyError::InvalidResponse("no JSON object in reply".to_string()))?;
    let verdict: Verdict = serde_json::from_str(&content[start..=end])
        .map_err(|e| PolicyError::InvalidResponse(e.to_string()))?;

    let planned = match verdict.tool_name.filter(|n| !n.trim().is_empty()) {
        Some(name) => Some(ToolCall::new(name, verdict.arguments)),
        None => verdict
            .tools_to_use
            .into_iter()
            .next()
            .map(|p| ToolCall::new(p.tool_name, p.arguments)),
    };

    let decision = match planned {
        Some(call) if verdict.needs_additional_data => Decision::CallTool { call },
        _ => Decision::Answer,
    };
    let refined_query = verdict
        .rewritten_query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && q != current_query);

    Ok(Evaluation {
        decision,
        refined_query,
        reasoning: verdict.reasoning,
    })
}

#[async_trait]
impl SufficiencyPolicy for ChatCompletionPolicy {
    fn name(&self) -> &str {
        "llm"
    }

    async fn evaluate(&self, input: &PolicyInput<'_>) -> Result<Evaluation, PolicyError> {
        let prompt = build_prompt(input);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PolicyError::ServerError(format!("status {status}: {body}")));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| PolicyError::InvalidResponse(e.to_string()))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PolicyError::InvalidResponse("empty completion".to_string()))?;
        debug!(model = %self.model, iteration = input.iteration, "policy reply received");

        parse_decision(&content, input.current_query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkingStrategy, Document, SearchResult, Source};
    use crate::utils::text::TextIndex;
    use serde_json::json;

    fn results(vector: Option<f32>, fused: f32, degraded: bool) -> SearchResults {
        let doc = Document::new("Paris is the capital of France.", Source::text("geo.txt"));
        let index = TextIndex::new(&doc.text);
        let chunk = Chunk::from_span(&doc, &index, 0, 0, doc.text.chars().count(), ChunkingStrategy::Lexical);
        SearchResults {
            query: "capital".to_string(),
            collection: "docs".to_string(),
            results: vec![SearchResult {
                chunk,
                vector_score: vector,
                lexical_score: Some(1.0),
                vector_norm: 1.0,
                lexical_norm: 1.0,
                fused_score: fused,
                rerank_score: None,
                rank: 1,
            }],
            degraded,
            duration_ms: 1,
        }
    }

    fn policy() -> ScoreThresholdPolicy {
        ScoreThresholdPolicy::from(&AgenticConfig::default())
    }

    fn search_tool() -> ToolSpec {
        serde_json::from_value(json!({"name": "search_web", "inputSchema": {}})).unwrap()
    }

    #[tokio::test]
    async fn test_heuristic_answers_above_threshold() {
        let latest = results(Some(0.9), 1.0, false);
        let state = IterationState::new("capital");
        let input = PolicyInput {
            question: "capital",
            current_query: "capital",
            iteration: 0,
            latest: &latest,
            state: &state,
            tools: &[],
        };
        let eval = policy().evaluate(&input).await.unwrap();
        assert_eq!(eval.decision, Decision::Answer);
    }

    #[tokio::test]
    async fn test_heuristic_calls_fallback_once() {
        let latest = results(Some(0.1), 1.0, false);
        let mut state = IterationState::new("capital");
        let tools = [search_tool()];
        let input = PolicyInput {
            question: "capital",
            current_query: "capital",
            iteration: 0,
            latest: &latest,
            state: &state,
            tools: &tools,
        };
        let eval = policy().evaluate(&input).await.unwrap();
        let Decision::CallTool { call } = eval.decision else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name, "search_web");
        assert_eq!(call.arguments["query"], json!("capital"));

        state.mark_attempted(&call);
        let input = PolicyInput {
            question: "capital",
            current_query: "capital",
            iteration: 1,
            latest: &latest,
            state: &state,
            tools: &tools,
        };
        let eval = policy().evaluate(&input).await.unwrap();
        assert_eq!(eval.decision, Decision::Answer);
    }

    #[tokio::test]
    async fn test_heuristic_skips_unlisted_tool() {
        let latest = results(Some(0.1), 1.0, false);
        let state = IterationState::new("capital");
        let other: ToolSpec = serde_json::from_value(json!({"name": "weather"})).unwrap();
        let tools = [other];
        let input = PolicyInput {
            question: "capital",
            current_query: "capital",
            iteration: 0,
            latest: &latest,
            state: &state,
            tools: &tools,
        };
        assert_eq!(policy().evaluate(&input).await.unwrap().decision, Decision::Answer);
    }

    #[tokio::test]
    async fn test_heuristic_skips_tool_without_query_argument() {
        let latest = results(Some(0.1), 1.0, false);
        let state = IterationState::new("capital");
        let tool: ToolSpec = serde_json::from_value(json!({
            "name": "search_web",
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}
        }))
        .unwrap();
        let tools = [tool];
        let input = PolicyInput {
            question: "capital",
            current_query: "capital",
            iteration: 0,
            latest: &latest,
            state: &state,
            tools: &tools,
        };
        let eval = policy().evaluate(&input).await.unwrap();
        assert_eq!(eval.decision, Decision::Answer);
        assert!(eval.reasoning.unwrap().contains("no query argument"));
    }

    #[test]
    fn test_top_score_uses_fused_when_degraded() {
        assert_eq!(ScoreThresholdPolicy::top_score(&results(Some(0.2), 0.8, false)), Some(0.2));
        assert_eq!(ScoreThresholdPolicy::top_score(&results(Some(0.2), 0.8, true)), Some(0.8));
        assert_eq!(ScoreThresholdPolicy::top_score(&results(None, 0.6, false)), Some(0.6));
    }

    #[test]
    fn test_parse_decision_tolerates_prose() {
        let reply = "Sure, here you go:\n```json\n{\"needs_additional_data\": true, \"tool_name\": \"search_web\", \
\"arguments\": {\"query\": \"paris\"}, \"rewritten_query\": \"capital of france\", \"reasoning\": \"thin\"}\n```";
        let eval = parse_decision(reply, "capital").unwrap();
        assert!(matches!(eval.decision, Decision::CallTool { ref call } if call.name == "search_web"));
        assert_eq!(eval.refined_query.as_deref(), Some("capital of france"));
        assert_eq!(eval.reasoning.as_deref(), Some("thin"));
    }

    #[test]
    fn test_parse_decision_planned_calls_and_answer() {
        let reply = r#"{"needs_additional_data": true, "tools_to_use": [{"server_id": "local", "tool_name": "weather", "arguments": {"city": "Paris"}}]}"#;
        let eval = parse_decision(reply, "q").unwrap();
        assert!(matches!(eval.decision, Decision::CallTool { ref call } if call.name == "weather"));

        let reply = r#"{"needs_additional_data": false, "tool_name": "weather", "rewritten_query": "q"}"#;
        let eval = parse_decision(reply, "q").unwrap();
        assert_eq!(eval.decision, Decision::Answer);
        assert!(eval.refined_query.is_none());

        assert!(parse_decision("no json here", "q").is_err());
    }

    #[test]
    fn test_build_prompt_lists_previous_calls() {
        let latest = results(Some(0.4), 0.9, false);
        let mut state = IterationState::new("capital");
        let call = ToolCall::new("search_web", Map::new());
        state.record_tool(crate::models::ToolResult::failure(call, "timeout"));
        let tools = [search_tool()];
        let input = PolicyInput {
            question: "capital",
            current_query: "capital city",
            iteration: 1,
            latest: &latest,
            state: &state,
            tools: &tools,
        };
        let prompt = build_prompt(&input);
        assert!(prompt.contains("Current search query: capital city"));
        assert!(prompt.contains("- search_web"));
        assert!(prompt.contains("Paris is the capital"));
        assert!(prompt.contains("(failed)"));
    }
}
