//! Agentic orchestration: retrieve, judge sufficiency, optionally call one
//! tool and retrieve again, bounded by an iteration count and a wall-clock
//! budget.
//!
//! ```text
//! Retrieving -> Evaluating -> Answering
//!                   |
//!                   +-> ToolCalling -> Retrieving
//! ```
//!
//! Every tool round adds one retrieval pass, so a query makes at most
//! `max_iterations + 1` passes whatever the policy decides.

mod policy;
mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use policy::{
    ChatCompletionPolicy, Evaluation, PolicyInput, ScoreThresholdPolicy, SufficiencyPolicy,
    build_prompt, create_policy, parse_decision,
};
pub use state::{AgentResponse, AgentState, AgentStatus, ContextEntry, Decision, IterationState, TraceEvent};

use crate::error::{AgentError, ToolCallError};
use crate::models::{AgenticConfig, ToolCall, ToolResult, ToolSpec};
use crate::services::retriever::{HybridRetriever, RetrievalParams};
use crate::services::tool_bridge::ToolBridge;

/// Per-query budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLimits {
    /// Tool-calling rounds allowed before the loop is forced to answer.
    pub max_iterations: u32,
    pub query_budget: Duration,
    pub tool_timeout: Duration,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self::from(&AgenticConfig::default())
    }
}

impl From<&AgenticConfig> for AgentLimits {
    fn from(config: &AgenticConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            query_budget: Duration::from_secs(config.query_budget_secs),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }
}

impl AgentLimits {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Runs one independent state machine per query. Holds no per-query state,
/// so a single instance serves concurrent queries.
#[derive(Clone)]
pub struct Orchestrator {
    retriever: HybridRetriever,
    tools: Option<Arc<dyn ToolBridge>>,
    policy: Arc<dyn SufficiencyPolicy>,
    params: RetrievalParams,
    limits: AgentLimits,
}

impl Orchestrator {
    pub fn new(retriever: HybridRetriever, policy: Arc<dyn SufficiencyPolicy>) -> Self {
        Self {
            retriever,
            tools: None,
            policy,
            params: RetrievalParams::default(),
            limits: AgentLimits::default(),
        }
    }

    pub fn with_tools(mut self, tools: Option<Arc<dyn ToolBridge>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_params(mut self, params: RetrievalParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Answer-ready context for `question`.
    ///
    /// Budget exhaustion is a status, not an error: the context gathered so
    /// far is returned. Only an invalid query or an unreachable vector store
    /// fails the call.
    pub async fn run(&self, collection: &str, question: &str) -> Result<AgentResponse, AgentError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentError::InvalidQuery("question must not be empty".to_string()));
        }
        self.params.validate()?;

        let start = Instant::now();
        let mut state = IterationState::new(question);
        let mut trace = Vec::new();

        let outcome = tokio::time::timeout(
            self.limits.query_budget,
            self.drive(collection, &mut state, &mut trace),
        )
        .await;

        let status = match outcome {
            Ok(result) => result?,
            Err(_) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(elapsed_ms, passes = state.retrieval_passes, "query budget exhausted");
                trace.push(TraceEvent::DeadlineExceeded { elapsed_ms });
                AgentStatus::DeadlineExceeded
            }
        };

        info!(
            %status,
            iterations = state.iteration,
            passes = state.retrieval_passes,
            "agentic query finished"
        );

        Ok(AgentResponse {
            question: state.question,
            final_query: state.current_query,
            status,
            iterations: state.iteration,
            retrieval_passes: state.retrieval_passes,
            context: state.context,
            trace,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn drive(
        &self,
        collection: &str,
        state: &mut IterationState,
        trace: &mut Vec<TraceEvent>,
    ) -> Result<AgentStatus, AgentError> {
        let tools = self.list_tools().await;
        let mut next = AgentState::Retrieving;

        loop {
            next = match next {
                AgentState::Retrieving => {
                    let results = self
                        .retriever
                        .search(collection, &state.current_query, &self.params)
                        .await?;
                    trace.push(TraceEvent::Retrieved {
                        iteration: state.iteration,
                        query: state.current_query.clone(),
                        results: results.len(),
                        degraded: results.degraded,
                        top_score: results.results.first().map(|r| r.score()),
                    });
                    state.record_retrieval(results);
                    AgentState::Evaluating
                }
                AgentState::Evaluating => {
                    let evaluation = self.evaluate(state, &tools, trace).await;
                    if let Some(query) = &evaluation.refined_query {
                        debug!(query = %query, "policy refined the query");
                        state.current_query.clone_from(query);
                    }
                    trace.push(TraceEvent::Evaluated {
                        iteration: state.iteration,
                        decision: evaluation.decision.clone(),
                        refined_query: evaluation.refined_query,
                        reasoning: evaluation.reasoning,
                    });
                    state.decision = Some(evaluation.decision.clone());

                    match evaluation.decision {
                        Decision::Answer => AgentState::Answering,
                        Decision::CallTool { .. } if state.iteration >= self.limits.max_iterations => {
                            trace.push(TraceEvent::MaxIterationsReached {
                                iteration: state.iteration,
                            });
                            return Ok(AgentStatus::MaxIterationsReached);
                        }
                        Decision::CallTool { call } => {
                            state.pending_call = Some(call);
                            AgentState::ToolCalling
                        }
                    }
                }
                AgentState::ToolCalling => {
                    if let Some(call) = state.pending_call.take() {
                        self.call_tool(call, state, trace).await;
                    }
                    state.iteration += 1;
                    AgentState::Retrieving
                }
                AgentState::Answering => return Ok(AgentStatus::Done),
            };
        }
    }

    async fn list_tools(&self) -> Vec<ToolSpec> {
        let Some(bridge) = &self.tools else {
            return Vec::new();
        };
        match bridge.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "could not list tools");
                Vec::new()
            }
        }
    }

    /// Policy decision for the latest pass. A failing policy answers.
    async fn evaluate(
        &self,
        state: &IterationState,
        tools: &[ToolSpec],
        trace: &mut Vec<TraceEvent>,
    ) -> Evaluation {
        let Some(latest) = state.latest_results() else {
            return Evaluation::answer();
        };
        let input = PolicyInput {
            question: &state.question,
            current_query: &state.current_query,
            iteration: state.iteration,
            latest,
            state,
            tools,
        };
        match self.policy.evaluate(&input).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(policy = self.policy.name(), error = %e, "policy failed, answering with current context");
                trace.push(TraceEvent::PolicyFailed {
                    iteration: state.iteration,
                    error: e.to_string(),
                });
                Evaluation::answer()
            }
        }
    }

    /// Run one tool call and fold its outcome into the context. Never fails
    /// the query.
    async fn call_tool(&self, call: ToolCall, state: &mut IterationState, trace: &mut Vec<TraceEvent>) {
        let iteration = state.iteration;

        if !state.mark_attempted(&call) {
            debug!(tool = %call.name, "duplicate tool call suppressed");
            trace.push(TraceEvent::DuplicateSuppressed {
                iteration,
                tool: call.name.clone(),
            });
            let error = ToolCallError::Duplicate(call.name.clone());
            state.record_tool(ToolResult::failure(call, error));
            return;
        }

        let outcome = match &self.tools {
            Some(bridge) => {
                let secs = self.limits.tool_timeout.as_secs();
                tokio::time::timeout(self.limits.tool_timeout, bridge.call_tool(&call))
                    .await
                    .unwrap_or(Err(ToolCallError::Timeout(secs)))
            }
            None => Err(ToolCallError::UnknownTool(call.name.clone())),
        };

        match outcome {
            Ok(output) => {
                debug!(tool = %call.name, "tool call succeeded");
                trace.push(TraceEvent::ToolSucceeded {
                    iteration,
                    tool: call.name.clone(),
                });
                state.record_tool(ToolResult::success(call, output.text, output.payload));
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                trace.push(TraceEvent::ToolFailed {
                    iteration,
                    tool: call.name.clone(),
                    error: e.to_string(),
                });
                state.record_tool(ToolResult::failure(call, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use crate::models::{ChunkingStrategy, Document, Source};
    use crate::services::chunker::{ChunkParams, Chunker};
    use crate::services::embedding::{EmbeddingProvider, HashEmbedder};
    use crate::services::lexical_index::LexicalIndex;
    use crate::services::tool_bridge::ToolOutput;
    use crate::services::vector_store::{MemoryStore, VectorStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn retriever() -> HybridRetriever {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::with_dimension(32));
        let store = Arc::new(MemoryStore::default());
        let lexical = Arc::new(LexicalIndex::new());
        store.create_collection("docs", 32).await.unwrap();

        let doc = Document::new(
            "Rust ownership rules prevent data races. Borrowing allows shared access.",
            Source::text("rust.md"),
        );
        let chunks = Chunker::lexical_only()
            .chunk(&doc, ChunkingStrategy::Lexical, &ChunkParams::default())
            .await
            .unwrap();
        for chunk in &chunks {
            let embedding = provider.embed(&chunk.content).await.unwrap();
            store.upsert("docs", chunk, &embedding).await.unwrap();
            lexical.add("docs", chunk);
        }
        HybridRetriever::new(provider, store, lexical)
    }

    fn query_call(query: &str) -> ToolCall {
        let mut args = Map::new();
        args.insert("query".to_string(), Value::String(query.to_string()));
        ToolCall::new("search_web", args)
    }

    /// Always asks for a tool, with a fresh argument each time.
    struct AlwaysCall {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SufficiencyPolicy for AlwaysCall {
        fn name(&self) -> &str {
            "always"
        }

        async fn evaluate(&self, _: &PolicyInput<'_>) -> Result<Evaluation, PolicyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Evaluation::call(query_call(&format!("q{n}"))))
        }
    }

    /// Repeats the same call forever.
    struct SameCall;

    #[async_trait]
    impl SufficiencyPolicy for SameCall {
        fn name(&self) -> &str {
            "same"
        }

        async fn evaluate(&self, _: &PolicyInput<'_>) -> Result<Evaluation, PolicyError> {
            Ok(Evaluation::call(query_call("ownership")))
        }
    }

    struct Broken;

    #[async_trait]
    impl SufficiencyPolicy for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn evaluate(&self, _: &PolicyInput<'_>) -> Result<Evaluation, PolicyError> {
            Err(PolicyError::InvalidResponse("garbled".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingBridge {
        fail: bool,
        delay: Option<Duration>,
        calls: Mutex<Vec<ToolCall>>,
    }

    #[async_trait]
    impl ToolBridge for RecordingBridge {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolCallError> {
            Ok(vec![serde_json::from_value(json!({"name": "search_web"})).unwrap()])
        }

        async fn call_tool(&self, call: &ToolCall) -> Result<ToolOutput, ToolCallError> {
            self.calls.lock().push(call.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ToolCallError::Remote("upstream down".to_string()));
            }
            Ok(ToolOutput {
                text: format!("result for {}", call.arguments["query"]),
                payload: json!({}),
            })
        }
    }

    fn limits(max_iterations: u32) -> AgentLimits {
        AgentLimits {
            max_iterations,
            query_budget: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_always_calling_policy_terminates() {
        let bridge = Arc::new(RecordingBridge::default());
        let orchestrator = Orchestrator::new(
            retriever().await,
            Arc::new(AlwaysCall {
                calls: AtomicUsize::new(0),
            }),
        )
        .with_tools(Some(bridge.clone()))
        .with_limits(limits(3));

        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert_eq!(response.status, AgentStatus::MaxIterationsReached);
        assert_eq!(response.retrieval_passes, 4);
        assert_eq!(response.iterations, 3);
        assert_eq!(bridge.calls.lock().len(), 3);
        assert!(!response.results().is_empty());
        assert!(response.context_text().contains("Additional information from external sources:"));
    }

    #[tokio::test]
    async fn test_duplicate_call_suppressed() {
        let bridge = Arc::new(RecordingBridge::default());
        let orchestrator = Orchestrator::new(retriever().await, Arc::new(SameCall))
            .with_tools(Some(bridge.clone()))
            .with_limits(limits(3));

        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert_eq!(bridge.calls.lock().len(), 1);
        let suppressed = response
            .trace
            .iter()
            .filter(|e| matches!(e, TraceEvent::DuplicateSuppressed { .. }))
            .count();
        assert_eq!(suppressed, 2);
        assert_eq!(response.status, AgentStatus::MaxIterationsReached);
        assert_eq!(response.tool_results().iter().filter(|r| r.is_success()).count(), 1);
    }

    #[tokio::test]
    async fn test_tool_failure_keeps_looping() {
        let bridge = Arc::new(RecordingBridge {
            fail: true,
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(
            retriever().await,
            Arc::new(AlwaysCall {
                calls: AtomicUsize::new(0),
            }),
        )
        .with_tools(Some(bridge.clone()))
        .with_limits(limits(2));

        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert_eq!(response.retrieval_passes, 3);
        assert!(response.tool_results().iter().all(|r| !r.is_success()));
        assert!(!response.context_text().contains("Additional information"));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out_without_failing_query() {
        let bridge = Arc::new(RecordingBridge {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let mut tight = limits(1);
        tight.tool_timeout = Duration::from_millis(50);
        let orchestrator = Orchestrator::new(retriever().await, Arc::new(SameCall))
            .with_tools(Some(bridge))
            .with_limits(tight);

        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert!(response.trace.iter().any(|e| matches!(
            e,
            TraceEvent::ToolFailed { error, .. } if error.contains("timed out")
        )));
    }

    #[tokio::test]
    async fn test_policy_error_answers() {
        let orchestrator = Orchestrator::new(retriever().await, Arc::new(Broken)).with_limits(limits(3));
        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert_eq!(response.status, AgentStatus::Done);
        assert_eq!(response.retrieval_passes, 1);
        assert!(matches!(response.trace[1], TraceEvent::PolicyFailed { .. }));
    }

    #[tokio::test]
    async fn test_query_budget_returns_partial_context() {
        let bridge = Arc::new(RecordingBridge {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(
            retriever().await,
            Arc::new(AlwaysCall {
                calls: AtomicUsize::new(0),
            }),
        )
        .with_tools(Some(bridge))
        .with_limits(AgentLimits {
            max_iterations: 10,
            query_budget: Duration::from_millis(100),
            tool_timeout: Duration::from_secs(1),
        });

        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert_eq!(response.status, AgentStatus::DeadlineExceeded);
        assert_eq!(response.retrieval_passes, 1);
        assert!(matches!(response.trace.last(), Some(TraceEvent::DeadlineExceeded { .. })));
    }

    #[tokio::test]
    async fn test_heuristic_without_tools_answers_after_one_failed_round() {
        let policy = Arc::new(ScoreThresholdPolicy {
            min_top_score: 2.0,
            fallback_tool: "search_web".to_string(),
            query_arg: "query".to_string(),
        });
        let orchestrator = Orchestrator::new(retriever().await, policy).with_limits(limits(3));

        let response = orchestrator.run("docs", "ownership").await.unwrap();
        assert_eq!(response.status, AgentStatus::Done);
        assert_eq!(response.retrieval_passes, 2);
        assert!(response.trace.iter().any(|e| matches!(e, TraceEvent::ToolFailed { .. })));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let orchestrator = Orchestrator::new(retriever().await, Arc::new(Broken));
        assert!(matches!(
            orchestrator.run("docs", "   ").await,
            Err(AgentError::InvalidQuery(_))
        ));
    }
}
