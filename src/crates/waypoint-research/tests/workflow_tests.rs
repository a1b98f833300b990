//! Research workflow driven end to end with scripted agents

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use waypoint_checkpoint::{CheckpointStatus, InMemoryCheckpointStore};
use waypoint_core::{EngineConfig, NodeError, Outcome, State, CLARIFICATION_NEEDED};
use waypoint_research::routing::{COMPANY, NODE_ERROR, RESEARCH_ATTEMPTS, RETRY_HISTORY};
use waypoint_research::{
    query_text, IntentAnalysis, IntentAnalyzer, IntentCategory, QualityValidator, ResearchAgents,
    ResearchAssistant, ResearchConfig, ResearchError, ResearchFindings, Researcher, Synthesizer, Validation,
    QUERY_BLOCKED,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Keyword-driven intent: greetings, insider requests, and known companies
struct KeywordIntent;

#[async_trait]
impl IntentAnalyzer for KeywordIntent {
    async fn analyze(&self, state: &State) -> Result<IntentAnalysis, NodeError> {
        let query = query_text(state).unwrap_or_default().to_lowercase();
        if query.contains("#fail") && state.input_str("company").is_none() {
            return Err(NodeError::failed("intent classifier unavailable"));
        }
        if query.starts_with("hello") {
            return Ok(IntentAnalysis::new(IntentCategory::Greeting));
        }
        if query.contains("insider") {
            return Ok(IntentAnalysis::new(IntentCategory::InsiderTrading));
        }
        if let Some(company) = state.input_str("company") {
            return Ok(IntentAnalysis::research(company));
        }
        for company in ["apple", "tesla"] {
            if query.contains(company) {
                return Ok(IntentAnalysis::research(company).with_topic("overview"));
            }
        }
        Ok(IntentAnalysis::new(IntentCategory::Unclear).with_question("Which company do you mean?"))
    }
}

/// Confidence taken from a script, one entry per pass; the last entry repeats
struct ScriptedResearcher {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

impl ScriptedResearcher {
    fn new(scores: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            scores: scores.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Researcher for ScriptedResearcher {
    async fn research(&self, state: &State) -> Result<ResearchFindings, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pass = state.counter(RESEARCH_ATTEMPTS) as usize;
        let score = self.scores[pass.min(self.scores.len() - 1)];
        let company = state.field_str(COMPANY).unwrap_or("unknown");
        Ok(ResearchFindings::new(format!("{} findings, pass {}", company, pass + 1), score).with_source("filings"))
    }
}

/// Fails the first `failures` calls, then reports `score`
struct FlakyResearcher {
    failures: usize,
    score: f64,
    calls: AtomicUsize,
}

impl FlakyResearcher {
    fn new(failures: usize, score: f64) -> Arc<Self> {
        Arc::new(Self {
            failures,
            score,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Researcher for FlakyResearcher {
    async fn research(&self, _state: &State) -> Result<ResearchFindings, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(NodeError::failed("search backend unavailable"));
        }
        Ok(ResearchFindings::new("recovered findings", self.score))
    }
}

struct BrokenValidator;

#[async_trait]
impl QualityValidator for BrokenValidator {
    async fn validate(&self, _state: &State) -> Result<Validation, NodeError> {
        Err(NodeError::failed("validator model unavailable"))
    }
}

struct BrokenSynthesizer;

#[async_trait]
impl Synthesizer for BrokenSynthesizer {
    async fn synthesize(&self, _state: &State) -> Result<String, NodeError> {
        Err(NodeError::failed("synthesis model unavailable"))
    }
}

/// Sufficient once `passes` research passes have completed
struct PassCountValidator {
    passes: u32,
}

#[async_trait]
impl QualityValidator for PassCountValidator {
    async fn validate(&self, state: &State) -> Result<Validation, NodeError> {
        if state.counter(RESEARCH_ATTEMPTS) >= self.passes {
            Ok(Validation::sufficient())
        } else {
            Ok(Validation::insufficient("missing recent news"))
        }
    }
}

struct SummarySynthesizer;

#[async_trait]
impl Synthesizer for SummarySynthesizer {
    async fn synthesize(&self, state: &State) -> Result<String, NodeError> {
        Ok(format!(
            "Report on {} (confidence {})",
            state.field_str(COMPANY).unwrap_or("unknown"),
            state.field_f64("confidence_score").unwrap_or(0.0)
        ))
    }
}

fn agents(researcher: Arc<ScriptedResearcher>, sufficient_after: u32) -> ResearchAgents {
    ResearchAgents {
        intent: Arc::new(KeywordIntent),
        researcher,
        validator: Arc::new(PassCountValidator {
            passes: sufficient_after,
        }),
        synthesizer: Arc::new(SummarySynthesizer),
    }
}

fn assistant(agents: ResearchAgents, config: ResearchConfig) -> ResearchAssistant {
    ResearchAssistant::with_store(agents, config, Arc::new(InMemoryCheckpointStore::new())).unwrap()
}

/// Nodes run by a thread, oldest first
async fn visited(assistant: &ResearchAssistant, thread_id: &str) -> Vec<String> {
    let mut nodes: Vec<String> = assistant
        .threads()
        .history(thread_id, None)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|c| c.node)
        .collect();
    nodes.reverse();
    nodes
}

#[tokio::test]
async fn test_greeting_short_circuits_research() {
    let researcher = ScriptedResearcher::new(&[9.0]);
    let assistant = assistant(agents(researcher.clone(), 1), ResearchConfig::default());

    let result = assistant.ask(None, "hello there").await.unwrap();
    assert_eq!(result.output().unwrap()["intent"], json!("greeting"));
    assert_eq!(visited(&assistant, &result.thread_id).await, vec!["intent", "greeting"]);
    assert_eq!(researcher.calls(), 0);
}

#[tokio::test]
async fn test_confident_research_skips_validation() {
    let assistant = assistant(agents(ScriptedResearcher::new(&[8.5]), 1), ResearchConfig::default());

    let result = assistant.ask(Some("apple".into()), "How is Apple doing?").await.unwrap();
    let output = result.output().unwrap();
    assert_eq!(output["company"], json!("apple"));
    assert_eq!(output["confidence_score"], json!(8.5));
    assert_eq!(output["validation_result"], json!(null));
    assert_eq!(visited(&assistant, "apple").await, vec!["intent", "research", "synthesis"]);
}

#[tokio::test]
async fn test_research_loop_exhausts_after_max_attempts() {
    init_tracing();
    let researcher = ScriptedResearcher::new(&[2.0]);
    let assistant = assistant(agents(researcher.clone(), u32::MAX), ResearchConfig::default());

    let result = assistant.ask(Some("t".into()), "Tesla battery supply chain").await.unwrap();
    assert!(result.is_completed());
    assert_eq!(result.output().unwrap()["validation_result"], json!("insufficient"));
    assert_eq!(researcher.calls(), 3);
    assert_eq!(
        visited(&assistant, "t").await,
        vec!["intent", "research", "validator", "research", "validator", "research", "validator", "synthesis"]
    );

    let history = assistant.threads().history("t", None).await.unwrap();
    let exit = history.iter().find(|c| c.node.as_deref() == Some("validator")).unwrap();
    assert_eq!(exit.metadata.get("loop_exhausted"), Some(&json!(true)));

    let state = assistant.inspect("t").await.unwrap().state;
    let attempts = state.field(RETRY_HISTORY).unwrap().as_array().unwrap().clone();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0]["attempt"], json!(1));
    assert_eq!(attempts[0]["previous_validation"], json!(null));
    assert_eq!(attempts[2]["attempt"], json!(3));
    assert_eq!(attempts[2]["previous_validation"], json!("insufficient"));
    assert_eq!(attempts[2]["feedback_received"], json!("missing recent news"));
    assert_eq!(attempts[2]["confidence_score"], json!(2.0));
}

#[tokio::test]
async fn test_validator_accepts_second_pass() {
    let researcher = ScriptedResearcher::new(&[2.0, 4.0]);
    let assistant = assistant(agents(researcher.clone(), 2), ResearchConfig::default());

    let result = assistant.ask(Some("t".into()), "Apple leadership").await.unwrap();
    let output = result.output().unwrap();
    assert_eq!(output["validation_result"], json!("sufficient"));
    assert_eq!(output["confidence_score"], json!(4.0));
    assert_eq!(researcher.calls(), 2);

    let history = assistant.threads().history("t", None).await.unwrap();
    let exit = history.iter().find(|c| c.node.as_deref() == Some("validator")).unwrap();
    assert_eq!(exit.metadata.get("loop_exhausted"), Some(&json!(false)));
}

#[tokio::test]
async fn test_research_attempts_is_configurable() {
    let researcher = ScriptedResearcher::new(&[1.0]);
    let config = ResearchConfig::new().with_max_research_attempts(1);
    let assistant = assistant(agents(researcher.clone(), u32::MAX), config);

    assert!(assistant.ask(None, "Tesla").await.unwrap().is_completed());
    assert_eq!(researcher.calls(), 1);
}

#[tokio::test]
async fn test_confidence_threshold_is_configurable() {
    let config = ResearchConfig::new().with_confidence_threshold(9.0);
    let assistant = assistant(agents(ScriptedResearcher::new(&[8.5]), 1), config);

    let result = assistant.ask(Some("t".into()), "Apple").await.unwrap();
    assert_eq!(result.output().unwrap()["validation_result"], json!("sufficient"));
    assert!(visited(&assistant, "t").await.contains(&"validator".to_string()));
}

#[tokio::test]
async fn test_unclear_query_pauses_for_clarification() {
    let assistant = assistant(agents(ScriptedResearcher::new(&[7.0]), 1), ResearchConfig::default());

    let suspended = assistant.ask(None, "What's the current stock price?").await.unwrap();
    let request = match &suspended.outcome {
        Outcome::Suspended { request } => request.clone(),
        other => panic!("expected a clarification, got {:?}", other),
    };
    assert_eq!(request.kind, CLARIFICATION_NEEDED);
    assert_eq!(request.node, "intent");
    assert_eq!(request.question, "Which company do you mean?");

    let snapshot = assistant.inspect(&suspended.thread_id).await.unwrap();
    assert_eq!(snapshot.status, CheckpointStatus::Suspended);

    let result = assistant
        .answer(&suspended.thread_id, json!({"company": "Apple"}))
        .await
        .unwrap();
    assert_eq!(result.output().unwrap()["company"], json!("Apple"));

    let state = assistant.inspect(&suspended.thread_id).await.unwrap().state;
    assert_eq!(state.input["query"], json!("What's the current stock price?"));
    assert_eq!(state.input["company"], json!("Apple"));
    assert_eq!(
        visited(&assistant, &suspended.thread_id).await,
        vec!["intent", "intent", "research", "synthesis"]
    );
}

#[tokio::test]
async fn test_blocked_query_waits_for_a_new_one() {
    let researcher = ScriptedResearcher::new(&[7.0]);
    let assistant = assistant(agents(researcher.clone(), 1), ResearchConfig::default());

    let blocked = assistant.ask(Some("t".into()), "Any insider tips on Apple earnings?").await.unwrap();
    let request = blocked.interrupt().unwrap();
    assert_eq!(request.kind, QUERY_BLOCKED);
    assert_eq!(request.context["intent_category"], json!("insider_trading"));
    assert_eq!(researcher.calls(), 0);

    let result = assistant.answer("t", json!("Tell me about Tesla's leadership")).await.unwrap();
    assert_eq!(result.output().unwrap()["company"], json!("tesla"));
    assert_eq!(
        assistant.inspect("t").await.unwrap().state.input,
        json!("Tell me about Tesla's leadership")
    );
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let assistant = assistant(agents(ScriptedResearcher::new(&[7.0]), 1), ResearchConfig::default());
    let err = assistant.ask(None, "   ").await.unwrap_err();
    assert!(matches!(err, ResearchError::InvalidQuery(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_invalid_config_rejected_at_build() {
    let config = ResearchConfig::new().with_max_research_attempts(0);
    let err = ResearchAssistant::with_store(
        agents(ScriptedResearcher::new(&[7.0]), 1),
        config,
        Arc::new(InMemoryCheckpointStore::new()),
    )
    .unwrap_err();
    assert!(matches!(err, ResearchError::Graph(_)));
}

#[tokio::test]
async fn test_clarification_survives_restart_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let config = ResearchConfig::new().with_engine(EngineConfig::new().with_sqlite(dir.path().join("research.db")));

    let thread_id = {
        let assistant = ResearchAssistant::new(agents(ScriptedResearcher::new(&[7.0]), 1), config.clone())
            .await
            .unwrap();
        let result = assistant.ask(None, "Latest earnings call?").await.unwrap();
        assert!(result.is_suspended());
        result.thread_id
    };

    let assistant = ResearchAssistant::new(agents(ScriptedResearcher::new(&[7.0]), 1), config)
        .await
        .unwrap();
    let result = assistant.answer(&thread_id, json!({"company": "Apple"})).await.unwrap();
    assert_eq!(result.output().unwrap()["company"], json!("Apple"));
}

#[tokio::test]
async fn test_failed_research_pass_is_retried() {
    let researcher = FlakyResearcher::new(1, 8.0);
    let mut agents = agents(ScriptedResearcher::new(&[0.0]), 1);
    agents.researcher = researcher.clone();
    let assistant = assistant(agents, ResearchConfig::default());

    let result = assistant.ask(Some("t".into()), "Apple outlook").await.unwrap();
    assert_eq!(result.output().unwrap()["confidence_score"], json!(8.0));
    assert_eq!(researcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        visited(&assistant, "t").await,
        vec!["intent", "research", "error_handler", "research", "synthesis"]
    );

    let state = assistant.inspect("t").await.unwrap().state;
    assert_eq!(state.field(NODE_ERROR), Some(&json!(null)));
    let attempts = state.field(RETRY_HISTORY).unwrap().as_array().unwrap().clone();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["error"], json!("search backend unavailable"));
    assert_eq!(attempts[1]["confidence_score"], json!(8.0));
}

#[tokio::test]
async fn test_research_failures_stop_at_attempt_budget() {
    let researcher = FlakyResearcher::new(usize::MAX, 8.0);
    let mut agents = agents(ScriptedResearcher::new(&[0.0]), 1);
    agents.researcher = researcher.clone();
    let assistant = assistant(agents, ResearchConfig::default());

    let result = assistant.ask(Some("t".into()), "Tesla margins").await.unwrap();
    assert!(result.is_completed());
    assert_eq!(researcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        visited(&assistant, "t").await,
        vec![
            "intent",
            "research",
            "error_handler",
            "research",
            "error_handler",
            "research",
            "error_handler",
            "synthesis"
        ]
    );

    let history = assistant.threads().history("t", None).await.unwrap();
    let exit = history.iter().find(|c| c.node.as_deref() == Some("error_handler")).unwrap();
    assert_eq!(exit.metadata.get("loop_exhausted"), Some(&json!(true)));
}

#[tokio::test]
async fn test_failed_validation_proceeds_to_synthesis() {
    let researcher = ScriptedResearcher::new(&[2.0]);
    let mut agents = agents(researcher.clone(), 1);
    agents.validator = Arc::new(BrokenValidator);
    let assistant = assistant(agents, ResearchConfig::default());

    let result = assistant.ask(Some("t".into()), "Apple leadership").await.unwrap();
    let output = result.output().unwrap();
    assert_eq!(output["confidence_score"], json!(2.0));
    assert_eq!(output["validation_result"], json!(null));
    assert_eq!(researcher.calls(), 1);
    assert_eq!(visited(&assistant, "t").await, vec!["intent", "research", "validator", "synthesis"]);

    let state = assistant.inspect("t").await.unwrap().state;
    assert_eq!(state.field(NODE_ERROR).unwrap()["node"], json!("validator"));
}

#[tokio::test]
async fn test_failed_intent_asks_to_rephrase() {
    let assistant = assistant(agents(ScriptedResearcher::new(&[7.0]), 1), ResearchConfig::default());

    let suspended = assistant.ask(Some("t".into()), "#fail what about them?").await.unwrap();
    let request = suspended.interrupt().unwrap();
    assert_eq!(request.kind, CLARIFICATION_NEEDED);
    assert_eq!(request.context["error"], json!("intent classifier unavailable"));

    let result = assistant.answer("t", json!({"company": "Apple"})).await.unwrap();
    assert_eq!(result.output().unwrap()["company"], json!("Apple"));
}

#[tokio::test]
async fn test_failed_synthesis_answers_with_findings() {
    let mut agents = agents(ScriptedResearcher::new(&[9.0]), 1);
    agents.synthesizer = Arc::new(BrokenSynthesizer);
    let assistant = assistant(agents, ResearchConfig::default());

    let result = assistant.ask(Some("t".into()), "Apple overview").await.unwrap();
    let response = result.output().unwrap()["response"].as_str().unwrap().to_string();
    assert!(response.contains("apple findings, pass 1"), "{}", response);
}
