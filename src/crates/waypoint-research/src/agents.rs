//! Agent collaborators of the research workflow
//!
//! Each stage of the assistant is a trait so the model-backed implementations
//! can live outside this crate. Implementations read what they need from the
//! [`State`] and return a typed result; the workflow turns those results into
//! state deltas, interrupts, and routing keys.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_core::{NodeError, State};

/// What the user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    LegitimateResearch,
    Greeting,
    /// The query cannot be researched without more information
    Unclear,
    Manipulation,
    InsiderTrading,
    Harmful,
}

impl IntentCategory {
    /// Intents the assistant refuses to research
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            IntentCategory::Manipulation | IntentCategory::InsiderTrading | IntentCategory::Harmful
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::LegitimateResearch => "legitimate_research",
            IntentCategory::Greeting => "greeting",
            IntentCategory::Unclear => "unclear",
            IntentCategory::Manipulation => "manipulation",
            IntentCategory::InsiderTrading => "insider_trading",
            IntentCategory::Harmful => "harmful",
        }
    }
}

/// Result of intent analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub category: IntentCategory,
    /// Company the query is about, when one was identified
    #[serde(default)]
    pub company: Option<String>,
    /// Finer-grained topic such as `stock_price` or `leadership`
    #[serde(default)]
    pub topic: Option<String>,
    /// Question to put to the user for unclear or blocked queries
    #[serde(default)]
    pub question: Option<String>,
}

impl IntentAnalysis {
    pub fn new(category: IntentCategory) -> Self {
        Self {
            category,
            company: None,
            topic: None,
            question: None,
        }
    }

    pub fn research(company: impl Into<String>) -> Self {
        Self::new(IntentCategory::LegitimateResearch).with_company(company)
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }
}

/// Material gathered by one research pass
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResearchFindings {
    pub summary: String,
    /// Confidence on a 0-10 scale
    pub confidence_score: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub data: Value,
}

impl ResearchFindings {
    pub fn new(summary: impl Into<String>, confidence_score: f64) -> Self {
        Self {
            summary: summary.into(),
            confidence_score,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Validator's judgement of the current findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Sufficient,
    Insufficient,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Sufficient => "sufficient",
            Verdict::Insufficient => "insufficient",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub verdict: Verdict,
    /// Gaps for the next research pass to fill
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Validation {
    pub fn sufficient() -> Self {
        Self {
            verdict: Verdict::Sufficient,
            feedback: None,
        }
    }

    pub fn insufficient(feedback: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Insufficient,
            feedback: Some(feedback.into()),
        }
    }
}

#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    async fn analyze(&self, state: &State) -> Result<IntentAnalysis, NodeError>;
}

#[async_trait]
pub trait Researcher: Send + Sync {
    /// Gather findings; `state.counter("research_attempts")` is the number of completed passes
    async fn research(&self, state: &State) -> Result<ResearchFindings, NodeError>;
}

#[async_trait]
pub trait QualityValidator: Send + Sync {
    async fn validate(&self, state: &State) -> Result<Validation, NodeError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Compose the final answer from whatever findings the state holds
    async fn synthesize(&self, state: &State) -> Result<String, NodeError>;
}

/// Text of the user's query: `input.query`, or the input itself when it is a string
pub fn query_text(state: &State) -> Option<&str> {
    state.input_str("query").or_else(|| state.input.as_str())
}
