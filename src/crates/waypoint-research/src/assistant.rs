//! Caller surface of the research assistant

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;
use waypoint_checkpoint::CheckpointStore;
use waypoint_core::{Engine, RunResult, ThreadManager, ThreadSnapshot};

use crate::config::ResearchConfig;
use crate::error::{ResearchError, Result};
use crate::workflow::{research_graph, ResearchAgents};

/// Research graph behind a [`ThreadManager`]
#[derive(Clone)]
pub struct ResearchAssistant {
    threads: ThreadManager,
    config: ResearchConfig,
}

impl ResearchAssistant {
    /// Build the graph and open the checkpoint store named by `config.engine`
    pub async fn new(agents: ResearchAgents, config: ResearchConfig) -> Result<Self> {
        let graph = research_graph(&agents, &config)?;
        let engine = Engine::from_config(graph, config.engine.clone()).await?;
        Ok(Self::from_engine(engine, config))
    }

    /// Build the graph over an existing store
    pub fn with_store(
        agents: ResearchAgents,
        config: ResearchConfig,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let graph = research_graph(&agents, &config)?;
        let engine = Engine::with_config(graph, store, config.engine.clone())?;
        Ok(Self::from_engine(engine, config))
    }

    fn from_engine(engine: Engine, config: ResearchConfig) -> Self {
        Self {
            threads: ThreadManager::new(Arc::new(engine)),
            config,
        }
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Start a new run on `thread_id` (a fresh thread when `None`)
    pub async fn ask(&self, thread_id: Option<String>, query: &str) -> Result<RunResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResearchError::InvalidQuery("query is empty".to_string()));
        }

        let result = self.threads.submit(thread_id, json!({ "query": query })).await?;
        info!(thread_id = %result.thread_id, step = result.step, "Research query handled");
        Ok(result)
    }

    /// Answer a pending clarification or replace a blocked query
    pub async fn answer(&self, thread_id: &str, response: Value) -> Result<RunResult> {
        Ok(self.threads.resume(thread_id, response).await?)
    }

    pub async fn inspect(&self, thread_id: &str) -> Result<ThreadSnapshot> {
        Ok(self.threads.inspect(thread_id).await?)
    }
}

impl std::fmt::Debug for ResearchAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchAssistant")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
