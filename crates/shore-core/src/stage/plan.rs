use std::sync::Arc;

use serde_json::{json, Value};

use super::StageDefinition;
use crate::errors::OrchestratorError;
use crate::graph::PipelineGraph;
use crate::hashing::hash_value;

/// Conjunto ordenado y validado de definiciones de stage. Un mismo plan se
/// comparte entre un cálculo y sus forks.
#[derive(Clone)]
pub struct PipelinePlan {
    stages: Vec<Arc<dyn StageDefinition>>,
    definition_hash: String,
}

/// Builder del plan; `build` valida ids únicos, dependencias declaradas y
/// ausencia de ciclos.
#[derive(Default)]
pub struct PipelinePlanBuilder {
    stages: Vec<Arc<dyn StageDefinition>>,
}

impl PipelinePlanBuilder {
    pub fn stage<S: StageDefinition + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn shared(mut self, stage: Arc<dyn StageDefinition>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<PipelinePlan, OrchestratorError> {
        let mut graph = PipelineGraph::new();
        for s in &self.stages {
            graph.add_stage(s.id(), s.dependencies())?;
        }
        for s in &self.stages {
            if let Some(missing) = s.dependencies().into_iter().find(|d| !graph.contains(d)) {
                return Err(OrchestratorError::UnknownStage(missing));
            }
        }
        let order = graph.topological_order();
        let mut stages = self.stages;
        stages.sort_by_key(|s| order.iter().position(|id| id == s.id()));
        let description: Vec<Value> = stages.iter()
                                            .map(|s| {
                                                json!({
                                                    "id": s.id(),
                                                    "dependencies": s.dependencies(),
                                                    "target": s.target(),
                                                    "signature": s.signature(),
                                                })
                                            })
                                            .collect();
        let definition_hash = hash_value(&Value::Array(description));
        Ok(PipelinePlan { stages, definition_hash })
    }
}

impl PipelinePlan {
    pub fn builder() -> PipelinePlanBuilder {
        PipelinePlanBuilder::default()
    }

    /// Stages en orden topológico.
    pub fn stages(&self) -> &[Arc<dyn StageDefinition>] {
        &self.stages
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn StageDefinition>> {
        self.stages.iter().find(|s| s.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }
}

impl std::fmt::Debug for PipelinePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinePlan")
         .field("stages", &self.ids())
         .field("definition_hash", &self.definition_hash)
         .finish()
    }
}
