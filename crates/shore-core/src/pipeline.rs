//! `Pipeline`: el grafo compartido más la conexión compartida.
//!
//! Varios cálculos sostienen el mismo `Arc<Pipeline>`. El grafo va detrás de
//! un `parking_lot::Mutex`; ninguna llamada remota se hace con el lock tomado.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::OrchestratorError;
use crate::graph::{PipelineGraph, PipelineSnapshot, StageSpec, StageStatus};
use crate::remote::RemoteSession;

pub struct Pipeline {
    graph: Mutex<PipelineGraph>,
    connection: Arc<dyn RemoteSession>,
}

impl Pipeline {
    pub fn new(connection: Arc<dyn RemoteSession>) -> Arc<Self> {
        Arc::new(Self { graph: Mutex::new(PipelineGraph::new()), connection })
    }

    pub fn connection(&self) -> &Arc<dyn RemoteSession> {
        &self.connection
    }

    pub fn add_stage<I, S>(&self, name: &str, dependencies: I) -> Result<(), OrchestratorError>
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.graph.lock().add_stage(name, dependencies)
    }

    pub fn add_stage_with(&self, spec: StageSpec) -> Result<(), OrchestratorError> {
        self.graph.lock().add_stage_with(spec)
    }

    pub fn mark(&self, name: &str, status: StageStatus, force: bool) -> Result<Vec<String>, OrchestratorError> {
        self.graph.lock().mark(name, status, force)
    }

    pub fn ready_stages(&self) -> Vec<String> {
        self.graph.lock().ready_stages()
    }

    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.graph.lock().stage(name).map(|s| s.status)
    }

    pub fn render(&self) -> PipelineSnapshot {
        self.graph.lock().render()
    }

    /// Acceso directo al grafo bajo el lock.
    pub fn with_graph<T>(&self, f: impl FnOnce(&mut PipelineGraph) -> T) -> T {
        f(&mut self.graph.lock())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
         .field("host", &self.connection.host())
         .field("stages", &self.graph.lock().len())
         .finish()
    }
}
