//! Pipeline Graph: conjunto ordenado de stages con dependencias.
//!
//! Invariantes:
//! - La relación de dependencias es acíclica (se verifica en cada inserción).
//! - El estado de un stage solo avanza salvo `mark(.., force = true)`, que
//!   además resetea a `Pending` a todos sus dependientes transitivos.
//!
//! Las dependencias pueden nombrar stages aún no insertados; un stage así no
//! está listo hasta que la dependencia exista y esté `Done`.

mod snapshot;
mod stage;
mod status;

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, warn};

pub use snapshot::{PipelineSnapshot, StageSnapshot};
pub use stage::{Stage, StageSpec};
pub use status::{ExecutionTarget, StageStatus};

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    stages: IndexMap<String, Stage>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    /// Inserta un stage remoto sin metadatos.
    pub fn add_stage<I, S>(&mut self, name: &str, dependencies: I) -> Result<(), OrchestratorError>
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.add_stage_with(StageSpec::new(name).depends_on(dependencies))
    }

    pub fn add_stage_with(&mut self, spec: StageSpec) -> Result<(), OrchestratorError> {
        if self.stages.contains_key(&spec.name) {
            return Err(OrchestratorError::DuplicateStage(spec.name));
        }
        let mut deps: Vec<String> = Vec::with_capacity(spec.dependencies.len());
        for d in spec.dependencies {
            if !deps.contains(&d) {
                deps.push(d);
            }
        }
        if self.would_cycle(&spec.name, &deps) {
            return Err(OrchestratorError::CyclicDependency { stage: spec.name });
        }
        debug!("graph: add stage {} deps={:?}", spec.name, deps);
        let stage = Stage { ordinal: self.stages.len(),
                            name: spec.name.clone(),
                            dependencies: deps,
                            status: StageStatus::Pending,
                            target: spec.target,
                            fingerprint: spec.fingerprint,
                            remote_dir: spec.remote_dir,
                            reused_from: None,
                            updated_at: Utc::now() };
        self.stages.insert(spec.name, stage);
        Ok(())
    }

    /// ¿Alguna dependencia alcanza `name` siguiendo aristas existentes? Los
    /// stages ya presentes pueden referirse a `name` por adelantado.
    fn would_cycle(&self, name: &str, deps: &[String]) -> bool {
        let mut stack: Vec<&str> = deps.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == name {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(stage) = self.stages.get(current) {
                stack.extend(stage.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    /// Actualiza el estado de un stage.
    ///
    /// Sin `force` solo se aceptan avances (o el mismo estado, como no-op).
    /// Con `force` el estado se fija tal cual y todos los dependientes
    /// transitivos vuelven a `Pending`. Devuelve los stages que cambiaron.
    pub fn mark(&mut self, name: &str, status: StageStatus, force: bool) -> Result<Vec<String>, OrchestratorError> {
        let current = self.stages
                          .get(name)
                          .map(|s| s.status)
                          .ok_or_else(|| OrchestratorError::UnknownStage(name.to_string()))?;
        if !force {
            if !current.can_advance_to(status) {
                warn!("graph: rejected transition {name} {current} -> {status}");
                return Err(OrchestratorError::InvalidTransition { stage: name.to_string(),
                                                                  from: current,
                                                                  to: status });
            }
            if current == status {
                return Ok(Vec::new());
            }
            self.set_status(name, status);
            return Ok(vec![name.to_string()]);
        }

        let mut changed = Vec::new();
        if current != status {
            changed.push(name.to_string());
        }
        self.set_status(name, status);
        if let Some(stage) = self.stages.get_mut(name) {
            stage.reused_from = None;
        }
        for dep in self.dependents_of(name) {
            if let Some(stage) = self.stages.get_mut(&dep) {
                if stage.status != StageStatus::Pending || stage.reused_from.is_some() {
                    stage.status = StageStatus::Pending;
                    stage.reused_from = None;
                    stage.updated_at = Utc::now();
                    changed.push(dep);
                }
            }
        }
        debug!("graph: forced {name} -> {status}, changed={changed:?}");
        Ok(changed)
    }

    fn set_status(&mut self, name: &str, status: StageStatus) {
        if let Some(stage) = self.stages.get_mut(name) {
            stage.status = status;
            stage.updated_at = Utc::now();
        }
    }

    /// Restaura un estado persistido sin validar la transición.
    pub(crate) fn restore_status(&mut self, name: &str, status: StageStatus) {
        self.set_status(name, status);
    }

    pub fn set_fingerprint(&mut self, name: &str, fingerprint: Option<String>) -> Result<(), OrchestratorError> {
        self.stage_mut(name)?.fingerprint = fingerprint;
        Ok(())
    }

    pub fn set_remote_dir(&mut self, name: &str, remote_dir: Option<String>) -> Result<(), OrchestratorError> {
        self.stage_mut(name)?.remote_dir = remote_dir;
        Ok(())
    }

    /// Adopta el resultado de `source` (otro stage `Done` con el mismo
    /// fingerprint): el stage pasa a `Done` apuntando al directorio remoto de
    /// la fuente.
    pub fn adopt(&mut self, name: &str, source: &str) -> Result<(), OrchestratorError> {
        let src = self.stages
                      .get(source)
                      .cloned()
                      .ok_or_else(|| OrchestratorError::UnknownStage(source.to_string()))?;
        if src.status != StageStatus::Done {
            return Err(OrchestratorError::InvalidTransition { stage: source.to_string(),
                                                              from: src.status,
                                                              to: StageStatus::Done });
        }
        self.mark(name, StageStatus::Done, false)?;
        let stage = self.stage_mut(name)?;
        stage.reused_from = Some(src.reused_from.unwrap_or(src.name));
        stage.remote_dir = src.remote_dir;
        Ok(())
    }

    pub(crate) fn set_reused_from(&mut self, name: &str, source: Option<String>) -> Result<(), OrchestratorError> {
        self.stage_mut(name)?.reused_from = source;
        Ok(())
    }

    fn stage_mut(&mut self, name: &str) -> Result<&mut Stage, OrchestratorError> {
        self.stages
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownStage(name.to_string()))
    }

    fn deps_done(&self, stage: &Stage) -> bool {
        stage.dependencies
             .iter()
             .all(|d| self.stages.get(d).map(|s| s.status == StageStatus::Done).unwrap_or(false))
    }

    /// Frontera de scheduling: stages `Pending` cuyas dependencias están todas
    /// `Done`, en orden topológico.
    pub fn ready_stages(&self) -> Vec<String> {
        self.topological_order()
            .into_iter()
            .filter(|name| {
                self.stages
                    .get(name)
                    .map(|s| s.status == StageStatus::Pending && self.deps_done(s))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Orden topológico (Kahn), desempatando por ordinal de inserción.
    /// Dependencias hacia stages inexistentes no participan.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: IndexMap<&str, usize> = IndexMap::new();
        for stage in self.stages.values() {
            let n = stage.dependencies.iter().filter(|d| self.stages.contains_key(*d)).count();
            indegree.insert(stage.name.as_str(), n);
        }
        let mut ready: BTreeSet<(usize, &str)> = indegree.iter()
                                                         .filter(|(_, n)| **n == 0)
                                                         .map(|(name, _)| (self.stages[*name].ordinal, *name))
                                                         .collect();
        let mut order = Vec::with_capacity(self.stages.len());
        while let Some((_, name)) = ready.pop_first() {
            order.push(name.to_string());
            for stage in self.stages.values() {
                if stage.dependencies.iter().any(|d| d == name) {
                    if let Some(n) = indegree.get_mut(stage.name.as_str()) {
                        *n -= 1;
                        if *n == 0 {
                            ready.insert((stage.ordinal, stage.name.as_str()));
                        }
                    }
                }
            }
        }
        order
    }

    /// Dependientes transitivos de `name`, en orden topológico.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let mut affected: HashSet<String> = HashSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for stage in self.stages.values() {
                if stage.dependencies.contains(&current) && affected.insert(stage.name.clone()) {
                    frontier.push(stage.name.clone());
                }
            }
        }
        self.topological_order().into_iter().filter(|n| affected.contains(n)).collect()
    }

    pub fn stages_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Stage> + 'a {
        self.stages.values().filter(move |s| s.name.starts_with(prefix))
    }

    /// Primer stage `Done` (por ordinal) con el fingerprint dado, ignorando
    /// los que empiezan con `exclude_prefix`.
    pub fn find_done_by_fingerprint(&self, fingerprint: &str, exclude_prefix: &str) -> Option<&Stage> {
        self.stages.values().find(|s| {
                                s.status == StageStatus::Done
                                && s.fingerprint.as_deref() == Some(fingerprint)
                                && !s.name.starts_with(exclude_prefix)
                            })
    }

    pub fn render(&self) -> PipelineSnapshot {
        let stages = self.stages
                         .values()
                         .map(|s| StageSnapshot { name: s.name.clone(),
                                                  status: s.status,
                                                  dependencies: s.dependencies.clone(),
                                                  target: s.target,
                                                  reused_from: s.reused_from.clone() })
                         .collect();
        PipelineSnapshot { generated_at: Utc::now(), stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> PipelineGraph {
        let mut g = PipelineGraph::new();
        g.add_stage("a", Vec::<String>::new()).unwrap();
        g.add_stage("b", ["a"]).unwrap();
        g.add_stage("c", ["b"]).unwrap();
        g
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let mut g = chain();
        let err = g.add_stage("b", ["a"]).unwrap_err();
        assert_eq!(err, OrchestratorError::DuplicateStage("b".into()));
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut g = PipelineGraph::new();
        let err = g.add_stage("x", ["x"]).unwrap_err();
        assert!(matches!(err, OrchestratorError::CyclicDependency { .. }));
        assert!(g.is_empty());
    }

    #[test]
    fn cycle_through_forward_reference_is_rejected() {
        let mut g = PipelineGraph::new();
        // a depende de b, que todavía no existe
        g.add_stage("a", ["b"]).unwrap();
        let err = g.add_stage("b", ["a"]).unwrap_err();
        assert_eq!(err, OrchestratorError::CyclicDependency { stage: "b".into() });
        g.add_stage("b", Vec::<String>::new()).unwrap();
        assert_eq!(g.topological_order(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn ready_frontier_follows_done_dependencies() {
        let mut g = chain();
        assert_eq!(g.ready_stages(), vec!["a".to_string()]);
        g.mark("a", StageStatus::Done, false).unwrap();
        assert_eq!(g.ready_stages(), vec!["b".to_string()]);
        g.mark("b", StageStatus::Submitted, false).unwrap();
        assert!(g.ready_stages().is_empty());
    }

    #[test]
    fn missing_dependency_blocks_readiness() {
        let mut g = PipelineGraph::new();
        g.add_stage("late", ["ghost"]).unwrap();
        assert!(g.ready_stages().is_empty());
    }

    #[test]
    fn regression_without_force_is_rejected() {
        let mut g = chain();
        g.mark("a", StageStatus::Done, false).unwrap();
        let err = g.mark("a", StageStatus::Pending, false).unwrap_err();
        assert_eq!(err,
                   OrchestratorError::InvalidTransition { stage: "a".into(),
                                                          from: StageStatus::Done,
                                                          to: StageStatus::Pending });
        assert_eq!(g.stage("a").unwrap().status, StageStatus::Done);
    }

    #[test]
    fn same_status_mark_is_noop() {
        let mut g = chain();
        g.mark("a", StageStatus::Submitted, false).unwrap();
        assert!(g.mark("a", StageStatus::Submitted, false).unwrap().is_empty());
    }

    #[test]
    fn forced_reset_cascades_to_dependents() {
        let mut g = chain();
        for s in ["a", "b", "c"] {
            g.mark(s, StageStatus::Done, false).unwrap();
        }
        let changed = g.mark("a", StageStatus::Pending, true).unwrap();
        assert_eq!(changed, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(g.stages().all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn unknown_stage_mark_fails() {
        let mut g = chain();
        assert_eq!(g.mark("zzz", StageStatus::Done, false).unwrap_err(),
                   OrchestratorError::UnknownStage("zzz".into()));
    }

    #[test]
    fn diamond_topological_order_uses_insertion_ties() {
        let mut g = PipelineGraph::new();
        g.add_stage("root", Vec::<String>::new()).unwrap();
        g.add_stage("left", ["root"]).unwrap();
        g.add_stage("right", ["root"]).unwrap();
        g.add_stage("join", ["right", "left"]).unwrap();
        assert_eq!(g.topological_order(), vec!["root", "left", "right", "join"]);
        assert_eq!(g.dependents_of("left"), vec!["join".to_string()]);
        assert_eq!(g.dependents_of("root"), vec!["left", "right", "join"]);
    }

    #[test]
    fn adopt_copies_source_location() {
        let mut g = PipelineGraph::new();
        g.add_stage_with(StageSpec::new("x/prep").fingerprint("fp").remote_dir("shore/x/PREP")).unwrap();
        g.add_stage_with(StageSpec::new("y/prep").fingerprint("fp")).unwrap();
        g.mark("x/prep", StageStatus::Done, false).unwrap();
        let src = g.find_done_by_fingerprint("fp", "y/").unwrap().name.clone();
        g.adopt("y/prep", &src).unwrap();
        let y = g.stage("y/prep").unwrap();
        assert_eq!(y.status, StageStatus::Done);
        assert_eq!(y.reused_from.as_deref(), Some("x/prep"));
        assert_eq!(y.remote_dir.as_deref(), Some("shore/x/PREP"));
    }

    #[test]
    fn render_lists_every_stage_in_order() {
        let mut g = chain();
        g.add_stage_with(StageSpec::new("plot").depends_on(["c"]).target(ExecutionTarget::Local)).unwrap();
        let snap = g.render();
        let names: Vec<_> = snap.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "plot"]);
        assert_eq!(snap.stages[3].target, ExecutionTarget::Local);
        assert_eq!(snap.stages[1].dependencies, vec!["a".to_string()]);
        assert_eq!(snap.count(StageStatus::Pending), 4);
        let text = snap.to_string();
        assert!(text.contains("plot"));
        assert!(text.contains("local"));
    }
}
