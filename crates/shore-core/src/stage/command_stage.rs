//! `CommandStage`: stage genérico configurable. Escribe un job script que
//! corre un comando en el directorio del stage, exporta los directorios de
//! sus dependencias como `SHORE_<ID>_DIR` y deja `params.json` con el
//! subconjunto de parámetros relevante.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{JobHandle, RemoteJobState, Scheduler, StageContext, StageDefinition};
use crate::errors::OrchestratorError;
use crate::graph::ExecutionTarget;
use crate::input::Vocabulary;
use crate::remote::CommandOutput;

pub type LocalAction = Arc<dyn Fn(&StageContext) -> Result<(), OrchestratorError> + Send + Sync>;

pub const JOB_SCRIPT: &str = "job.sh";
pub const LOG_FILE: &str = "log";

#[derive(Clone)]
pub struct CommandStage {
    id: String,
    directory: String,
    dependencies: Vec<String>,
    command: String,
    categories: Vec<String>,
    params: Vec<String>,
    artifacts: Vec<String>,
    scheduler: Scheduler,
    ncores: u32,
    local: Option<LocalAction>,
}

impl fmt::Debug for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStage")
         .field("id", &self.id)
         .field("dependencies", &self.dependencies)
         .field("command", &self.command)
         .field("local", &self.local.is_some())
         .finish()
    }
}

impl CommandStage {
    pub fn new(id: &str, command: &str) -> Self {
        Self { id: id.to_string(),
               directory: id.to_string(),
               dependencies: Vec::new(),
               command: command.to_string(),
               categories: Vec::new(),
               params: Vec::new(),
               artifacts: Vec::new(),
               scheduler: Scheduler::Slurm,
               ncores: 1,
               local: None }
    }

    pub fn directory(mut self, dir: &str) -> Self {
        self.directory = dir.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.dependencies.push(dep.to_string());
        self
    }

    /// Categorías del vocabulario cuyas claves son relevantes.
    pub fn categories(mut self, cats: &[&str]) -> Self {
        self.categories.extend(cats.iter().map(|c| c.to_string()));
        self
    }

    /// Claves sueltas relevantes, además de las categorías.
    pub fn params(mut self, keys: &[&str]) -> Self {
        self.params.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn artifact(mut self, file: &str) -> Self {
        self.artifacts.push(file.to_string());
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn ncores(mut self, n: u32) -> Self {
        self.ncores = n;
        self
    }

    /// Convierte el stage en local: `action` corre de forma síncrona durante
    /// `run` en lugar de enviarse.
    pub fn local<F>(mut self, action: F) -> Self
        where F: Fn(&StageContext) -> Result<(), OrchestratorError> + Send + Sync + 'static
    {
        self.local = Some(Arc::new(action));
        self
    }
}

/// Nombre de variable de entorno para el directorio de una dependencia.
pub fn upstream_var(dep: &str) -> String {
    let cleaned: String = dep.chars()
                             .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                             .collect();
    format!("SHORE_{cleaned}_DIR")
}

impl StageDefinition for CommandStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn directory(&self) -> &str {
        &self.directory
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn target(&self) -> ExecutionTarget {
        if self.local.is_some() {
            ExecutionTarget::Local
        } else {
            ExecutionTarget::Remote
        }
    }

    fn relevant_params(&self, vocabulary: &Vocabulary) -> Vec<String> {
        let cats: Vec<&str> = self.categories.iter().map(String::as_str).collect();
        let mut keys = vocabulary.keys_in(&cats);
        for k in &self.params {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        keys
    }

    fn signature(&self) -> Value {
        json!({ "id": self.id, "command": self.command, "directory": self.directory })
    }

    fn prepare(&self, ctx: &StageContext) -> Result<Vec<PathBuf>, OrchestratorError> {
        fs::create_dir_all(&ctx.local_dir)?;
        let mut subset = Map::new();
        for k in self.relevant_params(ctx.input.vocabulary()) {
            subset.insert(k.clone(), ctx.input.value(&k).cloned().unwrap_or(Value::Null));
        }
        fs::write(ctx.local_dir.join("params.json"), serde_json::to_string_pretty(&Value::Object(subset))?)?;

        let exports: Vec<(String, String)> = ctx.upstream_dirs
                                                .iter()
                                                .map(|(dep, dir)| (upstream_var(dep), dir.clone()))
                                                .collect();
        let job_name = format!("{}-{}", ctx.calculation, self.id);
        let script = self.scheduler.job_script(&job_name, self.ncores, &exports, &self.command, LOG_FILE);
        fs::write(ctx.local_dir.join(JOB_SCRIPT), script)?;
        Ok(vec![PathBuf::from(JOB_SCRIPT), PathBuf::from("params.json")])
    }

    fn run_local(&self, ctx: &StageContext) -> Result<(), OrchestratorError> {
        match &self.local {
            Some(action) => action(ctx),
            None => Ok(()),
        }
    }

    fn submit_command(&self, ctx: &StageContext) -> String {
        self.scheduler.submit_command(&ctx.remote_dir, JOB_SCRIPT)
    }

    fn parse_submission(&self, output: &CommandOutput) -> Result<JobHandle, OrchestratorError> {
        self.scheduler.parse_submission(output)
    }

    fn status_command(&self, ctx: &StageContext, job: &JobHandle) -> String {
        self.scheduler.status_command(job, &ctx.remote_dir, LOG_FILE)
    }

    fn parse_status(&self, output: &CommandOutput) -> RemoteJobState {
        self.scheduler.parse_status(output)
    }

    fn artifacts(&self, _ctx: &StageContext) -> Vec<String> {
        let mut files = vec![LOG_FILE.to_string()];
        files.extend(self.artifacts.iter().cloned());
        files
    }

    fn diagnostic_files(&self) -> Vec<String> {
        let mut files = vec![LOG_FILE.to_string()];
        files.extend(self.scheduler.output_files().iter().map(|f| f.to_string()));
        files
    }
}
