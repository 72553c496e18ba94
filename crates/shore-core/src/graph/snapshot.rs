//! Snapshot estructurado del grafo para observabilidad. No tiene efectos
//! secundarios; el render terminal/gráfico es responsabilidad del consumidor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionTarget, StageStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub name: String,
    pub status: StageStatus,
    pub dependencies: Vec<String>,
    pub target: ExecutionTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reused_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub generated_at: DateTime<Utc>,
    pub stages: Vec<StageSnapshot>,
}

impl PipelineSnapshot {
    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }
}

impl fmt::Display for PipelineSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.stages.iter().map(|s| s.name.len()).max().unwrap_or(5).max(5);
        writeln!(f, "{:<width$}  {:<9}  {:<6}  depends on", "stage", "status", "target")?;
        for s in &self.stages {
            let deps = if s.dependencies.is_empty() { "-".to_string() } else { s.dependencies.join(", ") };
            write!(f, "{:<width$}  {:<9}  {:<6}  {}", s.name, s.status.as_str(), s.target.to_string(), deps)?;
            if let Some(src) = &s.reused_from {
                write!(f, "  (reused {src})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
