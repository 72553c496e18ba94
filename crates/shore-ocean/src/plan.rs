use shore_core::errors::OrchestratorError;
use shore_core::stage::{PipelinePlan, Scheduler};

use crate::stage::{OceanStage, OceanStageKind};

/// Plan completo de un cálculo XAS con OCEAN.
pub fn ocean_plan(scheduler: Scheduler) -> Result<PipelinePlan, OrchestratorError> {
    OceanStageKind::ALL.iter()
                       .fold(PipelinePlan::builder(), |b, kind| b.stage(OceanStage::new(*kind, scheduler)))
                       .build()
}
