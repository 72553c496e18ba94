//! Definiciones de stage: qué se ejecuta, dónde, con qué parámetros y qué
//! artifacts deja. El driver de `Calculation` solo habla con este trait.

mod command_stage;
mod definition;
mod plan;
mod scheduler;

pub use command_stage::{upstream_var, CommandStage, LocalAction, JOB_SCRIPT, LOG_FILE};
pub use definition::{JobHandle, RemoteJobState, StageContext, StageDefinition};
pub use plan::{PipelinePlan, PipelinePlanBuilder};
pub use scheduler::{shell_quote, Scheduler};
