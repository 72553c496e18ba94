//! shore-core: orquestación de cálculos multi-stage sobre un entorno remoto.
pub mod calculation;
pub mod cancel;
pub mod constants;
pub mod errors;
pub mod event;
pub mod graph;
pub mod hashing;
pub mod input;
pub mod pipeline;
pub mod remote;
pub mod results;
pub mod stage;

pub use calculation::{Calculation, CalculationConfig, CalculationState, RunOptions, RunReport, StatusReport, SyncReport};
pub use cancel::CancellationToken;
pub use errors::OrchestratorError;
pub use event::{CalculationEvent, CalculationEventKind, EventStore, InMemoryEventStore};
pub use graph::{ExecutionTarget, PipelineGraph, PipelineSnapshot, StageSnapshot, StageSpec, StageStatus};
pub use input::{InputSpecification, Vocabulary};
pub use pipeline::Pipeline;
pub use remote::{CommandOutput, InMemoryRemote, RemoteFile, RemoteSession, TransferReport, TransferStatus};
pub use results::{ResultsHandler, Series, SeriesKey};
pub use stage::{CommandStage, PipelinePlan, Scheduler, StageContext, StageDefinition};
